use crate::errors::ResultError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: String,
    #[serde(default, skip_serializing_if = "is_default_settings")]
    pub settings: BatchSettings,
    pub tests: Vec<TestCase>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_tests: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

fn is_default_settings(s: &BatchSettings) -> bool {
    s == &BatchSettings::default()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(alias = "id")]
    pub test_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub turns: Vec<Turn>,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub config: TestConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TestConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_selector: Option<String>,
}

/// Per-test identity of the target agent. Values are never printed.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Credentials(BTreeMap<String, String>);

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// First non-empty value among `keys`.
    pub fn first_of(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|k| self.get(k))
            .find(|v| !v.trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|k| (k, "<redacted>")))
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Turn {
    pub turn_id: String,
    pub order: i64,
    pub user_input: String,
    #[serde(default)]
    pub validations: Vec<Validation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validation {
    pub validation_id: String,
    pub validation_type: ValidationType,
    #[serde(default = "empty_params", alias = "validation_parameters")]
    pub parameters: serde_json::Value,
}

fn empty_params() -> serde_json::Value {
    serde_json::json!({})
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ValidationType {
    Contains,
    NotContains,
    Regex,
    AnswerRelevancy,
    ContextualRelevancy,
    Faithfulness,
}

impl ValidationType {
    pub const ALL: [ValidationType; 6] = [
        ValidationType::Contains,
        ValidationType::NotContains,
        ValidationType::Regex,
        ValidationType::AnswerRelevancy,
        ValidationType::ContextualRelevancy,
        ValidationType::Faithfulness,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationType::Contains => "contains",
            ValidationType::NotContains => "not_contains",
            ValidationType::Regex => "regex",
            ValidationType::AnswerRelevancy => "answer_relevancy",
            ValidationType::ContextualRelevancy => "contextual_relevancy",
            ValidationType::Faithfulness => "faithfulness",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Types that are scored against external content.
    pub fn needs_context(&self) -> bool {
        matches!(
            self,
            ValidationType::ContextualRelevancy | ValidationType::Faithfulness
        )
    }
}

impl fmt::Display for ValidationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Validation {
    /// Whether the turn executor must scrape URLs from the reply before running this check.
    pub fn wants_scraped_content(&self) -> bool {
        self.validation_type.needs_context()
            || self
                .parameters
                .get("use_scraped_content")
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
    }
}

/// One completed exchange, carried forward as conversational context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Exchange {
    pub user_input: String,
    pub agent_response: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentReply {
    pub text: String,
    #[serde(default)]
    pub meta: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "queued" => JobStatus::Queued,
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            _ => JobStatus::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Monotonic transitions only; terminal states are absorbing.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Queued, JobStatus::Running) => true,
            (JobStatus::Queued | JobStatus::Running, JobStatus::Completed | JobStatus::Failed) => {
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status of a test. Queued and running tests have no result yet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Completed,
    Failed,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Completed => "completed",
            TestStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => TestStatus::Completed,
            _ => TestStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub validation_id: String,
    pub validation_type: ValidationType,
    pub passed: bool,
    pub score: f64,
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResultError>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnResult {
    pub turn_id: String,
    pub order: i64,
    pub user_input: String,
    pub agent_response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scraped_content: Option<String>,
    pub response_time_ms: u64,
    pub validations_total: usize,
    pub validations_passed: usize,
    pub validations_failed: usize,
    pub validation_results: Vec<ValidationResult>,
}

impl TurnResult {
    pub fn new(
        turn: &Turn,
        agent_response: String,
        scraped_content: Option<String>,
        response_time_ms: u64,
        validation_results: Vec<ValidationResult>,
    ) -> Self {
        let passed = validation_results.iter().filter(|v| v.passed).count();
        Self {
            turn_id: turn.turn_id.clone(),
            order: turn.order,
            user_input: turn.user_input.clone(),
            agent_response,
            scraped_content,
            response_time_ms,
            validations_total: validation_results.len(),
            validations_passed: passed,
            validations_failed: validation_results.len() - passed,
            validation_results,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestResult {
    pub test_id: String,
    pub status: TestStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResultError>,
    pub total_validations: usize,
    pub passed_validations: usize,
    pub failed_validations: usize,
    pub pass_rate: f64,
    pub avg_response_time_ms: f64,
    pub turn_results: Vec<TurnResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobResult {
    pub job_id: String,
    pub batch_id: String,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub total_tests: usize,
    pub completed_tests: usize,
    pub failed_tests: usize,
    #[serde(default)]
    pub skipped_tests: usize,
    pub total_validations: usize,
    pub passed_validations: usize,
    pub failed_validations: usize,
    pub pass_rate: f64,
    pub avg_response_time_ms: f64,
    #[serde(default)]
    pub cancelled: bool,
    pub test_results: Vec<TestResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResultError>,
}

impl JobResult {
    /// Drops scraped page text from every turn.
    pub fn without_scraped_content(mut self) -> Self {
        for t in &mut self.test_results {
            for turn in &mut t.turn_results {
                turn.scraped_content = None;
            }
        }
        self
    }

    pub fn all_passed(&self) -> bool {
        self.status == JobStatus::Completed
            && self.failed_tests == 0
            && self.failed_validations == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStatusSnapshot {
    pub job_id: String,
    pub batch_id: String,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: u8,
    pub total_tests: usize,
    pub completed_tests: usize,
    pub failed_tests: usize,
    pub skipped_tests: usize,
    pub running_tests: usize,
    pub current_test_id: Option<String>,
    pub current_turn: Option<i64>,
    pub cancelled: bool,
    pub error: Option<ResultError>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStatus {
    pub queued_tests: usize,
    pub running_tests: usize,
    pub capacity: usize,
    pub active_jobs: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultOptions {
    pub include_scraped_content: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_is_monotonic() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn credentials_debug_hides_values() {
        let creds = Credentials::new()
            .with("api_key", "sk-very-secret")
            .with("agent_id", "agent-7");
        let printed = format!("{:?}", creds);
        assert!(printed.contains("api_key"));
        assert!(!printed.contains("sk-very-secret"));
        assert!(!printed.contains("agent-7"));
    }

    #[test]
    fn validation_parameters_alias_and_default() {
        let v: Validation = serde_yaml::from_str(
            "validation_id: v1\nvalidation_type: regex\nvalidation_parameters:\n  pattern: \"\\\\d+\"\n",
        )
        .unwrap();
        assert_eq!(v.validation_type, ValidationType::Regex);
        assert_eq!(v.parameters["pattern"], "\\d+");

        let v: Validation =
            serde_yaml::from_str("validation_id: v2\nvalidation_type: faithfulness\n").unwrap();
        assert!(v.parameters.as_object().unwrap().is_empty());
        assert!(v.wants_scraped_content());
    }

    #[test]
    fn unknown_validation_type_is_rejected() {
        let res: Result<Validation, _> =
            serde_yaml::from_str("validation_id: v1\nvalidation_type: sentiment\n");
        assert!(res.is_err());
    }
}
