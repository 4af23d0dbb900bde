use crate::errors::{AgentError, ErrorCode, ResultError, ScrapeError};
use crate::model::{Credentials, Exchange, TestConfig, Turn, TurnResult, ValidationResult};
use crate::providers::agent::AgentClient;
use crate::providers::scrape::{extract_urls, Scraper};
use crate::validator_api::{ValidationRequest, ValidatorRegistry};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Per-test knobs resolved against engine defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnSettings {
    pub timeout: Duration,
    pub html_selector: Option<String>,
}

impl TurnSettings {
    pub fn for_test(config: &TestConfig, default_timeout: Duration) -> Self {
        Self {
            timeout: config
                .timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(default_timeout),
            html_selector: config.html_selector.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct Scraped {
    pages: Vec<(String, String)>,
    failures: Vec<(String, ScrapeError)>,
}

impl Scraped {
    fn combined(&self) -> String {
        self.pages
            .iter()
            .map(|(url, text)| format!("Content from {}:\n{}\n", url, text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn failure_error(&self) -> Option<ResultError> {
        if self.failures.is_empty() {
            return None;
        }
        let msg = self
            .failures
            .iter()
            .map(|(url, e)| format!("{}: {}", url, e))
            .collect::<Vec<_>>()
            .join("; ");
        Some(ResultError::new(ErrorCode::ScrapeFailed, msg))
    }
}

/// Runs one turn: agent call, optional scraping, then every validation.
///
/// Holds only shared read-only capabilities; nothing here mutates state
/// visible to other workers.
#[derive(Clone)]
pub struct TurnExecutor {
    pub agent: Arc<dyn AgentClient>,
    pub scraper: Arc<dyn Scraper>,
    pub validators: Arc<ValidatorRegistry>,
}

impl TurnExecutor {
    pub fn new(
        agent: Arc<dyn AgentClient>,
        scraper: Arc<dyn Scraper>,
        validators: Arc<ValidatorRegistry>,
    ) -> Self {
        Self {
            agent,
            scraper,
            validators,
        }
    }

    pub async fn execute_turn(
        &self,
        turn: &Turn,
        prior: &[Exchange],
        credentials: &Credentials,
        settings: &TurnSettings,
    ) -> Result<TurnResult, AgentError> {
        let started = Instant::now();
        let call = self
            .agent
            .send(prior, &turn.user_input, credentials, settings.timeout);
        let reply = match timeout(settings.timeout, call).await {
            Ok(res) => res?,
            Err(_) => return Err(AgentError::Timeout(settings.timeout)),
        };
        let response_time_ms = started.elapsed().as_millis() as u64;

        let scraped = if turn.validations.iter().any(|v| v.wants_scraped_content()) {
            Some(self.scrape_all(&reply.text, settings).await)
        } else {
            None
        };

        let results = self
            .run_validations(turn, &reply.text, scraped.as_ref())
            .await;

        let scraped_content = scraped
            .as_ref()
            .map(Scraped::combined)
            .filter(|s| !s.is_empty());

        Ok(TurnResult::new(
            turn,
            reply.text,
            scraped_content,
            response_time_ms,
            results,
        ))
    }

    async fn scrape_all(&self, response: &str, settings: &TurnSettings) -> Scraped {
        let mut out = Scraped::default();
        for url in extract_urls(response) {
            let fetch = self
                .scraper
                .fetch(&url, settings.html_selector.as_deref(), settings.timeout);
            let res = match timeout(settings.timeout, fetch).await {
                Ok(r) => r,
                Err(_) => Err(ScrapeError::Timeout(settings.timeout)),
            };
            match res {
                Ok(text) => out.pages.push((url, text)),
                Err(e) => {
                    tracing::warn!(
                        event = "agentprobe.scrape.failed",
                        url = %url,
                        error = %e,
                        "scrape failed; continuing with partial content"
                    );
                    out.failures.push((url, e));
                }
            }
        }
        out
    }

    async fn run_validations(
        &self,
        turn: &Turn,
        response: &str,
        scraped: Option<&Scraped>,
    ) -> Vec<ValidationResult> {
        let combined = scraped.map(Scraped::combined);

        let mut handles = Vec::with_capacity(turn.validations.len());
        for v in &turn.validations {
            let wants = v.wants_scraped_content();
            let req = ValidationRequest {
                user_input: turn.user_input.clone(),
                response: response.to_string(),
                scraped_content: if wants { combined.clone() } else { None },
                parameters: v.parameters.clone(),
            };
            let registry = self.validators.clone();
            let kind = v.validation_type;
            // Each check runs on its own task so a panic stays contained.
            let handle = tokio::spawn(async move { registry.evaluate(kind, &req).await });
            handles.push((v, wants, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (v, wants, handle) in handles {
            let outcome = match handle.await {
                Ok(Ok(verdict)) => Ok(verdict),
                Ok(Err(e)) => Err(e.to_string()),
                Err(join) => Err(format!("validator panicked: {}", join)),
            };

            let result = match outcome {
                Ok(verdict) => {
                    let scrape_error = if wants {
                        scraped.and_then(Scraped::failure_error)
                    } else {
                        None
                    };
                    match scrape_error {
                        // Missing context invalidates the score; the verdict
                        // computed on partial content is kept for inspection.
                        Some(err) => ValidationResult {
                            validation_id: v.validation_id.clone(),
                            validation_type: v.validation_type,
                            passed: false,
                            score: 0.0,
                            details: serde_json::json!({
                                "scrape_error": &err.message,
                                "validator": {
                                    "passed": verdict.passed,
                                    "score": verdict.score,
                                    "details": verdict.details,
                                },
                            }),
                            error: Some(err),
                        },
                        None => ValidationResult {
                            validation_id: v.validation_id.clone(),
                            validation_type: v.validation_type,
                            passed: verdict.passed,
                            score: verdict.score,
                            details: verdict.details,
                            error: None,
                        },
                    }
                }
                Err(msg) => {
                    tracing::warn!(
                        event = "agentprobe.validator.crashed",
                        validation_id = %v.validation_id,
                        validation_type = %v.validation_type,
                        error = %msg,
                        "validator failed to execute"
                    );
                    ValidationResult {
                        validation_id: v.validation_id.clone(),
                        validation_type: v.validation_type,
                        passed: false,
                        score: 0.0,
                        details: serde_json::json!({ "message": &msg }),
                        error: Some(ResultError::new(ErrorCode::ValidatorError, msg)),
                    }
                }
            };
            results.push(result);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ValidatorError;
    use crate::model::{Validation, ValidationType};
    use crate::providers::agent::{FakeAgentClient, FakeStep};
    use crate::providers::scrape::StaticScraper;
    use crate::validator_api::{Validator, Verdict};
    use async_trait::async_trait;

    struct Fixed(ValidationType, bool);

    #[async_trait]
    impl Validator for Fixed {
        fn kind(&self) -> ValidationType {
            self.0
        }
        async fn evaluate(&self, req: &ValidationRequest) -> Result<Verdict, ValidatorError> {
            let seen = req.scraped_content.clone().unwrap_or_default();
            let v = if self.1 {
                Verdict::pass(1.0)
            } else {
                Verdict::fail(0.0, "no")
            };
            Ok(v.with_details(serde_json::json!({ "seen": seen })))
        }
    }

    struct Panics;

    #[async_trait]
    impl Validator for Panics {
        fn kind(&self) -> ValidationType {
            ValidationType::Regex
        }
        async fn evaluate(&self, _req: &ValidationRequest) -> Result<Verdict, ValidatorError> {
            panic!("regex engine exploded")
        }
    }

    fn validation(id: &str, kind: ValidationType) -> Validation {
        Validation {
            validation_id: id.into(),
            validation_type: kind,
            parameters: serde_json::json!({}),
        }
    }

    fn settings() -> TurnSettings {
        TurnSettings {
            timeout: Duration::from_secs(5),
            html_selector: None,
        }
    }

    fn executor(agent: FakeAgentClient, scraper: StaticScraper) -> TurnExecutor {
        let registry = ValidatorRegistry::new()
            .with(Arc::new(Fixed(ValidationType::Contains, true)))
            .with(Arc::new(Fixed(ValidationType::Faithfulness, true)))
            .with(Arc::new(Panics));
        TurnExecutor::new(Arc::new(agent), Arc::new(scraper), Arc::new(registry))
    }

    #[test]
    fn test_timeout_overrides_default() {
        let cfg = TestConfig {
            timeout_seconds: Some(3),
            html_selector: Some("main".into()),
        };
        let s = TurnSettings::for_test(&cfg, Duration::from_secs(30));
        assert_eq!(s.timeout, Duration::from_secs(3));
        let s = TurnSettings::for_test(&TestConfig::default(), Duration::from_secs(30));
        assert_eq!(s.timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn panicking_validator_is_isolated() {
        let exec = executor(FakeAgentClient::new(), StaticScraper::new());
        let turn = Turn {
            turn_id: "t1".into(),
            order: 1,
            user_input: "hi".into(),
            validations: vec![
                validation("a", ValidationType::Contains),
                validation("b", ValidationType::Regex),
                validation("c", ValidationType::Contains),
            ],
        };
        let r = exec
            .execute_turn(&turn, &[], &Credentials::new(), &settings())
            .await
            .unwrap();
        assert_eq!(r.validation_results.len(), 3);
        assert!(r.validation_results[0].passed);
        assert!(!r.validation_results[1].passed);
        assert_eq!(r.validation_results[1].score, 0.0);
        assert_eq!(
            r.validation_results[1].error.as_ref().map(|e| e.code),
            Some(ErrorCode::ValidatorError)
        );
        assert!(r.validation_results[2].passed);
        assert_eq!(r.validations_passed, 2);
        assert_eq!(r.validations_failed, 1);
        assert!(r.scraped_content.is_none());
    }

    #[tokio::test]
    async fn scrapes_each_distinct_url_once() {
        let agent = FakeAgentClient::new().reply(
            "docs?",
            "See https://a.example/p and https://b.example/q and https://a.example/p.",
        );
        let scraper = StaticScraper::new()
            .page("https://a.example/p", "alpha page")
            .failing(
                "https://b.example/q",
                ScrapeError::FetchFailed("HTTP 500".into()),
            );
        let scraper = Arc::new(scraper);
        let mut exec = executor(agent, StaticScraper::new());
        exec.scraper = scraper.clone();
        let turn = Turn {
            turn_id: "t1".into(),
            order: 1,
            user_input: "docs?".into(),
            validations: vec![
                validation("ctx", ValidationType::Faithfulness),
                validation("plain", ValidationType::Contains),
            ],
        };
        let r = exec
            .execute_turn(&turn, &[], &Credentials::new(), &settings())
            .await
            .unwrap();

        // The validator itself passes on the partial content, but a failed
        // scrape still forces the result to fail with a zero score.
        let ctx = &r.validation_results[0];
        assert_eq!(ctx.error.as_ref().map(|e| e.code), Some(ErrorCode::ScrapeFailed));
        assert!(!ctx.passed);
        assert_eq!(ctx.score, 0.0);
        assert_eq!(ctx.details["validator"]["passed"], true);
        assert!(ctx.details["validator"]["details"]["seen"]
            .as_str()
            .unwrap()
            .contains("Content from https://a.example/p:\nalpha page"));
        assert!(ctx.details["scrape_error"]
            .as_str()
            .unwrap()
            .contains("https://b.example/q"));
        assert_eq!(r.validations_passed, 1);

        let plain = &r.validation_results[1];
        assert!(plain.error.is_none());
        assert_eq!(plain.details["seen"], "");

        assert!(r.scraped_content.unwrap().contains("alpha page"));
        assert_eq!(
            scraper.fetched(),
            vec!["https://a.example/p", "https://b.example/q"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_agent_times_out() {
        let agent = FakeAgentClient::new().on(
            "slow",
            FakeStep::ReplyAfter(Duration::from_secs(60), "late".into()),
        );
        let exec = executor(agent, StaticScraper::new());
        let turn = Turn {
            turn_id: "t1".into(),
            order: 1,
            user_input: "slow".into(),
            validations: vec![validation("a", ValidationType::Contains)],
        };
        let err = exec
            .execute_turn(&turn, &[], &Credentials::new(), &settings())
            .await
            .unwrap_err();
        assert_eq!(err, AgentError::Timeout(Duration::from_secs(5)));
    }
}
