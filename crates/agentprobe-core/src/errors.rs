use crate::model::JobStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the engine API (`submit`, `status`, `result`, `cancel`).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("invalid batch: {0}")]
    InvalidBatch(String),
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("job {job_id} is not ready (status: {status})")]
    NotReady { job_id: String, status: JobStatus },
    #[error("scheduler fault: {0}")]
    SchedulerFault(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AgentError {
    #[error("agent call timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("agent rejected credentials: {0}")]
    Unauthorized(String),
    #[error("agent unavailable: {0}")]
    Unavailable(String),
}

impl AgentError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AgentError::Timeout(_) => ErrorCode::AgentTimeout,
            AgentError::Unauthorized(_) => ErrorCode::Unauthorized,
            AgentError::Unavailable(_) => ErrorCode::AgentUnavailable,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScrapeError {
    #[error("scrape timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("fetch failed: {0}")]
    FetchFailed(String),
    #[error("unsupported content: {0}")]
    Unsupported(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidatorError {
    #[error("bad parameters: {0}")]
    BadParameters(String),
    #[error("evaluation failed: {0}")]
    EvalFailed(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
#[error("{0}")]
pub struct ConfigError(pub String);

/// Stable error codes recorded in the result tree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    AgentTimeout,
    AgentUnavailable,
    Unauthorized,
    ScrapeFailed,
    ValidatorError,
    SchedulerFault,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AgentTimeout => "AgentTimeout",
            ErrorCode::AgentUnavailable => "AgentUnavailable",
            ErrorCode::Unauthorized => "Unauthorized",
            ErrorCode::ScrapeFailed => "ScrapeFailed",
            ErrorCode::ValidatorError => "ValidatorError",
            ErrorCode::SchedulerFault => "SchedulerFault",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error captured as data inside a test, turn or validation result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultError {
    pub code: ErrorCode,
    pub message: String,
}

impl ResultError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ResultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl From<&AgentError> for ResultError {
    fn from(e: &AgentError) -> Self {
        ResultError::new(e.code(), e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_errors_map_to_codes() {
        assert_eq!(
            AgentError::Timeout(Duration::from_secs(3)).code(),
            ErrorCode::AgentTimeout
        );
        assert_eq!(
            AgentError::Unauthorized("401".into()).code(),
            ErrorCode::Unauthorized
        );
        assert_eq!(
            AgentError::Unavailable("reset".into()).code(),
            ErrorCode::AgentUnavailable
        );
    }

    #[test]
    fn result_error_serializes_code_as_name() {
        let e = ResultError::from(&AgentError::Timeout(Duration::from_millis(1500)));
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["code"], "AgentTimeout");
        assert_eq!(v["message"], "agent call timed out after 1.5s");
    }
}
