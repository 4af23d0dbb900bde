use agentprobe_core::errors::ValidatorError;
use agentprobe_core::model::ValidationType;
use agentprobe_core::validator_api::{ValidationRequest, Validator, Verdict};
use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::Value;
use std::sync::Arc;

use crate::params;

const MAX_REPORTED_MATCHES: usize = 20;

pub struct RegexValidator;

#[async_trait]
impl Validator for RegexValidator {
    fn kind(&self) -> ValidationType {
        ValidationType::Regex
    }

    async fn evaluate(&self, req: &ValidationRequest) -> Result<Verdict, ValidatorError> {
        let pattern = params::required_str(&req.parameters, "pattern")?;
        let expected_match = params::bool_or(&req.parameters, "expected_match", true)?;

        let mut b = RegexBuilder::new(pattern);
        apply_flags(&mut b, &flags(&req.parameters));

        let re = b.build().map_err(|e| {
            ValidatorError::BadParameters(format!("invalid regex pattern '{}': {}", pattern, e))
        })?;

        let matches: Vec<&str> = re
            .find_iter(&req.response)
            .take(MAX_REPORTED_MATCHES)
            .map(|m| m.as_str())
            .collect();
        let has_match = !matches.is_empty();
        let passed = has_match == expected_match;

        let message = match (has_match, expected_match) {
            (true, true) => format!("pattern '{}' matched", pattern),
            (false, true) => format!("pattern '{}' did not match", pattern),
            (true, false) => format!("pattern '{}' matched but was not expected to", pattern),
            (false, false) => format!("pattern '{}' absent as expected", pattern),
        };

        Ok(Verdict {
            passed,
            score: if passed { 1.0 } else { 0.0 },
            details: serde_json::json!({
                "message": message,
                "expected_match": expected_match,
                "matches": matches,
            }),
        })
    }
}

/// `flags` may be a string (`"im"`) or a list (`["i", "m"]`).
fn flags(params: &Value) -> Vec<String> {
    match params.get("flags") {
        Some(Value::String(s)) => s.chars().map(String::from).collect(),
        _ => params::text_list(params, "flags"),
    }
}

fn apply_flags(b: &mut RegexBuilder, flags: &[String]) {
    for f in flags {
        match f.as_str() {
            "i" => {
                b.case_insensitive(true);
            }
            "m" => {
                b.multi_line(true);
            }
            "s" => {
                b.dot_matches_new_line(true);
            }
            other => {
                tracing::debug!(flag = other, "ignoring unknown regex flag");
            }
        }
    }
}

pub fn validator() -> Arc<dyn Validator> {
    Arc::new(RegexValidator)
}
