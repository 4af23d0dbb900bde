use agentprobe_core::errors::ValidatorError;
use agentprobe_core::model::ValidationType;
use agentprobe_core::validator_api::{ValidationRequest, Validator, Verdict};
use async_trait::async_trait;

use crate::contains::find;
use crate::params;

pub struct NotContainsValidator;

#[async_trait]
impl Validator for NotContainsValidator {
    fn kind(&self) -> ValidationType {
        ValidationType::NotContains
    }

    async fn evaluate(&self, req: &ValidationRequest) -> Result<Verdict, ValidatorError> {
        let text = params::required_str(&req.parameters, "text")?;
        let case_sensitive = params::bool_or(&req.parameters, "case_sensitive", true)?;

        if find(&req.response, text, case_sensitive) {
            return Ok(Verdict::fail(
                0.0,
                &format!("excluded text '{}' found", text),
            ));
        }
        Ok(Verdict::pass(1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn flags_excluded_text_ignoring_case() {
        let req = ValidationRequest {
            user_input: "q".into(),
            response: "Please contact SUPPORT".into(),
            scraped_content: None,
            parameters: json!({"text": "support", "case_sensitive": false}),
        };
        let v = NotContainsValidator.evaluate(&req).await.unwrap();
        assert!(!v.passed);
        assert_eq!(v.details["message"], "excluded text 'support' found");
    }

    #[tokio::test]
    async fn passes_when_absent() {
        let req = ValidationRequest {
            user_input: "q".into(),
            response: "All good".into(),
            scraped_content: None,
            parameters: json!({"text": "error"}),
        };
        let v = NotContainsValidator.evaluate(&req).await.unwrap();
        assert!(v.passed);
        assert_eq!(v.score, 1.0);
    }
}
