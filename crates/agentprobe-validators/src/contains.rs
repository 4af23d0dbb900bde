use agentprobe_core::errors::ValidatorError;
use agentprobe_core::model::ValidationType;
use agentprobe_core::validator_api::{ValidationRequest, Validator, Verdict};
use async_trait::async_trait;

use crate::params;

pub struct ContainsValidator;

#[async_trait]
impl Validator for ContainsValidator {
    fn kind(&self) -> ValidationType {
        ValidationType::Contains
    }

    async fn evaluate(&self, req: &ValidationRequest) -> Result<Verdict, ValidatorError> {
        let text = params::required_str(&req.parameters, "text")?;
        let case_sensitive = params::bool_or(&req.parameters, "case_sensitive", true)?;

        if find(&req.response, text, case_sensitive) {
            Ok(Verdict::pass(1.0).with_details(serde_json::json!({
                "message": format!("expected text '{}' found", text),
            })))
        } else {
            Ok(Verdict::fail(0.0, &format!("expected text '{}' not found", text)))
        }
    }
}

pub(crate) fn find(haystack: &str, needle: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        haystack.contains(needle)
    } else {
        haystack.to_lowercase().contains(&needle.to_lowercase())
    }
}
