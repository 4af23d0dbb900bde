use crate::errors::ValidatorError;
use crate::model::ValidationType;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Everything a validator may look at for one check.
#[derive(Debug, Clone)]
pub struct ValidationRequest {
    pub user_input: String,
    pub response: String,
    /// Text scraped from URLs in the response, when the check asked for it.
    pub scraped_content: Option<String>,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub passed: bool,
    pub score: f64,
    pub details: serde_json::Value,
}

impl Verdict {
    pub fn pass(score: f64) -> Self {
        Self {
            passed: true,
            score: clamp_score(score),
            details: serde_json::json!({}),
        }
    }

    pub fn fail(score: f64, message: &str) -> Self {
        Self {
            passed: false,
            score: clamp_score(score),
            details: serde_json::json!({ "message": message }),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Scores always land in [0, 1]; NaN collapses to 0.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

#[async_trait]
pub trait Validator: Send + Sync {
    fn kind(&self) -> ValidationType;

    async fn evaluate(&self, req: &ValidationRequest) -> Result<Verdict, ValidatorError>;
}

/// Maps a validation type tag to its evaluator.
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    validators: HashMap<ValidationType, Arc<dyn Validator>>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, validator: Arc<dyn Validator>) -> &mut Self {
        self.validators.insert(validator.kind(), validator);
        self
    }

    pub fn with(mut self, validator: Arc<dyn Validator>) -> Self {
        self.register(validator);
        self
    }

    pub fn get(&self, kind: ValidationType) -> Option<Arc<dyn Validator>> {
        self.validators.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<ValidationType> {
        let mut v: Vec<_> = self.validators.keys().copied().collect();
        v.sort();
        v
    }

    pub async fn evaluate(
        &self,
        kind: ValidationType,
        req: &ValidationRequest,
    ) -> Result<Verdict, ValidatorError> {
        let validator = self.get(kind).ok_or_else(|| {
            ValidatorError::EvalFailed(format!("no validator registered for '{}'", kind))
        })?;
        let mut verdict = validator.evaluate(req).await?;
        verdict.score = clamp_score(verdict.score);
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Always(bool);

    #[async_trait]
    impl Validator for Always {
        fn kind(&self) -> ValidationType {
            ValidationType::Contains
        }

        async fn evaluate(&self, _req: &ValidationRequest) -> Result<Verdict, ValidatorError> {
            Ok(Verdict {
                passed: self.0,
                score: 7.5,
                details: serde_json::json!({}),
            })
        }
    }

    fn req() -> ValidationRequest {
        ValidationRequest {
            user_input: "hi".into(),
            response: "hello".into(),
            scraped_content: None,
            parameters: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn registry_clamps_scores() {
        let reg = ValidatorRegistry::new().with(Arc::new(Always(true)));
        let v = reg.evaluate(ValidationType::Contains, &req()).await.unwrap();
        assert!(v.passed);
        assert_eq!(v.score, 1.0);
    }

    #[tokio::test]
    async fn missing_validator_is_an_eval_failure() {
        let reg = ValidatorRegistry::new();
        let err = reg
            .evaluate(ValidationType::Faithfulness, &req())
            .await
            .unwrap_err();
        assert!(matches!(err, ValidatorError::EvalFailed(_)));
    }

    #[test]
    fn clamp_handles_nan() {
        assert_eq!(clamp_score(f64::NAN), 0.0);
        assert_eq!(clamp_score(-0.2), 0.0);
        assert_eq!(clamp_score(0.42), 0.42);
    }
}
