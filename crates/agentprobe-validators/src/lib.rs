use std::sync::Arc;

use agentprobe_core::validator_api::{Validator, ValidatorRegistry};

mod contains;
mod not_contains;
mod params;
mod regex_match;

pub mod semantic;

pub fn default_validators() -> Vec<Arc<dyn Validator>> {
    vec![
        Arc::new(contains::ContainsValidator),
        Arc::new(not_contains::NotContainsValidator),
        regex_match::validator(),
        Arc::new(semantic::AnswerRelevancyValidator),
        Arc::new(semantic::ContextualRelevancyValidator),
        Arc::new(semantic::FaithfulnessValidator),
    ]
}

/// Registry with every built-in validation type wired up.
pub fn default_registry() -> ValidatorRegistry {
    let mut reg = ValidatorRegistry::new();
    for v in default_validators() {
        reg.register(v);
    }
    reg
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentprobe_core::model::ValidationType;

    #[test]
    fn registry_covers_every_type() {
        assert_eq!(default_registry().kinds(), ValidationType::ALL.to_vec());
    }
}
