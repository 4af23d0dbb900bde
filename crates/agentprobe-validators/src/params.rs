use agentprobe_core::errors::ValidatorError;
use serde_json::Value;

pub fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, ValidatorError> {
    match params.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(Value::String(_)) => Err(ValidatorError::BadParameters(format!(
            "'{}' must not be empty",
            key
        ))),
        Some(_) => Err(ValidatorError::BadParameters(format!(
            "'{}' must be a string",
            key
        ))),
        None => Err(ValidatorError::BadParameters(format!(
            "missing required parameter '{}'",
            key
        ))),
    }
}

pub fn bool_or(params: &Value, key: &str, default: bool) -> Result<bool, ValidatorError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(ValidatorError::BadParameters(format!(
            "'{}' must be a boolean",
            key
        ))),
    }
}

/// Thresholds outside [0, 1] can never be met or always are, so they are rejected.
pub fn threshold(params: &Value, default: f64) -> Result<f64, ValidatorError> {
    match params.get("threshold") {
        None | Some(Value::Null) => Ok(default),
        Some(v) => match v.as_f64() {
            Some(t) if (0.0..=1.0).contains(&t) => Ok(t),
            _ => Err(ValidatorError::BadParameters(
                "'threshold' must be a number in [0, 1]".into(),
            )),
        },
    }
}

/// Accepts a string or an array of strings; anything else is ignored.
pub fn text_list(params: &Value, key: &str) -> Vec<String> {
    match params.get(key) {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|i| i.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}
