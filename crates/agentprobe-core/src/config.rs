use crate::errors::ConfigError;
use crate::model::Batch;
use std::env;
use std::path::Path;

pub const DEFAULT_MAX_CONCURRENT_TESTS: usize = 4;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub max_concurrent_tests: usize,
    pub default_timeout_seconds: u64,
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tests: DEFAULT_MAX_CONCURRENT_TESTS,
            default_timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            log_level: "info".into(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| env::var(k).ok())
    }

    /// Unparseable values are ignored and the default kept.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(v) = lookup("AGENTPROBE_MAX_CONCURRENT_TESTS") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.max_concurrent_tests = n.max(1);
            }
        }
        if let Some(v) = lookup("AGENTPROBE_TIMEOUT_SECONDS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                if n > 0 {
                    cfg.default_timeout_seconds = n;
                }
            }
        }
        if let Some(v) = lookup("AGENTPROBE_LOG") {
            cfg.log_level = v;
        }
        cfg
    }

    /// Batch-level settings win over the environment.
    pub fn with_batch_settings(mut self, batch: &Batch) -> Self {
        if let Some(n) = batch.settings.max_concurrent_tests {
            self.max_concurrent_tests = n.max(1);
        }
        if let Some(t) = batch.settings.timeout_seconds.filter(|t| *t > 0) {
            self.default_timeout_seconds = t;
        }
        self
    }
}

/// Reads a YAML or JSON batch file. Unknown keys are warned about, or
/// rejected when `strict` is set.
pub fn load_batch(path: &Path, strict: bool) -> Result<Batch, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read batch {}: {}", path.display(), e)))?;
    parse_batch(&raw, strict).map_err(|e| ConfigError(format!("{} (file: {})", e, path.display())))
}

pub fn parse_batch(raw: &str, strict: bool) -> Result<Batch, ConfigError> {
    let mut ignored_keys = std::collections::BTreeSet::new();
    let deserializer = serde_yaml::Deserializer::from_str(raw);

    let batch: Batch = serde_ignored::deserialize(deserializer, |path| {
        ignored_keys.insert(path.to_string());
    })
    .map_err(|e| ConfigError(format!("failed to parse batch: {}", e)))?;

    let meaningful: Vec<_> = ignored_keys
        .iter()
        .filter(|k| !k.starts_with('_') && !k.starts_with("x-"))
        .collect();

    if !meaningful.is_empty() {
        if strict {
            return Err(ConfigError(format!(
                "unknown fields in batch: {:?}",
                meaningful
            )));
        }
        tracing::warn!(
            event = "agentprobe.config.unknown_fields",
            fields = ?meaningful,
            "ignoring unknown batch fields"
        );
    }

    Ok(batch)
}

pub const SAMPLE_BATCH: &str = r#"batch_id: demo
settings:
  max_concurrent_tests: 2
  timeout_seconds: 30
tests:
  - test_id: wifi_support
    name: WiFi troubleshooting
    credentials:
      endpoint: "https://agent.example.com/chat"
      api_key: "replace-me"
      agent_id: support-bot
    config:
      timeout_seconds: 20
      html_selector: "main"
    turns:
      - turn_id: greet
        order: 1
        user_input: "My WiFi keeps dropping. Can you help?"
        validations:
          - validation_id: mentions_wifi
            validation_type: contains
            parameters:
              text: wifi
              case_sensitive: false
          - validation_id: on_topic
            validation_type: answer_relevancy
            parameters:
              threshold: 0.3
      - turn_id: followup
        order: 2
        user_input: "Where can I read more about router placement?"
        validations:
          - validation_id: links_docs
            validation_type: regex
            parameters:
              pattern: "https?://\\S+"
          - validation_id: grounded
            validation_type: faithfulness
            parameters:
              threshold: 0.5
          - validation_id: no_apology_loop
            validation_type: not_contains
            parameters:
              text: "I'm sorry, I can't"
"#;

pub fn write_sample_batch(path: &Path) -> Result<(), ConfigError> {
    std::fs::write(path, SAMPLE_BATCH)
        .map_err(|e| ConfigError(format!("failed to write sample batch: {}", e)))?;
    Ok(())
}
