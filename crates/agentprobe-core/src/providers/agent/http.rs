use super::AgentClient;
use crate::errors::AgentError;
use crate::model::{AgentReply, Credentials, Exchange};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

const ENDPOINT_KEYS: &[&str] = &["endpoint", "agent_url"];
const API_KEY_KEYS: &[&str] = &["api_key", "token"];

/// JSON-over-HTTP agent client.
///
/// Posts the whole conversation so far to the test's `endpoint` credential:
/// `{"agent_id": ..., "messages": [{"role": "user"|"assistant", "content": ...}]}`.
pub struct HttpAgentClient {
    pub client: reqwest::Client,
}

impl HttpAgentClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpAgentClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn send(
        &self,
        context: &[Exchange],
        user_input: &str,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<AgentReply, AgentError> {
        let url = credentials.first_of(ENDPOINT_KEYS).ok_or_else(|| {
            AgentError::Unauthorized("missing 'endpoint' in test credentials".into())
        })?;

        let body = json!({
            "agent_id": credentials.get("agent_id"),
            "messages": conversation_messages(context, user_input),
        });

        let mut req = self
            .client
            .post(url)
            .timeout(timeout)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = credentials.first_of(API_KEY_KEYS) {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                AgentError::Timeout(timeout)
            } else {
                AgentError::Unavailable(e.to_string())
            }
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            let text = resp.text().await.unwrap_or_default();
            return Err(AgentError::Unauthorized(format!("HTTP {}: {}", status, text)));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AgentError::Unavailable(format!("HTTP {}: {}", status, text)));
        }

        let payload: serde_json::Value = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                AgentError::Timeout(timeout)
            } else {
                AgentError::Unavailable(format!("invalid agent response body: {}", e))
            }
        })?;

        let text = extract_reply_text(&payload).ok_or_else(|| {
            AgentError::Unavailable("agent response did not contain reply text".into())
        })?;

        Ok(AgentReply {
            text,
            meta: json!({ "provider": "http" }),
        })
    }

    fn provider_name(&self) -> &'static str {
        "http"
    }
}

fn conversation_messages(context: &[Exchange], user_input: &str) -> Vec<serde_json::Value> {
    let mut messages = Vec::with_capacity(context.len() * 2 + 1);
    for ex in context {
        messages.push(json!({ "role": "user", "content": ex.user_input }));
        messages.push(json!({ "role": "assistant", "content": ex.agent_response }));
    }
    messages.push(json!({ "role": "user", "content": user_input }));
    messages
}

/// Accepts `reply`, `text`, a `messages[].message` list, or an OpenAI-style
/// `choices[0].message.content`.
pub fn extract_reply_text(payload: &serde_json::Value) -> Option<String> {
    for key in ["reply", "text"] {
        if let Some(s) = payload.get(key).and_then(|v| v.as_str()) {
            return Some(s.to_string());
        }
    }

    if let Some(msgs) = payload.get("messages").and_then(|v| v.as_array()) {
        let parts: Vec<&str> = msgs
            .iter()
            .filter_map(|m| m.get("message").and_then(|v| v.as_str()))
            .collect();
        if !parts.is_empty() {
            return Some(parts.join("\n"));
        }
    }

    payload
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .map(String::from)
}
