use super::AgentClient;
use crate::errors::AgentError;
use crate::model::{AgentReply, Credentials, Exchange};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// What the fake agent does for a given user input.
#[derive(Debug, Clone)]
pub enum FakeStep {
    Reply(String),
    ReplyAfter(Duration, String),
    Fail(AgentError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FakeCall {
    pub user_input: String,
    pub context_len: usize,
    pub agent_id: Option<String>,
}

/// Scripted agent keyed by user input. Unscripted inputs are echoed back.
#[derive(Default)]
pub struct FakeAgentClient {
    script: HashMap<String, FakeStep>,
    delay: Duration,
    calls: Mutex<Vec<FakeCall>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeAgentClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, user_input: &str, step: FakeStep) -> Self {
        self.script.insert(user_input.to_string(), step);
        self
    }

    pub fn reply(self, user_input: &str, text: &str) -> Self {
        self.on(user_input, FakeStep::Reply(text.to_string()))
    }

    /// Delay applied to every call before the scripted step.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AgentClient for FakeAgentClient {
    async fn send(
        &self,
        context: &[Exchange],
        user_input: &str,
        credentials: &Credentials,
        _timeout: Duration,
    ) -> Result<AgentReply, AgentError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(FakeCall {
                user_input: user_input.to_string(),
                context_len: context.len(),
                agent_id: credentials.get("agent_id").map(String::from),
            });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let text = match self.script.get(user_input) {
            Some(FakeStep::Reply(t)) => t.clone(),
            Some(FakeStep::ReplyAfter(d, t)) => {
                tokio::time::sleep(*d).await;
                t.clone()
            }
            Some(FakeStep::Fail(e)) => return Err(e.clone()),
            None => format!("echo: {}", user_input),
        };

        Ok(AgentReply {
            text,
            meta: serde_json::json!({ "provider": "fake" }),
        })
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_and_echo_replies() {
        let fake = FakeAgentClient::new()
            .reply("hi", "hello there")
            .on(
                "boom",
                FakeStep::Fail(AgentError::Unavailable("down".into())),
            );
        let creds = Credentials::new().with("agent_id", "a1");
        let t = Duration::from_secs(1);

        assert_eq!(fake.send(&[], "hi", &creds, t).await.unwrap().text, "hello there");
        assert_eq!(fake.send(&[], "other", &creds, t).await.unwrap().text, "echo: other");
        assert!(fake.send(&[], "boom", &creds, t).await.is_err());

        let calls = fake.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].agent_id.as_deref(), Some("a1"));
        assert_eq!(fake.peak_in_flight(), 1);
    }
}
