use crate::errors::AgentError;
use crate::model::{AgentReply, Credentials, Exchange};
use async_trait::async_trait;
use std::time::Duration;

/// Sends one conversational turn to the remote agent.
///
/// `context` holds every earlier exchange of the same test, oldest first.
/// Implementations should honour `timeout` themselves; the turn executor
/// also enforces it around the call.
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn send(
        &self,
        context: &[Exchange],
        user_input: &str,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<AgentReply, AgentError>;

    fn provider_name(&self) -> &'static str;
}

pub mod fake;
pub mod http;

pub use fake::{FakeAgentClient, FakeStep};
pub use http::HttpAgentClient;
