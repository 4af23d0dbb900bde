use super::aggregate::finish_test;
use super::turn::{TurnExecutor, TurnSettings};
use crate::errors::ResultError;
use crate::model::{Exchange, TestCase, TestResult, Turn};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Called with `(test_id, turn_order)` just before each turn starts.
pub type TurnObserver = Arc<dyn Fn(&str, i64) + Send + Sync>;

pub struct TestRunner {
    executor: TurnExecutor,
    default_timeout: Duration,
}

impl TestRunner {
    pub fn new(executor: TurnExecutor, default_timeout: Duration) -> Self {
        Self {
            executor,
            default_timeout,
        }
    }

    pub async fn run_test(&self, test: &TestCase) -> TestResult {
        self.run_test_observed(test, None).await
    }

    /// Turns run one at a time in ascending `order`, each seeing every
    /// earlier exchange. The first agent failure ends the test.
    pub async fn run_test_observed(
        &self,
        test: &TestCase,
        observer: Option<&TurnObserver>,
    ) -> TestResult {
        let started_at = Utc::now();
        let settings = TurnSettings::for_test(&test.config, self.default_timeout);

        let mut turns: Vec<&Turn> = test.turns.iter().collect();
        turns.sort_by_key(|t| t.order);

        let mut context: Vec<Exchange> = Vec::with_capacity(turns.len());
        let mut results = Vec::with_capacity(turns.len());
        let mut error: Option<ResultError> = None;

        for turn in turns {
            if let Some(obs) = observer {
                obs(&test.test_id, turn.order);
            }
            match self
                .executor
                .execute_turn(turn, &context, &test.credentials, &settings)
                .await
            {
                Ok(r) => {
                    context.push(Exchange {
                        user_input: turn.user_input.clone(),
                        agent_response: r.agent_response.clone(),
                    });
                    results.push(r);
                }
                Err(e) => {
                    tracing::warn!(
                        event = "agentprobe.turn.agent_error",
                        test_id = %test.test_id,
                        turn_id = %turn.turn_id,
                        order = turn.order,
                        code = %e.code(),
                        error = %e,
                        "agent call failed; stopping test"
                    );
                    error = Some(ResultError::from(&e));
                    break;
                }
            }
        }

        let result = finish_test(&test.test_id, started_at, results, error);
        tracing::debug!(
            event = "agentprobe.test.finished",
            test_id = %result.test_id,
            status = result.status.as_str(),
            passed = result.passed_validations,
            failed = result.failed_validations,
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{AgentError, ErrorCode};
    use crate::model::{Credentials, TestStatus};
    use crate::providers::agent::{FakeAgentClient, FakeStep};
    use crate::providers::scrape::StaticScraper;
    use crate::validator_api::ValidatorRegistry;
    use std::sync::Mutex;

    fn turn(id: &str, order: i64, input: &str) -> Turn {
        Turn {
            turn_id: id.into(),
            order,
            user_input: input.into(),
            validations: vec![],
        }
    }

    fn runner(agent: Arc<FakeAgentClient>) -> TestRunner {
        let exec = TurnExecutor::new(
            agent,
            Arc::new(StaticScraper::new()),
            Arc::new(ValidatorRegistry::new()),
        );
        TestRunner::new(exec, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn turns_run_in_order_with_growing_context() {
        let agent = Arc::new(FakeAgentClient::new());
        let test = TestCase {
            test_id: "t".into(),
            turns: vec![
                turn("c", 30, "third"),
                turn("a", 1, "first"),
                turn("b", 7, "second"),
            ],
            credentials: Credentials::new().with("agent_id", "x"),
            ..Default::default()
        };

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let obs: TurnObserver = Arc::new(move |_, order| sink.lock().unwrap().push(order));

        let r = runner(agent.clone()).run_test_observed(&test, Some(&obs)).await;
        assert_eq!(r.status, TestStatus::Completed);
        let orders: Vec<i64> = r.turn_results.iter().map(|t| t.order).collect();
        assert_eq!(orders, vec![1, 7, 30]);
        assert_eq!(*seen.lock().unwrap(), vec![1, 7, 30]);

        let calls = agent.calls();
        let ctx: Vec<usize> = calls.iter().map(|c| c.context_len).collect();
        assert_eq!(ctx, vec![0, 1, 2]);
        assert_eq!(calls[0].user_input, "first");
    }

    #[tokio::test]
    async fn agent_failure_stops_later_turns() {
        let agent = Arc::new(FakeAgentClient::new().on(
            "second",
            FakeStep::Fail(AgentError::Unauthorized("HTTP 401".into())),
        ));
        let test = TestCase {
            test_id: "t".into(),
            turns: vec![
                turn("a", 1, "first"),
                turn("b", 2, "second"),
                turn("c", 3, "third"),
            ],
            ..Default::default()
        };
        let r = runner(agent.clone()).run_test(&test).await;
        assert_eq!(r.status, TestStatus::Failed);
        assert_eq!(r.turn_results.len(), 1);
        assert_eq!(r.error.unwrap().code, ErrorCode::Unauthorized);
        assert_eq!(agent.calls().len(), 2);
    }
}
