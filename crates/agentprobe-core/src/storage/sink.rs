use crate::model::{JobResult, TestResult};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, PartialEq)]
pub struct JobSubmitted {
    pub job_id: String,
    pub batch_id: String,
    pub total_tests: usize,
    pub submitted_at: DateTime<Utc>,
}

/// Write-through destination for results as they are produced.
///
/// The scheduler logs sink errors and carries on; results held in memory
/// are unaffected by a failing sink.
pub trait ResultSink: Send + Sync {
    fn job_submitted(&self, job: &JobSubmitted) -> anyhow::Result<()>;

    /// Called once, when the job's first test is admitted.
    fn job_started(&self, job_id: &str, started_at: DateTime<Utc>) -> anyhow::Result<()>;

    /// `position` is the test's index within the submitted batch.
    fn test_finished(&self, job_id: &str, position: usize, result: &TestResult)
        -> anyhow::Result<()>;

    fn job_finished(&self, result: &JobResult) -> anyhow::Result<()>;
}

pub(crate) enum SinkEvent {
    Submitted(JobSubmitted),
    Started {
        job_id: String,
        started_at: DateTime<Utc>,
    },
    TestFinished {
        job_id: String,
        position: usize,
        result: Box<TestResult>,
    },
    Finished(Box<JobResult>),
    Flush(oneshot::Sender<()>),
}

impl SinkEvent {
    fn apply(self, sink: &dyn ResultSink) -> (&'static str, anyhow::Result<()>) {
        match self {
            SinkEvent::Submitted(job) => ("job_submitted", sink.job_submitted(&job)),
            SinkEvent::Started { job_id, started_at } => {
                ("job_started", sink.job_started(&job_id, started_at))
            }
            SinkEvent::TestFinished {
                job_id,
                position,
                result,
            } => (
                "test_finished",
                sink.test_finished(&job_id, position, &result),
            ),
            SinkEvent::Finished(result) => ("job_finished", sink.job_finished(&result)),
            SinkEvent::Flush(ack) => {
                let _ = ack.send(());
                ("flush", Ok(()))
            }
        }
    }
}

/// Feeds a [`ResultSink`] from a dedicated thread, in send order.
///
/// Sending never blocks, so callers may hold their own locks while
/// queueing events. The thread exits once every sender is dropped.
pub(crate) struct SinkWriter {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl SinkWriter {
    pub(crate) fn spawn(sink: Arc<dyn ResultSink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<SinkEvent>();
        std::thread::spawn(move || {
            while let Some(event) = rx.blocking_recv() {
                let (what, outcome) = event.apply(sink.as_ref());
                if let Err(e) = outcome {
                    tracing::warn!(
                        event = "agentprobe.sink.error",
                        what,
                        error = %e,
                        "result sink write failed"
                    );
                }
            }
        });
        Self { tx }
    }

    pub(crate) fn send(&self, event: SinkEvent) {
        if self.tx.send(event).is_err() {
            tracing::error!(
                event = "agentprobe.sink.error",
                what = "send",
                "result sink writer has stopped"
            );
        }
    }

    /// Resolves once every event sent before this call has been applied.
    pub(crate) async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        self.send(SinkEvent::Flush(ack));
        let _ = done.await;
    }
}
