use super::aggregate::{finish_test, Totals};
use super::pool::WorkerPool;
use super::runner::{TestRunner, TurnObserver};
use super::turn::TurnExecutor;
use crate::config::EngineConfig;
use crate::errors::{EngineError, ErrorCode, ResultError};
use crate::model::{
    Batch, JobResult, JobStatus, JobStatusSnapshot, QueueStatus, ResultOptions, TestCase,
    TestResult,
};
use crate::storage::sink::{JobSubmitted, ResultSink, SinkEvent, SinkWriter};
use crate::validate::validate_batch;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

struct RunningTest {
    index: usize,
    test_id: String,
    turn: Option<i64>,
}

/// Live state of one job. Only ever touched under the scheduler lock.
struct JobRecord {
    job_id: String,
    batch_id: String,
    status: JobStatus,
    submitted_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    /// Indexed by submission position; `None` until the test is recorded.
    results: Vec<Option<TestResult>>,
    totals: Totals,
    /// Tests neither recorded nor skipped yet.
    pending: usize,
    skipped: usize,
    /// Still-running tests, oldest start first.
    running: Vec<RunningTest>,
    cancelled: bool,
    error: Option<ResultError>,
    done: watch::Sender<JobStatus>,
}

impl JobRecord {
    fn new(job_id: String, batch_id: String, total_tests: usize) -> Self {
        let (done, _) = watch::channel(JobStatus::Queued);
        Self {
            job_id,
            batch_id,
            status: JobStatus::Queued,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            results: vec![None; total_tests],
            totals: Totals::default(),
            pending: total_tests,
            skipped: 0,
            running: Vec::new(),
            cancelled: false,
            error: None,
            done,
        }
    }

    fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        match next {
            JobStatus::Running => self.started_at = Some(Utc::now()),
            JobStatus::Completed | JobStatus::Failed => {
                self.completed_at = Some(Utc::now());
                self.running.clear();
            }
            JobStatus::Queued => {}
        }
        self.done.send_replace(next);
        true
    }

    /// Completes the job once nothing is left to run.
    fn finish_if_drained(&mut self) -> bool {
        self.pending == 0 && self.transition(JobStatus::Completed)
    }

    fn skip(&mut self, count: usize) -> bool {
        let count = count.min(self.pending);
        self.skipped += count;
        self.pending -= count;
        self.finish_if_drained()
    }

    fn total_tests(&self) -> usize {
        self.results.len()
    }

    fn snapshot(&self) -> JobStatusSnapshot {
        let total = self.total_tests();
        let done = self.totals.finished_tests() + self.skipped;
        let progress = if total == 0 {
            100
        } else {
            ((done * 100) / total).min(100) as u8
        };
        let current = self.running.last();
        JobStatusSnapshot {
            job_id: self.job_id.clone(),
            batch_id: self.batch_id.clone(),
            status: self.status,
            submitted_at: self.submitted_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            progress,
            total_tests: total,
            completed_tests: self.totals.completed_tests,
            failed_tests: self.totals.failed_tests,
            skipped_tests: self.skipped,
            running_tests: self.running.len(),
            current_test_id: current.map(|r| r.test_id.clone()),
            current_turn: current.and_then(|r| r.turn),
            cancelled: self.cancelled,
            error: self.error.clone(),
        }
    }

    fn to_result(&self) -> JobResult {
        JobResult {
            job_id: self.job_id.clone(),
            batch_id: self.batch_id.clone(),
            status: self.status,
            submitted_at: self.submitted_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            total_tests: self.total_tests(),
            completed_tests: self.totals.completed_tests,
            failed_tests: self.totals.failed_tests,
            skipped_tests: self.skipped,
            total_validations: self.totals.total_validations,
            passed_validations: self.totals.passed_validations,
            failed_validations: self.totals.failed_validations,
            pass_rate: self.totals.pass_rate(),
            avg_response_time_ms: self.totals.avg_response_time_ms(),
            cancelled: self.cancelled,
            test_results: self.results.iter().flatten().cloned().collect(),
            error: self.error.clone(),
        }
    }
}

struct Core {
    runner: TestRunner,
    jobs: Mutex<HashMap<String, JobRecord>>,
    sink: Option<SinkWriter>,
}

impl Core {
    fn jobs(&self) -> MutexGuard<'_, HashMap<String, JobRecord>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Queued under the jobs lock so writes land in the order of the
    // progress updates they mirror; the writer thread does the I/O.
    fn emit<F>(&self, event: F)
    where
        F: FnOnce() -> SinkEvent,
    {
        if let Some(sink) = &self.sink {
            sink.send(event());
        }
    }

    fn job_finished(&self, job: &JobRecord) {
        tracing::info!(
            event = "agentprobe.job.finished",
            job_id = %job.job_id,
            status = job.status.as_str(),
            completed = job.totals.completed_tests,
            failed = job.totals.failed_tests,
            skipped = job.skipped,
            pass_rate = job.totals.pass_rate(),
        );
        self.emit(|| SinkEvent::Finished(Box::new(job.to_result())));
    }

    fn begin_test(&self, job_id: &str, index: usize, test_id: &str) -> bool {
        let mut jobs = self.jobs();
        let Some(job) = jobs.get_mut(job_id) else {
            tracing::error!(
                event = "agentprobe.scheduler.defect",
                job_id,
                "admitted test belongs to an unknown job"
            );
            return false;
        };

        if job.cancelled || job.status.is_terminal() {
            if job.skip(1) {
                self.job_finished(job);
            }
            return false;
        }

        if job.transition(JobStatus::Running) {
            tracing::info!(event = "agentprobe.job.started", job_id);
            let started_at = job.started_at.unwrap_or_else(Utc::now);
            self.emit(|| SinkEvent::Started {
                job_id: job_id.to_string(),
                started_at,
            });
        }
        job.running.push(RunningTest {
            index,
            test_id: test_id.to_string(),
            turn: None,
        });
        true
    }

    fn note_turn(&self, job_id: &str, test_id: &str, order: i64) {
        let mut jobs = self.jobs();
        if let Some(job) = jobs.get_mut(job_id) {
            if let Some(r) = job.running.iter_mut().find(|r| r.test_id == test_id) {
                r.turn = Some(order);
            }
        }
    }

    fn record(&self, job_id: &str, index: usize, result: TestResult) {
        let mut jobs = self.jobs();
        let Some(job) = jobs.get_mut(job_id) else {
            tracing::error!(
                event = "agentprobe.scheduler.defect",
                job_id,
                test_id = %result.test_id,
                "result for an unknown job"
            );
            return;
        };

        if job.status.is_terminal() {
            tracing::error!(
                event = "agentprobe.scheduler.defect",
                job_id,
                test_id = %result.test_id,
                status = job.status.as_str(),
                "result for a finished job; ignoring"
            );
            return;
        }

        match job.results.get(index) {
            Some(None) => {}
            _ => {
                tracing::error!(
                    event = "agentprobe.scheduler.defect",
                    job_id,
                    test_id = %result.test_id,
                    "test result recorded twice; ignoring"
                );
                return;
            }
        }

        tracing::info!(
            event = "agentprobe.test.finished",
            job_id,
            test_id = %result.test_id,
            status = result.status.as_str(),
            passed = result.passed_validations,
            failed = result.failed_validations,
        );

        self.emit(|| SinkEvent::TestFinished {
            job_id: job_id.to_string(),
            position: index,
            result: Box::new(result.clone()),
        });
        job.totals = job.totals.fold(&result);
        job.results[index] = Some(result);
        job.running.retain(|r| r.index != index);
        job.pending = job.pending.saturating_sub(1);

        if job.finish_if_drained() {
            self.job_finished(job);
        }
    }

    fn skip_unadmitted(&self, job_id: &str, count: usize) {
        let mut jobs = self.jobs();
        if let Some(job) = jobs.get_mut(job_id) {
            if job.skip(count) {
                self.job_finished(job);
            }
        }
    }

    async fn run_admitted(self: Arc<Self>, job_id: String, index: usize, test: Arc<TestCase>) {
        if !self.begin_test(&job_id, index, &test.test_id) {
            return;
        }
        let started_at = Utc::now();

        let observer: TurnObserver = {
            let core = self.clone();
            let job_id = job_id.clone();
            Arc::new(move |test_id: &str, order: i64| core.note_turn(&job_id, test_id, order))
        };

        let worker = {
            let core = self.clone();
            let test = test.clone();
            tokio::spawn(async move { core.runner.run_test_observed(&test, Some(&observer)).await })
        };

        let result = match worker.await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(
                    event = "agentprobe.scheduler.defect",
                    job_id = %job_id,
                    test_id = %test.test_id,
                    error = %e,
                    "test worker aborted"
                );
                finish_test(
                    &test.test_id,
                    started_at,
                    Vec::new(),
                    Some(ResultError::new(
                        ErrorCode::SchedulerFault,
                        format!("test worker aborted: {}", e),
                    )),
                )
            }
        };

        self.record(&job_id, index, result);
    }
}

/// Accepts batches, runs their tests on one shared bounded pool, and keeps
/// per-job progress and results.
///
/// Cloning is cheap; clones share the same pool and job table.
#[derive(Clone)]
pub struct Scheduler {
    core: Arc<Core>,
    pool: Arc<WorkerPool<String>>,
}

impl Scheduler {
    /// Must be called inside a tokio runtime.
    pub fn new(
        config: &EngineConfig,
        executor: TurnExecutor,
        sink: Option<Arc<dyn ResultSink>>,
    ) -> Self {
        let runner = TestRunner::new(
            executor,
            Duration::from_secs(config.default_timeout_seconds),
        );
        Self {
            core: Arc::new(Core {
                runner,
                jobs: Mutex::new(HashMap::new()),
                sink: sink.map(SinkWriter::spawn),
            }),
            pool: Arc::new(WorkerPool::new(config.max_concurrent_tests)),
        }
    }

    /// Validates and enqueues every test of `batch`. A rejected batch
    /// creates no job.
    pub fn submit(&self, batch: Batch) -> Result<String, EngineError> {
        validate_batch(&batch)?;

        let job_id = uuid::Uuid::new_v4().to_string();
        let total = batch.tests.len();
        let mut record = JobRecord::new(job_id.clone(), batch.batch_id.clone(), total);

        {
            let mut jobs = self.core.jobs();
            self.core.emit(|| {
                SinkEvent::Submitted(JobSubmitted {
                    job_id: job_id.clone(),
                    batch_id: batch.batch_id.clone(),
                    total_tests: total,
                    submitted_at: record.submitted_at,
                })
            });

            if self.pool.is_closed() {
                record.error = Some(ResultError::new(
                    ErrorCode::SchedulerFault,
                    "worker pool is shut down",
                ));
                record.pending = 0;
                record.transition(JobStatus::Failed);
                tracing::error!(
                    event = "agentprobe.scheduler.fault",
                    job_id = %job_id,
                    "job submitted after shutdown"
                );
                self.core.job_finished(&record);
                jobs.insert(job_id.clone(), record);
                return Ok(job_id);
            }
            jobs.insert(job_id.clone(), record);
        }

        tracing::info!(
            event = "agentprobe.job.submitted",
            job_id = %job_id,
            batch_id = %batch.batch_id,
            tests = total,
        );

        for (index, test) in batch.tests.into_iter().enumerate() {
            let work = self
                .core
                .clone()
                .run_admitted(job_id.clone(), index, Arc::new(test));
            if self.pool.submit(job_id.clone(), work).is_err() {
                self.core.skip_unadmitted(&job_id, total - index);
                break;
            }
        }

        Ok(job_id)
    }

    pub fn status(&self, job_id: &str) -> Result<JobStatusSnapshot, EngineError> {
        let jobs = self.core.jobs();
        jobs.get(job_id)
            .map(JobRecord::snapshot)
            .ok_or_else(|| EngineError::NotFound(job_id.to_string()))
    }

    pub fn result(&self, job_id: &str, options: ResultOptions) -> Result<JobResult, EngineError> {
        let jobs = self.core.jobs();
        let job = jobs
            .get(job_id)
            .ok_or_else(|| EngineError::NotFound(job_id.to_string()))?;
        if !job.status.is_terminal() {
            return Err(EngineError::NotReady {
                job_id: job_id.to_string(),
                status: job.status,
            });
        }
        let result = job.to_result();
        Ok(if options.include_scraped_content {
            result
        } else {
            result.without_scraped_content()
        })
    }

    /// Stops admitting the job's queued tests. Running tests finish and
    /// their results are kept. No-op for finished jobs.
    pub fn cancel(&self, job_id: &str) -> Result<(), EngineError> {
        {
            let mut jobs = self.core.jobs();
            let job = jobs
                .get_mut(job_id)
                .ok_or_else(|| EngineError::NotFound(job_id.to_string()))?;
            if job.status.is_terminal() || job.cancelled {
                return Ok(());
            }
            job.cancelled = true;
        }

        let removed = self.pool.cancel(&job_id.to_string());
        tracing::info!(
            event = "agentprobe.job.cancelled",
            job_id,
            withdrawn = removed,
        );
        self.core.skip_unadmitted(job_id, removed);
        Ok(())
    }

    pub fn queue_status(&self) -> QueueStatus {
        let active_jobs = self
            .core
            .jobs()
            .values()
            .filter(|j| !j.status.is_terminal())
            .count();
        QueueStatus {
            queued_tests: self.pool.queued(),
            running_tests: self.pool.running(),
            capacity: self.pool.capacity(),
            active_jobs,
        }
    }

    /// Resolves once the job reaches a terminal status and, with a sink
    /// configured, once its final state has been written.
    pub async fn wait(&self, job_id: &str, options: ResultOptions) -> Result<JobResult, EngineError> {
        let mut rx = {
            let jobs = self.core.jobs();
            jobs.get(job_id)
                .ok_or_else(|| EngineError::NotFound(job_id.to_string()))?
                .done
                .subscribe()
        };
        rx.wait_for(JobStatus::is_terminal)
            .await
            .map_err(|_| EngineError::SchedulerFault(format!("job {} was dropped", job_id)))?;
        // Reading the result takes the jobs lock, so the final sink event
        // is already queued when the flush marker goes in behind it.
        let result = self.result(job_id, options)?;
        if let Some(sink) = &self.core.sink {
            sink.flush().await;
        }
        Ok(result)
    }

    /// Highest number of tests that ever ran at once.
    pub fn peak_running_tests(&self) -> usize {
        self.pool.peak_running()
    }

    /// Stops the pool. Queued tests of unfinished jobs are counted as
    /// skipped; running tests complete normally and are recorded.
    pub fn shutdown(&self) {
        let mut withdrawn: HashMap<String, usize> = HashMap::new();
        for job_id in self.pool.shutdown() {
            *withdrawn.entry(job_id).or_default() += 1;
        }

        let mut jobs = self.core.jobs();
        for job in jobs.values_mut() {
            if job.status.is_terminal() {
                continue;
            }
            // Tests already taken off the queue but not yet begun skip
            // themselves in `begin_test`.
            job.cancelled = true;
            let queued = withdrawn.get(&job.job_id).copied().unwrap_or(0);
            if job.skip(queued) {
                self.core.job_finished(job);
            }
        }
        tracing::info!(
            event = "agentprobe.scheduler.shutdown",
            withdrawn = withdrawn.values().sum::<usize>(),
        );
    }
}
