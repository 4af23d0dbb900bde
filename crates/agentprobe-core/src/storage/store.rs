use super::sink::{JobSubmitted, ResultSink};
use crate::errors::ResultError;
use crate::model::{
    JobResult, JobStatus, TestResult, TestStatus, TurnResult, ValidationResult, ValidationType,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Clone)]
pub struct Store {
    pub conn: Arc<Mutex<Connection>>,
}

/// One row of `list_jobs`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub batch_id: String,
    pub status: JobStatus,
    pub submitted_at: String,
    pub total_tests: usize,
    pub completed_tests: usize,
    pub failed_tests: usize,
    pub pass_rate: f64,
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("failed to open sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute_batch(super::schema::DDL)
            .context("failed to create schema")?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn list_jobs(&self, limit: u32) -> anyhow::Result<Vec<JobSummary>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT job_id, batch_id, status, submitted_at, total_tests,
                    completed_tests, failed_tests, pass_rate
             FROM jobs
             ORDER BY submitted_at DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(JobSummary {
                job_id: row.get(0)?,
                batch_id: row.get(1)?,
                status: JobStatus::parse(&row.get::<_, String>(2)?),
                submitted_at: row.get(3)?,
                total_tests: row.get::<_, i64>(4)? as usize,
                completed_tests: row.get::<_, i64>(5)? as usize,
                failed_tests: row.get::<_, i64>(6)? as usize,
                pass_rate: row.get(7)?,
            })
        })?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Rebuilds a job result from the persisted rows. Tests come back in
    /// submission order.
    pub fn load_job_result(&self, job_id: &str) -> anyhow::Result<Option<JobResult>> {
        let conn = self.lock();

        let job = conn
            .query_row(
                "SELECT batch_id, status, submitted_at, started_at, completed_at, total_tests,
                        completed_tests, failed_tests, skipped_tests, total_validations,
                        passed_validations, failed_validations, pass_rate, avg_response_time_ms,
                        cancelled, error_json
                 FROM jobs WHERE job_id = ?1",
                params![job_id],
                |row| {
                    Ok(JobRow {
                        batch_id: row.get(0)?,
                        status: row.get(1)?,
                        submitted_at: row.get(2)?,
                        started_at: row.get(3)?,
                        completed_at: row.get(4)?,
                        counts: [
                            row.get(5)?,
                            row.get(6)?,
                            row.get(7)?,
                            row.get(8)?,
                            row.get(9)?,
                            row.get(10)?,
                            row.get(11)?,
                        ],
                        pass_rate: row.get(12)?,
                        avg_response_time_ms: row.get(13)?,
                        cancelled: row.get::<_, i64>(14)? != 0,
                        error_json: row.get(15)?,
                    })
                },
            )
            .optional()?;

        let Some(job) = job else {
            return Ok(None);
        };

        let test_results = load_tests(&conn, job_id)?;
        let [total, completed, failed, skipped, vt, vp, vf] = job.counts.map(|n: i64| n as usize);

        Ok(Some(JobResult {
            job_id: job_id.to_string(),
            batch_id: job.batch_id,
            status: JobStatus::parse(&job.status),
            submitted_at: parse_ts(&job.submitted_at)?,
            started_at: job.started_at.as_deref().map(parse_ts).transpose()?,
            completed_at: job.completed_at.as_deref().map(parse_ts).transpose()?,
            total_tests: total,
            completed_tests: completed,
            failed_tests: failed,
            skipped_tests: skipped,
            total_validations: vt,
            passed_validations: vp,
            failed_validations: vf,
            pass_rate: job.pass_rate,
            avg_response_time_ms: job.avg_response_time_ms,
            cancelled: job.cancelled,
            test_results,
            error: parse_error(job.error_json)?,
        }))
    }
}

struct JobRow {
    batch_id: String,
    status: String,
    submitted_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    counts: [i64; 7],
    pass_rate: f64,
    avg_response_time_ms: f64,
    cancelled: bool,
    error_json: Option<String>,
}

fn load_tests(conn: &Connection, job_id: &str) -> anyhow::Result<Vec<TestResult>> {
    let mut stmt = conn.prepare(
        "SELECT id, test_id, status, started_at, completed_at, total_validations,
                passed_validations, failed_validations, pass_rate, avg_response_time_ms,
                error_json
         FROM test_results WHERE job_id = ?1 ORDER BY position ASC",
    )?;
    let rows = stmt.query_map(params![job_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            [
                row.get::<_, i64>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, i64>(7)?,
            ],
            row.get::<_, f64>(8)?,
            row.get::<_, f64>(9)?,
            row.get::<_, Option<String>>(10)?,
        ))
    })?;

    let mut out = Vec::new();
    for r in rows {
        let (id, test_id, status, started, completed, counts, pass_rate, avg, error_json) = r?;
        out.push(TestResult {
            test_id,
            status: TestStatus::parse(&status),
            started_at: parse_ts(&started)?,
            completed_at: parse_ts(&completed)?,
            error: parse_error(error_json)?,
            total_validations: counts[0] as usize,
            passed_validations: counts[1] as usize,
            failed_validations: counts[2] as usize,
            pass_rate,
            avg_response_time_ms: avg,
            turn_results: load_turns(conn, id)?,
        });
    }
    Ok(out)
}

fn load_turns(conn: &Connection, test_result_id: i64) -> anyhow::Result<Vec<TurnResult>> {
    let mut stmt = conn.prepare(
        "SELECT id, turn_id, turn_order, user_input, agent_response, scraped_content,
                response_time_ms
         FROM turn_results WHERE test_result_id = ?1 ORDER BY turn_order ASC",
    )?;
    let rows = stmt.query_map(params![test_result_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, i64>(6)?,
        ))
    })?;

    let mut out = Vec::new();
    for r in rows {
        let (id, turn_id, order, user_input, agent_response, scraped_content, ms) = r?;
        let validation_results = load_validations(conn, id)?;
        let passed = validation_results.iter().filter(|v| v.passed).count();
        out.push(TurnResult {
            turn_id,
            order,
            user_input,
            agent_response,
            scraped_content,
            response_time_ms: ms as u64,
            validations_total: validation_results.len(),
            validations_passed: passed,
            validations_failed: validation_results.len() - passed,
            validation_results,
        });
    }
    Ok(out)
}

fn load_validations(conn: &Connection, turn_result_id: i64) -> anyhow::Result<Vec<ValidationResult>> {
    let mut stmt = conn.prepare(
        "SELECT validation_id, validation_type, passed, score, details_json, error_json
         FROM validation_results WHERE turn_result_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![turn_result_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)? != 0,
            row.get::<_, f64>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, Option<String>>(5)?,
        ))
    })?;

    let mut out = Vec::new();
    for r in rows {
        let (validation_id, kind, passed, score, details, error_json) = r?;
        let validation_type = ValidationType::parse(&kind)
            .with_context(|| format!("unknown validation type '{}' in store", kind))?;
        out.push(ValidationResult {
            validation_id,
            validation_type,
            passed,
            score,
            details: serde_json::from_str(&details)?,
            error: parse_error(error_json)?,
        });
    }
    Ok(out)
}

fn parse_ts(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("bad timestamp '{}' in store", s))?
        .with_timezone(&Utc))
}

fn parse_error(json: Option<String>) -> anyhow::Result<Option<ResultError>> {
    match json {
        Some(s) if !s.trim().is_empty() => Ok(Some(serde_json::from_str(&s)?)),
        _ => Ok(None),
    }
}

fn error_json(e: &Option<ResultError>) -> anyhow::Result<Option<String>> {
    e.as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(Into::into)
}

impl ResultSink for Store {
    fn job_submitted(&self, job: &JobSubmitted) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO jobs(job_id, batch_id, status, submitted_at, total_tests)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                job.job_id,
                job.batch_id,
                JobStatus::Queued.as_str(),
                job.submitted_at.to_rfc3339(),
                job.total_tests as i64,
            ],
        )?;
        Ok(())
    }

    fn job_started(&self, job_id: &str, started_at: DateTime<Utc>) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE jobs SET status=?2, started_at=?3 WHERE job_id=?1",
            params![job_id, JobStatus::Running.as_str(), started_at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn test_finished(
        &self,
        job_id: &str,
        position: usize,
        result: &TestResult,
    ) -> anyhow::Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO test_results(job_id, position, test_id, status, started_at, completed_at,
                total_validations, passed_validations, failed_validations, pass_rate,
                avg_response_time_ms, error_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                job_id,
                position as i64,
                result.test_id,
                result.status.as_str(),
                result.started_at.to_rfc3339(),
                result.completed_at.to_rfc3339(),
                result.total_validations as i64,
                result.passed_validations as i64,
                result.failed_validations as i64,
                result.pass_rate,
                result.avg_response_time_ms,
                error_json(&result.error)?,
            ],
        )?;
        let test_row = tx.last_insert_rowid();

        for turn in &result.turn_results {
            tx.execute(
                "INSERT INTO turn_results(test_result_id, turn_id, turn_order, user_input,
                    agent_response, scraped_content, response_time_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    test_row,
                    turn.turn_id,
                    turn.order,
                    turn.user_input,
                    turn.agent_response,
                    turn.scraped_content,
                    turn.response_time_ms as i64,
                ],
            )?;
            let turn_row = tx.last_insert_rowid();

            for v in &turn.validation_results {
                tx.execute(
                    "INSERT INTO validation_results(turn_result_id, validation_id,
                        validation_type, passed, score, details_json, error_json)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        turn_row,
                        v.validation_id,
                        v.validation_type.as_str(),
                        v.passed as i64,
                        v.score,
                        serde_json::to_string(&v.details)?,
                        error_json(&v.error)?,
                    ],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn job_finished(&self, result: &JobResult) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE jobs SET status=?2, started_at=?3, completed_at=?4, completed_tests=?5,
                failed_tests=?6, skipped_tests=?7, total_validations=?8, passed_validations=?9,
                failed_validations=?10, pass_rate=?11, avg_response_time_ms=?12, cancelled=?13,
                error_json=?14
             WHERE job_id=?1",
            params![
                result.job_id,
                result.status.as_str(),
                result.started_at.map(|t| t.to_rfc3339()),
                result.completed_at.map(|t| t.to_rfc3339()),
                result.completed_tests as i64,
                result.failed_tests as i64,
                result.skipped_tests as i64,
                result.total_validations as i64,
                result.passed_validations as i64,
                result.failed_validations as i64,
                result.pass_rate,
                result.avg_response_time_ms,
                result.cancelled as i64,
                error_json(&result.error)?,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use crate::model::Turn;

    fn sample_test(id: &str, ok: bool) -> TestResult {
        let turn = Turn {
            turn_id: "t1".into(),
            order: 1,
            user_input: "hi".into(),
            validations: vec![],
        };
        let vr = ValidationResult {
            validation_id: "v1".into(),
            validation_type: ValidationType::ContextualRelevancy,
            passed: ok,
            score: if ok { 0.9 } else { 0.0 },
            details: serde_json::json!({ "similarity": 0.9 }),
            error: (!ok).then(|| ResultError::new(ErrorCode::ScrapeFailed, "HTTP 404")),
        };
        let tr = TurnResult::new(&turn, "hello".into(), Some("page".into()), 42, vec![vr]);
        crate::engine::aggregate::finish_test(id, Utc::now(), vec![tr], None)
    }

    #[test]
    fn round_trips_a_finished_job() {
        let store = Store::memory().unwrap();
        store.init_schema().unwrap();

        let submitted = JobSubmitted {
            job_id: "job-1".into(),
            batch_id: "b".into(),
            total_tests: 2,
            submitted_at: Utc::now(),
        };
        store.job_submitted(&submitted).unwrap();

        let second = sample_test("second", false);
        let first = sample_test("first", true);
        // Recorded in completion order, read back in submission order.
        store.test_finished("job-1", 1, &second).unwrap();
        store.test_finished("job-1", 0, &first).unwrap();

        let jr = JobResult {
            job_id: "job-1".into(),
            batch_id: "b".into(),
            status: JobStatus::Completed,
            submitted_at: submitted.submitted_at,
            started_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
            total_tests: 2,
            completed_tests: 2,
            failed_tests: 0,
            skipped_tests: 0,
            total_validations: 2,
            passed_validations: 1,
            failed_validations: 1,
            pass_rate: 50.0,
            avg_response_time_ms: 42.0,
            cancelled: false,
            test_results: vec![first.clone(), second.clone()],
            error: None,
        };
        store.job_finished(&jr).unwrap();

        let loaded = store.load_job_result("job-1").unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Completed);
        assert_eq!(loaded.pass_rate, 50.0);
        assert_eq!(loaded.test_results.len(), 2);
        assert_eq!(loaded.test_results[0].test_id, "first");
        let v = &loaded.test_results[1].turn_results[0].validation_results[0];
        assert_eq!(v.error.as_ref().unwrap().code, ErrorCode::ScrapeFailed);
        assert_eq!(v.details["similarity"], 0.9);
        assert_eq!(
            loaded.test_results[0].turn_results[0].scraped_content.as_deref(),
            Some("page")
        );

        let jobs = store.list_jobs(10).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].completed_tests, 2);
    }

    #[test]
    fn started_job_reads_back_as_running() {
        let store = Store::memory().unwrap();
        store.init_schema().unwrap();
        store
            .job_submitted(&JobSubmitted {
                job_id: "job-2".into(),
                batch_id: "b".into(),
                total_tests: 3,
                submitted_at: Utc::now(),
            })
            .unwrap();
        assert_eq!(store.list_jobs(10).unwrap()[0].status, JobStatus::Queued);

        let started = Utc::now();
        store.job_started("job-2", started).unwrap();

        assert_eq!(store.list_jobs(10).unwrap()[0].status, JobStatus::Running);
        let loaded = store.load_job_result("job-2").unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Running);
        assert_eq!(
            loaded.started_at.map(|t| t.timestamp_millis()),
            Some(started.timestamp_millis())
        );
        assert!(loaded.completed_at.is_none());
    }

    #[test]
    fn unknown_job_is_none() {
        let store = Store::memory().unwrap();
        store.init_schema().unwrap();
        assert!(store.load_job_result("missing").unwrap().is_none());
    }

    #[test]
    fn test_rows_require_a_job() {
        let store = Store::memory().unwrap();
        store.init_schema().unwrap();
        assert!(store
            .test_finished("nope", 0, &sample_test("t", true))
            .is_err());
    }
}
