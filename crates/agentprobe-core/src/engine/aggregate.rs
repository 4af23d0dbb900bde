use crate::errors::ResultError;
use crate::model::{TestResult, TestStatus, TurnResult};
use chrono::{DateTime, Utc};

/// Running job-level counters. Folding is order-independent, so totals
/// are the same whichever order tests finish in.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Totals {
    pub completed_tests: usize,
    pub failed_tests: usize,
    pub total_validations: usize,
    pub passed_validations: usize,
    pub failed_validations: usize,
    pub latency_sum_ms: u64,
    pub latency_samples: usize,
}

impl Totals {
    pub fn fold(mut self, test: &TestResult) -> Self {
        match test.status {
            TestStatus::Completed => self.completed_tests += 1,
            TestStatus::Failed => self.failed_tests += 1,
        }
        self.total_validations += test.total_validations;
        self.passed_validations += test.passed_validations;
        self.failed_validations += test.failed_validations;
        for turn in &test.turn_results {
            self.latency_sum_ms += turn.response_time_ms;
            self.latency_samples += 1;
        }
        self
    }

    pub fn merge(self, other: Totals) -> Self {
        Self {
            completed_tests: self.completed_tests + other.completed_tests,
            failed_tests: self.failed_tests + other.failed_tests,
            total_validations: self.total_validations + other.total_validations,
            passed_validations: self.passed_validations + other.passed_validations,
            failed_validations: self.failed_validations + other.failed_validations,
            latency_sum_ms: self.latency_sum_ms + other.latency_sum_ms,
            latency_samples: self.latency_samples + other.latency_samples,
        }
    }

    pub fn finished_tests(&self) -> usize {
        self.completed_tests + self.failed_tests
    }

    pub fn pass_rate(&self) -> f64 {
        pass_rate(self.passed_validations, self.total_validations)
    }

    pub fn avg_response_time_ms(&self) -> f64 {
        mean_ms(self.latency_sum_ms, self.latency_samples)
    }
}

/// Percentage of passed validations, 0.0 when there is nothing to rate.
pub fn pass_rate(passed: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        passed as f64 * 100.0 / total as f64
    }
}

fn mean_ms(sum: u64, samples: usize) -> f64 {
    if samples == 0 {
        0.0
    } else {
        sum as f64 / samples as f64
    }
}

/// Summarizes the turns of one test. A test with an error is failed even
/// when some of its turns completed.
pub fn finish_test(
    test_id: &str,
    started_at: DateTime<Utc>,
    turn_results: Vec<TurnResult>,
    error: Option<ResultError>,
) -> TestResult {
    let total: usize = turn_results.iter().map(|t| t.validations_total).sum();
    let passed: usize = turn_results.iter().map(|t| t.validations_passed).sum();
    let latency: u64 = turn_results.iter().map(|t| t.response_time_ms).sum();

    TestResult {
        test_id: test_id.to_string(),
        status: if error.is_some() {
            TestStatus::Failed
        } else {
            TestStatus::Completed
        },
        started_at,
        completed_at: Utc::now(),
        error,
        total_validations: total,
        passed_validations: passed,
        failed_validations: total - passed,
        pass_rate: pass_rate(passed, total),
        avg_response_time_ms: mean_ms(latency, turn_results.len()),
        turn_results,
    }
}
