use crate::model::{JobResult, TestResult, TestStatus};
use std::fmt::Write;

pub fn print_summary(result: &JobResult) {
    eprint!("{}", render_summary(result));
}

pub fn render_summary(result: &JobResult) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "\nJob {} (batch {}): {}{}",
        result.job_id,
        result.batch_id,
        result.status,
        if result.cancelled { " [cancelled]" } else { "" }
    );

    for t in &result.test_results {
        render_test(&mut out, t);
    }

    let _ = writeln!(
        out,
        "\nTests: {} total, {} completed, {} failed, {} skipped",
        result.total_tests, result.completed_tests, result.failed_tests, result.skipped_tests
    );
    let _ = writeln!(
        out,
        "Validations: {} passed, {} failed ({:.1}% pass rate)",
        result.passed_validations, result.failed_validations, result.pass_rate
    );
    let _ = writeln!(
        out,
        "Avg response time: {:.0}ms",
        result.avg_response_time_ms
    );
    if let Some(e) = &result.error {
        let _ = writeln!(out, "Error: {}", e);
    }
    out
}

fn render_test(out: &mut String, t: &TestResult) {
    let icon = match (t.status, t.failed_validations) {
        (TestStatus::Failed, _) => "❌",
        (TestStatus::Completed, 0) => "✅",
        (TestStatus::Completed, _) => "⚠️ ",
    };
    let _ = writeln!(
        out,
        "{} {:<24} {}/{} validations  ({:.1}s avg)",
        icon,
        t.test_id,
        t.passed_validations,
        t.total_validations,
        t.avg_response_time_ms / 1000.0
    );
    if let Some(e) = &t.error {
        let _ = writeln!(out, "    {}", e);
    }
    for turn in &t.turn_results {
        for v in turn.validation_results.iter().filter(|v| !v.passed) {
            let reason = v
                .error
                .as_ref()
                .map(|e| e.to_string())
                .or_else(|| {
                    v.details
                        .get("message")
                        .and_then(|m| m.as_str())
                        .map(String::from)
                })
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "    turn {} {} [{}] score {:.2} {}",
                turn.order, v.validation_id, v.validation_type, v.score, reason
            );
        }
    }
}
