use crate::model::{JobResult, TestStatus};
use std::path::Path;

/// One `<testcase>` per test; failed validations become `<failure>` entries
/// and agent errors become `<error>`.
pub fn write_junit(result: &JobResult, out: &Path) -> anyhow::Result<()> {
    std::fs::write(out, render_junit(result))?;
    Ok(())
}

pub fn render_junit(result: &JobResult) -> String {
    let mut xml = String::new();
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push('\n');
    xml.push_str(&format!(
        r#"<testsuite name="{}" tests="{}" failures="{}" skipped="{}">"#,
        escape(&result.batch_id),
        result.total_tests,
        result.failed_tests
            + result
                .test_results
                .iter()
                .filter(|t| t.status == TestStatus::Completed && t.failed_validations > 0)
                .count(),
        result.skipped_tests,
    ));
    xml.push('\n');

    for t in &result.test_results {
        xml.push_str(&format!(
            r#"  <testcase name="{}" time="{:.3}">"#,
            escape(&t.test_id),
            (t.completed_at - t.started_at).num_milliseconds() as f64 / 1000.0
        ));
        if t.status == TestStatus::Failed {
            let msg = t
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "test failed".into());
            xml.push_str(&format!(r#"<error message="{}"/>"#, escape(&msg)));
        }
        for turn in &t.turn_results {
            for v in turn.validation_results.iter().filter(|v| !v.passed) {
                xml.push_str(&format!(
                    r#"<failure message="turn {} {} ({}) score {:.2}"/>"#,
                    turn.order,
                    escape(&v.validation_id),
                    v.validation_type,
                    v.score
                ));
            }
        }
        xml.push_str("</testcase>\n");
    }

    xml.push_str("</testsuite>\n");
    xml
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(escape(r#"<a & "b">"#), "&lt;a &amp; &quot;b&quot;&gt;");
    }
}
