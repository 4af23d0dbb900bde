use crate::errors::EngineError;
use crate::model::{Batch, TestCase, Turn};
use std::collections::HashSet;
use std::fmt;

/// One structural problem, located by a dotted path such as
/// `tests[1].turns[0].validations`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub path: String,
    pub message: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidateReport {
    pub issues: Vec<Issue>,
}

impl ValidateReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }

    fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.issues.push(Issue {
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Collects every structural problem in `batch` without stopping at the first.
pub fn check_batch(batch: &Batch) -> ValidateReport {
    let mut report = ValidateReport::default();

    if batch.batch_id.trim().is_empty() {
        report.push("batch_id", "must not be empty");
    }
    if batch.settings.timeout_seconds == Some(0) {
        report.push("settings.timeout_seconds", "must be greater than 0");
    }
    if batch.tests.is_empty() {
        report.push("tests", "batch has no tests");
    }

    let mut test_ids = HashSet::new();
    for (i, test) in batch.tests.iter().enumerate() {
        let path = format!("tests[{}]", i);
        if !test.test_id.trim().is_empty() && !test_ids.insert(test.test_id.as_str()) {
            report.push(
                format!("{}.test_id", path),
                format!("duplicate test id '{}'", test.test_id),
            );
        }
        check_test(&mut report, &path, test);
    }

    report
}

fn check_test(report: &mut ValidateReport, path: &str, test: &TestCase) {
    if test.test_id.trim().is_empty() {
        report.push(format!("{}.test_id", path), "must not be empty");
    }
    if test.config.timeout_seconds == Some(0) {
        report.push(
            format!("{}.config.timeout_seconds", path),
            "must be greater than 0",
        );
    }
    if let Some(sel) = &test.config.html_selector {
        if scraper::Selector::parse(sel).is_err() {
            report.push(
                format!("{}.config.html_selector", path),
                format!("invalid CSS selector '{}'", sel),
            );
        }
    }
    if test.turns.is_empty() {
        report.push(format!("{}.turns", path), "test has no turns");
    }

    let mut turn_ids = HashSet::new();
    let mut orders = HashSet::new();
    for (j, turn) in test.turns.iter().enumerate() {
        let tpath = format!("{}.turns[{}]", path, j);
        if turn.turn_id.trim().is_empty() {
            report.push(format!("{}.turn_id", tpath), "must not be empty");
        } else if !turn_ids.insert(turn.turn_id.as_str()) {
            report.push(
                format!("{}.turn_id", tpath),
                format!("duplicate turn id '{}'", turn.turn_id),
            );
        }
        if !orders.insert(turn.order) {
            report.push(
                format!("{}.order", tpath),
                format!("duplicate turn order {}", turn.order),
            );
        }
        check_turn(report, &tpath, turn);
    }
}

fn check_turn(report: &mut ValidateReport, path: &str, turn: &Turn) {
    if turn.validations.is_empty() {
        report.push(format!("{}.validations", path), "turn has no validations");
    }
    let mut ids = HashSet::new();
    for (k, v) in turn.validations.iter().enumerate() {
        let vpath = format!("{}.validations[{}]", path, k);
        if v.validation_id.trim().is_empty() {
            report.push(format!("{}.validation_id", vpath), "must not be empty");
        } else if !ids.insert(v.validation_id.as_str()) {
            report.push(
                format!("{}.validation_id", vpath),
                format!("duplicate validation id '{}'", v.validation_id),
            );
        }
        if !v.parameters.is_object() {
            report.push(format!("{}.parameters", vpath), "must be a mapping");
        }
    }
}

/// Fails with `InvalidBatch` listing every problem found.
pub fn validate_batch(batch: &Batch) -> Result<(), EngineError> {
    let report = check_batch(batch);
    if report.is_ok() {
        return Ok(());
    }
    let msg = report
        .issues
        .iter()
        .map(Issue::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    Err(EngineError::InvalidBatch(msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_batch;

    fn batch(yaml: &str) -> Batch {
        parse_batch(yaml, true).unwrap()
    }

    const GOOD: &str = r#"
batch_id: b
tests:
  - test_id: t1
    turns:
      - turn_id: a
        order: 1
        user_input: hi
        validations:
          - validation_id: v1
            validation_type: contains
            parameters: { text: hi }
      - turn_id: b
        order: 5
        user_input: again
        validations:
          - validation_id: v1
            validation_type: not_contains
            parameters: { text: bye }
"#;

    #[test]
    fn well_formed_batch_passes() {
        assert!(validate_batch(&batch(GOOD)).is_ok());
    }

    #[test]
    fn empty_test_set_is_invalid() {
        let err = validate_batch(&batch("batch_id: b\ntests: []\n")).unwrap_err();
        assert!(matches!(err, EngineError::InvalidBatch(m) if m.contains("no tests")));
    }

    #[test]
    fn duplicate_turn_order_is_invalid() {
        let mut b = batch(GOOD);
        b.tests[0].turns[1].order = 1;
        let report = check_batch(&b);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].path, "tests[0].turns[1].order");
    }

    #[test]
    fn reports_every_problem() {
        let mut b = batch(GOOD);
        let dup = b.tests[0].clone();
        b.tests.push(dup);
        b.tests[0].turns[0].validations.clear();
        b.tests[0].turns[1].turn_id = "a".into();
        b.tests[0].config.html_selector = Some("div[".into());

        let paths: Vec<String> = check_batch(&b).issues.into_iter().map(|i| i.path).collect();
        assert!(paths.contains(&"tests[1].test_id".to_string()));
        assert!(paths.contains(&"tests[0].turns[0].validations".to_string()));
        assert!(paths.contains(&"tests[0].turns[1].turn_id".to_string()));
        assert!(paths.contains(&"tests[0].config.html_selector".to_string()));
    }

    #[test]
    fn duplicate_validation_ids_within_a_turn() {
        let mut b = batch(GOOD);
        let v = b.tests[0].turns[0].validations[0].clone();
        b.tests[0].turns[0].validations.push(v);
        let err = validate_batch(&b).unwrap_err().to_string();
        assert!(err.contains("duplicate validation id 'v1'"));
    }
}
