use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use tempfile::TempDir;

const PASSING_BATCH: &str = r#"
batch_id: smoke
tests:
  - test_id: echo_check
    turns:
      - turn_id: hello
        order: 1
        user_input: hello
        validations:
          - validation_id: echoed
            validation_type: contains
            parameters: { text: "echo: hello" }
          - validation_id: prefix
            validation_type: regex
            parameters: { pattern: "^echo" }
          - validation_id: no_errors
            validation_type: not_contains
            parameters: { text: error }
"#;

fn agentprobe() -> Command {
    let mut cmd = Command::cargo_bin("agentprobe").unwrap();
    cmd.env_remove("AGENTPROBE_DB")
        .env_remove("AGENTPROBE_MAX_CONCURRENT_TESTS")
        .env_remove("AGENTPROBE_TIMEOUT_SECONDS")
        .env("AGENTPROBE_LOG", "warn");
    cmd
}

#[test]
fn init_then_validate_sample() {
    let dir = TempDir::new().unwrap();
    let batch = dir.path().join("batch.yaml");

    agentprobe()
        .arg("init")
        .arg("--out")
        .arg(&batch)
        .assert()
        .success();
    assert!(batch.exists());

    agentprobe()
        .arg("init")
        .arg("--out")
        .arg(&batch)
        .assert()
        .code(2)
        .stderr(contains("already exists"));

    agentprobe()
        .arg("validate")
        .arg("--batch")
        .arg(&batch)
        .arg("--strict")
        .assert()
        .success()
        .stderr(contains("batch 'demo' is valid (1 tests)"));
}

#[test]
fn validate_reports_every_problem() {
    let dir = TempDir::new().unwrap();
    let batch = dir.path().join("bad.yaml");
    fs::write(
        &batch,
        r#"
batch_id: bad
tests:
  - test_id: t
    turns:
      - { turn_id: a, order: 1, user_input: hi, validations: [] }
      - turn_id: b
        order: 1
        user_input: again
        validations:
          - { validation_id: v, validation_type: contains, parameters: { text: x } }
"#,
    )
    .unwrap();

    let out = agentprobe()
        .arg("validate")
        .arg("--batch")
        .arg(&batch)
        .arg("--format")
        .arg("json")
        .assert()
        .code(2)
        .get_output()
        .stdout
        .clone();
    let report: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(report["ok"], false);
    assert!(report["errors"].as_array().unwrap().len() >= 2);
}

#[test]
fn dry_run_writes_results_and_persists() {
    let dir = TempDir::new().unwrap();
    let batch = dir.path().join("batch.yaml");
    let out = dir.path().join("out/results.json");
    let junit = dir.path().join("junit.xml");
    let db = dir.path().join("agentprobe.db");
    fs::write(&batch, PASSING_BATCH).unwrap();

    agentprobe()
        .arg("run")
        .arg("--batch")
        .arg(&batch)
        .arg("--dry-run")
        .arg("--out")
        .arg(&out)
        .arg("--junit")
        .arg(&junit)
        .arg("--db")
        .arg(&db)
        .assert()
        .success()
        .stderr(contains("Validations: 3 passed, 0 failed (100.0% pass rate)"));

    let result: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(result["status"], "completed");
    assert_eq!(result["completed_tests"], 1);
    assert!(fs::read_to_string(&junit)
        .unwrap()
        .contains(r#"<testcase name="echo_check""#));

    let job_id = result["job_id"].as_str().unwrap().to_string();
    agentprobe()
        .arg("results")
        .arg("--db")
        .arg(&db)
        .arg("--list")
        .assert()
        .success()
        .stdout(contains(job_id.as_str()));

    agentprobe()
        .arg("results")
        .arg("--db")
        .arg(&db)
        .arg("--job-id")
        .arg(&job_id)
        .assert()
        .success()
        .stdout(contains("echo_check"));
}

#[test]
fn failed_validations_exit_one() {
    let dir = TempDir::new().unwrap();
    let batch = dir.path().join("batch.yaml");
    let out = dir.path().join("results.json");

    agentprobe()
        .arg("init")
        .arg("--out")
        .arg(&batch)
        .assert()
        .success();

    // The echo agent never links docs, so the regex check fails.
    agentprobe()
        .arg("run")
        .arg("--batch")
        .arg(&batch)
        .arg("--dry-run")
        .arg("--out")
        .arg(&out)
        .assert()
        .code(1)
        .stderr(contains("links_docs [regex]"));
}

#[test]
fn missing_batch_is_config_error() {
    let dir = TempDir::new().unwrap();
    agentprobe()
        .arg("run")
        .arg("--batch")
        .arg(dir.path().join("nope.yaml"))
        .arg("--dry-run")
        .assert()
        .code(2)
        .stderr(contains("config error"));
}

#[test]
fn version_prints_package_version() {
    agentprobe()
        .arg("version")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn log_level_comes_from_the_environment() {
    let dir = TempDir::new().unwrap();
    let batch = dir.path().join("batch.yaml");
    fs::write(&batch, PASSING_BATCH).unwrap();

    let run = |level: &str| {
        let out = agentprobe()
            .env("AGENTPROBE_LOG", level)
            .arg("run")
            .arg("--batch")
            .arg(&batch)
            .arg("--dry-run")
            .arg("--out")
            .arg(dir.path().join("results.json"))
            .assert()
            .success()
            .get_output()
            .stderr
            .clone();
        String::from_utf8(out).unwrap()
    };

    assert!(run("info").contains("agentprobe.run.start"));
    assert!(!run("error").contains("agentprobe.run.start"));
}
