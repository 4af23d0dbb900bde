pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
  job_id TEXT PRIMARY KEY,
  batch_id TEXT NOT NULL,
  status TEXT NOT NULL,
  submitted_at TEXT NOT NULL,
  started_at TEXT,
  completed_at TEXT,
  total_tests INTEGER NOT NULL,
  completed_tests INTEGER NOT NULL DEFAULT 0,
  failed_tests INTEGER NOT NULL DEFAULT 0,
  skipped_tests INTEGER NOT NULL DEFAULT 0,
  total_validations INTEGER NOT NULL DEFAULT 0,
  passed_validations INTEGER NOT NULL DEFAULT 0,
  failed_validations INTEGER NOT NULL DEFAULT 0,
  pass_rate REAL NOT NULL DEFAULT 0,
  avg_response_time_ms REAL NOT NULL DEFAULT 0,
  cancelled INTEGER NOT NULL DEFAULT 0,
  error_json TEXT
);

CREATE TABLE IF NOT EXISTS test_results (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  job_id TEXT NOT NULL REFERENCES jobs(job_id),
  position INTEGER NOT NULL,
  test_id TEXT NOT NULL,
  status TEXT NOT NULL,
  started_at TEXT NOT NULL,
  completed_at TEXT NOT NULL,
  total_validations INTEGER NOT NULL,
  passed_validations INTEGER NOT NULL,
  failed_validations INTEGER NOT NULL,
  pass_rate REAL NOT NULL,
  avg_response_time_ms REAL NOT NULL,
  error_json TEXT,
  UNIQUE (job_id, test_id)
);

CREATE TABLE IF NOT EXISTS turn_results (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  test_result_id INTEGER NOT NULL REFERENCES test_results(id),
  turn_id TEXT NOT NULL,
  turn_order INTEGER NOT NULL,
  user_input TEXT NOT NULL,
  agent_response TEXT NOT NULL,
  scraped_content TEXT,
  response_time_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS validation_results (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  turn_result_id INTEGER NOT NULL REFERENCES turn_results(id),
  validation_id TEXT NOT NULL,
  validation_type TEXT NOT NULL,
  passed INTEGER NOT NULL,
  score REAL NOT NULL,
  details_json TEXT NOT NULL,
  error_json TEXT
);

CREATE INDEX IF NOT EXISTS idx_test_results_job ON test_results(job_id);
CREATE INDEX IF NOT EXISTS idx_turn_results_test ON turn_results(test_result_id);
CREATE INDEX IF NOT EXISTS idx_validation_results_turn ON validation_results(turn_result_id);
"#;
