use agentprobe_core::config::load_batch;
use agentprobe_core::validate::{check_batch, ValidateReport};
use serde_json::json;

use super::exit_codes;
use crate::cli::args::ValidateArgs;

pub fn run(args: ValidateArgs) -> anyhow::Result<i32> {
    let batch = match load_batch(&args.batch, args.strict) {
        Ok(b) => b,
        Err(e) => {
            if args.format == "json" {
                println!(
                    "{}",
                    json!({ "ok": false, "errors": [{ "path": "", "message": e.to_string() }] })
                );
            } else {
                eprintln!("❌ {}", e);
            }
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let report = check_batch(&batch);
    print_report(&report, &args.format, &batch.batch_id, batch.tests.len());

    if report.is_ok() {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::CONFIG_ERROR)
    }
}

fn print_report(report: &ValidateReport, format: &str, batch_id: &str, tests: usize) {
    if format == "json" {
        let errors: Vec<_> = report
            .issues
            .iter()
            .map(|i| json!({ "path": i.path, "message": i.message }))
            .collect();
        println!(
            "{}",
            json!({ "ok": report.is_ok(), "batch_id": batch_id, "tests": tests, "errors": errors })
        );
        return;
    }

    if report.is_ok() {
        eprintln!("✅ batch '{}' is valid ({} tests)", batch_id, tests);
        return;
    }
    eprintln!("❌ batch '{}' has {} problem(s):", batch_id, report.issues.len());
    for issue in &report.issues {
        eprintln!("  - {}", issue);
    }
}
