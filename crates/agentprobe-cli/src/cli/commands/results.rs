use agentprobe_core::report::console;
use agentprobe_core::storage::Store;

use super::exit_codes;
use crate::cli::args::ResultsArgs;

pub fn run(args: ResultsArgs) -> anyhow::Result<i32> {
    if !args.db.exists() {
        eprintln!("no results database at {}", args.db.display());
        return Ok(exit_codes::CONFIG_ERROR);
    }
    let store = Store::open(&args.db)?;
    store.init_schema()?;

    if args.list {
        let jobs = store.list_jobs(args.limit)?;
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(exit_codes::OK);
    }

    let Some(job_id) = args.job_id.as_deref() else {
        eprintln!("either --job-id or --list is required");
        return Ok(exit_codes::CONFIG_ERROR);
    };

    match store.load_job_result(job_id)? {
        Some(result) => {
            let result = if args.include_scraped_content {
                result
            } else {
                result.without_scraped_content()
            };
            console::print_summary(&result);
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(exit_codes::OK)
        }
        None => {
            eprintln!("job {} not found", job_id);
            Ok(exit_codes::CONFIG_ERROR)
        }
    }
}
