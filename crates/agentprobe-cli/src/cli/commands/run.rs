use agentprobe_core::config::{load_batch, EngineConfig};
use agentprobe_core::engine::{Scheduler, TurnExecutor};
use agentprobe_core::model::{JobResult, JobStatusSnapshot, ResultOptions};
use agentprobe_core::providers::agent::{AgentClient, FakeAgentClient, HttpAgentClient};
use agentprobe_core::providers::scrape::{HttpScraper, Scraper, StaticScraper};
use agentprobe_core::report::{console, junit, write_json};
use agentprobe_core::storage::{ResultSink, Store};
use agentprobe_core::validate::check_batch;
use agentprobe_validators::default_registry;
use std::sync::Arc;
use std::time::Duration;

use super::{ensure_parent_dir, exit_codes};
use crate::cli::args::RunArgs;

pub async fn run(args: RunArgs) -> anyhow::Result<i32> {
    let batch = match load_batch(&args.batch, args.strict) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("config error: {}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let report = check_batch(&batch);
    if !report.is_ok() {
        eprintln!("config error: batch '{}' is invalid:", batch.batch_id);
        for issue in &report.issues {
            eprintln!("  - {}", issue);
        }
        return Ok(exit_codes::CONFIG_ERROR);
    }

    // flags > batch settings > environment
    let mut cfg = EngineConfig::from_env().with_batch_settings(&batch);
    if let Some(n) = args.max_concurrent_tests {
        cfg.max_concurrent_tests = n.max(1);
    }
    if let Some(t) = args.timeout_seconds.filter(|t| *t > 0) {
        cfg.default_timeout_seconds = t;
    }

    let sink: Option<Arc<dyn ResultSink>> = match &args.db {
        Some(path) => {
            ensure_parent_dir(path)?;
            let store = Store::open(path)?;
            store.init_schema()?;
            Some(Arc::new(store))
        }
        None => None,
    };

    let agent: Arc<dyn AgentClient> = if args.dry_run {
        Arc::new(FakeAgentClient::new())
    } else {
        Arc::new(HttpAgentClient::new())
    };
    let scraper: Arc<dyn Scraper> = if args.dry_run {
        Arc::new(StaticScraper::new())
    } else {
        Arc::new(HttpScraper::new())
    };

    tracing::info!(
        event = "agentprobe.run.start",
        batch_id = %batch.batch_id,
        tests = batch.tests.len(),
        max_concurrent_tests = cfg.max_concurrent_tests,
        timeout_seconds = cfg.default_timeout_seconds,
        agent = agent.provider_name(),
        dry_run = args.dry_run,
    );

    let exec = TurnExecutor::new(agent, scraper, Arc::new(default_registry()));
    let scheduler = Scheduler::new(&cfg, exec, sink);
    let job_id = scheduler.submit(batch)?;

    let options = ResultOptions {
        include_scraped_content: args.include_scraped_content,
    };
    let result = await_job(&scheduler, &job_id, options, args.progress_interval).await?;
    scheduler.shutdown();

    ensure_parent_dir(&args.out)?;
    write_json(&result, &args.out)?;
    if let Some(path) = &args.junit {
        ensure_parent_dir(path)?;
        junit::write_junit(&result, path)?;
    }
    console::print_summary(&result);

    Ok(decide_exit_code(&result))
}

/// Waits for the job, logging progress and cancelling on Ctrl-C.
async fn await_job(
    scheduler: &Scheduler,
    job_id: &str,
    options: ResultOptions,
    progress_interval: u64,
) -> anyhow::Result<JobResult> {
    let wait = scheduler.wait(job_id, options);
    tokio::pin!(wait);

    let mut ticker = tokio::time::interval(Duration::from_secs(progress_interval.max(1)));
    ticker.tick().await;
    let mut interrupted = false;

    loop {
        tokio::select! {
            res = &mut wait => return Ok(res?),
            _ = ticker.tick() => {
                if let Ok(snap) = scheduler.status(job_id) {
                    log_progress(&snap);
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                tracing::warn!(event = "agentprobe.run.interrupted", job_id, "cancelling job");
                scheduler.cancel(job_id)?;
            }
        }
    }
}

fn log_progress(snap: &JobStatusSnapshot) {
    tracing::info!(
        event = "agentprobe.job.progress",
        job_id = %snap.job_id,
        status = %snap.status,
        progress = snap.progress,
        completed = snap.completed_tests,
        failed = snap.failed_tests,
        running = snap.running_tests,
        total = snap.total_tests,
        current_test = snap.current_test_id.as_deref().unwrap_or("-"),
        current_turn = snap.current_turn.unwrap_or_default(),
    );
}

fn decide_exit_code(result: &JobResult) -> i32 {
    if result.all_passed() && !result.cancelled {
        exit_codes::OK
    } else {
        exit_codes::TEST_FAILED
    }
}
