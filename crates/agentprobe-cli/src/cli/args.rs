use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "agentprobe",
    version,
    about = "Batch runner for multi-turn conversational agent tests"
)]
pub struct Cli {
    /// Log output format on stderr
    #[arg(long, value_enum, global = true, default_value = "text", env = "AGENTPROBE_LOG_FORMAT")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Execute a batch and report results
    Run(RunArgs),
    /// Check a batch file without running it
    Validate(ValidateArgs),
    /// Write a sample batch file
    Init(InitArgs),
    /// Read persisted results
    Results(ResultsArgs),
    Version,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long, default_value = "batch.yaml")]
    pub batch: PathBuf,

    /// SQLite file for write-through results
    #[arg(long, env = "AGENTPROBE_DB")]
    pub db: Option<PathBuf>,

    #[arg(long)]
    pub max_concurrent_tests: Option<usize>,

    /// Default per-turn timeout for tests without their own
    #[arg(long)]
    pub timeout_seconds: Option<u64>,

    /// JSON results output
    #[arg(long, default_value = "results.json")]
    pub out: PathBuf,

    /// Also write a JUnit XML report
    #[arg(long)]
    pub junit: Option<PathBuf>,

    #[arg(long)]
    pub include_scraped_content: bool,

    /// Use a scripted echo agent and no network access
    #[arg(long)]
    pub dry_run: bool,

    /// Reject unknown keys in the batch file
    #[arg(long)]
    pub strict: bool,

    /// Seconds between progress log lines
    #[arg(long, default_value_t = 2)]
    pub progress_interval: u64,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ValidateArgs {
    #[arg(long, default_value = "batch.yaml")]
    pub batch: PathBuf,

    #[arg(long)]
    pub strict: bool,

    #[arg(long, default_value = "text")]
    pub format: String, // text|json
}

#[derive(clap::Args, Debug, Clone)]
pub struct InitArgs {
    #[arg(long, default_value = "batch.yaml")]
    pub out: PathBuf,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ResultsArgs {
    #[arg(long, env = "AGENTPROBE_DB", default_value = "agentprobe.db")]
    pub db: PathBuf,

    #[arg(long, conflicts_with = "list", required_unless_present = "list")]
    pub job_id: Option<String>,

    /// List recent jobs instead of printing one
    #[arg(long)]
    pub list: bool,

    #[arg(long, default_value_t = 20)]
    pub limit: u32,

    #[arg(long)]
    pub include_scraped_content: bool,
}
