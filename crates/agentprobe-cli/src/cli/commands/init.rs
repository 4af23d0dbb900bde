use agentprobe_core::config::write_sample_batch;

use super::{ensure_parent_dir, exit_codes};
use crate::cli::args::InitArgs;

pub fn run(args: InitArgs) -> anyhow::Result<i32> {
    if args.out.exists() && !args.force {
        eprintln!(
            "{} already exists; pass --force to overwrite",
            args.out.display()
        );
        return Ok(exit_codes::CONFIG_ERROR);
    }
    ensure_parent_dir(&args.out)?;
    write_sample_batch(&args.out)?;
    eprintln!("wrote sample batch to {}", args.out.display());
    Ok(exit_codes::OK)
}
