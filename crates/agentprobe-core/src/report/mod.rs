pub mod console;
pub mod junit;

use crate::model::JobResult;
use std::path::Path;

pub fn write_json(result: &JobResult, out: &Path) -> anyhow::Result<()> {
    let body = serde_json::to_string_pretty(result)?;
    std::fs::write(out, body)?;
    Ok(())
}
