use anyhow::Result;
use distill_conductor::{reset, ResetOutcome};
use distill_store::lock_file;

use crate::config::Config;

/// `distill reset <id>`: release a failed record for another attempt.
pub fn execute(config: &Config, video_id: &str) -> Result<()> {
    let layout = config.layout();
    let _lock = lock_file(&layout.lock_path())?;
    match reset(&layout, video_id)? {
        ResetOutcome::Pending(path) => {
            println!("{video_id}: back to pending, next upload retries it ({})", path.display())
        }
        ResetOutcome::Removed(path) => println!(
            "{video_id}: failure artifact removed, next run re-analyzes it ({})",
            path.display()
        ),
    }
    Ok(())
}
