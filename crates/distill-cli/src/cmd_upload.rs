use anyhow::Result;
use distill_store::lock_file;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::context::{build_pipeline, ctrlc_cancel, event_logger, runtime};
use crate::report::{check_breaker, print_batch};

/// `distill upload`: push every pending artifact to the knowledge store.
pub fn execute(config: &Config, dry_run: bool) -> Result<()> {
    let layout = config.layout();
    layout.ensure_dirs()?;
    let _lock = lock_file(&layout.lock_path())?;

    let pipeline = build_pipeline(config, None, dry_run, false)?;
    let (run_id, mut log) = event_logger(config);
    tracing::info!(%run_id, dry_run, "upload run");

    let cancel = CancellationToken::new();
    ctrlc_cancel(cancel.clone());
    let report = runtime()?.block_on(pipeline.upload_pass(&mut log, &cancel))?;

    print_batch(if dry_run { "upload (dry run)" } else { "upload" }, &report);
    check_breaker(&report)
}
