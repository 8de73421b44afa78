use anyhow::Result;
use distill_discovery::discover;
use distill_store::lock_file;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::context::{build_pipeline, ctrlc_cancel, event_logger, runtime};
use crate::report::{check_breaker, print_batch};

/// `distill analyze`: discovery plus the analysis pass only.
pub fn execute(config: &Config, template: Option<String>, channels: &[String]) -> Result<()> {
    let layout = config.layout();
    layout.ensure_dirs()?;
    let _lock = lock_file(&layout.lock_path())?;

    let found = discover(
        &config.paths.corpus,
        &config.scan_patterns()?,
        &config.filters(None, channels),
        &layout,
    )?;
    if found.candidates.is_empty() {
        println!("Nothing to analyze.");
        return Ok(());
    }

    let pipeline = build_pipeline(config, template, false, true)?;
    let (run_id, mut log) = event_logger(config);
    tracing::info!(%run_id, records = found.candidates.len(), "analysis run");

    let cancel = CancellationToken::new();
    ctrlc_cancel(cancel.clone());
    let report = runtime()?.block_on(pipeline.analyze_pass(found.candidates, &mut log, &cancel));

    print_batch("analysis", &report);
    check_breaker(&report)
}
