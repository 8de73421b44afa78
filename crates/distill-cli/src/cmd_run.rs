use anyhow::Result;
use distill_discovery::discover;
use distill_store::lock_file;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::context::{build_pipeline, ctrlc_cancel, event_logger, runtime};
use crate::report::print_batch;

pub struct RunParams<'a> {
    pub config: &'a Config,
    pub template: Option<String>,
    pub dry_run: bool,
    pub channels: &'a [String],
}

/// `distill run`: discover, analyze, then upload.
pub fn execute(params: RunParams<'_>) -> Result<()> {
    let config = params.config;
    let layout = config.layout();
    layout.ensure_dirs()?;
    let _lock = lock_file(&layout.lock_path())?;

    let found = discover(
        &config.paths.corpus,
        &config.scan_patterns()?,
        &config.filters(None, params.channels),
        &layout,
    )?;
    println!(
        "Discovered {} records ({} ready, {} invalid)",
        found.stats.total_scanned, found.stats.ready_to_process, found.stats.parsed_failed
    );

    // Analysis only needs the tool when there is something to analyze.
    let check_analyzer = !found.candidates.is_empty();
    let pipeline = build_pipeline(config, params.template, params.dry_run, check_analyzer)?;
    let (run_id, mut log) = event_logger(config);
    tracing::info!(%run_id, "pipeline run");

    let cancel = CancellationToken::new();
    ctrlc_cancel(cancel.clone());
    let report = runtime()?.block_on(pipeline.run(found.candidates, &mut log, &cancel))?;

    print_batch("analysis", &report.analysis);
    if let Some(upload) = &report.upload {
        print_batch(if params.dry_run { "upload (dry run)" } else { "upload" }, upload);
    }
    if report.breaker_tripped() {
        anyhow::bail!("run aborted by the circuit breaker");
    }
    Ok(())
}
