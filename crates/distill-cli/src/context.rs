use anyhow::Result;
use distill_conductor::{EventLogger, Pipeline, StdoutNotifier};
use distill_llm::{CliAnalyzer, PromptLoader};
use distill_notebook::OpenNotebookClient;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// Build the pipeline with the real collaborators.
///
/// `check_analyzer` verifies the analysis command is installed and clears
/// stale hand-over files; passes that never analyze skip it.
pub fn build_pipeline(
    config: &Config,
    template: Option<String>,
    dry_run: bool,
    check_analyzer: bool,
) -> Result<Arc<Pipeline>> {
    let analyzer = CliAnalyzer::new(
        &config.analysis.command,
        &config.paths.project_dir,
        PromptLoader::new(&config.paths.prompts),
    )
    .with_args(config.analysis.args.clone())
    .with_model(&config.analysis.model)
    .with_timeout(Duration::from_secs(config.analysis.timeout_secs))
    .with_conversation_dir(config.paths.conversations.clone());
    if check_analyzer {
        analyzer.verify_available()?;
        analyzer.cleanup_stale_temp();
    }

    let store = OpenNotebookClient::new(
        &config.notebook.base_url,
        config.notebook.password.clone(),
        Duration::from_secs(config.notebook.timeout_secs),
    )?;

    let layout = config.layout();
    layout.ensure_dirs()?;
    Ok(Pipeline::new(
        Arc::new(analyzer),
        Arc::new(store),
        Arc::new(StdoutNotifier),
        layout,
        config.routing(),
        config.pipeline_settings(template, dry_run),
    ))
}

/// A fresh run id and its event log under `runs/`.
pub fn event_logger(config: &Config) -> (String, EventLogger) {
    let run_id = ulid::Ulid::new().to_string();
    let logger = EventLogger::new(&config.layout().runs_dir(), &run_id);
    (run_id, logger)
}

pub fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Runtime::new()?)
}

/// Cancel `cancel` on Ctrl+C. In-flight records finish; no new ones start.
/// Returns false, with a warning, when the handler could not be installed.
pub fn ctrlc_cancel(cancel: CancellationToken) -> bool {
    let installed = ctrlc::set_handler(move || {
        eprintln!("Interrupted: finishing in-flight records, starting no new ones.");
        cancel.cancel();
    });
    match installed {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Ctrl+C handler not installed, run cannot be interrupted");
            false
        }
    }
}
