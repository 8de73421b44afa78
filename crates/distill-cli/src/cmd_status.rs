use anyhow::Result;
use distill_core::PipelineStatus;
use distill_discovery::ArtifactIndex;

use crate::config::Config;

/// `distill status`: record counts per lifecycle state, plus the failures.
pub fn execute(config: &Config, json: bool) -> Result<()> {
    let index = ArtifactIndex::build(&config.layout());
    let counts = index.count_by_status();
    let count = |s: PipelineStatus| counts.get(&s).copied().unwrap_or(0);
    let failed = index.with_status(PipelineStatus::Failed);

    if json {
        let failures: Vec<_> = failed
            .iter()
            .map(|e| {
                serde_json::json!({
                    "video_id": e.video_id,
                    "stage": e.state.failed_stage,
                    "error_code": e.state.error_code,
                    "error": e.state.error,
                    "failed_at": e.state.failed_at,
                })
            })
            .collect();
        let out = serde_json::json!({
            "pending": count(PipelineStatus::Pending),
            "uploaded": count(PipelineStatus::Uploaded),
            "failed": count(PipelineStatus::Failed),
            "failures": failures,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Intermediate: {}", config.paths.intermediate.display());
    for status in [
        PipelineStatus::Pending,
        PipelineStatus::Uploaded,
        PipelineStatus::Failed,
    ] {
        println!("  {:<9} {}", status.as_str(), count(status));
    }
    if !failed.is_empty() {
        println!("\nFailed (use `distill reset <id>`):");
        for e in failed {
            let stage = match e.state.failed_stage {
                Some(distill_core::FailedStage::Analysis) => "analysis",
                Some(distill_core::FailedStage::Upload) => "upload",
                None => "?",
            };
            println!(
                "  {}  [{stage}] {} {}",
                e.video_id,
                e.state.error_code.as_deref().unwrap_or("-"),
                e.state.error.as_deref().unwrap_or("")
            );
        }
    }
    Ok(())
}
