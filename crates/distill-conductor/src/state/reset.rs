//! The only way out of `failed`.

use anyhow::{bail, Context, Result};
use distill_core::{FailedStage, PipelineState, PipelineStatus};
use distill_discovery::ArtifactIndex;
use distill_store::{update_metadata, Layout};
use std::path::PathBuf;

use crate::state::machine::transition;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetOutcome {
    /// Upload failure: the artifact is pending again and will be retried by
    /// the next upload pass.
    Pending(PathBuf),
    /// Analysis failure: the failure artifact was removed, so the record is
    /// unprocessed and discovery will offer it again.
    Removed(PathBuf),
}

/// Reset a failed record by content id.
pub fn reset(layout: &Layout, video_id: &str) -> Result<ResetOutcome> {
    let index = ArtifactIndex::build(layout);
    let Some(entry) = index.get(video_id) else {
        bail!("no artifact for {video_id}");
    };
    if entry.state.status != PipelineStatus::Failed {
        bail!("{video_id} is {}, only failed records can be reset", entry.state.status);
    }

    let stage = match entry.state.failed_stage {
        Some(stage) => stage,
        None => legacy_stage(entry)?,
    };
    match stage {
        FailedStage::Analysis => {
            std::fs::remove_file(&entry.path)
                .with_context(|| format!("failed to remove {}", entry.path.display()))?;
            tracing::info!(video_id, path = %entry.path.display(), "analysis failure cleared");
            Ok(ResetOutcome::Removed(entry.path.clone()))
        }
        FailedStage::Upload => {
            if let Some(orphan) = &entry.state.source_id {
                tracing::warn!(
                    video_id,
                    source_id = %orphan,
                    "previous remote resource is not reused; the next upload creates a new one"
                );
            }
            update_metadata(&entry.path, |meta| {
                let mut state = PipelineState::from_mapping(meta)?;
                transition(
                    &mut state,
                    PipelineStatus::Failed,
                    PipelineStatus::Pending,
                    None,
                )?;
                state.source_id = None;
                state.write_into(meta)?;
                Ok(())
            })?;
            tracing::info!(video_id, "upload failure reset to pending");
            Ok(ResetOutcome::Pending(entry.path.clone()))
        }
    }
}

/// Failures written without `failed_stage`: an artifact that carries an
/// analysis is an upload failure.
fn legacy_stage(entry: &distill_discovery::ArtifactEntry) -> Result<FailedStage> {
    let doc = distill_store::read_document(&entry.path)?;
    Ok(if doc.meta.contains_key("semantic_summary") {
        FailedStage::Upload
    } else {
        FailedStage::Analysis
    })
}
