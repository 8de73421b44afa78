//! Corpus discovery: scan transcript files, parse their metadata and pick
//! the records that should enter the pipeline.

pub mod filter;
pub mod index;
pub mod scan;

use distill_core::frontmatter::Document;
use distill_core::{PipelineState, PipelineStatus, RecordMeta};
use distill_store::Layout;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub use filter::{decide, Decision, Filters, RecordView, SkipReason};
pub use index::{ArtifactEntry, ArtifactIndex};
pub use scan::{scan_corpus, video_id_from_file_name, ScanPatterns};

/// A record selected for analysis.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: PathBuf,
    pub doc: Document,
    pub meta: RecordMeta,
}

/// Counters for one discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryStats {
    pub total_scanned: usize,
    pub parsed_success: usize,
    pub parsed_failed: usize,
    pub filtered_by_status: usize,
    pub filtered_by_artifact: usize,
    pub filtered_by_word_count: usize,
    pub filtered_by_channel: usize,
    pub ready_to_process: usize,
}

impl DiscoveryStats {
    fn count_skip(&mut self, reason: &SkipReason) {
        match reason {
            SkipReason::AlreadyProcessed(_) | SkipReason::RequiresReset => {
                self.filtered_by_status += 1
            }
            SkipReason::AlreadyAnalyzed => self.filtered_by_artifact += 1,
            SkipReason::TooSmall { .. } => self.filtered_by_word_count += 1,
            SkipReason::ChannelNotAllowed | SkipReason::ChannelDenied => {
                self.filtered_by_channel += 1
            }
        }
    }
}

/// Outcome of [`discover`].
#[derive(Debug, Default)]
pub struct Discovery {
    pub candidates: Vec<Candidate>,
    pub skipped: Vec<(PathBuf, SkipReason)>,
    /// Files excluded because their metadata could not be used.
    pub invalid: Vec<(PathBuf, String)>,
    pub stats: DiscoveryStats,
}

/// Scan `corpus`, consult the artifacts under `layout` and decide per record.
pub fn discover(
    corpus: &Path,
    patterns: &ScanPatterns,
    filters: &Filters,
    layout: &Layout,
) -> anyhow::Result<Discovery> {
    let index = ArtifactIndex::build(layout);
    let files = scan_corpus(corpus, patterns)?;
    let mut out = Discovery::default();

    for path in files {
        out.stats.total_scanned += 1;
        let (doc, meta) = match load_record(&path) {
            Ok(loaded) => loaded,
            Err(reason) => {
                tracing::warn!(path = %path.display(), %reason, "excluded: unusable metadata");
                out.stats.parsed_failed += 1;
                out.invalid.push((path, reason));
                continue;
            }
        };
        out.stats.parsed_success += 1;

        let view = RecordView {
            status: effective_status(&doc, index.get(&meta.video_id)),
            artifact_exists: index.contains(&meta.video_id),
            channel: &meta.channel,
            word_count: meta.word_count,
        };
        match decide(&view, filters) {
            Decision::Process => {
                out.stats.ready_to_process += 1;
                out.candidates.push(Candidate { path, doc, meta });
            }
            Decision::Skip(reason) => {
                tracing::debug!(video_id = %meta.video_id, %reason, "skipped");
                out.stats.count_skip(&reason);
                out.skipped.push((path, reason));
            }
        }
    }

    tracing::info!(
        scanned = out.stats.total_scanned,
        ready = out.stats.ready_to_process,
        invalid = out.stats.parsed_failed,
        "discovery finished"
    );
    Ok(out)
}

/// Read and validate one corpus file. The error is a human-readable reason.
pub fn load_record(path: &Path) -> Result<(Document, RecordMeta), String> {
    let text = fs::read_to_string(path).map_err(|e| format!("read failed: {e}"))?;
    let doc = Document::parse(&text).map_err(|e| e.to_string())?;
    let fallback = path
        .file_stem()
        .and_then(|s| video_id_from_file_name(&s.to_string_lossy()));
    let meta = RecordMeta::from_document(&doc, fallback.as_deref()).map_err(|e| e.to_string())?;
    Ok((doc, meta))
}

/// The record's own `status` key. A failed artifact marks an unprocessed
/// source as failed so it waits for a reset; pending and uploaded artifacts
/// are left to the artifact rule.
fn effective_status(doc: &Document, artifact: Option<&ArtifactEntry>) -> PipelineStatus {
    let own = PipelineState::from_mapping(&doc.meta)
        .map(|s| s.status)
        .unwrap_or_default();
    let artifact_failed = artifact.is_some_and(|e| e.state.status == PipelineStatus::Failed);
    if own == PipelineStatus::Unprocessed && artifact_failed {
        PipelineStatus::Failed
    } else {
        own
    }
}
