use distill_core::frontmatter::Document;
use distill_core::{PipelineState, PipelineStatus};
use distill_store::{Area, Layout};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::scan::video_id_from_file_name;

const ARTIFACT_SUFFIX: &str = "_analyzed.md";

/// One downstream artifact found in the intermediate area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactEntry {
    pub video_id: String,
    pub path: PathBuf,
    pub area: Area,
    pub state: PipelineState,
}

/// Content id → artifact, built by scanning the pending and approved areas.
#[derive(Debug, Default)]
pub struct ArtifactIndex {
    entries: HashMap<String, ArtifactEntry>,
}

impl ArtifactIndex {
    pub fn build(layout: &Layout) -> Self {
        let mut index = Self::default();
        // Approved is scanned last so it wins over a stale pending copy.
        for area in [Area::Pending, Area::Approved] {
            for path in artifact_files(&layout.area_dir(area)) {
                index.add(path, area);
            }
        }
        index
    }

    fn add(&mut self, path: PathBuf, area: Area) {
        let parsed = fs::read_to_string(&path)
            .ok()
            .and_then(|text| Document::parse(&text).ok());
        let (id, state) = match parsed {
            Some(doc) => {
                let id = doc.get_str("video_id").map(str::to_string);
                let state = PipelineState::from_mapping(&doc.meta).unwrap_or_default();
                (id, state)
            }
            None => {
                tracing::warn!(path = %path.display(), "unreadable artifact, indexing by file name");
                (None, PipelineState::default())
            }
        };
        let Some(id) = id.or_else(|| file_stem(&path).and_then(|s| video_id_from_file_name(&s)))
        else {
            tracing::warn!(path = %path.display(), "artifact without content id ignored");
            return;
        };

        let mut state = state;
        if state.status == PipelineStatus::Unprocessed {
            state.status = match area {
                Area::Pending => PipelineStatus::Pending,
                Area::Approved => PipelineStatus::Uploaded,
            };
        }
        if let Some(previous) = self.entries.get(&id) {
            tracing::warn!(
                video_id = %id,
                kept = %path.display(),
                dropped = %previous.path.display(),
                "duplicate artifacts for one content id"
            );
        }
        let entry = ArtifactEntry {
            video_id: id.clone(),
            path,
            area,
            state,
        };
        self.entries.insert(id, entry);
    }

    pub fn get(&self, video_id: &str) -> Option<&ArtifactEntry> {
        self.entries.get(video_id)
    }

    pub fn contains(&self, video_id: &str) -> bool {
        self.entries.contains_key(video_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by path.
    pub fn entries(&self) -> Vec<&ArtifactEntry> {
        let mut all: Vec<_> = self.entries.values().collect();
        all.sort_by(|a, b| a.path.cmp(&b.path));
        all
    }

    /// Artifacts currently in `status`, sorted by path.
    pub fn with_status(&self, status: PipelineStatus) -> Vec<&ArtifactEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.state.status == status)
            .collect()
    }

    pub fn count_by_status(&self) -> HashMap<PipelineStatus, usize> {
        let mut counts = HashMap::new();
        for entry in self.entries.values() {
            *counts.entry(entry.state.status).or_insert(0) += 1;
        }
        counts
    }
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().to_string())
}

/// `*_analyzed.md` files under `dir`, sorted.
pub fn artifact_files(dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_string_lossy().ends_with(ARTIFACT_SUFFIX))
        .map(|e| e.into_path())
        .collect()
}
