use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::WalkDir;

/// Include/exclude globs, matched against paths relative to the corpus root.
#[derive(Debug, Clone)]
pub struct ScanPatterns {
    include: GlobSet,
    exclude: GlobSet,
}

impl ScanPatterns {
    pub fn new(include: &[String], exclude: &[String]) -> anyhow::Result<Self> {
        Ok(Self {
            include: build_set(include)?,
            exclude: build_set(exclude)?,
        })
    }

    pub fn matches(&self, rel: &Path) -> bool {
        self.include.is_match(rel) && !self.exclude.is_match(rel)
    }
}

impl Default for ScanPatterns {
    fn default() -> Self {
        Self {
            include: build_set(&["**/*.md".to_string()]).unwrap_or_else(|_| GlobSet::empty()),
            exclude: GlobSet::empty(),
        }
    }
}

fn build_set(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for p in patterns {
        builder.add(Glob::new(p).map_err(|e| anyhow::anyhow!("invalid glob {p:?}: {e}"))?);
    }
    Ok(builder.build()?)
}

/// Files under `root` accepted by `patterns`, sorted by path.
pub fn scan_corpus(root: &Path, patterns: &ScanPatterns) -> anyhow::Result<Vec<PathBuf>> {
    if !root.is_dir() {
        anyhow::bail!("corpus directory not found: {}", root.display());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable corpus entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if patterns.matches(rel) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn id_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"^\d{4}-\d{2}-\d{2}_([A-Za-z0-9_-]{11})_",
            r"^\d{8}_([A-Za-z0-9_-]{11})_",
            r"_([A-Za-z0-9_-]{11})_",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Recover an 11-character content id from a `{date}_{id}_{slug}` file stem.
pub fn video_id_from_file_name(stem: &str) -> Option<String> {
    id_patterns()
        .iter()
        .find_map(|re| re.captures(stem))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
