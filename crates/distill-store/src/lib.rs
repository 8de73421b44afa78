use anyhow::Context;
use distill_core::frontmatter::Document;
use distill_core::RecordMeta;
use fs2::FileExt;
use serde_yaml::Mapping;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Longest slug kept in an artifact file name.
pub const SLUG_MAX_LEN: usize = 50;

/// Lifecycle area inside the intermediate directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Area {
    /// Analyzed artifacts awaiting upload, plus failed ones.
    Pending,
    /// Artifacts whose upload completed.
    Approved,
}

impl Area {
    pub fn dir_name(self) -> &'static str {
        match self {
            Area::Pending => "pending",
            Area::Approved => "approved",
        }
    }
}

/// Directory layout of the intermediate area:
///
/// ```text
/// {root}/pending/{channel}/{YYYY-MM}/{YYYYMMDD}_{id}_{slug}_analyzed.md
/// {root}/approved/...
/// {root}/runs/{run_id}.jsonl
/// {root}/distill.lock
/// ```
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn area_dir(&self, area: Area) -> PathBuf {
        self.root.join(area.dir_name())
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join("distill.lock")
    }

    /// Where the artifact for `meta` lives in `area`.
    pub fn artifact_path(&self, area: Area, meta: &RecordMeta) -> PathBuf {
        let file_name = format!(
            "{}_{}_{}_analyzed.md",
            meta.published_compact(),
            path_component(&meta.video_id),
            slugify(&meta.title, SLUG_MAX_LEN)
        );
        self.area_dir(area)
            .join(path_component(&meta.channel))
            .join(meta.published_month())
            .join(file_name)
    }

    /// Map an artifact path from one area to the same relative path in another.
    pub fn relocate(&self, path: &Path, to: Area) -> anyhow::Result<PathBuf> {
        for from in [Area::Pending, Area::Approved] {
            if let Ok(rel) = path.strip_prefix(self.area_dir(from)) {
                return Ok(self.area_dir(to).join(rel));
            }
        }
        anyhow::bail!("{} is not inside {}", path.display(), self.root.display())
    }

    /// Create the area directories.
    pub fn ensure_dirs(&self) -> anyhow::Result<()> {
        for dir in [
            self.area_dir(Area::Pending),
            self.area_dir(Area::Approved),
            self.runs_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Reduce a title to a file-name-safe slug: word characters, whitespace and
/// hyphens survive, runs of whitespace/hyphens collapse to one `-`.
pub fn slugify(text: &str, max_len: usize) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;
    for c in text.chars() {
        if c.is_whitespace() || c == '-' {
            pending_dash = true;
        } else if c.is_alphanumeric() || c == '_' {
            if pending_dash {
                slug.push('-');
                pending_dash = false;
            }
            slug.push(c);
        }
    }
    if pending_dash {
        slug.push('-');
    }
    let truncated: String = slug.chars().take(max_len).collect();
    truncated.trim_matches('-').to_string()
}

/// A single path segment that cannot climb out of its parent: separators
/// and control characters become `_`, and `.`/`..`/empty become `_`.
pub fn path_component(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if matches!(c, '/' | '\\' | ':') || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Atomic write: write to temp file in same dir, then rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("no parent dir for {}", path.display()))?;
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

/// Move `from` into `to` with a single rename. Replaces an existing target.
pub fn move_atomic(from: &Path, to: &Path) -> anyhow::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(from, to)
        .with_context(|| format!("failed to move {} to {}", from.display(), to.display()))?;
    Ok(())
}

pub fn read_document(path: &Path) -> anyhow::Result<Document> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    Document::parse(&text).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn write_document(path: &Path, doc: &Document) -> anyhow::Result<()> {
    let text = doc.render()?;
    write_atomic(path, text.as_bytes())
}

/// Read-modify-write of a metadata block. The body and keys `edit` leaves
/// alone are written back unchanged.
pub fn update_metadata<F>(path: &Path, edit: F) -> anyhow::Result<Document>
where
    F: FnOnce(&mut Mapping) -> anyhow::Result<()>,
{
    let mut doc = read_document(path)?;
    edit(&mut doc.meta)?;
    write_document(path, &doc)?;
    tracing::debug!(path = %path.display(), "metadata updated");
    Ok(doc)
}

/// File-based exclusive lock guard.
pub struct LockGuard {
    _file: fs::File,
}

/// Acquire an exclusive file lock without waiting. Fails if another run
/// holds it.
pub fn lock_file(path: &Path) -> anyhow::Result<LockGuard> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?;
    file.try_lock_exclusive()
        .with_context(|| format!("another run holds {}", path.display()))?;
    Ok(LockGuard { _file: file })
}
