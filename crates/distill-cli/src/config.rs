//! `config/distill.yaml`: defaults < file < environment < command line.

use anyhow::{bail, Context, Result};
use distill_conductor::runner::batch::BatchOptions;
use distill_conductor::{
    ChannelRule, InsightSettings, PipelineSettings, RetryPolicy, Routing, Topic,
};
use distill_discovery::{Filters, ScanPatterns};
use distill_segment::ProjectionConfig;
use distill_store::Layout;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/distill.yaml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub discovery: DiscoveryConfig,
    pub analysis: AnalysisConfig,
    pub segmentation: ProjectionConfig,
    pub notebook: NotebookConfig,
    pub batch: BatchConfig,
    pub topics: BTreeMap<String, Topic>,
    pub channels: BTreeMap<String, ChannelRule>,
}

/// Relative paths are resolved against the config file's directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub corpus: PathBuf,
    pub intermediate: PathBuf,
    pub prompts: PathBuf,
    /// Working directory of the analysis tool.
    pub project_dir: PathBuf,
    /// Save every prompt/response exchange here when set.
    pub conversations: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            corpus: PathBuf::from("transcripts"),
            intermediate: PathBuf::from("intermediate"),
            prompts: PathBuf::from("prompts"),
            project_dir: PathBuf::from("."),
            conversations: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub min_word_count: u64,
    pub channel_allow: Vec<String>,
    pub channel_deny: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            include: vec!["**/*.md".into()],
            exclude: Vec::new(),
            min_word_count: 100,
            channel_allow: Vec::new(),
            channel_deny: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Recorded in `analyzed_by`; pass the real flag through `args`.
    pub model: String,
    pub default_template: String,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_base_secs: u64,
    pub retry_cap_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            command: "gemini".into(),
            args: Vec::new(),
            model: "default".into(),
            default_template: "default".into(),
            timeout_secs: 300,
            retry_attempts: 3,
            retry_base_secs: 3,
            retry_cap_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotebookConfig {
    pub base_url: String,
    pub password: Option<String>,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_delay_secs: u64,
    pub default_notebook: String,
    pub unclassified_notebook: String,
    /// Request insights for each uploaded resource.
    pub auto_insights: bool,
    /// Transformation ids for insights; empty picks the store's preferred one.
    pub insight_transformations: Vec<String>,
}

impl Default for NotebookConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5055".into(),
            password: None,
            timeout_secs: 60,
            retry_attempts: 3,
            retry_delay_secs: 5,
            default_notebook: "Inbox".into(),
            unclassified_notebook: "Unclassified".into(),
            auto_insights: true,
            insight_transformations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_concurrent: usize,
    /// Consecutive failed records that abort a pass; 0 disables.
    pub breaker_threshold: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            breaker_threshold: 5,
        }
    }
}

impl Config {
    /// Load from `path`, or from `config/distill.yaml` when it exists, or
    /// fall back to defaults. Environment overrides are applied and the
    /// result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        let (mut config, base) = match path {
            Some(p) => (Self::from_file(p)?, parent_dir(p)),
            None if default_path.exists() => {
                (Self::from_file(default_path)?, parent_dir(default_path))
            }
            None => {
                tracing::debug!("no config file, using defaults");
                (Self::default(), PathBuf::from("."))
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.resolve_paths(&base);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(password) = get("DISTILL_NOTEBOOK_PASSWORD") {
            self.notebook.password = Some(password);
        }
        if let Some(corpus) = get("DISTILL_CORPUS_PATH") {
            self.paths.corpus = PathBuf::from(corpus);
        }
        if let Some(intermediate) = get("DISTILL_INTERMEDIATE_PATH") {
            self.paths.intermediate = PathBuf::from(intermediate);
        }
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.paths.corpus);
        resolve(&mut self.paths.intermediate);
        resolve(&mut self.paths.prompts);
        resolve(&mut self.paths.project_dir);
        if let Some(dir) = self.paths.conversations.as_mut() {
            resolve(dir);
        }
    }

    /// Collect every problem, then fail once with all of them.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        let threshold = self.segmentation.fuzzy_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            problems.push(format!(
                "segmentation.fuzzy_threshold must be in (0, 1], got {threshold}"
            ));
        }
        if self.batch.max_concurrent == 0 {
            problems.push("batch.max_concurrent must be at least 1".into());
        }
        if self.analysis.retry_attempts == 0 || self.notebook.retry_attempts == 0 {
            problems.push("retry_attempts must be at least 1".into());
        }
        if self.analysis.timeout_secs == 0 || self.notebook.timeout_secs == 0 {
            problems.push("timeout_secs must be positive".into());
        }
        if self.analysis.command.trim().is_empty() {
            problems.push("analysis.command is empty".into());
        }
        let url = self.notebook.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            problems.push(format!("notebook.base_url is not an http(s) URL: `{url}`"));
        }
        if let Err(e) = self.scan_patterns() {
            problems.push(format!("discovery patterns: {e:#}"));
        }
        problems.extend(self.routing().validate());

        if !problems.is_empty() {
            bail!("invalid configuration:\n  - {}", problems.join("\n  - "));
        }
        Ok(())
    }

    pub fn layout(&self) -> Layout {
        Layout::new(&self.paths.intermediate)
    }

    pub fn scan_patterns(&self) -> Result<ScanPatterns> {
        ScanPatterns::new(&self.discovery.include, &self.discovery.exclude)
    }

    /// Filters with optional command-line overrides.
    pub fn filters(&self, min_words: Option<u64>, channels: &[String]) -> Filters {
        Filters {
            min_word_count: min_words.unwrap_or(self.discovery.min_word_count),
            channel_allow: if channels.is_empty() {
                self.discovery.channel_allow.clone()
            } else {
                channels.to_vec()
            },
            channel_deny: self.discovery.channel_deny.clone(),
        }
    }

    pub fn routing(&self) -> Routing {
        Routing {
            topics: self.topics.clone(),
            channels: self.channels.clone(),
            default_notebook: self.notebook.default_notebook.clone(),
            unclassified_notebook: self.notebook.unclassified_notebook.clone(),
            default_template: self.analysis.default_template.clone(),
        }
    }

    pub fn pipeline_settings(&self, template: Option<String>, dry_run: bool) -> PipelineSettings {
        PipelineSettings {
            projection: self.segmentation.clone(),
            analysis_retry: RetryPolicy::exponential(
                self.analysis.retry_attempts,
                Duration::from_secs(self.analysis.retry_base_secs),
                Duration::from_secs(self.analysis.retry_cap_secs),
            ),
            upload_retry: RetryPolicy::fixed(
                self.notebook.retry_attempts,
                Duration::from_secs(self.notebook.retry_delay_secs),
            ),
            batch: BatchOptions {
                max_concurrent: self.batch.max_concurrent,
                breaker_threshold: self.batch.breaker_threshold,
            },
            template_override: template,
            dry_run,
            insights: InsightSettings {
                enabled: self.notebook.auto_insights,
                transformations: self.notebook.insight_transformations.clone(),
            },
        }
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
