//! Semantic analysis collaborator.
//!
//! [`Analyzer`] is the narrow seam the pipeline calls. [`CliAnalyzer`]
//! drives a headless LLM command line tool; [`MockAnalyzer`] replays
//! scripted results in tests.

pub mod cli;
pub mod error;
pub mod mock;
pub mod parse;
pub mod prompt;

use distill_core::AnalysisResult;

pub use cli::CliAnalyzer;
pub use error::AnalysisError;
pub use mock::MockAnalyzer;
pub use prompt::{PromptLoader, PromptVars};

/// Characters of transcript text exposed to templates as `{content_preview}`.
pub const PREVIEW_CHARS: usize = 500;

/// What the analyzer sees of one record.
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub video_id: String,
    pub channel: String,
    pub title: String,
    pub word_count: u64,
    /// Transcript text with timestamps removed.
    pub content: String,
}

impl AnalysisInput {
    pub fn content_preview(&self) -> String {
        self.content.chars().take(PREVIEW_CHARS).collect()
    }
}

/// Narrow interface to the external analysis service.
#[async_trait::async_trait]
pub trait Analyzer: Send + Sync {
    /// Analyze one transcript using the named instruction template.
    async fn analyze(
        &self,
        input: &AnalysisInput,
        template: &str,
    ) -> Result<AnalysisResult, AnalysisError>;

    /// `provider/model`, recorded as `analyzed_by`.
    fn provider(&self) -> String;
}
