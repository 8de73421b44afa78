use distill_core::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analysis timed out after {0}s")]
    Timeout(u64),

    #[error("analysis rate limited: {0}")]
    RateLimited(String),

    #[error("analysis command failed (exit {code:?}): {stderr}")]
    Call { code: Option<i32>, stderr: String },

    #[error("unparsable analysis output: {0}")]
    Parse(String),

    #[error("prompt template not found: {0}")]
    TemplateNotFound(PathBuf),

    #[error("analysis I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalysisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::Timeout(_) | AnalysisError::RateLimited(_) => ErrorKind::Transient,
            AnalysisError::Call { .. }
            | AnalysisError::Parse(_)
            | AnalysisError::TemplateNotFound(_)
            | AnalysisError::Io(_) => ErrorKind::Permanent,
        }
    }

    /// Stable code written into a failed artifact.
    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::Timeout(_) => "LLM_TIMEOUT",
            AnalysisError::RateLimited(_) => "LLM_RATE_LIMIT",
            AnalysisError::Call { .. } => "LLM_CALL",
            AnalysisError::Parse(_) => "LLM_PARSE",
            AnalysisError::TemplateNotFound(_) => "PROMPT_NOT_FOUND",
            AnalysisError::Io(_) => "LLM_IO",
        }
    }
}
