use distill_core::ErrorKind;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl StoreError {
    /// Timeouts, connection errors, 5xx and 429 are worth retrying.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Timeout | StoreError::Network(_) => ErrorKind::Transient,
            StoreError::Status { status, .. } if *status >= 500 || *status == 429 => {
                ErrorKind::Transient
            }
            StoreError::Status { .. } | StoreError::Decode(_) => ErrorKind::Permanent,
        }
    }

    /// Stable code written into a failed artifact, e.g. `HTTP_400`.
    pub fn code(&self) -> String {
        match self {
            StoreError::Timeout => "TIMEOUT".into(),
            StoreError::Network(_) => "NETWORK".into(),
            StoreError::Status { status, .. } => format!("HTTP_{status}"),
            StoreError::Decode(_) => "DECODE".into(),
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StoreError::Timeout
        } else if e.is_decode() {
            StoreError::Decode(e.to_string())
        } else {
            StoreError::Network(e.to_string())
        }
    }
}
