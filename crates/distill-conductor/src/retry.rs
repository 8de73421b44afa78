//! Bounded retry driven by the error's [`ErrorKind`].

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use distill_core::ErrorKind;
use distill_llm::AnalysisError;
use distill_notebook::StoreError;

/// An external error that knows whether it is worth retrying and how it
/// is recorded.
pub trait Classified: Display {
    fn kind(&self) -> ErrorKind;
    fn code(&self) -> String;
}

impl Classified for AnalysisError {
    fn kind(&self) -> ErrorKind {
        AnalysisError::kind(self)
    }

    fn code(&self) -> String {
        AnalysisError::code(self).to_string()
    }
}

impl Classified for StoreError {
    fn kind(&self) -> ErrorKind {
        StoreError::kind(self)
    }

    fn code(&self) -> String {
        StoreError::code(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    /// Doubles per attempt, never above `cap`.
    Exponential { cap: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub base: Duration,
    pub backoff: Backoff,
}

/// Outcome of [`RetryPolicy::run`]: the last result and how many retries
/// it took to get there.
#[derive(Debug)]
pub struct Retried<T, E> {
    pub result: Result<T, E>,
    pub retries: u32,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base: delay,
            backoff: Backoff::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_attempts,
            base,
            backoff: Backoff::Exponential { cap },
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.base,
            Backoff::Exponential { cap } => self
                .base
                .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
                .min(cap),
        }
    }

    /// Call `op` until it succeeds, fails permanently or runs out of attempts.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Retried<T, E>
    where
        E: Classified,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max = self.max_attempts.max(1);
        let mut retries = 0;
        loop {
            match op().await {
                Ok(value) => {
                    return Retried {
                        result: Ok(value),
                        retries,
                    }
                }
                Err(e) if e.kind().is_retryable() && retries + 1 < max => {
                    retries += 1;
                    let delay = self.delay(retries);
                    tracing::warn!(
                        op = label,
                        error = %e,
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Retried {
                        result: Err(e),
                        retries,
                    }
                }
            }
        }
    }
}
