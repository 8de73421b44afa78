//! Bounded-concurrency batch loop shared by the analysis and upload passes.
//!
//! Each record is its own bulkhead: a failure is written into that record's
//! state and the loop moves on. Only the circuit breaker or cancellation
//! stops a pass early, and both only stop new records from starting.

use std::future::Future;
use std::time::{Duration, Instant};

use distill_core::FailedStage;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::runner::event_log::{Event, EventLogger};

/// What happened to one record in a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Analyzed {
        segments_placed: usize,
        segments_dropped: usize,
        retries: u32,
    },
    Uploaded {
        source_id: String,
        notebook: String,
        retries: u32,
    },
    DryRun {
        notebook: String,
    },
    Failed {
        stage: FailedStage,
        code: String,
        error: String,
    },
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct RecordReport {
    pub video_id: String,
    pub outcome: Outcome,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    CircuitBreaker { consecutive_failures: usize },
    Cancelled,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::CircuitBreaker {
                consecutive_failures,
            } => write!(f, "circuit breaker: {consecutive_failures} consecutive failures"),
            AbortReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    /// Finished records in completion order.
    pub records: Vec<RecordReport>,
    pub aborted: Option<AbortReason>,
    pub not_started: usize,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.records.len() - self.failed()
    }

    pub fn failed(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_failure()).count()
    }

    pub fn breaker_tripped(&self) -> bool {
        matches!(self.aborted, Some(AbortReason::CircuitBreaker { .. }))
    }

    pub fn get(&self, video_id: &str) -> Option<&RecordReport> {
        self.records.iter().find(|r| r.video_id == video_id)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// 1 = sequential.
    pub max_concurrent: usize,
    /// Consecutive failed records that abort the pass; 0 disables.
    pub breaker_threshold: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            breaker_threshold: 5,
        }
    }
}

pub(crate) fn stage_name(stage: FailedStage) -> &'static str {
    match stage {
        FailedStage::Analysis => "analysis",
        FailedStage::Upload => "upload",
    }
}

/// Run `work` over `items` (`(content id, item)` pairs) with at most
/// `max_concurrent` records in flight.
pub async fn run_batch<T, F, Fut>(
    stage: FailedStage,
    items: Vec<(String, T)>,
    opts: BatchOptions,
    cancel: &CancellationToken,
    log: &mut EventLogger,
    mut work: F,
) -> BatchReport
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = anyhow::Result<Outcome>> + Send + 'static,
{
    let stage_label = stage_name(stage);
    let limit = opts.max_concurrent.max(1);
    let mut queue = items.into_iter();
    let mut set = JoinSet::new();
    let mut report = BatchReport::default();
    let mut consecutive = 0usize;

    loop {
        while report.aborted.is_none() && set.len() < limit {
            if cancel.is_cancelled() {
                tracing::info!(stage = stage_label, "cancelled, no new records started");
                report.aborted = Some(AbortReason::Cancelled);
                break;
            }
            let Some((video_id, item)) = queue.next() else {
                break;
            };
            log.record(Event::RecordStart {
                video_id: video_id.clone(),
                stage: stage_label.into(),
            });
            let fut = work(item);
            set.spawn(async move {
                let started = Instant::now();
                let result = fut.await;
                (video_id, started.elapsed(), result)
            });
        }

        let Some(joined) = set.join_next().await else {
            break;
        };
        let (video_id, duration, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                tracing::error!(stage = stage_label, error = %e, "record task panicked");
                (
                    "<unknown>".to_string(),
                    Duration::ZERO,
                    Err(anyhow::anyhow!("record task panicked: {e}")),
                )
            }
        };
        let outcome = result.unwrap_or_else(|e| {
            tracing::error!(%video_id, error = %format!("{e:#}"), "record aborted by local error");
            Outcome::Failed {
                stage,
                code: "LOCAL_IO".into(),
                error: format!("{e:#}"),
            }
        });

        record_outcome(log, &video_id, &outcome, duration);
        if outcome.is_failure() {
            consecutive += 1;
        } else {
            consecutive = 0;
        }
        report.records.push(RecordReport {
            video_id,
            outcome,
            duration,
        });

        if opts.breaker_threshold > 0
            && consecutive >= opts.breaker_threshold
            && report.aborted.is_none()
        {
            tracing::error!(
                stage = stage_label,
                consecutive,
                "circuit breaker tripped, no new records started"
            );
            report.aborted = Some(AbortReason::CircuitBreaker {
                consecutive_failures: consecutive,
            });
        }
    }

    report.not_started = queue.count();
    match &report.aborted {
        Some(reason) => log.record(Event::RunAborted {
            stage: stage_label.into(),
            reason: reason.to_string(),
            not_started: report.not_started,
        }),
        None => log.record(Event::RunCompleted {
            stage: stage_label.into(),
            succeeded: report.succeeded(),
            failed: report.failed(),
        }),
    }
    report
}

fn record_outcome(log: &mut EventLogger, video_id: &str, outcome: &Outcome, duration: Duration) {
    let video_id = video_id.to_string();
    let duration_ms = duration.as_millis() as u64;
    let event = match outcome.clone() {
        Outcome::Analyzed {
            segments_placed,
            segments_dropped,
            retries,
        } => Event::RecordAnalyzed {
            video_id,
            segments_placed,
            segments_dropped,
            retries,
            duration_ms,
        },
        Outcome::Uploaded {
            source_id,
            notebook,
            retries,
        } => Event::RecordUploaded {
            video_id,
            source_id,
            notebook,
            retries,
            duration_ms,
        },
        Outcome::DryRun { notebook } => Event::RecordSkipped {
            video_id,
            reason: format!("dry run, would upload to {notebook}"),
        },
        Outcome::Failed { stage, code, error } => Event::RecordFailed {
            video_id,
            stage: stage_name(stage).into(),
            error_code: code,
            error,
            duration_ms,
        },
    };
    log.record(event);
}
