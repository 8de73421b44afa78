//! Drives records through analysis and ingestion.
//!
//! The filesystem is the only durable state: every lifecycle transition is
//! an atomic rewrite of the record's artifact or a rename between areas.

pub mod pipeline;
pub mod retry;
pub mod routing;
pub mod runner;
pub mod stage;
pub mod state;

pub use pipeline::{InsightSettings, Pipeline, PipelineSettings, RunReport};
pub use retry::{Backoff, RetryPolicy, Retried};
pub use routing::{ChannelRule, Routing, Topic};
pub use runner::batch::{AbortReason, BatchReport, Outcome, RecordReport};
pub use runner::event_log::{Event, EventLogger};
pub use runner::notify::{CollectNotifier, Notice, Notifier, StdoutNotifier};
pub use state::reset::{reset, ResetOutcome};
