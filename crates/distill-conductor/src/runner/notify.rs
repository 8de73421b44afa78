use std::fmt;
use std::sync::Mutex;

use crate::runner::batch::BatchReport;

/// Run-level notice for the operator. Per-record detail goes to the
/// event log and tracing instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A pass finished or was aborted.
    StageFinished {
        stage: String,
        succeeded: usize,
        failed: usize,
        /// Abort reason, when the pass stopped early.
        aborted: Option<String>,
        not_started: usize,
    },
    /// The upload pass did not start.
    StoreUnhealthy { error: String },
    /// A remote resource exists but its record ended up failed.
    Orphaned { video_id: String, source_id: String },
}

impl Notice {
    pub fn stage_finished(stage: &str, report: &BatchReport) -> Self {
        Notice::StageFinished {
            stage: stage.to_string(),
            succeeded: report.succeeded(),
            failed: report.failed(),
            aborted: report.aborted.as_ref().map(ToString::to_string),
            not_started: report.not_started,
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::StageFinished {
                stage,
                succeeded,
                failed,
                aborted,
                not_started,
            } => {
                write!(f, "{stage}: {succeeded} succeeded, {failed} failed")?;
                if let Some(reason) = aborted {
                    write!(f, "; aborted ({reason}), {not_started} not started")?;
                }
                Ok(())
            }
            Notice::StoreUnhealthy { error } => {
                write!(f, "Knowledge store unhealthy, upload skipped: {error}")
            }
            Notice::Orphaned {
                video_id,
                source_id,
            } => write!(
                f,
                "{video_id}: remote resource {source_id} left behind by a failed upload"
            ),
        }
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &Notice);
}

/// Prints each notice on stdout.
pub struct StdoutNotifier;

#[async_trait::async_trait]
impl Notifier for StdoutNotifier {
    async fn notify(&self, notice: &Notice) {
        println!("[distill] {notice}");
    }
}

/// Keeps notices in memory (for testing).
#[derive(Default)]
pub struct CollectNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl CollectNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    /// Notices rendered as the operator would see them.
    pub fn messages(&self) -> Vec<String> {
        self.notices().iter().map(ToString::to_string).collect()
    }
}

#[async_trait::async_trait]
impl Notifier for CollectNotifier {
    async fn notify(&self, notice: &Notice) {
        self.notices.lock().unwrap().push(notice.clone());
    }
}
