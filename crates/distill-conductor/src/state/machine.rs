use anyhow::{bail, Result};
use distill_core::{FailedStage, PipelineState, PipelineStatus};

// ── Valid transitions ──

const VALID_TRANSITIONS: &[(PipelineStatus, &[PipelineStatus])] = &[
    (
        PipelineStatus::Unprocessed,
        &[PipelineStatus::Pending, PipelineStatus::Failed],
    ),
    (
        PipelineStatus::Pending,
        &[PipelineStatus::Uploaded, PipelineStatus::Failed],
    ),
    (PipelineStatus::Failed, &[PipelineStatus::Pending]), // reset
                                                          // Uploaded is terminal
];

pub fn is_valid_transition(from: PipelineStatus, to: PipelineStatus) -> bool {
    VALID_TRANSITIONS
        .iter()
        .any(|(f, targets)| *f == from && targets.contains(&to))
}

// ── Side effects ──

/// Optional side-effect data applied during a transition.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub source_id: Option<String>,
    pub retries: Option<u32>,
    pub failure: Option<Failure>,
}

#[derive(Debug, Clone)]
pub struct Failure {
    pub stage: FailedStage,
    pub code: String,
    pub message: String,
}

/// Compare-and-set transition. Fails if the current status is not `from`
/// or the move is not in the transition table.
///
/// Leaving `failed` clears the error fields; entering it sets them.
pub fn transition(
    state: &mut PipelineState,
    from: PipelineStatus,
    to: PipelineStatus,
    update: Option<StateUpdate>,
) -> Result<()> {
    if state.status != from {
        bail!(
            "stale transition: expected status {from}, found {}",
            state.status
        );
    }
    if !is_valid_transition(from, to) {
        bail!("invalid transition: {from} → {to}");
    }
    let has_failure = update.as_ref().is_some_and(|u| u.failure.is_some());
    if to == PipelineStatus::Failed && !has_failure {
        bail!("failed transition without error details");
    }

    state.status = to;
    if from == PipelineStatus::Failed {
        state.error = None;
        state.error_code = None;
        state.failed_at = None;
        state.failed_stage = None;
        state.retries = 0;
    }

    if let Some(u) = update {
        if let Some(id) = u.source_id {
            state.source_id = Some(id);
        }
        if let Some(r) = u.retries {
            state.retries = r;
        }
        if let Some(f) = u.failure {
            state.error = Some(f.message);
            state.error_code = Some(f.code);
            state.failed_stage = Some(f.stage);
            state.failed_at = Some(distill_core::now_rfc3339());
        }
    }
    Ok(())
}
