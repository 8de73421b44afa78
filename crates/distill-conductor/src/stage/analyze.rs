//! `unprocessed → pending` (or `failed` when analysis gives up).

use anyhow::{Context, Result};
use distill_core::frontmatter::{merge_into, Document};
use distill_core::{
    FailedStage, PipelineState, PipelineStatus, ProcessingInfo, RecordMeta, PIPELINE_VERSION,
    STATE_KEYS,
};
use distill_discovery::Candidate;
use distill_llm::AnalysisInput;
use distill_segment::{project, strip_timestamps};
use distill_store::{write_document, Area};
use serde_yaml::{Mapping, Value};

use crate::pipeline::Pipeline;
use crate::retry::Retried;
use crate::runner::batch::Outcome;
use crate::state::machine::{transition, Failure, StateUpdate};

/// Analyze one record and persist its artifact in the pending area.
///
/// The artifact is written once, atomically, before anything remote
/// happens. An analysis that fails for good is written as a failure
/// artifact holding the original body so discovery stops offering the
/// record until it is reset.
pub async fn analyze_record(p: &Pipeline, candidate: Candidate) -> Result<Outcome> {
    let Candidate { path, doc, meta } = candidate;
    let template = p
        .settings
        .template_override
        .clone()
        .unwrap_or_else(|| p.routing.template_for(&meta.channel).to_string());
    let input = AnalysisInput {
        video_id: meta.video_id.clone(),
        channel: meta.channel.clone(),
        title: meta.title.clone(),
        word_count: meta.word_count,
        content: strip_timestamps(&doc.body),
    };

    let analyzer = p.analyzer.as_ref();
    let Retried { result, retries } = p
        .settings
        .analysis_retry
        .run("analyze", || analyzer.analyze(&input, &template))
        .await;

    let target = p.layout.artifact_path(Area::Pending, &meta);
    let mut artifact_meta = base_meta(&doc, &meta);
    let mut state = PipelineState::default();

    let analysis = match result {
        Ok(analysis) => analysis,
        Err(e) => {
            let code = e.code().to_string();
            let message = e.to_string();
            transition(
                &mut state,
                PipelineStatus::Unprocessed,
                PipelineStatus::Failed,
                Some(StateUpdate {
                    retries: Some(retries),
                    failure: Some(Failure {
                        stage: FailedStage::Analysis,
                        code: code.clone(),
                        message: message.clone(),
                    }),
                    ..Default::default()
                }),
            )?;
            state.write_into(&mut artifact_meta)?;
            write_document(&target, &Document::new(artifact_meta, doc.body))
                .with_context(|| format!("failed to record analysis failure for {}", meta.video_id))?;
            tracing::warn!(
                video_id = %meta.video_id,
                code = %code,
                retries,
                error = %message,
                "analysis failed"
            );
            return Ok(Outcome::Failed {
                stage: FailedStage::Analysis,
                code,
                error: message,
            });
        }
    };

    let projection = project(&doc.body, &analysis.segments, &p.settings.projection);
    transition(
        &mut state,
        PipelineStatus::Unprocessed,
        PipelineStatus::Pending,
        Some(StateUpdate {
            retries: Some(retries),
            ..Default::default()
        }),
    )?;
    let processing = ProcessingInfo {
        analyzed_by: analyzer.provider(),
        analyzed_at: distill_core::now_rfc3339(),
        pipeline_version: PIPELINE_VERSION.into(),
        source_path: path.display().to_string(),
    };
    merge_into(&analysis, &mut artifact_meta)?;
    merge_into(&processing, &mut artifact_meta)?;
    state.write_into(&mut artifact_meta)?;
    write_document(&target, &Document::new(artifact_meta, projection.text))
        .with_context(|| format!("failed to write artifact for {}", meta.video_id))?;

    tracing::info!(
        video_id = %meta.video_id,
        content_type = %analysis.content_type,
        segments = projection.placed.len(),
        dropped = projection.dropped.len(),
        path = %target.display(),
        "analyzed"
    );
    Ok(Outcome::Analyzed {
        segments_placed: projection.placed.len(),
        segments_dropped: projection.dropped.len(),
        retries,
    })
}

/// The source record's metadata without pipeline keys, with the content id
/// and word count filled in when the source relied on fallbacks.
fn base_meta(doc: &Document, meta: &RecordMeta) -> Mapping {
    let mut m = doc.meta.clone();
    for key in STATE_KEYS {
        m.shift_remove(*key);
    }
    if !m.contains_key("video_id") {
        m.insert(Value::from("video_id"), Value::from(meta.video_id.clone()));
    }
    if !m.contains_key("word_count") {
        m.insert(Value::from("word_count"), Value::from(meta.word_count));
    }
    m
}
