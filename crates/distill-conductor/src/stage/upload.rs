//! `pending → uploaded | failed`: the four-step ingestion sequence, then an
//! optional insight request that never changes the outcome.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use distill_core::frontmatter::{extract, Document};
use distill_core::{
    AnalysisResult, FailedStage, PipelineState, PipelineStatus, RecordMeta, STATE_KEYS,
};
use distill_notebook::{StoreError, Step};
use distill_store::{move_atomic, read_document, write_document, Area};

use crate::pipeline::Pipeline;
use crate::retry::Retried;
use crate::runner::batch::Outcome;
use crate::runner::notify::Notice;
use crate::state::machine::{transition, Failure, StateUpdate};

const ENSURE_NOTEBOOK: &str = "ensure_notebook";

struct IngestFailure {
    step: &'static str,
    error: StoreError,
    retries: u32,
    source_id: Option<String>,
}

/// Upload one pending artifact.
pub async fn upload_artifact(p: &Pipeline, path: PathBuf) -> Result<Outcome> {
    let mut doc = read_document(&path)?;
    let mut state = PipelineState::from_mapping(&doc.meta)
        .with_context(|| format!("bad pipeline keys in {}", path.display()))?;
    if state.status != PipelineStatus::Pending {
        bail!("{} is {}, not pending", path.display(), state.status);
    }
    let meta = RecordMeta::from_document(&doc, None)
        .with_context(|| format!("bad record metadata in {}", path.display()))?;
    let analysis: AnalysisResult = extract(&doc.meta)
        .with_context(|| format!("bad analysis keys in {}", path.display()))?;
    let notebook = p
        .routing
        .notebook_for(analysis.suggested_topic.as_deref(), &meta.channel)
        .to_string();

    if p.settings.dry_run {
        tracing::info!(
            video_id = %meta.video_id,
            title = %meta.display_title(),
            notebook = %notebook,
            tags = ?analysis.tags(),
            "dry run: would upload"
        );
        return Ok(Outcome::DryRun { notebook });
    }

    let content = upload_content(&doc)?;
    let ingested = ingest(p, &notebook, &meta.display_title(), &content, &analysis.tags()).await;

    match ingested {
        Ok((source_id, retries)) => {
            transition(
                &mut state,
                PipelineStatus::Pending,
                PipelineStatus::Uploaded,
                Some(StateUpdate {
                    source_id: Some(source_id.clone()),
                    retries: Some(retries),
                    ..Default::default()
                }),
            )?;
            state.write_into(&mut doc.meta)?;
            write_document(&path, &doc)?;
            let approved = p.layout.relocate(&path, Area::Approved)?;
            move_atomic(&path, &approved)?;
            tracing::info!(
                video_id = %meta.video_id,
                %source_id,
                notebook = %notebook,
                retries,
                "uploaded"
            );
            if p.settings.insights.enabled {
                trigger_insights(p, &meta.video_id, &source_id).await;
            }
            Ok(Outcome::Uploaded {
                source_id,
                notebook,
                retries,
            })
        }
        Err(f) => {
            let code = f.error.code();
            let message = format!("{}: {}", f.step, f.error);
            transition(
                &mut state,
                PipelineStatus::Pending,
                PipelineStatus::Failed,
                Some(StateUpdate {
                    source_id: f.source_id.clone(),
                    retries: Some(f.retries),
                    failure: Some(Failure {
                        stage: FailedStage::Upload,
                        code: code.clone(),
                        message: message.clone(),
                    }),
                }),
            )?;
            state.write_into(&mut doc.meta)?;
            write_document(&path, &doc)?;
            if let Some(source_id) = &f.source_id {
                tracing::warn!(
                    video_id = %meta.video_id,
                    %source_id,
                    "remote resource created but ingestion incomplete"
                );
                p.notifier
                    .notify(&Notice::Orphaned {
                        video_id: meta.video_id.clone(),
                        source_id: source_id.clone(),
                    })
                    .await;
            }
            tracing::warn!(
                video_id = %meta.video_id,
                step = f.step,
                code = %code,
                retries = f.retries,
                "upload failed"
            );
            Ok(Outcome::Failed {
                stage: FailedStage::Upload,
                code,
                error: message,
            })
        }
    }
}

/// Resolve the notebook, then create → tag → link → enable indexing. Each
/// step runs only if the previous one succeeded. Returns the resource id and
/// the retries spent across all steps.
async fn ingest(
    p: &Pipeline,
    notebook: &str,
    title: &str,
    content: &str,
    tags: &[String],
) -> Result<(String, u32), IngestFailure> {
    let policy = &p.settings.upload_retry;
    let store = p.store.as_ref();
    let mut retries = 0;

    let Retried { result, retries: r } = p.collection_id(notebook).await;
    retries += r;
    let collection = result.map_err(|error| IngestFailure {
        step: ENSURE_NOTEBOOK,
        error,
        retries,
        source_id: None,
    })?;

    let Retried { result, retries: r } = policy
        .run(Step::Create.as_str(), || store.create(title, content))
        .await;
    retries += r;
    let source_id = result.map_err(|error| IngestFailure {
        step: Step::Create.as_str(),
        error,
        retries,
        source_id: None,
    })?;
    tracing::info!(%source_id, title, "remote resource created");

    let fail = |step: Step, error: StoreError, retries: u32| IngestFailure {
        step: step.as_str(),
        error,
        retries,
        source_id: Some(source_id.clone()),
    };

    let Retried { result, retries: r } = policy
        .run(Step::SetTags.as_str(), || store.set_tags(&source_id, tags))
        .await;
    retries += r;
    result.map_err(|e| fail(Step::SetTags, e, retries))?;

    let Retried { result, retries: r } = policy
        .run(Step::Link.as_str(), || store.link(&collection, &source_id))
        .await;
    retries += r;
    result.map_err(|e| fail(Step::Link, e, retries))?;

    let Retried { result, retries: r } = policy
        .run(Step::EnableIndex.as_str(), || store.enable_index(&source_id))
        .await;
    retries += r;
    result.map_err(|e| fail(Step::EnableIndex, e, retries))?;

    Ok((source_id, retries))
}

/// The artifact as the store should see it: metadata and body without the
/// local pipeline keys.
fn upload_content(doc: &Document) -> Result<String> {
    let mut meta = doc.meta.clone();
    for key in STATE_KEYS {
        meta.shift_remove(*key);
    }
    Ok(Document::new(meta, doc.body.clone()).render()?)
}

/// Ask the store for insights on a freshly uploaded resource. Failures are
/// logged and dropped.
async fn trigger_insights(p: &Pipeline, video_id: &str, source_id: &str) {
    let transformations = match p.insight_transformations().await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::warn!(video_id, %source_id, error = %e, "insight lookup failed");
            return;
        }
    };
    if transformations.is_empty() {
        tracing::debug!(video_id, "no transformation available for insights");
    }
    for transformation in transformations {
        match p.store.create_insight(source_id, &transformation).await {
            Ok(()) => {
                tracing::debug!(video_id, %source_id, %transformation, "insight requested")
            }
            Err(e) => tracing::warn!(
                video_id,
                %source_id,
                %transformation,
                code = %e.code(),
                "insight request failed"
            ),
        }
    }
}
