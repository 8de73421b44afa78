use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use distill_core::{FailedStage, PipelineStatus};
use distill_discovery::{ArtifactIndex, Candidate};
use distill_llm::Analyzer;
use distill_notebook::{pick_transformation, KnowledgeStore, StoreError};
use distill_segment::ProjectionConfig;
use distill_store::Layout;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::retry::{Retried, RetryPolicy};
use crate::routing::Routing;
use crate::runner::batch::{run_batch, BatchOptions, BatchReport};
use crate::runner::event_log::{Event, EventLogger};
use crate::runner::notify::{Notice, Notifier};
use crate::stage::{analyze, upload};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub projection: ProjectionConfig,
    pub analysis_retry: RetryPolicy,
    pub upload_retry: RetryPolicy,
    pub batch: BatchOptions,
    /// Use this template for every record instead of the routed one.
    pub template_override: Option<String>,
    pub dry_run: bool,
    pub insights: InsightSettings,
}

/// Insight requests made after a successful upload.
#[derive(Debug, Clone)]
pub struct InsightSettings {
    pub enabled: bool,
    /// Transformation ids to request. Empty picks one offered by the store.
    pub transformations: Vec<String>,
}

impl Default for InsightSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            transformations: Vec::new(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            projection: ProjectionConfig::default(),
            analysis_retry: RetryPolicy::exponential(
                3,
                Duration::from_secs(3),
                Duration::from_secs(60),
            ),
            upload_retry: RetryPolicy::fixed(3, Duration::from_secs(5)),
            batch: BatchOptions::default(),
            template_override: None,
            dry_run: false,
            insights: InsightSettings::default(),
        }
    }
}

/// Both passes of a full run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub analysis: BatchReport,
    /// `None` when the analysis pass was aborted.
    pub upload: Option<BatchReport>,
}

impl RunReport {
    pub fn breaker_tripped(&self) -> bool {
        self.analysis.breaker_tripped()
            || self.upload.as_ref().is_some_and(BatchReport::breaker_tripped)
    }
}

/// Shared context of one run: collaborators, layout, routing and settings.
pub struct Pipeline {
    pub(crate) analyzer: Arc<dyn Analyzer>,
    pub(crate) store: Arc<dyn KnowledgeStore>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) layout: Layout,
    pub(crate) routing: Routing,
    pub(crate) settings: PipelineSettings,
    /// Notebook name → id, resolved once per name.
    collections: Mutex<HashMap<String, Arc<OnceCell<String>>>>,
    /// Transformations picked from the store's list, looked up once.
    insight_picks: OnceCell<Vec<String>>,
}

impl Pipeline {
    pub fn new(
        analyzer: Arc<dyn Analyzer>,
        store: Arc<dyn KnowledgeStore>,
        notifier: Arc<dyn Notifier>,
        layout: Layout,
        routing: Routing,
        settings: PipelineSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            analyzer,
            store,
            notifier,
            layout,
            routing,
            settings,
            collections: Mutex::new(HashMap::new()),
            insight_picks: OnceCell::new(),
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Analyze and segment every candidate, writing pending (or failed)
    /// artifacts.
    pub async fn analyze_pass(
        self: &Arc<Self>,
        candidates: Vec<Candidate>,
        log: &mut EventLogger,
        cancel: &CancellationToken,
    ) -> BatchReport {
        let items: Vec<(String, Candidate)> = candidates
            .into_iter()
            .map(|c| (c.meta.video_id.clone(), c))
            .collect();
        log.record(Event::RunStart {
            run_id: run_id_of(log),
            stage: "analysis".into(),
            records: items.len(),
        });
        let pipeline = Arc::clone(self);
        let report = run_batch(
            FailedStage::Analysis,
            items,
            self.settings.batch,
            cancel,
            log,
            move |candidate| {
                let p = Arc::clone(&pipeline);
                async move { analyze::analyze_record(&p, candidate).await }
            },
        )
        .await;
        self.summarize("analysis", &report).await;
        report
    }

    /// Upload every pending artifact. Fails before touching any record when
    /// the store is unhealthy.
    pub async fn upload_pass(
        self: &Arc<Self>,
        log: &mut EventLogger,
        cancel: &CancellationToken,
    ) -> Result<BatchReport> {
        if !self.settings.dry_run {
            let store = self.store.as_ref();
            let Retried { result, .. } = self
                .settings
                .upload_retry
                .run("health", || store.health())
                .await;
            if let Err(e) = result {
                self.notifier
                    .notify(&Notice::StoreUnhealthy {
                        error: e.to_string(),
                    })
                    .await;
                anyhow::bail!("knowledge store health check failed: {e}");
            }
        }

        let index = ArtifactIndex::build(&self.layout);
        let items: Vec<(String, PathBuf)> = index
            .with_status(PipelineStatus::Pending)
            .into_iter()
            .map(|e| (e.video_id.clone(), e.path.clone()))
            .collect();
        log.record(Event::RunStart {
            run_id: run_id_of(log),
            stage: "upload".into(),
            records: items.len(),
        });
        let pipeline = Arc::clone(self);
        let report = run_batch(
            FailedStage::Upload,
            items,
            self.settings.batch,
            cancel,
            log,
            move |path| {
                let p = Arc::clone(&pipeline);
                async move { upload::upload_artifact(&p, path).await }
            },
        )
        .await;
        self.summarize("upload", &report).await;
        Ok(report)
    }

    /// Analysis pass followed by an upload pass, unless the first one was
    /// aborted.
    pub async fn run(
        self: &Arc<Self>,
        candidates: Vec<Candidate>,
        log: &mut EventLogger,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let analysis = self.analyze_pass(candidates, log, cancel).await;
        if analysis.aborted.is_some() {
            return Ok(RunReport {
                analysis,
                upload: None,
            });
        }
        let upload = self.upload_pass(log, cancel).await?;
        Ok(RunReport {
            analysis,
            upload: Some(upload),
        })
    }

    /// Cached notebook id, created in the store on first use. Uploads to the
    /// same notebook wait for one resolution; other notebooks are not
    /// blocked. A failed resolution is not cached.
    pub(crate) async fn collection_id(&self, name: &str) -> Retried<String, StoreError> {
        let cell = {
            let mut cells = self.collections.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(cells.entry(name.to_string()).or_default())
        };
        let store = self.store.as_ref();
        let policy = &self.settings.upload_retry;
        let mut retries = 0;
        let spent = &mut retries;
        let result = cell
            .get_or_try_init(|| async move {
                let out = policy
                    .run("ensure_notebook", || store.ensure_collection(name))
                    .await;
                *spent = out.retries;
                out.result
            })
            .await
            .cloned();
        Retried { result, retries }
    }

    /// Transformation ids to request insights with: the configured ones, or
    /// the store's preferred transformation. An empty list means none is
    /// available.
    pub(crate) async fn insight_transformations(&self) -> Result<Vec<String>, StoreError> {
        if !self.settings.insights.transformations.is_empty() {
            return Ok(self.settings.insights.transformations.clone());
        }
        let store = self.store.as_ref();
        self.insight_picks
            .get_or_try_init(|| async move {
                let available = store.list_transformations().await?;
                let picked = pick_transformation(&available).map(|t| t.id.clone());
                Ok::<_, StoreError>(picked.into_iter().collect())
            })
            .await
            .cloned()
    }

    async fn summarize(&self, stage: &str, report: &BatchReport) {
        self.notifier
            .notify(&Notice::stage_finished(stage, report))
            .await;
    }
}

fn run_id_of(log: &EventLogger) -> String {
    log.path()
        .and_then(|p| p.file_stem())
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::batch::Outcome;
    use crate::runner::notify::CollectNotifier;
    use crate::state::reset::{reset, ResetOutcome};
    use distill_core::frontmatter::Document;
    use distill_core::{
        AnalysisResult, ContentDensity, ContentType, PipelineState, SectionType, Segment,
        TemporalRelevance,
    };
    use distill_discovery::{discover, Filters, ScanPatterns, SkipReason};
    use distill_llm::{AnalysisError, MockAnalyzer};
    use distill_notebook::{MockStore, OpenNotebookClient, Step, StoreCall, Transformation};
    use distill_store::Area;
    use std::fs;
    use std::path::Path;

    struct Fixture {
        _tmp: tempfile::TempDir,
        corpus: PathBuf,
        layout: Layout,
        analyzer: Arc<MockAnalyzer>,
        store: Arc<MockStore>,
        notifier: Arc<CollectNotifier>,
    }

    fn analysis() -> AnalysisResult {
        AnalysisResult {
            semantic_summary: "A walk through agent identity.".into(),
            key_topics: vec!["agents".into(), "identity".into()],
            suggested_topic: Some("crypto".into()),
            content_type: ContentType::TechnicalAnalysis,
            content_density: ContentDensity::High,
            temporal_relevance: TemporalRelevance::Evergreen,
            dialogue_format: None,
            key_entities: vec!["Ethereum".into()],
            segments: vec![
                Segment {
                    section_type: SectionType::Intro,
                    title: "Opening".into(),
                    start_quote: "Welcome back everyone".into(),
                },
                Segment {
                    section_type: SectionType::KeyPoint,
                    title: "Definition".into(),
                    start_quote: "So what exactly is".into(),
                },
            ],
        }
    }

    fn video_id(n: usize) -> String {
        format!("vid{n:08}")
    }

    fn fixture(records: usize) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let corpus = tmp.path().join("corpus");
        for n in 1..=records {
            let dir = corpus.join("Bankless");
            fs::create_dir_all(&dir).unwrap();
            let text = format!(
                "---\nchannel: Bankless\nvideo_id: {}\ntitle: Title {n}\npublished_at: 2025-06-0{n}\nword_count: 150\n---\n\n[00:00] Welcome back everyone\n[00:05] So what exactly is this thing\n",
                video_id(n)
            );
            fs::write(dir.join(format!("{}.md", video_id(n))), text).unwrap();
        }
        let layout = Layout::new(tmp.path().join("intermediate"));
        layout.ensure_dirs().unwrap();
        Fixture {
            corpus,
            layout,
            analyzer: Arc::new(MockAnalyzer::new(Some(analysis()))),
            store: Arc::new(MockStore::new()),
            notifier: Arc::new(CollectNotifier::new()),
            _tmp: tmp,
        }
    }

    fn routing() -> Routing {
        serde_yaml::from_str(
            "topics:\n  crypto:\n    name: Crypto\n    notebook: Crypto Research\n",
        )
        .unwrap()
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            analysis_retry: RetryPolicy::exponential(3, Duration::ZERO, Duration::ZERO),
            upload_retry: RetryPolicy::fixed(3, Duration::ZERO),
            ..Default::default()
        }
    }

    impl Fixture {
        fn pipeline(&self, settings: PipelineSettings) -> Arc<Pipeline> {
            Pipeline::new(
                self.analyzer.clone(),
                self.store.clone(),
                self.notifier.clone(),
                self.layout.clone(),
                routing(),
                settings,
            )
        }

        fn candidates(&self) -> Vec<Candidate> {
            self.discover().candidates
        }

        fn discover(&self) -> distill_discovery::Discovery {
            let filters = Filters {
                min_word_count: 10,
                ..Default::default()
            };
            discover(&self.corpus, &ScanPatterns::default(), &filters, &self.layout).unwrap()
        }

        fn state_of(&self, n: usize) -> (Area, PipelineState, Document) {
            let index = ArtifactIndex::build(&self.layout);
            let entry = index.get(&video_id(n)).unwrap();
            let doc = distill_store::read_document(&entry.path).unwrap();
            (entry.area, entry.state.clone(), doc)
        }
    }

    fn artifact_count(dir: &Path) -> usize {
        distill_discovery::index::artifact_files(dir).len()
    }

    #[tokio::test]
    async fn full_run_uploads_in_step_order() {
        let fx = fixture(1);
        let p = fx.pipeline(settings());
        let report = p
            .run(fx.candidates(), &mut EventLogger::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.analysis.succeeded(), 1);
        assert_eq!(report.upload.as_ref().unwrap().succeeded(), 1);

        let (area, state, doc) = fx.state_of(1);
        assert_eq!(area, Area::Approved);
        assert_eq!(state.status, PipelineStatus::Uploaded);
        assert!(state.source_id.as_deref().is_some_and(|id| !id.is_empty()));
        assert_eq!(artifact_count(&fx.layout.area_dir(Area::Pending)), 0);

        assert_eq!(
            fx.store.steps_for("Title 1"),
            vec![Step::Create, Step::SetTags, Step::Link, Step::EnableIndex]
        );
        assert_eq!(fx.store.collections(), vec!["Crypto Research"]);
        let calls = fx.store.calls();
        assert!(calls.contains(&StoreCall::SetTags {
            id: "source:1".into(),
            tags: vec!["crypto".into(), "agents".into(), "identity".into(), "Ethereum".into()],
        }));

        assert!(doc.body.starts_with("## [INTRO] Opening\n[00:00] Welcome back everyone\n"));
        assert!(doc.body.contains("## [KEY_POINT] Definition\n[00:05] So what exactly"));
        assert_eq!(doc.get_str("analyzed_by"), Some("mock/test"));
        assert_eq!(doc.get_str("channel"), Some("Bankless"));
    }

    #[tokio::test]
    async fn upload_retries_are_counted() {
        let fx = fixture(1);
        fx.store
            .fail(Step::Create, "Title 1", vec![StoreError::Timeout, StoreError::Timeout]);
        let p = fx.pipeline(settings());
        p.run(fx.candidates(), &mut EventLogger::disabled(), &CancellationToken::new())
            .await
            .unwrap();

        let (_, state, _) = fx.state_of(1);
        assert_eq!(state.status, PipelineStatus::Uploaded);
        assert_eq!(state.retries, 2);
    }

    #[tokio::test]
    async fn one_permanent_failure_does_not_stop_the_batch() {
        let fx = fixture(5);
        fx.store.fail(
            Step::SetTags,
            "Title 3",
            vec![StoreError::Status {
                status: 400,
                body: "invalid topics".into(),
            }],
        );
        let p = fx.pipeline(settings());
        let report = p
            .run(fx.candidates(), &mut EventLogger::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        let upload = report.upload.unwrap();
        assert_eq!(upload.succeeded(), 4);
        assert_eq!(upload.failed(), 1);

        for n in [1, 2, 4, 5] {
            assert_eq!(fx.state_of(n).1.status, PipelineStatus::Uploaded, "record {n}");
        }
        let (area, state, _) = fx.state_of(3);
        assert_eq!(area, Area::Pending);
        assert_eq!(state.status, PipelineStatus::Failed);
        assert_eq!(state.error_code.as_deref(), Some("HTTP_400"));
        assert_eq!(state.failed_stage, Some(FailedStage::Upload));
        assert!(state.failed_at.is_some());
        assert_eq!(fx.store.steps_for("Title 3"), vec![Step::Create, Step::SetTags]);
        assert!(fx.notifier.notices().iter().any(|n| matches!(
            n,
            Notice::Orphaned { video_id: id, .. } if *id == video_id(3)
        )));
    }

    #[tokio::test]
    async fn pending_record_is_not_rediscovered() {
        let fx = fixture(2);
        let p = fx.pipeline(settings());
        let report = p
            .analyze_pass(fx.candidates(), &mut EventLogger::disabled(), &CancellationToken::new())
            .await;
        assert_eq!(report.succeeded(), 2);
        let second = fx.discover();
        assert!(second.candidates.is_empty());
        assert_eq!(second.stats.filtered_by_artifact, 2);
    }

    #[tokio::test]
    async fn analysis_failure_is_recorded_and_reset_by_removal() {
        let fx = fixture(1);
        fx.analyzer.set_results(
            &video_id(1),
            vec![Err(AnalysisError::Parse("no JSON object".into()))],
        );
        let p = fx.pipeline(settings());
        let report = p
            .analyze_pass(fx.candidates(), &mut EventLogger::disabled(), &CancellationToken::new())
            .await;
        assert!(matches!(
            &report.get(&video_id(1)).unwrap().outcome,
            Outcome::Failed { code, .. } if code == "LLM_PARSE"
        ));

        let (_, state, doc) = fx.state_of(1);
        assert_eq!(state.status, PipelineStatus::Failed);
        assert_eq!(state.failed_stage, Some(FailedStage::Analysis));
        assert!(doc.body.contains("[00:00] Welcome back everyone"));

        let again = fx.discover();
        assert!(again.candidates.is_empty());
        assert!(matches!(again.skipped[0].1, SkipReason::RequiresReset));

        assert!(matches!(reset(&fx.layout, &video_id(1)).unwrap(), ResetOutcome::Removed(_)));
        assert_eq!(fx.discover().candidates.len(), 1);
    }

    #[tokio::test]
    async fn transient_analysis_errors_are_retried() {
        let fx = fixture(1);
        fx.analyzer.set_results(
            &video_id(1),
            vec![
                Err(AnalysisError::Timeout(300)),
                Err(AnalysisError::RateLimited("429".into())),
                Ok(analysis()),
            ],
        );
        let p = fx.pipeline(settings());
        let report = p
            .analyze_pass(fx.candidates(), &mut EventLogger::disabled(), &CancellationToken::new())
            .await;
        assert_eq!(
            report.get(&video_id(1)).unwrap().outcome,
            Outcome::Analyzed {
                segments_placed: 2,
                segments_dropped: 0,
                retries: 2
            }
        );
        assert_eq!(fx.analyzer.calls().len(), 3);
    }

    #[tokio::test]
    async fn upload_failure_reset_goes_back_to_pending() {
        let fx = fixture(1);
        fx.store.fail(
            Step::Link,
            "Title 1",
            vec![StoreError::Status {
                status: 404,
                body: String::new(),
            }],
        );
        let p = fx.pipeline(settings());
        p.run(fx.candidates(), &mut EventLogger::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        let (_, state, _) = fx.state_of(1);
        assert_eq!(state.status, PipelineStatus::Failed);
        assert_eq!(state.source_id.as_deref(), Some("source:1"));

        // Failed records stay put until reset.
        let report = p
            .upload_pass(&mut EventLogger::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.records.is_empty());

        assert!(matches!(reset(&fx.layout, &video_id(1)).unwrap(), ResetOutcome::Pending(_)));
        let (_, state, _) = fx.state_of(1);
        assert_eq!(state.status, PipelineStatus::Pending);
        assert!(state.error.is_none() && state.source_id.is_none());

        p.upload_pass(&mut EventLogger::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        let (area, state, _) = fx.state_of(1);
        assert_eq!(area, Area::Approved);
        assert_eq!(state.source_id.as_deref(), Some("source:2"));
    }

    #[tokio::test]
    async fn reset_rejects_non_failed() {
        let fx = fixture(1);
        let p = fx.pipeline(settings());
        p.analyze_pass(fx.candidates(), &mut EventLogger::disabled(), &CancellationToken::new())
            .await;
        assert!(reset(&fx.layout, &video_id(1)).is_err());
        assert!(reset(&fx.layout, "missing").is_err());
    }

    #[tokio::test]
    async fn unhealthy_store_skips_upload() {
        let fx = fixture(1);
        fx.store.set_unhealthy(StoreError::Status {
            status: 503,
            body: String::new(),
        });
        let p = fx.pipeline(settings());
        assert!(p
            .run(fx.candidates(), &mut EventLogger::disabled(), &CancellationToken::new())
            .await
            .is_err());
        assert!(fx.store.calls().is_empty());
        assert_eq!(fx.state_of(1).1.status, PipelineStatus::Pending);
    }

    #[tokio::test]
    async fn dry_run_touches_nothing_remote() {
        let fx = fixture(2);
        let p = fx.pipeline(PipelineSettings {
            dry_run: true,
            ..settings()
        });
        let report = p
            .run(fx.candidates(), &mut EventLogger::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        let upload = report.upload.unwrap();
        assert!(upload
            .records
            .iter()
            .all(|r| r.outcome == Outcome::DryRun { notebook: "Crypto Research".into() }));
        assert!(fx.store.calls().is_empty());
        assert_eq!(fx.state_of(1).1.status, PipelineStatus::Pending);
    }

    #[tokio::test]
    async fn breaker_aborts_run_before_upload() {
        let fx = fixture(4);
        let analyzer = Arc::new(MockAnalyzer::new(None));
        let p = Pipeline::new(
            analyzer,
            fx.store.clone(),
            fx.notifier.clone(),
            fx.layout.clone(),
            routing(),
            PipelineSettings {
                batch: BatchOptions {
                    max_concurrent: 1,
                    breaker_threshold: 2,
                },
                ..settings()
            },
        );
        let report = p
            .run(fx.candidates(), &mut EventLogger::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.breaker_tripped());
        assert!(report.upload.is_none());
        assert_eq!(report.analysis.not_started, 2);
        assert!(fx
            .notifier
            .messages()
            .iter()
            .any(|m| m.contains("circuit breaker")));
    }

    #[tokio::test]
    async fn cancelled_run_starts_nothing() {
        let fx = fixture(3);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let p = fx.pipeline(settings());
        let report = p
            .run(fx.candidates(), &mut EventLogger::disabled(), &cancel)
            .await
            .unwrap();
        assert_eq!(report.analysis.records.len(), 0);
        assert_eq!(report.analysis.not_started, 3);
        assert!(fx.analyzer.calls().is_empty());
    }

    #[tokio::test]
    async fn run_events_are_logged() {
        let fx = fixture(1);
        let p = fx.pipeline(settings());
        let mut log = EventLogger::new(&fx.layout.runs_dir(), "01TESTRUN");
        p.run(fx.candidates(), &mut log, &CancellationToken::new())
            .await
            .unwrap();
        let content = fs::read_to_string(log.path().unwrap()).unwrap();
        let types: Vec<String> = content
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["type"].to_string())
            .collect();
        assert_eq!(
            types,
            vec![
                "\"run_start\"",
                "\"record_start\"",
                "\"record_analyzed\"",
                "\"run_completed\"",
                "\"run_start\"",
                "\"record_start\"",
                "\"record_uploaded\"",
                "\"run_completed\"",
            ]
        );
    }

    fn transformation(id: &str, name: &str) -> Transformation {
        Transformation {
            id: id.into(),
            name: name.into(),
        }
    }

    #[tokio::test]
    async fn uploaded_content_leaves_out_pipeline_keys() {
        let fx = fixture(1);
        fx.analyzer.set_results(
            &video_id(1),
            vec![Err(AnalysisError::Timeout(300)), Ok(analysis())],
        );
        let p = fx.pipeline(settings());
        p.analyze_pass(fx.candidates(), &mut EventLogger::disabled(), &CancellationToken::new())
            .await;
        let (_, _, pending) = fx.state_of(1);
        assert_eq!(pending.get_str("status"), Some("pending"));
        assert!(pending.meta.contains_key("retries"));

        let upload = p
            .upload_pass(&mut EventLogger::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(upload.succeeded(), 1);

        let sent = Document::parse(&fx.store.content_for("Title 1").unwrap()).unwrap();
        for key in distill_core::STATE_KEYS {
            assert!(!sent.meta.contains_key(*key), "{key} sent to the store");
        }
        assert_eq!(sent.get_str("channel"), Some("Bankless"));
        assert_eq!(sent.get_str("analyzed_by"), Some("mock/test"));
        assert!(sent.body.starts_with("## [INTRO] Opening\n[00:00] Welcome back everyone\n"));
    }

    #[tokio::test]
    async fn insights_use_preferred_transformation_looked_up_once() {
        let fx = fixture(2);
        fx.store.set_transformations(vec![
            transformation("transformation:dense", "Dense Summary"),
            transformation("transformation:simple", "Simple Summary"),
        ]);
        let p = fx.pipeline(settings());
        p.run(fx.candidates(), &mut EventLogger::disabled(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            fx.store.steps_for("Title 1"),
            vec![Step::Create, Step::SetTags, Step::Link, Step::EnableIndex, Step::Insight]
        );
        let calls = fx.store.calls();
        for id in ["source:1", "source:2"] {
            assert!(calls.contains(&StoreCall::Insight {
                id: id.into(),
                transformation: "transformation:simple".into(),
            }));
        }
        assert_eq!(fx.store.transformation_lookups(), 1);
    }

    #[tokio::test]
    async fn configured_transformations_skip_lookup() {
        let fx = fixture(1);
        let p = fx.pipeline(PipelineSettings {
            insights: InsightSettings {
                enabled: true,
                transformations: vec!["transformation:a".into(), "transformation:b".into()],
            },
            ..settings()
        });
        p.run(fx.candidates(), &mut EventLogger::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(fx.store.transformation_lookups(), 0);
        let insights: Vec<StoreCall> = fx
            .store
            .calls()
            .into_iter()
            .filter(|c| matches!(c, StoreCall::Insight { .. }))
            .collect();
        assert_eq!(insights.len(), 2);
    }

    #[tokio::test]
    async fn insight_failures_never_fail_the_record() {
        let fx = fixture(2);
        fx.store
            .set_transformations(vec![transformation("transformation:key", "Key Insights")]);
        fx.store.fail(
            Step::Insight,
            "Title 1",
            vec![StoreError::Status {
                status: 500,
                body: "model unavailable".into(),
            }],
        );
        let p = fx.pipeline(settings());
        let report = p
            .run(fx.candidates(), &mut EventLogger::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.upload.unwrap().succeeded(), 2);
        let (area, state, _) = fx.state_of(1);
        assert_eq!(area, Area::Approved);
        assert_eq!(state.status, PipelineStatus::Uploaded);
        assert_eq!(state.retries, 0);
    }

    #[tokio::test]
    async fn failed_transformation_lookup_is_retried_next_record() {
        let fx = fixture(2);
        fx.store.fail_transformations(StoreError::Network("refused".into()));
        let p = fx.pipeline(settings());
        let report = p
            .run(fx.candidates(), &mut EventLogger::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.upload.unwrap().succeeded(), 2);
        assert_eq!(fx.store.transformation_lookups(), 2);
        assert!(!fx.store.calls().iter().any(|c| matches!(c, StoreCall::Insight { .. })));
    }

    #[tokio::test]
    async fn disabled_insights_make_no_calls() {
        let fx = fixture(1);
        fx.store
            .set_transformations(vec![transformation("transformation:key", "Key Insights")]);
        let p = fx.pipeline(PipelineSettings {
            insights: InsightSettings {
                enabled: false,
                transformations: Vec::new(),
            },
            ..settings()
        });
        p.run(fx.candidates(), &mut EventLogger::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(fx.store.transformation_lookups(), 0);
        assert_eq!(fx.store.steps_for("Title 1").len(), 4);
    }

    #[tokio::test]
    async fn slow_notebook_does_not_block_other_notebooks() {
        let fx = fixture(0);
        fx.store.delay_collection("Slow", Duration::from_millis(500));
        let p = fx.pipeline(settings());
        let (slow, fast) = tokio::join!(p.collection_id("Slow"), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tokio::time::timeout(Duration::from_millis(200), p.collection_id("Fast")).await
        });
        assert_eq!(slow.result.unwrap(), "notebook:Slow");
        let fast = fast.expect("fast notebook waited on slow one");
        assert_eq!(fast.result.unwrap(), "notebook:Fast");
    }

    #[tokio::test]
    async fn concurrent_uploads_resolve_notebook_once() {
        let fx = fixture(4);
        fx.store.delay_collection("Crypto Research", Duration::from_millis(50));
        let p = fx.pipeline(PipelineSettings {
            batch: BatchOptions {
                max_concurrent: 4,
                breaker_threshold: 5,
            },
            ..settings()
        });
        let report = p
            .run(fx.candidates(), &mut EventLogger::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.upload.unwrap().succeeded(), 4);
        assert_eq!(fx.store.ensure_calls(), 1);
    }

    #[tokio::test]
    async fn http_insight_error_is_ignored() {
        use serde_json::json;
        use wiremock::matchers::{body_partial_json, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let ok = |body: serde_json::Value| ResponseTemplate::new(200).set_body_json(body);
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ok(json!({ "status": "healthy" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/notebooks"))
            .respond_with(ok(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/notebooks"))
            .respond_with(ok(json!({ "id": "nb1" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/sources/json"))
            .respond_with(ok(json!({ "id": "src1" })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/sources/source:src1"))
            .respond_with(ok(json!({})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/notebooks/notebook:nb1/sources/source:src1"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ok(json!({ "success": true })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/transformations"))
            .respond_with(ok(json!([
                { "id": "transformation:dense", "name": "Dense Summary" },
                { "id": "transformation:simple", "name": "Simple Summary" },
            ])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/sources/source:src1/insights"))
            .and(body_partial_json(json!({ "transformation_id": "transformation:simple" })))
            .respond_with(ResponseTemplate::new(500).set_body_string("no model configured"))
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(1);
        let client = OpenNotebookClient::new(&server.uri(), None, Duration::from_secs(5)).unwrap();
        let p = Pipeline::new(
            fx.analyzer.clone(),
            Arc::new(client),
            fx.notifier.clone(),
            fx.layout.clone(),
            routing(),
            settings(),
        );
        let report = p
            .run(fx.candidates(), &mut EventLogger::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.upload.unwrap().succeeded(), 1);
        let (area, state, _) = fx.state_of(1);
        assert_eq!(area, Area::Approved);
        assert_eq!(state.source_id.as_deref(), Some("source:src1"));
    }
}
