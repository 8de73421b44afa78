use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::StoreError;
use crate::{KnowledgeStore, Step, Transformation};

/// One recorded call against [`MockStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Create { title: String },
    SetTags { id: String, tags: Vec<String> },
    Link { collection: String, id: String },
    EnableIndex { id: String },
    Insight { id: String, transformation: String },
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    titles: HashMap<String, String>,
    contents: HashMap<String, String>,
    calls: Vec<StoreCall>,
    collections: Vec<String>,
    failures: Vec<(Step, String, VecDeque<StoreError>)>,
    unhealthy: Option<StoreError>,
    transformations: Vec<Transformation>,
    transformations_error: Option<StoreError>,
    transformation_lookups: usize,
    ensure_calls: usize,
    ensure_delays: HashMap<String, Duration>,
}

/// In-memory store for testing.
///
/// Failures are scripted per step and keyed by a substring of the
/// resource title, so they stay attached to one record regardless of
/// scheduling order.
#[derive(Default)]
pub struct MockStore {
    state: Mutex<MockState>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `step` for resources whose title contains `title_match`,
    /// once per queued error.
    pub fn fail(&self, step: Step, title_match: &str, errors: Vec<StoreError>) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((step, title_match.to_string(), errors.into()));
    }

    pub fn set_unhealthy(&self, err: StoreError) {
        self.state.lock().unwrap().unhealthy = Some(err);
    }

    pub fn set_transformations(&self, available: Vec<Transformation>) {
        self.state.lock().unwrap().transformations = available;
    }

    /// Make every transformation lookup fail with `err`.
    pub fn fail_transformations(&self, err: StoreError) {
        self.state.lock().unwrap().transformations_error = Some(err);
    }

    pub fn transformation_lookups(&self) -> usize {
        self.state.lock().unwrap().transformation_lookups
    }

    /// Content sent with the created resource whose title contains `title_match`.
    pub fn content_for(&self, title_match: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .titles
            .iter()
            .find(|(_, title)| title.contains(title_match))
            .and_then(|(id, _)| state.contents.get(id).cloned())
    }

    /// Delay `ensure_collection(name)` by `delay`.
    pub fn delay_collection(&self, name: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .ensure_delays
            .insert(name.to_string(), delay);
    }

    /// Number of `ensure_collection` calls made.
    pub fn ensure_calls(&self) -> usize {
        self.state.lock().unwrap().ensure_calls
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Collections requested through `ensure_collection`, in order, deduplicated.
    pub fn collections(&self) -> Vec<String> {
        self.state.lock().unwrap().collections.clone()
    }

    /// Steps recorded for the resource titled with `title_match`.
    pub fn steps_for(&self, title_match: &str) -> Vec<Step> {
        let state = self.state.lock().unwrap();
        let title_of = |id: &str| state.titles.get(id).cloned().unwrap_or_default();
        state
            .calls
            .iter()
            .filter_map(|call| {
                let (step, title) = match call {
                    StoreCall::Create { title } => (Step::Create, title.clone()),
                    StoreCall::SetTags { id, .. } => (Step::SetTags, title_of(id)),
                    StoreCall::Link { id, .. } => (Step::Link, title_of(id)),
                    StoreCall::EnableIndex { id } => (Step::EnableIndex, title_of(id)),
                    StoreCall::Insight { id, .. } => (Step::Insight, title_of(id)),
                };
                title.contains(title_match).then_some(step)
            })
            .collect()
    }

    fn scripted(state: &mut MockState, step: Step, title: &str) -> Option<StoreError> {
        state
            .failures
            .iter_mut()
            .find(|(s, m, errs)| *s == step && title.contains(m.as_str()) && !errs.is_empty())
            .and_then(|(_, _, errs)| errs.pop_front())
    }

    fn step(&self, step: Step, id: &str, call: StoreCall) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        let title = state.titles.get(id).cloned().unwrap_or_default();
        match Self::scripted(&mut state, step, &title) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl KnowledgeStore for MockStore {
    async fn health(&self) -> Result<(), StoreError> {
        match &self.state.lock().unwrap().unhealthy {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn ensure_collection(&self, name: &str) -> Result<String, StoreError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.ensure_calls += 1;
            if !state.collections.iter().any(|c| c == name) {
                state.collections.push(name.to_string());
            }
            state.ensure_delays.get(name).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(format!("notebook:{name}"))
    }

    async fn create(&self, title: &str, content: &str) -> Result<String, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::Create {
            title: title.to_string(),
        });
        if let Some(err) = Self::scripted(&mut state, Step::Create, title) {
            return Err(err);
        }
        state.next_id += 1;
        let id = format!("source:{}", state.next_id);
        state.titles.insert(id.clone(), title.to_string());
        state.contents.insert(id.clone(), content.to_string());
        Ok(id)
    }

    async fn set_tags(&self, id: &str, tags: &[String]) -> Result<(), StoreError> {
        self.step(
            Step::SetTags,
            id,
            StoreCall::SetTags {
                id: id.to_string(),
                tags: tags.to_vec(),
            },
        )
    }

    async fn link(&self, collection_id: &str, id: &str) -> Result<(), StoreError> {
        self.step(
            Step::Link,
            id,
            StoreCall::Link {
                collection: collection_id.to_string(),
                id: id.to_string(),
            },
        )
    }

    async fn enable_index(&self, id: &str) -> Result<(), StoreError> {
        self.step(Step::EnableIndex, id, StoreCall::EnableIndex { id: id.to_string() })
    }

    async fn list_transformations(&self) -> Result<Vec<Transformation>, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.transformation_lookups += 1;
        match &state.transformations_error {
            Some(err) => Err(err.clone()),
            None => Ok(state.transformations.clone()),
        }
    }

    async fn create_insight(&self, id: &str, transformation_id: &str) -> Result<(), StoreError> {
        self.step(
            Step::Insight,
            id,
            StoreCall::Insight {
                id: id.to_string(),
                transformation: transformation_id.to_string(),
            },
        )
    }
}
