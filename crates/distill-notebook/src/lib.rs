//! Remote knowledge store collaborator.
//!
//! Ingestion is four calls made in order by the pipeline: create a
//! resource with indexing off, tag it, link it into a collection, then
//! enable indexing. Asking the store for insights afterwards is optional
//! and never decides the outcome of an upload.

pub mod client;
pub mod error;
pub mod mock;

pub use client::OpenNotebookClient;
pub use error::StoreError;
pub use mock::{MockStore, StoreCall};

use serde::Deserialize;

/// Transformation names tried for insights, best first.
pub const INSIGHT_PREFERENCE: &[&str] = &["Key Insights", "Simple Summary", "Dense Summary"];

/// One step of the ingestion sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Create,
    SetTags,
    Link,
    EnableIndex,
    /// Follow-up insight request; not part of ingestion proper.
    Insight,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Create => "create",
            Step::SetTags => "set_tags",
            Step::Link => "link",
            Step::EnableIndex => "enable_index",
            Step::Insight => "insight",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A server-side prompt that derives an insight from a resource.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Transformation {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// The first transformation named in [`INSIGHT_PREFERENCE`], else the first
/// one offered.
pub fn pick_transformation(available: &[Transformation]) -> Option<&Transformation> {
    INSIGHT_PREFERENCE
        .iter()
        .find_map(|name| available.iter().find(|t| t.name == *name))
        .or_else(|| available.first())
}

#[async_trait::async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn health(&self) -> Result<(), StoreError>;

    /// Id of the collection called `name`, created if missing.
    async fn ensure_collection(&self, name: &str) -> Result<String, StoreError>;

    /// Create a resource with indexing disabled and return its id.
    async fn create(&self, title: &str, content: &str) -> Result<String, StoreError>;

    async fn set_tags(&self, id: &str, tags: &[String]) -> Result<(), StoreError>;

    async fn link(&self, collection_id: &str, id: &str) -> Result<(), StoreError>;

    async fn enable_index(&self, id: &str) -> Result<(), StoreError>;

    async fn list_transformations(&self) -> Result<Vec<Transformation>, StoreError>;

    /// Queue an insight for resource `id`. The store works on it in the
    /// background.
    async fn create_insight(&self, id: &str, transformation_id: &str) -> Result<(), StoreError>;
}
