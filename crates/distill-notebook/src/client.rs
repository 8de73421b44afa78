//! HTTP client for the Open Notebook API.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder};
use serde_json::{json, Value};

use crate::error::StoreError;
use crate::{KnowledgeStore, Transformation};

const SOURCE_PREFIX: &str = "source:";
const NOTEBOOK_PREFIX: &str = "notebook:";

/// Prepend `prefix` unless the id already carries it.
pub fn with_prefix(id: &str, prefix: &str) -> String {
    if id.starts_with(prefix) {
        id.to_string()
    } else {
        format!("{prefix}{id}")
    }
}

pub struct OpenNotebookClient {
    client: Client,
    base_url: String,
    password: Option<String>,
}

impl OpenNotebookClient {
    pub fn new(
        base_url: &str,
        password: Option<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            password: password.filter(|p| !p.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self.client.request(method, format!("{}{path}", self.base_url));
        match &self.password {
            Some(password) => req.bearer_auth(password),
            None => req,
        }
    }

    /// Send and decode the body as JSON. An empty body decodes to `Null`.
    async fn send(&self, req: RequestBuilder) -> Result<Value, StoreError> {
        let response = req.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                body: truncate(&body, 300),
            });
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| StoreError::Decode(e.to_string()))
    }

    async fn list_notebooks(&self) -> Result<Vec<Value>, StoreError> {
        let value = self.send(self.request(Method::GET, "/api/notebooks")).await?;
        match value {
            Value::Array(items) => Ok(items),
            Value::Object(mut obj) => match obj.remove("notebooks") {
                Some(Value::Array(items)) => Ok(items),
                _ => Err(StoreError::Decode("notebook list missing `notebooks`".into())),
            },
            other => Err(StoreError::Decode(format!("unexpected notebook list: {other}"))),
        }
    }
}

fn transformation_list(value: Value) -> Result<Vec<Transformation>, StoreError> {
    let items = match value {
        Value::Object(mut obj) => obj.remove("transformations").unwrap_or(Value::Null),
        other => other,
    };
    serde_json::from_value(items).map_err(|e| StoreError::Decode(e.to_string()))
}

fn id_field(value: &Value) -> Result<String, StoreError> {
    value
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| StoreError::Decode("response has no `id`".into()))
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[async_trait::async_trait]
impl KnowledgeStore for OpenNotebookClient {
    async fn health(&self) -> Result<(), StoreError> {
        self.send(self.request(Method::GET, "/health")).await.map(|_| ())
    }

    async fn ensure_collection(&self, name: &str) -> Result<String, StoreError> {
        let existing = self
            .list_notebooks()
            .await?
            .into_iter()
            .find(|nb| nb.get("name").and_then(Value::as_str) == Some(name));
        if let Some(nb) = existing {
            return id_field(&nb).map(|id| with_prefix(&id, NOTEBOOK_PREFIX));
        }

        tracing::info!(notebook = name, "creating notebook");
        let created = self
            .send(self.request(Method::POST, "/api/notebooks").json(&json!({
                "name": name,
                "description": "",
            })))
            .await?;
        id_field(&created).map(|id| with_prefix(&id, NOTEBOOK_PREFIX))
    }

    async fn create(&self, title: &str, content: &str) -> Result<String, StoreError> {
        let created = self
            .send(self.request(Method::POST, "/api/sources/json").json(&json!({
                "type": "text",
                "title": title,
                "content": content,
                "embed": false,
            })))
            .await?;
        id_field(&created).map(|id| with_prefix(&id, SOURCE_PREFIX))
    }

    async fn set_tags(&self, id: &str, tags: &[String]) -> Result<(), StoreError> {
        let path = format!("/api/sources/{}", with_prefix(id, SOURCE_PREFIX));
        self.send(self.request(Method::PUT, &path).json(&json!({ "topics": tags })))
            .await
            .map(|_| ())
    }

    async fn link(&self, collection_id: &str, id: &str) -> Result<(), StoreError> {
        let path = format!(
            "/api/notebooks/{}/sources/{}",
            with_prefix(collection_id, NOTEBOOK_PREFIX),
            with_prefix(id, SOURCE_PREFIX)
        );
        self.send(self.request(Method::POST, &path)).await.map(|_| ())
    }

    async fn enable_index(&self, id: &str) -> Result<(), StoreError> {
        self.send(self.request(Method::POST, "/api/embed").json(&json!({
            "item_id": with_prefix(id, SOURCE_PREFIX),
            "item_type": "source",
            "async_processing": false,
        })))
        .await
        .map(|_| ())
    }

    async fn list_transformations(&self) -> Result<Vec<Transformation>, StoreError> {
        let value = self.send(self.request(Method::GET, "/api/transformations")).await?;
        transformation_list(value)
    }

    async fn create_insight(&self, id: &str, transformation_id: &str) -> Result<(), StoreError> {
        let path = format!("/api/sources/{}/insights", with_prefix(id, SOURCE_PREFIX));
        self.send(self.request(Method::POST, &path).json(&json!({
            "transformation_id": transformation_id,
        })))
        .await
        .map(|_| ())
    }
}
