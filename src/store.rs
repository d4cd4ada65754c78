use async_trait::async_trait;

use crate::errors::StoreError;
use crate::formats::RetrievedChunk;

/// The narrow interface the core needs from a vector store: idempotent
/// per-id upsert and similarity query. Everything else is the store's
/// business. `embedding_model` applies when the upsert creates the
/// collection; `None` means the store's configured default.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(
        &self,
        collection: &str,
        ids: &[String],
        documents: &[String],
        metadatas: &[serde_json::Value],
        embedding_model: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn query(
        &self,
        collection: &str,
        query_text: &str,
        n_results: usize,
    ) -> Result<Vec<RetrievedChunk>, StoreError>;
}

/// Thin client for a Chroma server's HTTP API.
pub struct ChromaStore {
    client: reqwest::Client,
    base_url: String,
    embedding_model: String,
}

impl ChromaStore {
    pub fn new(client: reqwest::Client, base_url: &str, embedding_model: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            embedding_model: embedding_model.to_owned(),
        }
    }

    /// Resolves a collection name to its id, creating it on first use with
    /// the embedding-model identifier recorded as collection metadata. A
    /// caller-supplied model takes precedence over the configured default.
    async fn ensure_collection(
        &self,
        name: &str,
        embedding_model: Option<&str>,
    ) -> Result<String, StoreError> {
        let endpoint = format!("{}/api/v1/collections", self.base_url);
        let model = embedding_model.unwrap_or(&self.embedding_model);
        let body = serde_json::json!({
            "name": name,
            "get_or_create": true,
            "metadata": { "embedding_model": model },
        });

        let value = self.post_json(&endpoint, &body).await?;
        value
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .ok_or_else(|| StoreError::Malformed("collection response missing `id`".to_owned()))
    }

    async fn post_json(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, StoreError> {
        let response = self.client.post(endpoint).json(body).send().await?;
        let status = response.status();
        let raw = response.text().await?;
        if !status.is_success() {
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                detail: raw,
            });
        }
        serde_json::from_str(&raw).map_err(|err| StoreError::Malformed(err.to_string()))
    }
}

#[async_trait]
impl VectorStore for ChromaStore {
    async fn upsert(
        &self,
        collection: &str,
        ids: &[String],
        documents: &[String],
        metadatas: &[serde_json::Value],
        embedding_model: Option<&str>,
    ) -> Result<(), StoreError> {
        let id = self.ensure_collection(collection, embedding_model).await?;
        let endpoint = format!("{}/api/v1/collections/{id}/upsert", self.base_url);
        let body = serde_json::json!({
            "ids": ids,
            "documents": documents,
            "metadatas": metadatas,
        });
        self.post_json(&endpoint, &body).await?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        query_text: &str,
        n_results: usize,
    ) -> Result<Vec<RetrievedChunk>, StoreError> {
        let id = self.ensure_collection(collection, None).await?;
        let endpoint = format!("{}/api/v1/collections/{id}/query", self.base_url);
        let body = serde_json::json!({
            "query_texts": [query_text],
            "n_results": n_results,
            "include": ["documents", "metadatas", "distances"],
        });
        let value = self.post_json(&endpoint, &body).await?;
        parse_query_response(&value)
    }
}

/// Chroma returns one parallel row of arrays per query text; we always send
/// exactly one query, so only the first row matters.
fn parse_query_response(value: &serde_json::Value) -> Result<Vec<RetrievedChunk>, StoreError> {
    let row = |key: &str| value.get(key).and_then(|v| v.as_array()).and_then(|rows| {
        rows.first().and_then(|r| r.as_array())
    });

    let ids = row("ids")
        .ok_or_else(|| StoreError::Malformed("query response missing `ids`".to_owned()))?;
    let documents = row("documents")
        .ok_or_else(|| StoreError::Malformed("query response missing `documents`".to_owned()))?;
    let metadatas = row("metadatas");
    let distances = row("distances");

    let mut chunks = Vec::with_capacity(ids.len());
    for (i, id) in ids.iter().enumerate() {
        let Some(id) = id.as_str() else {
            continue;
        };
        let document = documents
            .get(i)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned();
        let metadata = metadatas
            .and_then(|m| m.get(i))
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let distance = distances.and_then(|d| d.get(i)).and_then(|v| v.as_f64());
        chunks.push(RetrievedChunk {
            id: id.to_owned(),
            document,
            metadata,
            distance,
        });
    }

    Ok(chunks)
}
