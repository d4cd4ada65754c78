use std::time::Duration;

use anyhow::Context as _;

use crate::cli::QueryArgs;
use crate::errors::StoreError;
use crate::fetch::build_http_client;
use crate::formats::{
    InsertDocumentsRequest, InsertDocumentsResponse, RagQueryRequest, RagQueryResponse,
    RetrieveRequest, RetrieveResponse,
};

/// `docrag query`: ask the service a question and print the answer (or the
/// retrieved context when generation is unavailable).
pub async fn run(args: QueryArgs) -> anyhow::Result<()> {
    let client = build_http_client(Duration::from_secs(120))?;
    let rag = RagClient::new(client, &args.service_url);

    if args.retrieve_only {
        let response = rag
            .retrieve(&RetrieveRequest {
                query: args.query,
                n_results: args.n_results,
                collection_name: args.collection,
            })
            .await?;
        println!("{}", response.context);
        return Ok(());
    }

    let response = rag
        .rag_query(&RagQueryRequest {
            query: args.query,
            n_results: args.n_results,
            collection_name: args.collection,
            temperature: args.temperature,
            max_tokens: args.max_tokens,
        })
        .await?;

    match response.answer {
        Some(answer) => println!("{answer}"),
        None => {
            if let Some(err) = response.generation_error {
                tracing::warn!(%err, "no generated answer; printing retrieved context");
            }
            println!("{}", response.context);
        }
    }
    Ok(())
}

/// HTTP client for the docrag service. The insert pipeline and the `query`
/// subcommand go through this rather than talking to the store directly.
pub struct RagClient {
    client: reqwest::Client,
    base_url: String,
}

impl RagClient {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> anyhow::Result<()> {
        let endpoint = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&endpoint)
            .send()
            .await
            .with_context(|| format!("GET {endpoint}"))?;
        if !response.status().is_success() {
            anyhow::bail!("service unhealthy at {endpoint}: status {}", response.status());
        }
        Ok(())
    }

    pub async fn insert_documents(
        &self,
        request: &InsertDocumentsRequest,
    ) -> Result<InsertDocumentsResponse, StoreError> {
        let endpoint = format!("{}/insert-documents", self.base_url);
        let response = self.client.post(&endpoint).json(request).send().await?;
        let status = response.status();
        let raw = response.text().await?;
        if !status.is_success() {
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                detail: error_detail(&raw),
            });
        }
        serde_json::from_str(&raw).map_err(|err| StoreError::Malformed(err.to_string()))
    }

    pub async fn retrieve(&self, request: &RetrieveRequest) -> anyhow::Result<RetrieveResponse> {
        let endpoint = format!("{}/retrieve", self.base_url);
        self.post(&endpoint, request).await
    }

    pub async fn rag_query(&self, request: &RagQueryRequest) -> anyhow::Result<RagQueryResponse> {
        let endpoint = format!("{}/rag-query", self.base_url);
        self.post(&endpoint, request).await
    }

    async fn post<Req, Resp>(&self, endpoint: &str, request: &Req) -> anyhow::Result<Resp>
    where
        Req: serde::Serialize,
        Resp: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .post(endpoint)
            .json(request)
            .send()
            .await
            .with_context(|| format!("POST {endpoint}"))?;
        let status = response.status();
        let raw = response.text().await.context("read service response")?;
        if !status.is_success() {
            anyhow::bail!("service error ({status}): {}", error_detail(&raw));
        }
        serde_json::from_str(&raw).with_context(|| format!("parse response from {endpoint}"))
    }
}

/// Pulls the `detail` field out of a service error body when there is one.
fn error_detail(raw: &str) -> String {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_owned))
        .unwrap_or_else(|| raw.to_owned())
}
