use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::cli::ServeArgs;
use crate::errors::StoreError;
use crate::fetch::build_http_client;
use crate::formats::{
    ErrorResponse, GenerateRequest, GenerateResponse, HealthResponse, InsertDocumentsRequest,
    InsertDocumentsResponse, RagQueryRequest, RagQueryResponse, RetrieveRequest, RetrieveResponse,
    RetrievedChunk,
};
use crate::llm::LlmClient;
use crate::store::{ChromaStore, VectorStore};

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

const RAG_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions based on \
the provided documentation. Use only the context provided to answer the question. If the \
context doesn't contain the answer, clearly state that the information isn't available in the \
current documentation.";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn VectorStore>,
    pub llm: Arc<LlmClient>,
}

pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    let client = build_http_client(Duration::from_secs(60))?;
    let store = Arc::new(ChromaStore::new(
        client.clone(),
        &args.chroma_url,
        &args.embedding_model,
    ));
    let llm = Arc::new(LlmClient::from_env(client));
    tracing::info!(model = llm.model(), chroma = %args.chroma_url, "service configured");

    let state = AppState { store, llm };
    let listener = tokio::net::TcpListener::bind(&args.addr)
        .await
        .with_context(|| format!("bind {}", args.addr))?;
    tracing::info!(addr = %args.addr, "docrag service listening");

    axum::serve(listener, router(state)).await.context("serve")
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/insert-documents", post(insert_documents))
        .route("/retrieve", post(retrieve))
        .route("/generate", post(generate))
        .route("/rag-query", post(rag_query))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(detail: String) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { detail }))
}

fn store_error(err: StoreError) -> ApiError {
    tracing::error!(%err, "storage collaborator failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            detail: err.to_string(),
        }),
    )
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_owned(),
        service: "docrag".to_owned(),
    })
}

async fn insert_documents(
    State(state): State<AppState>,
    Json(request): Json<InsertDocumentsRequest>,
) -> Result<Json<InsertDocumentsResponse>, ApiError> {
    if request.documents.len() != request.metadatas.len()
        || request.documents.len() != request.ids.len()
    {
        return Err(bad_request(
            "the number of documents, metadatas, and ids must be the same".to_owned(),
        ));
    }
    if let Some(db_dir) = request.db_dir.as_deref() {
        // The service owns its storage backend; the client's directory hint
        // is informational only.
        tracing::debug!(%db_dir, "client supplied db_dir");
    }

    state
        .store
        .upsert(
            &request.collection_name,
            &request.ids,
            &request.documents,
            &request.metadatas,
            request.embedding_model.as_deref(),
        )
        .await
        .map_err(store_error)?;

    let count = request.documents.len();
    Ok(Json(InsertDocumentsResponse {
        success: true,
        message: format!("successfully inserted {count} documents"),
        count,
    }))
}

async fn retrieve(
    State(state): State<AppState>,
    Json(request): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>, ApiError> {
    let chunks = state
        .store
        .query(&request.collection_name, &request.query, request.n_results)
        .await
        .map_err(store_error)?;

    Ok(Json(RetrieveResponse {
        context: format_context(&chunks),
        chunks,
    }))
}

async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let text = state
        .llm
        .generate(
            &request.prompt,
            request.system_prompt.as_deref(),
            request.temperature,
            request.max_tokens,
        )
        .await
        .map_err(|err| {
            tracing::error!(%err, "generation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    detail: err.to_string(),
                }),
            )
        })?;

    Ok(Json(GenerateResponse { text }))
}

/// Retrieve-then-generate. Generation failure degrades the response to the
/// retrieved context instead of failing the whole request.
async fn rag_query(
    State(state): State<AppState>,
    Json(request): Json<RagQueryRequest>,
) -> Result<Json<RagQueryResponse>, ApiError> {
    let chunks = state
        .store
        .query(&request.collection_name, &request.query, request.n_results)
        .await
        .map_err(store_error)?;
    let context = format_context(&chunks);

    let prompt = format!(
        "Context:\n{context}\n\nQuestion: {}\n\nAnswer:",
        request.query
    );
    match state
        .llm
        .generate(
            &prompt,
            Some(RAG_SYSTEM_PROMPT),
            request.temperature,
            request.max_tokens,
        )
        .await
    {
        Ok(answer) => Ok(Json(RagQueryResponse {
            answer: Some(answer),
            context,
            generation_error: None,
        })),
        Err(err) => {
            tracing::warn!(%err, "generation failed; returning retrieved context only");
            Ok(Json(RagQueryResponse {
                answer: None,
                context,
                generation_error: Some(err.to_string()),
            }))
        }
    }
}

fn format_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|c| c.document.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}
