use serde::{Deserialize, Serialize};

fn default_collection() -> String {
    "docs".to_owned()
}

fn default_n_results() -> usize {
    5
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertDocumentsRequest {
    pub documents: Vec<String>,
    pub metadatas: Vec<serde_json::Value>,
    pub ids: Vec<String>,
    #[serde(default = "default_collection")]
    pub collection_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertDocumentsResponse {
    pub success: bool,
    pub message: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveRequest {
    pub query: String,
    #[serde(default = "default_n_results")]
    pub n_results: usize,
    #[serde(default = "default_collection")]
    pub collection_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub document: String,
    pub metadata: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveResponse {
    pub context: String,
    pub chunks: Vec<RetrievedChunk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagQueryRequest {
    pub query: String,
    #[serde(default = "default_n_results")]
    pub n_results: usize,
    #[serde(default = "default_collection")]
    pub collection_name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

/// `answer` is absent when the generation collaborator failed; the retrieved
/// context is still returned so the caller gets a degraded-but-useful reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagQueryResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}
