use thiserror::Error;

/// The crawl root could not be resolved into any seed URL. Fatal to the run.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("root url is not valid: {0}")]
    InvalidRoot(String),

    #[error("root url must be http/https: {0}")]
    UnsupportedScheme(String),
}

/// A single page could not be fetched. Recorded and skipped, never fatal.
#[derive(Debug, Error)]
pub enum PageFetchError {
    #[error("request timed out")]
    Timeout,

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("unsupported content type: {0}")]
    ContentType(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for PageFetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PageFetchError::Timeout
        } else {
            PageFetchError::Request(err.to_string())
        }
    }
}

/// A produced chunk exceeded the configured size after every splitting
/// strategy. Indicates a bug in the splitter; fatal to that document only.
/// The field is `source_url` rather than `source` so thiserror does not
/// treat it as an error cause.
#[derive(Debug, Error)]
#[error("chunk {index} of {source_url} is {char_count} chars, exceeds max {max_size}")]
pub struct ChunkOverflow {
    pub source_url: String,
    pub index: usize,
    pub char_count: usize,
    pub max_size: usize,
}

/// The storage collaborator rejected an operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage request failed: {0}")]
    Request(String),

    #[error("storage returned status {status}: {detail}")]
    Rejected { status: u16, detail: String },

    #[error("unexpected storage response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Request(err.to_string())
    }
}

/// The answer-generation collaborator failed.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Network trouble or a 5xx from the gateway; retryable.
    #[error("generation failed (transient): {0}")]
    Transient(String),

    /// Bad credentials, unknown model, malformed request; not retryable.
    #[error("generation misconfigured: {0}")]
    Config(String),
}
