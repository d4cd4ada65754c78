use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Crawl a root URL, chunk the content, and insert it into a collection.
    Insert(InsertArgs),
    /// Run the RAG HTTP service.
    Serve(ServeArgs),
    /// Ask the service a question (retrieval, optionally with a generated answer).
    Query(QueryArgs),
}

#[derive(Debug, Args)]
pub struct InsertArgs {
    /// Root to crawl: a page URL, a `.txt` URL listing, or an XML sitemap.
    pub root: String,

    /// Collection name to insert into.
    #[arg(long, default_value = "docs")]
    pub collection: String,

    /// Storage directory hint forwarded to the service.
    #[arg(long, default_value = "./chroma_db")]
    pub db_dir: String,

    /// Embedding model identifier recorded on the collection.
    #[arg(long, default_value = "all-MiniLM-L6-v2")]
    pub embedding_model: String,

    /// Maximum chunk size in characters.
    #[arg(long, default_value_t = 1000, value_parser = positive_usize)]
    pub chunk_size: usize,

    /// Maximum link depth for regular page roots.
    #[arg(long, default_value_t = 3, value_parser = positive_u32)]
    pub max_depth: u32,

    /// Maximum concurrent page fetches.
    #[arg(long, default_value_t = 10, value_parser = positive_usize)]
    pub max_concurrent: usize,

    /// Chunks per insert batch.
    #[arg(long, default_value_t = 100, value_parser = positive_usize)]
    pub batch_size: usize,

    /// Per-page fetch timeout in seconds.
    #[arg(long, default_value_t = 30, value_parser = positive_u64)]
    pub page_timeout_secs: u64,

    /// RAG service URL.
    #[arg(long, env = "RAG_SERVICE_URL", default_value = "http://localhost:8000")]
    pub service_url: String,
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Listen address.
    #[arg(long, default_value = "0.0.0.0:8000")]
    pub addr: String,

    /// Chroma server URL.
    #[arg(long, env = "CHROMA_URL", default_value = "http://localhost:8001")]
    pub chroma_url: String,

    /// Embedding model identifier recorded on newly created collections.
    #[arg(long, env = "EMBEDDING_MODEL", default_value = "all-MiniLM-L6-v2")]
    pub embedding_model: String,
}

#[derive(Debug, Args)]
pub struct QueryArgs {
    /// The question to ask.
    pub query: String,

    /// Collection name to query.
    #[arg(long, default_value = "docs")]
    pub collection: String,

    /// Number of chunks to retrieve.
    #[arg(long, default_value_t = 5, value_parser = positive_usize)]
    pub n_results: usize,

    /// Sampling temperature for the generated answer.
    #[arg(long, default_value_t = 0.7)]
    pub temperature: f32,

    /// Token budget for the generated answer.
    #[arg(long, default_value_t = 1000, value_parser = positive_u32)]
    pub max_tokens: u32,

    /// Skip generation and print the retrieved context only.
    #[arg(long)]
    pub retrieve_only: bool,

    /// RAG service URL.
    #[arg(long, env = "RAG_SERVICE_URL", default_value = "http://localhost:8000")]
    pub service_url: String,
}

fn positive_usize(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(v) if v > 0 => Ok(v),
        Ok(_) => Err("must be a positive integer".to_owned()),
        Err(err) => Err(err.to_string()),
    }
}

fn positive_u32(s: &str) -> Result<u32, String> {
    match s.parse::<u32>() {
        Ok(v) if v > 0 => Ok(v),
        Ok(_) => Err("must be a positive integer".to_owned()),
        Err(err) => Err(err.to_string()),
    }
}

fn positive_u64(s: &str) -> Result<u64, String> {
    match s.parse::<u64>() {
        Ok(v) if v > 0 => Ok(v),
        Ok(_) => Err("must be a positive integer".to_owned()),
        Err(err) => Err(err.to_string()),
    }
}
