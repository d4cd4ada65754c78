use std::time::Duration;

use anyhow::Context as _;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::chunk::{Chunk, chunk_markdown};
use crate::cli::InsertArgs;
use crate::client::RagClient;
use crate::crawl::{CrawlLimits, CrawlScope, crawl};
use crate::fetch::{RootKind, build_http_client, parse_root, resolve_root};
use crate::formats::InsertDocumentsRequest;

/// Stable per-document identifier derived from the source URL.
pub fn document_id(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Stable chunk identifier: re-inserting the same document upserts the same
/// ids, so repeated runs overwrite instead of duplicating.
pub fn chunk_id(source: &str, index: usize) -> String {
    format!("{}-{index}", document_id(source))
}

#[derive(Debug, Default)]
pub struct SubmitReport {
    pub batches_submitted: usize,
    pub batches_failed: usize,
    pub chunks_inserted: usize,
}

pub async fn run(args: InsertArgs) -> anyhow::Result<()> {
    let client = build_http_client(Duration::from_secs(args.page_timeout_secs))?;
    // Embedding a full batch server-side can take far longer than a page
    // fetch, so the service client gets its own timeout.
    let rag = RagClient::new(
        build_http_client(Duration::from_secs(120))?,
        &args.service_url,
    );
    rag.health()
        .await
        .with_context(|| format!("rag service health check at {}", args.service_url))?;
    tracing::info!(service = rag.base_url(), "rag service is healthy");

    let root = parse_root(&args.root).context("resolve crawl root")?;
    let (kind, seeds) = resolve_root(&client, &root).await?;
    let scope = CrawlScope::new(&root)?;

    // Sitemap and listing roots enumerate their pages up front; only regular
    // page roots recurse into discovered links.
    let max_depth = match kind {
        RootKind::Page => args.max_depth,
        RootKind::Sitemap | RootKind::TextListing => 0,
    };
    tracing::info!(?kind, seeds = seeds.len(), max_depth, "crawl starting");

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling crawl");
            interrupt.cancel();
        }
    });

    let limits = CrawlLimits {
        max_depth,
        max_concurrent: args.max_concurrent,
    };
    let outcome = crawl(&client, seeds, &scope, limits, &cancel).await;
    if cancel.is_cancelled() {
        anyhow::bail!("crawl cancelled; nothing inserted");
    }

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut documents_failed = 0usize;
    for page in &outcome.pages {
        match chunk_markdown(&page.content.text, page.content.url.as_str(), args.chunk_size) {
            Ok(mut page_chunks) => chunks.append(&mut page_chunks),
            Err(err) => {
                documents_failed += 1;
                tracing::error!(url = %page.content.url, %err, "chunking failed; skipping document");
            }
        }
    }

    if chunks.is_empty() {
        anyhow::bail!(
            "no chunks produced ({} pages fetched, {} failed)",
            outcome.pages.len(),
            outcome.failures.len()
        );
    }

    tracing::info!(
        chunks = chunks.len(),
        collection = %args.collection,
        "inserting chunks"
    );
    let report = submit_chunks(&rag, &args, &chunks).await;

    tracing::info!(
        pages_fetched = outcome.pages.len(),
        pages_failed = outcome.failures.len(),
        documents_failed,
        chunks_produced = chunks.len(),
        batches_submitted = report.batches_submitted,
        batches_failed = report.batches_failed,
        chunks_inserted = report.chunks_inserted,
        collection = %args.collection,
        "insert complete"
    );

    if report.batches_failed > 0 {
        anyhow::bail!(
            "{} of {} batches failed",
            report.batches_failed,
            report.batches_submitted + report.batches_failed
        );
    }
    Ok(())
}

/// Partitions `chunks` into contiguous batches of at most `batch_size` and
/// submits them in order. A failed batch is logged with its chunk ids and the
/// remaining batches still go out.
pub async fn submit_chunks(rag: &RagClient, args: &InsertArgs, chunks: &[Chunk]) -> SubmitReport {
    let mut report = SubmitReport::default();

    for (batch_no, batch) in chunks.chunks(args.batch_size).enumerate() {
        let ids: Vec<String> = batch
            .iter()
            .map(|chunk| chunk_id(&chunk.source, chunk.index))
            .collect();
        let request = InsertDocumentsRequest {
            documents: batch.iter().map(|chunk| chunk.text.clone()).collect(),
            metadatas: batch.iter().map(Chunk::metadata).collect(),
            ids: ids.clone(),
            collection_name: args.collection.clone(),
            embedding_model: Some(args.embedding_model.clone()),
            db_dir: Some(args.db_dir.clone()),
        };

        match rag.insert_documents(&request).await {
            Ok(response) => {
                report.batches_submitted += 1;
                report.chunks_inserted += response.count;
                tracing::info!(
                    batch = batch_no + 1,
                    count = response.count,
                    "batch inserted"
                );
            }
            Err(err) => {
                report.batches_failed += 1;
                tracing::error!(
                    batch = batch_no + 1,
                    %err,
                    failed_ids = ?ids,
                    "batch insert failed; continuing with next batch"
                );
            }
        }
    }

    report
}
