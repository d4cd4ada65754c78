use std::collections::{HashSet, VecDeque};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::errors::{FetchError, PageFetchError};
use crate::fetch::{PageContent, fetch_page, normalize_url};

/// Same-origin policy for followed links: scheme, host, and port of the root.
#[derive(Debug, Clone)]
pub struct CrawlScope {
    scheme: String,
    host: String,
    port: Option<u16>,
}

impl CrawlScope {
    pub fn new(root: &Url) -> Result<Self, FetchError> {
        let host = root
            .host_str()
            .ok_or_else(|| FetchError::InvalidRoot(root.to_string()))?
            .to_owned();
        Ok(Self {
            scheme: root.scheme().to_owned(),
            host,
            port: root.port(),
        })
    }

    pub fn is_in_scope(&self, url: &Url) -> bool {
        url.scheme() == self.scheme
            && url.host_str() == Some(self.host.as_str())
            && url.port() == self.port
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CrawlLimits {
    pub max_depth: u32,
    pub max_concurrent: usize,
}

#[derive(Debug)]
struct CrawlTarget {
    url: Url,
    depth: u32,
}

#[derive(Debug)]
pub struct CrawledPage {
    pub depth: u32,
    pub content: PageContent,
}

#[derive(Debug)]
pub struct FailedPage {
    pub url: Url,
    pub depth: u32,
    pub error: PageFetchError,
}

#[derive(Debug, Default)]
pub struct CrawlOutcome {
    pub pages: Vec<CrawledPage>,
    pub failures: Vec<FailedPage>,
}

/// Breadth-first crawl from `seeds`, bounded by depth and concurrency.
///
/// A single scheduling loop owns the pending queue, the visited set, and the
/// in-flight `JoinSet`; a URL is claimed in the visited set before its fetch
/// is spawned, so it is fetched at most once per run. Links discovered at
/// depth d are enqueued at d+1 only while d < `max_depth` and only when they
/// match `scope`. Page failures are recorded and never block other fetches.
/// When `cancel` fires, no new fetches start and in-flight work is abandoned.
pub async fn crawl(
    client: &reqwest::Client,
    seeds: Vec<Url>,
    scope: &CrawlScope,
    limits: CrawlLimits,
    cancel: &CancellationToken,
) -> CrawlOutcome {
    let max_concurrent = limits.max_concurrent.max(1);
    let mut pending: VecDeque<CrawlTarget> = seeds
        .into_iter()
        .map(|url| CrawlTarget {
            url: normalize_url(&url),
            depth: 0,
        })
        .collect();
    let mut visited: HashSet<String> = HashSet::new();
    let mut in_flight: JoinSet<(CrawlTarget, Result<PageContent, PageFetchError>)> = JoinSet::new();
    let mut outcome = CrawlOutcome::default();

    loop {
        while in_flight.len() < max_concurrent && !cancel.is_cancelled() {
            let Some(target) = pending.pop_front() else {
                break;
            };
            if !visited.insert(target.url.to_string()) {
                continue;
            }
            let client = client.clone();
            in_flight.spawn(async move {
                let result = fetch_page(&client, &target.url).await;
                (target, result)
            });
        }

        if in_flight.is_empty() {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("crawl cancelled; abandoning in-flight fetches");
                in_flight.shutdown().await;
                break;
            }
            joined = in_flight.join_next() => {
                let Some(joined) = joined else { continue };
                let (target, result) = match joined {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(%err, "fetch task aborted");
                        continue;
                    }
                };
                match result {
                    Ok(content) => {
                        if target.depth < limits.max_depth {
                            for link in &content.links {
                                if scope.is_in_scope(link) && !visited.contains(link.as_str()) {
                                    pending.push_back(CrawlTarget {
                                        url: link.clone(),
                                        depth: target.depth + 1,
                                    });
                                }
                            }
                        }
                        tracing::debug!(url = %content.url, depth = target.depth, "fetched page");
                        outcome.pages.push(CrawledPage {
                            depth: target.depth,
                            content,
                        });
                    }
                    Err(error) => {
                        tracing::warn!(url = %target.url, depth = target.depth, %error, "page fetch failed; continuing");
                        outcome.failures.push(FailedPage {
                            url: target.url,
                            depth: target.depth,
                            error,
                        });
                    }
                }
            }
        }
    }

    outcome
}
