use std::collections::HashSet;
use std::time::Duration;

use anyhow::Context as _;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use url::Url;

use crate::errors::{FetchError, PageFetchError};

const USER_AGENT_VALUE: &str = "docrag/0.1";
const ACCEPT_VALUE: &str =
    "text/html,application/xhtml+xml;q=0.9,text/plain;q=0.8,application/xml;q=0.7,*/*;q=0.5";
const MAX_SITEMAP_LOCS: usize = 20_000;

/// What kind of crawl root the caller handed us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    Sitemap,
    TextListing,
    Page,
}

/// One successfully fetched page. Immutable after the fetch.
#[derive(Debug, Clone)]
pub struct PageContent {
    pub url: Url,
    pub text: String,
    pub links: Vec<Url>,
    pub fetched_at: chrono::DateTime<chrono::Utc>,
}

pub fn build_http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .context("build http client")
}

pub fn parse_root(input: &str) -> Result<Url, FetchError> {
    let url = Url::parse(input).map_err(|_| FetchError::InvalidRoot(input.to_owned()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(FetchError::UnsupportedScheme(input.to_owned()));
    }
    Ok(normalize_url(&url))
}

pub fn classify_root(url: &Url) -> RootKind {
    let path = url.path();
    if path.ends_with("sitemap.xml") || path.contains("sitemap") {
        RootKind::Sitemap
    } else if path.ends_with(".txt") {
        RootKind::TextListing
    } else {
        RootKind::Page
    }
}

/// Resolves the crawl root into seed URLs.
///
/// A sitemap or `.txt` listing that cannot be fetched or yields no usable
/// URLs degrades to treating the root as a single page rather than aborting.
/// A plain page root that is malformed is fatal.
pub async fn resolve_root(
    client: &reqwest::Client,
    root: &Url,
) -> Result<(RootKind, Vec<Url>), FetchError> {
    match classify_root(root) {
        RootKind::Page => Ok((RootKind::Page, vec![root.clone()])),
        RootKind::Sitemap => {
            let seeds = match fetch_listing_body(client, root).await {
                Ok(body) => parse_sitemap(&body),
                Err(err) => {
                    tracing::warn!(url = %root, %err, "sitemap fetch failed; treating root as a page");
                    return Ok((RootKind::Page, vec![root.clone()]));
                }
            };
            if seeds.is_empty() {
                tracing::warn!(url = %root, "no urls found in sitemap; treating root as a page");
                return Ok((RootKind::Page, vec![root.clone()]));
            }
            Ok((RootKind::Sitemap, seeds))
        }
        RootKind::TextListing => {
            let seeds = match fetch_listing_body(client, root).await {
                Ok(body) => parse_url_lines(&body),
                Err(err) => {
                    tracing::warn!(url = %root, %err, "url listing fetch failed; treating root as a page");
                    return Ok((RootKind::Page, vec![root.clone()]));
                }
            };
            if seeds.is_empty() {
                tracing::warn!(url = %root, "no urls found in listing; treating root as a page");
                return Ok((RootKind::Page, vec![root.clone()]));
            }
            Ok((RootKind::TextListing, seeds))
        }
    }
}

async fn fetch_listing_body(client: &reqwest::Client, url: &Url) -> Result<String, PageFetchError> {
    let response = client
        .get(url.clone())
        .header(USER_AGENT, USER_AGENT_VALUE)
        .header(ACCEPT, ACCEPT_VALUE)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(PageFetchError::Status(status.as_u16()));
    }
    Ok(response.text().await?)
}

/// Scans sitemap XML for `<loc>` entries. Tolerant of namespaces and
/// sitemap-index documents; anything that does not parse as a URL is skipped.
pub fn parse_sitemap(xml: &str) -> Vec<Url> {
    let lower = xml.to_ascii_lowercase();
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    let mut pos = 0usize;
    while urls.len() < MAX_SITEMAP_LOCS {
        let Some(start_rel) = lower[pos..].find("<loc>") else {
            break;
        };
        let start = pos + start_rel + "<loc>".len();
        let Some(end_rel) = lower[start..].find("</loc>") else {
            break;
        };
        let end = start + end_rel;
        pos = end + "</loc>".len();

        let Ok(url) = Url::parse(xml[start..end].trim()) else {
            continue;
        };
        if url.scheme() != "http" && url.scheme() != "https" {
            continue;
        }
        let url = normalize_url(&url);
        if seen.insert(url.to_string()) {
            urls.push(url);
        }
    }

    urls
}

/// Parses a `.txt` listing: one URL per line, `#` comments and blanks skipped.
pub fn parse_url_lines(text: &str) -> Vec<Url> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Ok(url) = Url::parse(line) else {
            tracing::debug!(%line, "skipping unparsable listing line");
            continue;
        };
        if url.scheme() != "http" && url.scheme() != "https" {
            continue;
        }
        let url = normalize_url(&url);
        if seen.insert(url.to_string()) {
            urls.push(url);
        }
    }
    urls
}

/// Fetches one page and extracts its Markdown text and outbound links.
pub async fn fetch_page(
    client: &reqwest::Client,
    url: &Url,
) -> Result<PageContent, PageFetchError> {
    let response = client
        .get(url.clone())
        .header(USER_AGENT, USER_AGENT_VALUE)
        .header(ACCEPT, ACCEPT_VALUE)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(PageFetchError::Status(status.as_u16()));
    }

    let final_url = normalize_url(response.url());
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("text/html")
        .to_ascii_lowercase();

    let body = response.text().await?;
    let fetched_at = chrono::Utc::now();

    if content_type.starts_with("text/html") || content_type.starts_with("application/xhtml+xml") {
        let links = extract_links(&body, &final_url);
        Ok(PageContent {
            url: final_url,
            text: html2md::parse_html(&body),
            links,
            fetched_at,
        })
    } else if content_type.starts_with("text/plain") || content_type.starts_with("text/markdown") {
        Ok(PageContent {
            url: final_url,
            text: body,
            links: Vec::new(),
            fetched_at,
        })
    } else {
        Err(PageFetchError::ContentType(content_type))
    }
}

/// Pulls `a[href]` targets out of `html`, resolved against `base`.
/// Only http/https links survive; fragments and queries are stripped.
fn extract_links(html: &str, base: &Url) -> Vec<Url> {
    let document = scraper::Html::parse_document(html);
    let selector = scraper::Selector::parse("a[href]").expect("static selector");

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(resolved) = base.join(href) else {
            continue;
        };
        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            continue;
        }
        let resolved = normalize_url(&resolved);
        if seen.insert(resolved.to_string()) {
            links.push(resolved);
        }
    }
    links
}

/// Drops the fragment and query so equivalent pages dedupe to one URL.
pub fn normalize_url(url: &Url) -> Url {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    normalized.set_query(None);
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).expect("parse test url")
    }

    #[test]
    fn classifies_roots() {
        assert_eq!(
            classify_root(&url("https://example.com/sitemap.xml")),
            RootKind::Sitemap
        );
        assert_eq!(
            classify_root(&url("https://example.com/sitemaps/pages")),
            RootKind::Sitemap
        );
        assert_eq!(
            classify_root(&url("https://example.com/llms.txt")),
            RootKind::TextListing
        );
        assert_eq!(
            classify_root(&url("https://example.com/docs/intro")),
            RootKind::Page
        );
    }

    #[test]
    fn parses_sitemap_locs() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://example.com/a</loc></url>
  <url><LOC>https://example.com/b#frag</LOC></url>
  <url><loc>not a url</loc></url>
  <url><loc>https://example.com/a</loc></url>
</urlset>"#;
        let urls = parse_sitemap(xml);
        assert_eq!(
            urls.iter().map(Url::as_str).collect::<Vec<_>>(),
            vec!["https://example.com/a", "https://example.com/b"]
        );
    }

    #[test]
    fn parses_url_listing_lines() {
        let text = "# comment\nhttps://example.com/a\n\nftp://example.com/skip\nhttps://example.com/b?utm=1\n";
        let urls = parse_url_lines(text);
        assert_eq!(
            urls.iter().map(Url::as_str).collect::<Vec<_>>(),
            vec!["https://example.com/a", "https://example.com/b"]
        );
    }

    #[test]
    fn extracts_and_normalizes_links() {
        let html = r#"<html><body>
            <a href="/docs/one?ref=nav#top">One</a>
            <a href="two">Two</a>
            <a href="mailto:x@example.com">Mail</a>
            <a href="https://other.example.org/ext">Ext</a>
            <a href="/docs/one">Dup</a>
        </body></html>"#;
        let links = extract_links(html, &url("https://example.com/docs/"));
        assert_eq!(
            links.iter().map(Url::as_str).collect::<Vec<_>>(),
            vec![
                "https://example.com/docs/one",
                "https://example.com/docs/two",
                "https://other.example.org/ext",
            ]
        );
    }
}
