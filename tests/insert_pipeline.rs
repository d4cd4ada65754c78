use std::collections::HashSet;
use std::io::Read as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use predicates::prelude::*;

const GUIDE_MD: &str = "# Guide\n\nIntro paragraph.\n\n## Setup\n\nInstall things.\n\n## Usage\n\nRun things.\n";

const THREE_SECTIONS_MD: &str = "# One\n\nFirst section body.\n\n# Two\n\nSecond section body.\n\n# Three\n\nThird section body.\n";

/// Serves canned docs pages: `routes` maps a path to (content-type, body).
fn spawn_docs_server(
    routes: Vec<(&'static str, &'static str, String)>,
) -> (String, mpsc::Sender<()>, thread::JoinHandle<()>) {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start docs server");
    let addr = server.server_addr();
    let base_url = format!("http://{addr}");

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    let handle = thread::spawn(move || {
        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            let request = match server.recv_timeout(Duration::from_millis(50)) {
                Ok(Some(req)) => req,
                Ok(None) => continue,
                Err(_) => break,
            };

            let path = request.url().split('?').next().unwrap_or("").to_owned();
            let Some((_, content_type, body)) = routes.iter().find(|(p, _, _)| *p == path) else {
                let _ = request
                    .respond(tiny_http::Response::from_string("not found").with_status_code(404));
                continue;
            };

            let header =
                tiny_http::Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes())
                    .expect("build header");
            let _ = request.respond(tiny_http::Response::from_string(body.clone()).with_header(header));
        }
    });

    (base_url, shutdown_tx, handle)
}

/// Stand-in for the docrag service: answers /health, records every
/// /insert-documents body, and optionally fails the nth insert request.
struct RagStub {
    base_url: String,
    requests: Arc<std::sync::Mutex<Vec<serde_json::Value>>>,
    shutdown: mpsc::Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl RagStub {
    fn spawn(fail_request: Option<usize>) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start rag stub");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");

        let requests = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);
        let insert_counter = AtomicUsize::new(0);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }
                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let path = request.url().split('?').next().unwrap_or("").to_owned();
                let (status, body) = match (request.method().clone(), path.as_str()) {
                    (tiny_http::Method::Get, "/health") => (
                        200,
                        r#"{"status":"healthy","service":"docrag"}"#.to_owned(),
                    ),
                    (tiny_http::Method::Post, "/insert-documents") => {
                        let mut raw = String::new();
                        if request.as_reader().read_to_string(&mut raw).is_err() {
                            let _ = request.respond(
                                tiny_http::Response::from_string("read failed")
                                    .with_status_code(400),
                            );
                            continue;
                        }
                        let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&raw) else {
                            let _ = request.respond(
                                tiny_http::Response::from_string("invalid json")
                                    .with_status_code(400),
                            );
                            continue;
                        };
                        recorded.lock().expect("requests lock").push(parsed.clone());

                        let seen = insert_counter.fetch_add(1, Ordering::SeqCst);
                        if fail_request == Some(seen) {
                            (500, r#"{"detail":"vector store unavailable"}"#.to_owned())
                        } else {
                            let count = parsed["documents"]
                                .as_array()
                                .map(Vec::len)
                                .unwrap_or_default();
                            (
                                200,
                                format!(
                                    r#"{{"success":true,"message":"inserted","count":{count}}}"#
                                ),
                            )
                        }
                    }
                    _ => (404, r#"{"detail":"not found"}"#.to_owned()),
                };

                let header = tiny_http::Header::from_bytes(
                    &b"Content-Type"[..],
                    &b"application/json"[..],
                )
                .expect("build header");
                let _ = request.respond(
                    tiny_http::Response::from_string(body)
                        .with_status_code(status)
                        .with_header(header),
                );
            }
        });

        Self {
            base_url,
            requests,
            shutdown: shutdown_tx,
            handle: Some(handle),
        }
    }

    fn insert_requests(&self) -> Vec<serde_json::Value> {
        self.requests.lock().expect("requests lock").clone()
    }

    fn recorded_ids(&self) -> Vec<String> {
        self.insert_requests()
            .iter()
            .flat_map(|req| {
                req["ids"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|id| id.as_str().map(str::to_owned))
            })
            .collect()
    }

    fn recorded_sources(&self) -> HashSet<String> {
        self.insert_requests()
            .iter()
            .flat_map(|req| {
                req["metadatas"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| m["source"].as_str().map(str::to_owned))
            })
            .collect()
    }
}

impl Drop for RagStub {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn is_chunk_id(id: &str) -> bool {
    let Some((doc, index)) = id.rsplit_once('-') else {
        return false;
    };
    doc.len() == 32
        && doc.chars().all(|c| c.is_ascii_hexdigit())
        && index.chars().all(|c| c.is_ascii_digit())
}

#[test]
fn reinserting_a_page_produces_the_same_ids() {
    let (docs_url, docs_shutdown, docs_handle) = spawn_docs_server(vec![(
        "/docs/guide",
        "text/markdown; charset=utf-8",
        GUIDE_MD.to_owned(),
    )]);
    let stub = RagStub::spawn(None);
    let page_url = format!("{docs_url}/docs/guide");

    for _ in 0..2 {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("docrag");
        cmd.env("RUST_LOG", "info")
            .args([
                "insert",
                &page_url,
                "--service-url",
                &stub.base_url,
                "--max-depth",
                "1",
            ])
            .assert()
            .success()
            .stderr(predicate::str::contains("insert complete"));
    }

    let requests = stub.insert_requests();
    assert_eq!(requests.len(), 2, "one batch per run");

    let first_ids = requests[0]["ids"].clone();
    let second_ids = requests[1]["ids"].clone();
    assert_eq!(first_ids, second_ids, "re-runs must upsert the same ids");

    let ids = stub.recorded_ids();
    assert!(!ids.is_empty());
    for id in &ids {
        assert!(is_chunk_id(id), "unexpected id shape: {id}");
    }

    let metadata = &requests[0]["metadatas"][0];
    assert_eq!(metadata["source"].as_str(), Some(page_url.as_str()));
    assert!(metadata["headers"].is_string());
    assert!(metadata["chunk_index"].is_number());

    let _ = docs_shutdown.send(());
    let _ = docs_handle.join();
}

#[test]
fn a_failed_batch_does_not_stop_the_remaining_batches() {
    let (docs_url, docs_shutdown, docs_handle) = spawn_docs_server(vec![(
        "/docs/sections",
        "text/markdown; charset=utf-8",
        THREE_SECTIONS_MD.to_owned(),
    )]);
    // Fail the second of the three single-chunk batches.
    let stub = RagStub::spawn(Some(1));
    let page_url = format!("{docs_url}/docs/sections");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("docrag");
    cmd.args([
        "insert",
        &page_url,
        "--service-url",
        &stub.base_url,
        "--max-depth",
        "1",
        "--batch-size",
        "1",
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("batches failed"));

    assert_eq!(
        stub.insert_requests().len(),
        3,
        "batches after the failure must still be submitted"
    );

    let _ = docs_shutdown.send(());
    let _ = docs_handle.join();
}

#[test]
fn sitemap_root_inserts_listed_pages_without_recursing() {
    // The sitemap body needs the server's own base URL, so spawn by hand
    // instead of going through spawn_docs_server.
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start docs server");
    let docs_url = format!("http://{}", server.server_addr());

    let sitemap = format!(
        "<?xml version=\"1.0\"?><urlset><url><loc>{docs_url}/docs/a</loc></url><url><loc>{docs_url}/docs/b</loc></url></urlset>"
    );
    let page_a = format!(
        "<html><body><h1>Page A</h1><p>Alpha.</p><a href=\"{docs_url}/docs/extra\">Extra</a></body></html>"
    );
    let page_b = "<html><body><h1>Page B</h1><p>Beta.</p></body></html>".to_owned();
    let extra = "<html><body><h1>Extra</h1><p>Must not be inserted.</p></body></html>".to_owned();

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
    let handle = thread::spawn(move || {
        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            let request = match server.recv_timeout(Duration::from_millis(50)) {
                Ok(Some(req)) => req,
                Ok(None) => continue,
                Err(_) => break,
            };
            let path = request.url().split('?').next().unwrap_or("").to_owned();
            let (content_type, body) = match path.as_str() {
                "/sitemap.xml" => ("application/xml", sitemap.clone()),
                "/docs/a" => ("text/html; charset=utf-8", page_a.clone()),
                "/docs/b" => ("text/html; charset=utf-8", page_b.clone()),
                "/docs/extra" => ("text/html; charset=utf-8", extra.clone()),
                _ => {
                    let _ = request.respond(
                        tiny_http::Response::from_string("not found").with_status_code(404),
                    );
                    continue;
                }
            };
            let header =
                tiny_http::Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes())
                    .expect("build header");
            let _ = request.respond(tiny_http::Response::from_string(body).with_header(header));
        }
    });

    let stub = RagStub::spawn(None);
    let sitemap_url = format!("{docs_url}/sitemap.xml");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("docrag");
    cmd.args(["insert", &sitemap_url, "--service-url", &stub.base_url])
        .assert()
        .success();

    let sources = stub.recorded_sources();
    assert_eq!(
        sources,
        HashSet::from([
            format!("{docs_url}/docs/a"),
            format!("{docs_url}/docs/b"),
        ]),
        "sitemap roots enumerate their pages and do not follow links"
    );

    let _ = shutdown_tx.send(());
    let _ = handle.join();
}

#[test]
fn txt_listing_root_inserts_each_listed_page() {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start docs server");
    let docs_url = format!("http://{}", server.server_addr());

    let listing = format!("# pages to index\n{docs_url}/docs/a\n\n{docs_url}/docs/b\n");
    let page_a = "# A\n\nAlpha body.\n".to_owned();
    let page_b = "# B\n\nBeta body.\n".to_owned();

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
    let handle = thread::spawn(move || {
        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            let request = match server.recv_timeout(Duration::from_millis(50)) {
                Ok(Some(req)) => req,
                Ok(None) => continue,
                Err(_) => break,
            };
            let path = request.url().split('?').next().unwrap_or("").to_owned();
            let (content_type, body) = match path.as_str() {
                "/llms.txt" => ("text/plain; charset=utf-8", listing.clone()),
                "/docs/a" => ("text/markdown; charset=utf-8", page_a.clone()),
                "/docs/b" => ("text/markdown; charset=utf-8", page_b.clone()),
                _ => {
                    let _ = request.respond(
                        tiny_http::Response::from_string("not found").with_status_code(404),
                    );
                    continue;
                }
            };
            let header =
                tiny_http::Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes())
                    .expect("build header");
            let _ = request.respond(tiny_http::Response::from_string(body).with_header(header));
        }
    });

    let stub = RagStub::spawn(None);
    let listing_url = format!("{docs_url}/llms.txt");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("docrag");
    cmd.args(["insert", &listing_url, "--service-url", &stub.base_url])
        .assert()
        .success();

    let sources = stub.recorded_sources();
    assert_eq!(
        sources,
        HashSet::from([
            format!("{docs_url}/docs/a"),
            format!("{docs_url}/docs/b"),
        ])
    );

    let _ = shutdown_tx.send(());
    let _ = handle.join();
}

#[test]
fn insert_aborts_when_the_service_is_unreachable() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("docrag");
    cmd.args([
        "insert",
        "http://example.invalid/docs",
        "--service-url",
        "http://127.0.0.1:1",
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("health check"));
}
