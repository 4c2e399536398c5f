//! HTTP API exercised over a real socket.

use std::sync::Arc;

use base64::Engine;
use serde_json::{json, Value};
use tempfile::TempDir;

use ragsync::config::Config;
use ragsync::embedding::Embedder;
use ragsync::server::router;
use ragsync::service::RagService;
use ragsync::store::SqliteStore;

async fn spawn_server() -> (TempDir, String) {
    let tmp = TempDir::new().unwrap();
    let config: Config = toml::from_str(
        r#"
[chunking]
chunk_size = 80
overlap = 10

[embedding]
provider = "disabled"
dims = 8

[retrieval]
match_threshold = -1.0
"#,
    )
    .unwrap();
    let local = Arc::new(
        SqliteStore::open(&tmp.path().join("server.sqlite"))
            .await
            .unwrap(),
    );
    let service = RagService::new(config, local, None, Arc::new(Embedder::fallback_only(8)))
        .await
        .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(Arc::new(service));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (tmp, format!("http://{}", addr))
}

fn encode(text: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(text)
}

#[tokio::test]
async fn health_reports_ok() {
    let (_tmp, base) = spawn_server().await;
    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn upload_list_query_and_remove() {
    let (_tmp, base) = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/files", base))
        .json(&json!({
            "filename": "guide.md",
            "content_base64": encode("Install with cargo.\n\nThe flag zzqplex42 enables tracing."),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["base_id"], "guide");
    assert!(!body["chunks"].as_array().unwrap().is_empty());

    let files: Value = client
        .get(format!("{}/files", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(files["files"], json!(["guide"]));

    let query: Value = client
        .post(format!("{}/query", base))
        .json(&json!({ "query": "zzqplex42", "k": 1 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let results = query["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].as_str().unwrap().contains("zzqplex42"));

    let resp = client
        .delete(format!("{}/files/guide", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .delete(format!("{}/files/guide", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn bad_requests_use_error_envelope() {
    let (_tmp, base) = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/files", base))
        .json(&json!({ "filename": "x.txt", "content_base64": "!!not base64!!" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{}/files", base))
        .json(&json!({ "filename": "x.pdf", "content_base64": encode("not a pdf") }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/query", base))
        .json(&json!({ "query": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn sync_without_remote_reports_unavailable() {
    let (_tmp, base) = spawn_server().await;
    let client = reqwest::Client::new();

    let push: Value = client
        .post(format!("{}/sync/push", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(push["synced"], 0);
    assert!(push["message"]
        .as_str()
        .unwrap()
        .starts_with("remote unavailable"));

    let status: Value = client
        .get(format!("{}/sync/status", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["remote_available"], false);
    assert_eq!(status["last_sync"], 0);
}
