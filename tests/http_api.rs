mod common;

use agency_retrieval::config::Config;
use agency_retrieval::server::{router, AppState};
use agency_retrieval::unified::UnifiedRetriever;
use agency_retrieval::vector_store::VectorIndexStore;
use base64::Engine;
use common::{index_config, lexical_config};
use std::sync::Arc;
use tempfile::TempDir;

async fn spawn_server(tmp: &TempDir) -> String {
    let mut config = Config::default();
    config.lexical = lexical_config(&tmp.path().join("tenants"));
    config.lexical.min_score = 0.1;
    config.index = index_config(&tmp.path().join("cache"));

    let state = AppState {
        vector: Arc::new(VectorIndexStore::new(config.index.clone(), None, None)),
        unified: Arc::new(UnifiedRetriever::new(
            config.lexical.clone(),
            config.retrieval.clone(),
            None,
        )),
        config: Arc::new(config),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

fn upload_body(filename: &str, content: &[u8]) -> serde_json::Value {
    serde_json::json!({
        "filename": filename,
        "content_base64": base64::engine::general_purpose::STANDARD.encode(content),
        "category": "hotels",
        "visibility": "public"
    })
}

#[tokio::test]
async fn health_reports_index_state() {
    let tmp = TempDir::new().unwrap();
    let base = spawn_server(&tmp).await;

    let body: serde_json::Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["index"]["initialized"], false);
}

#[tokio::test]
async fn upload_search_delete_cycle() {
    let tmp = TempDir::new().unwrap();
    let base = spawn_server(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/tenants/acme/documents", base))
        .json(&upload_body("maldives.txt", b"Hotel info for Maldives resorts."))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let doc: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(doc["status"], "indexed");
    let id = doc["id"].as_str().unwrap().to_string();

    let results: serde_json::Value = client
        .post(format!("{}/tenants/acme/search", base))
        .json(&serde_json::json!({ "query": "Maldives hotels" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(results["results"][0]["reference"], id.as_str());

    let listed: serde_json::Value = client
        .get(format!("{}/tenants/acme/documents?category=hotels", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["documents"].as_array().unwrap().len(), 1);

    let resp = client
        .delete(format!("{}/tenants/acme/documents/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let resp = client
        .delete(format!("{}/tenants/acme/documents/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let err: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "not_found");
}

#[tokio::test]
async fn unsupported_upload_is_415() {
    let tmp = TempDir::new().unwrap();
    let base = spawn_server(&tmp).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/tenants/acme/documents", base))
        .json(&upload_body("rates.xlsx", b"PK"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 415);
    let err: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "unsupported_format");
}

#[tokio::test]
async fn empty_query_is_bad_request() {
    let tmp = TempDir::new().unwrap();
    let base = spawn_server(&tmp).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/search", base))
        .json(&serde_json::json!({ "query": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn global_search_without_index_is_empty() {
    let tmp = TempDir::new().unwrap();
    let base = spawn_server(&tmp).await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .post(format!("{}/global/search", base))
        .json(&serde_json::json!({ "query": "overwater villas", "use_mmr": true }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(body["results"].as_array().unwrap().is_empty());

    let status: serde_json::Value = client
        .post(format!("{}/admin/index/reset", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["initialized"], false);
    assert!(status["error"].is_null());
}

#[tokio::test]
async fn unified_search_without_sources_says_not_found() {
    let tmp = TempDir::new().unwrap();
    let base = spawn_server(&tmp).await;

    let body: serde_json::Value = reqwest::Client::new()
        .post(format!("{}/search", base))
        .json(&serde_json::json!({ "query": "ski passes", "tenant_id": "acme" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["confidence"], 0.0);
    assert_eq!(body["sources"]["local"], 0);
    assert!(body["answer"].as_str().unwrap().contains("couldn't find"));
}

#[tokio::test]
async fn global_search_rejects_lambda_out_of_range() {
    let tmp = TempDir::new().unwrap();
    let base = spawn_server(&tmp).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/global/search", base))
        .json(&serde_json::json!({ "query": "overwater villas", "use_mmr": true, "lambda": 1.5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let err: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "bad_request");
}
