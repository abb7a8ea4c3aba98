//! HTTP API tests driven through the router without binding a socket.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use docent::ingest::ingest_path;
use docent::server::{router, AppState};

use common::{services, write_corpus, DeskModel};

async fn setup_app(model: DeskModel) -> (axum::Router, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let docs = write_corpus(tmp.path());
    let svc = services(tmp.path(), Arc::new(model)).await;
    ingest_path(&svc, &docs).await.unwrap();
    (router(AppState::new(Arc::new(svc))), tmp)
}

async fn json_response(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.expect("Request failed");
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    let value: Value = serde_json::from_slice(&body).expect("Invalid JSON response");
    (status, value)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let (app, _tmp) = setup_app(DeskModel::default()).await;
    let (status, body) = json_response(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_documents_lists_catalog() {
    let (app, _tmp) = setup_app(DeskModel::default()).await;
    let (status, body) = json_response(&app, get("/documents")).await;
    assert_eq!(status, StatusCode::OK);
    let docs = body["documents"].as_array().unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0]["file_name"], "hx200.txt");
    assert_eq!(docs[0]["doc_name"], "HX-200 Service Manual");
    assert_eq!(docs[1]["doc_type"], "tech_bulletin");
}

#[tokio::test]
async fn test_search_returns_scored_hits() {
    let (app, _tmp) = setup_app(DeskModel::default()).await;
    let (status, body) = json_response(
        &app,
        post_json("/search", json!({"query": "impeller torque", "limit": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["file_name"], "hx200.txt");
    assert!(results[0]["score"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn test_search_rejects_bad_input() {
    let (app, _tmp) = setup_app(DeskModel::default()).await;

    let (status, body) = json_response(&app, post_json("/search", json!({"query": "  "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, _) = json_response(
        &app,
        post_json("/search", json!({"query": "seal", "limit": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = json_response(
        &app,
        post_json("/search", json!({"query": "seal", "mode": "psychic"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("psychic"));
}

#[tokio::test]
async fn test_ask_answers_with_request_id() {
    let model = DeskModel::with_decisions(&[
        "<QUESTION>Which HX model?</QUESTION><ACTION>QUESTION</ACTION>",
    ]);
    let (app, _tmp) = setup_app(model).await;
    let (status, body) = json_response(
        &app,
        post_json("/ask", json!({"request": "How do I service it?"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "Which HX model?");
    assert!(!body["request_id"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_ask_empty_request_is_bad_request() {
    let (app, _tmp) = setup_app(DeskModel::default()).await;
    let (status, body) = json_response(&app, post_json("/ask", json!({"request": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
    assert!(body["error"].get("request_id").is_none());
}

#[tokio::test]
async fn test_ask_unknown_action_is_agent_error() {
    let model = DeskModel::with_decisions(&["<ACTION>SING</ACTION>"]);
    let (app, _tmp) = setup_app(model).await;
    let (status, body) = json_response(
        &app,
        post_json("/ask", json!({"request": "hello", "history": "user: hi"})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "agent_error");
    assert!(!body["error"]["message"].as_str().unwrap().contains("SING"));
    assert!(!body["error"]["request_id"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_ask_model_failure_is_internal() {
    // An empty script makes the decision call fail outright.
    let (app, _tmp) = setup_app(DeskModel::default()).await;
    let (status, body) = json_response(&app, post_json("/ask", json!({"request": "hello"}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "internal");
    assert!(!body["error"]["request_id"].as_str().unwrap().is_empty());
}
