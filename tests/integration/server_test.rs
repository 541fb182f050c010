//! HTTP Surface Integration Tests
//!
//! Exercises the axum router in-process: the OpenAI-compatible streaming
//! facade, buffered chat, introspection routes, and request validation.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use kestrel::server::{build_router, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::support::{harness, StubProvider};

fn app() -> axum::Router {
    let h = harness(Arc::new(StubProvider::new()));
    // Leak the harness so its temp dir outlives the returned router.
    let h = Box::leak(Box::new(h));
    build_router(AppState {
        engine: h.engine.clone(),
    })
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_reports_healthy() {
    let response = app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn status_lists_corpora_and_workers() {
    let response = app()
        .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert!(body["corpora"]["ACLED"]["loaded"].as_bool().unwrap());
    assert_eq!(body["corpora"]["IMF"]["reliability_weight"], 0.75);
    assert!(body["workers"].as_array().unwrap().len() >= 5);
}

#[tokio::test]
async fn models_lists_worker_ids() {
    let response = app()
        .oneshot(Request::builder().uri("/v1/models").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["object"], "list");
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"analyst"));
    assert!(ids.contains(&"geo"));
}

#[tokio::test]
async fn buffered_chat_returns_single_json() {
    let response = app()
        .oneshot(post_json(
            "/chat",
            json!({"query": "assess instability trends", "stream": false}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["status"], "success");
    assert!(body["response"].as_str().unwrap().starts_with("Brief"));
    assert_eq!(body["workers_used"], json!(["analyst"]));
    assert_eq!(body["session_id"], "default");
}

#[tokio::test]
async fn empty_query_is_rejected_with_400() {
    let response = app()
        .oneshot(post_json("/chat", json!({"query": "   "})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn completions_without_user_message_is_rejected() {
    let response = app()
        .oneshot(post_json(
            "/v1/chat/completions",
            json!({"messages": [{"role": "system", "content": "be brief"}]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn openai_streaming_chunks_concatenate_and_terminate() {
    let response = app()
        .oneshot(post_json(
            "/v1/chat/completions",
            json!({
                "messages": [{"role": "user", "content": "assess instability trends"}],
                "stream": true,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let body = body_text(response).await;
    let payloads: Vec<&str> = body
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .collect();
    assert!(!payloads.is_empty());

    // Last payload is the [DONE] sentinel, preceded by a stop terminator.
    assert_eq!(*payloads.last().unwrap(), "[DONE]");
    let chunks: Vec<Value> = payloads[..payloads.len() - 1]
        .iter()
        .map(|p| serde_json::from_str(p).unwrap())
        .collect();
    let stop_chunks = chunks
        .iter()
        .filter(|c| c["choices"][0]["finish_reason"] == "stop")
        .count();
    assert_eq!(stop_chunks, 1);
    assert_eq!(
        chunks.last().unwrap()["choices"][0]["finish_reason"],
        "stop"
    );

    // Deltas concatenate into a text that contains the synthesis.
    let concatenated: String = chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert!(concatenated.contains("Brief 1"));
    for chunk in &chunks {
        assert_eq!(chunk["object"], "chat.completion.chunk");
    }
}

#[tokio::test]
async fn completions_non_streaming_returns_full_message() {
    let response = app()
        .oneshot(post_json(
            "/v1/chat/completions",
            json!({
                "messages": [{"role": "user", "content": "assess instability trends"}],
                "stream": false,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert!(body["choices"][0]["message"]["content"]
        .as_str()
        .unwrap()
        .starts_with("Brief"));
}

#[tokio::test]
async fn history_returns_persisted_runs() {
    let app = app();
    let _ = app
        .clone()
        .oneshot(post_json(
            "/chat",
            json!({"query": "assess instability trends", "stream": false}),
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/history?n=5")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    let records = body.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["query"], "assess instability trends");
}
