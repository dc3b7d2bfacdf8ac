//! Integration tests for the chat relay.
//!
//! Drives the full HTTP API against the router with a scripted model client.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use relay_common::config::Config;
use relay_gateway::{
    build_router_with_store, parse_ndjson, GenerationOptions, HistoryStore, ProviderError,
    ScriptedClient, StreamFrame, Turn,
};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tower::ServiceExt;

/// Router plus the store it writes to.
fn create_test_app(client: ScriptedClient) -> (Router, HistoryStore) {
    let config = Config::default();
    let store = HistoryStore::new(config.session.max_turns);
    let router = build_router_with_store(&config, store.clone(), Arc::new(client));
    (router, store)
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<String>,
) -> (StatusCode, HeaderMap, String) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(b) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(b))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    (status, headers, String::from_utf8(body.to_vec()).unwrap())
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, HeaderMap, String) {
    send(app, Method::POST, uri, Some(body.to_string())).await
}

async fn chat(app: &Router, body: Value) -> (StatusCode, Vec<StreamFrame>) {
    let (status, headers, text) = post_json(app, "/api/chat", body).await;
    assert_eq!(status, StatusCode::OK, "unexpected body: {text}");
    assert_eq!(headers[header::CONTENT_TYPE], "application/x-ndjson");
    (status, parse_ndjson(&text).unwrap())
}

// ─────────────────────────────────────────────────────────────────────────────
// Health
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_without_credential() {
    let client = ScriptedClient::new(["x"])
        .without_credential()
        .with_default_model("gemini-2.5-flash");
    let (app, _) = create_test_app(client);

    let (status, _, body) = send(&app, Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["modelDefault"], "gemini-2.5-flash");
    assert_eq!(json["hasApiKey"], false);
}

#[tokio::test]
async fn test_health_with_credential() {
    let (app, _) = create_test_app(ScriptedClient::new(["x"]));
    let (_, _, body) = send(&app, Method::GET, "/api/health", None).await;
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["hasApiKey"], true);
    assert_eq!(json["modelDefault"], "scripted-model");
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Reset
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_reset_is_idempotent() {
    let (app, store) = create_test_app(ScriptedClient::new(["x"]));

    for _ in 0..2 {
        let (status, _, body) =
            post_json(&app, "/api/session/reset", json!({ "sessionId": "never-seen" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({ "ok": true }));
    }
    assert!(!store.contains("never-seen"));
}

#[tokio::test]
async fn test_reset_clears_history() {
    let (app, store) = create_test_app(ScriptedClient::new(["reply"]));

    chat(&app, json!({ "sessionId": "s1", "message": "hi" })).await;
    assert_eq!(store.get("s1").len(), 2);

    let (status, _, _) = post_json(&app, "/api/session/reset", json!({ "sessionId": "s1" })).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!store.contains("s1"));
}

#[tokio::test]
async fn test_reset_requires_session_id() {
    let (app, _) = create_test_app(ScriptedClient::new(["x"]));

    let (status, _, body) = post_json(&app, "/api/session/reset", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["error"], "sessionId is required");
    assert_eq!(json["code"], "validation_error");

    let (status, _, _) =
        send(&app, Method::POST, "/api/session/reset", Some("{not json".into())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_chat_rejects_empty_body() {
    let client = ScriptedClient::new(["x"]);
    let probe = client.clone();
    let (app, store) = create_test_app(client);

    let (status, headers, body) = post_json(&app, "/api/chat", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_ne!(headers[header::CONTENT_TYPE], "application/x-ndjson");

    let json: Value = serde_json::from_str(&body).unwrap();
    assert!(json["error"].is_string());
    assert!(!body.contains("\"type\""));
    assert_eq!(probe.calls(), 0);
    assert_eq!(store.session_count(), 0);
}

#[tokio::test]
async fn test_chat_rejects_malformed_json() {
    let (app, _) = create_test_app(ScriptedClient::new(["x"]));

    let (status, _, body) = send(&app, Method::POST, "/api/chat", Some("{\"sessionId\":".into())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["code"], "validation_error");

    let (status, _, _) = post_json(
        &app,
        "/api/chat",
        json!({ "sessionId": "s1", "message": "hi", "maxOutputTokens": "lots" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chat_streams_and_commits() {
    let client = ScriptedClient::new(["He", "llo"]).with_final_text("Hello");
    let (app, store) = create_test_app(client);

    let (_, headers, text) =
        post_json(&app, "/api/chat", json!({ "sessionId": "s1", "message": "hi" })).await;
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
    assert_eq!(headers["x-accel-buffering"], "no");

    let frames = parse_ndjson(&text).unwrap();
    assert_eq!(
        frames,
        vec![
            StreamFrame::content("He"),
            StreamFrame::content("llo"),
            StreamFrame::Done
        ]
    );
    assert_eq!(text.lines().count(), 3);
    assert_eq!(store.get("s1"), vec![Turn::user("hi"), Turn::model("Hello")]);
}

#[tokio::test]
async fn test_chat_replays_history() {
    let client = ScriptedClient::new(["ok"]);
    let probe = client.clone();
    let (app, store) = create_test_app(client);

    chat(&app, json!({ "sessionId": "s1", "message": "first" })).await;
    chat(&app, json!({ "sessionId": "s1", "message": "second" })).await;

    let call = probe.last_call().unwrap();
    assert_eq!(call.history, vec![Turn::user("first"), Turn::model("ok")]);
    assert_eq!(call.message, "second");
    assert_eq!(store.get("s1").len(), 4);
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let (app, store) = create_test_app(ScriptedClient::new(["a", "b"]));

    let (left, right) = tokio::join!(
        chat(&app, json!({ "sessionId": "left", "message": "one" })),
        chat(&app, json!({ "sessionId": "right", "message": "two" })),
    );
    assert_eq!(left.1.last(), Some(&StreamFrame::Done));
    assert_eq!(right.1.last(), Some(&StreamFrame::Done));

    assert_eq!(store.get("left"), vec![Turn::user("one"), Turn::model("ab")]);
    assert_eq!(store.get("right"), vec![Turn::user("two"), Turn::model("ab")]);
}

#[tokio::test]
async fn test_chat_mid_stream_error() {
    let client = ScriptedClient::new(["part", "never"])
        .failing_after(1, ProviderError::Api("quota exceeded".into()));
    let (app, store) = create_test_app(client);

    let (_, frames) = chat(&app, json!({ "sessionId": "s1", "message": "hi" })).await;
    assert_eq!(
        frames,
        vec![
            StreamFrame::content("part"),
            StreamFrame::error("API error: quota exceeded"),
            StreamFrame::Done,
        ]
    );
    assert!(store.get("s1").is_empty());
}

#[tokio::test]
async fn test_chat_without_credential() {
    let (app, store) = create_test_app(ScriptedClient::new(["x"]).without_credential());

    let (status, _, body) =
        post_json(&app, "/api/chat", json!({ "sessionId": "s1", "message": "hi" })).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["code"], "configuration_error");
    assert!(json["error"].as_str().unwrap().contains("GEMINI_API_KEY"));
    assert!(store.get("s1").is_empty());
}

#[tokio::test]
async fn test_chat_upstream_refused() {
    let client = ScriptedClient::new(["x"]).failing_before_stream(ProviderError::Status {
        status: 503,
        body: "overloaded".into(),
    });
    let (app, _) = create_test_app(client);

    let (status, _, body) =
        post_json(&app, "/api/chat", json!({ "sessionId": "s1", "message": "hi" })).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["code"], "upstream_error");
}

#[tokio::test]
async fn test_chat_forwards_only_set_options() {
    let client = ScriptedClient::new(["x"]);
    let probe = client.clone();
    let (app, _) = create_test_app(client);

    chat(
        &app,
        json!({
            "sessionId": "s1",
            "message": "hi",
            "model": "gemini-2.0-flash",
            "systemPrompt": "Be brief.",
            "temperature": 0.2,
            "maxOutputTokens": 128
        }),
    )
    .await;
    let options = probe.last_call().unwrap().options;
    assert_eq!(options.model.as_deref(), Some("gemini-2.0-flash"));
    assert_eq!(options.system_prompt.as_deref(), Some("Be brief."));
    assert_eq!(options.temperature, Some(0.2));
    assert_eq!(options.max_output_tokens, Some(128));

    chat(&app, json!({ "sessionId": "s2", "message": "hi" })).await;
    let options = probe.last_call().unwrap().options;
    assert_eq!(options, GenerationOptions::default());
}

#[tokio::test]
async fn test_client_disconnect_drains_without_commit() {
    let client = ScriptedClient::new(["a", "b", "c"]).with_delay(Duration::from_millis(50));
    let probe = client.clone();
    let (app, store) = create_test_app(client);

    let request = Request::post("/api/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "sessionId": "s1", "message": "hi" }).to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body().into_data_stream();
    let first = body.next().await.unwrap().unwrap();
    assert_eq!(
        parse_ndjson(std::str::from_utf8(&first).unwrap()).unwrap(),
        vec![StreamFrame::content("a")]
    );
    drop(body);

    tokio::time::timeout(Duration::from_secs(5), async {
        while probe.streams_closed() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("relay task did not finish");

    assert_eq!(probe.pulled(), 3);
    assert!(store.get("s1").is_empty());
}

#[tokio::test]
async fn test_chat_requires_json_content_type() {
    let (app, _) = create_test_app(ScriptedClient::new(["x"]));

    let request = Request::post("/api/chat")
        .body(Body::from(
            json!({ "sessionId": "s1", "message": "hi" }).to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["code"], "request_rejected");
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let mut config = Config::default();
    config.server.body_limit_bytes = 64;
    let app = build_router_with_store(
        &config,
        HistoryStore::default(),
        Arc::new(ScriptedClient::new(["x"])),
    );

    let (status, _, _) = post_json(
        &app,
        "/api/chat",
        json!({ "sessionId": "s1", "message": "x".repeat(256) }),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}
