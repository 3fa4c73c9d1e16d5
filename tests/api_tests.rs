//! API integration tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use httpmock::prelude::*;
use serde_json::{Value, json};
use tower::ServiceExt;

use magpie::directory::{CredentialDirectory, UserProfile};

mod common;
use common::{SHARED_SECRET, TEST_AGENT_REF, TEST_GATEWAY_KEY, TEST_USER, seed_profile, test_app};

const BODY_LIMIT: usize = 1024 * 1024;

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(Method::GET)
        .body(Body::empty())
        .unwrap()
}

fn authed_get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(Method::GET)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

fn authed_post(uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(Method::POST)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), BODY_LIMIT)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Mount a happy-path agent stream on the mock server.
async fn mock_agent_turn(server: &MockServer) -> httpmock::Mock<'_> {
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path(format!("/agents/{TEST_AGENT_REF}/messages/stream"));
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(concat!(
                    "data: {\"message_type\":\"reasoning_message\",\"reasoning\":\"thinking\"}\n\n",
                    "data: {\"message_type\":\"assistant_message\",\"content\":\"Hello \"}\n\n",
                    "data: {\"message_type\":\"assistant_message\",\"content\":\"there\"}\n\n",
                    "data: {\"message_type\":\"usage_statistics\",\"total_tokens\":42,\"prompt_tokens\":30,\"completion_tokens\":12,\"cost\":0.0021}\n\n",
                    "data: [DONE]\n\n",
                ));
        })
        .await
}

/// Test that the health endpoint works without authentication.
#[tokio::test]
async fn test_health_endpoint() {
    let agent = MockServer::start_async().await;
    let gateway = MockServer::start_async().await;
    let app = test_app(&agent.base_url(), &gateway.base_url()).await;

    let response = app.router().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

/// Test that chat endpoints require authentication.
#[tokio::test]
async fn test_chat_requires_auth() {
    let agent = MockServer::start_async().await;
    let gateway = MockServer::start_async().await;
    let app = test_app(&agent.base_url(), &gateway.base_url()).await;

    let response = app
        .router()
        .oneshot(get("/chat/history"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

/// Test a full buffered chat turn: the reply equals the accumulated text
/// and both sides of the turn land in history.
#[tokio::test]
async fn test_chat_message_buffered() {
    let agent = MockServer::start_async().await;
    let gateway = MockServer::start_async().await;
    mock_agent_turn(&agent).await;
    let app = test_app(&agent.base_url(), &gateway.base_url()).await;

    let response = app
        .router()
        .oneshot(authed_post(
            "/chat/message",
            &app.token,
            json!({ "message": "hi" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The reply carries the persisted assistant message row itself.
    let json = json_body(response).await;
    assert_eq!(json["message"]["role"], "assistant");
    assert_eq!(json["message"]["content"], "Hello there");
    assert!(json["message"]["id"].is_string());
    assert_eq!(json["message"]["tokens_used"], 42);
    assert_eq!(json["usage"]["total_tokens"], 42);
    assert_eq!(json["usage"]["usage_reported"], true);

    // Both messages persisted, newest first.
    let response = app
        .router()
        .oneshot(authed_get("/chat/history", &app.token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["total"], 2);
    assert_eq!(json["messages"][0]["role"], "assistant");
    assert_eq!(json["messages"][0]["content"], "Hello there");
    assert_eq!(json["messages"][0]["tokens_used"], 42);
    assert_eq!(json["messages"][1]["role"], "user");
    assert_eq!(json["messages"][1]["content"], "hi");
}

/// Test that a blank message is rejected before anything is persisted.
#[tokio::test]
async fn test_chat_message_empty_rejected() {
    let agent = MockServer::start_async().await;
    let gateway = MockServer::start_async().await;
    let app = test_app(&agent.base_url(), &gateway.base_url()).await;

    let response = app
        .router()
        .oneshot(authed_post(
            "/chat/message",
            &app.token,
            json!({ "message": "   " }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = json_body(response).await;
    assert_eq!(json["code"], "VALIDATION_FAILURE");

    let response = app
        .router()
        .oneshot(authed_get("/chat/history", &app.token))
        .await
        .unwrap();
    let json = json_body(response).await;
    assert_eq!(json["total"], 0);
}

/// Test a user with no agent attached gets a 404.
#[tokio::test]
async fn test_chat_message_no_agent() {
    let agent = MockServer::start_async().await;
    let gateway = MockServer::start_async().await;
    let app = test_app(&agent.base_url(), &gateway.base_url()).await;
    seed_profile(&app, "usr_no_agent", None, None).await;
    let token = app.state.auth.generate_token("usr_no_agent").unwrap();

    let response = app
        .router()
        .oneshot(authed_post(
            "/chat/message",
            &token,
            json!({ "message": "hi" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// Test the SSE transport relays events in order and ends with done.
#[tokio::test]
async fn test_chat_stream_sse() {
    let agent = MockServer::start_async().await;
    let gateway = MockServer::start_async().await;
    mock_agent_turn(&agent).await;
    let app = test_app(&agent.base_url(), &gateway.base_url()).await;

    let response = app
        .router()
        .oneshot(authed_post(
            "/chat/stream",
            &app.token,
            json!({ "message": "hi" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .starts_with("text/event-stream")
    );

    let body = axum::body::to_bytes(response.into_body(), BODY_LIMIT)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    let events: Vec<Value> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect();

    let kinds: Vec<&str> = events
        .iter()
        .map(|e| e["type"].as_str().unwrap())
        .collect();
    assert_eq!(
        kinds,
        ["reasoning", "message", "message", "usage", "done"]
    );
    assert_eq!(events[1]["content"], "Hello ");
    assert_eq!(events[3]["data"]["total_tokens"], 42);

    let done = events.last().unwrap();
    assert_eq!(done["content"], "Hello there");
    assert_eq!(done["data"]["usage_stats"]["total_tokens"], 42);

    // The streamed turn is persisted just like the buffered one.
    let response = app
        .router()
        .oneshot(authed_get("/chat/history", &app.token))
        .await
        .unwrap();
    let json = json_body(response).await;
    assert_eq!(json["total"], 2);
}

/// Test that dropping the SSE response stops the turn: the upstream
/// agent stream is cancelled and no assistant message is persisted.
#[tokio::test]
async fn test_chat_stream_client_disconnect_cancels_turn() {
    let agent = MockServer::start_async().await;
    let gateway = MockServer::start_async().await;
    agent
        .mock_async(|when, then| {
            when.method(POST)
                .path(format!("/agents/{TEST_AGENT_REF}/messages/stream"));
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(concat!(
                    "data: {\"message_type\":\"reasoning_message\",\"reasoning\":\"thinking\"}\n\n",
                    "data: {\"message_type\":\"assistant_message\",\"content\":\"Hello \"}\n\n",
                    "data: {\"message_type\":\"assistant_message\",\"content\":\"there\"}\n\n",
                    "data: [DONE]\n\n",
                ))
                .delay(std::time::Duration::from_millis(300));
        })
        .await;
    let app = test_app(&agent.base_url(), &gateway.base_url()).await;

    let response = app
        .router()
        .oneshot(authed_post(
            "/chat/stream",
            &app.token,
            json!({ "message": "hi" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Drop the response without reading the body, before the delayed
    // agent events arrive, then give the relay time to wind down.
    drop(response);
    tokio::time::sleep(std::time::Duration::from_millis(900)).await;

    // Only the user message made it to history.
    let response = app
        .router()
        .oneshot(authed_get("/chat/history", &app.token))
        .await
        .unwrap();
    let json = json_body(response).await;
    assert_eq!(json["total"], 1);
    assert_eq!(json["messages"][0]["role"], "user");
}

/// Test history paging bounds are clamped rather than rejected.
#[tokio::test]
async fn test_chat_history_clamps_paging() {
    let agent = MockServer::start_async().await;
    let gateway = MockServer::start_async().await;
    let app = test_app(&agent.base_url(), &gateway.base_url()).await;

    let response = app
        .router()
        .oneshot(authed_get(
            "/chat/history?page=0&page_size=1000",
            &app.token,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["page"], 1);
    assert_eq!(json["page_size"], 100);
    assert_eq!(json["has_next"], false);
}

/// Test the proxy substitutes the user's own credential, never the
/// shared secret, on the upstream call.
#[tokio::test]
async fn test_proxy_substitutes_credential() {
    let agent = MockServer::start_async().await;
    let gateway = MockServer::start_async().await;
    let upstream = gateway
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .header("authorization", format!("Bearer {TEST_GATEWAY_KEY}"));
            then.status(200)
                .json_body(json!({ "choices": [{ "message": { "content": "ok" } }] }));
        })
        .await;
    let app = test_app(&agent.base_url(), &gateway.base_url()).await;

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .uri(format!("/llm-proxy/{TEST_AGENT_REF}/chat/completions"))
                .method(Method::POST)
                .header(header::AUTHORIZATION, format!("Bearer {SHARED_SECRET}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "model": "gpt-4o", "messages": [] }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["choices"][0]["message"]["content"], "ok");
    upstream.assert_async().await;
}

/// Test streaming proxy passthrough keeps the upstream bytes intact.
#[tokio::test]
async fn test_proxy_streams_passthrough() {
    let agent = MockServer::start_async().await;
    let gateway = MockServer::start_async().await;
    let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n\n";
    gateway
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(sse);
        })
        .await;
    let app = test_app(&agent.base_url(), &gateway.base_url()).await;

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .uri(format!("/llm-proxy/{TEST_AGENT_REF}/chat/completions"))
                .method(Method::POST)
                .header(header::AUTHORIZATION, format!("Bearer {SHARED_SECRET}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "stream": true }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );

    let body = axum::body::to_bytes(response.into_body(), BODY_LIMIT)
        .await
        .unwrap();
    assert_eq!(String::from_utf8(body.to_vec()).unwrap(), sse);
}

/// A directory that counts lookups, for asserting the proxy rejects
/// bad secrets before touching it.
struct CountingDirectory {
    calls: AtomicUsize,
}

#[async_trait]
impl CredentialDirectory for CountingDirectory {
    async fn resolve_by_agent_ref(&self, _agent_ref: &str) -> anyhow::Result<Option<UserProfile>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

/// Test the shared secret is checked before any directory lookup.
#[tokio::test]
async fn test_proxy_checks_secret_before_lookup() {
    let agent = MockServer::start_async().await;
    let gateway = MockServer::start_async().await;
    let app = test_app(&agent.base_url(), &gateway.base_url()).await;

    let directory = Arc::new(CountingDirectory {
        calls: AtomicUsize::new(0),
    });
    let state = app.state.clone().with_directory(directory.clone());
    let router = magpie::api::create_router(state);

    for request in [
        Request::builder()
            .uri(format!("/llm-proxy/{TEST_AGENT_REF}/chat/completions"))
            .method(Method::POST)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, "Bearer wrong-secret")
            .body(Body::from("{}".to_string()))
            .unwrap(),
        Request::builder()
            .uri(format!("/llm-proxy/{TEST_AGENT_REF}/test"))
            .method(Method::GET)
            .body(Body::empty())
            .unwrap(),
    ] {
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    assert_eq!(directory.calls.load(Ordering::SeqCst), 0);
}

/// Test an unknown agent reference yields 404 after the secret check.
#[tokio::test]
async fn test_proxy_unknown_agent_ref() {
    let agent = MockServer::start_async().await;
    let gateway = MockServer::start_async().await;
    let app = test_app(&agent.base_url(), &gateway.base_url()).await;

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .uri("/llm-proxy/agent-nobody/chat/completions")
                .method(Method::POST)
                .header(header::AUTHORIZATION, format!("Bearer {SHARED_SECRET}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}".to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// Test a resolved user without a provisioned credential yields 404.
#[tokio::test]
async fn test_proxy_user_without_credential() {
    let agent = MockServer::start_async().await;
    let gateway = MockServer::start_async().await;
    let app = test_app(&agent.base_url(), &gateway.base_url()).await;
    seed_profile(&app, "usr_nokey", Some("agent-nokey"), None).await;

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .uri("/llm-proxy/agent-nokey/chat/completions")
                .method(Method::POST)
                .header(header::AUTHORIZATION, format!("Bearer {SHARED_SECRET}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}".to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// Test the diagnostic route reports a truncated credential preview.
#[tokio::test]
async fn test_proxy_test_route_previews_credential() {
    let agent = MockServer::start_async().await;
    let gateway = MockServer::start_async().await;
    agent
        .mock_async(|when, then| {
            when.method(GET).path(format!("/agents/{TEST_AGENT_REF}"));
            then.status(200).json_body(json!({
                "id": TEST_AGENT_REF,
                "name": "helper",
                "model": "gpt-4o",
            }));
        })
        .await;
    let app = test_app(&agent.base_url(), &gateway.base_url()).await;

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .uri(format!("/llm-proxy/{TEST_AGENT_REF}/test"))
                .method(Method::GET)
                .header(header::AUTHORIZATION, format!("Bearer {SHARED_SECRET}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["user_id"], TEST_USER);
    assert_eq!(json["agent_ref"], TEST_AGENT_REF);
    assert_eq!(json["has_credential"], true);
    assert_eq!(json["agent_online"], true);
    assert_eq!(json["agent_model"], "gpt-4o");
    let preview = json["credential_preview"].as_str().unwrap();
    assert!(preview.ends_with("..."));
    assert!(preview.len() < TEST_GATEWAY_KEY.len());
    assert!(!json.to_string().contains(TEST_GATEWAY_KEY));
}

/// Test upstream gateway rejections pass through with their status.
#[tokio::test]
async fn test_proxy_passes_upstream_rejection() {
    let agent = MockServer::start_async().await;
    let gateway = MockServer::start_async().await;
    gateway
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(429).body("rate limited");
        })
        .await;
    let app = test_app(&agent.base_url(), &gateway.base_url()).await;

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .uri(format!("/llm-proxy/{TEST_AGENT_REF}/chat/completions"))
                .method(Method::POST)
                .header(header::AUTHORIZATION, format!("Bearer {SHARED_SECRET}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}".to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}
