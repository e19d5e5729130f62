//! Integration tests for the streamable HTTP transport.
//!
//! Requests go straight into the axum router with `tower::ServiceExt::oneshot`,
//! so no socket is bound.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{controller, FakeService, Script, Step};
use fetchfox_mcp::mcp::http::{router, SessionStore, SESSION_HEADER};
use fetchfox_mcp::mcp::server::{McpServer, ServerState};

fn app(service: &Arc<FakeService>, default_key: Option<&str>) -> (Router, Arc<SessionStore>) {
    let sessions = Arc::new(SessionStore::new());
    let server = Arc::new(McpServer::new(controller(service, default_key)));
    (router(server, Arc::clone(&sessions)), sessions)
}

fn post(session: Option<&str>, bearer: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .header("accept", "application/json, text/event-stream");
    if let Some(id) = session {
        builder = builder.header(SESSION_HEADER, id);
    }
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn request(method: &str, session: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri("/mcp");
    if let Some(id) = session {
        builder = builder.header(SESSION_HEADER, id);
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

/// The JSON payloads of an SSE body's `data:` lines.
async fn sse_events(response: Response) -> Vec<Value> {
    body_text(response)
        .await
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap())
        .collect()
}

fn initialize() -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": {"name": "test-client", "version": "1.0.0"}
        }
    })
}

/// Opens a session and completes the handshake, returning the session id.
async fn open_session(app: &Router) -> String {
    let response = app.clone().oneshot(post(None, None, &initialize())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let id = response.headers()[SESSION_HEADER].to_str().unwrap().to_string();

    let initialized = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
    let response = app
        .clone()
        .oneshot(post(Some(&id), None, &initialized))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    id
}

// =============================================================================
// Session Tests
// =============================================================================

#[tokio::test]
async fn test_initialize_creates_session() {
    let service = FakeService::new();
    let (app, sessions) = app(&service, Some("server-key"));

    let response = app.oneshot(post(None, None, &initialize())).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let id = response.headers()[SESSION_HEADER].to_str().unwrap().to_string();
    assert!(sessions.get(&id).is_some());

    let body = body_json(response).await;
    assert_eq!(body["result"]["protocolVersion"], "2025-03-26");
    assert_eq!(body["result"]["serverInfo"]["name"], "fetchfox-mcp");
}

#[tokio::test]
async fn test_request_without_session_is_rejected() {
    let service = FakeService::new();
    let (app, sessions) = app(&service, Some("server-key"));

    let list = json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"});
    let response = app.oneshot(post(None, None, &list)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32000);
    assert_eq!(
        body["error"]["message"],
        "Bad Request: No valid session ID provided"
    );
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn test_unknown_session_is_rejected() {
    let service = FakeService::new();
    let (app, _sessions) = app(&service, Some("server-key"));

    let list = json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"});
    let response = app
        .oneshot(post(Some("not-a-session"), None, &list))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_closes_session() {
    let service = FakeService::new();
    let (app, sessions) = app(&service, Some("server-key"));
    let id = open_session(&app).await;

    let response = app.clone().oneshot(request("DELETE", Some(&id))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(sessions.is_empty());

    let response = app.clone().oneshot(request("DELETE", Some(&id))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, "Invalid or missing session ID");

    let ping = json!({"jsonrpc": "2.0", "id": 3, "method": "ping"});
    let response = app.oneshot(post(Some(&id), None, &ping)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_requires_valid_session() {
    let service = FakeService::new();
    let (app, _sessions) = app(&service, Some("server-key"));

    let response = app.clone().oneshot(request("GET", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.oneshot(request("GET", Some("nope"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_stream_ends_when_session_is_deleted() {
    let service = FakeService::new();
    let (app, _sessions) = app(&service, Some("server-key"));
    let id = open_session(&app).await;

    let response = app.clone().oneshot(request("GET", Some(&id))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");

    let deleted = app.oneshot(request("DELETE", Some(&id))).await.unwrap();
    assert_eq!(deleted.status(), StatusCode::OK);

    assert!(sse_events(response).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_idle_sessions_expire() {
    let service = FakeService::new();
    let (app, sessions) = app(&service, Some("server-key"));
    let idle = open_session(&app).await;
    let active = open_session(&app).await;
    let idle_session = sessions.get(&idle).unwrap();

    tokio::time::advance(Duration::from_secs(20)).await;
    let ping = json!({"jsonrpc": "2.0", "id": 3, "method": "ping"});
    let response = app
        .clone()
        .oneshot(post(Some(&active), None, &ping))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    tokio::time::advance(Duration::from_secs(20)).await;
    assert_eq!(sessions.expire_idle(Duration::from_secs(30)), 1);

    assert_eq!(idle_session.state(), ServerState::ShuttingDown);
    assert_eq!(sessions.len(), 1);
    let response = app.oneshot(post(Some(&idle), None, &ping)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(sessions.get(&active).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_session_with_running_call_does_not_expire() {
    let service = FakeService::new();
    service.accept(Script::succeeding(vec![], json!({})).with_tail(Duration::from_secs(600)));
    let (app, sessions) = app(&service, Some("server-key"));
    let id = open_session(&app).await;

    let call = json!({
        "jsonrpc": "2.0",
        "id": 5,
        "method": "tools/call",
        "params": {"name": "crawl", "arguments": {"pattern": "https://a.test/*"}}
    });
    let _stream = app.oneshot(post(Some(&id), None, &call)).await.unwrap();

    tokio::time::advance(Duration::from_secs(120)).await;
    assert_eq!(sessions.expire_idle(Duration::from_secs(30)), 0);
    assert_eq!(sessions.len(), 1);
}

// =============================================================================
// Authentication Tests
// =============================================================================

#[tokio::test]
async fn test_missing_credential_is_unauthorized() {
    let service = FakeService::new();
    let (app, sessions) = app(&service, None);

    let response = app.oneshot(post(None, None, &initialize())).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["www-authenticate"], "Bearer");
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32001);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("https://fetchfox.ai/dashboard"));
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn test_bearer_token_authenticates() {
    let service = FakeService::new();
    let (app, _sessions) = app(&service, None);

    let response = app
        .oneshot(post(None, Some("user-key"), &initialize()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// Message Tests
// =============================================================================

#[tokio::test]
async fn test_tools_list_answers_json() {
    let service = FakeService::new();
    let (app, _sessions) = app(&service, Some("server-key"));
    let id = open_session(&app).await;

    let list = json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"});
    let response = app.oneshot(post(Some(&id), None, &list)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let names: Vec<_> = body["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, ["echo", "add", "crawl", "extract", "scrape"]);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let service = FakeService::new();
    let (app, _sessions) = app(&service, Some("server-key"));

    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], -32700);
}

#[tokio::test]
async fn test_echo_call_streams_reply() {
    let service = FakeService::new();
    let (app, _sessions) = app(&service, Some("server-key"));
    let id = open_session(&app).await;

    let call = json!({
        "jsonrpc": "2.0",
        "id": 4,
        "method": "tools/call",
        "params": {"name": "echo", "arguments": {"message": "hi"}}
    });
    let response = app.oneshot(post(Some(&id), None, &call)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let events = sse_events(response).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["id"], 4);
    assert_eq!(events[0]["result"]["content"][0]["text"], "hi");
}

#[tokio::test(start_paused = true)]
async fn test_remote_call_streams_progress_then_result() {
    let service = FakeService::new();
    service.accept(Script::succeeding(
        vec![Step::progress(10, 1.0, 2.0), Step::progress(10, 2.0, 2.0)],
        json!({"results": {"hits": ["https://a.test/1"]}}),
    ));
    let (app, _sessions) = app(&service, Some("server-key"));
    let id = open_session(&app).await;

    let call = json!({
        "jsonrpc": "2.0",
        "id": "call-1",
        "method": "tools/call",
        "params": {
            "name": "crawl",
            "arguments": {"pattern": "https://a.test/*"},
            "_meta": {"progressToken": "p-1"}
        }
    });
    let response = app
        .oneshot(post(Some(&id), Some("user-key"), &call))
        .await
        .unwrap();
    let events = sse_events(response).await;

    let progress: Vec<_> = events
        .iter()
        .filter(|e| e["method"] == "notifications/progress")
        .map(|e| e["params"]["progress"].as_u64().unwrap())
        .collect();
    assert_eq!(progress, vec![50, 100]);

    let reply = events.last().unwrap();
    assert_eq!(reply["id"], "call-1");
    assert_eq!(
        reply["result"]["structuredContent"],
        json!({"hits": ["https://a.test/1"]})
    );
    assert_eq!(service.credentials(), vec!["user-key"]);
}

#[tokio::test]
async fn test_rejected_duplicate_call_leaves_original_running() {
    let service = FakeService::new();
    service.accept(Script::succeeding(vec![], json!({})).with_tail(Duration::from_secs(600)));
    let (app, sessions) = app(&service, Some("server-key"));
    let id = open_session(&app).await;
    let session = sessions.get(&id).unwrap();

    let call = json!({
        "jsonrpc": "2.0",
        "id": 9,
        "method": "tools/call",
        "params": {"name": "crawl", "arguments": {"pattern": "https://a.test/*"}}
    });
    let original = app
        .clone()
        .oneshot(post(Some(&id), None, &call))
        .await
        .unwrap();
    assert_eq!(session.in_flight(), 1);

    // Dropped unread: the rejection must not take the running call with it.
    let duplicate = app
        .clone()
        .oneshot(post(Some(&id), None, &call))
        .await
        .unwrap();
    drop(duplicate);
    assert_eq!(session.in_flight(), 1);

    let duplicate = app.oneshot(post(Some(&id), None, &call)).await.unwrap();
    let events = sse_events(duplicate).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["error"]["code"], -32600);
    assert_eq!(session.in_flight(), 1);

    drop(original);
    assert_eq!(session.in_flight(), 0);
}
