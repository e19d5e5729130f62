//! Streamable HTTP transport.
//!
//! A single `/mcp` endpoint:
//!
//! - `POST` carries one JSON-RPC message. An `initialize` without a session
//!   id opens a session and returns its id in `Mcp-Session-Id`; every other
//!   message must name a live session. Notifications are answered with
//!   `202 Accepted`, `tools/call` with an SSE stream of the call's
//!   notifications followed by its reply, and other requests with plain JSON.
//! - `GET` opens a long-lived SSE stream for the session. It stays open until
//!   the session is deleted or expires.
//! - `DELETE` ends the session and aborts its running calls.
//!
//! Clients that disappear without a `DELETE` leave their session behind. When
//! an idle timeout is configured, sessions that saw no request and ran no
//! tool call for that long are closed by a periodic sweep; without one the
//! session table grows until shutdown.
//!
//! Every request must be authenticated, either by the process-wide API key
//! or by an `Authorization: Bearer` header.

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::extract::State;
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use axum::Router;
use futures::stream::{self, Stream, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::API_KEY_HELP;
use crate::mcp::protocol::{
    parse_message, ErrorCode, JsonRpcError, JsonRpcErrorData, OutgoingMessage,
};
use crate::mcp::server::{CallToken, McpServer, Session};

/// Header carrying the session id, in both directions.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Path of the MCP endpoint.
pub const MCP_PATH: &str = "/mcp";

/// Longest gap between two idle-session sweeps.
const MAX_SWEEP_PERIOD: Duration = Duration::from_secs(60);

struct StoredSession {
    session: Arc<Session>,
    last_seen: Instant,
}

/// Live HTTP sessions by id.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, StoredSession>>,
}

impl SessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session under its id. Sessions without an id are ignored.
    pub fn insert(&self, session: Arc<Session>) {
        if let Some(id) = session.id().map(str::to_string) {
            let stored = StoredSession {
                session,
                last_seen: Instant::now(),
            };
            self.lock().insert(id, stored);
        }
    }

    /// Looks up a session and marks it as just used.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let mut sessions = self.lock();
        let stored = sessions.get_mut(id)?;
        stored.last_seen = Instant::now();
        Some(Arc::clone(&stored.session))
    }

    /// Removes a session, returning it.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.lock().remove(id).map(|stored| stored.session)
    }

    /// Closes and removes sessions unused for at least `max_idle`.
    ///
    /// A session with a running tool call is never idle. Returns the number
    /// of sessions closed.
    pub fn expire_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.lock().retain(|_, stored| {
            if stored.session.in_flight() > 0 {
                stored.last_seen = now;
                return true;
            }
            if now.duration_since(stored.last_seen) < max_idle {
                return true;
            }
            expired.push(Arc::clone(&stored.session));
            false
        });

        for session in &expired {
            tracing::info!(session = ?session.id(), "HTTP session expired");
            session.close();
        }
        expired.len()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if there are no live sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Closes and removes every session.
    pub fn close_all(&self) {
        let sessions: Vec<_> = self.lock().drain().map(|(_, s)| s.session).collect();
        for session in sessions {
            session.close();
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StoredSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
struct AppState {
    server: Arc<McpServer>,
    sessions: Arc<SessionStore>,
}

/// Errors answered before a message reaches a session.
enum HttpError {
    Unauthorized,
    Malformed(JsonRpcError),
    NoSession,
    InvalidSession,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthorized => {
                let body = JsonRpcError::unauthorized(None, API_KEY_HELP);
                (
                    StatusCode::UNAUTHORIZED,
                    [(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"))],
                    Json(body),
                )
                    .into_response()
            }
            Self::Malformed(error) => (StatusCode::BAD_REQUEST, Json(error)).into_response(),
            Self::NoSession => {
                let body = JsonRpcError::new(
                    None,
                    JsonRpcErrorData::with_message(
                        ErrorCode::ServerError(-32000),
                        "Bad Request: No valid session ID provided",
                    ),
                );
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
            Self::InvalidSession => {
                (StatusCode::BAD_REQUEST, "Invalid or missing session ID").into_response()
            }
        }
    }
}

/// Builds the HTTP router.
pub fn router(server: Arc<McpServer>, sessions: Arc<SessionStore>) -> Router {
    Router::new()
        .route(
            MCP_PATH,
            post(handle_post).get(handle_get).delete(handle_delete),
        )
        .with_state(AppState { server, sessions })
}

/// Serves the HTTP transport on `addr` until `shutdown` resolves.
///
/// Sessions idle for `idle_timeout` are closed; `None` keeps them until
/// they are deleted.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or serving fails.
pub async fn serve<F>(
    server: Arc<McpServer>,
    addr: SocketAddr,
    idle_timeout: Option<Duration>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let sessions = Arc::new(SessionStore::new());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %listener.local_addr()?, path = MCP_PATH, "HTTP transport listening");

    let sweeper = idle_timeout.map(|max_idle| {
        let sessions = Arc::clone(&sessions);
        tokio::spawn(sweep_idle_sessions(sessions, max_idle))
    });

    let app = router(server, Arc::clone(&sessions));
    let result = axum::serve(listener, app).with_graceful_shutdown(shutdown).await;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    tracing::info!(sessions = sessions.len(), "Closing HTTP sessions");
    sessions.close_all();
    result
}

async fn sweep_idle_sessions(sessions: Arc<SessionStore>, max_idle: Duration) {
    let period = max_idle.min(MAX_SWEEP_PERIOD);
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let expired = sessions.expire_idle(max_idle);
        if expired > 0 {
            tracing::debug!(expired, remaining = sessions.len(), "Swept idle HTTP sessions");
        }
    }
}

fn authorization(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok())
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Option<String>, HttpError> {
    let authorization = authorization(headers);
    state
        .server
        .controller()
        .resolve_credential(authorization.as_deref())
        .map_err(|_| HttpError::Unauthorized)?;
    Ok(authorization)
}

async fn handle_post(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    match post_message(&state, &headers, &body) {
        Ok(response) | Err(response) => response,
    }
}

fn post_message(state: &AppState, headers: &HeaderMap, body: &str) -> Result<Response, Response> {
    let authorization = authenticate(state, headers).map_err(IntoResponse::into_response)?;
    let msg = parse_message(body).map_err(|e| HttpError::Malformed(e).into_response())?;

    let (session, created) = match session_id(headers) {
        Some(id) => (
            state
                .sessions
                .get(id)
                .ok_or_else(|| HttpError::NoSession.into_response())?,
            false,
        ),
        None if msg.is_initialize() => {
            let id = uuid::Uuid::new_v4().to_string();
            (Session::new(Arc::clone(&state.server), Some(id)), true)
        }
        None => return Err(HttpError::NoSession.into_response()),
    };

    let (sink, mut outgoing) = mpsc::unbounded_channel();

    let Some(request_id) = msg.id().cloned() else {
        session.handle_message(msg, authorization, &sink);
        return Ok(StatusCode::ACCEPTED.into_response());
    };

    if msg.method() == "tools/call" {
        let call = session.handle_message(msg, authorization, &sink);
        drop(sink);
        return Ok(call_stream(session, call, outgoing).into_response());
    }

    session.handle_message(msg, authorization, &sink);
    let Ok(reply) = outgoing.try_recv() else {
        let error = JsonRpcError::internal_error(request_id, "Request produced no reply");
        return Ok((StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response());
    };

    let mut response = Json(&reply).into_response();
    if created && matches!(reply, OutgoingMessage::Response(_)) {
        state.sessions.insert(Arc::clone(&session));
        tracing::info!(session = ?session.id(), "HTTP session opened");
        if let Some(value) = session.id().and_then(|id| HeaderValue::from_str(id).ok()) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(SESSION_HEADER), value);
        }
    }
    Ok(response)
}

/// Cancels a call whose response stream went away before its reply.
///
/// Holds no token when the call was rejected; nothing was started then.
struct CallGuard {
    session: Arc<Session>,
    call: Option<CallToken>,
    replied: bool,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        let Some(call) = self.call.take() else {
            return;
        };
        if !self.replied && self.session.cancel_call(&call) {
            tracing::info!(
                request_id = %call.request_id(),
                "Client disconnected, tool call released"
            );
        }
    }
}

fn call_stream(
    session: Arc<Session>,
    call: Option<CallToken>,
    outgoing: mpsc::UnboundedReceiver<OutgoingMessage>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let guard = CallGuard {
        session,
        call,
        replied: false,
    };

    let events = stream::unfold((outgoing, guard), |(mut outgoing, mut guard)| async move {
        if guard.replied {
            return None;
        }
        let message = outgoing.recv().await?;
        guard.replied = message.is_reply();
        Some((Event::default().json_data(&message), (outgoing, guard)))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn handle_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(e) = authenticate(&state, &headers) {
        return e.into_response();
    }
    let Some(session) = session_id(&headers).and_then(|id| state.sessions.get(id)) else {
        return HttpError::InvalidSession.into_response();
    };

    let mut closed = session.closed();
    let events = stream::pending::<Result<Event, Infallible>>().take_until(async move {
        let _ = closed.wait_for(|closed| *closed).await;
    });

    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

async fn handle_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(e) = authenticate(&state, &headers) {
        return e.into_response();
    }
    let Some(session) = session_id(&headers).and_then(|id| state.sessions.remove(id)) else {
        return HttpError::InvalidSession.into_response();
    };

    session.close();
    tracing::info!(session = ?session.id(), "HTTP session closed");
    (StatusCode::OK, Json(json!({}))).into_response()
}
