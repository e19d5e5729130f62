//! MCP server implementation for FetchFox tools.
//!
//! This module implements the MCP server lifecycle:
//!
//! 1. **Initialisation**: Capability negotiation and version agreement
//! 2. **Operation**: Handling tool calls and other requests
//! 3. **Shutdown**: Graceful connection termination
//!
//! # Architecture
//!
//! [`McpServer`] holds what every connection shares: the tool registry and
//! the [`ToolController`]. A [`Session`] is one logical connection (the stdio
//! stream, or one HTTP session) and tracks its own lifecycle state.
//!
//! Tool calls run as separate tasks so a connection keeps answering `ping`
//! and further calls while a job is outstanding. Each call's task is
//! registered by request id; `notifications/cancelled` and session close
//! abort it, which releases its progress relay and job subscription.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;

use crate::error::ToolError;
use crate::invocation::{ClientSink, InvocationContext, ToolController};
use crate::mcp::params::{self, AddParams, EchoParams};
use crate::mcp::protocol::{
    negotiate_version, ErrorCode, IncomingMessage, JsonRpcError, JsonRpcErrorData,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, LogLevel, OutgoingMessage, RequestId,
    SERVER_NAME,
};
use crate::mcp::tools::{tool_definitions, ToolKind};
use crate::mcp::transport::{StdioTransport, StdioWriter};

/// Server state in the MCP lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for initialize request.
    AwaitingInit,
    /// Initialize received, waiting for initialized notification.
    Initialising,
    /// Ready for normal operation.
    Running,
    /// Shutdown in progress.
    ShuttingDown,
}

/// Server capabilities advertised during initialisation.
#[derive(Debug, Clone, Serialize)]
pub struct ServerCapabilities {
    /// Tool-related capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolCapabilities>,
    /// Present when the server sends log notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<Value>,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: Some(ToolCapabilities::default()),
            logging: Some(json!({})),
        }
    }
}

/// Tool-specific capabilities.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolCapabilities {
    /// Whether the tool list can change during the session.
    #[serde(rename = "listChanged", skip_serializing_if = "is_false")]
    pub list_changed: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde's skip_serializing_if requires a predicate fn(&T) -> bool, so we must take &bool here
const fn is_false(b: &bool) -> bool {
    !*b
}

/// Server information for initialisation response.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Client information received during initialisation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    #[serde(default)]
    pub version: Option<String>,
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by client.
    pub protocol_version: String,
    /// Client capabilities.
    #[serde(default)]
    pub capabilities: Value,
    /// Client information.
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

/// Request metadata carried in `params._meta`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMeta {
    /// Token to correlate progress notifications with this request.
    #[serde(default)]
    pub progress_token: Option<Value>,
}

/// Parameters for tools/call request.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    /// Name of the tool to call.
    pub name: String,
    /// Arguments for the tool.
    #[serde(default)]
    pub arguments: Value,
    /// Request metadata.
    #[serde(rename = "_meta", default)]
    pub meta: Option<RequestMeta>,
}

#[derive(Debug, Deserialize)]
struct SetLevelParams {
    level: LogLevel,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelledParams {
    request_id: RequestId,
    #[serde(default)]
    reason: Option<String>,
}

/// Content item in a tool call response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
}

/// Result of a tool call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content returned by the tool.
    pub content: Vec<ToolContent>,
    /// Machine-readable result matching the tool's output schema.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    /// Whether the tool call resulted in an error.
    #[serde(skip_serializing_if = "is_false")]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Creates a successful text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            structured_content: None,
            is_error: false,
        }
    }

    /// Creates a successful structured result.
    ///
    /// The text content is the JSON serialisation of `structured`, for
    /// clients that ignore `structuredContent`.
    #[must_use]
    pub fn structured(structured: Value) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: structured.to_string(),
            }],
            structured_content: Some(structured),
            is_error: false,
        }
    }

    /// Creates an error text result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            structured_content: None,
            is_error: true,
        }
    }
}

/// The MCP server for FetchFox tools.
pub struct McpServer {
    /// Runs remote-backed tools.
    controller: ToolController,
}

impl McpServer {
    /// Creates a new MCP server.
    #[must_use]
    pub const fn new(controller: ToolController) -> Self {
        Self { controller }
    }

    /// Returns the tool controller.
    #[must_use]
    pub const fn controller(&self) -> &ToolController {
        &self.controller
    }

    /// Calls a tool by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool is unknown, its arguments are invalid,
    /// or its remote job fails.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: &Value,
        ctx: &InvocationContext,
    ) -> Result<ToolCallResult, ToolError> {
        let kind =
            ToolKind::from_name(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let invalid = |message: String| ToolError::InvalidArguments {
            tool: name.to_string(),
            message,
        };

        match kind {
            ToolKind::Echo => {
                let args: EchoParams = params::parse(arguments).map_err(invalid)?;
                Ok(ToolCallResult::text(args.message))
            }
            ToolKind::Add => {
                let args: AddParams = params::parse(arguments).map_err(invalid)?;
                Ok(ToolCallResult::text((args.a + args.b).to_string()))
            }
            ToolKind::Remote(operation) => {
                let body = params::prepare(operation, arguments).map_err(invalid)?;
                let output = self.controller.invoke(operation, body, ctx).await?;
                Ok(ToolCallResult::structured(output.structured()))
            }
        }
    }

    /// Serves a single session over stdin/stdout until EOF or a shutdown
    /// signal.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn run_stdio(self: Arc<Self>) -> std::io::Result<()> {
        let session = Session::new(Arc::clone(&self), None);
        let mut transport = StdioTransport::new();
        let (sink, outgoing) = mpsc::unbounded_channel();
        let writer = tokio::spawn(StdioWriter::new().run(outgoing));

        let result = run_with_shutdown(&session, &mut transport, &sink).await;

        session.close();
        drop(sink);
        // Aborted calls drop their sinks as the runtime reaps them.
        if tokio::time::timeout(Duration::from_secs(1), writer).await.is_err() {
            tracing::debug!("Output writer did not drain before shutdown");
        }
        result
    }
}

/// Runs the main loop and handles shutdown.
#[cfg(unix)]
async fn run_with_shutdown(
    session: &Arc<Session>,
    transport: &mut StdioTransport,
    sink: &ClientSink,
) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).map_err(std::io::Error::other)?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(std::io::Error::other)?;

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
                return Ok(());
            }

            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
                return Ok(());
            }

            line_result = transport.read_line() => {
                if handle_transport_result(session, line_result?, sink) {
                    return Ok(());
                }
            }
        }
    }
}

/// Runs the main loop and handles shutdown.
#[cfg(windows)]
async fn run_with_shutdown(
    session: &Arc<Session>,
    transport: &mut StdioTransport,
    sink: &ClientSink,
) -> std::io::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown");
                return Ok(());
            }

            line_result = transport.read_line() => {
                if handle_transport_result(session, line_result?, sink) {
                    return Ok(());
                }
            }
        }
    }
}

/// Handles one line read from stdin.
///
/// Returns `true` if the server should shut down.
fn handle_transport_result(
    session: &Arc<Session>,
    line: Option<String>,
    sink: &ClientSink,
) -> bool {
    let Some(line) = line else {
        tracing::info!("stdin closed");
        return true;
    };

    if line.trim().is_empty() {
        return false;
    }

    session.handle_line(&line, None, sink);
    session.state() == ServerState::ShuttingDown
}

struct SessionState {
    state: ServerState,
    /// Negotiated protocol version (set after initialisation).
    protocol_version: Option<String>,
    /// Minimum level of log notifications sent to the client.
    log_level: LogLevel,
}

/// A running tool call, as registered in its session.
struct InFlight {
    generation: u64,
    abort: AbortHandle,
}

/// Identifies one registered tool call.
///
/// Request ids can be reused once a call ends; the generation tells two
/// calls with the same id apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallToken {
    id: RequestId,
    generation: u64,
}

impl CallToken {
    /// The request id of the call.
    #[must_use]
    pub const fn request_id(&self) -> &RequestId {
        &self.id
    }
}

/// One logical MCP connection.
pub struct Session {
    server: Arc<McpServer>,
    id: Option<String>,
    state: Mutex<SessionState>,
    in_flight: Mutex<HashMap<RequestId, InFlight>>,
    next_generation: AtomicU64,
    closed: watch::Sender<bool>,
}

impl Session {
    /// Creates a session awaiting `initialize`.
    ///
    /// `id` is the HTTP session id; stdio sessions have none.
    #[must_use]
    pub fn new(server: Arc<McpServer>, id: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            server,
            id,
            state: Mutex::new(SessionState {
                state: ServerState::AwaitingInit,
                protocol_version: None,
                log_level: LogLevel::Info,
            }),
            in_flight: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            closed: watch::channel(false).0,
        })
    }

    /// Returns the HTTP session id, if any.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        lock(&self.state).state
    }

    /// Returns the negotiated protocol version, once initialised.
    #[must_use]
    pub fn protocol_version(&self) -> Option<String> {
        lock(&self.state).protocol_version.clone()
    }

    /// Returns the number of tool calls still running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Returns a receiver that flips to `true` when the session closes.
    #[must_use]
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    /// Closes the session, aborting every running tool call.
    ///
    /// Remote jobs keep running on the service; only local resources are
    /// released.
    pub fn close(&self) {
        lock(&self.state).state = ServerState::ShuttingDown;
        let calls: Vec<_> = lock(&self.in_flight).drain().collect();
        for (id, call) in calls {
            tracing::debug!(request_id = %id, "Aborting tool call on session close");
            call.abort.abort();
        }
        self.closed.send_replace(true);
    }

    /// Aborts a running tool call. Its reply is never sent.
    ///
    /// Returns `false` if no call with that id is running.
    pub fn cancel(&self, id: &RequestId) -> bool {
        let Some(call) = lock(&self.in_flight).remove(id) else {
            return false;
        };
        call.abort.abort();
        true
    }

    /// Aborts the call `token` was issued for, if it is still running.
    ///
    /// A later call that reuses the request id is left alone.
    pub fn cancel_call(&self, token: &CallToken) -> bool {
        let mut in_flight = lock(&self.in_flight);
        match in_flight.get(&token.id) {
            Some(call) if call.generation == token.generation => {}
            _ => return false,
        }
        if let Some(call) = in_flight.remove(&token.id) {
            call.abort.abort();
        }
        true
    }

    /// Parses and handles a single line of input.
    pub fn handle_line(
        self: &Arc<Self>,
        line: &str,
        authorization: Option<String>,
        sink: &ClientSink,
    ) {
        use crate::mcp::protocol::parse_message;

        match parse_message(line) {
            Ok(msg) => {
                self.handle_message(msg, authorization, sink);
            }
            Err(error) => reply(sink, Err(error)),
        }
    }

    /// Handles a parsed incoming message.
    ///
    /// Replies go to `sink`. A `tools/call` replies from its own task once the
    /// tool finishes; every other request is answered before this returns.
    ///
    /// Returns a token for the tool call this message started, if any. A
    /// rejected `tools/call` starts nothing and has already been answered.
    pub fn handle_message(
        self: &Arc<Self>,
        msg: IncomingMessage,
        authorization: Option<String>,
        sink: &ClientSink,
    ) -> Option<CallToken> {
        match msg {
            IncomingMessage::Request(req) => self.handle_request(req, authorization, sink),
            IncomingMessage::Notification(ref notif) => {
                self.handle_notification(notif);
                None
            }
        }
    }

    /// Handles an incoming request.
    fn handle_request(
        self: &Arc<Self>,
        req: JsonRpcRequest,
        authorization: Option<String>,
        sink: &ClientSink,
    ) -> Option<CallToken> {
        let response = match req.method.as_str() {
            "initialize" => self.handle_initialize(&req),
            "tools/list" => self.handle_tools_list(&req),
            "tools/call" => match self.spawn_tool_call(req, authorization, sink) {
                Ok(token) => return Some(token),
                Err(error) => Err(error),
            },
            "logging/setLevel" => self.handle_set_level(&req),
            "ping" => Ok(Self::handle_ping(&req)),
            _ => Err(JsonRpcError::method_not_found(req.id.clone(), &req.method)),
        };

        reply(sink, response);
        None
    }

    /// Handles an incoming notification.
    fn handle_notification(&self, notif: &JsonRpcNotification) {
        match notif.method.as_str() {
            "notifications/initialized" => {
                let mut state = lock(&self.state);
                if state.state == ServerState::Initialising {
                    state.state = ServerState::Running;
                }
            }
            "notifications/cancelled" => {
                let Some(params) = notif
                    .params
                    .as_ref()
                    .and_then(|p| serde_json::from_value::<CancelledParams>(p.clone()).ok())
                else {
                    return;
                };
                if self.cancel(&params.request_id) {
                    tracing::info!(
                        request_id = %params.request_id,
                        reason = params.reason.as_deref().unwrap_or(""),
                        "Tool call cancelled by client"
                    );
                }
            }
            other => tracing::debug!(method = other, "Ignoring notification"),
        }
    }

    /// Handles the initialize request.
    fn handle_initialize(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        let mut state = lock(&self.state);
        if state.state != ServerState::AwaitingInit {
            return Err(JsonRpcError::new(
                Some(req.id.clone()),
                JsonRpcErrorData::with_message(
                    ErrorCode::InvalidRequest,
                    "Server already initialised",
                ),
            ));
        }

        let params: InitializeParams = parse_params(req, "initialize")?;
        let negotiated_version = negotiate_version(&params.protocol_version).to_string();

        tracing::info!(
            client = params.client_info.as_ref().map_or("unknown", |c| c.name.as_str()),
            requested = %params.protocol_version,
            negotiated = %negotiated_version,
            session = ?self.id,
            "Client initialising"
        );

        state.protocol_version = Some(negotiated_version.clone());
        state.state = ServerState::Initialising;

        let result = json!({
            "protocolVersion": negotiated_version,
            "capabilities": ServerCapabilities::default(),
            "serverInfo": ServerInfo::default(),
        });

        Ok(JsonRpcResponse::success(req.id.clone(), result))
    }

    /// Handles the tools/list request.
    fn handle_tools_list(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        self.require_running(&req.id)?;

        let result = json!({
            "tools": tool_definitions(),
        });

        Ok(JsonRpcResponse::success(req.id.clone(), result))
    }

    /// Handles the logging/setLevel request.
    fn handle_set_level(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        self.require_running(&req.id)?;
        let params: SetLevelParams = parse_params(req, "logging/setLevel")?;
        lock(&self.state).log_level = params.level;
        Ok(JsonRpcResponse::success(req.id.clone(), json!({})))
    }

    /// Starts a tools/call request in its own task.
    fn spawn_tool_call(
        self: &Arc<Self>,
        req: JsonRpcRequest,
        authorization: Option<String>,
        sink: &ClientSink,
    ) -> Result<CallToken, JsonRpcError> {
        self.require_running(&req.id)?;
        let ToolCallParams {
            name,
            arguments,
            meta,
        } = parse_params(&req, "tool call")?;

        let ctx = InvocationContext::new(sink.clone())
            .with_authorization(authorization)
            .with_session_id(self.id.clone())
            .with_progress_token(meta.and_then(|m| m.progress_token))
            .with_log_level(lock(&self.state).log_level);

        let mut in_flight = lock(&self.in_flight);
        if in_flight.contains_key(&req.id) {
            return Err(JsonRpcError::new(
                Some(req.id),
                JsonRpcErrorData::with_message(
                    ErrorCode::InvalidRequest,
                    "A request with this id is already running",
                ),
            ));
        }

        let token = CallToken {
            id: req.id,
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
        };

        let session = Arc::clone(self);
        let own = token.clone();
        let sink = sink.clone();
        let task = tokio::spawn(async move {
            let response = session
                .run_tool_call(&own.id, &name, &arguments, &ctx)
                .await;
            // A call cancelled in the meantime has already been removed and
            // must not answer.
            if session.finish_call(&own) {
                reply(&sink, response);
            }
        });
        in_flight.insert(
            token.id.clone(),
            InFlight {
                generation: token.generation,
                abort: task.abort_handle(),
            },
        );
        drop(in_flight);

        Ok(token)
    }

    /// Removes a finished call. Returns `false` if it was cancelled first.
    fn finish_call(&self, token: &CallToken) -> bool {
        let mut in_flight = lock(&self.in_flight);
        match in_flight.get(&token.id) {
            Some(call) if call.generation == token.generation => {
                in_flight.remove(&token.id);
                true
            }
            _ => false,
        }
    }

    /// Runs a tool call and turns its outcome into a JSON-RPC reply.
    async fn run_tool_call(
        &self,
        id: &RequestId,
        name: &str,
        arguments: &Value,
        ctx: &InvocationContext,
    ) -> Result<JsonRpcResponse, JsonRpcError> {
        let result = match self.server.call_tool(name, arguments, ctx).await {
            Ok(result) => result,
            Err(error) if error.is_auth() => {
                tracing::warn!(tool = name, "Tool call rejected: no credential");
                return Err(JsonRpcError::unauthorized(Some(id.clone()), error.to_string()));
            }
            Err(error) => {
                tracing::warn!(tool = name, error = %error, "Tool call failed");
                ToolCallResult::error(error.to_string())
            }
        };

        let result_value = serde_json::to_value(&result).map_err(|e| {
            tracing::error!(error = %e, "Failed to serialise tool call result");
            JsonRpcError::internal_error(id.clone(), "Internal error: failed to serialise result")
        })?;

        Ok(JsonRpcResponse::success(id.clone(), result_value))
    }

    /// Handles the ping request.
    fn handle_ping(req: &JsonRpcRequest) -> JsonRpcResponse {
        JsonRpcResponse::success(req.id.clone(), json!({}))
    }

    /// Ensures the session is in the Running state.
    fn require_running(&self, id: &RequestId) -> Result<(), JsonRpcError> {
        if self.state() != ServerState::Running {
            return Err(JsonRpcError::new(
                Some(id.clone()),
                JsonRpcErrorData::with_message(ErrorCode::InvalidRequest, "Server not initialised"),
            ));
        }
        Ok(())
    }
}

/// Deserialises a request's params, rejecting missing params.
fn parse_params<T: serde::de::DeserializeOwned>(
    req: &JsonRpcRequest,
    what: &str,
) -> Result<T, JsonRpcError> {
    req.params
        .as_ref()
        .map(|p| serde_json::from_value(p.clone()))
        .transpose()
        .map_err(|e| {
            JsonRpcError::invalid_params(req.id.clone(), format!("Invalid {what} params: {e}"))
        })?
        .ok_or_else(|| {
            JsonRpcError::invalid_params(req.id.clone(), format!("Missing {what} params"))
        })
}

fn reply(sink: &ClientSink, response: Result<JsonRpcResponse, JsonRpcError>) {
    let message = match response {
        Ok(resp) => OutgoingMessage::from(resp),
        Err(error) => OutgoingMessage::from(error),
    };
    if sink.send(message).is_err() {
        tracing::debug!("Client went away before the reply was sent");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
