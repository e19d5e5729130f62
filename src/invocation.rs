//! Tool invocation: the lifecycle of one remote-backed tool call.
//!
//! ```text
//! START -> CREDENTIAL_RESOLVED -> JOB_SUBMITTED -> RELAYING -> COMPLETED
//!                 |                                    |
//!                 v                                    v
//!            AUTH_FAILED                           JOB_FAILED
//! ```
//!
//! [`ToolController::invoke`] resolves the caller's credential, submits the
//! job, relays its progress to the caller and shapes the result into a
//! [`ToolOutput`]. The relay and the job subscription are owned by a guard
//! that releases them on every exit path, including the call's future being
//! dropped because the caller went away. The remote job is not told to stop
//! in that case.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::credentials::{self, Credential};
use crate::error::{AuthError, ToolError};
use crate::fetchfox::{JobService, Operation, Subscription};
use crate::mcp::protocol::{LogLevel, OutgoingMessage, OutgoingNotification, SERVER_NAME};
use crate::progress::{ProgressNotifier, ProgressRelay, ProgressSnapshot};

/// Channel carrying messages to the client a call came from.
pub type ClientSink = mpsc::UnboundedSender<OutgoingMessage>;

/// Everything a single call knows about its caller.
///
/// Built by the transport for each `tools/call` and dropped when the call
/// ends.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    sink: ClientSink,
    authorization: Option<String>,
    session_id: Option<String>,
    progress_token: Option<Value>,
    log_level: LogLevel,
}

impl InvocationContext {
    /// Creates a context delivering to `sink`.
    #[must_use]
    pub const fn new(sink: ClientSink) -> Self {
        Self {
            sink,
            authorization: None,
            session_id: None,
            progress_token: None,
            log_level: LogLevel::Info,
        }
    }

    /// Sets the caller's raw `Authorization` header.
    #[must_use]
    pub fn with_authorization(mut self, authorization: Option<String>) -> Self {
        self.authorization = authorization;
        self
    }

    /// Sets the HTTP session the call arrived on.
    #[must_use]
    pub fn with_session_id(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    /// Sets the caller's progress token. Without one no progress is sent.
    #[must_use]
    pub fn with_progress_token(mut self, token: Option<Value>) -> Self {
        self.progress_token = token;
        self
    }

    /// Sets the minimum level forwarded by [`log`](Self::log).
    #[must_use]
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// The caller's raw `Authorization` header, if any.
    #[must_use]
    pub fn authorization(&self) -> Option<&str> {
        self.authorization.as_deref()
    }

    /// The HTTP session id, if the call arrived over HTTP.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Sends a progress notification, if the caller asked for progress.
    pub fn notify_progress(&self, snapshot: ProgressSnapshot) {
        send_progress(&self.sink, self.progress_token.as_ref(), snapshot);
    }

    /// Returns a notifier bound to this caller, for a [`ProgressRelay`].
    #[must_use]
    pub fn progress_notifier(&self) -> ProgressNotifier {
        let sink = self.sink.clone();
        let token = self.progress_token.clone();
        Arc::new(move |snapshot: ProgressSnapshot| {
            send_progress(&sink, token.as_ref(), snapshot);
        })
    }

    /// Sends a log message to the caller if `level` is at or above the
    /// caller's threshold.
    pub fn log(&self, level: LogLevel, message: &str) {
        if level >= self.log_level {
            send(
                &self.sink,
                OutgoingNotification::log(level, SERVER_NAME, message),
            );
        }
    }
}

/// A closed sink means the caller is gone; there is nobody left to tell.
fn send(sink: &ClientSink, notification: OutgoingNotification) {
    let _ = sink.send(notification.into());
}

/// Calls without a progress token get no progress.
fn send_progress(sink: &ClientSink, token: Option<&Value>, snapshot: ProgressSnapshot) {
    if let Some(token) = token {
        send(
            sink,
            OutgoingNotification::progress(token, snapshot.progress, snapshot.total),
        );
    }
}

/// Shaped result of a remote operation.
///
/// `hits` is present only for operations that crawl, `items` only for
/// operations that extract.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// URLs found by a crawl.
    pub hits: Option<Vec<String>>,
    /// Structured items extracted from pages.
    pub items: Option<Vec<Value>>,
}

impl ToolOutput {
    /// Shapes a finished job's payload for `operation`.
    ///
    /// Fields are read from `payload.results`, or from the payload itself if
    /// it has no `results`. Missing lists become empty lists.
    #[must_use]
    pub fn from_result(operation: Operation, payload: &Value) -> Self {
        let results = payload.get("results").unwrap_or(payload);

        let hits = operation.yields_hits().then(|| {
            results
                .get("hits")
                .and_then(Value::as_array)
                .map(|hits| hits.iter().filter_map(hit_url).collect())
                .unwrap_or_default()
        });
        let items = operation.yields_items().then(|| {
            results
                .get("items")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        });

        Self { hits, items }
    }

    /// The `structuredContent` object of the tool result.
    #[must_use]
    pub fn structured(&self) -> Value {
        let mut object = Map::new();
        if let Some(hits) = &self.hits {
            object.insert(
                "hits".to_string(),
                Value::Array(hits.iter().cloned().map(Value::String).collect()),
            );
        }
        if let Some(items) = &self.items {
            object.insert("items".to_string(), Value::Array(items.clone()));
        }
        Value::Object(object)
    }
}

/// A hit is usually a bare URL; some results wrap it as `{"url": ...}`.
fn hit_url(hit: &Value) -> Option<String> {
    hit.as_str()
        .or_else(|| hit.get("url").and_then(Value::as_str))
        .map(str::to_string)
}

/// Resources held while a job is outstanding.
///
/// Released in order: relay first, then the job subscription.
struct Teardown {
    relay: ProgressRelay,
    subscription: Option<Subscription>,
}

impl Teardown {
    fn release(self) {
        drop(self);
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.relay.stop();
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
    }
}

/// Runs remote-backed tool calls.
pub struct ToolController {
    service: Arc<dyn JobService>,
    default_credential: Option<Credential>,
}

impl ToolController {
    /// Creates a controller submitting to `service`.
    ///
    /// `default_credential` is used for calls that carry no bearer token.
    #[must_use]
    pub fn new(service: Arc<dyn JobService>, default_credential: Option<Credential>) -> Self {
        Self {
            service,
            default_credential,
        }
    }

    /// Returns `true` if a process-wide credential is configured.
    #[must_use]
    pub const fn has_default_credential(&self) -> bool {
        self.default_credential.is_some()
    }

    /// Resolves the credential a caller would run with.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CredentialRequired`] if there is none.
    pub fn resolve_credential(&self, authorization: Option<&str>) -> Result<Credential, AuthError> {
        credentials::resolve(authorization, self.default_credential.as_ref())
    }

    /// Runs `operation` remotely with `params` on behalf of the caller in
    /// `ctx`.
    ///
    /// # Errors
    ///
    /// - [`ToolError::Auth`] if no credential resolves; nothing is submitted
    /// - [`ToolError::Submission`] if the service does not accept the job
    /// - [`ToolError::JobFailed`] if the job fails
    pub async fn invoke(
        &self,
        operation: Operation,
        params: Value,
        ctx: &InvocationContext,
    ) -> Result<ToolOutput, ToolError> {
        let credential = self.resolve_credential(ctx.authorization())?;

        tracing::info!(%operation, session = ?ctx.session_id(), "FetchFox run");
        ctx.log(LogLevel::Info, &format!("FetchFox run {operation}"));

        let job = self
            .service
            .submit(operation, &params, &credential)
            .await
            .map_err(|source| {
                tracing::warn!(%operation, error = %source, "FetchFox submission failed");
                ToolError::Submission { operation, source }
            })?;

        let relay = ProgressRelay::start(ctx.progress_notifier());
        let subscription = job.on_progress(relay.listener());
        let teardown = Teardown {
            relay,
            subscription: Some(subscription),
        };

        let outcome = job.finished().await;
        teardown.release();

        let payload = outcome.map_err(|source| {
            tracing::warn!(%operation, job_id = %job.id(), error = %source, "FetchFox job failed");
            ToolError::JobFailed { operation, source }
        })?;

        tracing::info!(%operation, job_id = %job.id(), "FetchFox job complete");
        Ok(ToolOutput::from_result(operation, &payload))
    }
}
