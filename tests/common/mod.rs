//! Shared test doubles: a scripted in-memory job service.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use fetchfox_mcp::credentials::Credential;
use fetchfox_mcp::fetchfox::{
    JobService, Operation, ProgressListener, ProgressListeners, RawProgress, RemoteError,
    RemoteJob, RemoteResult, Subscription,
};
use fetchfox_mcp::invocation::{InvocationContext, ToolController};
use fetchfox_mcp::mcp::protocol::OutgoingMessage;

/// One step of a scripted job: wait, then emit.
#[derive(Debug, Clone, Copy)]
pub struct Step {
    pub after: Duration,
    pub progress: Option<RawProgress>,
}

impl Step {
    pub fn progress(after_ms: u64, progress: f64, total: f64) -> Self {
        Self {
            after: Duration::from_millis(after_ms),
            progress: Some(RawProgress::new(progress, total)),
        }
    }

    pub fn malformed(after_ms: u64) -> Self {
        Self {
            after: Duration::from_millis(after_ms),
            progress: None,
        }
    }
}

/// How a scripted job runs and ends.
#[derive(Debug, Clone)]
pub struct Script {
    pub steps: Vec<Step>,
    /// Delay between the last step and completion.
    pub tail: Duration,
    pub outcome: Result<Value, String>,
}

impl Script {
    pub fn succeeding(steps: Vec<Step>, result: Value) -> Self {
        Self {
            steps,
            tail: Duration::ZERO,
            outcome: Ok(result),
        }
    }

    pub fn failing(steps: Vec<Step>, message: &str) -> Self {
        Self {
            steps,
            tail: Duration::ZERO,
            outcome: Err(message.to_string()),
        }
    }

    #[must_use]
    pub fn with_tail(mut self, tail: Duration) -> Self {
        self.tail = tail;
        self
    }
}

/// What the service should do with the next submission.
#[derive(Debug, Clone)]
pub enum Submission {
    Accept(Script),
    Reject { status: u16, body: String },
}

/// An in-memory [`JobService`] replaying queued scripts.
#[derive(Default)]
pub struct FakeService {
    queue: Mutex<VecDeque<Submission>>,
    submissions: AtomicUsize,
    credentials: Mutex<Vec<String>>,
    bodies: Mutex<Vec<(Operation, Value)>>,
    listeners: Mutex<Vec<ProgressListeners>>,
}

impl FakeService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, submission: Submission) {
        self.queue.lock().unwrap().push_back(submission);
    }

    pub fn accept(&self, script: Script) {
        self.push(Submission::Accept(script));
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Raw keys the service was called with, in order.
    pub fn credentials(&self) -> Vec<String> {
        self.credentials.lock().unwrap().clone()
    }

    pub fn bodies(&self) -> Vec<(Operation, Value)> {
        self.bodies.lock().unwrap().clone()
    }

    /// Listeners still attached across every job submitted so far.
    pub fn attached_listeners(&self) -> usize {
        self.listeners.lock().unwrap().iter().map(ProgressListeners::len).sum()
    }
}

#[async_trait]
impl JobService for FakeService {
    async fn submit(
        &self,
        operation: Operation,
        params: &Value,
        credential: &Credential,
    ) -> RemoteResult<Box<dyn RemoteJob>> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst);
        self.credentials
            .lock()
            .unwrap()
            .push(credential.expose().to_string());
        self.bodies.lock().unwrap().push((operation, params.clone()));

        let next = self.queue.lock().unwrap().pop_front();
        let script = match next {
            Some(Submission::Accept(script)) => script,
            Some(Submission::Reject { status, body }) => {
                return Err(RemoteError::status(status, &body));
            }
            None => panic!("no script queued for submission {n}"),
        };

        let listeners = ProgressListeners::new();
        self.listeners.lock().unwrap().push(listeners.clone());

        Ok(Box::new(FakeJob {
            id: format!("job-{n}"),
            script,
            listeners,
        }))
    }
}

struct FakeJob {
    id: String,
    script: Script,
    listeners: ProgressListeners,
}

#[async_trait]
impl RemoteJob for FakeJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn on_progress(&self, listener: ProgressListener) -> Subscription {
        self.listeners.subscribe(listener)
    }

    async fn finished(&self) -> RemoteResult<Value> {
        for step in &self.script.steps {
            tokio::time::sleep(step.after).await;
            self.listeners.emit(step.progress);
        }
        tokio::time::sleep(self.script.tail).await;
        self.script
            .outcome
            .clone()
            .map_err(|message| RemoteError::JobFailed { message })
    }
}

pub fn controller(service: &Arc<FakeService>, default_key: Option<&str>) -> ToolController {
    ToolController::new(
        Arc::clone(service) as Arc<dyn JobService>,
        default_key.map(Credential::new),
    )
}

/// A context with a progress token, plus the receiving end of its sink.
pub fn context(token: &str) -> (InvocationContext, mpsc::UnboundedReceiver<OutgoingMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let ctx =
        InvocationContext::new(tx).with_progress_token(Some(Value::String(token.to_string())));
    (ctx, rx)
}

/// Drains every message currently queued.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<OutgoingMessage>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        out.push(serde_json::to_value(message).unwrap());
    }
    out
}

/// The `progress` values of the progress notifications among `messages`.
pub fn progress_values(messages: &[Value]) -> Vec<u64> {
    messages
        .iter()
        .filter(|m| m["method"] == "notifications/progress")
        .map(|m| m["params"]["progress"].as_u64().unwrap())
        .collect()
}
