//! HTTP client for the FetchFox job API.
//!
//! Jobs are submitted detached and then polled:
//!
//! - `POST {host}/api/v2/{operation}` with the tool arguments plus
//!   `"detach": true` answers `{"jobId": "..."}`
//! - `GET {host}/api/v2/jobs/{jobId}` answers
//!   `{"done": bool, "progress": {"progress": n, "total": m}, "results": {...}, "error": ...}`
//!
//! Every request carries the caller's credential as a bearer token.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Response;
use serde_json::Value;
use url::Url;

use super::{
    JobService, Operation, ProgressListener, ProgressListeners, RawProgress, RemoteError,
    RemoteJob, RemoteResult, Subscription,
};
use crate::credentials::Credential;

/// Client for the FetchFox HTTP API.
#[derive(Debug, Clone)]
pub struct FetchFoxClient {
    /// Underlying HTTP client.
    http: reqwest::Client,
    /// Service base URL, always ending in `/`.
    host: Url,
    /// Delay between job status polls.
    poll_interval: Duration,
}

impl FetchFoxClient {
    /// Creates a client for the service at `host`.
    ///
    /// `request_timeout` bounds each HTTP request, not the job as a whole.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialised.
    pub fn new(
        mut host: Url,
        poll_interval: Duration,
        request_timeout: Duration,
    ) -> RemoteResult<Self> {
        if !host.path().ends_with('/') {
            let path = format!("{}/", host.path());
            host.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("fetchfox-mcp/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            host,
            poll_interval,
        })
    }

    /// Returns the service base URL.
    #[must_use]
    pub const fn host(&self) -> &Url {
        &self.host
    }

    fn endpoint(&self, path: &str) -> RemoteResult<Url> {
        self.host
            .join(path)
            .map_err(|e| RemoteError::InvalidResponse {
                message: format!("cannot build URL for '{path}': {e}"),
            })
    }
}

#[async_trait]
impl JobService for FetchFoxClient {
    async fn submit(
        &self,
        operation: Operation,
        params: &Value,
        credential: &Credential,
    ) -> RemoteResult<Box<dyn RemoteJob>> {
        let mut body = params.clone();
        if let Value::Object(map) = &mut body {
            map.insert("detach".to_string(), Value::Bool(true));
        }

        let url = self.endpoint(&format!("api/v2/{operation}"))?;
        tracing::debug!(%operation, url = %url, "Submitting FetchFox job");

        let response = self
            .http
            .post(url)
            .bearer_auth(credential.expose())
            .json(&body)
            .send()
            .await?;
        let payload = read_json(response).await?;

        let job_id = payload
            .get("jobId")
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::InvalidResponse {
                message: "submission response has no jobId".to_string(),
            })?
            .to_string();

        let status_url = self.endpoint(&format!("api/v2/jobs/{job_id}"))?;
        tracing::info!(%operation, job_id = %job_id, "FetchFox job started");

        Ok(Box::new(FetchFoxJob {
            id: job_id,
            http: self.http.clone(),
            status_url,
            credential: credential.clone(),
            poll_interval: self.poll_interval,
            listeners: ProgressListeners::new(),
        }))
    }
}

/// A detached FetchFox job, observed by polling its status.
struct FetchFoxJob {
    id: String,
    http: reqwest::Client,
    status_url: Url,
    credential: Credential,
    poll_interval: Duration,
    listeners: ProgressListeners,
}

impl FetchFoxJob {
    async fn poll(&self) -> RemoteResult<Value> {
        let response = self
            .http
            .get(self.status_url.clone())
            .bearer_auth(self.credential.expose())
            .send()
            .await?;
        read_json(response).await
    }
}

#[async_trait]
impl RemoteJob for FetchFoxJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn on_progress(&self, listener: ProgressListener) -> Subscription {
        self.listeners.subscribe(listener)
    }

    async fn finished(&self) -> RemoteResult<Value> {
        let mut last_progress = None;

        loop {
            let payload = self.poll().await?;

            let progress = RawProgress::from_payload(&payload);
            if progress.is_some() && progress != last_progress {
                self.listeners.emit(progress);
                last_progress = progress;
            } else if progress.is_none() && payload.get("progress").is_some() {
                self.listeners.emit(None);
            }

            if payload.get("done").and_then(Value::as_bool) == Some(true) {
                if let Some(message) = job_error(&payload) {
                    tracing::info!(job_id = %self.id, "FetchFox job failed");
                    return Err(RemoteError::JobFailed { message });
                }
                tracing::info!(job_id = %self.id, "FetchFox job finished");
                return Ok(payload);
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Reads a JSON body, turning non-success statuses into errors.
async fn read_json(response: Response) -> RemoteResult<Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RemoteError::status(status.as_u16(), &body));
    }
    Ok(response.json().await?)
}

/// Extracts the failure message of a finished job, if it failed.
fn job_error(payload: &Value) -> Option<String> {
    match payload.get("error")? {
        Value::Null | Value::Bool(false) => None,
        Value::String(message) => Some(message.clone()),
        other => Some(
            other
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| other.to_string(), str::to_string),
        ),
    }
}
