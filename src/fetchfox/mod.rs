//! FetchFox remote job interface.
//!
//! The scraping itself happens on the FetchFox service. This module defines
//! the narrow interface the tool layer needs from it:
//!
//! - [`JobService::submit`] starts a detached job and returns a [`RemoteJob`]
//! - [`RemoteJob::on_progress`] attaches a listener, returning a
//!   [`Subscription`] that detaches it again
//! - [`RemoteJob::finished`] waits for the job's result
//!
//! [`FetchFoxClient`] implements the interface over the FetchFox HTTP API.

mod client;
mod error;
mod events;

pub use client::FetchFoxClient;
pub use error::{RemoteError, RemoteResult};
pub use events::{ProgressListener, ProgressListeners, Subscription};

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::credentials::Credential;

/// A FetchFox operation that runs as a remote job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Find URLs matching a pattern.
    Crawl,
    /// Turn specific URLs into structured data.
    Extract,
    /// Crawl, then extract from every hit.
    Scrape,
}

impl Operation {
    /// All remote operations.
    pub const ALL: [Self; 3] = [Self::Crawl, Self::Extract, Self::Scrape];

    /// The operation's name, as used in tool names and API paths.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Crawl => "crawl",
            Self::Extract => "extract",
            Self::Scrape => "scrape",
        }
    }

    /// Looks up an operation by name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == name)
    }

    /// Whether the operation's result carries crawled URLs.
    #[must_use]
    pub const fn yields_hits(self) -> bool {
        matches!(self, Self::Crawl | Self::Scrape)
    }

    /// Whether the operation's result carries extracted items.
    #[must_use]
    pub const fn yields_items(self) -> bool {
        matches!(self, Self::Extract | Self::Scrape)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress numbers as reported by the service, in its own scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawProgress {
    /// Work done so far.
    pub progress: f64,
    /// Total work expected.
    pub total: f64,
}

impl RawProgress {
    /// Creates a progress value.
    #[must_use]
    pub const fn new(progress: f64, total: f64) -> Self {
        Self { progress, total }
    }

    /// Reads `progress.progress` and `progress.total` out of a job status
    /// payload.
    ///
    /// Returns `None` if either is missing or not a number.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let progress = payload.get("progress")?;
        Some(Self {
            progress: progress.get("progress")?.as_f64()?,
            total: progress.get("total")?.as_f64()?,
        })
    }
}

/// A running remote job.
#[async_trait]
pub trait RemoteJob: Send + Sync {
    /// Identifier assigned by the service.
    fn id(&self) -> &str;

    /// Attaches a progress listener.
    fn on_progress(&self, listener: ProgressListener) -> Subscription;

    /// Waits for the job to finish and returns its result payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the job fails or its status cannot be read.
    async fn finished(&self) -> RemoteResult<Value>;
}

/// Something that can start remote jobs.
#[async_trait]
pub trait JobService: Send + Sync {
    /// Submits a detached job.
    ///
    /// # Errors
    ///
    /// Returns an error if the service refuses or cannot be reached.
    async fn submit(
        &self,
        operation: Operation,
        params: &Value,
        credential: &Credential,
    ) -> RemoteResult<Box<dyn RemoteJob>>;
}
