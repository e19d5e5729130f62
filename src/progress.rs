//! Progress relay between a remote job and the caller.
//!
//! A [`ProgressRelay`] forwards [`ProgressSnapshot`]s to a notifier from two
//! sources:
//!
//! - a heartbeat that re-sends the last snapshot every
//!   [`HEARTBEAT_INTERVAL`]
//! - job progress events, sent as soon as they arrive
//!
//! Snapshots are always on a 0 to 100 scale. Events without usable numbers
//! are dropped.
//!
//! # Stopping
//!
//! [`ProgressRelay::stop`] sets a latch under the same lock that every
//! notification is sent under, then cancels the heartbeat task. Once `stop`
//! returns the notifier is never called again, even if a job event or a
//! heartbeat tick is racing with it. Dropping the relay stops it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::fetchfox::{ProgressListener, RawProgress};

/// Maximum time between two notifications while a job is outstanding.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Job progress normalised to a 0 to 100 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    /// Percentage complete, `0..=100`.
    pub progress: u32,
    /// Always [`ProgressSnapshot::TOTAL`].
    pub total: u32,
}

impl ProgressSnapshot {
    /// The fixed scale every snapshot is expressed in.
    pub const TOTAL: u32 = 100;

    /// The snapshot before any progress has been reported.
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            progress: 0,
            total: Self::TOTAL,
        }
    }

    /// Converts service-scale progress to a snapshot.
    ///
    /// Returns `None` unless both numbers are finite and greater than zero.
    /// Progress beyond the total is clamped to 100.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // clamped to 0..=100
    pub fn normalize(raw: RawProgress) -> Option<Self> {
        let RawProgress { progress, total } = raw;
        if !progress.is_finite() || !total.is_finite() || progress <= 0.0 || total <= 0.0 {
            return None;
        }

        let percent = (progress * f64::from(Self::TOTAL) / total)
            .floor()
            .min(f64::from(Self::TOTAL));

        Some(Self {
            progress: percent as u32,
            total: Self::TOTAL,
        })
    }
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self::initial()
    }
}

/// Receives every snapshot the relay emits.
pub type ProgressNotifier = Arc<dyn Fn(ProgressSnapshot) + Send + Sync>;

struct RelayState {
    last: ProgressSnapshot,
    stopped: bool,
}

struct Shared {
    state: Mutex<RelayState>,
    notify: ProgressNotifier,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn heartbeat(&self) {
        let state = self.lock();
        if !state.stopped {
            (self.notify)(state.last);
        }
    }

    fn update(&self, raw: Option<RawProgress>) {
        let Some(snapshot) = raw.and_then(ProgressSnapshot::normalize) else {
            tracing::debug!(raw = ?raw, "Ignoring progress event without usable numbers");
            return;
        };

        let mut state = self.lock();
        if state.stopped {
            return;
        }
        if snapshot.progress < state.last.progress {
            tracing::debug!(
                progress = snapshot.progress,
                last = state.last.progress,
                "Ignoring progress regression"
            );
            return;
        }
        state.last = snapshot;
        (self.notify)(snapshot);
    }

    /// Returns `true` if this call performed the stop.
    fn stop(&self) -> bool {
        let mut state = self.lock();
        !std::mem::replace(&mut state.stopped, true)
    }
}

/// Relays progress for one outstanding job.
pub struct ProgressRelay {
    shared: Arc<Shared>,
    heartbeat: JoinHandle<()>,
}

impl ProgressRelay {
    /// Starts relaying with the standard [`HEARTBEAT_INTERVAL`].
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(notify: ProgressNotifier) -> Self {
        Self::with_interval(notify, HEARTBEAT_INTERVAL)
    }

    /// Starts relaying with a custom heartbeat period.
    ///
    /// The first heartbeat fires one `period` after the start.
    #[must_use]
    fn with_interval(notify: ProgressNotifier, period: Duration) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(RelayState {
                last: ProgressSnapshot::initial(),
                stopped: false,
            }),
            notify,
        });

        let ticker = Arc::clone(&shared);
        let heartbeat = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                ticker.heartbeat();
            }
        });

        Self { shared, heartbeat }
    }

    /// Records a job progress event and forwards it if usable.
    ///
    /// Malformed events, regressions and events after [`stop`](Self::stop)
    /// are ignored.
    pub fn update(&self, raw: Option<RawProgress>) {
        self.shared.update(raw);
    }

    /// Returns a job listener that feeds this relay.
    #[must_use]
    pub fn listener(&self) -> ProgressListener {
        let shared = Arc::clone(&self.shared);
        Arc::new(move |raw| shared.update(raw))
    }

    /// Returns the last snapshot sent (or the initial one).
    #[cfg(test)]
    fn snapshot(&self) -> ProgressSnapshot {
        self.shared.lock().last
    }

    /// Returns `true` once the relay has been stopped.
    #[cfg(test)]
    fn is_stopped(&self) -> bool {
        self.shared.lock().stopped
    }

    /// Stops the relay. Idempotent.
    pub fn stop(&self) {
        if self.shared.stop() {
            self.heartbeat.abort();
        }
    }
}

impl Drop for ProgressRelay {
    fn drop(&mut self) {
        self.stop();
    }
}
