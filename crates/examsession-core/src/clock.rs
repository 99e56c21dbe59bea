//! Deadline clock.
//!
//! Remaining time is always recomputed from the attempt's absolute expiry
//! instant, never accumulated from ticks, so a suspended process gains no time
//! when it resumes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

/// Source of the current wall-clock instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The host wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used by tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += delta;
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = instant;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// What one observation of the deadline produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineEvent {
    /// Time is left.
    Tick(Duration),
    /// Remaining time reached zero. Produced exactly once.
    Expired,
}

/// Countdown towards an absolute expiry instant.
pub struct DeadlineClock {
    expires_at: DateTime<Utc>,
    clock: Arc<dyn Clock>,
    /// Lowest remaining value reported so far, in milliseconds.
    floor_ms: AtomicU64,
    expired: AtomicBool,
}

impl DeadlineClock {
    pub fn new(expires_at: DateTime<Utc>, clock: Arc<dyn Clock>) -> Self {
        Self {
            expires_at,
            clock,
            floor_ms: AtomicU64::new(u64::MAX),
            expired: AtomicBool::new(false),
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// `max(0, expiry - now)`, never larger than any value returned before.
    ///
    /// A wall clock stepping backwards cannot hand time back to the candidate.
    pub fn remaining(&self) -> Duration {
        let left = (self.expires_at - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let left_ms = u64::try_from(left.as_millis()).unwrap_or(u64::MAX);
        let previous = self.floor_ms.fetch_min(left_ms, Ordering::SeqCst);
        Duration::from_millis(previous.min(left_ms))
    }

    /// Whether the `Expired` event has already been produced.
    pub fn has_fired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    /// Observe the deadline once. Returns `None` after expiry has been reported.
    pub fn poll(&self) -> Option<DeadlineEvent> {
        let remaining = self.remaining();
        if !remaining.is_zero() {
            return Some(DeadlineEvent::Tick(remaining));
        }
        if self.expired.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(DeadlineEvent::Expired)
        }
    }
}

impl std::fmt::Debug for DeadlineClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadlineClock")
            .field("expires_at", &self.expires_at)
            .field("expired", &self.has_fired())
            .finish()
    }
}

/// Drive the deadline: publish the remaining time every `period` and return
/// `true` once it expires, or `false` if `shutdown` fires first.
///
/// Each wait is capped at the remaining time, so expiry is observed when it
/// happens rather than up to one period later. The zero reading is always
/// published before this returns `true`.
pub async fn run_deadline(
    deadline: Arc<DeadlineClock>,
    period: Duration,
    ticks: Arc<watch::Sender<Duration>>,
    mut shutdown: watch::Receiver<bool>,
) -> bool {
    loop {
        if *shutdown.borrow() {
            return false;
        }

        let wait = match deadline.poll() {
            Some(DeadlineEvent::Tick(remaining)) => {
                let remaining_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX);
                tracing::debug!(remaining_ms, "deadline tick");
                ticks.send_replace(remaining);
                period.min(remaining)
            }
            Some(DeadlineEvent::Expired) => {
                ticks.send_replace(Duration::ZERO);
                tracing::info!(expires_at = %deadline.expires_at(), "deadline expired");
                return true;
            }
            None => return false,
        };

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return false;
                }
            }
            _ = tokio::time::sleep(wait) => {}
        }
    }
}
