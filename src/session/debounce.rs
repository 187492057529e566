// Cancellable trailing debounce.
//
// Coalesces a burst of events into a single firing after a quiet period:
// every `arm()` replaces the pending deadline, so only the last event in a
// burst survives, and `wait()` resolves once the deadline passes. There is
// at most one pending deadline (cancel-and-replace, not queueing).

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct Debounce {
    period: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            deadline: None,
        }
    }

    /// (Re)start the quiet period, replacing any pending deadline.
    pub fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.period);
    }

    /// Drop the pending deadline, if any.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolve when the armed deadline passes; pend forever when disarmed.
    ///
    /// Intended for `tokio::select!` guarded by `is_armed()`; callers
    /// disarm (or re-arm) after a firing.
    pub async fn wait(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (paused clock)
// ---------------------------------------------------------------------------
