// src/clock.rs

//! Settable virtual time shared by a driver and the stages it feeds.
//!
//! Several clocks may exist at once (one per test, one per replay); nothing
//! in the engine reads a global clock.

use std::sync::Arc;

use tokio::sync::watch;

use crate::model::Timestamp;

#[derive(Debug, Clone)]
pub struct LogicalClock {
    now: Arc<watch::Sender<Timestamp>>,
}

impl LogicalClock {
    pub fn new(start: Timestamp) -> Self {
        let (tx, _rx) = watch::channel(start);
        Self { now: Arc::new(tx) }
    }

    /// Clock starting at the Unix epoch.
    pub fn epoch() -> Self {
        Self::new(Timestamp::EPOCH)
    }

    pub fn now(&self) -> Timestamp {
        *self.now.borrow()
    }

    /// Move the clock to `t`. Time never goes backwards: setting an earlier
    /// time is a no-op. Returns whether the clock moved.
    pub fn set(&self, t: Timestamp) -> bool {
        self.now.send_if_modified(|current| {
            if t > *current {
                *current = t;
                true
            } else {
                false
            }
        })
    }

    /// Resolve once the clock reads `t` or later, returning the time observed.
    pub async fn wait_until(&self, t: Timestamp) -> Timestamp {
        let mut rx = self.now.subscribe();
        match rx.wait_for(|now| *now >= t).await {
            Ok(now) => *now,
            // The sender lives as long as `self`, so this is unreachable in
            // practice.
            Err(_) => self.now(),
        }
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::epoch()
    }
}
