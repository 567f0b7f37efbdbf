use chrono::{
    DateTime,
    Utc,
};
use std::sync::Mutex;
use tracing::warn;

/// Shared quota state for the upstream API.
///
/// One tracker is injected into the [`UpstreamClient`](crate::UpstreamClient)
/// and shared with the scheduler; every read or write of the reset deadline
/// goes through it. The client marks exhaustion when the upstream reports it
/// and refuses further calls until the deadline; the scheduler watches the
/// deadline to suspend dispatching.
#[derive(Debug, Default)]
pub struct QuotaTracker {
    exhausted_until: Mutex<Option<DateTime<Utc>>>,
}

impl QuotaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the upstream reported quota exhaustion. Keeps the latest
    /// deadline if several calls observe exhaustion concurrently.
    pub fn record_exhausted(&self, resets_at: DateTime<Utc>) {
        let mut until = self.exhausted_until.lock().expect("quota mutex poisoned");
        match *until {
            Some(current) if current >= resets_at => {}
            _ => {
                warn!(%resets_at, "upstream quota exhausted, suspending collection");
                *until = Some(resets_at);
            }
        }
    }

    /// The reset deadline, if exhaustion has been observed and not yet
    /// cleared.
    pub fn exhausted_until(&self) -> Option<DateTime<Utc>> {
        *self.exhausted_until.lock().expect("quota mutex poisoned")
    }

    pub fn clear(&self) {
        *self.exhausted_until.lock().expect("quota mutex poisoned") = None;
    }
}
