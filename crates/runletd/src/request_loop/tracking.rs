//! Shared stop flag and in-flight request accounting.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use super::StopReason;

/// Daemon-wide stop request, set once by the first stopper.
#[derive(Debug, Clone, Default)]
pub struct StopFlag {
    inner: Arc<(Mutex<Option<StopReason>>, Condvar)>,
}

impl StopFlag {
    /// Flag with no stop requested.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `reason` unless a stop was already requested.
    pub fn request(&self, reason: StopReason) {
        let (slot, changed) = &*self.inner;
        let mut current = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if current.is_none() {
            *current = Some(reason);
            changed.notify_all();
        }
    }

    /// Reason of the pending stop, if any.
    #[must_use]
    pub fn reason(&self) -> Option<StopReason> {
        let (slot, _) = &*self.inner;
        slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Blocks until a stop is requested.
    #[must_use]
    pub fn wait(&self) -> StopReason {
        let (slot, changed) = &*self.inner;
        let guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let settled = changed
            .wait_while(guard, |reason| reason.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        settled.clone().unwrap_or(StopReason::EndOfInput)
    }
}

/// Counts requests that have been accepted but not yet answered.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    inner: Arc<(Mutex<usize>, Condvar)>,
}

impl InFlight {
    /// Counter starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one request; it counts until the ticket is dropped.
    #[must_use]
    pub fn ticket(&self) -> Ticket {
        let (count, _) = &*self.inner;
        let mut guard = count.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = guard.saturating_add(1);
        Ticket {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Requests accepted but not yet answered.
    #[must_use]
    pub fn count(&self) -> usize {
        let (count, _) = &*self.inner;
        *count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits until every ticket is dropped, or `limit` elapses.
    ///
    /// Returns whether the count reached zero.
    pub fn wait_idle(&self, limit: Option<Duration>) -> bool {
        let (count, changed) = &*self.inner;
        let guard = count.lock().unwrap_or_else(PoisonError::into_inner);
        let remaining = match limit {
            Some(timeout) => {
                changed
                    .wait_timeout_while(guard, timeout, |pending| *pending > 0)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => changed
                .wait_while(guard, |pending| *pending > 0)
                .unwrap_or_else(PoisonError::into_inner),
        };
        *remaining == 0
    }
}

/// Proof that a request is in flight.
#[derive(Debug)]
pub struct Ticket {
    inner: Arc<(Mutex<usize>, Condvar)>,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let (count, changed) = &*self.inner;
        let mut guard = count.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = guard.saturating_sub(1);
        changed.notify_all();
    }
}
