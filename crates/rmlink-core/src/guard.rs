//! Non-recursive admission counter for transmissions.
//!
//! At most `limit` holders may be inside the guard at once. Callers that find it
//! full are turned away instead of queued; closing the guard waits for the
//! current holders to leave and rejects everyone after.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Admission counter guarding the send path of a connection
#[derive(Debug)]
pub struct SendGuard {
    limit: usize,
    holders: AtomicUsize,
    closed: AtomicBool,
    released: Notify,
}

/// Proof of admission; leaves the guard when dropped
#[derive(Debug)]
pub struct SendGuardToken<'a> {
    guard: &'a SendGuard,
}

impl SendGuard {
    /// Create a guard admitting up to `limit` concurrent holders
    ///
    /// # Panics
    ///
    /// Panics if `limit` is 0.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        assert!(limit > 0, "send guard limit must be greater than 0");
        Self {
            limit,
            holders: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            released: Notify::new(),
        }
    }

    /// Try to enter; `None` if the guard is full or closed
    pub fn try_enter(&self) -> Option<SendGuardToken<'_>> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.holders
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |holders| {
                (holders < self.limit).then_some(holders + 1)
            })
            .ok()?;

        // Closed while we were entering
        if self.closed.load(Ordering::Acquire) {
            self.exit();
            return None;
        }
        Some(SendGuardToken { guard: self })
    }

    fn exit(&self) {
        if self.holders.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.released.notify_waiters();
        }
    }

    /// Number of current holders
    #[must_use]
    pub fn holders(&self) -> usize {
        self.holders.load(Ordering::Acquire)
    }

    /// Whether the guard rejects new holders
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Reject new holders and wait up to `timeout` for current ones to leave
    ///
    /// # Errors
    ///
    /// Returns `Error::Timeout` if holders remain when the timeout elapses.
    pub async fn close(&self, timeout: Duration) -> Result<()> {
        self.closed.store(true, Ordering::Release);

        let drained = async {
            loop {
                let released = self.released.notified();
                if self.holders() == 0 {
                    return;
                }
                released.await;
            }
        };

        tokio::time::timeout(timeout, drained)
            .await
            .map_err(|_| Error::Timeout("waiting for in-progress sends to finish".into()))
    }

    /// Reject new holders without waiting
    pub fn abort(&self) {
        self.closed.store(true, Ordering::Release);
        self.released.notify_waiters();
    }
}

impl Drop for SendGuardToken<'_> {
    fn drop(&mut self) {
        self.guard.exit();
    }
}
