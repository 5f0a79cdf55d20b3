//! Keep-alive polling.
//!
//! A client session polls the peer so that acknowledgements and replies can flow
//! back even when the application is idle. The interval depends on the mode;
//! remote activity picks the mode and local activity only postpones the next
//! poll.

use crate::config::ReliableSessionSettings;
use crate::timer::Timer;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// How eagerly the session polls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PollingMode {
    /// Half the inactivity timeout
    Idle = 0,
    /// The keep-alive interval
    KeepAlive = 1,
    /// Half the send timeout, capped by the keep-alive interval
    FastPolling = 2,
    /// Polling is off
    NotPolling = 3,
}

impl PollingMode {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::KeepAlive,
            2 => Self::FastPolling,
            _ => Self::NotPolling,
        }
    }
}

/// Polling intervals derived from the session settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingIntervals {
    idle: Duration,
    keep_alive: Duration,
    fast: Duration,
}

impl PollingIntervals {
    /// Derive the intervals from `settings`
    #[must_use]
    pub fn new(settings: &ReliableSessionSettings) -> Self {
        let keep_alive = settings.keep_alive_interval();
        Self {
            idle: settings.inactivity_timeout / 2,
            keep_alive,
            fast: (settings.send_timeout / 2).min(keep_alive),
        }
    }

    /// Interval for `mode`; `None` when not polling
    #[must_use]
    pub fn interval(&self, mode: PollingMode) -> Option<Duration> {
        match mode {
            PollingMode::Idle => Some(self.idle),
            PollingMode::KeepAlive => Some(self.keep_alive),
            PollingMode::FastPolling => Some(self.fast),
            PollingMode::NotPolling => None,
        }
    }
}

/// Mode-driven polling timer
#[derive(Debug)]
pub struct Poller {
    intervals: PollingIntervals,
    mode: AtomicU8,
    timer: Timer,
}

impl Poller {
    /// Create a poller in `NotPolling` mode; `on_poll` runs on every expiry
    ///
    /// `on_poll` must not block; spawn the actual poll.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new<F>(settings: &ReliableSessionSettings, on_poll: F) -> Arc<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let owner = weak.clone();
            let timer = Timer::new("poll", move || {
                if let Some(poller) = owner.upgrade() {
                    poller.schedule();
                    on_poll();
                }
            });
            Self {
                intervals: PollingIntervals::new(settings),
                mode: AtomicU8::new(PollingMode::NotPolling as u8),
                timer,
            }
        })
    }

    /// Current mode
    #[must_use]
    pub fn mode(&self) -> PollingMode {
        PollingMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    /// Switch to `mode` and restart the timer
    pub fn set_mode(&self, mode: PollingMode) {
        let previous = PollingMode::from_u8(self.mode.swap(mode as u8, Ordering::AcqRel));
        if previous != mode {
            tracing::debug!("Polling mode {:?} -> {:?}", previous, mode);
        }
        self.schedule();
    }

    /// The peer was heard from
    pub fn on_remote_activity(&self, fast_polling_requested: bool) {
        if self.mode() == PollingMode::NotPolling {
            return;
        }
        let mode = if fast_polling_requested {
            PollingMode::FastPolling
        } else {
            PollingMode::Idle
        };
        self.set_mode(mode);
    }

    /// This side sent something; postpone the next poll
    pub fn on_local_activity(&self) {
        self.schedule();
    }

    /// Stop polling
    pub fn stop(&self) {
        self.set_mode(PollingMode::NotPolling);
    }

    fn schedule(&self) {
        match self.intervals.interval(self.mode()) {
            Some(interval) => self.timer.set(interval),
            None => self.timer.cancel(),
        }
    }
}
