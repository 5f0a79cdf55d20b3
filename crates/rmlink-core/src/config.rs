//! Reliable session configuration

use crate::error::{Error, Result};
use crate::protocol::{ProtocolVersion, SendMode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings shared by a session and its input and output connections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliableSessionSettings {
    /// WS-RM protocol flavour
    pub protocol_version: ProtocolVersion,

    /// Binding capability
    pub send_mode: SendMode,

    /// Seed of the RTT estimator
    pub initial_rtt: Duration,

    /// Upper bound of the congestion window, in messages
    pub max_transfer_window_size: usize,

    /// Starting congestion window, in messages
    pub initial_window_size: usize,

    /// Retries of one message before the sequence is terminated
    pub max_retry_count: u32,

    /// Remote silence tolerated before the session faults
    pub inactivity_timeout: Duration,

    /// Receiver-side acknowledgement batching interval
    pub acknowledgement_interval: Duration,

    /// Honour the peer's BufferRemaining quota
    pub flow_control_enabled: bool,

    /// In-order delivery requested
    pub ordered: bool,

    /// Piggyback AckRequested when the window or quota fills
    pub request_acks: bool,

    /// Default send timeout of the binding
    pub send_timeout: Duration,

    /// Receive buffer size advertised as BufferRemaining
    pub max_pending_messages: u32,
}

impl Default for ReliableSessionSettings {
    fn default() -> Self {
        Self {
            protocol_version: ProtocolVersion::February2005,
            send_mode: SendMode::Duplex,
            initial_rtt: Duration::from_millis(200),
            max_transfer_window_size: 8,
            initial_window_size: 1,
            max_retry_count: 8,
            inactivity_timeout: Duration::from_secs(600),
            acknowledgement_interval: Duration::from_millis(200),
            flow_control_enabled: true,
            ordered: true,
            request_acks: true,
            send_timeout: Duration::from_secs(60),
            max_pending_messages: 64,
        }
    }
}

impl ReliableSessionSettings {
    /// Check the settings for values the engine cannot run with
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.max_transfer_window_size == 0 {
            return Err(Error::InvalidConfig(
                "max_transfer_window_size must be greater than 0".into(),
            ));
        }

        if self.initial_window_size == 0 {
            return Err(Error::InvalidConfig(
                "initial_window_size must be greater than 0".into(),
            ));
        }

        if self.initial_window_size > self.max_transfer_window_size {
            return Err(Error::InvalidConfig(
                format!(
                    "initial_window_size {} exceeds max_transfer_window_size {}",
                    self.initial_window_size, self.max_transfer_window_size
                )
                .into(),
            ));
        }

        if self.max_retry_count == 0 {
            return Err(Error::InvalidConfig(
                "max_retry_count must be greater than 0".into(),
            ));
        }

        if self.inactivity_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "inactivity_timeout must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Interval between keep-alive polls
    #[must_use]
    pub fn keep_alive_interval(&self) -> Duration {
        self.inactivity_timeout / 2 / self.max_retry_count.max(1)
    }

    /// BufferRemaining quota advertised to the peer, if flow control is on
    #[must_use]
    pub fn advertised_quota(&self, pending: usize) -> Option<u32> {
        self.flow_control_enabled.then(|| {
            let pending = u32::try_from(pending).unwrap_or(u32::MAX);
            self.max_pending_messages.saturating_sub(pending)
        })
    }
}
