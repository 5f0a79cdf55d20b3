//! Error types for the rmlink core.
//!
//! Expected terminal conditions (timeouts, faults, aborts) are values of
//! [`Error`]. Contract violations by the caller, such as adding a second last
//! message, are assertions and panic instead.

use crate::fault::WsrmFault;
use std::borrow::Cow;
use thiserror::Error;

/// Core errors
#[derive(Debug, Error, Clone)]
pub enum Error {
    /// A reliable messaging protocol fault, local or remote
    #[error("protocol fault: {0}")]
    Fault(#[from] WsrmFault),

    /// An admission, handshake or close exceeded its time budget
    #[error("operation timed out: {0}")]
    Timeout(Cow<'static, str>),

    /// The communication object is faulted
    #[error("the communication object is faulted")]
    Faulted,

    /// The communication object was aborted
    #[error("the communication object was aborted")]
    Aborted,

    /// The communication object is closed
    #[error("the communication object is closed")]
    Closed,

    /// The transport failed to carry a message
    #[error("transport error: {0}")]
    Transport(Cow<'static, str>),

    /// The peer rejected a message because its buffer is full
    #[error("the peer's receive quota was exceeded")]
    QuotaExceeded,

    /// Operation not valid in the current state
    #[error("invalid state: {0}")]
    InvalidState(Cow<'static, str>),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),
}

impl Error {
    /// Whether the error may be logged and swallowed by background send paths
    /// (retries, polls) without faulting the session.
    #[must_use]
    pub fn is_handleable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Timeout(_))
    }

    /// Whether this is a timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// The protocol fault carried by this error, if any
    #[must_use]
    pub fn fault(&self) -> Option<&WsrmFault> {
        match self {
            Error::Fault(fault) => Some(fault),
            _ => None,
        }
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;
