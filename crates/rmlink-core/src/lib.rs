//! # rmlink Core
//!
//! Transmission engine for reliable messaging: at-least-once, optionally
//! ordered delivery of application messages over transports that may lose,
//! duplicate or reorder them.
//!
//! This crate provides:
//! - Sequence range collections for selective acknowledgements
//! - A sliding transmission window with RTT estimation and AIMD congestion control
//! - Timer-driven retransmission with exponential backoff
//! - Reliable output and input connections
//! - Session lifecycle, fault coordination and keep-alive polling
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      ReliableSession                            │
//! │   (CreateSequence, close/terminate, faults, inactivity, polls)  │
//! ├────────────────────────────────┬────────────────────────────────┤
//! │   ReliableOutputConnection     │   ReliableInputConnection      │
//! │   (send, retry, close)         │   (received ranges, acks)      │
//! ├────────────────────────────────┴────────────────────────────────┤
//! │                   TransmissionStrategy                          │
//! │   (window, RTT, congestion, retransmission queue, waiters)      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transports plug in through [`OutputHandler`] and [`SessionChannel`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod congestion;
pub mod connection;
pub mod error;
pub mod fault;
pub mod guard;
pub mod input;
pub mod message;
pub mod polling;
pub mod protocol;
pub mod ranges;
pub mod session;
pub mod strategy;
mod timer;
pub mod window;

pub use config::ReliableSessionSettings;
pub use congestion::{CongestionWindow, RttEstimator};
pub use connection::{OutputHandler, ReliableOutputConnection};
pub use error::{Error, Result};
pub use fault::{FaultClass, FaultKind, TerminationReason, WsrmFault};
pub use guard::{SendGuard, SendGuardToken};
pub use input::ReliableInputConnection;
pub use message::{
    AcknowledgementHeader, CreateSequence, CreateSequenceResponse, Message, MessageAttempt,
    MessageBuffer, MessageKind, ProtocolReply, ProtocolRequest, SequenceHeader, WsrmMessageInfo,
};
pub use polling::{Poller, PollingIntervals, PollingMode};
pub use protocol::{MAX_SEQUENCE_NUMBER, ProtocolVersion, Role, SendMode, SequenceId};
pub use ranges::{SequenceRange, SequenceRangeCollection};
pub use session::{FaultState, ReliableSession, SessionChannel, SessionState};
pub use strategy::{
    AckClassification, AddOutcome, RetryHandler, TransmissionStats, TransmissionStrategy,
};
pub use window::SlidingWindow;
