//! Protocol identifiers and version switches.
//!
//! A reliable session carries up to two sequences: the output sequence (messages
//! this side sends) and, for duplex bindings, an input sequence offered during the
//! CreateSequence handshake. Both are named by 128-bit [`SequenceId`]s that are
//! stamped on every protocol element.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of a sequence identifier in bytes
pub const SEQUENCE_ID_SIZE: usize = 16;

/// Highest sequence number that may be assigned before the sequence must be
/// terminated with a `MessageNumberRollover` fault.
pub const MAX_SEQUENCE_NUMBER: u64 = i64::MAX as u64;

/// Unique identifier of one reliable sequence.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequenceId([u8; SEQUENCE_ID_SIZE]);

impl SequenceId {
    /// Generate a fresh random identifier
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; SEQUENCE_ID_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create an identifier from raw bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; SEQUENCE_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw bytes of the identifier
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SEQUENCE_ID_SIZE] {
        &self.0
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "urn:rmlink:{}", hex::encode(self.0))
    }
}

impl fmt::Debug for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SequenceId({})", hex::encode(&self.0[..8]))
    }
}

/// Reliable messaging protocol flavour negotiated for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// WS-ReliableMessaging February 2005: no close handshake, the end of the
    /// output is marked by a dedicated LastMessage.
    #[default]
    February2005,
    /// WS-ReliableMessaging 1.1: CloseSequence handshake before termination,
    /// the end of the output is solicited with AckRequested.
    V1_1,
}

impl ProtocolVersion {
    /// Whether the CloseSequence handshake exists in this version
    #[must_use]
    pub fn supports_close(self) -> bool {
        matches!(self, Self::V1_1)
    }

    /// Whether the end of the output sequence is marked with a LastMessage
    #[must_use]
    pub fn uses_last_message(self) -> bool {
        matches!(self, Self::February2005)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::February2005 => write!(f, "WS-RM February 2005"),
            Self::V1_1 => write!(f, "WS-RM 1.1"),
        }
    }
}

/// Capability of the underlying binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SendMode {
    /// Every sequenced message is a request whose reply acknowledges it
    RequestReply,
    /// Messages and acknowledgements flow independently in both directions
    #[default]
    Duplex,
}

/// Which side of the CreateSequence handshake this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Sends CreateSequence and owns the polling timer
    Client,
    /// Answers CreateSequence
    Server,
}
