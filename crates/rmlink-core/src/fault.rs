//! Reliable messaging protocol faults.
//!
//! A [`WsrmFault`] is a typed protocol violation detected by either side. Local
//! faults are sent to the peer (when the connection still allows it) and also
//! fault the local session; remote faults arrive as payloads from the peer.

use crate::protocol::SequenceId;
use std::borrow::Cow;
use std::fmt;

/// SOAP-style fault class: who is to blame for the fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultClass {
    /// The message sender violated the protocol
    Sender,
    /// The receiver could not continue
    Receiver,
}

/// Why a sequence was terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationReason {
    /// No traffic from the peer within the inactivity timeout
    InactivityTimeout,
    /// A message was retried more often than allowed
    MaxRetryCountExceeded,
    /// The peer acknowledged messages that were never sent
    InvalidAcknowledgement,
    /// The peer's acknowledgements contradict each other
    InconsistentAcknowledgement,
    /// The peer sent more than its advertised buffer allows
    QuotaExceeded,
    /// CloseSequence is not part of the negotiated protocol version
    UnsupportedClose,
    /// A protocol element arrived that is not valid at this point
    UnexpectedElement,
    /// The final acknowledgement did not cover everything that was sent
    IncompleteFinalAcknowledgement,
    /// The transport failed underneath the sequence
    CommunicationFailure,
}

impl TerminationReason {
    fn describe(self) -> &'static str {
        match self {
            Self::InactivityTimeout => "the inactivity timeout elapsed",
            Self::MaxRetryCountExceeded => "the maximum retry count was exceeded",
            Self::InvalidAcknowledgement => "an acknowledgement covered unsent messages",
            Self::InconsistentAcknowledgement => "acknowledgements were inconsistent",
            Self::QuotaExceeded => "the receive quota was exceeded",
            Self::UnsupportedClose => "CloseSequence is not supported by this protocol version",
            Self::UnexpectedElement => "an unexpected protocol element was received",
            Self::IncompleteFinalAcknowledgement => {
                "the final acknowledgement did not cover all messages"
            }
            Self::CommunicationFailure => "the underlying channel failed",
        }
    }
}

/// Machine-checkable fault kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// The referenced sequence is not known to the receiver
    UnknownSequence,
    /// The sequence was terminated
    SequenceTerminated(TerminationReason),
    /// An acknowledgement covered messages that were never sent
    InvalidAcknowledgement,
    /// Sequence numbers ran out
    MessageNumberRollover,
    /// A message number above the announced last message arrived
    LastMessageNumberExceeded,
    /// The sequence is closed and accepts no more messages
    SequenceClosed,
    /// The peer refused to create the sequence
    CreateSequenceRefused,
}

impl FaultKind {
    /// Protocol subcode carried on the wire
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::UnknownSequence => "UnknownSequence",
            Self::SequenceTerminated(_) => "SequenceTerminated",
            Self::InvalidAcknowledgement => "InvalidAcknowledgement",
            Self::MessageNumberRollover => "MessageNumberRollover",
            Self::LastMessageNumberExceeded => "LastMessageNumberExceeded",
            Self::SequenceClosed => "SequenceClosed",
            Self::CreateSequenceRefused => "CreateSequenceRefused",
        }
    }
}

/// A reliable messaging protocol fault
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsrmFault {
    kind: FaultKind,
    class: FaultClass,
    sequence_id: Option<SequenceId>,
    reason: Cow<'static, str>,
    remote: bool,
}

impl WsrmFault {
    /// Create a fault with an explicit kind and reason
    #[must_use]
    pub fn new(
        kind: FaultKind,
        class: FaultClass,
        sequence_id: Option<SequenceId>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            kind,
            class,
            sequence_id,
            reason: reason.into(),
            remote: false,
        }
    }

    /// A message referenced a sequence this side does not know
    #[must_use]
    pub fn unknown_sequence(id: SequenceId) -> Self {
        Self::new(
            FaultKind::UnknownSequence,
            FaultClass::Sender,
            Some(id),
            format!("the sequence {id} is unknown"),
        )
    }

    /// Terminate the sequence for `reason`
    #[must_use]
    pub fn sequence_terminated(id: Option<SequenceId>, reason: TerminationReason) -> Self {
        let class = match reason {
            TerminationReason::InactivityTimeout
            | TerminationReason::MaxRetryCountExceeded
            | TerminationReason::CommunicationFailure => FaultClass::Receiver,
            _ => FaultClass::Sender,
        };
        Self::new(
            FaultKind::SequenceTerminated(reason),
            class,
            id,
            format!("the sequence was terminated: {}", reason.describe()),
        )
    }

    /// The peer acknowledged a message that was never sent
    #[must_use]
    pub fn invalid_acknowledgement(id: SequenceId) -> Self {
        Self::new(
            FaultKind::InvalidAcknowledgement,
            FaultClass::Sender,
            Some(id),
            "the acknowledgement covers messages that were never sent",
        )
    }

    /// Sequence numbers ran out
    #[must_use]
    pub fn message_number_rollover(id: SequenceId) -> Self {
        Self::new(
            FaultKind::MessageNumberRollover,
            FaultClass::Sender,
            Some(id),
            "the maximum message number was reached",
        )
    }

    /// A message number above the announced last message arrived
    #[must_use]
    pub fn last_message_number_exceeded(id: SequenceId) -> Self {
        Self::new(
            FaultKind::LastMessageNumberExceeded,
            FaultClass::Sender,
            Some(id),
            "a message number above the last message number was received",
        )
    }

    /// The sequence is closed
    #[must_use]
    pub fn sequence_closed(id: SequenceId) -> Self {
        Self::new(
            FaultKind::SequenceClosed,
            FaultClass::Sender,
            Some(id),
            "the sequence is closed and cannot accept new messages",
        )
    }

    /// The peer refused to create the sequence
    #[must_use]
    pub fn create_sequence_refused(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::new(
            FaultKind::CreateSequenceRefused,
            FaultClass::Receiver,
            None,
            reason,
        )
    }

    /// Mark this fault as received from the peer
    #[must_use]
    pub fn into_remote(mut self) -> Self {
        self.remote = true;
        self
    }

    /// Fault kind
    #[must_use]
    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    /// Fault class
    #[must_use]
    pub fn class(&self) -> FaultClass {
        self.class
    }

    /// Wire subcode
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// The sequence the fault refers to
    #[must_use]
    pub fn sequence_id(&self) -> Option<SequenceId> {
        self.sequence_id
    }

    /// Human readable reason
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Whether the fault originated at the peer
    #[must_use]
    pub fn is_remote(&self) -> bool {
        self.remote
    }

    /// Whether receiving this fault ends the session.
    ///
    /// `SequenceClosed` only rejects the message that provoked it.
    #[must_use]
    pub fn is_terminating(&self) -> bool {
        !matches!(self.kind, FaultKind::SequenceClosed)
    }
}

impl fmt::Display for WsrmFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}): {}", self.code(), self.class, self.reason)
    }
}

impl std::error::Error for WsrmFault {}
