//! Message and protocol header model.
//!
//! Encoding these types onto a wire envelope is the job of the binding; the
//! reliable messaging engine only reads and stamps the fields below.

use crate::fault::WsrmFault;
use crate::protocol::SequenceId;
use crate::ranges::SequenceRangeCollection;
use std::sync::Arc;

/// What a message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Application payload
    Application,
    /// Empty marker closing the output sequence (February 2005)
    LastMessage,
}

/// Sequence header stamped on every sequenced message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceHeader {
    /// Sequence the message belongs to
    pub id: SequenceId,
    /// Position within the sequence, starting at 1
    pub number: u64,
    /// Whether this is the last message of the sequence
    pub last: bool,
}

/// A message travelling through the reliable layer
#[derive(Debug, Clone)]
pub struct Message {
    kind: MessageKind,
    body: Arc<[u8]>,
    sequence: Option<SequenceHeader>,
    ack_requested: Option<SequenceId>,
    allow_output_batching: bool,
}

impl Message {
    /// Create an application message
    #[must_use]
    pub fn application(body: impl Into<Arc<[u8]>>) -> Self {
        Self {
            kind: MessageKind::Application,
            body: body.into(),
            sequence: None,
            ack_requested: None,
            allow_output_batching: true,
        }
    }

    /// Create the empty LastMessage marker
    #[must_use]
    pub fn last_message() -> Self {
        Self {
            kind: MessageKind::LastMessage,
            body: Arc::from(Vec::new()),
            sequence: None,
            ack_requested: None,
            allow_output_batching: false,
        }
    }

    /// Message kind
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Payload bytes
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Sequence header, once the message has been admitted
    #[must_use]
    pub fn sequence(&self) -> Option<&SequenceHeader> {
        self.sequence.as_ref()
    }

    /// Sequence for which an acknowledgement is requested
    #[must_use]
    pub fn ack_requested(&self) -> Option<SequenceId> {
        self.ack_requested
    }

    /// Whether the transport may hold this message back to batch it
    #[must_use]
    pub fn allow_output_batching(&self) -> bool {
        self.allow_output_batching
    }

    /// Allow or forbid output batching
    pub fn set_allow_output_batching(&mut self, allow: bool) {
        self.allow_output_batching = allow;
    }

    pub(crate) fn stamp_sequence(&mut self, header: SequenceHeader) {
        self.sequence = Some(header);
    }

    pub(crate) fn request_ack(&mut self, id: SequenceId) {
        self.ack_requested = Some(id);
        self.allow_output_batching = false;
    }
}

/// Immutable snapshot of a message that can be replayed for retries.
///
/// Cloning the buffer or creating messages from it only bumps reference counts.
#[derive(Debug, Clone)]
pub struct MessageBuffer {
    message: Arc<Message>,
}

impl MessageBuffer {
    /// Snapshot `message`
    #[must_use]
    pub fn new(message: Message) -> Self {
        Self {
            message: Arc::new(message),
        }
    }

    /// Create a fresh message instance from the snapshot
    #[must_use]
    pub fn create_message(&self) -> Message {
        Message::clone(&self.message)
    }

    /// Sequence header of the buffered message
    #[must_use]
    pub fn sequence(&self) -> Option<&SequenceHeader> {
        self.message.sequence()
    }
}

/// One transmission attempt of a sequenced message
#[derive(Debug, Clone)]
pub struct MessageAttempt<S> {
    /// Message instance to put on the wire
    pub message: Message,
    /// Sequence number of the message
    pub sequence_number: u64,
    /// Number of retries so far, 0 for the first attempt
    pub retry_count: u32,
    /// Caller state token passed at admission
    pub state: S,
}

/// Acknowledgement header: which messages of a sequence were received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcknowledgementHeader {
    /// Acknowledged sequence
    pub sequence_id: SequenceId,
    /// Received sequence numbers
    pub ranges: SequenceRangeCollection,
    /// Whether the receiver will accept no further messages
    pub is_final: bool,
    /// Receiver buffer space left, when flow control is enabled
    pub buffer_remaining: Option<u32>,
}

/// CreateSequence request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSequence {
    /// Identifier the initiator offers for the return sequence (duplex only)
    pub offer: Option<SequenceId>,
}

/// CreateSequenceResponse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSequenceResponse {
    /// Identifier of the newly created sequence
    pub sequence_id: SequenceId,
    /// Whether the offered return sequence was accepted
    pub accepted_offer: Option<SequenceId>,
}

/// Protocol requests a session issues through its channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolRequest {
    /// Establish a sequence
    CreateSequence(CreateSequence),
    /// Close a sequence (1.1 only)
    CloseSequence {
        /// Sequence to close
        sequence_id: SequenceId,
        /// Last message number of the sequence
        last: u64,
    },
    /// Terminate a sequence
    TerminateSequence {
        /// Sequence to terminate
        sequence_id: SequenceId,
        /// Last message number of the sequence
        last: u64,
    },
}

/// Replies to [`ProtocolRequest`]s
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolReply {
    /// Answer to CreateSequence
    CreateSequenceResponse(CreateSequenceResponse),
    /// Answer to CloseSequence, carrying the final acknowledgement
    CloseSequenceResponse {
        /// Closed sequence
        sequence_id: SequenceId,
        /// Final acknowledgement of the closed sequence
        final_ack: Option<AcknowledgementHeader>,
    },
    /// Answer to TerminateSequence
    TerminateSequenceResponse {
        /// Terminated sequence
        sequence_id: SequenceId,
    },
    /// The peer answered with a fault
    Fault(WsrmFault),
}

/// Reliable messaging elements found on an incoming message.
///
/// The session verifies these against its known sequence identifiers before any
/// element is processed.
#[derive(Debug, Clone, Default)]
pub struct WsrmMessageInfo {
    /// Sequence header of a sequenced message
    pub sequence: Option<SequenceHeader>,
    /// Acknowledgement for one of our output sequences
    pub acknowledgement: Option<AcknowledgementHeader>,
    /// Request to acknowledge one of our input sequences
    pub ack_requested: Option<SequenceId>,
    /// TerminateSequence for a sequence
    pub terminate_sequence: Option<SequenceId>,
    /// TerminateSequenceResponse for a sequence
    pub terminate_sequence_response: Option<SequenceId>,
    /// CloseSequence for a sequence
    pub close_sequence: Option<SequenceId>,
    /// CloseSequenceResponse for a sequence
    pub close_sequence_response: Option<SequenceId>,
    /// Fault payload sent by the peer
    pub fault: Option<WsrmFault>,
    /// The peer asks for fast polling
    pub fast_polling_requested: bool,
}
