//! Reliable input connection: the receiving half of a sequence.
//!
//! Tracks which sequence numbers arrived and where the sequence ends, and
//! produces the acknowledgement headers sent back to the peer.

use crate::error::Result;
use crate::fault::WsrmFault;
use crate::message::AcknowledgementHeader;
use crate::protocol::{MAX_SEQUENCE_NUMBER, SequenceId};
use crate::ranges::{SequenceRange, SequenceRangeCollection};

/// Receive-side state of one input sequence
#[derive(Debug, Clone)]
pub struct ReliableInputConnection {
    id: SequenceId,
    ranges: SequenceRangeCollection,
    last: u64,
    closed: bool,
    terminated: bool,
}

impl ReliableInputConnection {
    /// Create the input side of sequence `id`
    #[must_use]
    pub fn new(id: SequenceId) -> Self {
        Self {
            id,
            ranges: SequenceRangeCollection::empty(),
            last: 0,
            closed: false,
            terminated: false,
        }
    }

    /// Identifier of the input sequence
    #[must_use]
    pub fn id(&self) -> SequenceId {
        self.id
    }

    /// Record an incoming sequence number
    ///
    /// Returns `false` for a duplicate.
    ///
    /// # Errors
    ///
    /// Returns a `MessageNumberRollover` fault at the end of the number space,
    /// a `LastMessageNumberExceeded` fault for a number past the known last
    /// message or a contradicting last message, and a `SequenceClosed` fault
    /// for new numbers after the sequence was terminated.
    ///
    /// # Panics
    ///
    /// Panics if `number` is 0.
    pub fn process_incoming(&mut self, number: u64, is_last: bool) -> Result<bool> {
        assert!(number > 0, "sequence numbers start at 1");

        if number >= MAX_SEQUENCE_NUMBER {
            return Err(WsrmFault::message_number_rollover(self.id).into());
        }

        if self.last != 0 && number > self.last {
            return Err(WsrmFault::last_message_number_exceeded(self.id).into());
        }

        if is_last {
            let below_received = self.ranges.upper().is_some_and(|upper| upper > number);
            if (self.last != 0 && self.last != number) || below_received {
                return Err(WsrmFault::last_message_number_exceeded(self.id).into());
            }
        }

        if self.ranges.contains(number) {
            tracing::trace!("Duplicate message {} on {}", number, self.id);
            return Ok(false);
        }

        if self.terminated {
            return Err(WsrmFault::sequence_closed(self.id).into());
        }

        if is_last {
            self.last = number;
        }
        self.ranges = self.ranges.merge_with(number);
        Ok(true)
    }

    /// Fix the last sequence number announced by a CloseSequence
    ///
    /// # Errors
    ///
    /// Returns a `LastMessageNumberExceeded` fault if messages above `last`
    /// already arrived or a different last number is known.
    pub fn set_last(&mut self, last: u64) -> Result<()> {
        let exceeded = self.ranges.upper().is_some_and(|upper| upper > last);
        if exceeded || (self.last != 0 && self.last != last) {
            return Err(WsrmFault::last_message_number_exceeded(self.id).into());
        }
        self.last = last;
        self.closed = true;
        Ok(())
    }

    /// Last sequence number, 0 while unknown
    #[must_use]
    pub fn last(&self) -> u64 {
        self.last
    }

    /// Received sequence numbers
    #[must_use]
    pub fn ranges(&self) -> &SequenceRangeCollection {
        &self.ranges
    }

    /// Whether the sequence was closed by the peer
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether every message up to the last one arrived
    #[must_use]
    pub fn all_received(&self) -> bool {
        if self.last == 0 {
            return false;
        }
        self.ranges.len() == 1 && self.ranges[0] == SequenceRange::new(1, self.last)
    }

    /// Whether `number` may still arrive on this sequence
    #[must_use]
    pub fn is_valid_sequence(&self, number: u64) -> bool {
        number > 0 && number < MAX_SEQUENCE_NUMBER && (self.last == 0 || number <= self.last)
    }

    /// Build the acknowledgement header for the current state
    #[must_use]
    pub fn create_acknowledgement(
        &self,
        buffer_remaining: Option<u32>,
        is_final: bool,
    ) -> AcknowledgementHeader {
        AcknowledgementHeader {
            sequence_id: self.id,
            ranges: self.ranges.clone(),
            is_final,
            buffer_remaining,
        }
    }

    /// Stop accepting new messages
    ///
    /// Returns whether the sequence was complete.
    pub fn terminate(&mut self) -> bool {
        self.terminated = true;
        let complete = self.all_received();
        if !complete {
            tracing::debug!(
                "Input sequence {} terminated with {} received",
                self.id,
                self.ranges
            );
        }
        complete
    }
}
