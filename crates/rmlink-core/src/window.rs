//! Fixed-capacity sliding window of in-flight messages.
//!
//! Slots are addressed relative to the window start: index 0 is the oldest
//! unacknowledged message. Entries only ever leave from the head through
//! [`SlidingWindow::remove`], so the window start is the authoritative low-water
//! mark of the output sequence.
//!
//! # Design
//!
//! - Circular buffer of `max_size + 1` slots; `head == tail` means empty and
//!   `tail + 1 == head` means full, so no separate count is stored
//! - Each slot keeps an immutable [`MessageBuffer`] so retries replay a fresh
//!   message without touching shared state

use crate::message::{Message, MessageBuffer};
use tokio::time::Instant;

/// Per-message transmission bookkeeping
#[derive(Debug)]
struct TransmissionInfo<S> {
    buffer: MessageBuffer,
    last_attempt: Instant,
    retry_count: u32,
    state: S,
    transferred: bool,
}

/// Circular buffer of in-flight messages
#[derive(Debug)]
pub struct SlidingWindow<S> {
    slots: Box<[Option<TransmissionInfo<S>>]>,
    head: usize,
    tail: usize,
    transferred_count: usize,
}

impl<S> SlidingWindow<S> {
    /// Create a window holding at most `max_size` messages
    ///
    /// # Panics
    ///
    /// Panics if `max_size` is 0.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        assert!(max_size > 0, "window size must be greater than 0");
        let slots = (0..=max_size)
            .map(|_| None)
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            head: 0,
            tail: 0,
            transferred_count: 0,
        }
    }

    /// Maximum number of messages
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.slots.len() - 1
    }

    /// Number of messages in the window
    #[must_use]
    pub fn len(&self) -> usize {
        (self.tail + self.slots.len() - self.head) % self.slots.len()
    }

    /// Check if the window is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Check if the window is full
    #[must_use]
    pub fn is_full(&self) -> bool {
        (self.tail + 1) % self.slots.len() == self.head
    }

    /// Number of slots individually marked transferred
    #[must_use]
    pub fn transferred_count(&self) -> usize {
        self.transferred_count
    }

    fn slot(&self, index: usize) -> &TransmissionInfo<S> {
        assert!(index < self.len(), "window index {index} out of range");
        self.slots[(self.head + index) % self.slots.len()]
            .as_ref()
            .expect("occupied window slot")
    }

    fn slot_mut(&mut self, index: usize) -> &mut TransmissionInfo<S> {
        assert!(index < self.len(), "window index {index} out of range");
        let pos = (self.head + index) % self.slots.len();
        self.slots[pos].as_mut().expect("occupied window slot")
    }

    /// Append a message at the tail
    ///
    /// # Panics
    ///
    /// Panics if the window is full.
    pub fn add(&mut self, message: Message, now: Instant, state: S) {
        assert!(!self.is_full(), "sliding window is full");
        self.slots[self.tail] = Some(TransmissionInfo {
            buffer: MessageBuffer::new(message),
            last_attempt: now,
            retry_count: 0,
            state,
            transferred: false,
        });
        self.tail = (self.tail + 1) % self.slots.len();
    }

    /// Recreate the message at `index`, or `None` if it is already transferred
    #[must_use]
    pub fn get_message(&self, index: usize) -> Option<Message> {
        let info = self.slot(index);
        if info.transferred {
            None
        } else {
            Some(info.buffer.create_message())
        }
    }

    /// Time of the latest attempt at `index`
    #[must_use]
    pub fn last_attempt_time(&self, index: usize) -> Instant {
        self.slot(index).last_attempt
    }

    /// Retry count at `index`
    #[must_use]
    pub fn retry_count(&self, index: usize) -> u32 {
        self.slot(index).retry_count
    }

    /// Caller state at `index`
    #[must_use]
    pub fn state(&self, index: usize) -> &S {
        &self.slot(index).state
    }

    /// Record another attempt at `index`, returning the new retry count
    pub fn record_retry(&mut self, index: usize, now: Instant) -> u32 {
        let info = self.slot_mut(index);
        info.retry_count += 1;
        info.last_attempt = now;
        info.retry_count
    }

    /// Undo the retry count of an attempt that never went out
    pub fn forgive_retry(&mut self, index: usize) {
        let info = self.slot_mut(index);
        info.retry_count = info.retry_count.saturating_sub(1);
    }

    /// Mark the message at `index` as delivered
    pub fn set_transferred(&mut self, index: usize) {
        let info = self.slot_mut(index);
        if !info.transferred {
            info.transferred = true;
            self.transferred_count += 1;
        }
    }

    /// Check if the message at `index` was delivered
    #[must_use]
    pub fn is_transferred(&self, index: usize) -> bool {
        self.slot(index).transferred
    }

    /// Count the transferred slots in `[begin, end]`
    #[must_use]
    pub fn transferred_in_range_count(&self, begin: usize, end: usize) -> usize {
        (begin..=end).filter(|&i| self.slot(i).transferred).count()
    }

    /// Evict the `count` oldest messages
    ///
    /// # Panics
    ///
    /// Panics if `count` exceeds the number of messages in the window.
    pub fn remove(&mut self, count: usize) {
        assert!(
            count <= self.len(),
            "cannot remove {count} of {} window entries",
            self.len()
        );
        for _ in 0..count {
            if let Some(info) = self.slots[self.head].take() {
                if info.transferred {
                    self.transferred_count -= 1;
                }
            }
            self.head = (self.head + 1) % self.slots.len();
        }
    }

    /// Drop every message
    pub fn clear(&mut self) {
        self.remove(self.len());
    }
}
