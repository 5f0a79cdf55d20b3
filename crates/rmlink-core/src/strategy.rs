//! Congestion-controlled transmission strategy.
//!
//! The strategy owns the output side of a sequence: it numbers messages, admits
//! them into the sliding window or parks them in a wait queue, classifies and
//! applies acknowledgements, and runs the adaptive retry timer. It performs no
//! I/O itself. Admitted attempts are handed back to the caller, and retries go to
//! a registered [`RetryHandler`].
//!
//! All state lives behind one mutex that is never held across an await on
//! anything but the mutex itself.

use crate::config::ReliableSessionSettings;
use crate::congestion::{CongestionWindow, RttEstimator};
use crate::error::Error;
use crate::fault::WsrmFault;
use crate::message::{Message, MessageAttempt, SequenceHeader};
use crate::protocol::{MAX_SEQUENCE_NUMBER, SequenceId};
use crate::ranges::{SequenceRange, SequenceRangeCollection};
use crate::timer::Timer;
use crate::window::SlidingWindow;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tokio::time::Instant;

/// Receives the oldest in-flight message whenever the retry timer expires
#[async_trait]
pub trait RetryHandler<S>: Send + Sync {
    /// Retransmit `attempt`
    async fn on_retry(&self, attempt: MessageAttempt<S>);
}

/// Result of an admission request
#[derive(Debug)]
pub enum AddOutcome<S> {
    /// The message was numbered and entered the window
    Admitted(MessageAttempt<S>),
    /// No capacity freed up before the timeout
    TimedOut,
    /// The strategy is faulted
    Faulted(Error),
    /// The strategy is closed
    Closed,
    /// The strategy was aborted
    Aborted,
}

impl<S> AddOutcome<S> {
    /// Convert into the admitted attempt, mapping every other outcome to an error
    ///
    /// # Errors
    ///
    /// Returns the error matching the outcome when the message was not admitted.
    pub fn into_result(self) -> crate::error::Result<MessageAttempt<S>> {
        match self {
            Self::Admitted(attempt) => Ok(attempt),
            Self::TimedOut => Err(Error::Timeout("waiting for window capacity".into())),
            Self::Faulted(error) => Err(error),
            Self::Closed => Err(Error::Closed),
            Self::Aborted => Err(Error::Aborted),
        }
    }
}

/// Classification of an acknowledgement against the window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckClassification {
    /// The acknowledgement names messages that were never sent
    pub invalid: bool,
    /// The acknowledgement mixes stale and new information
    pub inconsistent: bool,
}

/// Transmission statistics snapshot
#[derive(Debug, Clone)]
pub struct TransmissionStats {
    /// Next unacknowledged sequence number
    pub window_start: u64,
    /// Current congestion window
    pub window_size: usize,
    /// Messages in the sliding window
    pub in_flight: usize,
    /// Slow start threshold
    pub slow_start_threshold: usize,
    /// Window size at the last loss
    pub loss_window_size: usize,
    /// Current retry timeout
    pub timeout: Duration,
    /// Smoothed round trip time
    pub mean_rtt: Duration,
    /// Peer buffer space left, `None` when unlimited
    pub quota_remaining: Option<u32>,
    /// Last sequence number, 0 while unknown
    pub last: u64,
    /// Sequence numbers queued for retransmission
    pub queued_retries: usize,
    /// Callers parked in the wait queue
    pub waiters: usize,
}

#[derive(Debug, Clone)]
enum Status {
    Open,
    Closed,
    Aborted,
    Faulted(Error),
}

struct Waiter<S> {
    id: u64,
    message: Message,
    state: S,
    is_last: bool,
    tx: oneshot::Sender<AddOutcome<S>>,
}

struct StrategyState<S> {
    status: Status,
    window: SlidingWindow<S>,
    window_start: u64,
    congestion: CongestionWindow,
    rtt: RttEstimator,
    quota_remaining: Option<u32>,
    quota_source: u64,
    last: u64,
    last_added: bool,
    loss_time: Option<Instant>,
    retransmissions: VecDeque<u64>,
    waiters: VecDeque<Waiter<S>>,
    next_waiter_id: u64,
    retry_timer: Timer,
}

/// The congestion-controlled sender of one output sequence
pub struct TransmissionStrategy<S> {
    id: SequenceId,
    request_acks: bool,
    flow_control: bool,
    handler: Weak<dyn RetryHandler<S>>,
    state: Mutex<StrategyState<S>>,
}

impl<S> std::fmt::Debug for TransmissionStrategy<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransmissionStrategy")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<S> StrategyState<S>
where
    S: Clone,
{
    fn is_open(&self) -> bool {
        matches!(self.status, Status::Open)
    }

    fn terminal_outcome(&self) -> Option<AddOutcome<S>> {
        match &self.status {
            Status::Open => None,
            Status::Closed => Some(AddOutcome::Closed),
            Status::Aborted => Some(AddOutcome::Aborted),
            Status::Faulted(error) => Some(AddOutcome::Faulted(error.clone())),
        }
    }

    fn has_capacity(&self) -> bool {
        self.window.len() < self.congestion.window_size() && self.quota_remaining != Some(0)
    }

    fn can_add(&self) -> bool {
        self.has_capacity() && self.waiters.is_empty()
    }

    fn last_sent(&self) -> u64 {
        self.window_start + self.window.len() as u64 - 1
    }

    fn done_transmitting(&self) -> bool {
        self.last != 0 && self.window_start == self.last + 1
    }

    /// Number and enqueue a message. Capacity must have been checked.
    fn admit(
        &mut self,
        id: SequenceId,
        request_acks: bool,
        mut message: Message,
        state: S,
        is_last: bool,
    ) -> AddOutcome<S> {
        let number = self.window_start + self.window.len() as u64;
        if number >= MAX_SEQUENCE_NUMBER {
            let fault = WsrmFault::message_number_rollover(id);
            tracing::warn!("Sequence {} rolled over at {}", id, number);
            self.terminate(Status::Faulted(fault.clone().into()));
            return AddOutcome::Faulted(fault.into());
        }

        if let Some(quota) = self.quota_remaining.as_mut() {
            *quota = quota.saturating_sub(1);
        }

        message.stamp_sequence(SequenceHeader {
            id,
            number,
            last: is_last,
        });
        let fills_window = self.window.len() + 1 >= self.congestion.window_size();
        if request_acks && (is_last || fills_window || self.quota_remaining == Some(0)) {
            message.request_ack(id);
        }
        if is_last {
            self.last = number;
        }

        let was_empty = self.window.is_empty();
        self.window.add(message.clone(), Instant::now(), state.clone());
        if was_empty {
            self.retry_timer.set(self.rtt.timeout());
        }

        tracing::trace!(
            "Admitted message {} into window (start={}, in flight={})",
            number,
            self.window_start,
            self.window.len()
        );

        AddOutcome::Admitted(MessageAttempt {
            message,
            sequence_number: number,
            retry_count: 0,
            state,
        })
    }

    fn drain_waiters(&mut self, id: SequenceId, request_acks: bool) {
        while self.is_open() && self.has_capacity() {
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };
            if waiter.tx.is_closed() {
                continue;
            }
            let outcome = self.admit(id, request_acks, waiter.message, waiter.state, waiter.is_last);
            // A receiver dropped since the check leaves the message to the retry timer
            let _ = waiter.tx.send(outcome);
        }
    }

    fn resolve_waiters(&mut self) {
        let Some(outcome) = self.terminal_outcome() else {
            return;
        };
        for waiter in self.waiters.drain(..) {
            let outcome = match &outcome {
                AddOutcome::Faulted(error) => AddOutcome::Faulted(error.clone()),
                AddOutcome::Aborted => AddOutcome::Aborted,
                _ => AddOutcome::Closed,
            };
            let _ = waiter.tx.send(outcome);
        }
    }

    fn refuse_waiters(&mut self) -> usize {
        let count = self.waiters.len();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.tx.send(AddOutcome::Closed);
        }
        count
    }

    fn queue_retransmissions(&mut self) {
        let Some(loss_time) = self.loss_time else {
            return;
        };
        let end = self.window.len().min(self.congestion.window_size());
        for index in 0..end {
            if self.window.is_transferred(index) || self.window.last_attempt_time(index) >= loss_time
            {
                continue;
            }
            let number = self.window_start + index as u64;
            if !self.retransmissions.contains(&number) {
                self.retransmissions.push_back(number);
            }
        }
    }

    fn in_flight_untransferred(&self) -> u32 {
        let pending = self.window.len() - self.window.transferred_count();
        u32::try_from(pending).unwrap_or(u32::MAX)
    }

    fn terminate(&mut self, status: Status) -> bool {
        if !self.is_open() {
            return false;
        }
        self.status = status;
        self.retry_timer.cancel();
        self.resolve_waiters();
        self.retransmissions.clear();
        self.window.clear();
        true
    }
}

impl<S> TransmissionStrategy<S>
where
    S: Clone + Send + Sync + 'static,
{
    /// Create the strategy for output sequence `id`
    ///
    /// `handler` receives retries; the strategy holds it weakly so the owner
    /// can register itself.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime or if the window size is 0.
    pub fn new(
        id: SequenceId,
        settings: &ReliableSessionSettings,
        handler: Weak<dyn RetryHandler<S>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let owner = weak.clone();
            let retry_timer = Timer::new("retry", move || {
                let owner = owner.clone();
                tokio::spawn(async move {
                    if let Some(strategy) = owner.upgrade() {
                        strategy.on_retry_elapsed().await;
                    }
                });
            });

            Self {
                id,
                request_acks: settings.request_acks,
                flow_control: settings.flow_control_enabled,
                handler,
                state: Mutex::new(StrategyState {
                    status: Status::Open,
                    window: SlidingWindow::new(settings.max_transfer_window_size),
                    window_start: 1,
                    congestion: CongestionWindow::new(
                        settings.initial_window_size,
                        settings.max_transfer_window_size,
                    ),
                    rtt: RttEstimator::new(settings.initial_rtt),
                    quota_remaining: None,
                    quota_source: 0,
                    last: 0,
                    last_added: false,
                    loss_time: None,
                    retransmissions: VecDeque::new(),
                    waiters: VecDeque::new(),
                    next_waiter_id: 0,
                    retry_timer,
                }),
            }
        })
    }

    /// Identifier of the output sequence
    #[must_use]
    pub fn id(&self) -> SequenceId {
        self.id
    }

    /// Admit `message`, waiting up to `timeout` for window capacity
    pub async fn add(&self, message: Message, timeout: Duration, state: S) -> AddOutcome<S> {
        self.add_inner(message, timeout, state, false).await
    }

    /// Admit the final message of the sequence
    ///
    /// # Panics
    ///
    /// Panics if a last message was already added or the last number was set.
    pub async fn add_last(&self, message: Message, timeout: Duration, state: S) -> AddOutcome<S> {
        self.add_inner(message, timeout, state, true).await
    }

    async fn add_inner(
        &self,
        message: Message,
        timeout: Duration,
        state: S,
        is_last: bool,
    ) -> AddOutcome<S> {
        let (waiter_id, mut rx) = {
            let mut st = self.state.lock().await;
            if is_last {
                assert!(!st.last_added, "the last message was already added");
            }
            if let Some(outcome) = st.terminal_outcome() {
                return outcome;
            }
            if st.last_added {
                return AddOutcome::Closed;
            }
            if is_last {
                st.last_added = true;
            }

            if st.can_add() {
                return st.admit(self.id, self.request_acks, message, state, is_last);
            }

            let (tx, rx) = oneshot::channel();
            let waiter_id = st.next_waiter_id;
            st.next_waiter_id += 1;
            st.waiters.push_back(Waiter {
                id: waiter_id,
                message,
                state,
                is_last,
                tx,
            });
            tracing::trace!("Window full, queued admission ({} waiting)", st.waiters.len());
            (waiter_id, rx)
        };

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => AddOutcome::Aborted,
            Err(_) => {
                let mut st = self.state.lock().await;
                if let Some(pos) = st.waiters.iter().position(|w| w.id == waiter_id) {
                    st.waiters.remove(pos);
                    if is_last {
                        st.last_added = false;
                    }
                    AddOutcome::TimedOut
                } else {
                    // Resolved between the timeout and taking the lock
                    rx.try_recv().unwrap_or(AddOutcome::TimedOut)
                }
            }
        }
    }

    /// Classify `ranges` against the messages sent so far
    pub async fn process_acknowledgement(
        &self,
        ranges: &SequenceRangeCollection,
    ) -> AckClassification {
        let st = self.state.lock().await;
        if !st.is_open() {
            return AckClassification::default();
        }

        let window_start = st.window_start;
        let last_sent = st.last_sent();
        let mut transferred_in_window = st.window.transferred_count();
        let mut old_ack = false;
        let mut new_ack = false;

        for range in ranges {
            if range.lower() == 0 || range.upper() > last_sent {
                tracing::debug!(
                    "Acknowledgement {} falls outside sent messages 1..={}",
                    range,
                    last_sent
                );
                return AckClassification {
                    invalid: true,
                    inconsistent: false,
                };
            }

            // Part of the acknowledged prefix, or a range that no longer covers it
            if range.upper() + 1 < window_start
                || (range.lower() > 1 && range.lower() <= window_start)
            {
                old_ack = true;
            }

            if range.upper() >= window_start {
                if range.lower() <= window_start {
                    new_ack = true;
                }

                let begin = range.lower().saturating_sub(window_start) as usize;
                let end = (range.upper() - window_start) as usize;
                let transferred = st.window.transferred_in_range_count(begin, end);

                if !new_ack {
                    new_ack = transferred < end - begin + 1;
                }
                if transferred_in_window > 0 && !new_ack {
                    transferred_in_window = transferred_in_window.saturating_sub(transferred);
                }
            }
        }

        if transferred_in_window > 0 {
            old_ack = true;
        }

        AckClassification {
            invalid: false,
            inconsistent: old_ack && new_ack,
        }
    }

    /// Apply an acknowledgement of a single message
    ///
    /// # Panics
    ///
    /// Panics if `number` is 0.
    pub async fn process_transferred_number(&self, number: u64, quota: Option<u32>) -> bool {
        assert!(number > 0, "acknowledged sequence numbers start at 1");
        self.process_transferred(SequenceRange::single(number), quota)
            .await
    }

    /// Apply an acknowledged range, returning whether retries should be sent now
    ///
    /// # Panics
    ///
    /// Panics if the range includes 0.
    pub async fn process_transferred(&self, range: SequenceRange, quota: Option<u32>) -> bool {
        assert!(range.lower() > 0, "acknowledged sequence numbers start at 1");
        let quota = quota.filter(|_| self.flow_control);

        let mut st = self.state.lock().await;
        if !st.is_open() {
            return false;
        }

        let window_start = st.window_start;
        if range.upper() < window_start {
            if let Some(advertised) = quota.filter(|_| range.upper() > st.quota_source) {
                st.quota_remaining = Some(advertised.saturating_sub(st.in_flight_untransferred()));
                st.quota_source = range.upper();
                st.drain_waiters(self.id, self.request_acks);
            }
            return false;
        }

        if range.lower() > window_start {
            let len = st.window.len();
            for number in range.lower()..=range.upper() {
                let index = (number - window_start) as usize;
                if index < len {
                    st.window.set_transferred(index);
                }
            }
            return false;
        }

        let len = st.window.len();
        let mut slide = usize::try_from(range.upper() - window_start + 1)
            .unwrap_or(usize::MAX)
            .min(len);
        while slide < len && st.window.is_transferred(slide) {
            slide += 1;
        }

        st.retry_timer.cancel();
        let now = Instant::now();
        for index in 0..slide {
            let sample = now.saturating_duration_since(st.window.last_attempt_time(index));
            st.rtt.update(sample);
        }

        st.window.remove(slide);
        st.window_start += slide as u64;

        if let Some(advertised) = quota {
            st.quota_remaining = Some(advertised.saturating_sub(st.in_flight_untransferred()));
            st.quota_source = st.quota_source.max(range.upper());
        }

        st.congestion.on_acked(slide);
        if !st.congestion.in_startup() {
            st.queue_retransmissions();
        }

        if !st.window.is_empty() {
            let timeout = st.rtt.timeout();
            st.retry_timer.set(timeout);
        }

        tracing::trace!(
            "Window slid by {} to {} (window size {}, timeout {:?})",
            slide,
            st.window_start,
            st.congestion.window_size(),
            st.rtt.timeout()
        );

        st.drain_waiters(self.id, self.request_acks);
        !st.retransmissions.is_empty()
    }

    /// Next message due for retransmission
    ///
    /// `remove` drops the entry returned by the previous call first.
    pub async fn get_message_info_for_retry(&self, remove: bool) -> Option<MessageAttempt<S>> {
        let mut st = self.state.lock().await;
        if !st.is_open() {
            return None;
        }
        if remove {
            st.retransmissions.pop_front();
        }

        while let Some(&number) = st.retransmissions.front() {
            let window_start = st.window_start;
            let index = number.checked_sub(window_start).map(|i| i as usize);
            let message = index
                .filter(|&i| i < st.window.len())
                .and_then(|i| st.window.get_message(i).map(|message| (i, message)));

            let Some((index, mut message)) = message else {
                st.retransmissions.pop_front();
                continue;
            };

            let retry_count = st.window.record_retry(index, Instant::now());
            if self.request_acks {
                message.request_ack(self.id);
            }
            return Some(MessageAttempt {
                message,
                sequence_number: number,
                retry_count,
                state: st.window.state(index).clone(),
            });
        }
        None
    }

    async fn on_retry_elapsed(&self) {
        let attempt = {
            let mut st = self.state.lock().await;
            if !st.is_open() || st.window.is_empty() {
                return;
            }

            let now = Instant::now();
            let retry_count = st.window.record_retry(0, now);
            st.congestion.on_loss();
            st.rtt.back_off();
            st.loss_time = Some(now);

            let timeout = st.rtt.timeout();
            st.retry_timer.set(timeout);

            tracing::debug!(
                "Retry timer expired for message {} (retry {}, next timeout {:?})",
                st.window_start,
                retry_count,
                timeout
            );

            let Some(mut message) = st.window.get_message(0) else {
                return;
            };
            if self.request_acks {
                message.request_ack(self.id);
            }
            MessageAttempt {
                message,
                sequence_number: st.window_start,
                retry_count,
                state: st.window.state(0).clone(),
            }
        };

        if let Some(handler) = self.handler.upgrade() {
            handler.on_retry(attempt).await;
        }
    }

    /// Take back the retry counted for `number` when it was never sent
    pub async fn retry_skipped(&self, number: u64) {
        let mut st = self.state.lock().await;
        if !st.is_open() {
            return;
        }
        let Some(index) = number.checked_sub(st.window_start).map(|i| i as usize) else {
            return;
        };
        if index < st.window.len() {
            st.window.forgive_retry(index);
        }
    }

    /// Whether a final acknowledgement accounts for every message sent
    ///
    /// Still answers after a regular close; aborted and faulted strategies
    /// accept anything.
    pub async fn is_final_ack_consistent(&self, ranges: &SequenceRangeCollection) -> bool {
        let st = self.state.lock().await;
        if matches!(st.status, Status::Aborted | Status::Faulted(_)) {
            return true;
        }
        if st.window_start == 1 && st.window.is_empty() {
            return ranges.is_empty();
        }
        match ranges.first() {
            Some(first) => first.lower() == 1 && first.upper() >= st.window_start - 1,
            None => false,
        }
    }

    /// Fix the last sequence number at the highest one admitted so far
    ///
    /// Callers still waiting for admission complete as closed. Returns whether
    /// nothing remains to be transmitted.
    ///
    /// # Panics
    ///
    /// Panics if the last message was already added or set.
    pub async fn set_last(&self) -> bool {
        let mut st = self.state.lock().await;
        assert!(!st.last_added, "the last message was already added");
        st.last_added = true;
        let refused = st.refuse_waiters();
        if refused > 0 {
            tracing::debug!("Refused {} queued admissions on {}", refused, self.id);
        }
        st.last = st.last_sent();
        st.last == 0 || st.done_transmitting()
    }

    /// Last sequence number, 0 while unknown
    pub async fn last(&self) -> u64 {
        self.state.lock().await.last
    }

    /// Whether every message up to the last one was acknowledged
    pub async fn done_transmitting(&self) -> bool {
        self.state.lock().await.done_transmitting()
    }

    /// Next unacknowledged sequence number
    pub async fn window_start(&self) -> u64 {
        self.state.lock().await.window_start
    }

    /// Whether the strategy still accepts messages
    pub async fn is_open(&self) -> bool {
        self.state.lock().await.is_open()
    }

    /// Snapshot of the transmission state
    pub async fn stats(&self) -> TransmissionStats {
        let st = self.state.lock().await;
        TransmissionStats {
            window_start: st.window_start,
            window_size: st.congestion.window_size(),
            in_flight: st.window.len(),
            slow_start_threshold: st.congestion.slow_start_threshold(),
            loss_window_size: st.congestion.loss_window_size(),
            timeout: st.rtt.timeout(),
            mean_rtt: st.rtt.mean_rtt(),
            quota_remaining: st.quota_remaining,
            last: st.last,
            queued_retries: st.retransmissions.len(),
            waiters: st.waiters.len(),
        }
    }

    #[cfg(test)]
    pub(crate) async fn seed_window_start(&self, window_start: u64) {
        let mut st = self.state.lock().await;
        assert!(st.window.is_empty(), "seeding a window in use");
        st.window_start = window_start;
    }

    /// Stop transmitting; pending admissions complete as closed
    pub async fn close(&self) {
        if self.state.lock().await.terminate(Status::Closed) {
            tracing::debug!("Transmission strategy for {} closed", self.id);
        }
    }

    /// Stop transmitting; pending admissions complete as aborted
    pub async fn abort(&self) {
        if self.state.lock().await.terminate(Status::Aborted) {
            tracing::debug!("Transmission strategy for {} aborted", self.id);
        }
    }

    /// Stop transmitting; pending admissions complete with `error`
    pub async fn fault(&self, error: Error) {
        if self.state.lock().await.terminate(Status::Faulted(error)) {
            tracing::debug!("Transmission strategy for {} faulted", self.id);
        }
    }
}
