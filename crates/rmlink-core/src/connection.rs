//! Reliable output connection.
//!
//! Drives a [`TransmissionStrategy`] against an injected [`OutputHandler`]:
//! admitted messages go straight to the handler, acknowledgements slide the
//! window and schedule retries, and closing runs the version-specific end of
//! sequence exchange before the strategy is torn down.

use crate::config::ReliableSessionSettings;
use crate::error::{Error, Result};
use crate::fault::{TerminationReason, WsrmFault};
use crate::guard::SendGuard;
use crate::message::{Message, MessageAttempt};
use crate::protocol::{ProtocolVersion, SequenceId};
use crate::ranges::{SequenceRange, SequenceRangeCollection};
use crate::strategy::{AddOutcome, RetryHandler, TransmissionStats, TransmissionStrategy};
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Transmission callbacks supplied by the channel owning the connection
#[async_trait]
pub trait OutputHandler<S>: Send + Sync {
    /// Put one attempt of a sequenced message on the wire
    ///
    /// `mask_unhandled` is set for background sends (retries) whose failures
    /// nobody is waiting on.
    async fn send(&self, attempt: MessageAttempt<S>, timeout: Duration, mask_unhandled: bool)
    -> Result<()>;

    /// Solicit an acknowledgement without sending application data
    async fn send_ack_requested(&self, timeout: Duration) -> Result<()>;

    /// A failure the connection cannot recover from
    fn on_exception(&self, error: Error);

    /// Every message up to the last one was acknowledged
    fn on_transfer_complete(&self);
}

#[derive(Debug, Clone)]
enum Shutdown {
    Running,
    Completed,
    Faulted(Error),
    Aborted,
}

struct ConnectionInner<S> {
    id: SequenceId,
    version: ProtocolVersion,
    max_retry_count: u32,
    send_timeout: Duration,
    strategy: Arc<TransmissionStrategy<S>>,
    handler: Arc<dyn OutputHandler<S>>,
    guard: SendGuard,
    shutdown: watch::Sender<Shutdown>,
}

/// The sending half of a reliable sequence
pub struct ReliableOutputConnection<S> {
    inner: Arc<ConnectionInner<S>>,
}

impl<S> Clone for ReliableOutputConnection<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> std::fmt::Debug for ReliableOutputConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReliableOutputConnection")
            .field("id", &self.inner.id)
            .field("version", &self.inner.version)
            .finish_non_exhaustive()
    }
}

impl<S> ConnectionInner<S>
where
    S: Clone + Default + Send + Sync + 'static,
{
    async fn raise(&self, error: Error) {
        tracing::warn!("Output sequence {} failed: {}", self.id, error);
        self.fault(error.clone()).await;
        self.handler.on_exception(error);
    }

    async fn fault(&self, error: Error) {
        self.strategy.fault(error.clone()).await;
        self.shutdown.send_if_modified(|state| match state {
            Shutdown::Running => {
                *state = Shutdown::Faulted(error);
                true
            }
            _ => false,
        });
    }

    fn complete_transfer(&self) {
        let completed = self.shutdown.send_if_modified(|state| match state {
            Shutdown::Running => {
                *state = Shutdown::Completed;
                true
            }
            _ => false,
        });
        if completed {
            tracing::debug!("Output sequence {} fully acknowledged", self.id);
            self.handler.on_transfer_complete();
        }
    }

    /// Send a retry; `false` stops the retry loop
    async fn send_retry_attempt(&self, attempt: MessageAttempt<S>) -> bool {
        if attempt.retry_count > self.max_retry_count {
            let fault = WsrmFault::sequence_terminated(
                Some(self.id),
                TerminationReason::MaxRetryCountExceeded,
            );
            self.raise(fault.into()).await;
            return false;
        }

        let number = attempt.sequence_number;
        match self.handler.send(attempt, self.send_timeout, true).await {
            Ok(()) => true,
            Err(Error::QuotaExceeded) => {
                self.raise(quota_exceeded(self.id)).await;
                false
            }
            Err(error) if error.is_handleable() => {
                tracing::warn!("Retry of message {} failed: {}", number, error);
                true
            }
            Err(error) => {
                self.raise(error).await;
                false
            }
        }
    }

    async fn send_retries(self: Arc<Self>) {
        let Some(_token) = self.guard.try_enter() else {
            return;
        };

        let mut remove = false;
        while let Some(attempt) = self.strategy.get_message_info_for_retry(remove).await {
            remove = true;
            if !self.send_retry_attempt(attempt).await {
                break;
            }
        }
    }
}

#[async_trait]
impl<S> RetryHandler<S> for ConnectionInner<S>
where
    S: Clone + Default + Send + Sync + 'static,
{
    async fn on_retry(&self, attempt: MessageAttempt<S>) {
        if attempt.retry_count > self.max_retry_count {
            self.send_retry_attempt(attempt).await;
            return;
        }
        // A busy guard means a send is in progress; the next expiry retries again
        let Some(_token) = self.guard.try_enter() else {
            tracing::trace!(
                "Send in progress, retry of message {} skipped",
                attempt.sequence_number
            );
            self.strategy.retry_skipped(attempt.sequence_number).await;
            return;
        };
        self.send_retry_attempt(attempt).await;
    }
}

fn quota_exceeded(id: SequenceId) -> Error {
    WsrmFault::sequence_terminated(Some(id), TerminationReason::QuotaExceeded).into()
}

fn remaining(deadline: Option<Instant>) -> Duration {
    deadline.map_or(Duration::MAX, |deadline| {
        deadline.saturating_duration_since(Instant::now())
    })
}

impl<S> ReliableOutputConnection<S>
where
    S: Clone + Default + Send + Sync + 'static,
{
    /// Create the connection for output sequence `id`
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(
        id: SequenceId,
        settings: &ReliableSessionSettings,
        handler: Arc<dyn OutputHandler<S>>,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<ConnectionInner<S>>| {
            let retry: Weak<dyn RetryHandler<S>> = weak.clone();
            let (shutdown, _) = watch::channel(Shutdown::Running);
            ConnectionInner {
                id,
                version: settings.protocol_version,
                max_retry_count: settings.max_retry_count,
                send_timeout: settings.send_timeout,
                strategy: TransmissionStrategy::new(id, settings, retry),
                handler,
                guard: SendGuard::new(1),
                shutdown,
            }
        });
        Self { inner }
    }

    /// Identifier of the output sequence
    #[must_use]
    pub fn id(&self) -> SequenceId {
        self.inner.id
    }

    /// The underlying transmission strategy
    #[must_use]
    pub fn strategy(&self) -> &Arc<TransmissionStrategy<S>> {
        &self.inner.strategy
    }

    /// Admit `message` and send it if no other send is in progress
    ///
    /// # Errors
    ///
    /// Returns `Error::Timeout` if the window did not open in time, the terminal
    /// error of a closed, aborted or faulted connection, or a non-transport send
    /// failure.
    pub async fn add_message(&self, message: Message, timeout: Duration, state: S) -> Result<()> {
        let deadline = Instant::now().checked_add(timeout);
        let attempt = self
            .inner
            .strategy
            .add(message, timeout, state)
            .await
            .into_result()?;
        self.send_admitted(attempt, remaining(deadline)).await
    }

    async fn send_admitted(&self, attempt: MessageAttempt<S>, timeout: Duration) -> Result<()> {
        let Some(_token) = self.inner.guard.try_enter() else {
            tracing::trace!(
                "Send in progress, message {} left to the retry path",
                attempt.sequence_number
            );
            return Ok(());
        };

        let number = attempt.sequence_number;
        match self.inner.handler.send(attempt, timeout, false).await {
            Ok(()) => Ok(()),
            Err(Error::QuotaExceeded) => {
                let error = quota_exceeded(self.inner.id);
                self.inner.raise(error.clone()).await;
                Err(error)
            }
            Err(error) if error.is_handleable() => {
                tracing::warn!("Send of message {} failed, awaiting retry: {}", number, error);
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    /// Apply an acknowledgement of a single message (request/reply bindings)
    pub async fn process_transferred_number(&self, number: u64, quota: Option<u32>) {
        let ranges = SequenceRangeCollection::from(SequenceRange::single(number));
        if self.reject_invalid(&ranges).await {
            return;
        }
        let retry = self
            .inner
            .strategy
            .process_transferred_number(number, quota)
            .await;
        self.after_transferred(retry).await;
    }

    /// Apply an acknowledgement header's ranges (duplex bindings)
    pub async fn process_transferred_ranges(
        &self,
        ranges: &SequenceRangeCollection,
        quota: Option<u32>,
    ) {
        let class = self.inner.strategy.process_acknowledgement(ranges).await;
        if class.invalid {
            self.raise_invalid_ack(ranges).await;
            return;
        }
        if class.inconsistent {
            tracing::debug!("Ignoring inconsistent acknowledgement {}", ranges);
            return;
        }

        let mut retry = false;
        for range in ranges {
            retry |= self.inner.strategy.process_transferred(*range, quota).await;
        }
        self.after_transferred(retry).await;
    }

    async fn reject_invalid(&self, ranges: &SequenceRangeCollection) -> bool {
        let class = self.inner.strategy.process_acknowledgement(ranges).await;
        if class.invalid {
            self.raise_invalid_ack(ranges).await;
        }
        class.invalid
    }

    async fn raise_invalid_ack(&self, ranges: &SequenceRangeCollection) {
        tracing::warn!(
            "Acknowledgement {} names messages never sent on {}",
            ranges,
            self.inner.id
        );
        let fault = WsrmFault::invalid_acknowledgement(self.inner.id);
        self.inner.raise(fault.into()).await;
    }

    async fn after_transferred(&self, retry: bool) {
        if self.inner.strategy.done_transmitting().await {
            self.inner.complete_transfer();
        } else if retry {
            tokio::spawn(Arc::clone(&self.inner).send_retries());
        }
    }

    /// Whether a final acknowledgement accounts for every message sent
    pub async fn is_final_ack_consistent(&self, ranges: &SequenceRangeCollection) -> bool {
        self.inner.strategy.is_final_ack_consistent(ranges).await
    }

    /// Last sequence number, 0 while unknown
    pub async fn last(&self) -> u64 {
        self.inner.strategy.last().await
    }

    /// Transmission statistics snapshot
    pub async fn stats(&self) -> TransmissionStats {
        self.inner.strategy.stats().await
    }

    /// Whether every message up to the last one was acknowledged
    #[must_use]
    pub fn is_transfer_complete(&self) -> bool {
        matches!(*self.inner.shutdown.borrow(), Shutdown::Completed)
    }

    /// Mark the end of the output and wait for it to be fully acknowledged
    ///
    /// February 2005 sends a LastMessage; 1.1 fixes the last number and asks
    /// for an acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns `Error::Timeout` if the acknowledgements do not arrive in time,
    /// or the error the connection faulted with meanwhile.
    pub async fn close(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now().checked_add(timeout);
        let inner = &self.inner;

        if inner.version.uses_last_message() {
            let outcome = inner
                .strategy
                .add_last(Message::last_message(), timeout, S::default())
                .await;
            match outcome {
                AddOutcome::Admitted(attempt) => {
                    if inner.strategy.done_transmitting().await {
                        inner.complete_transfer();
                    } else {
                        self.send_admitted(attempt, remaining(deadline)).await?;
                    }
                }
                AddOutcome::TimedOut => {
                    let error = Error::Timeout("adding the last message".into());
                    inner.raise(error.clone()).await;
                    return Err(error);
                }
                other => {
                    other.into_result()?;
                }
            }
        } else if inner.strategy.set_last().await {
            inner.complete_transfer();
        } else if let Err(error) = inner.handler.send_ack_requested(remaining(deadline)).await {
            if !error.is_handleable() {
                return Err(error);
            }
            tracing::warn!("AckRequested for {} failed: {}", inner.id, error);
        }

        let mut shutdown = inner.shutdown.subscribe();
        let state = tokio::time::timeout(
            remaining(deadline),
            shutdown.wait_for(|state| !matches!(state, Shutdown::Running)),
        )
        .await
        .map_err(|_| Error::Timeout("waiting for the final acknowledgement".into()))?
        .map_err(|_| Error::Closed)?
        .clone();

        match state {
            Shutdown::Faulted(error) => return Err(error),
            Shutdown::Aborted => return Err(Error::Aborted),
            Shutdown::Running | Shutdown::Completed => {}
        }

        inner.guard.close(remaining(deadline)).await?;
        inner.strategy.close().await;
        tracing::debug!("Output sequence {} closed", inner.id);
        Ok(())
    }

    /// Tear down immediately
    pub async fn abort(&self) {
        self.inner.strategy.abort().await;
        self.inner.guard.abort();
        self.inner.shutdown.send_if_modified(|state| match state {
            Shutdown::Running => {
                *state = Shutdown::Aborted;
                true
            }
            _ => false,
        });
    }

    /// Fail every pending and future operation with `error`
    pub async fn fault(&self, error: Error) {
        self.inner.fault(error).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultKind;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockOutput {
        sent: StdMutex<Vec<(u64, u32)>>,
        ack_requests: AtomicUsize,
        exceptions: StdMutex<Vec<Error>>,
        completions: AtomicUsize,
        fail_with: StdMutex<Option<Error>>,
        stall: StdMutex<Option<Duration>>,
    }

    impl MockOutput {
        fn sent(&self) -> Vec<(u64, u32)> {
            self.sent.lock().unwrap().clone()
        }

        fn exceptions(&self) -> Vec<Error> {
            self.exceptions.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OutputHandler<()> for MockOutput {
        async fn send(
            &self,
            attempt: MessageAttempt<()>,
            _timeout: Duration,
            _mask_unhandled: bool,
        ) -> Result<()> {
            if let Some(error) = self.fail_with.lock().unwrap().clone() {
                return Err(error);
            }
            let stall = self.stall.lock().unwrap().take();
            if let Some(stall) = stall {
                tokio::time::sleep(stall).await;
            }
            self.sent
                .lock()
                .unwrap()
                .push((attempt.sequence_number, attempt.retry_count));
            Ok(())
        }

        async fn send_ack_requested(&self, _timeout: Duration) -> Result<()> {
            self.ack_requests.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_exception(&self, error: Error) {
            self.exceptions.lock().unwrap().push(error);
        }

        fn on_transfer_complete(&self) {
            self.completions.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn connection(
        version: ProtocolVersion,
        window: usize,
        max_retry_count: u32,
    ) -> (ReliableOutputConnection<()>, Arc<MockOutput>) {
        let settings = ReliableSessionSettings {
            protocol_version: version,
            initial_window_size: window,
            max_transfer_window_size: window,
            max_retry_count,
            ..Default::default()
        };
        let output = Arc::new(MockOutput::default());
        let handler: Arc<dyn OutputHandler<()>> = output.clone();
        (
            ReliableOutputConnection::new(SequenceId::generate(), &settings, handler),
            output,
        )
    }

    async fn add(connection: &ReliableOutputConnection<()>) -> Result<()> {
        connection
            .add_message(Message::application(vec![1]), Duration::from_secs(1), ())
            .await
    }

    fn ranges(lower: u64, upper: u64) -> SequenceRangeCollection {
        SequenceRangeCollection::from(SequenceRange::new(lower, upper))
    }

    #[tokio::test(start_paused = true)]
    async fn test_admitted_messages_are_sent() {
        let (connection, output) = connection(ProtocolVersion::February2005, 4, 8);
        add(&connection).await.unwrap();
        add(&connection).await.unwrap();
        assert_eq!(output.sent(), vec![(1, 0), (2, 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_is_left_to_retries() {
        let (connection, output) = connection(ProtocolVersion::February2005, 4, 8);
        *output.fail_with.lock().unwrap() = Some(Error::Transport("reset".into()));
        add(&connection).await.unwrap();
        assert!(output.exceptions().is_empty());
        assert_eq!(connection.stats().await.in_flight, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_exceeded_faults() {
        let (connection, output) = connection(ProtocolVersion::February2005, 4, 8);
        *output.fail_with.lock().unwrap() = Some(Error::QuotaExceeded);
        let err = add(&connection).await.unwrap_err();
        let fault = err.fault().unwrap();
        assert_eq!(
            fault.kind(),
            FaultKind::SequenceTerminated(TerminationReason::QuotaExceeded)
        );
        assert_eq!(output.exceptions().len(), 1);
        assert!(matches!(add(&connection).await, Err(Error::Fault(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_ack_faults() {
        let (connection, output) = connection(ProtocolVersion::February2005, 4, 8);
        add(&connection).await.unwrap();
        connection
            .process_transferred_ranges(&ranges(1, 5), None)
            .await;

        let exceptions = output.exceptions();
        assert_eq!(exceptions.len(), 1);
        assert_eq!(
            exceptions[0].fault().map(WsrmFault::kind),
            Some(FaultKind::InvalidAcknowledgement)
        );
        assert_eq!(connection.stats().await.window_start, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_of_message_zero_faults() {
        let (connection, output) = connection(ProtocolVersion::February2005, 4, 8);
        add(&connection).await.unwrap();
        connection
            .process_transferred_ranges(&ranges(0, 1), None)
            .await;

        let exceptions = output.exceptions();
        assert_eq!(exceptions.len(), 1);
        assert_eq!(
            exceptions[0].fault().map(WsrmFault::kind),
            Some(FaultKind::InvalidAcknowledgement)
        );
        assert_eq!(connection.stats().await.window_start, 1);

        let (connection, output) = self::connection(ProtocolVersion::February2005, 4, 8);
        add(&connection).await.unwrap();
        connection.process_transferred_number(0, None).await;
        assert_eq!(output.exceptions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inconsistent_ack_is_ignored() {
        let (connection, output) = connection(ProtocolVersion::February2005, 8, 8);
        for _ in 0..6 {
            add(&connection).await.unwrap();
        }
        connection
            .process_transferred_ranges(&ranges(1, 3), None)
            .await;

        let mixed: SequenceRangeCollection = [SequenceRange::single(2), SequenceRange::new(4, 5)]
            .into_iter()
            .collect();
        connection.process_transferred_ranges(&mixed, None).await;
        assert_eq!(connection.stats().await.window_start, 4);
        assert!(output.exceptions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_reply_acks() {
        let (connection, _output) = connection(ProtocolVersion::February2005, 4, 8);
        for _ in 0..3 {
            add(&connection).await.unwrap();
        }
        connection.process_transferred_number(2, None).await;
        connection.process_transferred_number(3, None).await;
        assert_eq!(connection.stats().await.window_start, 1);
        connection.process_transferred_number(1, None).await;
        assert_eq!(connection.stats().await.window_start, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_february_2005() {
        let (connection, output) = connection(ProtocolVersion::February2005, 4, 8);
        add(&connection).await.unwrap();
        add(&connection).await.unwrap();

        let closing = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.close(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(connection.last().await, 3);
        assert_eq!(output.sent(), vec![(1, 0), (2, 0), (3, 0)]);

        connection
            .process_transferred_ranges(&ranges(1, 3), None)
            .await;
        connection
            .process_transferred_ranges(&ranges(1, 3), None)
            .await;

        closing.await.unwrap().unwrap();
        assert!(connection.is_transfer_complete());
        assert_eq!(output.completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_v1_1_requests_ack() {
        let (connection, output) = connection(ProtocolVersion::V1_1, 4, 8);
        add(&connection).await.unwrap();

        let closing = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.close(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(output.ack_requests.load(Ordering::SeqCst), 1);
        assert_eq!(connection.last().await, 1);

        connection
            .process_transferred_ranges(&ranges(1, 1), None)
            .await;
        closing.await.unwrap().unwrap();
        assert_eq!(output.completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_v1_1_refuses_queued_messages() {
        let (connection, output) = connection(ProtocolVersion::V1_1, 1, 8);
        add(&connection).await.unwrap();
        let queued = {
            let connection = connection.clone();
            tokio::spawn(async move { add(&connection).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(connection.stats().await.waiters, 1);

        let closing = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.close(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(queued.await.unwrap(), Err(Error::Closed)));
        assert_eq!(connection.last().await, 1);

        connection
            .process_transferred_ranges(&ranges(1, 1), None)
            .await;
        closing.await.unwrap().unwrap();
        assert_eq!(output.sent(), vec![(1, 0)]);
        assert_eq!(output.completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_empty_v1_1_completes_at_once() {
        let (connection, output) = connection(ProtocolVersion::V1_1, 4, 8);
        connection.close(Duration::from_secs(1)).await.unwrap();
        assert_eq!(output.ack_requests.load(Ordering::SeqCst), 0);
        assert_eq!(output.completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_times_out_without_ack() {
        let (connection, _output) = connection(ProtocolVersion::V1_1, 4, 8);
        add(&connection).await.unwrap();
        let result = connection.close(Duration::from_millis(100)).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_after_loss() {
        let (connection, output) = connection(ProtocolVersion::February2005, 4, 8);
        for _ in 0..4 {
            add(&connection).await.unwrap();
        }

        // Retry timer fires at 600 ms for message 1
        tokio::time::sleep(Duration::from_millis(650)).await;
        connection.process_transferred_number(1, None).await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(
            output.sent(),
            vec![(1, 0), (2, 0), (3, 0), (4, 0), (1, 1), (2, 1), (3, 1)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_retry_count_exceeded() {
        let (connection, output) = connection(ProtocolVersion::February2005, 1, 1);
        add(&connection).await.unwrap();

        // Retries at 600 ms and 1800 ms; the second exceeds the limit
        tokio::time::sleep(Duration::from_millis(2000)).await;

        assert_eq!(output.sent(), vec![(1, 0), (1, 1)]);
        let exceptions = output.exceptions();
        assert_eq!(exceptions.len(), 1);
        assert_eq!(
            exceptions[0].fault().map(WsrmFault::kind),
            Some(FaultKind::SequenceTerminated(
                TerminationReason::MaxRetryCountExceeded
            ))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_during_send_does_not_count() {
        let (connection, output) = connection(ProtocolVersion::February2005, 1, 1);
        *output.stall.lock().unwrap() = Some(Duration::from_secs(5));
        let sending = {
            let connection = connection.clone();
            tokio::spawn(async move { add(&connection).await })
        };

        // Expiries at 600, 1800 and 4200 ms all find the first send in progress
        tokio::time::sleep(Duration::from_secs(6)).await;
        sending.await.unwrap().unwrap();
        assert_eq!(output.sent(), vec![(1, 0)]);
        assert!(output.exceptions().is_empty());

        // The expiry at 9000 ms is the first retry on the wire
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(output.sent(), vec![(1, 0), (1, 1)]);
        assert!(output.exceptions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_fails_close() {
        let (connection, _output) = connection(ProtocolVersion::V1_1, 4, 8);
        add(&connection).await.unwrap();
        let closing = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.close(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        connection.abort().await;
        assert!(matches!(closing.await.unwrap(), Err(Error::Aborted)));
        assert!(matches!(add(&connection).await, Err(Error::Aborted)));
    }
}
