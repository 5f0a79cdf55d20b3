//! In-memory lossy link for end-to-end tests
//!
//! Connects a client [`ReliableSession`] and its [`ReliableOutputConnection`] to
//! a [`ReliableInputConnection`] standing in for the remote endpoint. Sends can
//! be dropped by a loss pattern; every delivered message is acknowledged with
//! the receiver's full range set.
//!
//! # Example
//!
//! ```no_run
//! use rmlink_integration_tests::fixtures::LossyLink;
//! use rmlink_core::ReliableSessionSettings;
//!
//! # async fn demo() {
//! let link = LossyLink::new(|number, retry| retry == 0 && number % 3 == 0);
//! let (session, output) = link.open(ReliableSessionSettings::default()).await.unwrap();
//! # }
//! ```

use async_trait::async_trait;
use rmlink_core::{
    AcknowledgementHeader, CreateSequenceResponse, Error, MessageAttempt, MessageKind,
    OutputHandler, ProtocolReply, ProtocolRequest, ReliableInputConnection,
    ReliableOutputConnection, ReliableSession, ReliableSessionSettings, Result, Role,
    SequenceId, SessionChannel, WsrmFault,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Decides whether attempt `retry` of message `number` is lost
pub type LossPattern = Box<dyn Fn(u64, u32) -> bool + Send + Sync>;

/// Remote endpoint reached through a lossy in-memory link
pub struct LossyLink {
    loss: LossPattern,
    input: Mutex<Option<ReliableInputConnection>>,
    acks: mpsc::UnboundedSender<AcknowledgementHeader>,
    pending_acks: Mutex<Option<mpsc::UnboundedReceiver<AcknowledgementHeader>>>,
    delivered: Mutex<Vec<u64>>,
    attempts: AtomicUsize,
    dropped: AtomicUsize,
    ack_requests: AtomicUsize,
    faults_sent: Mutex<Vec<WsrmFault>>,
    exceptions: Mutex<Vec<Error>>,
    completions: AtomicUsize,
    connected: AtomicBool,
    drop_acks: AtomicBool,
}

impl LossyLink {
    /// Create a link losing the attempts selected by `loss`
    pub fn new<F>(loss: F) -> Arc<Self>
    where
        F: Fn(u64, u32) -> bool + Send + Sync + 'static,
    {
        let (acks, pending) = mpsc::unbounded_channel();
        Arc::new(Self {
            loss: Box::new(loss),
            input: Mutex::new(None),
            acks,
            pending_acks: Mutex::new(Some(pending)),
            delivered: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
            ack_requests: AtomicUsize::new(0),
            faults_sent: Mutex::new(Vec::new()),
            exceptions: Mutex::new(Vec::new()),
            completions: AtomicUsize::new(0),
            connected: AtomicBool::new(true),
            drop_acks: AtomicBool::new(false),
        })
    }

    /// A link that never loses anything
    pub fn reliable() -> Arc<Self> {
        Self::new(|_, _| false)
    }

    /// Open a client session over this link and attach its output connection
    ///
    /// Acknowledgements are pumped back into the connection by a spawned task.
    pub async fn open(
        self: &Arc<Self>,
        settings: ReliableSessionSettings,
    ) -> Result<(ReliableSession, ReliableOutputConnection<()>)> {
        crate::init_tracing();
        let channel: Arc<dyn SessionChannel> = self.clone();
        let session = ReliableSession::new(Role::Client, settings.clone(), Arc::downgrade(&channel))?;
        session.open(Duration::from_secs(5)).await?;

        let output_id = session
            .output_id()
            .await
            .ok_or_else(|| Error::InvalidState("session opened without output".into()))?;
        let handler: Arc<dyn OutputHandler<()>> = self.clone();
        let output = ReliableOutputConnection::new(output_id, &settings, handler);

        let pending = self.pending_acks.lock().unwrap().take();
        if let Some(mut pending) = pending {
            let connection = output.clone();
            let link = Arc::clone(self);
            tokio::spawn(async move {
                while let Some(ack) = pending.recv().await {
                    if link.drop_acks.load(Ordering::SeqCst) {
                        continue;
                    }
                    connection
                        .process_transferred_ranges(&ack.ranges, ack.buffer_remaining)
                        .await;
                }
            });
        }

        Ok((session, output))
    }

    /// Application sequence numbers delivered, in arrival order
    pub fn delivered(&self) -> Vec<u64> {
        self.delivered.lock().unwrap().clone()
    }

    /// Number of send attempts seen, lost ones included
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of send attempts lost
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Number of standalone acknowledgement requests
    pub fn ack_requests(&self) -> usize {
        self.ack_requests.load(Ordering::SeqCst)
    }

    /// Faults sent by the session
    pub fn faults_sent(&self) -> Vec<WsrmFault> {
        self.faults_sent.lock().unwrap().clone()
    }

    /// Errors reported by the output connection
    pub fn exceptions(&self) -> Vec<Error> {
        self.exceptions.lock().unwrap().clone()
    }

    /// Number of transfer-complete notifications
    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }

    /// Stop carrying acknowledgements back to the sender
    pub fn set_drop_acks(&self, drop: bool) {
        self.drop_acks.store(drop, Ordering::SeqCst);
    }

    /// Mark the link as disconnected
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Received ranges at the remote endpoint
    pub fn received(&self) -> Option<AcknowledgementHeader> {
        self.input
            .lock()
            .unwrap()
            .as_ref()
            .map(|input| input.create_acknowledgement(None, false))
    }

    fn acknowledge(&self) {
        if let Some(ack) = self.received() {
            // The pump only stops when the runtime shuts down
            let _ = self.acks.send(ack);
        }
    }
}

#[async_trait]
impl OutputHandler<()> for LossyLink {
    async fn send(
        &self,
        attempt: MessageAttempt<()>,
        _timeout: Duration,
        _mask_unhandled: bool,
    ) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if (self.loss)(attempt.sequence_number, attempt.retry_count) {
            self.dropped.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }

        let is_last = attempt.message.sequence().is_some_and(|header| header.last);
        let fresh = {
            let mut input = self.input.lock().unwrap();
            let input = input
                .as_mut()
                .ok_or_else(|| Error::Transport("no sequence created".into()))?;
            input.process_incoming(attempt.sequence_number, is_last)?
        };
        if fresh && attempt.message.kind() == MessageKind::Application {
            self.delivered.lock().unwrap().push(attempt.sequence_number);
        }
        tracing::trace!("Delivered message {} (fresh: {})", attempt.sequence_number, fresh);

        self.acknowledge();
        Ok(())
    }

    async fn send_ack_requested(&self, _timeout: Duration) -> Result<()> {
        self.ack_requests.fetch_add(1, Ordering::SeqCst);
        self.acknowledge();
        Ok(())
    }

    fn on_exception(&self, error: Error) {
        self.exceptions.lock().unwrap().push(error);
    }

    fn on_transfer_complete(&self) {
        self.completions.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionChannel for LossyLink {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send_fault(&self, fault: WsrmFault, _timeout: Duration) -> Result<()> {
        self.faults_sent.lock().unwrap().push(fault);
        Ok(())
    }

    async fn request(&self, request: ProtocolRequest, _timeout: Duration) -> Result<ProtocolReply> {
        let mut input = self.input.lock().unwrap();
        let reply = match request {
            ProtocolRequest::CreateSequence(create) => {
                let id = SequenceId::generate();
                *input = Some(ReliableInputConnection::new(id));
                ProtocolReply::CreateSequenceResponse(CreateSequenceResponse {
                    sequence_id: id,
                    accepted_offer: create.offer,
                })
            }
            ProtocolRequest::CloseSequence { sequence_id, last } => {
                let Some(input) = input.as_mut().filter(|input| input.id() == sequence_id) else {
                    return Ok(ProtocolReply::Fault(WsrmFault::unknown_sequence(sequence_id)));
                };
                if let Err(Error::Fault(fault)) = input.set_last(last) {
                    return Ok(ProtocolReply::Fault(fault));
                }
                ProtocolReply::CloseSequenceResponse {
                    sequence_id,
                    final_ack: Some(input.create_acknowledgement(None, true)),
                }
            }
            ProtocolRequest::TerminateSequence { sequence_id, .. } => {
                let Some(input) = input.as_mut().filter(|input| input.id() == sequence_id) else {
                    return Ok(ProtocolReply::Fault(WsrmFault::unknown_sequence(sequence_id)));
                };
                input.terminate();
                ProtocolReply::TerminateSequenceResponse { sequence_id }
            }
        };
        Ok(reply)
    }

    async fn poll(&self, _timeout: Duration) -> Result<()> {
        self.acknowledge();
        Ok(())
    }

    fn on_faulted(&self, error: Error) {
        self.exceptions.lock().unwrap().push(error);
    }
}
