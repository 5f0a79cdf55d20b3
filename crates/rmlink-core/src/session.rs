//! Reliable session: lifecycle, fault coordination and protocol verification.
//!
//! A session binds an output sequence, an input sequence or both to a channel.
//! It runs the CreateSequence and close/terminate exchanges, watches the peer
//! for inactivity, polls on behalf of clients, and funnels every failure
//! through a single fault path so that at most one fault message is sent.
//!
//! # Fault handling
//!
//! ```text
//! NotFaulted --local--> LocallyFaulted --fault sent or skipped--> CleanedUp
//!            \--remote-> RemotelyFaulted ----------------------/
//! ```
//!
//! The session refers to its channel through a `Weak` handle; the channel owns
//! the session and the connections.

use crate::config::ReliableSessionSettings;
use crate::connection::ReliableOutputConnection;
use crate::error::{Error, Result};
use crate::fault::{TerminationReason, WsrmFault};
use crate::message::{
    CreateSequence, CreateSequenceResponse, ProtocolReply, ProtocolRequest, WsrmMessageInfo,
};
use crate::polling::{Poller, PollingMode};
use crate::protocol::{ProtocolVersion, Role, SendMode, SequenceId};
use crate::timer::Timer;
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Upper bound on delivering a fault message to the peer
const FAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on acquiring the session state during abort
const ABORT_TIMEOUT: Duration = Duration::from_secs(1);

/// Services the session needs from the channel that owns it
#[async_trait]
pub trait SessionChannel: Send + Sync {
    /// Whether the underlying connection can still carry a message
    fn is_connected(&self) -> bool;

    /// Deliver a fault message to the peer
    async fn send_fault(&self, fault: WsrmFault, timeout: Duration) -> Result<()>;

    /// Send a protocol request and wait for its reply
    async fn request(&self, request: ProtocolRequest, timeout: Duration) -> Result<ProtocolReply>;

    /// Send a keep-alive poll
    async fn poll(&self, timeout: Duration) -> Result<()>;

    /// The session faulted; pending operations on the channel should fail
    fn on_faulted(&self, error: Error);
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Not yet opened
    Created,
    /// CreateSequence in flight
    Opening,
    /// Sequences established
    Established,
    /// CloseSequence handshake in progress
    Closing,
    /// TerminateSequence handshake in progress
    Terminating,
    /// Gracefully finished
    Terminated,
    /// Failed; no further traffic
    Faulted,
    /// Torn down without handshakes
    Aborted,
}

impl SessionState {
    /// Check if moving to `to` is allowed
    #[must_use]
    pub fn can_transition(self, to: SessionState) -> bool {
        use SessionState::{
            Aborted, Closing, Created, Established, Faulted, Opening, Terminated, Terminating,
        };

        match (self, to) {
            (Created, Opening | Established)
            | (Opening, Established)
            | (Established, Closing | Terminating)
            | (Closing, Terminating)
            | (Terminating, Terminated)
            | (Created | Opening | Established | Closing | Terminating, Faulted) => true,
            (from, Aborted) => !matches!(from, Aborted | Terminated),
            _ => false,
        }
    }

    /// Whether the session can no longer carry traffic
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Faulted | Self::Aborted)
    }
}

/// Fault progression of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultState {
    /// No fault observed
    NotFaulted,
    /// This side detected a fault
    LocallyFaulted,
    /// The peer sent a fault
    RemotelyFaulted,
    /// Fault handling finished
    CleanedUp,
}

#[derive(Debug)]
struct SessionCore {
    state: SessionState,
    fault_state: FaultState,
    input_id: Option<SequenceId>,
    output_id: Option<SequenceId>,
    pending_error: Option<Error>,
}

impl SessionCore {
    fn transition_to(&mut self, to: SessionState) -> Result<()> {
        if !self.state.can_transition(to) {
            return Err(Error::InvalidState(
                format!("cannot move session from {:?} to {:?}", self.state, to).into(),
            ));
        }
        tracing::debug!("Session state transition: {:?} -> {:?}", self.state, to);
        self.state = to;
        Ok(())
    }
}

struct SessionInner {
    role: Role,
    settings: ReliableSessionSettings,
    channel: Weak<dyn SessionChannel>,
    core: Mutex<SessionCore>,
    inactivity: Timer,
    poller: Option<Arc<Poller>>,
}

/// Reliable session shared by a channel and its background tasks
#[derive(Clone)]
pub struct ReliableSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for ReliableSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReliableSession")
            .field("role", &self.inner.role)
            .field("version", &self.inner.settings.protocol_version)
            .finish_non_exhaustive()
    }
}

fn remaining(deadline: Option<Instant>) -> Duration {
    deadline.map_or(Duration::MAX, |deadline| {
        deadline.saturating_duration_since(Instant::now())
    })
}

fn unexpected_element(id: Option<SequenceId>) -> WsrmFault {
    WsrmFault::sequence_terminated(id, TerminationReason::UnexpectedElement)
}

/// Check the identifiers on an incoming message against a duplex session
fn duplex_fault(
    info: &WsrmMessageInfo,
    version: ProtocolVersion,
    input: Option<SequenceId>,
    output: Option<SequenceId>,
) -> Option<WsrmFault> {
    if let Some(ack) = &info.acknowledgement {
        if Some(ack.sequence_id) != output {
            return Some(WsrmFault::unknown_sequence(ack.sequence_id));
        }
    }
    if let Some(id) = info.ack_requested {
        if Some(id) != input {
            return Some(WsrmFault::unknown_sequence(id));
        }
    }
    if let Some(header) = &info.sequence {
        if Some(header.id) != input {
            return Some(WsrmFault::unknown_sequence(header.id));
        }
    }
    if let Some(id) = info.terminate_sequence {
        if Some(id) != input {
            if !version.supports_close() {
                return Some(unexpected_element(Some(id)));
            }
            if Some(id) != output {
                return Some(WsrmFault::unknown_sequence(id));
            }
        }
    }
    if let Some(id) = info.terminate_sequence_response {
        if !version.supports_close() {
            return Some(unexpected_element(Some(id)));
        }
        if Some(id) != output {
            return Some(WsrmFault::unknown_sequence(id));
        }
    }
    if let Some(id) = info.close_sequence {
        if !version.supports_close() || (Some(id) == output && Some(id) != input) {
            return Some(WsrmFault::sequence_terminated(
                Some(id),
                TerminationReason::UnsupportedClose,
            ));
        }
        if Some(id) != input {
            return Some(WsrmFault::unknown_sequence(id));
        }
    }
    if let Some(id) = info.close_sequence_response {
        if !version.supports_close() || (Some(id) == input && Some(id) != output) {
            return Some(unexpected_element(Some(id)));
        }
        if Some(id) != output {
            return Some(WsrmFault::unknown_sequence(id));
        }
    }
    None
}

/// Check one identifier against the sequence of a simplex direction
fn simplex_check(id: SequenceId, expected: Option<SequenceId>) -> Option<WsrmFault> {
    match expected {
        None => Some(unexpected_element(Some(id))),
        Some(expected) if expected != id => Some(WsrmFault::unknown_sequence(id)),
        Some(_) => None,
    }
}

/// Check the elements on an incoming message against a one-directional session
fn simplex_fault(
    info: &WsrmMessageInfo,
    version: ProtocolVersion,
    input: Option<SequenceId>,
    output: Option<SequenceId>,
) -> Option<WsrmFault> {
    if !version.supports_close() {
        if let Some(id) = info.close_sequence {
            return Some(WsrmFault::sequence_terminated(
                Some(id),
                TerminationReason::UnsupportedClose,
            ));
        }
        if let Some(id) = info.close_sequence_response.or(info.terminate_sequence_response) {
            return Some(unexpected_element(Some(id)));
        }
    }

    let outbound = [
        info.acknowledgement.as_ref().map(|ack| ack.sequence_id),
        info.terminate_sequence_response,
        info.close_sequence_response,
    ];
    let inbound = [
        info.sequence.as_ref().map(|header| header.id),
        info.ack_requested,
        info.terminate_sequence,
        info.close_sequence,
    ];

    outbound
        .into_iter()
        .flatten()
        .find_map(|id| simplex_check(id, output))
        .or_else(|| {
            inbound
                .into_iter()
                .flatten()
                .find_map(|id| simplex_check(id, input))
        })
}

impl ReliableSession {
    /// Create a session for `role` bound to `channel`
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the settings do not validate.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(
        role: Role,
        settings: ReliableSessionSettings,
        channel: Weak<dyn SessionChannel>,
    ) -> Result<Self> {
        settings.validate()?;

        let inner = Arc::new_cyclic(|weak: &Weak<SessionInner>| {
            let owner = weak.clone();
            let inactivity = Timer::new("inactivity", move || {
                if let Some(inner) = owner.upgrade() {
                    tokio::spawn(async move {
                        ReliableSession { inner }.on_inactivity_timeout().await;
                    });
                }
            });

            let poller = (role == Role::Client).then(|| {
                let owner = weak.clone();
                Poller::new(&settings, move || {
                    if let Some(inner) = owner.upgrade() {
                        tokio::spawn(async move {
                            ReliableSession { inner }.poll().await;
                        });
                    }
                })
            });

            SessionInner {
                role,
                settings,
                channel,
                core: Mutex::new(SessionCore {
                    state: SessionState::Created,
                    fault_state: FaultState::NotFaulted,
                    input_id: None,
                    output_id: None,
                    pending_error: None,
                }),
                inactivity,
                poller,
            }
        });

        Ok(Self { inner })
    }

    /// Side of the handshake this session plays
    #[must_use]
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Session settings
    #[must_use]
    pub fn settings(&self) -> &ReliableSessionSettings {
        &self.inner.settings
    }

    /// Current lifecycle state
    pub async fn state(&self) -> SessionState {
        self.inner.core.lock().await.state
    }

    /// Current fault progression
    pub async fn fault_state(&self) -> FaultState {
        self.inner.core.lock().await.fault_state
    }

    /// Identifier of the sequence this side receives on
    pub async fn input_id(&self) -> Option<SequenceId> {
        self.inner.core.lock().await.input_id
    }

    /// Identifier of the sequence this side sends on
    pub async fn output_id(&self) -> Option<SequenceId> {
        self.inner.core.lock().await.output_id
    }

    /// Current polling mode, for client sessions
    #[must_use]
    pub fn polling_mode(&self) -> Option<PollingMode> {
        self.inner.poller.as_ref().map(|poller| poller.mode())
    }

    fn channel(&self) -> Result<Arc<dyn SessionChannel>> {
        self.inner.channel.upgrade().ok_or(Error::Closed)
    }

    fn start_timers(&self) {
        self.inner
            .inactivity
            .set(self.inner.settings.inactivity_timeout);
        if let Some(poller) = &self.inner.poller {
            poller.set_mode(PollingMode::Idle);
        }
    }

    fn stop_timers(&self) {
        self.inner.inactivity.cancel();
        if let Some(poller) = &self.inner.poller {
            poller.stop();
        }
    }

    /// Fail fast once the session is no longer usable
    ///
    /// # Errors
    ///
    /// Returns the pending error of a faulted session once, `Error::Faulted`
    /// afterwards, `Error::Aborted` after an abort and `Error::Closed` after
    /// termination.
    pub async fn ensure_usable(&self) -> Result<()> {
        let mut core = self.inner.core.lock().await;
        match core.state {
            SessionState::Faulted => Err(core.pending_error.take().unwrap_or(Error::Faulted)),
            SessionState::Aborted => Err(Error::Aborted),
            SessionState::Terminated => Err(Error::Closed),
            _ => Ok(()),
        }
    }

    /// Establish the sequences by sending CreateSequence (client side)
    ///
    /// Duplex sessions offer the identifier of the return sequence.
    ///
    /// # Errors
    ///
    /// Returns the request failure, the peer's fault, or a
    /// `CreateSequenceRefused` fault if the offer was not accepted.
    pub async fn open(&self, timeout: Duration) -> Result<()> {
        if self.inner.role != Role::Client {
            return Err(Error::InvalidState("only clients send CreateSequence".into()));
        }

        let offer = {
            let mut core = self.inner.core.lock().await;
            core.transition_to(SessionState::Opening)?;
            (self.inner.settings.send_mode == SendMode::Duplex).then(SequenceId::generate)
        };

        let channel = self.channel()?;
        let request = ProtocolRequest::CreateSequence(CreateSequence { offer });
        let reply = match channel.request(request, timeout).await {
            Ok(reply) => reply,
            Err(error) => {
                self.on_local_fault(error.clone(), None).await;
                return Err(error);
            }
        };

        match reply {
            ProtocolReply::CreateSequenceResponse(response) => {
                if offer.is_some() && response.accepted_offer != offer {
                    let fault =
                        WsrmFault::create_sequence_refused("the offered return sequence was refused");
                    self.on_local_fault(fault.clone().into(), None).await;
                    return Err(fault.into());
                }

                {
                    let mut core = self.inner.core.lock().await;
                    core.output_id = Some(response.sequence_id);
                    core.input_id = offer;
                    core.transition_to(SessionState::Established)?;
                }
                self.start_timers();
                tracing::debug!(
                    "Session opened: output {} input {:?}",
                    response.sequence_id,
                    offer
                );
                Ok(())
            }
            other => Err(self.unexpected_reply(other, None).await),
        }
    }

    /// Answer a peer's CreateSequence (server side)
    ///
    /// # Errors
    ///
    /// Returns a `CreateSequenceRefused` fault when a duplex session is asked
    /// for without an offer, or `Error::InvalidState` if already opened.
    pub async fn process_create_sequence(
        &self,
        request: &CreateSequence,
    ) -> Result<CreateSequenceResponse> {
        if self.inner.settings.send_mode == SendMode::Duplex && request.offer.is_none() {
            return Err(WsrmFault::create_sequence_refused(
                "a duplex session requires an offered return sequence",
            )
            .into());
        }

        let input_id = SequenceId::generate();
        {
            let mut core = self.inner.core.lock().await;
            core.transition_to(SessionState::Established)?;
            core.input_id = Some(input_id);
            core.output_id = request.offer;
        }
        self.start_timers();

        Ok(CreateSequenceResponse {
            sequence_id: input_id,
            accepted_offer: request.offer,
        })
    }

    async fn unexpected_reply(&self, reply: ProtocolReply, id: Option<SequenceId>) -> Error {
        if let ProtocolReply::Fault(fault) = reply {
            let fault = fault.into_remote();
            self.on_remote_fault(fault.clone()).await;
            return fault.into();
        }
        tracing::warn!("Unexpected protocol reply: {:?}", reply);
        let fault = unexpected_element(id);
        self.on_local_fault(fault.clone().into(), Some(fault.clone()))
            .await;
        fault.into()
    }

    /// Finish the output sequence and run the close/terminate exchange
    ///
    /// 1.1 sessions send CloseSequence and check its final acknowledgement
    /// before TerminateSequence; February 2005 sessions only terminate.
    ///
    /// # Errors
    ///
    /// Returns a timeout or connection failure, the peer's fault, or an
    /// `InvalidAcknowledgement` fault for an incomplete final acknowledgement.
    pub async fn close_output<S>(
        &self,
        connection: &ReliableOutputConnection<S>,
        timeout: Duration,
    ) -> Result<()>
    where
        S: Clone + Default + Send + Sync + 'static,
    {
        let deadline = Instant::now().checked_add(timeout);
        self.ensure_usable().await?;

        let version = self.inner.settings.protocol_version;
        let output_id = {
            let mut core = self.inner.core.lock().await;
            let output_id = core
                .output_id
                .ok_or_else(|| Error::InvalidState("the session has no output sequence".into()))?;
            let next = if version.supports_close() {
                SessionState::Closing
            } else {
                SessionState::Terminating
            };
            core.transition_to(next)?;
            output_id
        };

        connection.close(remaining(deadline)).await?;
        let last = connection.last().await;
        let channel = self.channel()?;

        if version.supports_close() {
            let request = ProtocolRequest::CloseSequence {
                sequence_id: output_id,
                last,
            };
            match channel.request(request, remaining(deadline)).await? {
                ProtocolReply::CloseSequenceResponse {
                    sequence_id,
                    final_ack,
                } if sequence_id == output_id => {
                    if let Some(ack) = final_ack {
                        let consistent = ack.sequence_id == output_id
                            && connection.is_final_ack_consistent(&ack.ranges).await;
                        if !consistent {
                            tracing::warn!("Final acknowledgement {} is incomplete", ack.ranges);
                            let fault = WsrmFault::invalid_acknowledgement(output_id);
                            self.on_local_fault(fault.clone().into(), Some(fault.clone()))
                                .await;
                            return Err(fault.into());
                        }
                    }
                }
                other => return Err(self.unexpected_reply(other, Some(output_id)).await),
            }
            self.inner
                .core
                .lock()
                .await
                .transition_to(SessionState::Terminating)?;
        }

        let request = ProtocolRequest::TerminateSequence {
            sequence_id: output_id,
            last,
        };
        match channel.request(request, remaining(deadline)).await? {
            ProtocolReply::TerminateSequenceResponse { sequence_id } if sequence_id == output_id => {
            }
            other => return Err(self.unexpected_reply(other, Some(output_id)).await),
        }

        self.inner
            .core
            .lock()
            .await
            .transition_to(SessionState::Terminated)?;
        self.stop_timers();
        Ok(())
    }

    /// Verify the identifiers on a message received by a duplex session
    ///
    /// A mismatch faults the session locally. Returns `Ok(false)` in that case
    /// unless `throw_on_fault` asks for the fault as an error.
    ///
    /// # Errors
    ///
    /// Returns the fault when verification fails and `throw_on_fault` is set.
    pub async fn verify_duplex_protocol_elements(
        &self,
        info: &WsrmMessageInfo,
        throw_on_fault: bool,
    ) -> Result<bool> {
        let fault = {
            let core = self.inner.core.lock().await;
            duplex_fault(
                info,
                self.inner.settings.protocol_version,
                core.input_id,
                core.output_id,
            )
        };
        self.handle_verification(fault, throw_on_fault).await
    }

    /// Verify a message received by a one-directional session
    ///
    /// Elements belonging to the missing direction are unexpected.
    ///
    /// # Errors
    ///
    /// Returns the fault when verification fails and `throw_on_fault` is set.
    pub async fn verify_simplex_protocol_elements(
        &self,
        info: &WsrmMessageInfo,
        throw_on_fault: bool,
    ) -> Result<bool> {
        let fault = {
            let core = self.inner.core.lock().await;
            simplex_fault(
                info,
                self.inner.settings.protocol_version,
                core.input_id,
                core.output_id,
            )
        };
        self.handle_verification(fault, throw_on_fault).await
    }

    async fn handle_verification(
        &self,
        fault: Option<WsrmFault>,
        throw_on_fault: bool,
    ) -> Result<bool> {
        let Some(fault) = fault else {
            return Ok(true);
        };
        tracing::warn!("Protocol verification failed: {}", fault);
        self.on_local_fault(fault.clone().into(), Some(fault.clone()))
            .await;
        if throw_on_fault {
            Err(fault.into())
        } else {
            Ok(false)
        }
    }

    /// Fault the session from this side
    ///
    /// Only the first fault counts. If `fault` is given and the channel is
    /// still connected, it is sent to the peer before cleanup; otherwise cleanup
    /// happens at once.
    pub async fn on_local_fault(&self, error: Error, fault: Option<WsrmFault>) {
        {
            let mut core = self.inner.core.lock().await;
            if core.fault_state != FaultState::NotFaulted || core.state.is_terminal() {
                tracing::trace!("Ignoring fault on finished session: {}", error);
                return;
            }
            core.fault_state = FaultState::LocallyFaulted;
            core.pending_error = Some(error.clone());
            core.state = SessionState::Faulted;
        }
        tracing::warn!("Session faulted locally: {}", error);
        self.stop_timers();

        let channel = self.inner.channel.upgrade();
        if let Some(channel) = &channel {
            channel.on_faulted(error);
        }

        let connected = channel.as_ref().is_some_and(|channel| channel.is_connected());
        match (fault.filter(|_| connected), channel) {
            (Some(fault), Some(channel)) => {
                let session = self.clone();
                tokio::spawn(async move {
                    if let Err(error) = channel.send_fault(fault, FAULT_SEND_TIMEOUT).await {
                        tracing::debug!("Fault message was not delivered: {}", error);
                    }
                    session.cleanup().await;
                });
            }
            _ => self.cleanup().await,
        }
    }

    /// Fault the session because the peer sent `fault`
    pub async fn on_remote_fault(&self, fault: WsrmFault) {
        let error = Error::Fault(fault.into_remote());
        {
            let mut core = self.inner.core.lock().await;
            if core.fault_state != FaultState::NotFaulted || core.state.is_terminal() {
                return;
            }
            core.fault_state = FaultState::RemotelyFaulted;
            core.pending_error = Some(error.clone());
            core.state = SessionState::Faulted;
        }
        tracing::warn!("Session faulted by peer: {}", error);
        self.stop_timers();

        if let Some(channel) = self.inner.channel.upgrade() {
            channel.on_faulted(error);
        }
        self.cleanup().await;
    }

    /// Fault the session for an error nobody can report to the peer
    pub async fn on_unknown_error(&self, error: Error) {
        self.on_local_fault(error, None).await;
    }

    async fn cleanup(&self) {
        let mut core = self.inner.core.lock().await;
        if matches!(
            core.fault_state,
            FaultState::LocallyFaulted | FaultState::RemotelyFaulted
        ) {
            core.fault_state = FaultState::CleanedUp;
        }
    }

    /// Tear down without handshakes; never blocks for long
    ///
    /// An active, unfaulted session tells a connected peer with a
    /// `CommunicationFailure` termination fault; the send is not awaited.
    pub async fn abort(&self) {
        self.stop_timers();
        let notify = match tokio::time::timeout(ABORT_TIMEOUT, self.inner.core.lock()).await {
            Ok(mut core) => {
                let active = matches!(
                    core.state,
                    SessionState::Established | SessionState::Closing | SessionState::Terminating
                ) && core.fault_state == FaultState::NotFaulted;
                if core.state.can_transition(SessionState::Aborted) {
                    core.state = SessionState::Aborted;
                    tracing::debug!("Session aborted");
                }
                if core.fault_state != FaultState::NotFaulted {
                    core.fault_state = FaultState::CleanedUp;
                }
                active.then(|| core.output_id.or(core.input_id)).flatten()
            }
            Err(_) => {
                tracing::warn!("Session state busy, abort skipped state update");
                None
            }
        };

        let Some(id) = notify else {
            return;
        };
        if let Some(channel) = self.inner.channel.upgrade().filter(|c| c.is_connected()) {
            let fault =
                WsrmFault::sequence_terminated(Some(id), TerminationReason::CommunicationFailure);
            tokio::spawn(async move {
                if let Err(error) = channel.send_fault(fault, FAULT_SEND_TIMEOUT).await {
                    tracing::debug!("Abort fault was not delivered: {}", error);
                }
            });
        }
    }

    /// The peer was heard from
    pub async fn on_remote_activity(&self, fast_polling_requested: bool) {
        if self.inner.core.lock().await.state.is_terminal() {
            return;
        }
        self.inner
            .inactivity
            .set(self.inner.settings.inactivity_timeout);
        if let Some(poller) = &self.inner.poller {
            poller.on_remote_activity(fast_polling_requested);
        }
    }

    /// This side sent something
    pub fn on_local_activity(&self) {
        if let Some(poller) = &self.inner.poller {
            poller.on_local_activity();
        }
    }

    async fn on_inactivity_timeout(&self) {
        let id = {
            let core = self.inner.core.lock().await;
            core.input_id.or(core.output_id)
        };
        let fault = WsrmFault::sequence_terminated(id, TerminationReason::InactivityTimeout);
        self.on_local_fault(fault.clone().into(), Some(fault)).await;
    }

    async fn poll(&self) {
        let Ok(channel) = self.channel() else {
            return;
        };
        if let Err(error) = channel.poll(self.inner.settings.send_timeout).await {
            if error.is_handleable() {
                tracing::warn!("Poll failed: {}", error);
            } else {
                self.on_unknown_error(error).await;
            }
        }
    }
}
