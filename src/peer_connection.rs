use crate::candidate_buffer::CandidateBuffer;
use crate::error::Error;
use crate::negotiator::{Connectivity, NegotiationState, Negotiator, TransportEvent};
use crate::options::Options;
use crate::signal::{ClientEvent, NegotiationMessage, ParticipantId, Payload};
use arc_swap::{ArcSwap, Guard};
use log::{debug, error, info, warn};
use std::fmt::Formatter;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, Notify};

/// Observable state of a [PeerConnection].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    AwaitingPeer,
    Initiating,
    Answering,
    Connected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Answerer,
}

/// Result of feeding an event into a [PeerConnection].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Applied,
    /// Candidate stored until the remote description is known.
    Buffered,
    /// Event arrived in a state where it makes no sense. Nothing has been changed.
    Discarded(GuardViolation),
}

/// Protocol events received out of order. These are never fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardViolation {
    #[error("connection has not been started")]
    NotStarted,
    #[error("connection is already {0:?}")]
    AlreadyStarted(ConnectionState),
    #[error("session started before participant id was assigned")]
    UnknownLocalId,
    #[error("not a member of the session between {initiator} and {answerer}")]
    NotMember {
        initiator: ParticipantId,
        answerer: ParticipantId,
    },
    #[error("connection is {0:?} and no longer negotiates")]
    Terminated(ConnectionState),
    #[error("unexpected offer in state {state:?} (role: {role:?})")]
    UnexpectedOffer {
        state: ConnectionState,
        role: Option<Role>,
    },
    #[error("unexpected answer in state {state:?} (role: {role:?}, signaling: {signaling:?})")]
    UnexpectedAnswer {
        state: ConnectionState,
        role: Option<Role>,
        signaling: NegotiationState,
    },
}

/// Client side of the two-party negotiation.
///
/// It's driven by three kinds of input: local actions ([PeerConnection::start],
/// [PeerConnection::close]), messages relayed by the signaling hub
/// ([PeerConnection::begin_session], [PeerConnection::apply_signal]) and events reported by the
/// underlying [Negotiator]. Outbound messages for the hub are read with
/// [PeerConnection::listen].
///
/// All negotiation steps are serialized behind a single lock, which also guards the remote
/// candidate buffer: a candidate is either applied or buffered, never both and never lost.
pub struct PeerConnection<N: Negotiator> {
    negotiator: N,
    options: Options,
    local_id: OnceLock<ParticipantId>,
    role: OnceLock<Role>,
    status: ConnectionStatus,
    negotiation: Mutex<Negotiation<N::Candidate>>,
    inbound: Mutex<Option<InboundStream<N::Track>>>,
    side_channels: SideChannels<N::Channel>,
    signal_sender: UnboundedSender<ClientEvent>,
    signal_receiver: Mutex<UnboundedReceiver<ClientEvent>>,
}

impl<N: Negotiator> PeerConnection<N> {
    /// Creates a new connection in [ConnectionState::Idle] state. Events from `transport` are
    /// processed in background for as long as the connection is alive.
    pub fn new(
        negotiator: N,
        transport: UnboundedReceiver<TransportEvent<N>>,
        options: Options,
    ) -> Arc<Self> {
        let (signal_sender, signal_receiver) = unbounded_channel();
        let pc = Arc::new(PeerConnection {
            negotiator,
            options,
            local_id: OnceLock::new(),
            role: OnceLock::new(),
            status: ConnectionStatus::default(),
            negotiation: Mutex::new(Negotiation::default()),
            inbound: Mutex::new(None),
            side_channels: SideChannels::new(),
            signal_sender,
            signal_receiver: Mutex::new(signal_receiver),
        });
        tokio::spawn(pump_transport_events(Arc::downgrade(&pc), transport));
        pc
    }

    pub fn state(&self) -> ConnectionState {
        self.status.get().state()
    }

    pub fn role(&self) -> Option<Role> {
        self.role.get().copied()
    }

    pub fn local_id(&self) -> Option<ParticipantId> {
        self.local_id.get().copied()
    }

    /// Set the id assigned to this participant by the hub. Only the first call has an effect.
    pub fn assign_id(&self, id: ParticipantId) -> bool {
        self.local_id.set(id).is_ok()
    }

    pub fn negotiator(&self) -> &N {
        &self.negotiator
    }

    /// Returns the reference to the stream of side channels: created locally by the initiator
    /// or received from the remote initiator by the answerer.
    pub fn side_channels(&self) -> &SideChannels<N::Channel> {
        &self.side_channels
    }

    /// Remote media received so far, if any.
    pub async fn inbound(&self) -> Option<InboundStream<N::Track>> {
        self.inbound.lock().await.clone()
    }

    /// Number of remote candidates waiting for the remote description.
    pub async fn pending_candidates(&self) -> usize {
        self.negotiation.lock().await.candidates.len()
    }

    /// Acquire local media and declare readiness to the hub.
    pub async fn start(&self) -> Result<Applied, Error> {
        let _negotiation = self.negotiation.lock().await;
        let state = self.state();
        if state != ConnectionState::Idle {
            return Ok(self.discard("start", GuardViolation::AlreadyStarted(state)));
        }
        self.negotiator
            .acquire_local_media()
            .await
            .map_err(|e| self.fail(e))?;
        if self
            .status
            .transition(|s| matches!(s, InnerState::Idle).then_some(InnerState::AwaitingPeer))
        {
            debug!("awaiting peer");
            let _ = self.signal_sender.send(ClientEvent::Ready);
            Ok(Applied::Applied)
        } else {
            Ok(self.discard("start", GuardViolation::AlreadyStarted(self.state())))
        }
    }

    /// React to the hub pairing two participants. If local id matches the `initiator`, the side
    /// channel is opened and an offer is sent out. Sessions this participant is not a member of
    /// are discarded and leave it waiting for its own pairing.
    pub async fn begin_session(
        &self,
        initiator: ParticipantId,
        answerer: ParticipantId,
    ) -> Result<Applied, Error> {
        let local_id = match self.local_id() {
            Some(id) => id,
            None => return Ok(self.discard("start-session", GuardViolation::UnknownLocalId)),
        };
        let role = if local_id == initiator {
            Role::Initiator
        } else if local_id == answerer {
            Role::Answerer
        } else {
            let violation = GuardViolation::NotMember {
                initiator,
                answerer,
            };
            return Ok(self.discard("start-session", violation));
        };
        let _negotiation = self.negotiation.lock().await;
        let entered = self.status.transition(|s| match s {
            InnerState::AwaitingPeer => Some(match role {
                Role::Initiator => InnerState::Initiating,
                Role::Answerer => InnerState::Answering,
            }),
            _ => None,
        });
        if !entered {
            let violation = match self.state() {
                ConnectionState::Idle => GuardViolation::NotStarted,
                other => GuardViolation::AlreadyStarted(other),
            };
            return Ok(self.discard("start-session", violation));
        }
        let _ = self.role.set(role);
        info!("session started, local role: {role:?}");
        self.arm_deadline();

        if role == Role::Initiator {
            self.initiate().await.map_err(|e| self.fail(e))?;
        }
        Ok(Applied::Applied)
    }

    async fn initiate(&self) -> Result<(), Error> {
        let label = &self.options.side_channel_label;
        let channel = self.negotiator.open_side_channel(label).await?;
        self.side_channels.push(channel);
        let offer = self.negotiator.create_offer().await?;
        self.emit(NegotiationMessage::Offer(serde_json::to_value(&offer)?));
        Ok(())
    }

    /// Apply negotiation message relayed from the remote peer.
    pub async fn apply_signal(&self, message: NegotiationMessage) -> Result<Applied, Error> {
        let mut negotiation = self.negotiation.lock().await;
        let kind = message.kind();
        match self.state() {
            ConnectionState::Idle => return Ok(self.discard(kind, GuardViolation::NotStarted)),
            s @ (ConnectionState::Failed | ConnectionState::Closed) => {
                return Ok(self.discard(kind, GuardViolation::Terminated(s)))
            }
            _ => {}
        }
        match message {
            NegotiationMessage::Offer(payload) => self.on_offer(&mut negotiation, payload).await,
            NegotiationMessage::Answer(payload) => self.on_answer(&mut negotiation, payload).await,
            NegotiationMessage::Candidate(payload) => {
                self.on_candidate(&mut negotiation, payload).await
            }
        }
    }

    async fn on_offer(
        &self,
        negotiation: &mut Negotiation<N::Candidate>,
        payload: Payload,
    ) -> Result<Applied, Error> {
        let state = self.state();
        let role = self.role();
        if state != ConnectionState::Answering
            || role != Some(Role::Answerer)
            || negotiation.remote_applied
        {
            return Ok(self.discard("offer", GuardViolation::UnexpectedOffer { state, role }));
        }
        let offer: N::Description = serde_json::from_value(payload)?;
        self.negotiator
            .set_remote_description(offer)
            .await
            .map_err(|e| self.fail(e))?;
        negotiation.remote_applied = true;
        self.drain_candidates(negotiation).await;

        let answer = self
            .negotiator
            .create_answer()
            .await
            .map_err(|e| self.fail(e))?;
        self.emit(NegotiationMessage::Answer(serde_json::to_value(&answer)?));
        Ok(Applied::Applied)
    }

    async fn on_answer(
        &self,
        negotiation: &mut Negotiation<N::Candidate>,
        payload: Payload,
    ) -> Result<Applied, Error> {
        let state = self.state();
        let role = self.role();
        let signaling = self.negotiator.negotiation_state();
        if role != Some(Role::Initiator)
            || signaling != NegotiationState::HaveLocalOffer
            || negotiation.remote_applied
        {
            let violation = GuardViolation::UnexpectedAnswer {
                state,
                role,
                signaling,
            };
            return Ok(self.discard("answer", violation));
        }
        let answer: N::Description = serde_json::from_value(payload)?;
        self.negotiator
            .set_remote_description(answer)
            .await
            .map_err(|e| self.fail(e))?;
        negotiation.remote_applied = true;
        self.drain_candidates(negotiation).await;
        Ok(Applied::Applied)
    }

    async fn on_candidate(
        &self,
        negotiation: &mut Negotiation<N::Candidate>,
        payload: Payload,
    ) -> Result<Applied, Error> {
        let candidate: N::Candidate = serde_json::from_value(payload)?;
        if negotiation.remote_applied {
            self.negotiator.add_candidate(candidate).await?;
            Ok(Applied::Applied)
        } else {
            negotiation.candidates.push(candidate);
            debug!(
                "remote description not set yet, buffered candidate ({} pending)",
                negotiation.candidates.len()
            );
            Ok(Applied::Buffered)
        }
    }

    async fn drain_candidates(&self, negotiation: &mut Negotiation<N::Candidate>) {
        let count = negotiation.candidates.len();
        for candidate in negotiation.candidates.drain() {
            if let Err(e) = self.negotiator.add_candidate(candidate).await {
                warn!("failed to apply buffered candidate: {e}");
            }
        }
        if count > 0 {
            debug!("applied {count} buffered candidates");
        }
    }

    /// Process an event reported by the underlying [Negotiator].
    pub async fn handle_transport_event(&self, event: TransportEvent<N>) {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                if self.status.get().is_terminal() {
                    return;
                }
                match serde_json::to_value(&candidate) {
                    Ok(payload) => self.emit(NegotiationMessage::Candidate(payload)),
                    Err(e) => error!("failed to serialize local candidate: {e}"),
                }
            }
            TransportEvent::Track(track) => {
                let mut inbound = self.inbound.lock().await;
                inbound.get_or_insert_with(InboundStream::default).attach(track);
            }
            TransportEvent::SideChannel(channel) => self.side_channels.push(channel),
            TransportEvent::Connectivity(Connectivity::Connected) => self.on_connected().await,
            TransportEvent::Connectivity(Connectivity::Failed) => {
                self.fail(Error::NoViablePath);
            }
            TransportEvent::Connectivity(Connectivity::Closed) => {
                if self.status.set_closed() {
                    debug!("underlying connection closed");
                }
            }
            TransportEvent::Connectivity(other) => debug!("connectivity: {other:?}"),
        }
    }

    async fn on_connected(&self) {
        if !self.status.get().is_negotiating() {
            debug!("ignoring connectivity report in state {:?}", self.state());
            return;
        }
        {
            // track events may race with the connected transition: when none made it so far,
            // collect tracks straight from the receivers
            let mut inbound = self.inbound.lock().await;
            if inbound.is_none() {
                let tracks = self.negotiator.inbound_tracks().await;
                if !tracks.is_empty() {
                    debug!("attached {} inbound tracks from active receivers", tracks.len());
                    *inbound = Some(InboundStream { tracks });
                }
            }
        }
        if self
            .status
            .transition(|s| s.is_negotiating().then_some(InnerState::Connected))
        {
            info!("peer connection established");
        }
    }

    /// This method allows to await until the connection with the remote peer is established.
    /// Fails if the connection has failed or was closed before that happened.
    pub async fn connected(&self) -> Result<(), Error> {
        loop {
            let changed = self.status.0.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();
            match &**self.status.get() {
                InnerState::Connected => return Ok(()),
                InnerState::Failed(e) => return Err(e.clone()),
                InnerState::Closed => return Err(Error::Closed),
                _ => {}
            }
            changed.await;
        }
    }

    /// Listen to the next [ClientEvent] produced by this connection. It should be passed over to
    /// the signaling hub.
    ///
    /// Returns `None` once the connection is closed.
    pub async fn listen(&self) -> Option<ClientEvent> {
        let mut signals = self.signal_receiver.lock().await;
        loop {
            let changed = self.status.0.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();
            if self.status.get().is_closed() {
                return None;
            }
            tokio::select! {
                signal = signals.recv() => return signal,
                _ = changed => {}
            }
        }
    }

    /// Remote peer left the session.
    pub async fn remote_closed(&self, peer: ParticipantId) -> Result<(), Error> {
        info!("remote peer {peer} left the session");
        self.close().await
    }

    /// Gracefully close current [PeerConnection]. Closing it more than once has no effect.
    pub async fn close(&self) -> Result<(), Error> {
        if self.status.set_closed() {
            self.negotiator.close().await?;
        }
        Ok(())
    }

    fn emit(&self, message: NegotiationMessage) {
        let _ = self.signal_sender.send(message.into());
    }

    fn discard(&self, event: &str, violation: GuardViolation) -> Applied {
        warn!("discarding {event}: {violation}");
        Applied::Discarded(violation)
    }

    fn fail(&self, cause: Error) -> Error {
        if self
            .status
            .transition(|s| (!s.is_terminal()).then(|| InnerState::Failed(cause.clone())))
        {
            error!("peer connection failed: {cause}");
        }
        cause
    }

    fn arm_deadline(&self) {
        if let Some(timeout) = self.options.negotiation_timeout {
            tokio::spawn(negotiation_deadline(self.status.weak_ref(), timeout));
        }
    }
}

impl<N: Negotiator> std::fmt::Debug for PeerConnection<N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.local_id.get())
            .field("role", &self.role.get())
            .field("status", &**self.status.get())
            .finish()
    }
}

async fn pump_transport_events<N: Negotiator>(
    pc: Weak<PeerConnection<N>>,
    mut events: UnboundedReceiver<TransportEvent<N>>,
) {
    while let Some(event) = events.recv().await {
        match pc.upgrade() {
            Some(pc) => pc.handle_transport_event(event).await,
            None => break,
        }
    }
}

async fn negotiation_deadline(status: Weak<StatusCell>, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    if let Some(status) = ConnectionStatus::upgrade(&status) {
        if status.transition(|s| {
            s.is_negotiating()
                .then(|| InnerState::Failed(Error::Timeout(timeout)))
        }) {
            warn!("negotiation did not complete within {timeout:?}");
        }
    }
}

#[derive(Debug)]
struct Negotiation<C> {
    remote_applied: bool,
    candidates: CandidateBuffer<C>,
}

impl<C> Default for Negotiation<C> {
    fn default() -> Self {
        Negotiation {
            remote_applied: false,
            candidates: CandidateBuffer::new(),
        }
    }
}

/// Remote tracks received over the connection.
#[derive(Debug, Clone)]
pub struct InboundStream<T> {
    tracks: Vec<T>,
}

impl<T: PartialEq> InboundStream<T> {
    fn attach(&mut self, track: T) -> bool {
        if self.tracks.contains(&track) {
            false
        } else {
            self.tracks.push(track);
            true
        }
    }

    pub fn tracks(&self) -> &[T] {
        &self.tracks
    }
}

impl<T> Default for InboundStream<T> {
    fn default() -> Self {
        InboundStream { tracks: Vec::new() }
    }
}

#[derive(Debug)]
pub struct SideChannels<C> {
    sender: UnboundedSender<C>,
    receiver: Mutex<UnboundedReceiver<C>>,
}

impl<C> SideChannels<C> {
    fn new() -> Self {
        let (sender, receiver) = unbounded_channel();
        SideChannels {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    fn push(&self, channel: C) {
        let _ = self.sender.send(channel);
    }

    pub async fn next(&self) -> Option<C> {
        let mut guard = self.receiver.lock().await;
        guard.recv().await
    }
}

#[derive(Debug)]
struct StatusCell {
    state: ArcSwap<InnerState>,
    changed: Notify,
}

#[repr(transparent)]
#[derive(Debug, Clone)]
struct ConnectionStatus(Arc<StatusCell>);

impl ConnectionStatus {
    fn get(&self) -> Guard<Arc<InnerState>> {
        self.0.state.load()
    }

    fn weak_ref(&self) -> Weak<StatusCell> {
        Arc::downgrade(&self.0)
    }

    fn upgrade(w: &Weak<StatusCell>) -> Option<Self> {
        let arc = w.upgrade()?;
        Some(ConnectionStatus(arc))
    }

    fn set_closed(&self) -> bool {
        self.transition(|s| (!s.is_closed()).then_some(InnerState::Closed))
    }

    /// Atomically replace current state with the one returned by `f`. Returns `false` without
    /// changing anything if `f` returns `None`.
    fn transition<F>(&self, f: F) -> bool
    where
        F: Fn(&InnerState) -> Option<InnerState>,
    {
        loop {
            let current = self.0.state.load_full();
            let next = match f(&current) {
                Some(next) => Arc::new(next),
                None => return false,
            };
            let prev = self.0.state.compare_and_swap(&current, next);
            if Arc::ptr_eq(&*prev, &current) {
                self.0.changed.notify_waiters();
                return true;
            }
        }
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        ConnectionStatus(Arc::new(StatusCell {
            state: ArcSwap::from_pointee(InnerState::Idle),
            changed: Notify::new(),
        }))
    }
}

#[derive(Debug)]
enum InnerState {
    Idle,
    AwaitingPeer,
    Initiating,
    Answering,
    Connected,
    Failed(Error),
    Closed,
}

impl InnerState {
    fn state(&self) -> ConnectionState {
        match self {
            InnerState::Idle => ConnectionState::Idle,
            InnerState::AwaitingPeer => ConnectionState::AwaitingPeer,
            InnerState::Initiating => ConnectionState::Initiating,
            InnerState::Answering => ConnectionState::Answering,
            InnerState::Connected => ConnectionState::Connected,
            InnerState::Failed(_) => ConnectionState::Failed,
            InnerState::Closed => ConnectionState::Closed,
        }
    }

    fn is_negotiating(&self) -> bool {
        matches!(self, InnerState::Initiating | InnerState::Answering)
    }

    fn is_closed(&self) -> bool {
        matches!(self, InnerState::Closed)
    }

    fn is_terminal(&self) -> bool {
        matches!(self, InnerState::Failed(_) | InnerState::Closed)
    }
}
