use crate::registry::{Election, Registry};
use crate::session::Sessions;
use crate::signal::{ClientEvent, NegotiationMessage, ParticipantId, ServerEvent, SignalingLink};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;

/// Server side of the signaling protocol: participant registry, initiator election and
/// negotiation relay.
///
/// All state sits behind a single lock, so concurrent readiness signals can never both miss the
/// transition of the ready set into a pair. Outgoing events are pushed into unbounded
/// per-participant outboxes: delivery never blocks the hub.
#[derive(Debug, Clone, Default)]
pub struct SignalingHub(Arc<Mutex<HubState>>);

#[derive(Debug, Default)]
struct HubState {
    registry: Registry,
    sessions: Sessions,
    outboxes: HashMap<ParticipantId, UnboundedSender<ServerEvent>>,
}

/// Handle returned to a freshly connected participant.
#[derive(Debug)]
pub struct Membership {
    pub id: ParticipantId,
    /// Events addressed to this participant. The first one is always [ServerEvent::Welcome].
    pub events: UnboundedReceiver<ServerEvent>,
}

/// Outcome of relaying a negotiation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered(ParticipantId),
    /// Sender is not a member of any active session.
    NoSession,
    /// Session peer is known but its outbox has already been dropped.
    PeerGone(ParticipantId),
}

impl SignalingHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connect(&self) -> Membership {
        let mut state = self.0.lock().await;
        let id = state.registry.connect();
        let (tx, events) = unbounded_channel();
        let _ = tx.send(ServerEvent::Welcome { id });
        state.outboxes.insert(id, tx);
        debug!("participant {id} connected");
        state.broadcast_counts();
        Membership { id, events }
    }

    /// Remove participant from the hub. If it was a member of a session, that session is closed
    /// and its peer is notified and released from the ready set. Calling this for an unknown or
    /// already disconnected participant has no effect.
    pub async fn disconnect(&self, id: ParticipantId) {
        let mut state = self.0.lock().await;
        if !state.registry.disconnect(&id) {
            return;
        }
        state.outboxes.remove(&id);
        debug!("participant {id} disconnected");
        if let Some(session) = state.sessions.close(&id) {
            if let Some(peer) = session.peer_of(&id) {
                info!("{} closed: participant {id} left", session.id);
                state.registry.unready(&peer);
                state.send(&peer, ServerEvent::SessionClosed { peer: id });
            }
        }
        state.broadcast_counts();
    }

    /// Mark participant as ready. When this makes the ready set a pair, a session is opened and
    /// every connected participant is told who the initiator and the answerer are.
    pub async fn set_ready(&self, id: ParticipantId) -> Option<Election> {
        let mut state = self.0.lock().await;
        if !state.registry.set_ready(id) {
            debug!("ignoring readiness of participant {id}: unknown or already ready");
            return None;
        }
        state.broadcast_counts();
        match state.registry.elect() {
            Some(election) => {
                let session = state.sessions.open(election);
                info!(
                    "{} opened: initiator {}, answerer {}",
                    session.id, election.initiator, election.answerer
                );
                debug!("{} active sessions", state.sessions.len());
                state.broadcast(ServerEvent::StartSession {
                    initiator: election.initiator,
                    answerer: election.answerer,
                });
                Some(election)
            }
            None => {
                if state.registry.ready_count() > 2 {
                    warn!("participant {id} is ready while a session is in progress, it won't be paired");
                }
                None
            }
        }
    }

    /// Forward a negotiation message to the session peer of its sender.
    pub async fn relay(&self, from: ParticipantId, message: NegotiationMessage) -> Delivery {
        let state = self.0.lock().await;
        let peer = match state
            .sessions
            .of(&from)
            .filter(|s| s.is_active())
            .and_then(|s| s.peer_of(&from))
        {
            Some(peer) => peer,
            None => {
                warn!(
                    "dropping {} from participant {from}: not a member of any session",
                    message.kind()
                );
                return Delivery::NoSession;
            }
        };
        debug!("relaying {} from {from} to {peer}", message.kind());
        if state.send(&peer, message.sent_by(from)) {
            Delivery::Delivered(peer)
        } else {
            Delivery::PeerGone(peer)
        }
    }

    /// Dispatch an event received from a participant.
    pub async fn handle(&self, from: ParticipantId, event: ClientEvent) {
        match event.into_negotiation() {
            None => {
                self.set_ready(from).await;
            }
            Some(message) => {
                self.relay(from, message).await;
            }
        }
    }

    /// Connect an in-process participant. Events sent through the returned link are handled by
    /// the hub until its outbound sender is dropped, which disconnects the participant.
    pub async fn link(&self) -> SignalingLink {
        let Membership { id, events } = self.connect().await;
        let (outbound, mut received) = unbounded_channel();
        let hub = self.clone();
        tokio::spawn(async move {
            while let Some(event) = received.recv().await {
                hub.handle(id, event).await;
            }
            hub.disconnect(id).await;
        });
        SignalingLink {
            outbound,
            inbound: events,
        }
    }

    pub async fn connected_count(&self) -> usize {
        self.0.lock().await.registry.connected_count()
    }

    pub async fn ready_count(&self) -> usize {
        self.0.lock().await.registry.ready_count()
    }
}

impl HubState {
    fn send(&self, to: &ParticipantId, event: ServerEvent) -> bool {
        match self.outboxes.get(to) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    fn broadcast(&self, event: ServerEvent) {
        for tx in self.outboxes.values() {
            let _ = tx.send(event.clone());
        }
    }

    fn broadcast_counts(&self) {
        self.broadcast(ServerEvent::ConnectedCount {
            count: self.registry.connected_count(),
        });
        self.broadcast(ServerEvent::ReadyCount {
            count: self.registry.ready_count(),
        });
    }
}
