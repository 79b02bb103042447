//! Messages exchanged between participants and the signaling hub.
//!
//! Negotiation payloads (offers, answers, candidates) travel as opaque JSON values: the hub
//! forwards them without ever looking inside.

use serde::{Deserialize, Serialize};
use std::fmt::Formatter;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

/// Opaque negotiation payload owned by the connectivity layer.
pub type Payload = serde_json::Value;

/// Identity assigned to a participant by the hub at connect time.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(Uuid);

impl ParticipantId {
    pub fn generate() -> Self {
        ParticipantId(Uuid::new_v4())
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// One step of the offer/answer handshake or an asynchronously discovered candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationMessage {
    Offer(Payload),
    Answer(Payload),
    Candidate(Payload),
}

impl NegotiationMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            NegotiationMessage::Offer(_) => "offer",
            NegotiationMessage::Answer(_) => "answer",
            NegotiationMessage::Candidate(_) => "candidate",
        }
    }

    /// Wrap this message for delivery, tagging it with its sender.
    pub fn sent_by(self, from: ParticipantId) -> ServerEvent {
        match self {
            NegotiationMessage::Offer(payload) => ServerEvent::Offer { payload, from },
            NegotiationMessage::Answer(payload) => ServerEvent::Answer { payload, from },
            NegotiationMessage::Candidate(payload) => ServerEvent::Candidate { payload, from },
        }
    }
}

/// Events sent by the hub to a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Identity assigned to the receiving participant.
    Welcome { id: ParticipantId },
    ConnectedCount { count: usize },
    ReadyCount { count: usize },
    /// Two participants are paired: `initiator` must create the offer, `answerer` waits for it.
    /// Everyone else receiving this event is not a member of the session.
    StartSession {
        initiator: ParticipantId,
        answerer: ParticipantId,
    },
    Offer { payload: Payload, from: ParticipantId },
    Answer { payload: Payload, from: ParticipantId },
    Candidate { payload: Payload, from: ParticipantId },
    /// The session peer went away and the session is over.
    SessionClosed { peer: ParticipantId },
}

impl ServerEvent {
    /// Split a relayed negotiation event into its sender and message.
    pub fn into_negotiation(self) -> Result<(ParticipantId, NegotiationMessage), ServerEvent> {
        match self {
            ServerEvent::Offer { payload, from } => Ok((from, NegotiationMessage::Offer(payload))),
            ServerEvent::Answer { payload, from } => {
                Ok((from, NegotiationMessage::Answer(payload)))
            }
            ServerEvent::Candidate { payload, from } => {
                Ok((from, NegotiationMessage::Candidate(payload)))
            }
            other => Err(other),
        }
    }
}

/// Events sent by a participant to the hub. Disconnection is implicit (socket close).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    Ready,
    Offer { payload: Payload },
    Answer { payload: Payload },
    Candidate { payload: Payload },
}

impl From<NegotiationMessage> for ClientEvent {
    fn from(value: NegotiationMessage) -> Self {
        match value {
            NegotiationMessage::Offer(payload) => ClientEvent::Offer { payload },
            NegotiationMessage::Answer(payload) => ClientEvent::Answer { payload },
            NegotiationMessage::Candidate(payload) => ClientEvent::Candidate { payload },
        }
    }
}

impl ClientEvent {
    pub fn into_negotiation(self) -> Option<NegotiationMessage> {
        match self {
            ClientEvent::Ready => None,
            ClientEvent::Offer { payload } => Some(NegotiationMessage::Offer(payload)),
            ClientEvent::Answer { payload } => Some(NegotiationMessage::Answer(payload)),
            ClientEvent::Candidate { payload } => Some(NegotiationMessage::Candidate(payload)),
        }
    }
}

/// Participant's end of a connection to the signaling hub, independent of the transport
/// carrying it. Dropping `outbound` disconnects the participant.
#[derive(Debug)]
pub struct SignalingLink {
    pub outbound: UnboundedSender<ClientEvent>,
    pub inbound: UnboundedReceiver<ServerEvent>,
}
