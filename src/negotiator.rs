use crate::error::Error;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Signaling state of the underlying connection, as defined by the JSEP offer/answer model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

/// Connectivity progress reported by the underlying connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Checking,
    /// A stable path to the remote peer has been found.
    Connected,
    Disconnected,
    /// No viable path to the remote peer exists.
    Failed,
    Closed,
}

/// Events emitted asynchronously by a [Negotiator] implementation.
pub enum TransportEvent<N: Negotiator> {
    /// Local candidate discovered, it must be sent to the remote peer.
    LocalCandidate(N::Candidate),
    Connectivity(Connectivity),
    /// Remote track became available.
    Track(N::Track),
    /// Remote peer opened a side channel.
    SideChannel(N::Channel),
}

impl<N: Negotiator> std::fmt::Debug for TransportEvent<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportEvent::LocalCandidate(_) => f.write_str("LocalCandidate"),
            TransportEvent::Connectivity(c) => write!(f, "Connectivity({c:?})"),
            TransportEvent::Track(_) => f.write_str("Track"),
            TransportEvent::SideChannel(_) => f.write_str("SideChannel"),
        }
    }
}

/// Connectivity capability driven by [crate::PeerConnection]: it gathers candidates, produces
/// and consumes session descriptions and carries the media. The state machine never inspects
/// descriptions or candidates, it only moves them between the capability and the signaling hub.
#[async_trait]
pub trait Negotiator: Send + Sync + 'static {
    type Description: Serialize + DeserializeOwned + Send + Sync + 'static;
    type Candidate: Serialize + DeserializeOwned + Send + Sync + 'static;
    type Track: Clone + PartialEq + Send + Sync + 'static;
    type Channel: Send + Sync + 'static;

    /// Acquire local media resources to be offered to the remote peer.
    async fn acquire_local_media(&self) -> Result<(), Error>;

    /// Create an offer and set it as the local description.
    async fn create_offer(&self) -> Result<Self::Description, Error>;

    /// Create an answer and set it as the local description.
    async fn create_answer(&self) -> Result<Self::Description, Error>;

    async fn set_remote_description(&self, description: Self::Description) -> Result<(), Error>;

    async fn add_candidate(&self, candidate: Self::Candidate) -> Result<(), Error>;

    fn negotiation_state(&self) -> NegotiationState;

    /// Enumerate remote tracks of currently active receivers.
    async fn inbound_tracks(&self) -> Vec<Self::Track>;

    async fn open_side_channel(&self, label: &str) -> Result<Self::Channel, Error>;

    async fn close(&self) -> Result<(), Error>;
}

#[cfg(test)]
pub(crate) mod mock {
    use crate::error::Error;
    use crate::negotiator::{NegotiationState, Negotiator, TransportEvent};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
    use tokio::sync::Notify;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Sdp {
        #[serde(rename = "type")]
        pub kind: String,
        pub sdp: String,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        AcquireMedia,
        CreateOffer,
        CreateAnswer,
        SetRemote(Sdp),
        AddCandidate(String),
        OpenSideChannel(String),
        InboundTracks,
        Close,
    }

    /// In-memory negotiator which records every call made by the state machine.
    #[derive(Debug)]
    pub struct MockNegotiator {
        name: String,
        calls: Mutex<Vec<Call>>,
        state: Mutex<NegotiationState>,
        remote_set: Mutex<bool>,
        remote_gate: Mutex<Option<Arc<Notify>>>,
        receivers: Mutex<Vec<String>>,
    }

    impl MockNegotiator {
        pub fn new(
            name: &str,
        ) -> (
            Self,
            UnboundedSender<TransportEvent<MockNegotiator>>,
            UnboundedReceiver<TransportEvent<MockNegotiator>>,
        ) {
            let (tx, rx) = unbounded_channel();
            let negotiator = MockNegotiator {
                name: name.to_string(),
                calls: Mutex::new(Vec::new()),
                state: Mutex::new(NegotiationState::Stable),
                remote_set: Mutex::new(false),
                remote_gate: Mutex::new(None),
                receivers: Mutex::new(Vec::new()),
            };
            (negotiator, tx, rx)
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn applied_candidates(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::AddCandidate(c) => Some(c),
                    _ => None,
                })
                .collect()
        }

        /// Make a remote track visible through receivers without firing a track event.
        pub fn add_receiver_track(&self, track: &str) {
            self.receivers.lock().unwrap().push(track.to_string());
        }

        /// Suspend the next remote description until the returned gate is notified. The call is
        /// recorded before it blocks.
        pub fn hold_remote_description(&self) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            *self.remote_gate.lock().unwrap() = Some(gate.clone());
            gate
        }

        pub fn set_state(&self, state: NegotiationState) {
            *self.state.lock().unwrap() = state;
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl Negotiator for MockNegotiator {
        type Description = Sdp;
        type Candidate = String;
        type Track = String;
        type Channel = String;

        async fn acquire_local_media(&self) -> Result<(), Error> {
            self.record(Call::AcquireMedia);
            Ok(())
        }

        async fn create_offer(&self) -> Result<Sdp, Error> {
            self.record(Call::CreateOffer);
            self.set_state(NegotiationState::HaveLocalOffer);
            Ok(Sdp {
                kind: "offer".into(),
                sdp: format!("offer-from-{}", self.name),
            })
        }

        async fn create_answer(&self) -> Result<Sdp, Error> {
            self.record(Call::CreateAnswer);
            self.set_state(NegotiationState::Stable);
            Ok(Sdp {
                kind: "answer".into(),
                sdp: format!("answer-from-{}", self.name),
            })
        }

        async fn set_remote_description(&self, description: Sdp) -> Result<(), Error> {
            let next = if description.kind == "offer" {
                NegotiationState::HaveRemoteOffer
            } else {
                NegotiationState::Stable
            };
            self.record(Call::SetRemote(description));
            let gate = self.remote_gate.lock().unwrap().take();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            self.set_state(next);
            *self.remote_set.lock().unwrap() = true;
            Ok(())
        }

        async fn add_candidate(&self, candidate: String) -> Result<(), Error> {
            assert!(
                *self.remote_set.lock().unwrap(),
                "candidate {candidate} applied before remote description"
            );
            self.record(Call::AddCandidate(candidate));
            Ok(())
        }

        fn negotiation_state(&self) -> NegotiationState {
            *self.state.lock().unwrap()
        }

        async fn inbound_tracks(&self) -> Vec<String> {
            self.record(Call::InboundTracks);
            self.receivers.lock().unwrap().clone()
        }

        async fn open_side_channel(&self, label: &str) -> Result<String, Error> {
            self.record(Call::OpenSideChannel(label.to_string()));
            Ok(label.to_string())
        }

        async fn close(&self) -> Result<(), Error> {
            self.record(Call::Close);
            self.set_state(NegotiationState::Closed);
            Ok(())
        }
    }
}
