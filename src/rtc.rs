//! [Negotiator] backed by [webrtc](https://webrtc.rs).

use crate::error::Error;
use crate::negotiator::{Connectivity, NegotiationState, Negotiator, TransportEvent};
use crate::options::Options;
use crate::peer_connection::PeerConnection;
use crate::side_channel::SideChannel;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Remote media track. Two handles are equal when they point to the same track.
#[derive(Clone)]
pub struct RemoteTrack(Arc<TrackRemote>);

impl RemoteTrack {
    pub fn track(&self) -> &Arc<TrackRemote> {
        &self.0
    }
}

impl PartialEq for RemoteTrack {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RemoteTrack").field(&self.0.kind()).finish()
    }
}

pub type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

/// WebRTC peer connection exposed as a [Negotiator].
pub struct RtcNegotiator {
    pc: Arc<RTCPeerConnection>,
    local_tracks: Vec<LocalTrack>,
}

impl RtcNegotiator {
    /// Creates a new WebRTC peer connection configured with `options` ICE servers. Events it
    /// reports are delivered through the returned receiver.
    pub async fn new(
        options: &Options,
        local_tracks: Vec<LocalTrack>,
    ) -> Result<(Self, UnboundedReceiver<TransportEvent<Self>>), Error> {
        // Create a MediaEngine object to configure the supported codec
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        // Create a InterceptorRegistry. This is the user configurable RTP/RTCP Pipeline.
        // This provides NACKs, RTCP Reports and other features.
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: options
                .ice_servers
                .iter()
                .cloned()
                .map(Into::into)
                .collect(),
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(rtc_config).await?);
        let (events, receiver) = unbounded_channel();
        Self::register_handlers(&pc, events);

        Ok((RtcNegotiator { pc, local_tracks }, receiver))
    }

    fn register_handlers(pc: &RTCPeerConnection, events: UnboundedSender<TransportEvent<Self>>) {
        {
            let events = events.clone();
            pc.on_peer_connection_state_change(Box::new(move |s| {
                let connectivity = match s {
                    RTCPeerConnectionState::Connecting => Some(Connectivity::Checking),
                    RTCPeerConnectionState::Connected => Some(Connectivity::Connected),
                    RTCPeerConnectionState::Disconnected => Some(Connectivity::Disconnected),
                    RTCPeerConnectionState::Failed => Some(Connectivity::Failed),
                    RTCPeerConnectionState::Closed => Some(Connectivity::Closed),
                    RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => None,
                };
                if let Some(c) = connectivity {
                    let _ = events.send(TransportEvent::Connectivity(c));
                }
                Box::pin(async move {})
            }));
        }
        {
            let events = events.clone();
            pc.on_ice_connection_state_change(Box::new(move |s| {
                // peer connection state is authoritative, ICE only reports terminal failure early
                if s == RTCIceConnectionState::Failed {
                    let _ = events.send(TransportEvent::Connectivity(Connectivity::Failed));
                }
                Box::pin(async move {})
            }));
        }
        {
            let events = events.clone();
            pc.on_ice_candidate(Box::new(move |candidate| {
                if let Some(candidate) = candidate {
                    match candidate.to_json() {
                        Ok(init) => {
                            let _ = events.send(TransportEvent::LocalCandidate(init));
                        }
                        Err(e) => log::warn!("failed to serialize local ICE candidate: {e}"),
                    }
                } else {
                    log::debug!("ICE gathering complete");
                }
                Box::pin(async move {})
            }));
        }
        {
            let events = events.clone();
            pc.on_track(Box::new(move |track, _receiver, _transceiver| {
                let _ = events.send(TransportEvent::Track(RemoteTrack(track)));
                Box::pin(async move {})
            }));
        }
        pc.on_data_channel(Box::new(move |dc| {
            let _ = events.send(TransportEvent::SideChannel(SideChannel::new(dc)));
            Box::pin(async move {})
        }));
    }
}

impl AsRef<RTCPeerConnection> for RtcNegotiator {
    fn as_ref(&self) -> &RTCPeerConnection {
        &self.pc
    }
}

#[async_trait]
impl Negotiator for RtcNegotiator {
    type Description = RTCSessionDescription;
    type Candidate = RTCIceCandidateInit;
    type Track = RemoteTrack;
    type Channel = SideChannel;

    async fn acquire_local_media(&self) -> Result<(), Error> {
        for track in self.local_tracks.iter() {
            self.pc.add_track(track.clone()).await?;
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<RTCSessionDescription, Error> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer.clone()).await?;
        Ok(offer)
    }

    async fn create_answer(&self) -> Result<RTCSessionDescription, Error> {
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;
        Ok(answer)
    }

    async fn set_remote_description(
        &self,
        description: RTCSessionDescription,
    ) -> Result<(), Error> {
        self.pc.set_remote_description(description).await?;
        Ok(())
    }

    async fn add_candidate(&self, candidate: RTCIceCandidateInit) -> Result<(), Error> {
        self.pc.add_ice_candidate(candidate).await?;
        Ok(())
    }

    fn negotiation_state(&self) -> NegotiationState {
        match self.pc.signaling_state() {
            RTCSignalingState::HaveLocalOffer => NegotiationState::HaveLocalOffer,
            RTCSignalingState::HaveRemoteOffer => NegotiationState::HaveRemoteOffer,
            RTCSignalingState::HaveLocalPranswer => NegotiationState::HaveLocalPranswer,
            RTCSignalingState::HaveRemotePranswer => NegotiationState::HaveRemotePranswer,
            RTCSignalingState::Closed => NegotiationState::Closed,
            RTCSignalingState::Stable | RTCSignalingState::Unspecified => NegotiationState::Stable,
        }
    }

    async fn inbound_tracks(&self) -> Vec<RemoteTrack> {
        let mut tracks = Vec::new();
        for receiver in self.pc.get_receivers().await {
            for track in receiver.tracks().await {
                tracks.push(RemoteTrack(track));
            }
        }
        tracks
    }

    async fn open_side_channel(&self, label: &str) -> Result<SideChannel, Error> {
        let dc = self.pc.create_data_channel(label, None).await?;
        Ok(SideChannel::new(dc))
    }

    async fn close(&self) -> Result<(), Error> {
        self.pc.close().await?;
        Ok(())
    }
}

impl PeerConnection<RtcNegotiator> {
    /// Starts a new WebRTC backed [PeerConnection] in idle state.
    ///
    /// Use [PeerConnection::start] to declare readiness, then exchange signals with the remote
    /// peer through the signaling hub, see [crate::Participant].
    pub async fn open(
        options: Options,
        local_tracks: Vec<LocalTrack>,
    ) -> Result<Arc<Self>, Error> {
        let (negotiator, events) = RtcNegotiator::new(&options, local_tracks).await?;
        Ok(PeerConnection::new(negotiator, events, options))
    }
}
