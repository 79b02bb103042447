use std::sync::Arc;
use std::time::Duration;

/// Errors produced by the signaling hub and the peer connection state machine.
///
/// Every variant is cheap to clone: a failed connection keeps its error in its terminal state
/// and hands a copy to everyone awaiting [crate::PeerConnection::connected].
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    WebRtc(Arc<webrtc::Error>),
    #[error("malformed negotiation payload: {0}")]
    Payload(Arc<serde_json::Error>),
    #[error("peer connection has been closed")]
    Closed,
    #[error("no viable connectivity path to the remote peer")]
    NoViablePath,
    #[error("negotiation did not complete within {0:?}")]
    Timeout(Duration),
    #[error("signaling channel closed")]
    SignalingClosed,
    #[error("failed to fetch relay credentials: {0}")]
    Credentials(String),
    #[error(transparent)]
    WebSocket(Arc<tokio_tungstenite::tungstenite::Error>),
    #[error(transparent)]
    Io(Arc<std::io::Error>),
}

impl From<webrtc::Error> for Error {
    fn from(value: webrtc::Error) -> Self {
        Error::WebRtc(Arc::new(value))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Payload(Arc::new(value))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(Arc::new(value))
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(Arc::new(value))
    }
}
