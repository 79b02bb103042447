//! `duet` pairs two participants and negotiates a direct [webrtc](https://webrtc.rs) connection
//! between them:
//! - [SignalingHub] is the server side. It tracks connected participants, elects the initiator
//!   once exactly two of them declare readiness and relays negotiation messages between the pair.
//! - [PeerConnection] is the client side state machine. It drives the offer/answer handshake
//!   for the role assigned by the hub and buffers connectivity candidates that arrive before the
//!   remote description has been applied.
//!
//! Negotiation steps are executed by a [Negotiator]. [RtcNegotiator] implements it on top of the
//! webrtc crate. The hub can be served over WebSockets (see [ws]) or linked in-process.
//!
//! # Examples
//!
//! ```rust,no_run
//! use duet::{Error, Options, Participant, PeerConnection, SignalingHub};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let hub = SignalingHub::new();
//!
//!     let mut tasks = Vec::new();
//!     for _ in 0..2 {
//!         let connection = PeerConnection::open(Options::default(), vec![]).await?;
//!         let participant = Participant::new(connection.clone());
//!         let link = hub.link().await;
//!         tasks.push(tokio::spawn(async move { participant.run(link).await }));
//!
//!         // declare readiness, the first participant to do so becomes the initiator
//!         connection.start().await?;
//!         tasks.push(tokio::spawn(async move {
//!             connection.connected().await?;
//!             let channel = connection.side_channels().next().await;
//!             println!("connected, side channel: {channel:?}");
//!             connection.close().await
//!         }));
//!     }
//!
//!     for task in tasks {
//!         let _ = task.await;
//!     }
//!     Ok(())
//! }
//! ```

pub mod candidate_buffer;
pub mod error;
pub mod hub;
pub mod negotiator;
pub mod options;
pub mod participant;
pub mod peer_connection;
pub mod registry;
pub mod rtc;
pub mod session;
pub mod side_channel;
pub mod signal;
pub mod ws;

pub use error::Error;
pub use hub::{Delivery, SignalingHub};
pub use negotiator::{Negotiator, TransportEvent};
pub use options::{CredentialSource, IceServer, Options};
pub use participant::{Participant, PeerCounts};
pub use peer_connection::{Applied, ConnectionState, GuardViolation, PeerConnection, Role};
pub use rtc::RtcNegotiator;
pub use side_channel::SideChannel;
pub use signal::{ClientEvent, NegotiationMessage, ParticipantId, ServerEvent, SignalingLink};
