//! WebSocket transport for the signaling protocol. Every text frame carries a single JSON encoded
//! [ServerEvent] or [ClientEvent].

use crate::error::Error;
use crate::hub::{Membership, SignalingHub};
use crate::signal::{ClientEvent, ServerEvent, SignalingLink};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::unbounded_channel;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, connect_async};

/// Accept WebSocket participants on `listener` and attach each of them to `hub`. Runs until
/// accepting a new TCP connection fails.
pub async fn serve(listener: TcpListener, hub: SignalingHub) -> Result<(), Error> {
    if let Ok(addr) = listener.local_addr() {
        info!("signaling hub listening on {addr}");
    }
    loop {
        let (stream, addr) = listener.accept().await?;
        let hub = hub.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_socket(stream, addr, hub).await {
                warn!("connection from {addr} failed: {e}");
            }
        });
    }
}

async fn handle_socket(stream: TcpStream, addr: SocketAddr, hub: SignalingHub) -> Result<(), Error> {
    let ws = accept_async(stream).await?;
    let (mut write, mut read) = ws.split();
    let Membership { id, mut events } = hub.connect().await;
    debug!("participant {id} connected from {addr}");

    let result = loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break Ok(()) };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => break Err(e.into()),
                };
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    break Err(e.into());
                }
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => hub.handle(id, event).await,
                    Err(e) => warn!("ignoring malformed message from participant {id}: {e}"),
                },
                Some(Ok(Message::Close(_))) | None => break Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(e.into()),
            }
        }
    };
    hub.disconnect(id).await;
    result
}

/// Connect to a signaling hub served at `url`. The participant stays connected until the
/// outbound sender of the returned link is dropped.
pub async fn connect(url: &str) -> Result<SignalingLink, Error> {
    let (ws, _) = connect_async(url).await?;
    let (mut write, mut read) = ws.split();
    let (outbound, mut to_send) = unbounded_channel::<ClientEvent>();
    let (received, inbound) = unbounded_channel::<ServerEvent>();

    tokio::spawn(async move {
        while let Some(event) = to_send.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("failed to encode {event:?}: {e}");
                    continue;
                }
            };
            if let Err(e) = write.send(Message::Text(text.into())).await {
                warn!("failed to send signaling message: {e}");
                return;
            }
        }
        let _ = write.close().await;
    });

    tokio::spawn(async move {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => {
                        if received.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("ignoring malformed message from hub: {e}"),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("signaling connection failed: {e}");
                    break;
                }
            }
        }
    });

    Ok(SignalingLink { outbound, inbound })
}
