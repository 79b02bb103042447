use crate::error::Error;
use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use webrtc::ice_transport::ice_server::RTCIceServer;

/// STUN servers used when relay credentials are unavailable.
pub const DEFAULT_STUN_URLS: &[&str] = &["stun:stun.l.google.com:19302"];

/// Connectivity-assist server descriptor (STUN or TURN).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: &str) -> Self {
        IceServer {
            urls: vec![url.to_owned()],
            username: None,
            credential: None,
        }
    }

    /// STUN-only server set, which does not depend on any short-lived credentials.
    pub fn fallback() -> Vec<IceServer> {
        DEFAULT_STUN_URLS.iter().map(|url| Self::stun(url)).collect()
    }
}

impl From<IceServer> for RTCIceServer {
    fn from(value: IceServer) -> Self {
        RTCIceServer {
            urls: value.urls,
            username: value.username.unwrap_or_default(),
            credential: value.credential.unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// Source of short-lived relay credentials, usually a third party TURN provider.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<IceServer>, Error>;
}

/// Fetch relay-assisted servers, degrading to [IceServer::fallback] when the fetch fails or
/// yields nothing. Never fails: negotiation must not be blocked by a credential provider.
pub async fn resolve_ice_servers<S>(source: &S) -> Vec<IceServer>
where
    S: CredentialSource + ?Sized,
{
    match source.fetch().await {
        Ok(servers) if !servers.is_empty() => servers,
        Ok(_) => {
            warn!("credential provider returned no servers, using STUN only");
            IceServer::fallback()
        }
        Err(e) => {
            warn!("{e}, continuing without relay servers");
            IceServer::fallback()
        }
    }
}

/// Configuration of a single [crate::PeerConnection].
#[derive(Debug, Clone)]
pub struct Options {
    /// Label of the side channel created by the initiator.
    pub side_channel_label: String,
    pub ice_servers: Vec<IceServer>,
    /// Deadline for reaching the connected state once negotiation begins. `None` waits forever.
    pub negotiation_timeout: Option<Duration>,
}

impl Options {
    pub fn with_ice_servers(ice_servers: Vec<IceServer>) -> Self {
        Options {
            ice_servers,
            ..Options::default()
        }
    }

    /// Build options with servers obtained from `source`, see [resolve_ice_servers].
    pub async fn from_credentials<S>(source: &S) -> Self
    where
        S: CredentialSource + ?Sized,
    {
        Self::with_ice_servers(resolve_ice_servers(source).await)
    }
}

impl Default for Options {
    fn default() -> Self {
        Options {
            side_channel_label: "chat".to_owned(),
            ice_servers: IceServer::fallback(),
            negotiation_timeout: Some(Duration::from_secs(30)),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::error::Error;
    use crate::options::{resolve_ice_servers, CredentialSource, IceServer, Options};
    use async_trait::async_trait;

    struct Failing;

    #[async_trait]
    impl CredentialSource for Failing {
        async fn fetch(&self) -> Result<Vec<IceServer>, Error> {
            Err(Error::Credentials("provider unreachable".into()))
        }
    }

    struct Turn;

    #[async_trait]
    impl CredentialSource for Turn {
        async fn fetch(&self) -> Result<Vec<IceServer>, Error> {
            Ok(vec![IceServer {
                urls: vec!["turn:relay.example.com:3478".into()],
                username: Some("user".into()),
                credential: Some("secret".into()),
            }])
        }
    }

    #[tokio::test]
    async fn credential_failure_degrades_to_stun() {
        let servers = resolve_ice_servers(&Failing).await;
        assert_eq!(servers, IceServer::fallback());
    }

    #[tokio::test]
    async fn fetched_servers_are_used() {
        let options = Options::from_credentials(&Turn).await;
        assert_eq!(options.ice_servers.len(), 1);
        assert_eq!(options.ice_servers[0].username.as_deref(), Some("user"));
    }

    #[test]
    fn ice_server_deserializes_without_credentials() {
        let server: IceServer =
            serde_json::from_str(r#"{"urls":["stun:stun.example.com:3478"]}"#).unwrap();
        assert_eq!(server, IceServer::stun("stun:stun.example.com:3478"));
    }
}
