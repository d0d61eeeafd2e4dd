//! Session configuration: signaling endpoint, TLS trust policy, and peer
//! connection settings.

use thiserror::Error;
use url::Url;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;

use crate::media::StreamConstraints;

/// Server-certificate validation policy for secure (`wss://`) endpoints.
///
/// There is no silent default: a secure endpoint with
/// [`TrustPolicy::Unspecified`] fails session setup before any socket is
/// opened. Plain `ws://` endpoints do not consult the policy.
#[derive(Debug, Clone, Default)]
pub enum TrustPolicy {
    #[default]
    Unspecified,
    /// Validate the server certificate against the platform root store.
    SystemRoots,
    /// Platform roots plus one pinned PEM-encoded CA certificate.
    PinnedRoot(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct SignalingConfig {
    pub endpoint: Url,
    pub trust: TrustPolicy,
}

/// Peer connection settings. Defaults follow the calling profile this client
/// targets: balanced bundling, all ICE transports, and no ICE servers until
/// the caller adds some.
#[derive(Debug, Clone)]
pub struct RtcSettings {
    pub ice_servers: Vec<RTCIceServer>,
    pub bundle_policy: RTCBundlePolicy,
    pub ice_transport_policy: RTCIceTransportPolicy,
}

impl Default for RtcSettings {
    fn default() -> Self {
        Self {
            ice_servers: Vec::new(),
            bundle_policy: RTCBundlePolicy::Balanced,
            ice_transport_policy: RTCIceTransportPolicy::All,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub signaling: SignalingConfig,
    pub rtc: RtcSettings,
    pub constraints: StreamConstraints,
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("signaling endpoint is required")]
    MissingEndpoint,
    #[error("invalid signaling endpoint {endpoint}: {detail}")]
    InvalidEndpoint { endpoint: String, detail: String },
    #[error("endpoint scheme {0:?} is not a websocket scheme")]
    UnsupportedScheme(String),
}

#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    endpoint: Option<String>,
    trust: TrustPolicy,
    ice_servers: Vec<RTCIceServer>,
    constraints: Option<StreamConstraints>,
}

impl SessionConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signaling coordinator endpoint, `ws://` or `wss://`.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn trust_policy(mut self, trust: TrustPolicy) -> Self {
        self.trust = trust;
        self
    }

    pub fn stun_server(mut self, url: impl Into<String>) -> Self {
        self.ice_servers.push(RTCIceServer {
            urls: vec![url.into()],
            ..Default::default()
        });
        self
    }

    pub fn turn_server(
        mut self,
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        self.ice_servers.push(RTCIceServer {
            urls: vec![url.into()],
            username: username.into(),
            credential: credential.into(),
            ..Default::default()
        });
        self
    }

    pub fn constraints(mut self, constraints: StreamConstraints) -> Self {
        self.constraints = Some(constraints);
        self
    }

    pub fn build(self) -> Result<SessionConfig, ConfigError> {
        let raw = self.endpoint.ok_or(ConfigError::MissingEndpoint)?;
        let endpoint = Url::parse(&raw).map_err(|err| ConfigError::InvalidEndpoint {
            endpoint: raw.clone(),
            detail: err.to_string(),
        })?;
        match endpoint.scheme() {
            "ws" | "wss" => {}
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
        Ok(SessionConfig {
            signaling: SignalingConfig {
                endpoint,
                trust: self.trust,
            },
            rtc: RtcSettings {
                ice_servers: self.ice_servers,
                ..Default::default()
            },
            constraints: self.constraints.unwrap_or_default(),
        })
    }
}
