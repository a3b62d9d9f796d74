//! Client Configuration
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use webrtc::ice_transport::ice_server::RTCIceServer;

/// Default public STUN servers.
pub const DEFAULT_STUN_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// ICE server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServerConfig {
    /// A credential-less STUN entry.
    pub fn stun(urls: Vec<String>) -> Self {
        Self {
            urls,
            username: None,
            credential: None,
        }
    }
}

impl Default for IceServerConfig {
    fn default() -> Self {
        Self::stun(DEFAULT_STUN_SERVERS.iter().map(|s| (*s).to_string()).collect())
    }
}

impl From<&IceServerConfig> for RTCIceServer {
    fn from(s: &IceServerConfig) -> Self {
        Self {
            urls: s.urls.clone(),
            username: s.username.clone().unwrap_or_default(),
            credential: s.credential.clone().unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base URL (e.g., `http://127.0.0.1:8080`)
    pub server_url: String,

    /// Room poll interval (default: 2s)
    pub room_poll_interval: Duration,

    /// Invite poll interval (default: 2s)
    pub invite_poll_interval: Duration,

    /// Signal mailbox poll interval (default: 500ms)
    pub signal_poll_interval: Duration,

    /// STUN and optional TURN servers
    pub ice_servers: Vec<IceServerConfig>,

    /// HTTP request timeout (default: 10s)
    pub http_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".into(),
            room_poll_interval: Duration::from_millis(2000),
            invite_poll_interval: Duration::from_millis(2000),
            signal_poll_interval: Duration::from_millis(500),
            ice_servers: vec![IceServerConfig::default()],
            http_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let stun = env::var("HUDDLE_STUN_SERVERS")
            .ok()
            .map(|s| split_list(&s))
            .filter(|urls| !urls.is_empty())
            .map_or_else(IceServerConfig::default, IceServerConfig::stun);
        let mut ice_servers = vec![stun];
        if let Ok(turn) = env::var("HUDDLE_TURN_SERVER") {
            ice_servers.push(IceServerConfig {
                urls: split_list(&turn),
                username: env::var("HUDDLE_TURN_USERNAME").ok(),
                credential: env::var("HUDDLE_TURN_CREDENTIAL").ok(),
            });
        }

        Ok(Self {
            server_url: env::var("HUDDLE_SERVER_URL").unwrap_or(defaults.server_url),
            room_poll_interval: Duration::from_millis(parse_var("HUDDLE_ROOM_POLL_MS", 2000)?),
            invite_poll_interval: Duration::from_millis(parse_var("HUDDLE_INVITE_POLL_MS", 2000)?),
            signal_poll_interval: Duration::from_millis(parse_var("HUDDLE_SIGNAL_POLL_MS", 500)?),
            ice_servers,
            http_timeout: Duration::from_secs(parse_var("HUDDLE_HTTP_TIMEOUT_SECS", 10)?),
        })
    }

    /// Check if a TURN relay is configured.
    #[must_use]
    pub fn has_turn(&self) -> bool {
        self.ice_servers
            .iter()
            .any(|s| s.urls.iter().any(|u| u.starts_with("turn")))
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(v) => v
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a number, got {v:?}")),
        Err(_) => Ok(default),
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}
