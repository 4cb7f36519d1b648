//! Server configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::relay::RelayConfig;

/// Default listening port
pub const DEFAULT_PORT: u16 = 8081;

/// Invalid configuration value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed
    InvalidValue { key: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue { key, value } => {
                write!(f, "Invalid value for {}: {:?}", key, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Externally reachable signaling URL, when behind a proxy or tunnel
    pub public_url: Option<String>,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// WebSocket handshake must complete within this time
    pub handshake_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Relay pacing
    pub relay: RelayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            public_url: None,
            max_connections: 0, // Unlimited
            handshake_timeout: Duration::from_secs(10),
            tcp_nodelay: true, // Signaling frames are small and latency bound
            relay: RelayConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Read configuration from the process environment
    ///
    /// | Variable | Meaning |
    /// |---|---|
    /// | `HOST` | bind ip (default `0.0.0.0`) |
    /// | `PORT` | bind port (default 8081) |
    /// | `PUBLIC_URL` | advertised signaling URL |
    /// | `MAX_CONNECTIONS` | connection cap, 0 = unlimited |
    /// | `HANDSHAKE_TIMEOUT_MS` | WebSocket handshake timeout |
    /// | `OFFER_DELAY_MS` | pause before `incoming-call` |
    /// | `ANSWER_DELAY_MS` | pause before `call-accepted-by-callee` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let host: Option<IpAddr> = parse(&lookup, "HOST")?;
        let port: Option<u16> = parse(&lookup, "PORT")?;
        if let Some(host) = host {
            config.bind_addr.set_ip(host);
        }
        if let Some(port) = port {
            config.bind_addr.set_port(port);
        }

        config.public_url = lookup("PUBLIC_URL")
            .map(|url| url.trim().to_owned())
            .filter(|url| !url.is_empty());

        if let Some(max) = parse(&lookup, "MAX_CONNECTIONS")? {
            config.max_connections = max;
        }
        if let Some(ms) = parse(&lookup, "HANDSHAKE_TIMEOUT_MS")? {
            config.handshake_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "OFFER_DELAY_MS")? {
            config.relay.offer_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "ANSWER_DELAY_MS")? {
            config.relay.answer_delay = Duration::from_millis(ms);
        }

        Ok(config)
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the advertised signaling URL
    pub fn public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = Some(url.into());
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set relay pacing
    pub fn relay(mut self, relay: RelayConfig) -> Self {
        self.relay = relay;
        self
    }

    /// URL clients should connect to
    pub fn endpoint_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.clone(),
            None => format!("ws://{}", self.bind_addr),
        }
    }
}

fn parse<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
    }
}
