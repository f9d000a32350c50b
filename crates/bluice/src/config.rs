// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection configuration.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use crate::protocol::DEFAULT_RECEIVE_BUFFER;

/// Close wait used when the configured one is unusable.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection to a DCSS coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcssConfig {
    /// Name used in log and error messages
    #[serde(default = "default_dcss_name")]
    pub name: String,

    /// DCSS host
    #[serde(default = "default_host")]
    pub host: String,

    /// DCSS GUI port (default: 14242)
    #[serde(default = "default_dcss_port")]
    pub port: u16,

    /// User name sent at login (default: login name of this process)
    #[serde(default)]
    pub user: Option<String>,

    /// Session id sent at login when no auth server is configured
    #[serde(default)]
    pub session_id: String,

    /// Authentication server (`host:port`) to obtain a session id from
    #[serde(default)]
    pub auth_server: Option<String>,

    /// Secret for the authentication server
    #[serde(default)]
    pub password: Option<String>,

    /// Request master automatically before device commands
    #[serde(default)]
    pub auto_take_master: bool,

    /// Receive buffer size in bytes
    #[serde(default = "default_receive_buffer")]
    pub receive_buffer_length: usize,

    /// Wait for each login message (seconds)
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: f64,

    /// Wait for the receive thread at close (seconds)
    #[serde(default = "default_close_timeout")]
    pub close_timeout_secs: f64,

    /// Enable TCP keepalive
    #[serde(default = "default_true")]
    pub tcp_keepalive: bool,
}

/// Link to one DHS hardware peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhsConfig {
    /// Peer name; an inbound peer must present this name
    pub name: String,

    /// Peer host for outbound connections
    #[serde(default)]
    pub host: Option<String>,

    /// Peer port for outbound connections (default: 14243)
    #[serde(default = "default_dhs_port")]
    pub port: u16,

    #[serde(default)]
    pub user: Option<String>,

    /// Obtain a session id from an auth server using `user`
    #[serde(default)]
    pub require_username: bool,

    /// Obtain a session id from an auth server using `password`
    #[serde(default)]
    pub require_password: bool,

    /// Session id, or auth server `host:port` when authentication is required
    #[serde(default)]
    pub authentication_data: String,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_receive_buffer")]
    pub receive_buffer_length: usize,

    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: f64,

    #[serde(default = "default_close_timeout")]
    pub close_timeout_secs: f64,

    #[serde(default = "default_true")]
    pub tcp_keepalive: bool,
}

/// Listener for inbound DHS peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptorConfig {
    /// Address to bind to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP port to listen on (default: 14243)
    #[serde(default = "default_dhs_port")]
    pub port: u16,

    /// Wait for a peer's identity reply (seconds)
    #[serde(default = "default_acceptor_handshake_timeout")]
    pub handshake_timeout_secs: f64,

    /// Known peers
    #[serde(default)]
    pub peers: Vec<DhsConfig>,
}

fn default_dcss_name() -> String {
    "dcss".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_dcss_port() -> u16 {
    14242
}

fn default_dhs_port() -> u16 {
    14243
}

fn default_receive_buffer() -> usize {
    DEFAULT_RECEIVE_BUFFER
}

fn default_handshake_timeout() -> f64 {
    10.0
}

fn default_close_timeout() -> f64 {
    5.0
}

fn default_acceptor_handshake_timeout() -> f64 {
    5.0
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_true() -> bool {
    true
}

fn positive_secs(value: f64, field: &str) -> Result<Duration, ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::InvalidValue(format!(
            "{} must be a positive number of seconds",
            field
        )));
    }
    Duration::try_from_secs_f64(value).map_err(|e| {
        ConfigError::InvalidValue(format!("{} = {} is out of range: {}", field, value, e))
    })
}

/// Configured close wait, or [`DEFAULT_CLOSE_TIMEOUT`] when it is unusable.
pub(crate) fn close_wait(configured: Result<Duration, ConfigError>, name: &str) -> Duration {
    configured.unwrap_or_else(|e| {
        log::warn!(
            "[config] '{}': {}; waiting {} s on close",
            name,
            e,
            DEFAULT_CLOSE_TIMEOUT.as_secs()
        );
        DEFAULT_CLOSE_TIMEOUT
    })
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), ConfigError> {
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| ConfigError::SerializeError(e.to_string()))?;
    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
}

impl Default for DcssConfig {
    fn default() -> Self {
        Self {
            name: default_dcss_name(),
            host: default_host(),
            port: default_dcss_port(),
            user: None,
            session_id: String::new(),
            auth_server: None,
            password: None,
            auto_take_master: false,
            receive_buffer_length: default_receive_buffer(),
            handshake_timeout_secs: default_handshake_timeout(),
            close_timeout_secs: default_close_timeout(),
            tcp_keepalive: true,
        }
    }
}

impl DcssConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        read_json(path)
    }

    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        write_json(self, path)
    }

    pub fn handshake_timeout(&self) -> Result<Duration, ConfigError> {
        positive_secs(self.handshake_timeout_secs, "handshake_timeout_secs")
    }

    pub fn close_timeout(&self) -> Result<Duration, ConfigError> {
        positive_secs(self.close_timeout_secs, "close_timeout_secs")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::InvalidValue("name cannot be empty".into()));
        }
        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue("host cannot be empty".into()));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("port cannot be 0".into()));
        }
        if self.receive_buffer_length == 0 {
            return Err(ConfigError::InvalidValue(
                "receive_buffer_length cannot be 0".into(),
            ));
        }
        if self.auth_server.is_some() && self.password.is_none() {
            return Err(ConfigError::InvalidValue(
                "password required when auth_server is set".into(),
            ));
        }
        self.handshake_timeout()?;
        self.close_timeout()?;
        Ok(())
    }
}

impl DhsConfig {
    /// Peer config with defaults for everything but the name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
            port: default_dhs_port(),
            user: None,
            require_username: false,
            require_password: false,
            authentication_data: String::new(),
            password: None,
            receive_buffer_length: default_receive_buffer(),
            handshake_timeout_secs: default_handshake_timeout(),
            close_timeout_secs: default_close_timeout(),
            tcp_keepalive: true,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        read_json(path)
    }

    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        write_json(self, path)
    }

    pub fn needs_authentication(&self) -> bool {
        self.require_username || self.require_password
    }

    pub fn handshake_timeout(&self) -> Result<Duration, ConfigError> {
        positive_secs(self.handshake_timeout_secs, "handshake_timeout_secs")
    }

    pub fn close_timeout(&self) -> Result<Duration, ConfigError> {
        positive_secs(self.close_timeout_secs, "close_timeout_secs")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() || self.name.contains(char::is_whitespace) {
            return Err(ConfigError::InvalidValue(format!(
                "peer name '{}' must be a single non-empty word",
                self.name
            )));
        }
        if self.receive_buffer_length == 0 {
            return Err(ConfigError::InvalidValue(
                "receive_buffer_length cannot be 0".into(),
            ));
        }
        if self.needs_authentication() && !self.authentication_data.contains(':') {
            return Err(ConfigError::InvalidValue(format!(
                "authentication_data for '{}' must be host:port when authentication is required",
                self.name
            )));
        }
        self.handshake_timeout()?;
        self.close_timeout()?;
        Ok(())
    }
}

impl Default for AcceptorConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_dhs_port(),
            handshake_timeout_secs: default_acceptor_handshake_timeout(),
            peers: Vec::new(),
        }
    }
}

impl AcceptorConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        read_json(path)
    }

    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        write_json(self, path)
    }

    pub fn handshake_timeout(&self) -> Result<Duration, ConfigError> {
        positive_secs(self.handshake_timeout_secs, "handshake_timeout_secs")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.handshake_timeout()?;
        for (i, peer) in self.peers.iter().enumerate() {
            peer.validate()?;
            if self.peers[..i].iter().any(|p| p.name == peer.name) {
                return Err(ConfigError::InvalidValue(format!(
                    "peer '{}' is listed twice",
                    peer.name
                )));
            }
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, Clone)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(s) => write!(f, "I/O error: {}", s),
            Self::ParseError(s) => write!(f, "Parse error: {}", s),
            Self::SerializeError(s) => write!(f, "Serialize error: {}", s),
            Self::InvalidValue(s) => write!(f, "Invalid value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}
