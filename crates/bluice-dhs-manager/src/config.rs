// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DHS manager configuration.

use bluice::{AcceptorConfig, ConfigError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// String served through a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StringEntry {
    pub peer: String,
    pub name: String,
    #[serde(default)]
    pub contents: String,
}

/// Operation served through a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationEntry {
    pub peer: String,
    pub name: String,
}

/// Manager configuration: the acceptor roster plus the entries each peer serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(flatten)]
    pub acceptor: AcceptorConfig,

    #[serde(default)]
    pub strings: Vec<StringEntry>,

    #[serde(default)]
    pub operations: Vec<OperationEntry>,

    /// Interval between peer status lines (seconds, 0 = off)
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
}

fn default_status_interval() -> u64 {
    60
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            acceptor: AcceptorConfig::default(),
            strings: Vec::new(),
            operations: Vec::new(),
            status_interval_secs: default_status_interval(),
        }
    }
}

impl ManagerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.acceptor.validate()?;
        let known = |peer: &str| self.acceptor.peers.iter().any(|p| p.name == peer);
        for (peer, name) in self
            .strings
            .iter()
            .map(|s| (&s.peer, &s.name))
            .chain(self.operations.iter().map(|o| (&o.peer, &o.name)))
        {
            if !known(peer.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "'{}' is bound to unknown peer '{}'",
                    name, peer
                )));
            }
        }
        Ok(())
    }
}
