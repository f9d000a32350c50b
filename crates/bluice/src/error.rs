// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type shared by every Blu-Ice component.
//!
//! Variants follow the failure taxonomy of the protocol engine:
//!
//! | Class          | Variants                                                   |
//! |----------------|------------------------------------------------------------|
//! | transport      | `NetworkConnectionLost`, `NetworkIo`, `TimedOut`           |
//! | protocol       | `Unparseable`, `IllegalMessageType`, `WouldExceedLimit`    |
//! | registry       | `NotFound` (quiet), `TypeMismatch`, `Initialization`       |
//! | authorization  | `PermissionDenied`, `NotValidForCurrentState`              |
//! | resource       | `OutOfMemory`                                              |
//! | other          | `Unsupported`, `FunctionFailed`, `Config`, `Authentication`|

use std::io;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Blu-Ice error.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Transport
    // ========================================================================
    /// The connection has no socket or the peer closed it.
    NetworkConnectionLost(String),
    /// A socket read or write failed.
    NetworkIo(String),
    /// A bounded wait expired.
    TimedOut(String),

    // ========================================================================
    // Protocol
    // ========================================================================
    /// A message did not have the expected shape.
    Unparseable(String),
    /// A message did not start with one of the known type prefixes.
    IllegalMessageType(String),
    /// A requested size exceeds a fixed protocol limit.
    WouldExceedLimit(String),

    // ========================================================================
    // Registry
    // ========================================================================
    /// No device with that name exists. Expected while waiting for a peer.
    NotFound(String),
    /// A device exists under that name but with a different kind.
    TypeMismatch(String),
    /// A device or timer binding was used before it was set up.
    Initialization(String),
    /// Growing a registry array failed.
    OutOfMemory(String),

    // ========================================================================
    // Authorization
    // ========================================================================
    /// The server refused us, or we have not authenticated yet.
    PermissionDenied(String),
    /// The request is not allowed in the current state (e.g. not master).
    NotValidForCurrentState(String),
    /// The session server rejected the credential or returned no session.
    Authentication(String),

    // ========================================================================
    // Other
    // ========================================================================
    /// Operation deliberately not supported.
    Unsupported(String),
    /// A step of a multi-step exchange failed.
    FunctionFailed(String),
    /// Invalid configuration.
    Config(String),
}

impl Error {
    /// Not-found is the one condition callers poll on; it should not be logged.
    pub fn is_quiet(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True for the two "give up waiting" paths an adapter may retry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }

    /// Map an I/O error observed on a connection, keeping EOF/reset distinct.
    pub(crate) fn from_io(err: io::Error, peer: &str) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => Self::NetworkConnectionLost(format!(
                "Connection to Blu-Ice server '{}' was lost: {}",
                peer, err
            )),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                Self::TimedOut(format!("I/O with Blu-Ice server '{}' timed out", peer))
            }
            _ => Self::NetworkIo(format!("I/O error with Blu-Ice server '{}': {}", peer, err)),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NetworkConnectionLost(s) => write!(f, "Network connection lost: {}", s),
            Self::NetworkIo(s) => write!(f, "Network I/O error: {}", s),
            Self::TimedOut(s) => write!(f, "Timed out: {}", s),
            Self::Unparseable(s) => write!(f, "Unparseable message: {}", s),
            Self::IllegalMessageType(s) => write!(f, "Illegal message type: {}", s),
            Self::WouldExceedLimit(s) => write!(f, "Would exceed limit: {}", s),
            Self::NotFound(s) => write!(f, "Not found: {}", s),
            Self::TypeMismatch(s) => write!(f, "Type mismatch: {}", s),
            Self::Initialization(s) => write!(f, "Initialization error: {}", s),
            Self::OutOfMemory(s) => write!(f, "Out of memory: {}", s),
            Self::PermissionDenied(s) => write!(f, "Permission denied: {}", s),
            Self::NotValidForCurrentState(s) => write!(f, "Not valid for current state: {}", s),
            Self::Authentication(s) => write!(f, "Authentication failed: {}", s),
            Self::Unsupported(s) => write!(f, "Unsupported: {}", s),
            Self::FunctionFailed(s) => write!(f, "Function failed: {}", s),
            Self::Config(s) => write!(f, "Configuration error: {}", s),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::from_io(e, "<unknown>")
    }
}

impl From<crate::config::ConfigError> for Error {
    fn from(e: crate::config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_quiet() {
        assert!(Error::NotFound("M1".into()).is_quiet());
        assert!(!Error::TypeMismatch("M1".into()).is_quiet());
    }

    #[test]
    fn test_io_mapping() {
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(
            Error::from_io(eof, "dcss"),
            Error::NetworkConnectionLost(_)
        ));

        let timeout = io::Error::new(io::ErrorKind::WouldBlock, "later");
        assert!(Error::from_io(timeout, "dcss").is_timeout());

        let other = io::Error::new(io::ErrorKind::InvalidData, "junk");
        assert!(matches!(Error::from_io(other, "dcss"), Error::NetworkIo(_)));
    }

    #[test]
    fn test_error_display() {
        let err = Error::NotValidForCurrentState("not master".into());
        assert!(err.to_string().contains("Not valid for current state"));

        let err = Error::Unsupported("reconnect".into());
        assert!(err.to_string().starts_with("Unsupported"));
    }
}
