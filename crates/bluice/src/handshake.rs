// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client login exchange.
//!
//! ```text
//!   server                                  client
//!     | -- stoc_send_client_type (framed) --> |
//!     | <-- htos_client_is_gui ... (legacy) - |
//!     | -- stog_login_complete <n> (framed) > |
//! ```
//!
//! After the identity reply the connection speaks the framed protocol in
//! both directions.

use std::time::Duration;

use crate::connection::{Connection, Role};
use crate::error::{Error, Result};
use crate::protocol::{ProtocolVersion, LEGACY_FRAME_SIZE};

/// Wait allowed for each server message during login (100 x 100 ms).
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Who we claim to be in `htos_client_is_gui`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub user: String,
    pub session_id: String,
    pub host: String,
    pub display: String,
}

fn env_first(keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| std::env::var(k).ok())
        .find(|v| !v.is_empty())
}

impl ClientIdentity {
    /// Identity for this process. `user` falls back to the login name.
    pub fn from_env(user: Option<&str>, session_id: &str) -> Self {
        let user = user
            .map(str::to_string)
            .or_else(|| env_first(&["USER", "USERNAME", "LOGNAME"]))
            .unwrap_or_else(|| "unknown".to_string());
        let host = env_first(&["HOSTNAME", "HOST", "COMPUTERNAME"])
            .unwrap_or_else(|| "localhost".to_string());
        let display = env_first(&["DISPLAY"]).unwrap_or_else(|| ":0".to_string());

        Self {
            user,
            session_id: session_id.to_string(),
            host,
            display,
        }
    }

    pub fn message(&self) -> String {
        format!(
            "htos_client_is_gui {} {} {} {}",
            self.user, self.session_id, self.host, self.display
        )
    }
}

fn server_kind(role: Role) -> &'static str {
    match role {
        Role::Dcss => "DCSS",
        Role::Dhs => "DHS",
    }
}

fn receive_step(conn: &Connection, timeout: Duration, what: &str) -> Result<String> {
    match conn.transport().receive(Some(timeout)) {
        Ok(msg) => Ok(msg.text),
        Err(Error::TimedOut(_)) => Err(Error::TimedOut(format!(
            "Timed out waiting for {} from Blu-Ice {} server '{}' after {} seconds.",
            what,
            server_kind(conn.role()),
            conn.name(),
            timeout.as_secs_f64()
        ))),
        Err(e) => Err(e),
    }
}

/// Run the login exchange on an attached connection. Returns the client number.
pub fn login(conn: &Connection, identity: &ClientIdentity, timeout: Duration) -> Result<u64> {
    let kind = server_kind(conn.role());
    conn.transport().set_protocol(ProtocolVersion::Legacy);

    let first = receive_step(conn, timeout, "the initial message")?;
    if first != "stoc_send_client_type" {
        return Err(Error::NetworkIo(format!(
            "Did not receive the 'stoc_send_client_type' message from Blu-Ice {} \
             server '{}' that we were expecting. Instead, we received '{}'. \
             Perhaps the server you have specified is not a {} server?",
            kind,
            conn.name(),
            first,
            kind
        )));
    }

    conn.transport()
        .send_legacy(&identity.message(), LEGACY_FRAME_SIZE)?;
    conn.transport().set_protocol(ProtocolVersion::Framed);

    let reply = receive_step(conn, timeout, "login status")?;
    let Some(rest) = reply.strip_prefix("stog_login_complete") else {
        return Err(Error::PermissionDenied(format!(
            "Blu-Ice {} login was not successful for user '{}' at server '{}'. \
             Response from server = '{}'",
            kind,
            identity.user,
            conn.name(),
            reply
        )));
    };

    let client_number: u64 = rest
        .split_whitespace()
        .next()
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| {
            Error::FunctionFailed(format!(
                "Did not find the client number in the message '{}' from {} server '{}'.",
                reply,
                kind,
                conn.name()
            ))
        })?;

    conn.update(|s| {
        s.client_number = client_number;
        s.is_authenticated = true;
    });
    log::info!(
        "[{}] logged in to '{}' as '{}', client number {}",
        conn.role().tag(),
        conn.name(),
        identity.user,
        client_number
    );
    Ok(client_number)
}
