// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client side of a DCSS coordinator connection.
//!
//! ```text
//! Disconnected -> Handshaking -> Authenticated -> Running -> Closed
//! ```
//!
//! `open` walks the first four states; after it returns the receive thread
//! keeps the registry current and the connection accepts device commands.

use std::net::TcpStream;
use std::sync::{Arc, OnceLock};

use crate::auth;
use crate::config::{close_wait, DcssConfig};
use crate::connection::{Connection, Role};
use crate::dispatch::DispatchTable;
use crate::error::{Error, Result};
use crate::handlers;
use crate::handshake::{self, ClientIdentity};
use crate::monitor::Monitor;
use crate::transport::configure_stream;

/// Lifecycle of a [`DcssClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Handshaking,
    Authenticated,
    Running,
    Closed,
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Handshaking => "handshaking",
            Self::Authenticated => "authenticated",
            Self::Running => "running",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Verbs a DCSS sends to its GUI clients.
pub fn dcss_table() -> &'static DispatchTable {
    static TABLE: OnceLock<DispatchTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        DispatchTable::new("dcss")
            .handle("stog_become_master", handlers::become_master)
            .handle("stog_become_slave", handlers::become_slave)
            .handle("stog_configure_ion_chamber", handlers::configure_ion_chamber)
            .handle("stog_configure_pseudo_motor", handlers::configure_pseudo_motor)
            .handle("stog_configure_real_motor", handlers::configure_real_motor)
            .handle("stog_configure_shutter", handlers::configure_shutter)
            .handle("stog_configure_string", handlers::configure_string)
            .handle("stog_configure_operation", handlers::configure_operation)
            .handle("stog_log", handlers::log_message)
            .handle("stog_motor_move_completed", handlers::motor_move_completed)
            .handle("stog_motor_move_started", handlers::motor_move_started)
            .handle("stog_update_motor_position", handlers::update_motor_position)
            .handle("stog_report_ion_chambers", handlers::report_ion_chambers)
            .handle("stog_report_shutter_state", handlers::report_shutter_state)
            .handle("stog_set_permission_level", handlers::set_permission_level)
            .handle("stog_set_string_completed", handlers::configure_string)
            .handle("stog_start_operation", handlers::start_operation)
            .handle("stog_operation_update", handlers::operation_update)
            .handle("stog_operation_completed", handlers::operation_completed)
            .ignore("stog_configure_hardware_host")
            .ignore("stog_configure_run")
            .ignore("stog_configure_runs")
            .ignore("stog_update_client")
            .ignore("stog_update_client_list")
    })
}

pub(crate) fn reconnect_unsupported(name: &str) -> Error {
    Error::Unsupported(format!(
        "Reconnection to Blu-Ice server '{}' is not currently supported. \
         The only way to reconnect is to exit your application program and \
         then start your application again.",
        name
    ))
}

/// Connection to one DCSS.
pub struct DcssClient {
    config: DcssConfig,
    conn: Arc<Connection>,
    monitor: Option<Monitor>,
    state: ClientState,
}

impl DcssClient {
    pub fn new(config: DcssConfig) -> Self {
        let conn = Arc::new(Connection::new(
            config.name.clone(),
            Role::Dcss,
            config.receive_buffer_length,
            config.auto_take_master,
        ));
        Self {
            config,
            conn,
            monitor: None,
            state: ClientState::Disconnected,
        }
    }

    /// Create a client and open it.
    pub fn connect(config: DcssConfig) -> Result<Self> {
        let mut client = Self::new(config);
        client.open()?;
        Ok(client)
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn config(&self) -> &DcssConfig {
        &self.config
    }

    /// Shared connection, for registry access and device commands.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Connect, log in and start the receive thread.
    pub fn open(&mut self) -> Result<()> {
        match self.state {
            ClientState::Disconnected => {}
            ClientState::Closed => return Err(reconnect_unsupported(&self.config.name)),
            other => {
                return Err(Error::NotValidForCurrentState(format!(
                    "Connection to Blu-Ice server '{}' is already {}",
                    self.config.name, other
                )))
            }
        }
        self.config.validate()?;
        let handshake_timeout = self.config.handshake_timeout()?;

        let mut identity = ClientIdentity::from_env(self.config.user.as_deref(), "");
        identity.session_id = match (&self.config.auth_server, &self.config.password) {
            (Some(server), Some(secret)) => auth::fetch_session_id(server, &identity.user, secret)?,
            _ => self.config.session_id.clone(),
        };

        let addr = format!("{}:{}", self.config.host, self.config.port);
        log::info!("[dcss] connecting to '{}' at {}", self.config.name, addr);
        let stream = TcpStream::connect(&addr).map_err(|e| {
            Error::NetworkIo(format!(
                "Cannot connect to Blu-Ice DCSS server '{}' at {}: {}",
                self.config.name, addr, e
            ))
        })?;
        configure_stream(&stream, self.config.tcp_keepalive)?;
        self.conn.transport().attach(stream)?;

        self.state = ClientState::Handshaking;
        if let Err(e) = handshake::login(&self.conn, &identity, handshake_timeout) {
            self.conn.transport().shutdown();
            self.conn.transport().release_writer();
            self.conn.transport().release_reader();
            self.state = ClientState::Disconnected;
            return Err(e);
        }
        self.state = ClientState::Authenticated;

        self.monitor = Some(Monitor::spawn(Arc::clone(&self.conn), dcss_table())?);
        self.state = ClientState::Running;
        Ok(())
    }

    /// Stop the receive thread and close the socket.
    pub fn close(&mut self) -> Result<()> {
        if self.state == ClientState::Closed {
            return Ok(());
        }

        let stopped = match self.monitor.take() {
            Some(mut monitor) => {
                let timeout = close_wait(self.config.close_timeout(), &self.config.name);
                monitor.stop(&self.conn, timeout)
            }
            None => Ok(()),
        };

        self.conn.transport().shutdown();
        self.conn.transport().release_writer();
        if stopped.is_ok() {
            self.conn.transport().release_reader();
        }
        self.conn.update(|s| {
            s.closed = true;
            s.is_master = false;
            s.is_authenticated = false;
        });

        self.state = ClientState::Closed;
        log::info!("[dcss] closed connection to '{}'", self.config.name);
        stopped
    }

    pub fn resynchronize(&self) -> Result<()> {
        Err(reconnect_unsupported(&self.config.name))
    }
}

impl Drop for DcssClient {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("[dcss] close of '{}' on drop failed: {}", self.config.name, e);
        }
    }
}

impl std::fmt::Debug for DcssClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DcssClient")
            .field("name", &self.config.name)
            .field("state", &self.state)
            .finish()
    }
}
