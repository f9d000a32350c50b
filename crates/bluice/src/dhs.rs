// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server side of a link to one DHS hardware peer.
//!
//! A `DhsClient` owns the registry of devices this process serves through
//! the peer. Its receive thread runs from `start` until `close`, whether or
//! not a peer socket is attached; the socket comes either from `open`
//! (outbound) or from the acceptor (inbound).

use std::net::TcpStream;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::auth;
use crate::commands::motor_settings_fields;
use crate::config::{close_wait, DhsConfig};
use crate::connection::{Connection, Role};
use crate::dcss::reconnect_unsupported;
use crate::dispatch::DispatchTable;
use crate::error::{Error, Result};
use crate::handlers;
use crate::handshake::{self, ClientIdentity};
use crate::monitor::Monitor;
use crate::protocol::{ProtocolVersion, Tokens};
use crate::registry::{DeviceHandle, DeviceKind, DeviceState, MotorAdapter, ShutterStatus};
use crate::transport::configure_stream;

/// Verbs a DHS peer sends to us.
pub fn dhs_table() -> &'static DispatchTable {
    static TABLE: OnceLock<DispatchTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        DispatchTable::new("dhs")
            .handle("htos_send_configuration", send_configuration)
            .handle("htos_motor_move_started", handlers::motor_move_started)
            .handle("htos_motor_move_completed", handlers::motor_move_completed)
            .handle("htos_update_motor_position", handlers::update_motor_position)
            .handle("htos_report_ion_chambers", handlers::report_ion_chambers)
            .handle("htos_report_shutter_state", handlers::report_shutter_state)
            .handle("htos_set_string_completed", handlers::configure_string)
            .handle("htos_operation_update", handlers::operation_update)
            .handle("htos_operation_completed", handlers::operation_completed)
            .handle("htos_log", handlers::log_message)
            .ignore("htos_note")
    })
}

fn flag(b: bool) -> u8 {
    u8::from(b)
}

fn shutter_word(status: ShutterStatus) -> &'static str {
    match status {
        ShutterStatus::Open => "open",
        ShutterStatus::Closed | ShutterStatus::Illegal => "closed",
    }
}

/// Registration verb suffix for an entry.
fn register_kind(state: &DeviceState) -> &'static str {
    match state {
        DeviceState::Motor(m) if m.is_pseudo => "pseudo_motor",
        DeviceState::Motor(_) => "real_motor",
        DeviceState::IonChamber(_) => "ion_chamber",
        DeviceState::Shutter(_) => "shutter",
        DeviceState::Operation(_) => "operation",
        DeviceState::String(_) => "string",
    }
}

/// `htos_send_configuration <name>`: push the current parameters of a local device.
fn send_configuration(conn: &Connection, text: &str) -> Result<()> {
    let mut t = Tokens::new(text);
    t.required("message verb")?;
    let name = t.required("device name")?;

    let adapter = {
        let state = conn.lock();
        let device = state
            .registry
            .find(DeviceKind::Motor, name)
            .map(|h| state.registry.entry(h))
            .transpose()?;
        device.and_then(|d| d.motor()).and_then(|m| m.adapter())
    };
    // Adapters are never called with the registry lock held.
    let live = adapter.map(|a| a.motor_settings());

    let message = conn.update(|state| -> Result<String> {
        let peer = conn.name();
        if let Some(handle) = state.registry.find(DeviceKind::Motor, name) {
            let motor = state
                .registry
                .entry_mut(handle)?
                .motor_mut()
                .ok_or_else(|| Error::Initialization(format!("Motor '{}' has no motor data", name)))?;
            if let Some(settings) = live {
                motor.settings = settings;
            }
            let s = &motor.settings;
            return Ok(if motor.is_pseudo {
                format!(
                    "stoh_configure_pseudo_motor {} {} {} {} {} {} {} {} {}",
                    name,
                    peer,
                    motor.dhs_name,
                    s.position,
                    s.upper_limit,
                    s.lower_limit,
                    flag(s.upper_limit_on),
                    flag(s.lower_limit_on),
                    flag(s.motor_lock_on)
                )
            } else {
                format!(
                    "stoh_configure_real_motor {} {} {} {}",
                    name,
                    peer,
                    motor.dhs_name,
                    motor_settings_fields(s)
                )
            });
        }
        if let Some(handle) = state.registry.find(DeviceKind::String, name) {
            let contents = state
                .registry
                .entry(handle)?
                .string()
                .map(|s| s.contents.clone())
                .unwrap_or_default();
            return Ok(format!("stoh_configure_string {} {} {}", name, peer, contents));
        }
        if let Some(handle) = state.registry.find(DeviceKind::Shutter, name) {
            let status = state
                .registry
                .entry(handle)?
                .shutter()
                .map_or(ShutterStatus::Closed, |s| s.status);
            return Ok(format!(
                "stoh_configure_shutter {} {} {}",
                name,
                peer,
                shutter_word(status)
            ));
        }
        Err(conn.not_found(DeviceKind::Motor, name))
    })?;

    conn.send(&message)
}

/// Link to one hardware peer.
pub struct DhsClient {
    config: DhsConfig,
    conn: Arc<Connection>,
    monitor: Mutex<Option<Monitor>>,
}

impl DhsClient {
    pub fn new(config: DhsConfig) -> Self {
        let conn = Arc::new(Connection::new(
            config.name.clone(),
            Role::Dhs,
            config.receive_buffer_length,
            false,
        ));
        Self {
            config,
            conn,
            monitor: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &DhsConfig {
        &self.config
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Whether a peer socket is currently attached.
    pub fn is_attached(&self) -> bool {
        self.conn.lock().peer_attached && self.conn.transport().is_attached()
    }

    /// Start the receive thread. It idles until a socket is attached.
    pub fn start(&self) -> Result<()> {
        let mut monitor = self.monitor.lock();
        if monitor.as_ref().map_or(false, Monitor::is_running) {
            return Ok(());
        }
        if self.conn.lock().closed {
            return Err(reconnect_unsupported(&self.config.name));
        }
        *monitor = Some(Monitor::spawn(Arc::clone(&self.conn), dhs_table())?);
        Ok(())
    }

    fn session_id(&self, user: &str) -> Result<String> {
        if !self.config.needs_authentication() {
            return Ok(self.config.authentication_data.clone());
        }
        let secret = if self.config.require_password {
            self.config.password.as_deref().unwrap_or_default()
        } else {
            ""
        };
        auth::fetch_session_id(&self.config.authentication_data, user, secret)
    }

    /// Connect out to the peer and log in.
    pub fn open(&self) -> Result<()> {
        self.config.validate()?;
        let host = self.config.host.as_deref().ok_or_else(|| {
            Error::Config(format!("no host configured for DHS peer '{}'", self.config.name))
        })?;

        let mut identity = ClientIdentity::from_env(self.config.user.as_deref(), "");
        identity.session_id = self.session_id(&identity.user)?;
        let handshake_timeout = self.config.handshake_timeout()?;

        // The receive thread must not compete with the login exchange.
        self.stop_monitor()?;

        let addr = format!("{}:{}", host, self.config.port);
        log::info!("[dhs] connecting to '{}' at {}", self.config.name, addr);
        let stream = TcpStream::connect(&addr).map_err(|e| {
            Error::NetworkIo(format!(
                "Cannot connect to Blu-Ice DHS server '{}' at {}: {}",
                self.config.name, addr, e
            ))
        })?;
        configure_stream(&stream, self.config.tcp_keepalive)?;
        self.conn.transport().attach(stream)?;

        let login = handshake::login(&self.conn, &identity, handshake_timeout);
        self.start()?;
        login?;

        self.conn.update(|s| s.peer_attached = true);
        self.send_registrations()?;
        Ok(())
    }

    /// Hand an accepted, identified socket to this link.
    pub fn attach(&self, stream: TcpStream, protocol: ProtocolVersion) -> Result<()> {
        configure_stream(&stream, self.config.tcp_keepalive)?;
        self.conn.transport().attach(stream)?;
        self.conn.transport().set_protocol(protocol);
        self.conn.update(|s| {
            s.peer_attached = true;
            s.is_authenticated = true;
        });
        log::info!(
            "[dhs] peer '{}' attached ({:?})",
            self.config.name,
            protocol
        );
        self.send_registrations()?;
        Ok(())
    }

    fn register(
        &self,
        kind: DeviceKind,
        name: &str,
        fill: impl FnOnce(&mut DeviceState),
    ) -> Result<DeviceHandle> {
        let (handle, message) = self.conn.update(|state| -> Result<_> {
            let handle = self.conn.setup_locked(state, kind, name)?;
            let dev = state.registry.entry_mut(handle)?;
            dev.dhs_server_name = self.config.name.clone();
            fill(&mut dev.state);
            dev.initialized = true;
            let message = format!(
                "stoh_register_{} {} {}",
                register_kind(&dev.state),
                name,
                self.config.name
            );
            Ok((handle, message))
        })?;

        if self.is_attached() {
            self.conn.send(&message)?;
        }
        Ok(handle)
    }

    fn register_motor_with(
        &self,
        name: &str,
        adapter: &Arc<dyn MotorAdapter>,
        is_pseudo: bool,
    ) -> Result<DeviceHandle> {
        let settings = adapter.motor_settings();
        let weak = Arc::downgrade(adapter);
        self.register(DeviceKind::Motor, name, |state| {
            if let DeviceState::Motor(m) = state {
                if m.dhs_name.is_empty() {
                    m.dhs_name = name.to_string();
                }
                m.settings = settings;
                m.is_pseudo = is_pseudo;
                m.adapter = Some(weak);
            }
        })
    }

    /// Serve a real motor through this peer. Only a weak reference to `adapter` is kept.
    pub fn register_motor(&self, name: &str, adapter: &Arc<dyn MotorAdapter>) -> Result<DeviceHandle> {
        self.register_motor_with(name, adapter, false)
    }

    pub fn register_pseudo_motor(
        &self,
        name: &str,
        adapter: &Arc<dyn MotorAdapter>,
    ) -> Result<DeviceHandle> {
        self.register_motor_with(name, adapter, true)
    }

    pub fn register_string(&self, name: &str, contents: &str) -> Result<DeviceHandle> {
        self.register(DeviceKind::String, name, |state| {
            if let DeviceState::String(s) = state {
                s.contents = contents.to_string();
            }
        })
    }

    pub fn register_operation(&self, name: &str) -> Result<DeviceHandle> {
        self.register(DeviceKind::Operation, name, |_| {})
    }

    pub fn register_ion_chamber(
        &self,
        name: &str,
        counter: &str,
        channel: i32,
        timer: &str,
    ) -> Result<DeviceHandle> {
        self.register(DeviceKind::IonChamber, name, |state| {
            if let DeviceState::IonChamber(ic) = state {
                ic.counter_name = counter.to_string();
                ic.channel_number = channel;
                ic.timer_name = timer.to_string();
            }
        })
    }

    pub fn register_shutter(&self, name: &str, status: ShutterStatus) -> Result<DeviceHandle> {
        self.register(DeviceKind::Shutter, name, |state| {
            if let DeviceState::Shutter(s) = state {
                s.status = status;
            }
        })
    }

    /// Send a registration for every entry this peer serves. Returns the count.
    pub fn send_registrations(&self) -> Result<usize> {
        let messages: Vec<String> = {
            let state = self.conn.lock();
            DeviceKind::ALL
                .iter()
                .flat_map(|&kind| state.registry.iter(kind))
                .filter(|(_, d)| d.dhs_server_name == self.config.name)
                .map(|(_, d)| {
                    format!(
                        "stoh_register_{} {} {}",
                        register_kind(&d.state),
                        d.name(),
                        self.config.name
                    )
                })
                .collect()
        };

        for message in &messages {
            self.conn.send(message)?;
        }
        log::debug!(
            "[dhs] sent {} registrations to '{}'",
            messages.len(),
            self.config.name
        );
        Ok(messages.len())
    }

    fn stop_monitor(&self) -> Result<()> {
        let monitor = self.monitor.lock().take();
        match monitor {
            Some(mut monitor) => {
                let timeout = close_wait(self.config.close_timeout(), &self.config.name);
                monitor.stop(&self.conn, timeout)
            }
            None => Ok(()),
        }
    }

    /// Stop the receive thread and drop the peer socket.
    pub fn close(&self) -> Result<()> {
        if self.conn.lock().closed {
            return Ok(());
        }
        let stopped = self.stop_monitor();

        self.conn.transport().shutdown();
        self.conn.transport().release_writer();
        if stopped.is_ok() {
            self.conn.transport().release_reader();
        }
        self.conn.update(|s| {
            s.closed = true;
            s.peer_attached = false;
        });
        log::info!("[dhs] closed link to '{}'", self.config.name);
        stopped
    }

    pub fn resynchronize(&self) -> Result<()> {
        Err(reconnect_unsupported(&self.config.name))
    }
}

impl Drop for DhsClient {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("[dhs] close of '{}' on drop failed: {}", self.config.name, e);
        }
    }
}

impl std::fmt::Debug for DhsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhsClient")
            .field("name", &self.config.name)
            .field("attached", &self.is_attached())
            .finish()
    }
}
