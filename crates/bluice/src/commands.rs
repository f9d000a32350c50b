// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound device commands.
//!
//! Verbs carry `gtos_` on a DCSS connection and `stoh_` on a DHS connection.
//! Every command that mutates remote state passes the master check first.

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::operation::{OperationHandle, OperationState};
use crate::registry::{DeviceKind, MotorSettings};

/// How hard `abort_all` stops motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortMode {
    Soft,
    Hard,
}

impl AbortMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Soft => "soft",
            Self::Hard => "hard",
        }
    }
}

fn flag(b: bool) -> u8 {
    u8::from(b)
}

/// Position, limits and flags of a real motor in wire order.
pub fn motor_settings_fields(s: &MotorSettings) -> String {
    format!(
        "{} {} {} {} {} {} {} {} {} {} {} {}",
        s.position,
        s.upper_limit,
        s.lower_limit,
        s.scale_factor,
        s.speed,
        s.acceleration_time,
        s.backlash,
        flag(s.lower_limit_on),
        flag(s.upper_limit_on),
        flag(s.motor_lock_on),
        flag(s.backlash_on),
        flag(s.reverse_on)
    )
}

/// Body of a `configure_device` message for `name`.
pub fn configure_device_message(prefix: &str, name: &str, s: &MotorSettings) -> String {
    format!(
        "{}_configure_device {} {}",
        prefix,
        name,
        motor_settings_fields(s)
    )
}

impl Connection {
    fn prefix(&self) -> &'static str {
        self.role().outbound_prefix()
    }

    /// Start moving `motor` to `destination` (raw units).
    pub fn start_motor_move(&self, motor: &str, destination: f64) -> Result<()> {
        let handle = self.find(DeviceKind::Motor, motor)?;
        self.check_for_master()?;

        self.with_device_mut(handle, |d| {
            if let Some(m) = d.motor_mut() {
                m.move_in_progress = true;
            }
        })?;

        let command = format!("{}_start_motor_move {} {}", self.prefix(), motor, destination);
        if let Err(e) = self.send(&command) {
            self.with_device_mut(handle, |d| {
                if let Some(m) = d.motor_mut() {
                    m.move_in_progress = false;
                }
            })?;
            return Err(e);
        }
        Ok(())
    }

    /// Redefine the current position of `motor` without moving it.
    pub fn set_motor_position(&self, motor: &str, position: f64) -> Result<()> {
        self.find(DeviceKind::Motor, motor)?;
        self.check_for_master()?;
        self.send(&format!(
            "{}_set_motor_position {} {}",
            self.prefix(),
            motor,
            position
        ))
    }

    /// Stop all motion on the other side.
    pub fn abort_all(&self, mode: AbortMode) -> Result<()> {
        self.check_for_master()?;
        self.send(&format!("{}_abort_all {}", self.prefix(), mode.as_str()))
    }

    /// Push new parameters for a real motor. The entry is updated first.
    pub fn configure_device(&self, motor: &str, settings: MotorSettings) -> Result<()> {
        let handle = self.find(DeviceKind::Motor, motor)?;
        let is_pseudo = self.with_device(handle, |d| d.motor().map_or(false, |m| m.is_pseudo))?;
        if is_pseudo {
            return Err(Error::Unsupported(format!(
                "Setting motor parameters for Blu-Ice pseudomotor '{}' is not supported.",
                motor
            )));
        }

        self.check_for_master()?;

        self.with_device_mut(handle, |d| {
            if let Some(m) = d.motor_mut() {
                m.settings = settings;
            }
        })?;
        self.send(&configure_device_message(self.prefix(), motor, &settings))
    }

    /// Start `operation` with `arguments`. Returns the handle the replies will carry.
    ///
    /// The operation counter is bumped and the entry set to `Started` before
    /// the command goes out, so a fast reply finds a consistent entry.
    pub fn start_operation(&self, operation: &str, arguments: &str) -> Result<OperationHandle> {
        self.check_for_master()?;

        let handle = self.update(|state| {
            let h = self.setup_locked(state, DeviceKind::Operation, operation)?;
            state.operation_counter += 1;
            let op_handle = OperationHandle::new(state.client_number, state.operation_counter);
            if let Some(op) = state.registry.entry_mut(h)?.operation_mut() {
                op.handle = op_handle;
                op.state = OperationState::Started;
                op.arguments.clear();
                op.arguments.push_str(arguments.trim());
            }
            Ok::<_, Error>(op_handle)
        })?;

        let command = if arguments.trim().is_empty() {
            format!("{}_start_operation {} {}", self.prefix(), operation, handle)
        } else {
            format!(
                "{}_start_operation {} {} {}",
                self.prefix(),
                operation,
                handle,
                arguments.trim()
            )
        };
        self.send(&command)?;
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Role;
    use crate::protocol::{self, ProtocolVersion};
    use std::net::{TcpListener, TcpStream};

    fn attached(role: Role, master: bool) -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        let conn = Connection::new("peer", role, 1000, false);
        conn.transport().attach(client).unwrap();
        conn.transport().set_protocol(ProtocolVersion::Framed);
        conn.update(|s| {
            s.is_authenticated = true;
            s.is_master = master;
            s.client_number = 3;
            s.operation_counter = 6;
        });
        (conn, server)
    }

    fn add_motor(conn: &Connection, name: &str, pseudo: bool) {
        let h = conn.setup_or_find(DeviceKind::Motor, name).unwrap();
        conn.with_device_mut(h, |d| {
            d.motor_mut().unwrap().is_pseudo = pseudo;
            d.initialized = true;
        })
        .unwrap();
    }

    #[test]
    fn test_start_motor_move() {
        let (conn, mut server) = attached(Role::Dcss, true);
        add_motor(&conn, "M1", false);

        conn.start_motor_move("M1", 12.5).unwrap();
        let msg = protocol::read_frame(&mut server, 1000).unwrap();
        assert_eq!(msg.text, "gtos_start_motor_move M1 12.5");

        let h = conn.find(DeviceKind::Motor, "M1").unwrap();
        assert!(conn
            .with_device(h, |d| d.motor().unwrap().move_in_progress)
            .unwrap());
    }

    #[test]
    fn test_move_requires_master() {
        let (conn, _server) = attached(Role::Dcss, false);
        add_motor(&conn, "M1", false);
        let err = conn.start_motor_move("M1", 1.0).unwrap_err();
        assert!(matches!(err, Error::NotValidForCurrentState(_)));

        let h = conn.find(DeviceKind::Motor, "M1").unwrap();
        assert!(!conn
            .with_device(h, |d| d.motor().unwrap().move_in_progress)
            .unwrap());
    }

    #[test]
    fn test_dhs_prefix_and_abort() {
        let (conn, mut server) = attached(Role::Dhs, false);
        conn.abort_all(AbortMode::Hard).unwrap();
        let msg = protocol::read_frame(&mut server, 1000).unwrap();
        assert_eq!(msg.text, "stoh_abort_all hard");
    }

    #[test]
    fn test_configure_device() {
        let (conn, mut server) = attached(Role::Dcss, true);
        add_motor(&conn, "M1", false);
        add_motor(&conn, "energy", true);

        let settings = MotorSettings {
            position: 1.5,
            upper_limit: 10.0,
            lower_limit: -10.0,
            scale_factor: 1000.0,
            speed: 200.0,
            acceleration_time: 50.0,
            backlash: 0.0,
            lower_limit_on: true,
            upper_limit_on: true,
            ..Default::default()
        };
        conn.configure_device("M1", settings).unwrap();
        let msg = protocol::read_frame(&mut server, 1000).unwrap();
        assert_eq!(
            msg.text,
            "gtos_configure_device M1 1.5 10 -10 1000 200 50 0 1 1 0 0 0"
        );

        let err = conn.configure_device("energy", settings).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_start_operation() {
        let (conn, mut server) = attached(Role::Dcss, true);
        let handle = conn.start_operation("collectFrame", "0 img1 /data").unwrap();
        assert_eq!(handle, OperationHandle::new(3, 7));

        let msg = protocol::read_frame(&mut server, 1000).unwrap();
        assert_eq!(msg.text, "gtos_start_operation collectFrame 3.7 0 img1 /data");

        let h = conn.find(DeviceKind::Operation, "collectFrame").unwrap();
        let op = conn.with_device(h, |d| d.operation().cloned().unwrap()).unwrap();
        assert_eq!(op.state, OperationState::Started);
        assert_eq!(op.handle, handle);

        let next = conn.start_operation("detector_stop", "").unwrap();
        assert_eq!(next, OperationHandle::new(3, 8));
        let msg = protocol::read_frame(&mut server, 1000).unwrap();
        assert_eq!(msg.text, "gtos_start_operation detector_stop 3.8");
    }
}
