// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Inbound message handlers shared by the DCSS and DHS receive loops.
//!
//! Every handler receives the full message text, verb included, and applies
//! it to the connection's registry under the registry lock. Notifications to
//! local motor adapters happen after the lock is released.

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::operation::{self, OperationEvent, OperationHandle};
use crate::protocol::Tokens;
use crate::registry::{DeviceKind, MotorSettings, ShutterStatus, TimerType};

// ============================================================================
// Parsed messages
// ============================================================================

/// Contents of a `configure_real_motor` or `configure_pseudo_motor` message.
#[derive(Debug, Clone, PartialEq)]
pub struct MotorConfig {
    pub name: String,
    pub dhs_server: String,
    pub dhs_name: String,
    pub is_pseudo: bool,
    pub settings: MotorSettings,
}

/// Parse `<verb> name dhs [dhs_name] pos upper lower scale speed accel
/// backlash lower_on upper_on lock_on backlash_on reverse_on`.
pub fn parse_real_motor(text: &str) -> Result<MotorConfig> {
    let mut t = Tokens::new(text);
    t.required("message verb")?;
    let name = t.required("motor name")?;
    let dhs_server = t.required("DHS server name")?;
    // The peer-side name is optional; 14 tokens remain after the name when present.
    let dhs_name = if t.remaining() >= 13 {
        t.required("DHS motor name")?
    } else {
        name
    };

    let settings = MotorSettings {
        position: t.parse("position")?,
        upper_limit: t.parse("upper limit")?,
        lower_limit: t.parse("lower limit")?,
        scale_factor: t.parse("scale factor")?,
        speed: t.parse("speed")?,
        acceleration_time: t.parse("acceleration time")?,
        backlash: t.parse("backlash")?,
        lower_limit_on: t.flag("lower limit flag")?,
        upper_limit_on: t.flag("upper limit flag")?,
        motor_lock_on: t.flag("motor lock flag")?,
        backlash_on: t.flag("backlash flag")?,
        reverse_on: t.flag("reverse flag")?,
    };

    Ok(MotorConfig {
        name: name.to_string(),
        dhs_server: dhs_server.to_string(),
        dhs_name: dhs_name.to_string(),
        is_pseudo: false,
        settings,
    })
}

/// Parse `<verb> name dhs [dhs_name] pos upper lower upper_on lower_on lock_on`.
pub fn parse_pseudo_motor(text: &str) -> Result<MotorConfig> {
    let mut t = Tokens::new(text);
    t.required("message verb")?;
    let name = t.required("motor name")?;
    let dhs_server = t.required("DHS server name")?;
    let dhs_name = if t.remaining() >= 7 {
        t.required("DHS motor name")?
    } else {
        name
    };

    let position = t.parse("position")?;
    let upper_limit = t.parse("upper limit")?;
    let lower_limit = t.parse("lower limit")?;
    let upper_limit_on = t.flag("upper limit flag")?;
    let lower_limit_on = t.flag("lower limit flag")?;
    let motor_lock_on = t.flag("motor lock flag")?;

    Ok(MotorConfig {
        name: name.to_string(),
        dhs_server: dhs_server.to_string(),
        dhs_name: dhs_name.to_string(),
        is_pseudo: true,
        settings: MotorSettings {
            position,
            upper_limit,
            lower_limit,
            upper_limit_on,
            lower_limit_on,
            motor_lock_on,
            ..MotorSettings::default()
        },
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locale {
    Server,
    Unknown,
}

/// A `log` message from the other side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub severity: Severity,
    pub locale: Locale,
    pub device: String,
    pub body: String,
}

pub fn parse_log(text: &str) -> Result<LogRecord> {
    let mut t = Tokens::new(text);
    t.required("message verb")?;

    let severity = match t.required("severity level")? {
        "info" => Severity::Info,
        "warning" => Severity::Warning,
        "error" => Severity::Error,
        other => {
            log::warn!("[log] unrecognized severity level '{}'", other);
            Severity::Unknown
        }
    };
    let locale = match t.required("locale")? {
        "server" => Locale::Server,
        other => {
            log::warn!("[log] unrecognized locale '{}'", other);
            Locale::Unknown
        }
    };
    let device = t.required("device name")?.to_string();

    Ok(LogRecord {
        severity,
        locale,
        device,
        body: t.rest().to_string(),
    })
}

// ============================================================================
// Master
// ============================================================================

pub(crate) fn become_master(conn: &Connection, _text: &str) -> Result<()> {
    conn.update(|s| s.is_master = true);
    log::info!("[{}] '{}' granted master", conn.role().tag(), conn.name());
    Ok(())
}

pub(crate) fn become_slave(conn: &Connection, _text: &str) -> Result<()> {
    conn.update(|s| s.is_master = false);
    log::info!("[{}] '{}' revoked master", conn.role().tag(), conn.name());
    Ok(())
}

// ============================================================================
// Configuration
// ============================================================================

fn store_motor(conn: &Connection, config: MotorConfig) -> Result<()> {
    conn.update(|state| {
        let handle = conn.setup_locked(state, DeviceKind::Motor, &config.name)?;
        let dev = state.registry.entry_mut(handle)?;
        dev.dhs_server_name = config.dhs_server;
        if let Some(motor) = dev.motor_mut() {
            motor.dhs_name = config.dhs_name;
            motor.settings = config.settings;
            motor.is_pseudo = config.is_pseudo;
        }
        dev.initialized = true;
        Ok(())
    })
}

pub(crate) fn configure_real_motor(conn: &Connection, text: &str) -> Result<()> {
    store_motor(conn, parse_real_motor(text)?)
}

pub(crate) fn configure_pseudo_motor(conn: &Connection, text: &str) -> Result<()> {
    store_motor(conn, parse_pseudo_motor(text)?)
}

pub(crate) fn configure_ion_chamber(conn: &Connection, text: &str) -> Result<()> {
    let mut t = Tokens::new(text);
    t.required("message verb")?;
    let name = t.required("ion chamber name")?;
    let dhs_server = t.required("DHS server name")?;
    let counter = t.required("counter name")?;
    let channel: i32 = t.parse("channel number")?;
    let timer = t.required("timer name")?;
    let timer_type = match t.required("timer type")? {
        "clock" => TimerType::Clock,
        other => {
            log::warn!(
                "[{}] unrecognized timer type '{}' for ion chamber '{}'",
                conn.role().tag(),
                other,
                name
            );
            TimerType::Unknown
        }
    };

    conn.update(|state| {
        let handle = conn.setup_locked(state, DeviceKind::IonChamber, name)?;
        let dev = state.registry.entry_mut(handle)?;
        dev.dhs_server_name = dhs_server.to_string();
        if let Some(chamber) = dev.ion_chamber_mut() {
            chamber.counter_name = counter.to_string();
            chamber.channel_number = channel;
            chamber.timer_name = timer.to_string();
            chamber.timer_type = timer_type;
        }
        dev.initialized = true;
        Ok(())
    })
}

pub(crate) fn configure_shutter(conn: &Connection, text: &str) -> Result<()> {
    let mut t = Tokens::new(text);
    t.required("message verb")?;
    let name = t.required("shutter name")?;
    let dhs_server = t.required("DHS server name")?;
    let status_token = t.required("shutter status")?;
    let status = ShutterStatus::parse(status_token).ok_or_else(|| {
        Error::Unparseable(format!(
            "Illegal status '{}' for Blu-Ice shutter '{}'",
            status_token, name
        ))
    })?;

    conn.update(|state| {
        let handle = conn.setup_locked(state, DeviceKind::Shutter, name)?;
        let dev = state.registry.entry_mut(handle)?;
        dev.dhs_server_name = dhs_server.to_string();
        if let Some(shutter) = dev.shutter_mut() {
            shutter.status = status;
        }
        dev.initialized = true;
        Ok(())
    })
}

/// `configure_string` and `set_string_completed` share one layout.
pub(crate) fn configure_string(conn: &Connection, text: &str) -> Result<()> {
    let mut t = Tokens::new(text);
    t.required("message verb")?;
    let name = t.required("string name")?;
    let dhs_server = t.required("DHS server name")?;
    let contents = t.rest();

    conn.update(|state| {
        let handle = conn.setup_locked(state, DeviceKind::String, name)?;
        let dev = state.registry.entry_mut(handle)?;
        dev.dhs_server_name = dhs_server.to_string();
        if let Some(s) = dev.string_mut() {
            s.contents.clear();
            s.contents.push_str(contents);
        }
        dev.initialized = true;
        Ok(())
    })
}

pub(crate) fn configure_operation(conn: &Connection, text: &str) -> Result<()> {
    let mut t = Tokens::new(text);
    t.required("message verb")?;
    let name = t.required("operation name")?;
    let dhs_server = t.required("DHS server name")?;

    conn.update(|state| {
        let handle = conn.setup_locked(state, DeviceKind::Operation, name)?;
        let dev = state.registry.entry_mut(handle)?;
        dev.dhs_server_name = dhs_server.to_string();
        dev.initialized = true;
        Ok(())
    })
}

// ============================================================================
// Status reports
// ============================================================================

fn update_motion(conn: &Connection, text: &str, move_in_progress: bool) -> Result<()> {
    let mut t = Tokens::new(text);
    t.required("message verb")?;
    let name = t.required("motor name")?;
    let position: f64 = t.parse("motor position")?;
    let status = t.rest().trim_matches(|c: char| c == '{' || c == '}' || c.is_whitespace());
    if !status.is_empty() {
        log::debug!(
            "[{}] motor '{}' at {} status '{}'",
            conn.role().tag(),
            name,
            position,
            status
        );
    }

    let adapter = conn.update(|state| {
        let handle = state
            .registry
            .find(DeviceKind::Motor, name)
            .ok_or_else(|| conn.not_found(DeviceKind::Motor, name))?;
        let motor = state
            .registry
            .entry_mut(handle)?
            .motor_mut()
            .ok_or_else(|| Error::Initialization(format!("Motor '{}' has no motor data", name)))?;
        motor.settings.position = position;
        motor.move_in_progress = move_in_progress;
        Ok::<_, Error>(motor.adapter())
    })?;

    if let Some(adapter) = adapter {
        adapter.motion_changed(position, move_in_progress);
    }
    Ok(())
}

pub(crate) fn motor_move_started(conn: &Connection, text: &str) -> Result<()> {
    update_motion(conn, text, true)
}

pub(crate) fn motor_move_completed(conn: &Connection, text: &str) -> Result<()> {
    update_motion(conn, text, false)
}

pub(crate) fn update_motor_position(conn: &Connection, text: &str) -> Result<()> {
    update_motion(conn, text, true)
}

/// `<verb> time (name value)+`. All names must belong to the first chamber's timer.
pub(crate) fn report_ion_chambers(conn: &Connection, text: &str) -> Result<()> {
    let mut t = Tokens::new(text);
    t.required("message verb")?;
    t.required("measurement time")?;

    let mut readings = Vec::new();
    while let Some(name) = t.next_token() {
        let value: f64 = t.parse("ion chamber value")?;
        readings.push((name, value));
    }
    let first = readings.first().map(|(n, _)| *n).ok_or_else(|| {
        Error::Unparseable(format!(
            "Did not find the name of the first ion chamber in the message '{}' \
             from Blu-Ice server '{}'.",
            text,
            conn.name()
        ))
    })?;

    conn.update(|state| {
        let first_handle = state
            .registry
            .find(DeviceKind::IonChamber, first)
            .ok_or_else(|| conn.not_found(DeviceKind::IonChamber, first))?;
        let timer_index = state
            .registry
            .entry(first_handle)?
            .ion_chamber()
            .and_then(|c| c.timer)
            .ok_or_else(|| {
                Error::Initialization(format!(
                    "The timer for ion chamber '{}' has not been initialized.",
                    first
                ))
            })?;

        let timer = state.registry.timer_mut(timer_index).ok_or_else(|| {
            Error::Initialization(format!("Timer {} has not been initialized.", timer_index))
        })?;
        timer.measurement_in_progress = false;
        let timer_name = timer.name.clone();
        let chambers = timer.ion_chambers.clone();

        for (name, value) in &readings {
            let handle = chambers
                .iter()
                .copied()
                .find(|h| {
                    state
                        .registry
                        .get(*h)
                        .map_or(false, |d| d.name() == *name)
                })
                .ok_or_else(|| {
                    Error::Initialization(format!(
                        "Ion chamber '{}' was not found in the list of ion chambers \
                         for Blu-Ice timer '{}'.",
                        name, timer_name
                    ))
                })?;
            if let Some(chamber) = state.registry.entry_mut(handle)?.ion_chamber_mut() {
                chamber.value = *value;
            }
        }
        Ok(())
    })
}

pub(crate) fn report_shutter_state(conn: &Connection, text: &str) -> Result<()> {
    let mut t = Tokens::new(text);
    t.required("message verb")?;
    let name = t.required("shutter name")?;
    let token = t.required("shutter status")?;
    let status = ShutterStatus::parse(token).unwrap_or_else(|| {
        log::warn!(
            "[{}] illegal shutter status '{}' returned for shutter '{}'",
            conn.role().tag(),
            token,
            name
        );
        ShutterStatus::Illegal
    });

    conn.update(|state| {
        let handle = state
            .registry
            .find(DeviceKind::Shutter, name)
            .ok_or_else(|| conn.not_found(DeviceKind::Shutter, name))?;
        if let Some(shutter) = state.registry.entry_mut(handle)?.shutter_mut() {
            shutter.status = status;
        }
        Ok(())
    })
}

pub(crate) fn set_permission_level(conn: &Connection, text: &str) -> Result<()> {
    log::debug!("[{}] permission level: '{}'", conn.role().tag(), text);
    Ok(())
}

pub(crate) fn log_message(conn: &Connection, text: &str) -> Result<()> {
    let record = parse_log(text)?;
    let level = match record.severity {
        Severity::Error => log::Level::Error,
        Severity::Warning => log::Level::Warn,
        Severity::Info | Severity::Unknown => log::Level::Info,
    };
    log::log!(
        level,
        "[{}] {}: {}: {}",
        conn.role().tag(),
        conn.name(),
        record.device,
        record.body
    );
    Ok(())
}

// ============================================================================
// Operations
// ============================================================================

fn operation_event(conn: &Connection, text: &str, event: OperationEvent) -> Result<()> {
    let mut t = Tokens::new(text);
    t.required("message verb")?;
    let name = t.required("operation name")?;
    let handle: OperationHandle = t.required("operation handle")?.parse()?;
    let arguments = t.rest();

    let state = conn.update(|state| {
        let h = conn.setup_locked(state, DeviceKind::Operation, name)?;
        let op = state
            .registry
            .entry_mut(h)?
            .operation_mut()
            .ok_or_else(|| Error::Initialization(format!("Operation '{}' has no data", name)))?;
        operation::apply_event(op, name, event, handle, arguments)
    })?;

    log::debug!(
        "[{}] operation '{}' {} -> {:?}",
        conn.role().tag(),
        name,
        handle,
        state
    );
    Ok(())
}

pub(crate) fn start_operation(conn: &Connection, text: &str) -> Result<()> {
    operation_event(conn, text, OperationEvent::Start)
}

pub(crate) fn operation_update(conn: &Connection, text: &str) -> Result<()> {
    operation_event(conn, text, OperationEvent::Update)
}

pub(crate) fn operation_completed(conn: &Connection, text: &str) -> Result<()> {
    operation_event(conn, text, OperationEvent::Complete)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Role;
    use crate::operation::OperationState;
    use crate::registry::{MotorAdapter, ShutterStatus};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn dcss() -> Connection {
        let conn = Connection::new("dcss", Role::Dcss, 10_000, false);
        conn.update(|s| s.is_authenticated = true);
        conn
    }

    #[test]
    fn test_parse_real_motor_without_dhs_name() {
        let cfg = parse_real_motor(
            "stog_configure_real_motor M1 dhsA 10.0 100.0 -100.0 1.0 5.0 0.5 0.2 1 1 0 1 0",
        )
        .unwrap();
        assert_eq!(cfg.name, "M1");
        assert_eq!(cfg.dhs_server, "dhsA");
        assert_eq!(cfg.dhs_name, "M1");
        assert!(!cfg.is_pseudo);
        assert_eq!(cfg.settings.position, 10.0);
        assert_eq!(cfg.settings.upper_limit, 100.0);
        assert_eq!(cfg.settings.lower_limit, -100.0);
        assert!(cfg.settings.lower_limit_on);
        assert!(cfg.settings.upper_limit_on);
        assert!(!cfg.settings.motor_lock_on);
        assert!(cfg.settings.backlash_on);
        assert!(!cfg.settings.reverse_on);
    }

    #[test]
    fn test_parse_real_motor_with_dhs_name() {
        let cfg = parse_real_motor(
            "stog_configure_real_motor gonio_phi dhsA phi 1 2 3 4 5 6 7 0 0 1 0 1",
        )
        .unwrap();
        assert_eq!(cfg.dhs_name, "phi");
        assert_eq!(cfg.settings.backlash, 7.0);
        assert!(cfg.settings.motor_lock_on);
        assert!(cfg.settings.reverse_on);
    }

    #[test]
    fn test_parse_real_motor_short_message() {
        let err = parse_real_motor("stog_configure_real_motor M1 dhsA 10.0").unwrap_err();
        assert!(matches!(err, Error::Unparseable(_)));
    }

    #[test]
    fn test_parse_pseudo_motor() {
        let cfg =
            parse_pseudo_motor("stog_configure_pseudo_motor energy dhsB 12.4 20 5 1 0 1").unwrap();
        assert!(cfg.is_pseudo);
        assert_eq!(cfg.dhs_name, "energy");
        assert_eq!(cfg.settings.position, 12.4);
        assert!(cfg.settings.upper_limit_on);
        assert!(!cfg.settings.lower_limit_on);
        assert!(cfg.settings.motor_lock_on);
        assert_eq!(cfg.settings.scale_factor, 0.0);
        assert!(!cfg.settings.backlash_on);
    }

    #[test]
    fn test_parse_log() {
        let rec = parse_log("stog_log error server M1 motor hit a limit").unwrap();
        assert_eq!(rec.severity, Severity::Error);
        assert_eq!(rec.locale, Locale::Server);
        assert_eq!(rec.device, "M1");
        assert_eq!(rec.body, "motor hit a limit");

        let rec = parse_log("stog_log chatter client x y").unwrap();
        assert_eq!(rec.severity, Severity::Unknown);
        assert_eq!(rec.locale, Locale::Unknown);
    }

    #[test]
    fn test_configure_real_motor_populates_entry() {
        let conn = dcss();
        configure_real_motor(
            &conn,
            "stog_configure_real_motor M1 dhsA 10.0 100.0 -100.0 1.0 5.0 0.5 0.2 1 1 0 1 0",
        )
        .unwrap();

        let h = conn.find(DeviceKind::Motor, "M1").unwrap();
        let (initialized, dhs, motor) = conn
            .with_device(h, |d| {
                (d.initialized, d.dhs_server_name.clone(), d.motor().cloned())
            })
            .unwrap();
        let motor = motor.unwrap();
        assert!(initialized);
        assert_eq!(dhs, "dhsA");
        assert_eq!(motor.settings.position, 10.0);
        assert!(!motor.is_pseudo);
    }

    #[test]
    fn test_configure_before_login_is_denied() {
        let conn = Connection::new("dcss", Role::Dcss, 10_000, false);
        let err = configure_string(&conn, "stog_configure_string S1 dhsA hi").unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
    }

    #[test]
    fn test_configure_shutter_rejects_bad_status() {
        let conn = dcss();
        assert!(configure_shutter(&conn, "stog_configure_shutter S1 dhsA open").is_ok());
        assert!(configure_shutter(&conn, "stog_configure_shutter S2 dhsA ajar").is_err());

        report_shutter_state(&conn, "stog_report_shutter_state S1 broken").unwrap();
        let h = conn.find(DeviceKind::Shutter, "S1").unwrap();
        let status = conn.with_device(h, |d| d.shutter().unwrap().status).unwrap();
        assert_eq!(status, ShutterStatus::Illegal);
    }

    #[test]
    fn test_configure_string_keeps_rest_of_line() {
        let conn = dcss();
        configure_string(&conn, "stog_configure_string user_msg dhsA hello   there world").unwrap();
        configure_string(&conn, "stog_set_string_completed user_msg dhsA normal done").unwrap();
        let h = conn.find(DeviceKind::String, "user_msg").unwrap();
        let contents = conn
            .with_device(h, |d| d.string().unwrap().contents.clone())
            .unwrap();
        assert_eq!(contents, "normal done");
    }

    #[test]
    fn test_configure_ion_chamber() {
        let conn = dcss();
        configure_ion_chamber(&conn, "stog_configure_ion_chamber i0 dhsA c1 3 t1 clock").unwrap();
        configure_ion_chamber(&conn, "stog_configure_ion_chamber i1 dhsA c1 4 t1 gate").unwrap();

        let h = conn.find(DeviceKind::IonChamber, "i1").unwrap();
        let chamber = conn
            .with_device(h, |d| d.ion_chamber().cloned().unwrap())
            .unwrap();
        assert_eq!(chamber.channel_number, 4);
        assert_eq!(chamber.timer_type, TimerType::Unknown);
    }

    struct Recorder(AtomicBool);

    impl MotorAdapter for Recorder {
        fn motor_settings(&self) -> MotorSettings {
            MotorSettings::default()
        }
        fn motion_changed(&self, _position: f64, moving: bool) {
            self.0.store(moving, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_motion_updates_and_notifies_adapter() {
        let conn = dcss();
        configure_real_motor(
            &conn,
            "stog_configure_real_motor M1 dhsA 0 10 -10 1 1 1 0 0 0 0 0 0",
        )
        .unwrap();
        let recorder = Arc::new(Recorder(AtomicBool::new(false)));
        let adapter: Arc<dyn MotorAdapter> = recorder.clone();
        let h = conn.find(DeviceKind::Motor, "M1").unwrap();
        conn.with_device_mut(h, |d| {
            d.motor_mut().unwrap().adapter = Some(Arc::downgrade(&adapter));
        })
        .unwrap();

        motor_move_started(&conn, "stog_motor_move_started M1 2.5").unwrap();
        assert!(recorder.0.load(Ordering::SeqCst));

        motor_move_completed(&conn, "stog_motor_move_completed M1 3.0 {normal}").unwrap();
        let motor = conn.with_device(h, |d| d.motor().cloned().unwrap()).unwrap();
        assert_eq!(motor.settings.position, 3.0);
        assert!(!motor.move_in_progress);
        assert!(!recorder.0.load(Ordering::SeqCst));
    }

    #[test]
    fn test_motion_for_unknown_motor_is_quiet_not_found() {
        let conn = dcss();
        let err = update_motor_position(&conn, "stog_update_motor_position nope 1.0").unwrap_err();
        assert!(err.is_quiet());
    }

    #[test]
    fn test_report_ion_chambers() {
        let conn = dcss();
        conn.update(|s| {
            let t = s.registry.bind_timer("t1", &["i0", "i1"]).unwrap();
            s.registry.timer_mut(t).unwrap().measurement_in_progress = true;
        });

        report_ion_chambers(&conn, "stog_report_ion_chambers 1.0 i0 100 i1 250.5").unwrap();

        let state = conn.lock();
        let t = state.registry.find_timer("t1").unwrap();
        assert!(!state.registry.timer(t).unwrap().measurement_in_progress);
        let i1 = state.registry.find(DeviceKind::IonChamber, "i1").unwrap();
        assert_eq!(
            state.registry.get(i1).unwrap().ion_chamber().unwrap().value,
            250.5
        );
    }

    #[test]
    fn test_report_ion_chambers_rejects_foreign_name() {
        let conn = dcss();
        conn.update(|s| {
            s.registry.bind_timer("t1", &["i0"]).unwrap();
            s.registry.bind_timer("t2", &["i9"]).unwrap();
        });
        let err = report_ion_chambers(&conn, "stog_report_ion_chambers 1.0 i0 1 i9 2").unwrap_err();
        assert!(matches!(err, Error::Initialization(_)));
    }

    #[test]
    fn test_operation_lifecycle_through_messages() {
        let conn = dcss();
        configure_operation(&conn, "stog_configure_operation OP1 dhsA").unwrap();
        start_operation(&conn, "stog_start_operation OP1 3.7 a b").unwrap();
        operation_update(&conn, "stog_operation_update OP1 3.7 half way").unwrap();
        operation_completed(&conn, "stog_operation_completed OP1 3.7 normal").unwrap();

        let h = conn.find(DeviceKind::Operation, "OP1").unwrap();
        let op = conn.with_device(h, |d| d.operation().cloned().unwrap()).unwrap();
        assert_eq!(op.state, OperationState::Completed);
        assert_eq!(op.handle, OperationHandle::new(3, 7));
        assert_eq!(op.arguments, "normal");

        let err = operation_update(&conn, "stog_operation_update OP1 3.7 late").unwrap_err();
        assert!(matches!(err, Error::NotValidForCurrentState(_)));
    }

    #[test]
    fn test_operation_completed_with_error() {
        let conn = dcss();
        start_operation(&conn, "stog_start_operation OP1 3.7").unwrap();
        operation_completed(&conn, "stog_operation_completed OP1 3.7 error").unwrap();
        let h = conn.find(DeviceKind::Operation, "OP1").unwrap();
        let state = conn.with_device(h, |d| d.operation().unwrap().state).unwrap();
        assert_eq!(state, OperationState::Error);
    }

    #[test]
    fn test_master_flag_handlers() {
        let conn = dcss();
        become_master(&conn, "stog_become_master").unwrap();
        assert!(conn.is_master());
        become_slave(&conn, "stog_become_slave").unwrap();
        assert!(!conn.is_master());
    }
}
