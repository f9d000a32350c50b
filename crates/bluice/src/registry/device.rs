// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Foreign device entries.

use std::sync::{Arc, Weak};

use crate::operation::{OperationHandle, OperationState};

/// Kind of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Motor,
    IonChamber,
    Shutter,
    Operation,
    String,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 5] = [
        DeviceKind::Motor,
        DeviceKind::IonChamber,
        DeviceKind::Shutter,
        DeviceKind::Operation,
        DeviceKind::String,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Motor => "motor",
            Self::IonChamber => "ion chamber",
            Self::Shutter => "shutter",
            Self::Operation => "operation",
            Self::String => "string",
        }
    }

    pub(crate) fn slot(self) -> usize {
        match self {
            Self::Motor => 0,
            Self::IonChamber => 1,
            Self::Shutter => 2,
            Self::Operation => 3,
            Self::String => 4,
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable reference to a registry entry. Valid for the life of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    pub kind: DeviceKind,
    pub index: usize,
}

/// Motor parameters as exchanged in configure messages.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotorSettings {
    pub position: f64,
    pub upper_limit: f64,
    pub lower_limit: f64,
    pub scale_factor: f64,
    pub speed: f64,
    pub acceleration_time: f64,
    pub backlash: f64,
    pub lower_limit_on: bool,
    pub upper_limit_on: bool,
    pub motor_lock_on: bool,
    pub backlash_on: bool,
    pub reverse_on: bool,
}

/// Local driver behind a motor a DHS connection serves.
///
/// The registry keeps only a `Weak` reference, so dropping the adapter is
/// enough to detach it.
pub trait MotorAdapter: Send + Sync {
    /// Current settings, used to answer a configuration request.
    fn motor_settings(&self) -> MotorSettings;

    /// Called after an inbound motion message updated the entry.
    fn motion_changed(&self, _position: f64, _move_in_progress: bool) {}
}

#[derive(Clone, Default)]
pub struct ForeignMotor {
    /// Name the hardware peer uses for this motor.
    pub dhs_name: String,
    pub settings: MotorSettings,
    pub is_pseudo: bool,
    pub move_in_progress: bool,
    pub adapter: Option<Weak<dyn MotorAdapter>>,
}

impl ForeignMotor {
    pub fn adapter(&self) -> Option<Arc<dyn MotorAdapter>> {
        self.adapter.as_ref().and_then(Weak::upgrade)
    }
}

impl std::fmt::Debug for ForeignMotor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForeignMotor")
            .field("dhs_name", &self.dhs_name)
            .field("settings", &self.settings)
            .field("is_pseudo", &self.is_pseudo)
            .field("move_in_progress", &self.move_in_progress)
            .field("adapter", &self.adapter().is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimerType {
    Clock,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Default)]
pub struct ForeignIonChamber {
    pub counter_name: String,
    pub channel_number: i32,
    pub timer_name: String,
    pub timer_type: TimerType,
    pub value: f64,
    /// Index into the timer bindings, once the chamber is bound.
    pub timer: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShutterStatus {
    Open,
    Closed,
    #[default]
    Illegal,
}

impl ShutterStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ForeignShutter {
    pub status: ShutterStatus,
}

#[derive(Debug, Clone, Default)]
pub struct ForeignString {
    pub contents: String,
}

#[derive(Debug, Clone, Default)]
pub struct ForeignOperation {
    pub handle: OperationHandle,
    pub state: OperationState,
    pub arguments: String,
}

/// Kind-specific payload of an entry.
#[derive(Debug, Clone)]
pub enum DeviceState {
    Motor(ForeignMotor),
    IonChamber(ForeignIonChamber),
    Shutter(ForeignShutter),
    Operation(ForeignOperation),
    String(ForeignString),
}

impl DeviceState {
    pub fn empty(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Motor => Self::Motor(ForeignMotor::default()),
            DeviceKind::IonChamber => Self::IonChamber(ForeignIonChamber::default()),
            DeviceKind::Shutter => Self::Shutter(ForeignShutter::default()),
            DeviceKind::Operation => Self::Operation(ForeignOperation::default()),
            DeviceKind::String => Self::String(ForeignString::default()),
        }
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            Self::Motor(_) => DeviceKind::Motor,
            Self::IonChamber(_) => DeviceKind::IonChamber,
            Self::Shutter(_) => DeviceKind::Shutter,
            Self::Operation(_) => DeviceKind::Operation,
            Self::String(_) => DeviceKind::String,
        }
    }
}

/// One registry entry.
#[derive(Debug, Clone)]
pub struct ForeignDevice {
    name: String,
    /// Hardware peer that owns the device.
    pub dhs_server_name: String,
    /// Set once a configure message (or a local registration) filled the payload.
    pub initialized: bool,
    pub state: DeviceState,
}

impl ForeignDevice {
    pub(crate) fn new(kind: DeviceKind, name: &str) -> Self {
        Self {
            name: name.to_string(),
            dhs_server_name: String::new(),
            initialized: false,
            state: DeviceState::empty(kind),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DeviceKind {
        self.state.kind()
    }

    pub fn motor(&self) -> Option<&ForeignMotor> {
        match &self.state {
            DeviceState::Motor(m) => Some(m),
            _ => None,
        }
    }

    pub fn motor_mut(&mut self) -> Option<&mut ForeignMotor> {
        match &mut self.state {
            DeviceState::Motor(m) => Some(m),
            _ => None,
        }
    }

    pub fn ion_chamber(&self) -> Option<&ForeignIonChamber> {
        match &self.state {
            DeviceState::IonChamber(c) => Some(c),
            _ => None,
        }
    }

    pub fn ion_chamber_mut(&mut self) -> Option<&mut ForeignIonChamber> {
        match &mut self.state {
            DeviceState::IonChamber(c) => Some(c),
            _ => None,
        }
    }

    pub fn shutter(&self) -> Option<&ForeignShutter> {
        match &self.state {
            DeviceState::Shutter(s) => Some(s),
            _ => None,
        }
    }

    pub fn shutter_mut(&mut self) -> Option<&mut ForeignShutter> {
        match &mut self.state {
            DeviceState::Shutter(s) => Some(s),
            _ => None,
        }
    }

    pub fn operation(&self) -> Option<&ForeignOperation> {
        match &self.state {
            DeviceState::Operation(o) => Some(o),
            _ => None,
        }
    }

    pub fn operation_mut(&mut self) -> Option<&mut ForeignOperation> {
        match &mut self.state {
            DeviceState::Operation(o) => Some(o),
            _ => None,
        }
    }

    pub fn string(&self) -> Option<&ForeignString> {
        match &self.state {
            DeviceState::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn string_mut(&mut self) -> Option<&mut ForeignString> {
        match &mut self.state {
            DeviceState::String(s) => Some(s),
            _ => None,
        }
    }
}
