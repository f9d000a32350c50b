// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Foreign device registry.
//!
//! One append-only array per device kind. Entries are addressed by
//! [`DeviceHandle`] (kind + index); indices are never reused, so a handle
//! stays valid for the life of the connection no matter how often the arrays
//! grow. Arrays grow in fixed blocks of [`GROWTH_BLOCK`] entries.
//!
//! The registry itself is not synchronized. It lives inside the connection's
//! shared state and is only touched under that lock.

mod device;

pub use device::{
    DeviceHandle, DeviceKind, DeviceState, ForeignDevice, ForeignIonChamber, ForeignMotor,
    ForeignOperation, ForeignShutter, ForeignString, MotorAdapter, MotorSettings, ShutterStatus,
    TimerType,
};

use crate::error::{Error, Result};

/// Number of entries added each time a kind's array fills up.
pub const GROWTH_BLOCK: usize = 10;

/// Ion chambers read out together by one timer.
#[derive(Debug, Clone, Default)]
pub struct TimerBinding {
    pub name: String,
    pub ion_chambers: Vec<DeviceHandle>,
    pub measurement_in_progress: bool,
}

/// Name-indexed device tables for one connection.
#[derive(Debug, Default)]
pub struct Registry {
    arrays: [Vec<ForeignDevice>; 5],
    timers: Vec<TimerBinding>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, kind: DeviceKind) -> usize {
        self.arrays[kind.slot()].len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.iter().all(Vec::is_empty)
    }

    /// Allocated slots for `kind`.
    pub fn capacity(&self, kind: DeviceKind) -> usize {
        self.arrays[kind.slot()].capacity()
    }

    /// Look an entry up by exact name. Never creates.
    pub fn find(&self, kind: DeviceKind, name: &str) -> Option<DeviceHandle> {
        self.arrays[kind.slot()]
            .iter()
            .position(|d| d.name() == name)
            .map(|index| DeviceHandle { kind, index })
    }

    /// Return the entry named `name`, creating an empty one if needed.
    pub fn setup_or_find(&mut self, kind: DeviceKind, name: &str) -> Result<DeviceHandle> {
        if let Some(handle) = self.find(kind, name) {
            return Ok(handle);
        }

        let array = &mut self.arrays[kind.slot()];
        if array.len() == array.capacity() {
            array.try_reserve_exact(GROWTH_BLOCK).map_err(|_| {
                Error::OutOfMemory(format!(
                    "Ran out of memory growing the {} array to {} entries",
                    kind,
                    array.len() + GROWTH_BLOCK
                ))
            })?;
        }

        let index = array.len();
        array.push(ForeignDevice::new(kind, name));
        log::debug!("[registry] created {} '{}' at index {}", kind, name, index);
        Ok(DeviceHandle { kind, index })
    }

    pub fn get(&self, handle: DeviceHandle) -> Option<&ForeignDevice> {
        self.arrays[handle.kind.slot()].get(handle.index)
    }

    pub fn get_mut(&mut self, handle: DeviceHandle) -> Option<&mut ForeignDevice> {
        self.arrays[handle.kind.slot()].get_mut(handle.index)
    }

    /// Entry for a handle this registry issued.
    pub(crate) fn entry(&self, handle: DeviceHandle) -> Result<&ForeignDevice> {
        self.get(handle).ok_or_else(|| stale(handle))
    }

    pub(crate) fn entry_mut(&mut self, handle: DeviceHandle) -> Result<&mut ForeignDevice> {
        self.get_mut(handle).ok_or_else(|| stale(handle))
    }

    /// All entries of one kind, in creation order.
    pub fn iter(&self, kind: DeviceKind) -> impl Iterator<Item = (DeviceHandle, &ForeignDevice)> {
        self.arrays[kind.slot()]
            .iter()
            .enumerate()
            .map(move |(index, d)| (DeviceHandle { kind, index }, d))
    }

    /// Initialized entry named `name` of kind `expected`.
    ///
    /// `Ok(None)` means nothing usable yet. An initialized entry of another
    /// kind with the same name is a `TypeMismatch`.
    pub fn lookup_initialized(
        &self,
        name: &str,
        expected: DeviceKind,
    ) -> Result<Option<DeviceHandle>> {
        if let Some(handle) = self.find(expected, name) {
            if self.arrays[expected.slot()][handle.index].initialized {
                return Ok(Some(handle));
            }
        }

        for kind in DeviceKind::ALL {
            if kind == expected {
                continue;
            }
            if let Some(handle) = self.find(kind, name) {
                if self.arrays[kind.slot()][handle.index].initialized {
                    return Err(Error::TypeMismatch(format!(
                        "Blu-Ice device '{}' is a {}, not a {}. \
                         Perhaps you have specified an incorrect device name?",
                        name, kind, expected
                    )));
                }
            }
        }
        Ok(None)
    }

    /// Record that `timer` reads out `ion_chambers`, creating chamber entries
    /// as needed. Rebinding a timer replaces its chamber set.
    pub fn bind_timer(&mut self, timer: &str, ion_chambers: &[&str]) -> Result<usize> {
        let mut handles = Vec::with_capacity(ion_chambers.len());
        for name in ion_chambers {
            handles.push(self.setup_or_find(DeviceKind::IonChamber, name)?);
        }

        let index = match self.timers.iter().position(|t| t.name == timer) {
            Some(i) => i,
            None => {
                self.timers.push(TimerBinding {
                    name: timer.to_string(),
                    ..Default::default()
                });
                self.timers.len() - 1
            }
        };

        for &h in &handles {
            if let Some(chamber) = self.get_mut(h).and_then(ForeignDevice::ion_chamber_mut) {
                chamber.timer = Some(index);
            }
        }
        self.timers[index].ion_chambers = handles;
        Ok(index)
    }

    pub fn find_timer(&self, name: &str) -> Option<usize> {
        self.timers.iter().position(|t| t.name == name)
    }

    pub fn timer(&self, index: usize) -> Option<&TimerBinding> {
        self.timers.get(index)
    }

    pub fn timer_mut(&mut self, index: usize) -> Option<&mut TimerBinding> {
        self.timers.get_mut(index)
    }
}

fn stale(handle: DeviceHandle) -> Error {
    Error::NotFound(format!(
        "No {} at registry index {}",
        handle.kind, handle.index
    ))
}
