// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection state shared by the receive thread and application threads.
//!
//! Two locks, never nested:
//! - the send lock, inside [`Transport`], serializes outbound frames
//! - the registry lock ([`Connection::lock`]) guards device entries and the
//!   connection scalars (master flag, client number, operation counter)
//!
//! Every mutation made through [`Connection::update`] wakes threads blocked in
//! [`Connection::wait_for_initialization`] or in the master wait.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::registry::{DeviceHandle, DeviceKind, ForeignDevice, Registry};
use crate::transport::Transport;

/// Longest single condvar wait inside the blocking calls.
pub(crate) const WAIT_STEP: Duration = Duration::from_millis(100);

/// Which side of the link this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// We are a client of the DCSS coordinator.
    Dcss,
    /// We serve a DHS hardware peer.
    Dhs,
}

impl Role {
    /// Prefix of the verbs this side sends.
    pub fn outbound_prefix(self) -> &'static str {
        match self {
            Self::Dcss => "gtos",
            Self::Dhs => "stoh",
        }
    }

    pub(crate) fn tag(self) -> &'static str {
        match self {
            Self::Dcss => "dcss",
            Self::Dhs => "dhs",
        }
    }
}

/// Everything guarded by the registry lock.
#[derive(Debug, Default)]
pub struct SharedState {
    pub registry: Registry,
    pub is_master: bool,
    pub is_authenticated: bool,
    /// Client number assigned by the coordinator at login.
    pub client_number: u64,
    /// Counter for operations this process starts.
    pub operation_counter: u64,
    /// A hardware peer socket is attached (DHS side).
    pub peer_attached: bool,
    pub closed: bool,
}

/// One Blu-Ice link.
pub struct Connection {
    name: String,
    role: Role,
    transport: Transport,
    shared: Mutex<SharedState>,
    changed: Condvar,
    auto_take_master: bool,
}

impl Connection {
    pub fn new(
        name: impl Into<String>,
        role: Role,
        receive_buffer_length: usize,
        auto_take_master: bool,
    ) -> Self {
        let name = name.into();
        Self {
            transport: Transport::new(name.clone(), receive_buffer_length),
            name,
            role,
            shared: Mutex::new(SharedState::default()),
            changed: Condvar::new(),
            auto_take_master,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn auto_take_master(&self) -> bool {
        self.auto_take_master
    }

    /// Take the registry lock for a read-then-use sequence.
    pub fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.shared.lock()
    }

    /// Mutate shared state under the registry lock and wake all waiters.
    pub fn update<R>(&self, f: impl FnOnce(&mut SharedState) -> R) -> R {
        let result = {
            let mut state = self.shared.lock();
            f(&mut state)
        };
        self.changed.notify_all();
        result
    }

    /// Block on the change condvar for at most `timeout`.
    pub(crate) fn wait_changed(&self, state: &mut MutexGuard<'_, SharedState>, timeout: Duration) {
        let _ = self.changed.wait_for(state, timeout);
    }

    /// Send one message over the transport. Does not touch the registry.
    pub fn send(&self, text: &str) -> Result<()> {
        self.transport.send(text, &[])
    }

    pub fn is_authenticated(&self) -> bool {
        self.shared.lock().is_authenticated
    }

    pub fn client_number(&self) -> u64 {
        self.shared.lock().client_number
    }

    /// Create-or-find with the caller already holding the registry lock.
    pub fn setup_locked(
        &self,
        state: &mut SharedState,
        kind: DeviceKind,
        name: &str,
    ) -> Result<DeviceHandle> {
        if self.role == Role::Dcss && !state.is_authenticated {
            return Err(Error::PermissionDenied(format!(
                "Cannot access Blu-Ice device '{}', since we have not yet \
                 successfully authenticated with Blu-Ice server '{}'.",
                name, self.name
            )));
        }
        state.registry.setup_or_find(kind, name)
    }

    /// Return the entry named `name`, creating it if absent.
    pub fn setup_or_find(&self, kind: DeviceKind, name: &str) -> Result<DeviceHandle> {
        self.update(|state| self.setup_locked(state, kind, name))
    }

    /// Look an entry up without creating it. Not-found is a quiet error.
    pub fn find(&self, kind: DeviceKind, name: &str) -> Result<DeviceHandle> {
        self.shared
            .lock()
            .registry
            .find(kind, name)
            .ok_or_else(|| self.not_found(kind, name))
    }

    pub(crate) fn not_found(&self, kind: DeviceKind, name: &str) -> Error {
        Error::NotFound(format!(
            "Blu-Ice {} '{}' was not found for Blu-Ice server '{}'",
            kind, name, self.name
        ))
    }

    /// Block until `name` exists as an initialized entry of kind `expected`.
    ///
    /// The registry lock is released while waiting. Fails with `TimedOut`
    /// after `timeout` and with `TypeMismatch` if the name shows up under
    /// another kind.
    pub fn wait_for_initialization(
        &self,
        name: &str,
        expected: DeviceKind,
        timeout: Duration,
    ) -> Result<DeviceHandle> {
        // A timeout too large to add means wait forever.
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.shared.lock();
        loop {
            if let Some(handle) = state.registry.lookup_initialized(name, expected)? {
                return Ok(handle);
            }
            let Some(deadline) = deadline else {
                self.wait_changed(&mut state, WAIT_STEP);
                continue;
            };
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::TimedOut(format!(
                    "Timed out after waiting {:.3} seconds for Blu-Ice server '{}' \
                     to configure {} '{}'",
                    timeout.as_secs_f64(),
                    self.name,
                    expected,
                    name
                )));
            }
            self.wait_changed(&mut state, (deadline - now).min(WAIT_STEP));
        }
    }

    /// Copy something out of an entry under the registry lock.
    pub fn with_device<R>(
        &self,
        handle: DeviceHandle,
        f: impl FnOnce(&ForeignDevice) -> R,
    ) -> Result<R> {
        let state = self.shared.lock();
        Ok(f(state.registry.entry(handle)?))
    }

    /// Mutate an entry under the registry lock.
    pub fn with_device_mut<R>(
        &self,
        handle: DeviceHandle,
        f: impl FnOnce(&mut ForeignDevice) -> R,
    ) -> Result<R> {
        self.update(|state| Ok(f(state.registry.entry_mut(handle)?)))
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("transport", &self.transport)
            .finish()
    }
}
