// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Master arbitration.
//!
//! Only one client of a DCSS may move hardware at a time. The coordinator
//! grants or revokes that right with `stog_become_master` and
//! `stog_become_slave`, which the receive loop records in the connection's
//! master flag. A DHS peer is always master of its own hardware.

use std::time::Instant;

use crate::connection::{Connection, Role, WAIT_STEP};
use crate::error::{Error, Result};

/// Number of condvar steps the auto-take path waits for the grant.
pub const MASTER_WAIT_STEPS: u32 = 50;

impl Connection {
    /// Whether this client currently holds master.
    pub fn is_master(&self) -> bool {
        match self.role() {
            Role::Dhs => true,
            Role::Dcss => self.lock().is_master,
        }
    }

    /// Ask the coordinator for master (`want`) or give it up.
    ///
    /// Local state changes only when the coordinator answers.
    pub fn take_master(&self, want: bool) -> Result<()> {
        if self.role() == Role::Dhs {
            return Ok(());
        }
        if want {
            self.send("gtos_become_master force")
        } else {
            self.send("gtos_become_slave")
        }
    }

    /// Fail unless this client may send a device-mutating command.
    ///
    /// With auto-take enabled the client requests master and waits for the
    /// grant. Otherwise nothing is sent.
    pub fn check_for_master(&self) -> Result<()> {
        if self.is_master() {
            return Ok(());
        }

        if !self.auto_take_master() {
            return Err(Error::NotValidForCurrentState(format!(
                "Your client is not currently master for Blu-Ice server '{}'.",
                self.name()
            )));
        }

        self.take_master(true)?;

        let deadline = Instant::now() + WAIT_STEP * MASTER_WAIT_STEPS;
        let mut state = self.lock();
        while !state.is_master {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::TimedOut(format!(
                    "Timed out waiting to become master of Blu-Ice server '{}'.",
                    self.name()
                )));
            }
            self.wait_changed(&mut state, (deadline - now).min(WAIT_STEP));
        }
        log::info!("[master] client is now master of '{}'", self.name());
        Ok(())
    }
}
