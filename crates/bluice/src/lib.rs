// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # bluice - Blu-Ice beamline control protocol engine
//!
//! Client and server sides of the Blu-Ice protocol spoken between beamline
//! GUIs, the DCSS coordinator and DHS hardware servers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bluice::{DcssClient, DcssConfig, DeviceKind, Result};
//! use std::time::Duration;
//!
//! fn main() -> Result<()> {
//!     let config = DcssConfig {
//!         host: "bl12-dcss".into(),
//!         auto_take_master: true,
//!         ..Default::default()
//!     };
//!     let client = DcssClient::connect(config)?;
//!     let conn = client.connection();
//!
//!     conn.wait_for_initialization("gonio_phi", DeviceKind::Motor, Duration::from_secs(5))?;
//!     conn.start_motor_move("gonio_phi", 90.0)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------+
//! |   DcssClient            DhsClient  <----  DhsAcceptor         |
//! +---------------------------------------------------------------+
//! |   Connection: registry lock + condvar, master arbitration,    |
//! |   outbound commands, receive thread + dispatch table          |
//! +---------------------------------------------------------------+
//! |   Transport: send lock, framed (protocol 2) / legacy (1)      |
//! +---------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`protocol`] - frame codec and message tokens
//! - [`transport`] - socket ownership and timed receive
//! - [`registry`] - foreign device entries
//! - [`connection`] - shared state and blocking waits
//! - [`dcss`], [`dhs`], [`acceptor`] - the three connection endpoints
//! - [`config`] - JSON configuration

pub mod acceptor;
pub mod auth;
pub mod commands;
pub mod config;
pub mod connection;
pub mod dcss;
pub mod dhs;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod handshake;
mod master;
pub mod monitor;
pub mod operation;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use acceptor::{AcceptorHandle, DhsAcceptor};
pub use commands::AbortMode;
pub use config::{AcceptorConfig, ConfigError, DcssConfig, DhsConfig};
pub use connection::{Connection, Role, SharedState};
pub use dcss::{ClientState, DcssClient};
pub use dhs::DhsClient;
pub use error::{Error, Result};
pub use handshake::ClientIdentity;
pub use master::MASTER_WAIT_STEPS;
pub use operation::{OperationEvent, OperationHandle, OperationState};
pub use protocol::{Message, ProtocolVersion};
pub use registry::{
    DeviceHandle, DeviceKind, ForeignDevice, MotorAdapter, MotorSettings, Registry,
    ShutterStatus,
};
