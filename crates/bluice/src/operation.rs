// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Operation handles and lifecycle.
//!
//! ```text
//! Idle -> Started -> Updated* -> { Completed | Error | NetworkError }
//! ```
//!
//! Transitions come only from inbound verbs (and a lost connection for
//! `NetworkError`). Once an operation reaches a terminal state its handle is
//! spent: a later update or completion for the same handle is rejected, and
//! only a fresh start reopens the entry as a new operation.

use crate::error::{Error, Result};
use crate::registry::ForeignOperation;

/// `client.counter` pair identifying one operation instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct OperationHandle {
    pub client: u64,
    pub counter: u64,
}

impl OperationHandle {
    pub fn new(client: u64, counter: u64) -> Self {
        Self { client, counter }
    }
}

impl std::str::FromStr for OperationHandle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (client, counter) = s.split_once('.').ok_or_else(|| {
            Error::Unparseable(format!("Operation handle '{}' is not of the form client.counter", s))
        })?;
        let client = client
            .parse()
            .map_err(|_| Error::Unparseable(format!("Bad client number in handle '{}'", s)))?;
        let counter = counter
            .parse()
            .map_err(|_| Error::Unparseable(format!("Bad counter in handle '{}'", s)))?;
        Ok(Self { client, counter })
    }
}

impl std::fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.client, self.counter)
    }
}

/// Lifecycle state of an operation entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OperationState {
    #[default]
    Idle,
    Started,
    Updated,
    Completed,
    Error,
    NetworkError,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::NetworkError)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Started | Self::Updated)
    }
}

/// Inbound operation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationEvent {
    Start,
    Update,
    Complete,
}

impl OperationEvent {
    fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Update => "update",
            Self::Complete => "completion",
        }
    }
}

/// Apply an inbound event to an operation entry.
///
/// `arguments` is everything after the handle on the message line. A
/// completion whose first argument is `normal` ends in `Completed`, any other
/// completion in `Error`.
pub fn apply_event(
    op: &mut ForeignOperation,
    name: &str,
    event: OperationEvent,
    handle: OperationHandle,
    arguments: &str,
) -> Result<OperationState> {
    let same_handle = op.handle == handle;

    if same_handle && op.state.is_terminal() && event != OperationEvent::Start {
        return Err(Error::NotValidForCurrentState(format!(
            "Operation '{}' handle {} already finished in state {:?}; ignoring {}",
            name,
            handle,
            op.state,
            event.as_str()
        )));
    }

    let next = match event {
        OperationEvent::Start => OperationState::Started,
        OperationEvent::Update => OperationState::Updated,
        OperationEvent::Complete => {
            if arguments.split_whitespace().next() == Some("normal") {
                OperationState::Completed
            } else {
                OperationState::Error
            }
        }
    };

    op.handle = handle;
    op.state = next;
    op.arguments.clear();
    op.arguments.push_str(arguments.trim());
    Ok(next)
}
