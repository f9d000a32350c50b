// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Verb to handler tables for the receive loops.

use std::collections::HashMap;

use crate::connection::Connection;
use crate::error::Result;
use crate::protocol::{verb, MessageType};

/// Handler for one inbound verb. Receives the whole message text.
pub type Handler = fn(&Connection, &str) -> Result<()>;

/// What happened to a dispatched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A handler ran.
    Handled,
    /// The verb is known and intentionally ignored.
    Ignored,
    /// The verb is not in the table.
    Unknown,
}

/// Immutable verb table. Built once per role.
pub struct DispatchTable {
    tag: &'static str,
    handlers: HashMap<&'static str, Option<Handler>>,
}

impl DispatchTable {
    pub fn new(tag: &'static str) -> Self {
        Self {
            tag,
            handlers: HashMap::new(),
        }
    }

    pub fn handle(mut self, verb: &'static str, handler: Handler) -> Self {
        self.handlers.insert(verb, Some(handler));
        self
    }

    pub fn ignore(mut self, verb: &'static str) -> Self {
        self.handlers.insert(verb, None);
        self
    }

    pub fn contains(&self, verb: &str) -> bool {
        self.handlers.contains_key(verb)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Route one message to its handler. A message without a known type
    /// prefix is rejected with `IllegalMessageType`.
    pub fn dispatch(&self, conn: &Connection, text: &str) -> Result<Dispatch> {
        MessageType::of(text)?;
        let verb = verb(text);
        match self.handlers.get(verb) {
            Some(Some(handler)) => {
                handler(conn, text)?;
                Ok(Dispatch::Handled)
            }
            Some(None) => {
                log::debug!("[{}] ignoring '{}'", self.tag, verb);
                Ok(Dispatch::Ignored)
            }
            None => {
                log::warn!(
                    "[{}] unrecognized message '{}' from Blu-Ice server '{}'",
                    self.tag,
                    text,
                    conn.name()
                );
                Ok(Dispatch::Unknown)
            }
        }
    }
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut verbs: Vec<_> = self.handlers.keys().collect();
        verbs.sort();
        f.debug_struct("DispatchTable")
            .field("tag", &self.tag)
            .field("verbs", &verbs)
            .finish()
    }
}
