// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message text helpers: type prefixes and a whitespace tokenizer.

use crate::error::{Error, Result};

/// Direction prefix carried by every verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// GUI client to server.
    Gtos,
    /// Server to GUI client.
    Stog,
    /// Hardware peer to server.
    Htos,
    /// Server to hardware peer.
    Stoh,
    /// Server to any client (handshake request).
    Stoc,
}

impl MessageType {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Gtos => "gtos",
            Self::Stog => "stog",
            Self::Htos => "htos",
            Self::Stoh => "stoh",
            Self::Stoc => "stoc",
        }
    }

    /// Classify a message by its first four characters.
    pub fn of(text: &str) -> Result<Self> {
        match text.get(..4) {
            Some("gtos") => Ok(Self::Gtos),
            Some("stog") => Ok(Self::Stog),
            Some("htos") => Ok(Self::Htos),
            Some("stoh") => Ok(Self::Stoh),
            Some("stoc") => Ok(Self::Stoc),
            _ => Err(Error::IllegalMessageType(format!(
                "Message '{}' does not start with a known type prefix",
                text
            ))),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

/// First whitespace-delimited word of a message.
pub fn verb(text: &str) -> &str {
    text.split_whitespace().next().unwrap_or("")
}

/// Cursor over the whitespace-separated tokens of a message.
#[derive(Debug, Clone)]
pub struct Tokens<'a> {
    line: &'a str,
    rest: &'a str,
}

impl<'a> Tokens<'a> {
    pub fn new(line: &'a str) -> Self {
        Self { line, rest: line }
    }

    /// Next token, or `None` at the end of the line.
    pub fn next_token(&mut self) -> Option<&'a str> {
        let trimmed = self.rest.trim_start();
        if trimmed.is_empty() {
            self.rest = trimmed;
            return None;
        }
        let end = trimmed
            .find(char::is_whitespace)
            .unwrap_or(trimmed.len());
        let (tok, rest) = trimmed.split_at(end);
        self.rest = rest;
        Some(tok)
    }

    /// Next token, failing with `Unparseable` when the line ran out.
    pub fn required(&mut self, what: &str) -> Result<&'a str> {
        self.next_token().ok_or_else(|| {
            Error::Unparseable(format!("Missing {} in message '{}'", what, self.line))
        })
    }

    /// Next token parsed as `T`.
    pub fn parse<T: std::str::FromStr>(&mut self, what: &str) -> Result<T> {
        let tok = self.required(what)?;
        tok.parse::<T>().map_err(|_| {
            Error::Unparseable(format!(
                "Cannot parse {} '{}' in message '{}'",
                what, tok, self.line
            ))
        })
    }

    /// Next token read as a 0/1 flag.
    pub fn flag(&mut self, what: &str) -> Result<bool> {
        Ok(self.parse::<i64>(what)? != 0)
    }

    /// Everything after the current position with leading blanks removed.
    pub fn rest(&self) -> &'a str {
        self.rest.trim_start()
    }

    /// Number of tokens not yet consumed.
    pub fn remaining(&self) -> usize {
        self.rest.split_whitespace().count()
    }

    /// The whole message this cursor was built from.
    pub fn line(&self) -> &'a str {
        self.line
    }
}
