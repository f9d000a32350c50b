// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Blu-Ice wire protocol: framing and message text.

pub mod frame;
pub mod message;

pub use frame::{
    decode_header, encode_header, read_frame, read_header, read_legacy, write_frame,
    write_legacy, FrameHeader, Message, DEFAULT_RECEIVE_BUFFER, HEADER_SIZE, LEGACY_FRAME_LIMIT,
    LEGACY_FRAME_SIZE,
};
pub use message::{verb, MessageType, Tokens};

/// Protocol generation spoken on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProtocolVersion {
    /// Fixed-size text frames, handshake only.
    Legacy = 1,
    /// Length-prefixed frames.
    Framed = 2,
}

impl ProtocolVersion {
    /// Map a version number announced by a peer. Anything above 1 is framed.
    pub fn from_number(n: u32) -> Self {
        if n >= 2 {
            Self::Framed
        } else {
            Self::Legacy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_version_from_number() {
        assert_eq!(ProtocolVersion::from_number(0), ProtocolVersion::Legacy);
        assert_eq!(ProtocolVersion::from_number(1), ProtocolVersion::Legacy);
        assert_eq!(ProtocolVersion::from_number(2), ProtocolVersion::Framed);
        assert_eq!(ProtocolVersion::from_number(3), ProtocolVersion::Framed);
    }
}
