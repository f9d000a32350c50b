// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire framing for both protocol generations.
//!
//! Protocol 2+ frame:
//! ```text
//! +--------------+---------------+-----+----------------------+-------------+
//! | text len (12)| binary len(13)| NUL | text bytes ... NUL   | binary ...  |
//! +--------------+---------------+-----+----------------------+-------------+
//! ```
//! Both length fields are ASCII decimal, zero-padded. The text length counts
//! the trailing NUL.
//!
//! Protocol 1 frame: the text alone, NUL-padded to a fixed size. Only used
//! for the client-type exchange during the handshake.

use std::io::{self, Read, Write};

use crate::error::{Error, Result};

/// Width of the text-length field.
pub const TEXT_LENGTH_FIELD: usize = 12;
/// Width of the binary-length field.
pub const BINARY_LENGTH_FIELD: usize = 13;
/// Full header size including the terminating NUL.
pub const HEADER_SIZE: usize = TEXT_LENGTH_FIELD + BINARY_LENGTH_FIELD + 1;

/// Legacy frame size used for the client-type reply.
pub const LEGACY_FRAME_SIZE: usize = 200;
/// Largest legacy frame anyone may ask for.
pub const LEGACY_FRAME_LIMIT: usize = 500;

/// Default scratch buffer for received text.
pub const DEFAULT_RECEIVE_BUFFER: usize = 10_000;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Text length on the wire, NUL included.
    pub text_length: usize,
    pub binary_length: usize,
}

/// One received message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Text with the NUL terminator and any trailing padding removed.
    pub text: String,
    pub binary: Vec<u8>,
    /// The body did not fit in the receive buffer and was cut short.
    pub truncated: bool,
}

/// Encode a frame header for a text body of `text_length` bytes (NUL included).
pub fn encode_header(text_length: usize, binary_length: usize) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    let fields = format!(
        "{:0tw$}{:0bw$}",
        text_length,
        binary_length,
        tw = TEXT_LENGTH_FIELD,
        bw = BINARY_LENGTH_FIELD
    );
    let bytes = fields.as_bytes();
    let n = bytes.len().min(HEADER_SIZE - 1);
    header[..n].copy_from_slice(&bytes[..n]);
    header
}

fn parse_length_field(field: &[u8], what: &str) -> Result<usize> {
    let text = std::str::from_utf8(field)
        .map_err(|_| Error::Unparseable(format!("{} length field is not ASCII", what)))?;
    let trimmed = text.trim_matches(|c: char| c == ' ' || c == '\0');
    if trimmed.is_empty() {
        return Ok(0);
    }
    trimmed.parse::<usize>().map_err(|_| {
        Error::Unparseable(format!("{} length field '{}' is not a number", what, trimmed))
    })
}

/// Decode a 26-byte frame header.
pub fn decode_header(header: &[u8; HEADER_SIZE]) -> Result<FrameHeader> {
    let text_length = parse_length_field(&header[..TEXT_LENGTH_FIELD], "text")?;
    let binary_length = parse_length_field(
        &header[TEXT_LENGTH_FIELD..TEXT_LENGTH_FIELD + BINARY_LENGTH_FIELD],
        "binary",
    )?;
    Ok(FrameHeader {
        text_length,
        binary_length,
    })
}

/// Write one protocol 2+ frame.
pub fn write_frame<W: Write>(w: &mut W, text: &str, binary: &[u8]) -> io::Result<()> {
    let header = encode_header(text.len() + 1, binary.len());
    let mut buf = Vec::with_capacity(HEADER_SIZE + text.len() + 1 + binary.len());
    buf.extend_from_slice(&header);
    buf.extend_from_slice(text.as_bytes());
    buf.push(0);
    buf.extend_from_slice(binary);
    w.write_all(&buf)?;
    w.flush()
}

/// Write one protocol 1 frame of exactly `frame_size` bytes.
pub fn write_legacy<W: Write>(w: &mut W, text: &str, frame_size: usize) -> Result<()> {
    if frame_size > LEGACY_FRAME_LIMIT {
        return Err(Error::WouldExceedLimit(format!(
            "Legacy message length {} exceeds the maximum of {} bytes",
            frame_size, LEGACY_FRAME_LIMIT
        )));
    }
    if text.len() >= frame_size {
        return Err(Error::WouldExceedLimit(format!(
            "Message '{}' does not fit in a {} byte legacy frame",
            text, frame_size
        )));
    }
    let mut buf = vec![0u8; frame_size];
    buf[..text.len()].copy_from_slice(text.as_bytes());
    w.write_all(&buf)?;
    w.flush()?;
    Ok(())
}

/// Read and decode a frame header.
pub fn read_header<R: Read>(r: &mut R) -> io::Result<FrameHeader> {
    let mut header = [0u8; HEADER_SIZE];
    r.read_exact(&mut header)?;
    decode_header(&header).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

fn text_from_bytes(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn drain<R: Read>(r: &mut R, mut remaining: usize) -> io::Result<()> {
    let mut scratch = [0u8; 512];
    while remaining > 0 {
        let n = remaining.min(scratch.len());
        r.read_exact(&mut scratch[..n])?;
        remaining -= n;
    }
    Ok(())
}

/// Read one protocol 2+ frame.
///
/// Text and binary share a budget of `limit` bytes, text first. Whatever does
/// not fit is read and discarded so the next frame starts on a header.
pub fn read_frame<R: Read>(r: &mut R, limit: usize) -> io::Result<Message> {
    let header = read_header(r)?;
    let keep_text = header.text_length.min(limit);
    let keep_binary = header.binary_length.min(limit - keep_text);

    let mut text = vec![0u8; keep_text];
    r.read_exact(&mut text)?;
    drain(r, header.text_length - keep_text)?;

    let mut binary = vec![0u8; keep_binary];
    r.read_exact(&mut binary)?;
    drain(r, header.binary_length - keep_binary)?;

    Ok(Message {
        text: text_from_bytes(&text),
        binary,
        truncated: keep_text < header.text_length || keep_binary < header.binary_length,
    })
}

/// Read one protocol 1 frame of `frame_size` bytes.
pub fn read_legacy<R: Read>(r: &mut R, frame_size: usize) -> io::Result<String> {
    let mut buf = vec![0u8; frame_size];
    r.read_exact(&mut buf)?;
    Ok(text_from_bytes(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_header_layout() {
        let header = encode_header(24, 0);
        assert_eq!(header.len(), 26);
        assert_eq!(&header[..12], b"000000000024");
        assert_eq!(&header[12..25], b"0000000000000");
        assert_eq!(header[25], 0);
    }

    #[test]
    fn test_decode_header_accepts_space_padding() {
        let mut header = [0u8; HEADER_SIZE];
        header[..12].copy_from_slice(b"          42");
        header[12..25].copy_from_slice(b"            7");
        let decoded = decode_header(&header).unwrap();
        assert_eq!(decoded.text_length, 42);
        assert_eq!(decoded.binary_length, 7);
    }

    #[test]
    fn test_decode_header_rejects_garbage() {
        let mut header = [b' '; HEADER_SIZE];
        header[..12].copy_from_slice(b"stog_confi  ");
        assert!(matches!(decode_header(&header), Err(Error::Unparseable(_))));
    }

    #[test]
    fn test_frame_text_round_trip() {
        let text = "gtos_start_motor_move M1 12.5";
        let mut wire = Vec::new();
        write_frame(&mut wire, text, &[]).unwrap();
        assert_eq!(wire.len(), HEADER_SIZE + text.len() + 1);

        let msg = read_frame(&mut Cursor::new(wire), DEFAULT_RECEIVE_BUFFER).unwrap();
        assert_eq!(msg.text, text);
        assert!(msg.binary.is_empty());
        assert!(!msg.truncated);
    }

    #[test]
    fn test_oversize_text_is_truncated_and_drained() {
        let long = "x".repeat(64);
        let mut wire = Vec::new();
        write_frame(&mut wire, &long, &[]).unwrap();
        write_frame(&mut wire, "stog_become_master", &[]).unwrap();

        let mut cursor = Cursor::new(wire);
        let first = read_frame(&mut cursor, 16).unwrap();
        assert!(first.truncated);
        assert_eq!(first.text.len(), 16);

        // Framing survives the truncation
        let second = read_frame(&mut cursor, 16).unwrap();
        assert_eq!(second.text, "stog_become_mast");
    }

    #[test]
    fn test_binary_shares_the_receive_budget() {
        let mut wire = Vec::new();
        write_frame(&mut wire, "stog_data", &[7u8; 40]).unwrap();
        write_frame(&mut wire, "stog_note done", &[]).unwrap();

        let mut cursor = Cursor::new(wire);
        let first = read_frame(&mut cursor, 20).unwrap();
        assert!(first.truncated);
        assert_eq!(first.text, "stog_data");
        assert_eq!(first.binary.len(), 10);

        let second = read_frame(&mut cursor, 20).unwrap();
        assert_eq!(second.text, "stog_note done");
        assert!(!second.truncated);
    }

    #[test]
    fn test_huge_binary_length_is_not_allocated() {
        let mut wire = Vec::new();
        wire.extend_from_slice(b"000000000005");
        wire.extend_from_slice(b"9999999999999");
        wire.push(0);
        wire.extend_from_slice(b"stog\0");

        let err = read_frame(&mut Cursor::new(wire), DEFAULT_RECEIVE_BUFFER).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_binary_payload_is_read() {
        let mut wire = Vec::new();
        write_frame(&mut wire, "stog_data", &[1, 2, 3]).unwrap();
        let msg = read_frame(&mut Cursor::new(wire), 100).unwrap();
        assert_eq!(msg.binary, vec![1, 2, 3]);
    }

    #[test]
    fn test_legacy_frame_padding() {
        let mut wire = Vec::new();
        write_legacy(&mut wire, "stoc_send_client_type", LEGACY_FRAME_SIZE).unwrap();
        assert_eq!(wire.len(), LEGACY_FRAME_SIZE);
        assert!(wire[21..].iter().all(|&b| b == 0));

        let text = read_legacy(&mut Cursor::new(wire), LEGACY_FRAME_SIZE).unwrap();
        assert_eq!(text, "stoc_send_client_type");
    }

    #[test]
    fn test_legacy_limit() {
        let mut wire = Vec::new();
        let err = write_legacy(&mut wire, "htos_client_is_gui", 501).unwrap_err();
        assert!(matches!(err, Error::WouldExceedLimit(_)));
        assert!(wire.is_empty());
    }
}
