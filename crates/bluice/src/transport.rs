// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Socket ownership and framed send/receive for one connection.
//!
//! The socket is held twice: a writer half behind the send lock and a cloned
//! reader half used only by the receive thread (or by the handshake before
//! that thread starts). Shutting the socket down through the writer half
//! unblocks a pending read, which is how a connection stops its receive loop.
//!
//! Inbound traffic is always framed. The protocol tag only selects the
//! outbound form: the client identity reply goes out as a fixed-size legacy
//! frame, everything after it as a framed message.

use std::io::{self, Read};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use socket2::{SockRef, TcpKeepalive};

use crate::error::{Error, Result};
use crate::protocol::{self, Message, ProtocolVersion, LEGACY_FRAME_SIZE};

/// Poll step used while waiting for bytes with a finite timeout.
const POLL_STEP: Duration = Duration::from_millis(10);

/// Keepalive idle time applied when keepalive is enabled.
const KEEPALIVE_IDLE: Duration = Duration::from_secs(15);

/// Reader that fails with `TimedOut` once a fixed deadline has passed.
///
/// Each read gets the time left until the deadline as its socket timeout, so
/// a peer trickling bytes cannot stretch a `read_exact` past the deadline.
pub struct DeadlineReader<'a> {
    stream: &'a TcpStream,
    deadline: Instant,
}

impl<'a> DeadlineReader<'a> {
    pub fn new(stream: &'a TcpStream, deadline: Instant) -> Self {
        Self { stream, deadline }
    }
}

impl Read for DeadlineReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "deadline passed"));
        }
        self.stream.set_read_timeout(Some(remaining))?;
        let mut stream = self.stream;
        stream.read(buf)
    }
}

/// Apply Blu-Ice socket options to a connected or accepted stream.
pub fn configure_stream(stream: &TcpStream, keepalive: bool) -> Result<()> {
    let sock = SockRef::from(stream);
    sock.set_nodelay(true)?;
    if keepalive {
        sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_IDLE))?;
    }
    Ok(())
}

/// Framed transport over one TCP socket.
pub struct Transport {
    peer: String,
    writer: Mutex<Option<TcpStream>>,
    reader: Mutex<Option<TcpStream>>,
    protocol: AtomicU8,
    receive_buffer_length: usize,
}

impl Transport {
    /// Transport for the named peer, not yet attached to a socket.
    pub fn new(peer: impl Into<String>, receive_buffer_length: usize) -> Self {
        Self {
            peer: peer.into(),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            protocol: AtomicU8::new(ProtocolVersion::Legacy as u8),
            receive_buffer_length,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn protocol(&self) -> ProtocolVersion {
        if self.protocol.load(Ordering::Acquire) >= ProtocolVersion::Framed as u8 {
            ProtocolVersion::Framed
        } else {
            ProtocolVersion::Legacy
        }
    }

    pub fn set_protocol(&self, version: ProtocolVersion) {
        self.protocol.store(version as u8, Ordering::Release);
    }

    pub fn is_attached(&self) -> bool {
        self.writer.lock().is_some()
    }

    /// Take ownership of `stream`, replacing (and shutting down) any previous socket.
    pub fn attach(&self, stream: TcpStream) -> Result<()> {
        let reader = stream
            .try_clone()
            .map_err(|e| Error::from_io(e, &self.peer))?;

        {
            let mut writer = self.writer.lock();
            if let Some(old) = writer.take() {
                let _ = old.shutdown(Shutdown::Both);
            }
            *writer = Some(stream);
        }

        // A blocked reader releases this lock once the shutdown above lands.
        *self.reader.lock() = Some(reader);
        log::debug!("[transport] attached socket for '{}'", self.peer);
        Ok(())
    }

    /// Shut the socket down without releasing it. Unblocks a pending receive.
    pub fn shutdown(&self) {
        if let Some(stream) = self.writer.lock().as_ref() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Drop the writer half. Called with no other lock held.
    pub fn release_writer(&self) {
        self.writer.lock().take();
    }

    /// Drop the reader half. Only valid once the receive thread is gone.
    pub fn release_reader(&self) {
        self.reader.lock().take();
    }

    /// Send one message in the connection's current protocol.
    pub fn send(&self, text: &str, binary: &[u8]) -> Result<()> {
        match self.protocol() {
            ProtocolVersion::Framed => {
                let mut guard = self.writer.lock();
                let stream = guard.as_mut().ok_or_else(|| self.lost())?;
                protocol::write_frame(stream, text, binary)
                    .map_err(|e| Error::from_io(e, &self.peer))?;
            }
            ProtocolVersion::Legacy => {
                if !binary.is_empty() {
                    return Err(Error::Unsupported(
                        "Binary payloads require protocol 2 or later".into(),
                    ));
                }
                self.send_legacy(text, LEGACY_FRAME_SIZE)?;
            }
        }
        log::debug!("[transport] -> {}: '{}'", self.peer, text);
        Ok(())
    }

    /// Send `text` as a protocol 1 frame of `frame_size` bytes.
    pub fn send_legacy(&self, text: &str, frame_size: usize) -> Result<()> {
        let mut guard = self.writer.lock();
        let stream = guard.as_mut().ok_or_else(|| self.lost())?;
        protocol::write_legacy(stream, text, frame_size).map_err(|e| match e {
            Error::NetworkIo(_) | Error::NetworkConnectionLost(_) | Error::TimedOut(_) => {
                Error::NetworkIo(format!(
                    "Error sending message '{}' to Blu-Ice server '{}': {}",
                    text, self.peer, e
                ))
            }
            other => other,
        })
    }

    /// Receive one message.
    ///
    /// `timeout` of `None` blocks until a message arrives. With `Some(t)` the
    /// socket is polled in 10 ms steps and `TimedOut` is returned if nothing
    /// arrived within `t`.
    pub fn receive(&self, timeout: Option<Duration>) -> Result<Message> {
        let mut guard = self.reader.lock();
        let stream = guard.as_mut().ok_or_else(|| self.lost())?;

        // An overflowing timeout means no deadline.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        if let Some(t) = timeout {
            if let Err(e) = self.wait_readable(stream, t) {
                if matches!(e, Error::NetworkConnectionLost(_)) {
                    *guard = None;
                }
                return Err(e);
            }
        }

        let result = match deadline {
            Some(deadline) => {
                let result = protocol::read_frame(
                    &mut DeadlineReader::new(stream, deadline),
                    self.receive_buffer_length,
                );
                if let Err(e) = stream.set_read_timeout(None) {
                    log::warn!("[transport] clearing read timeout for '{}': {}", self.peer, e);
                }
                result
            }
            None => protocol::read_frame(stream, self.receive_buffer_length),
        };

        match result {
            Ok(msg) => {
                if msg.truncated {
                    log::warn!(
                        "[transport] message from '{}' exceeded the {} byte receive buffer and was truncated",
                        self.peer,
                        self.receive_buffer_length
                    );
                }
                if !msg.binary.is_empty() {
                    log::warn!(
                        "[transport] binary data length from '{}' is {}, not 0",
                        self.peer,
                        msg.binary.len()
                    );
                }
                log::debug!("[transport] <- {}: '{}'", self.peer, msg.text);
                Ok(msg)
            }
            Err(e) => {
                // The stream position is unknown after a failed read.
                *guard = None;
                Err(Error::from_io(e, &self.peer))
            }
        }
    }

    fn wait_readable(&self, stream: &TcpStream, timeout: Duration) -> Result<()> {
        let attempts = ((timeout.as_secs_f64() * 1000.0 / POLL_STEP.as_millis() as f64).round()
            as u64)
            .max(1);

        stream
            .set_read_timeout(Some(POLL_STEP))
            .map_err(|e| Error::from_io(e, &self.peer))?;

        let mut peeked = [0u8; 1];
        let mut outcome = Err(Error::TimedOut(format!(
            "Timed out after waiting {:.3} seconds for a message from Blu-Ice server '{}'",
            timeout.as_secs_f64(),
            self.peer
        )));
        for _ in 0..attempts {
            match stream.peek(&mut peeked) {
                Ok(0) => {
                    outcome = Err(self.lost());
                    break;
                }
                Ok(_) => {
                    outcome = Ok(());
                    break;
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    outcome = Err(Error::from_io(e, &self.peer));
                    break;
                }
            }
        }

        stream
            .set_read_timeout(None)
            .map_err(|e| Error::from_io(e, &self.peer))?;
        outcome
    }

    fn lost(&self) -> Error {
        Error::NetworkConnectionLost(format!(
            "The connection to Blu-Ice server '{}' is not open",
            self.peer
        ))
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("peer", &self.peer)
            .field("protocol", &self.protocol())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    fn pair() -> (Transport, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        let transport = Transport::new("test", 10_000);
        transport.attach(client).unwrap();
        (transport, server)
    }

    #[test]
    fn test_unattached_transport_reports_lost() {
        let transport = Transport::new("nowhere", 100);
        assert!(matches!(
            transport.send("gtos_become_slave", &[]),
            Err(Error::NetworkConnectionLost(_))
        ));
        assert!(matches!(
            transport.receive(Some(Duration::from_millis(10))),
            Err(Error::NetworkConnectionLost(_))
        ));
    }

    #[test]
    fn test_framed_round_trip_over_socket() {
        let (transport, mut server) = pair();
        transport.set_protocol(ProtocolVersion::Framed);

        protocol::write_frame(&mut server, "stog_become_master", &[]).unwrap();
        let msg = transport.receive(Some(Duration::from_secs(2))).unwrap();
        assert_eq!(msg.text, "stog_become_master");

        transport.send("gtos_become_slave", &[]).unwrap();
        let echoed = protocol::read_frame(&mut server, 1000).unwrap();
        assert_eq!(echoed.text, "gtos_become_slave");
    }

    #[test]
    fn test_receive_times_out() {
        let (transport, _server) = pair();
        transport.set_protocol(ProtocolVersion::Framed);
        let err = transport
            .receive(Some(Duration::from_millis(50)))
            .unwrap_err();
        assert!(err.is_timeout());
        // The socket survives a timeout
        assert!(transport.is_attached());
    }

    #[test]
    fn test_partial_header_times_out() {
        let (transport, mut server) = pair();
        transport.set_protocol(ProtocolVersion::Framed);
        server.write_all(b"0000000").unwrap();

        let start = Instant::now();
        let err = transport
            .receive(Some(Duration::from_millis(200)))
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_deadline_reader_bounds_read_exact() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut server, _) = listener.accept().unwrap();
        server.write_all(b"abc").unwrap();

        let start = Instant::now();
        let mut reader = DeadlineReader::new(&client, start + Duration::from_millis(150));
        let mut buf = [0u8; 8];
        let err = reader.read_exact(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
        ));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_peer_close_is_connection_lost() {
        let (transport, server) = pair();
        transport.set_protocol(ProtocolVersion::Framed);
        drop(server);
        let err = transport.receive(Some(Duration::from_secs(2))).unwrap_err();
        assert!(matches!(err, Error::NetworkConnectionLost(_)));
    }

    #[test]
    fn test_legacy_send_is_fixed_size() {
        let (transport, mut server) = pair();
        transport.send("htos_client_is_gui u s h :0", &[]).unwrap();
        let text = protocol::read_legacy(&mut server, LEGACY_FRAME_SIZE).unwrap();
        assert_eq!(text, "htos_client_is_gui u s h :0");
    }
}
