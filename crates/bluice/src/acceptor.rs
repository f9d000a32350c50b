// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Listener for inbound DHS hardware peers.
//!
//! ```text
//!   acceptor                                     peer
//!     | -- stoc_send_client_type (legacy) ---->   |
//!     | <- htos_client_is_hardware <name> [proto] |
//!     |    attach to the DhsClient named <name>   |
//!     | -- stoh_register_<kind> ... (framed) --> |
//! ```
//!
//! A failed handshake closes that socket and the loop keeps listening.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError};

use crate::config::{AcceptorConfig, ConfigError};
use crate::dhs::DhsClient;
use crate::error::{Error, Result};
use crate::protocol::{self, ProtocolVersion, Tokens, LEGACY_FRAME_SIZE};
use crate::transport::DeadlineReader;

/// Accept poll interval while idle.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Client type a hardware peer announces.
pub const HARDWARE_CLIENT_TYPE: &str = "htos_client_is_hardware";

/// Accepts hardware peers and routes each to its [`DhsClient`].
pub struct DhsAcceptor {
    listener: TcpListener,
    peers: Vec<Arc<DhsClient>>,
    handshake_timeout: Duration,
    shutdown: Arc<AtomicBool>,
}

impl DhsAcceptor {
    pub fn bind(config: &AcceptorConfig, peers: Vec<Arc<DhsClient>>) -> Result<Self> {
        config.validate()?;
        let handshake_timeout = config.handshake_timeout()?;
        if Instant::now().checked_add(handshake_timeout).is_none() {
            return Err(ConfigError::InvalidValue(format!(
                "handshake_timeout_secs = {} is too large",
                config.handshake_timeout_secs
            ))
            .into());
        }
        let addr = SocketAddr::new(config.bind_address, config.port);
        let listener = TcpListener::bind(addr).map_err(|e| {
            Error::NetworkIo(format!("Cannot listen for DHS peers on {}: {}", addr, e))
        })?;
        listener.set_nonblocking(true)?;
        log::info!(
            "[acceptor] listening on {} for {} peer(s)",
            listener.local_addr()?,
            peers.len()
        );

        Ok(Self {
            listener,
            peers,
            handshake_timeout,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn peers(&self) -> &[Arc<DhsClient>] {
        &self.peers
    }

    /// Flag that stops [`run`](Self::run) once set.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Accept peers on the calling thread until shut down.
    pub fn run(&self) {
        while !self.shutdown.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = self.handle_inbound(stream, addr) {
                        log::warn!("[acceptor] rejected peer {}: {}", addr, e);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    log::error!("[acceptor] accept failed: {}", e);
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }
        log::info!("[acceptor] stopped");
    }

    /// Run the accept loop on its own thread.
    pub fn spawn(self) -> Result<AcceptorHandle> {
        let shutdown = self.shutdown_flag();
        let (done_tx, done) = bounded::<()>(1);
        let thread = thread::Builder::new()
            .name("bluice-dhs-acceptor".to_string())
            .spawn(move || {
                self.run();
                let _ = done_tx.send(());
            })
            .map_err(|e| Error::FunctionFailed(format!("cannot spawn acceptor thread: {}", e)))?;

        Ok(AcceptorHandle {
            shutdown,
            done,
            thread: Some(thread),
        })
    }

    fn handle_inbound(&self, mut stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let peer = addr.to_string();
        stream.set_nonblocking(false)?;
        stream.set_write_timeout(Some(self.handshake_timeout))?;

        // The whole exchange shares one deadline.
        let started = Instant::now();
        let deadline = started + self.handshake_timeout;
        protocol::write_legacy(&mut stream, "stoc_send_client_type", LEGACY_FRAME_SIZE)?;
        let reply = protocol::read_legacy(
            &mut DeadlineReader::new(&stream, deadline),
            LEGACY_FRAME_SIZE,
        )
        .map_err(|e| Error::from_io(e, &peer))?;
        stream.set_read_timeout(None)?;
        stream.set_write_timeout(None)?;

        let (name, version) = parse_client_type(&reply)?;
        let client = self
            .peers
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| {
                Error::PermissionDenied(format!(
                    "DHS '{}' from {} is not in the roster",
                    name, addr
                ))
            })?;

        log::info!("[acceptor] {} identified as DHS '{}'", addr, name);
        client.attach(stream, version)
    }
}

impl std::fmt::Debug for DhsAcceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhsAcceptor")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("peers", &self.peers.len())
            .finish()
    }
}

/// `htos_client_is_hardware <name> [protocol]`. A missing protocol means framed.
pub fn parse_client_type(reply: &str) -> Result<(String, ProtocolVersion)> {
    let mut t = Tokens::new(reply);
    let client_type = t.required("client type")?;
    if client_type != HARDWARE_CLIENT_TYPE {
        return Err(Error::Unparseable(format!(
            "expected '{}' from hardware peer, got '{}'",
            HARDWARE_CLIENT_TYPE, reply
        )));
    }
    let name = t.required("DHS name")?.to_string();
    let version = match t.next_token() {
        Some(n) => ProtocolVersion::from_number(n.parse().map_err(|_| {
            Error::Unparseable(format!("bad protocol number '{}' in '{}'", n, reply))
        })?),
        None => ProtocolVersion::Framed,
    };
    Ok((name, version))
}

/// Running accept thread.
pub struct AcceptorHandle {
    shutdown: Arc<AtomicBool>,
    done: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl AcceptorHandle {
    /// Stop accepting and wait up to `timeout` for the thread.
    pub fn shutdown(mut self, timeout: Duration) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if thread.join().is_err() {
                    log::error!("[acceptor] thread panicked");
                }
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(Error::TimedOut(format!(
                "Timed out after {:.1} seconds waiting for the DHS acceptor to stop.",
                timeout.as_secs_f64()
            ))),
        }
    }
}

impl Drop for AcceptorHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_client_type() {
        let (name, version) = parse_client_type("htos_client_is_hardware robot 2").unwrap();
        assert_eq!(name, "robot");
        assert_eq!(version, ProtocolVersion::Framed);

        let (_, version) = parse_client_type("htos_client_is_hardware robot 1").unwrap();
        assert_eq!(version, ProtocolVersion::Legacy);

        let (_, version) = parse_client_type("htos_client_is_hardware robot").unwrap();
        assert_eq!(version, ProtocolVersion::Framed);
    }

    #[test]
    fn test_parse_client_type_rejects() {
        assert!(parse_client_type("htos_client_is_gui u s h :0").is_err());
        assert!(parse_client_type("htos_client_is_hardware").is_err());
        assert!(parse_client_type("htos_client_is_hardware robot two").is_err());
    }

    #[test]
    fn test_bind_ephemeral() {
        let config = AcceptorConfig {
            bind_address: "127.0.0.1".parse().unwrap(),
            port: 0,
            ..Default::default()
        };
        let acceptor = DhsAcceptor::bind(&config, Vec::new()).unwrap();
        assert_ne!(acceptor.local_addr().unwrap().port(), 0);

        let handle = acceptor.spawn().unwrap();
        handle.shutdown(Duration::from_secs(5)).unwrap();
    }
}
