// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receive thread.
//!
//! Once a connection is running, this thread is the only reader of its
//! socket. It decodes one message at a time and hands it to the role's
//! dispatch table, so messages on one connection are applied in arrival
//! order. Handler failures are logged and the loop moves on.
//!
//! Loss handling differs by role:
//! - DCSS: in-flight operations become `NetworkError` and the thread exits
//! - DHS: the thread idles until the acceptor attaches a new socket

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError};

use crate::connection::{Connection, Role};
use crate::dispatch::DispatchTable;
use crate::error::{Error, Result};
use crate::operation::OperationState;
use crate::registry::DeviceKind;

/// Idle period of a DHS receive loop without a peer socket.
const DETACHED_POLL: Duration = Duration::from_millis(100);

/// Handle to a running receive thread.
pub struct Monitor {
    stop: Arc<AtomicBool>,
    done: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl Monitor {
    /// Start the receive thread for `conn`.
    pub fn spawn(conn: Arc<Connection>, table: &'static DispatchTable) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done) = bounded::<()>(1);

        let stop_flag = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name(format!("bluice-{}-monitor", conn.role().tag()))
            .spawn(move || {
                receive_loop(&conn, table, &stop_flag);
                let _ = done_tx.send(());
            })
            .map_err(|e| Error::FunctionFailed(format!("cannot spawn receive thread: {}", e)))?;

        Ok(Self {
            stop,
            done,
            thread: Some(thread),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |t| !t.is_finished())
    }

    /// Stop the thread and wait up to `timeout` for it to exit.
    ///
    /// The socket is shut down (not released) so a blocked read returns.
    pub fn stop(&mut self, conn: &Connection, timeout: Duration) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };

        self.stop.store(true, Ordering::SeqCst);
        conn.transport().shutdown();

        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if thread.join().is_err() {
                    log::error!(
                        "[{}] receive thread for '{}' panicked",
                        conn.role().tag(),
                        conn.name()
                    );
                }
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(Error::TimedOut(format!(
                "Timed out after {:.1} seconds waiting for the receive thread of \
                 Blu-Ice server '{}' to stop.",
                timeout.as_secs_f64(),
                conn.name()
            ))),
        }
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("running", &self.is_running())
            .finish()
    }
}

fn receive_loop(conn: &Connection, table: &DispatchTable, stop: &AtomicBool) {
    let tag = conn.role().tag();
    log::debug!("[{}] receive loop started for '{}'", tag, conn.name());

    while !stop.load(Ordering::SeqCst) {
        let msg = match conn.transport().receive(None) {
            Ok(msg) => msg,
            Err(e) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                match conn.role() {
                    Role::Dcss => {
                        log::error!("[{}] receive from '{}' failed: {}", tag, conn.name(), e);
                        fail_in_flight_operations(conn);
                        break;
                    }
                    Role::Dhs => {
                        if !matches!(e, Error::NetworkConnectionLost(_)) {
                            log::warn!("[{}] receive from '{}' failed: {}", tag, conn.name(), e);
                        }
                        thread::sleep(DETACHED_POLL);
                        continue;
                    }
                }
            }
        };

        if msg.text.is_empty() {
            continue;
        }

        if let Err(e) = table.dispatch(conn, &msg.text) {
            if e.is_quiet() {
                log::debug!("[{}] '{}': {}", tag, msg.text, e);
            } else {
                log::error!(
                    "[{}] error handling '{}' from '{}': {}",
                    tag,
                    msg.text,
                    conn.name(),
                    e
                );
            }
        }
    }

    log::debug!("[{}] receive loop for '{}' exiting", tag, conn.name());
}

fn fail_in_flight_operations(conn: &Connection) {
    conn.update(|state| {
        let handles: Vec<_> = state
            .registry
            .iter(DeviceKind::Operation)
            .filter(|(_, d)| d.operation().map_or(false, |o| o.state.is_in_flight()))
            .map(|(h, _)| h)
            .collect();
        for h in handles {
            if let Some(op) = state.registry.get_mut(h).and_then(|d| d.operation_mut()) {
                op.state = OperationState::NetworkError;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{self, ProtocolVersion};
    use std::net::{TcpListener, TcpStream};
    use std::sync::OnceLock;
    use std::time::Instant;

    fn table() -> &'static DispatchTable {
        static TABLE: OnceLock<DispatchTable> = OnceLock::new();
        TABLE.get_or_init(|| {
            DispatchTable::new("test")
                .handle("stog_become_master", crate::handlers::become_master)
                .handle("stog_start_operation", crate::handlers::start_operation)
        })
    }

    fn running(role: Role) -> (Arc<Connection>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        let conn = Arc::new(Connection::new("peer", role, 1000, false));
        conn.update(|s| s.is_authenticated = true);
        conn.transport().attach(client).unwrap();
        conn.transport().set_protocol(ProtocolVersion::Framed);
        (conn, server)
    }

    fn wait_until(mut f: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_loop_dispatches_in_order_and_stops() {
        let (conn, mut server) = running(Role::Dcss);
        let mut monitor = Monitor::spawn(Arc::clone(&conn), table()).unwrap();

        protocol::write_frame(&mut server, "stog_unknown_thing 1", &[]).unwrap();
        protocol::write_frame(&mut server, "stog_become_master", &[]).unwrap();
        assert!(wait_until(|| conn.is_master()));

        monitor.stop(&conn, Duration::from_secs(5)).unwrap();
        assert!(!monitor.is_running());
    }

    #[test]
    fn test_dcss_loss_marks_operations() {
        let (conn, mut server) = running(Role::Dcss);
        let monitor = Monitor::spawn(Arc::clone(&conn), table()).unwrap();

        protocol::write_frame(&mut server, "stog_start_operation OP1 1.1", &[]).unwrap();
        assert!(wait_until(|| conn.find(DeviceKind::Operation, "OP1").is_ok()));
        drop(server);

        let h = conn.find(DeviceKind::Operation, "OP1").unwrap();
        assert!(wait_until(|| {
            conn.with_device(h, |d| d.operation().unwrap().state).unwrap()
                == OperationState::NetworkError
        }));
        assert!(wait_until(|| !monitor.is_running()));
    }

    #[test]
    fn test_dhs_loop_survives_detached_socket() {
        let conn = Arc::new(Connection::new("dhs", Role::Dhs, 1000, false));
        let mut monitor = Monitor::spawn(Arc::clone(&conn), table()).unwrap();
        thread::sleep(Duration::from_millis(250));
        assert!(monitor.is_running());
        monitor.stop(&conn, Duration::from_secs(5)).unwrap();
    }
}
