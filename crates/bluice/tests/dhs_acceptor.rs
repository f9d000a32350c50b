// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::float_cmp)] // Test assertions with constants

//! Inbound hardware peers through the DHS acceptor.

use bluice::protocol::{self, LEGACY_FRAME_SIZE};
use bluice::{AcceptorConfig, DhsAcceptor, DhsClient, DhsConfig, MotorAdapter, MotorSettings};
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Motor adapter that records motion callbacks.
struct RecordingStage {
    settings: MotorSettings,
    motion: Mutex<Vec<(f64, bool)>>,
}

impl MotorAdapter for RecordingStage {
    fn motor_settings(&self) -> MotorSettings {
        self.settings
    }

    fn motion_changed(&self, position: f64, moving: bool) {
        self.motion.lock().unwrap().push((position, moving));
    }
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

fn acceptor_config() -> AcceptorConfig {
    AcceptorConfig {
        bind_address: "127.0.0.1".parse().unwrap(),
        port: 0,
        handshake_timeout_secs: 2.0,
        peers: Vec::new(),
    }
}

/// Connect as a hardware peer and answer the client-type request.
fn hardware_login(addr: SocketAddr, reply: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let request = protocol::read_legacy(&mut stream, LEGACY_FRAME_SIZE).unwrap();
    assert_eq!(request, "stoc_send_client_type");
    protocol::write_legacy(&mut stream, reply, LEGACY_FRAME_SIZE).unwrap();
    stream
}

fn next_text(stream: &mut TcpStream) -> String {
    protocol::read_frame(stream, 10_000).unwrap().text
}

#[test]
fn test_peer_attach_register_and_configure() {
    let robot = Arc::new(DhsClient::new(DhsConfig::named("robot")));
    let stage = Arc::new(RecordingStage {
        settings: MotorSettings {
            position: 1.5,
            upper_limit: 10.0,
            lower_limit: -10.0,
            scale_factor: 200.0,
            speed: 5.0,
            ..Default::default()
        },
        motion: Mutex::new(Vec::new()),
    });
    let adapter: Arc<dyn MotorAdapter> = stage.clone();
    robot.register_motor("sample_x", &adapter).unwrap();
    robot.start().unwrap();

    let acceptor = DhsAcceptor::bind(&acceptor_config(), vec![Arc::clone(&robot)]).unwrap();
    let addr = acceptor.local_addr().unwrap();
    let handle = acceptor.spawn().unwrap();

    let mut peer = hardware_login(addr, "htos_client_is_hardware robot 2");
    assert_eq!(next_text(&mut peer), "stoh_register_real_motor sample_x robot");
    assert!(wait_until(|| robot.is_attached()));

    protocol::write_frame(&mut peer, "htos_send_configuration sample_x", &[]).unwrap();
    assert_eq!(
        next_text(&mut peer),
        "stoh_configure_real_motor sample_x robot sample_x 1.5 10 -10 200 5 0 0 0 0 0 0 0"
    );

    protocol::write_frame(&mut peer, "htos_update_motor_position sample_x 2.25", &[]).unwrap();
    protocol::write_frame(&mut peer, "htos_motor_move_completed sample_x 3 normal", &[]).unwrap();
    assert!(wait_until(|| stage.motion.lock().unwrap().len() == 2));
    assert_eq!(
        *stage.motion.lock().unwrap(),
        vec![(2.25, true), (3.0, false)]
    );

    handle.shutdown(Duration::from_secs(5)).unwrap();
    robot.close().unwrap();
}

#[test]
fn test_unknown_peer_rejected_and_loop_survives() {
    let detector = Arc::new(DhsClient::new(DhsConfig::named("detector")));
    detector.register_operation("collectFrame").unwrap();

    let acceptor = DhsAcceptor::bind(&acceptor_config(), vec![Arc::clone(&detector)]).unwrap();
    let addr = acceptor.local_addr().unwrap();
    let handle = acceptor.spawn().unwrap();

    // Not in the roster: the acceptor hangs up
    let mut stranger = hardware_login(addr, "htos_client_is_hardware stranger 2");
    assert!(protocol::read_frame(&mut stranger, 10_000).is_err());

    // Wrong client type
    let mut gui = hardware_login(addr, "htos_client_is_gui user sid host :0");
    assert!(protocol::read_frame(&mut gui, 10_000).is_err());

    // A silent peer times out without blocking the next one for long
    let silent = TcpStream::connect(addr).unwrap();

    let mut peer = hardware_login(addr, "htos_client_is_hardware detector");
    assert_eq!(
        next_text(&mut peer),
        "stoh_register_operation collectFrame detector"
    );
    assert!(detector.is_attached());

    drop(silent);
    handle.shutdown(Duration::from_secs(5)).unwrap();
}

#[test]
fn test_reattach_replaces_socket() {
    let robot = Arc::new(DhsClient::new(DhsConfig::named("robot")));
    robot.register_string("robot_state", "idle").unwrap();
    robot.start().unwrap();

    let acceptor = DhsAcceptor::bind(&acceptor_config(), vec![Arc::clone(&robot)]).unwrap();
    let addr = acceptor.local_addr().unwrap();
    let handle = acceptor.spawn().unwrap();

    let mut first = hardware_login(addr, "htos_client_is_hardware robot 2");
    assert_eq!(next_text(&mut first), "stoh_register_string robot_state robot");

    let mut second = hardware_login(addr, "htos_client_is_hardware robot 2");
    assert_eq!(next_text(&mut second), "stoh_register_string robot_state robot");

    // The old socket was shut down by the re-attach
    assert!(protocol::read_frame(&mut first, 10_000).is_err());

    protocol::write_frame(&mut second, "htos_set_string_completed robot_state robot busy", &[])
        .unwrap();
    let h = robot
        .connection()
        .find(bluice::DeviceKind::String, "robot_state")
        .unwrap();
    assert!(wait_until(|| {
        robot
            .connection()
            .with_device(h, |d| d.string().unwrap().contents.clone())
            .unwrap()
            == "busy"
    }));

    handle.shutdown(Duration::from_secs(5)).unwrap();
    robot.close().unwrap();
}

#[test]
fn test_trickling_peer_does_not_hold_the_loop() {
    let robot = Arc::new(DhsClient::new(DhsConfig::named("robot")));
    robot.register_operation("mountSample").unwrap();
    robot.start().unwrap();

    let config = AcceptorConfig {
        handshake_timeout_secs: 0.5,
        ..acceptor_config()
    };
    let acceptor = DhsAcceptor::bind(&config, vec![Arc::clone(&robot)]).unwrap();
    let addr = acceptor.local_addr().unwrap();
    let handle = acceptor.spawn().unwrap();

    // One byte every 300 ms would take a minute to fill the reply frame
    let slow = thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        protocol::read_legacy(&mut stream, LEGACY_FRAME_SIZE).unwrap();
        for byte in b"htos_client_is_hardware robot 2" {
            if stream.write_all(&[*byte]).is_err() {
                break;
            }
            thread::sleep(Duration::from_millis(300));
        }
    });
    thread::sleep(Duration::from_millis(100));

    let start = Instant::now();
    let mut peer = hardware_login(addr, "htos_client_is_hardware robot 2");
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(
        next_text(&mut peer),
        "stoh_register_operation mountSample robot"
    );

    slow.join().unwrap();
    handle.shutdown(Duration::from_secs(5)).unwrap();
    robot.close().unwrap();
}
