// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! bluicectl: command-line client for a Blu-Ice DCSS.
//!
//! ```bash
//! bluicectl --host bl12-dcss devices
//! bluicectl --host bl12-dcss move gonio_phi 90
//! bluicectl --host bl12-dcss master take
//! bluicectl --host bl12-dcss operation collectFrame 0 img1 /data
//! ```

use bluice::registry::DeviceState;
use bluice::{Connection, DcssClient, DcssConfig, DeviceKind, OperationState};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing::Level;

/// Command-line client for a Blu-Ice DCSS
#[derive(Parser, Debug)]
#[command(name = "bluicectl")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// DCSS host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// DCSS GUI port
    #[arg(short, long, default_value = "14242")]
    port: u16,

    /// User name (default: login name)
    #[arg(short, long)]
    user: Option<String>,

    /// Session id presented at login
    #[arg(long, default_value = "")]
    session: String,

    /// Configuration file (JSON format); overrides host, port, user and session
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the devices the DCSS has configured
    Devices {
        /// Seconds to let configuration messages arrive
        #[arg(long, default_value = "2.0")]
        settle: f64,
    },
    /// Move a motor and wait for it to stop
    Move {
        motor: String,
        position: f64,
        /// Seconds to wait for the move to complete
        #[arg(long, default_value = "60")]
        timeout: f64,
    },
    /// Take or release master
    Master { action: MasterAction },
    /// Start an operation and wait for its completion
    Operation {
        name: String,
        args: Vec<String>,
        /// Seconds to wait for completion
        #[arg(long, default_value = "60")]
        timeout: f64,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum MasterAction {
    Take,
    Release,
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Seconds the client waits for a device to be configured before commanding it.
const CONFIGURE_WAIT: Duration = Duration::from_secs(5);

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    done()
}

fn describe(state: &DeviceState) -> String {
    match state {
        DeviceState::Motor(m) => format!(
            "{} {} [{}, {}]{}",
            if m.is_pseudo { "pseudo" } else { "real" },
            m.settings.position,
            m.settings.lower_limit,
            m.settings.upper_limit,
            if m.move_in_progress { " moving" } else { "" }
        ),
        DeviceState::IonChamber(ic) => format!(
            "{} ch{} timer {} value {}",
            ic.counter_name, ic.channel_number, ic.timer_name, ic.value
        ),
        DeviceState::Shutter(s) => format!("{:?}", s.status).to_lowercase(),
        DeviceState::Operation(op) => format!("{:?} {}", op.state, op.handle),
        DeviceState::String(s) => format!("'{}'", s.contents),
    }
}

fn list_devices(conn: &Connection, settle: f64) {
    thread::sleep(Duration::from_secs_f64(settle.max(0.0)));
    let state = conn.lock();
    for kind in DeviceKind::ALL {
        let entries: Vec<_> = state.registry.iter(kind).collect();
        if entries.is_empty() {
            continue;
        }
        println!("{} ({}):", kind, entries.len());
        for (_, dev) in entries {
            println!(
                "  {:24} {:12} {}{}",
                dev.name(),
                dev.dhs_server_name,
                describe(&dev.state),
                if dev.initialized { "" } else { " (unconfigured)" }
            );
        }
    }
}

fn move_motor(conn: &Connection, motor: &str, position: f64, timeout: f64) -> CliResult {
    let handle = conn.wait_for_initialization(motor, DeviceKind::Motor, CONFIGURE_WAIT)?;
    conn.start_motor_move(motor, position)?;
    println!("Moving {} to {}...", motor, position);

    let stopped = wait_until(Duration::from_secs_f64(timeout), || {
        conn.with_device(handle, |d| d.motor().map_or(true, |m| !m.move_in_progress))
            .unwrap_or(true)
    });
    let final_position = conn.with_device(handle, |d| d.motor().map(|m| m.settings.position))?;
    if stopped {
        println!("[OK] {} stopped at {}", motor, final_position.unwrap_or(f64::NAN));
        Ok(())
    } else {
        Err(format!("{} still moving after {} s", motor, timeout).into())
    }
}

fn master(conn: &Connection, action: MasterAction) -> CliResult {
    match action {
        MasterAction::Take => {
            conn.take_master(true)?;
            if wait_until(Duration::from_secs(5), || conn.is_master()) {
                println!("[OK] this client is master");
                Ok(())
            } else {
                Err("DCSS did not grant master".into())
            }
        }
        MasterAction::Release => {
            conn.take_master(false)?;
            println!("[OK] master released");
            Ok(())
        }
    }
}

fn run_operation(conn: &Connection, name: &str, args: &[String], timeout: f64) -> CliResult {
    let handle = conn.start_operation(name, &args.join(" "))?;
    println!("Started {} as {}", name, handle);

    let entry = conn.find(DeviceKind::Operation, name)?;
    let read = || {
        conn.with_device(entry, |d| {
            d.operation()
                .map(|op| (op.handle, op.state, op.arguments.clone()))
        })
    };

    let finished = wait_until(Duration::from_secs_f64(timeout), || {
        matches!(read(), Ok(Some((h, s, _))) if h == handle && (s.is_terminal() || s == OperationState::NetworkError))
    });
    let Some((_, state, arguments)) = read()? else {
        return Err(format!("operation '{}' lost its entry", name).into());
    };
    if !finished {
        return Err(format!("{} still {:?} after {} s", name, state, timeout).into());
    }
    match state {
        OperationState::Completed => {
            println!("[OK] {} {}", name, arguments);
            Ok(())
        }
        other => Err(format!("{} ended {:?}: {}", name, other, arguments).into()),
    }
}

fn load_config(args: &Args) -> Result<DcssConfig, Box<dyn std::error::Error>> {
    if let Some(path) = &args.config {
        return Ok(DcssConfig::from_file(path)?);
    }
    Ok(DcssConfig {
        host: args.host.clone(),
        port: args.port,
        user: args.user.clone(),
        session_id: args.session.clone(),
        auto_take_master: true,
        ..Default::default()
    })
}

fn main() {
    let args = Args::parse();

    let level = args.log_level.parse().unwrap_or(Level::WARN);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    if let Err(e) = run(&args) {
        eprintln!("[FAIL] {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> CliResult {
    let config = load_config(args)?;
    let mut client = DcssClient::connect(config)?;
    let conn = std::sync::Arc::clone(client.connection());

    let result = match &args.command {
        Command::Devices { settle } => {
            list_devices(&conn, *settle);
            Ok(())
        }
        Command::Move {
            motor,
            position,
            timeout,
        } => move_motor(&conn, motor, *position, *timeout),
        Command::Master { action } => master(&conn, *action),
        Command::Operation {
            name,
            args: op_args,
            timeout,
        } => run_operation(&conn, name, op_args, *timeout),
    };

    client.close()?;
    result
}
