// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Blu-Ice DHS Manager
//!
//! Listens for DHS hardware servers, attaches each one to its entry in the
//! roster and keeps a device registry per peer.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default port (14243) with a roster file
//! bluice-dhs-manager --config dhs.json
//!
//! # Write an example config and exit
//! bluice-dhs-manager --write-config dhs.json
//! ```

use bluice::{DhsAcceptor, DhsClient, DhsConfig};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn, Level};

mod config;

use config::{ManagerConfig, OperationEntry, StringEntry};

/// Blu-Ice DHS Manager - routes hardware server connections to their registries
#[derive(Parser, Debug)]
#[command(name = "bluice-dhs-manager")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP port to listen on (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address (overrides the config file)
    #[arg(short, long)]
    bind: Option<String>,

    /// Write an example configuration to this path and exit
    #[arg(long)]
    write_config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn example_config() -> ManagerConfig {
    let mut config = ManagerConfig::default();
    config.acceptor.peers = vec![DhsConfig::named("robot"), DhsConfig::named("detector")];
    config.strings = vec![StringEntry {
        peer: "robot".into(),
        name: "robot_status".into(),
        contents: "idle".into(),
    }];
    config.operations = vec![
        OperationEntry {
            peer: "robot".into(),
            name: "mountSample".into(),
        },
        OperationEntry {
            peer: "detector".into(),
            name: "collectFrame".into(),
        },
    ];
    config
}

fn build_peers(config: &ManagerConfig) -> bluice::Result<Vec<Arc<DhsClient>>> {
    let peers: Vec<Arc<DhsClient>> = config
        .acceptor
        .peers
        .iter()
        .map(|p| Arc::new(DhsClient::new(p.clone())))
        .collect();

    for entry in &config.strings {
        if let Some(p) = peers.iter().find(|p| p.name() == entry.peer) {
            p.register_string(&entry.name, &entry.contents)?;
        }
    }
    for entry in &config.operations {
        if let Some(p) = peers.iter().find(|p| p.name() == entry.peer) {
            p.register_operation(&entry.name)?;
        }
    }

    for p in &peers {
        p.start()?;
    }
    Ok(peers)
}

fn spawn_status_reporter(
    peers: Vec<Arc<DhsClient>>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("bluice-dhs-status".to_string())
        .spawn(move || {
            let mut last = Instant::now();
            while !shutdown.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(100));
                if last.elapsed() < interval {
                    continue;
                }
                last = Instant::now();
                let attached: Vec<&str> = peers
                    .iter()
                    .filter(|p| p.is_attached())
                    .map(|p| p.name())
                    .collect();
                info!(
                    "{}/{} peers attached: [{}]",
                    attached.len(),
                    peers.len(),
                    attached.join(", ")
                );
            }
        })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    // Also routes the library's `log` records
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    if let Some(path) = args.write_config {
        example_config().to_file(&path)?;
        info!("Example configuration written to {:?}", path);
        return Ok(());
    }

    let mut config = if let Some(config_path) = args.config {
        info!("Loading config from {:?}", config_path);
        ManagerConfig::from_file(&config_path)?
    } else {
        warn!("No config file given; every inbound peer will be rejected");
        ManagerConfig::default()
    };
    if let Some(port) = args.port {
        config.acceptor.port = port;
    }
    if let Some(bind) = args.bind {
        config.acceptor.bind_address = bind.parse()?;
    }
    config.validate()?;

    let peers = build_peers(&config)?;
    let acceptor = DhsAcceptor::bind(&config.acceptor, peers.clone())?;
    let addr = acceptor.local_addr()?;

    info!("+----------------------------------------------------+");
    info!(
        "|       Blu-Ice DHS Manager v{}                  |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  Bind:    {:40} |", addr);
    info!("|  Peers:   {:40} |", peers.len());
    info!(
        "|  Entries: {:40} |",
        config.strings.len() + config.operations.len()
    );
    info!("+----------------------------------------------------+");

    let shutdown = acceptor.shutdown_flag();
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })?;

    let reporter = if config.status_interval_secs > 0 {
        Some(spawn_status_reporter(
            peers.clone(),
            Duration::from_secs(config.status_interval_secs),
            Arc::clone(&shutdown),
        )?)
    } else {
        None
    };

    acceptor.run();
    info!("Shutdown signal received, closing peers...");

    if let Some(reporter) = reporter {
        if reporter.join().is_err() {
            error!("status reporter panicked");
        }
    }
    for peer in &peers {
        if let Err(e) = peer.close() {
            warn!("closing '{}': {}", peer.name(), e);
        }
    }

    info!("DHS manager stopped");
    Ok(())
}
