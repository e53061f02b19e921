//! `lidarlinkd` – bridges a spinning serial lidar onto the message bus.
//!
//! Startup is a fixed sequence:
//!
//! 1. Structured logging (env-filtered; `LIDARLINK_LOG_FORMAT=json` for
//!    newline-delimited JSON suitable for log aggregators).
//! 2. Config from `~/.lidarlink/config.toml` (defaults when absent).
//! 3. Sensor bring-up: baud negotiation + health check. A missing or sick
//!    sensor degrades the service; only an unallocatable driver is fatal.
//! 4. Bus startup: event loop, hub connection, registration, method bind,
//!    loop attach – any failure here aborts with a distinct exit code.
//! 5. One fire-and-forget clock query, then the service loop until Ctrl-C
//!    or SIGTERM, then a single unregister.

mod bringup;
mod config;
mod service;

use std::time::Duration;

use lidarlink_bus::{BusTransport, EventLoop, UnixBus};
use lidarlink_hal::{LidarTransport, SerialLidar};
use tracing::{error, info, warn};

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    init_logging();

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            info!(path = %config::config_path().display(), "config loaded");
            cfg
        }
        Ok(None) => {
            info!("no config file; using defaults");
            config::Config::default()
        }
        Err(e) => {
            warn!(error = %e, "config unreadable; using defaults");
            config::Config::default()
        }
    };

    info!(service = %cfg.service_name, device = %cfg.device_path, "starting lidar bridge");

    // ── Sensor bring-up (blocking, one-time) ─────────────────────────────
    let serial_timeout = Duration::from_millis(cfg.serial_timeout_ms);
    let session = match bringup::bring_up(&cfg, || {
        Ok(Box::new(SerialLidar::new(serial_timeout)) as Box<dyn LidarTransport>)
    }) {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "cannot allocate the lidar driver");
            return service::EXIT_DRIVER_UNAVAILABLE;
        }
    };
    // The session stays alive until the process exits, whether or not
    // anything touches it again.
    let _session = session;

    // ── Bus startup ──────────────────────────────────────────────────────
    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            error!(error = %e, "cannot build the event loop");
            return service::EXIT_BUS_STARTUP;
        }
    };

    let shutdown = event_loop.shutdown_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("termination signal received; stopping the service loop");
        shutdown.shutdown();
    }) {
        warn!(error = %e, "failed to install the signal handler; graceful shutdown unavailable");
    }

    let transport = match event_loop.block_on(UnixBus::connect(&cfg.bus_socket)) {
        Ok(bus) => Box::new(bus) as Box<dyn BusTransport>,
        Err(e) => {
            error!(error = %e, socket = %cfg.bus_socket, "message hub unreachable");
            return service::EXIT_BUS_STARTUP;
        }
    };

    match service::serve(&cfg, &event_loop, transport) {
        Ok(()) => {
            info!("shutdown complete");
            service::EXIT_OK
        }
        Err(e) => {
            error!(error = %e, "bus startup failed");
            service::EXIT_BUS_STARTUP
        }
    }
}

/// Initialise tracing-subscriber using RUST_LOG (defaults to "info").
/// Set LIDARLINK_LOG_FORMAT=json to emit newline-delimited JSON logs.
fn init_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if std::env::var("LIDARLINK_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }
}
