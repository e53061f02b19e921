//! `lidarlink-hal` – sensor bring-up layer.
//!
//! Everything between the raw serial device and the bus service lives here:
//!
//! - [`transport`] – the [`LidarTransport`] driver trait plus the
//!   identification and health payloads it returns.
//! - [`serial`] – [`SerialLidar`], the real driver speaking the lidar's
//!   request/response exchange over a serial port.
//! - [`negotiator`] – [`ConnectionNegotiator`], which walks the candidate
//!   baud rates until one yields a live, identified device.
//! - [`health`] – [`HealthMonitor`], which classifies the device's health
//!   response and applies the configured recovery policy.
//! - [`sim`] – [`SimLidar`], a scripted in-process driver for tests and CI
//!   runs without physical hardware.

pub mod health;
pub mod negotiator;
pub mod serial;
pub mod sim;
pub mod transport;

pub use health::{HealthMonitor, RecoveryPolicy};
pub use negotiator::{ConnectionNegotiator, DeviceSession};
pub use serial::SerialLidar;
pub use sim::SimLidar;
pub use transport::{DeviceInfo, HealthReading, LidarTransport};
