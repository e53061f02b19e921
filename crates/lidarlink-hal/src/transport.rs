//! [`LidarTransport`] – the driver seam between bring-up logic and the
//! physical link.
//!
//! Drivers implement this trait; the [`ConnectionNegotiator`][crate::negotiator::ConnectionNegotiator]
//! and [`HealthMonitor`][crate::health::HealthMonitor] only ever talk to the
//! trait, so the serial driver can be swapped for the scripted
//! [`SimLidar`][crate::sim::SimLidar] in tests without touching bring-up
//! logic.

use std::fmt;

use lidarlink_types::BridgeError;

/// One candidate baud must satisfy both halves of this trait's contract
/// (`connect` then `device_info`) before the negotiator accepts it.
pub trait LidarTransport: Send {
    /// Open the link to the device at `path` with the given baud rate.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Serial`] when the port cannot be opened or
    /// configured.
    fn connect(&mut self, path: &str, baud: u32) -> Result<(), BridgeError>;

    /// Query the device's identification block.
    ///
    /// A device that accepted the connection but answers garbage (wrong baud,
    /// wrong device) surfaces here, not in [`LidarTransport::connect`].
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Serial`] on timeout or a malformed response.
    fn device_info(&mut self) -> Result<DeviceInfo, BridgeError>;

    /// Query the device's health block.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Serial`] on timeout or a malformed response.
    fn health(&mut self) -> Result<HealthReading, BridgeError>;

    /// Soft-reboot the device. The link must be re-established afterwards by
    /// whoever requested the reset.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Serial`] when the reset command cannot be sent.
    fn reset(&mut self) -> Result<(), BridgeError>;

    /// Drop the link. Safe to call when not connected.
    fn disconnect(&mut self);
}

/// Device identification block returned by the info query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub model: u8,
    pub firmware_major: u8,
    pub firmware_minor: u8,
    pub hardware: u8,
    pub serial_number: [u8; 16],
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "model 0x{:02x} fw {}.{:02} hw {} sn ",
            self.model, self.firmware_major, self.firmware_minor, self.hardware
        )?;
        for b in &self.serial_number {
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

/// Raw health response: a status code plus a device-specific error code.
///
/// Classification into [`HealthStatus`][lidarlink_types::HealthStatus] is the
/// [`HealthMonitor`][crate::health::HealthMonitor]'s job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReading {
    pub status: u8,
    pub error_code: u16,
}
