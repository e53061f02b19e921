//! [`SimLidar`] – scripted in-process driver for tests and CI runs without
//! physical hardware.
//!
//! The sim models the behaviors bring-up has to cope with: a device that
//! answers only at one baud rate (the port still opens at any rate), a
//! device that never identifies, and a device that is not plugged in at all.
//! Optional shared counters let tests observe resets and connection attempts
//! across the fresh instances the negotiator allocates.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use lidarlink_types::BridgeError;

use crate::transport::{DeviceInfo, HealthReading, LidarTransport};

/// Scripted lidar driver. Clone one template per factory invocation.
#[derive(Clone)]
pub struct SimLidar {
    /// The baud rate at which the identification query answers, if any.
    answers_at: Option<u32>,
    /// When `false`, even opening the port fails (device absent).
    port_present: bool,
    /// Health response script; `None` makes the health query fail.
    health: Option<HealthReading>,
    resets: Arc<AtomicUsize>,
    attempt_log: Option<Arc<Mutex<Vec<u32>>>>,
    connected_at: Option<u32>,
}

impl SimLidar {
    /// Model byte reported by the sim's identification block.
    pub const SIM_MODEL: u8 = 0x18;

    /// A device whose port opens at any rate but which identifies only at
    /// `baud`. Health defaults to good.
    pub fn answering_at(baud: u32) -> Self {
        Self {
            answers_at: Some(baud),
            port_present: true,
            health: Some(HealthReading {
                status: 0,
                error_code: 0,
            }),
            resets: Arc::new(AtomicUsize::new(0)),
            attempt_log: None,
            connected_at: None,
        }
    }

    /// A port that opens but a device that never identifies.
    pub fn silent() -> Self {
        Self {
            answers_at: None,
            ..Self::answering_at(0)
        }
    }

    /// No device node at all: opening the port fails.
    pub fn unplugged() -> Self {
        Self {
            port_present: false,
            ..Self::silent()
        }
    }

    /// Script the health response.
    pub fn with_health(mut self, status: u8, error_code: u16) -> Self {
        self.health = Some(HealthReading { status, error_code });
        self
    }

    /// Make the health query fail outright.
    pub fn without_health(mut self) -> Self {
        self.health = None;
        self
    }

    /// Share a reset counter with the test.
    pub fn with_reset_counter(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.resets = counter;
        self
    }

    /// Record every attempted baud rate into the shared log.
    pub fn with_attempt_log(mut self, log: Arc<Mutex<Vec<u32>>>) -> Self {
        self.attempt_log = Some(log);
        self
    }

    fn identified(&self) -> bool {
        self.connected_at.is_some() && self.connected_at == self.answers_at
    }
}

impl LidarTransport for SimLidar {
    fn connect(&mut self, _path: &str, baud: u32) -> Result<(), BridgeError> {
        if let Some(log) = &self.attempt_log {
            log.lock().expect("attempt log poisoned").push(baud);
        }
        if !self.port_present {
            return Err(BridgeError::Serial("no such device".to_string()));
        }
        self.connected_at = Some(baud);
        Ok(())
    }

    fn device_info(&mut self) -> Result<DeviceInfo, BridgeError> {
        if self.identified() {
            Ok(DeviceInfo {
                model: Self::SIM_MODEL,
                firmware_major: 1,
                firmware_minor: 29,
                hardware: 7,
                serial_number: [0xEF; 16],
            })
        } else {
            Err(BridgeError::Serial(
                "identification query timed out".to_string(),
            ))
        }
    }

    fn health(&mut self) -> Result<HealthReading, BridgeError> {
        if !self.identified() {
            return Err(BridgeError::Serial("not connected".to_string()));
        }
        self.health
            .ok_or_else(|| BridgeError::Serial("health query timed out".to_string()))
    }

    fn reset(&mut self) -> Result<(), BridgeError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_only_at_the_scripted_baud() {
        let mut sim = SimLidar::answering_at(256_000);
        sim.connect("/dev/null", 115_200).unwrap();
        assert!(sim.device_info().is_err());
        sim.connect("/dev/null", 256_000).unwrap();
        assert_eq!(sim.device_info().unwrap().model, SimLidar::SIM_MODEL);
    }

    #[test]
    fn unplugged_refuses_to_open() {
        let mut sim = SimLidar::unplugged();
        assert!(sim.connect("/dev/null", 115_200).is_err());
    }

    #[test]
    fn disconnect_drops_identification() {
        let mut sim = SimLidar::answering_at(115_200);
        sim.connect("/dev/null", 115_200).unwrap();
        assert!(sim.health().is_ok());
        sim.disconnect();
        assert!(sim.health().is_err());
    }
}
