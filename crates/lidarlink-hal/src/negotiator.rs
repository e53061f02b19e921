//! [`ConnectionNegotiator`] – multi-rate connection bring-up.
//!
//! The device's link speed is not known in advance, so the negotiator walks
//! an ordered list of candidate baud rates. A candidate is accepted only when
//! the transport both opens the link *and* answers the identification query;
//! a device that opens the port but answers garbage is running at a different
//! rate and must be retried at the next candidate.
//!
//! Each attempt gets a fresh driver instance from the caller's factory and
//! drops it on failure, so exactly one driver is alive at any moment and no
//! stale link state survives into the next attempt.

use lidarlink_types::BridgeError;
use tracing::{debug, info};

use crate::transport::{DeviceInfo, HealthReading, LidarTransport};

/// Walks candidate baud rates in fixed priority order until one yields a
/// live, identified device.
pub struct ConnectionNegotiator {
    path: String,
    candidates: Vec<u32>,
}

impl ConnectionNegotiator {
    /// `path` is the serial device node; `candidates` are tried in the given
    /// order and never mutated.
    pub fn new(path: impl Into<String>, candidates: Vec<u32>) -> Self {
        Self {
            path: path.into(),
            candidates,
        }
    }

    /// The candidate baud rates, in try order.
    pub fn candidates(&self) -> &[u32] {
        &self.candidates
    }

    /// Run one bring-up pass.
    ///
    /// `factory` allocates a fresh driver for every attempt. Each candidate
    /// is tried at most once per pass.
    ///
    /// # Errors
    ///
    /// - Propagates the factory's error unchanged (a driver that cannot even
    ///   be allocated is a fatal startup condition, not a bad candidate).
    /// - Returns [`BridgeError::LinkNegotiation`] when every candidate has
    ///   been rejected.
    pub fn negotiate<F>(&self, mut factory: F) -> Result<DeviceSession, BridgeError>
    where
        F: FnMut() -> Result<Box<dyn LidarTransport>, BridgeError>,
    {
        for &baud in &self.candidates {
            let mut driver = factory()?;
            match driver.connect(&self.path, baud) {
                Ok(()) => match driver.device_info() {
                    Ok(info) => {
                        info!(path = %self.path, baud, device = %info, "lidar identified");
                        return Ok(DeviceSession {
                            transport: driver,
                            info,
                            baud,
                        });
                    }
                    Err(e) => {
                        debug!(baud, error = %e, "device did not identify; discarding driver");
                    }
                },
                Err(e) => {
                    debug!(baud, error = %e, "link open failed");
                }
            }
            // `driver` drops here; the next candidate gets a fresh instance.
        }
        Err(BridgeError::LinkNegotiation {
            path: self.path.clone(),
        })
    }
}

/// A live, identified device link.
///
/// Owns the driver for the rest of the process lifetime. After bring-up the
/// session is only consulted by the health monitor; it must simply stay
/// alive while the service loop runs.
pub struct DeviceSession {
    transport: Box<dyn LidarTransport>,
    info: DeviceInfo,
    baud: u32,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("info", &self.info)
            .field("baud", &self.baud)
            .finish_non_exhaustive()
    }
}

impl DeviceSession {
    /// Identification block captured during negotiation.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// The baud rate that won negotiation.
    pub fn baud(&self) -> u32 {
        self.baud
    }

    /// Query the device's health block.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Serial`] on transport or protocol failure.
    pub fn health(&mut self) -> Result<HealthReading, BridgeError> {
        self.transport.health()
    }

    /// Soft-reboot the device.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Serial`] when the reset cannot be issued.
    pub fn reset(&mut self) -> Result<(), BridgeError> {
        self.transport.reset()
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.transport.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimLidar;
    use lidarlink_types::Severity;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const CANDIDATES: [u32; 2] = [115_200, 256_000];

    #[test]
    fn accepts_the_first_candidate_that_identifies() {
        let negotiator = ConnectionNegotiator::new("/dev/ttyUSB0", CANDIDATES.to_vec());
        let session = negotiator
            .negotiate(|| Ok(Box::new(SimLidar::answering_at(115_200)) as Box<dyn LidarTransport>))
            .unwrap();
        assert_eq!(session.baud(), 115_200);
    }

    #[test]
    fn falls_through_to_the_second_candidate() {
        // The device opens the port at any rate but only identifies at
        // 256000 – the classic wrong-baud case.
        let negotiator = ConnectionNegotiator::new("/dev/ttyUSB0", CANDIDATES.to_vec());
        let session = negotiator
            .negotiate(|| Ok(Box::new(SimLidar::answering_at(256_000)) as Box<dyn LidarTransport>))
            .unwrap();
        assert_eq!(session.baud(), 256_000);
        assert_eq!(session.info().model, SimLidar::SIM_MODEL);
    }

    #[test]
    fn exhausting_all_candidates_is_degraded_not_fatal() {
        let negotiator = ConnectionNegotiator::new("/dev/ttyUSB0", CANDIDATES.to_vec());
        let err = negotiator
            .negotiate(|| Ok(Box::new(SimLidar::silent()) as Box<dyn LidarTransport>))
            .unwrap_err();
        assert!(matches!(err, BridgeError::LinkNegotiation { .. }));
        assert_eq!(err.severity(), Severity::Degraded);
    }

    #[test]
    fn factory_failure_aborts_the_pass_as_fatal() {
        let negotiator = ConnectionNegotiator::new("/dev/ttyUSB0", CANDIDATES.to_vec());
        let err = negotiator
            .negotiate(|| Err(BridgeError::DriverUnavailable("out of descriptors".into())))
            .unwrap_err();
        assert_eq!(err.severity(), Severity::FatalStartup);
    }

    #[test]
    fn each_attempt_gets_a_fresh_driver() {
        let allocations = Arc::new(AtomicUsize::new(0));
        let negotiator = ConnectionNegotiator::new("/dev/ttyUSB0", CANDIDATES.to_vec());
        let allocs = allocations.clone();
        let _ = negotiator.negotiate(move || {
            allocs.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(SimLidar::silent()) as Box<dyn LidarTransport>)
        });
        // One fresh instance per candidate – never a reused driver.
        assert_eq!(allocations.load(Ordering::SeqCst), CANDIDATES.len());
    }

    #[test]
    fn candidates_are_tried_in_order_without_repeats() {
        let attempts: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let negotiator = ConnectionNegotiator::new("/dev/ttyUSB0", CANDIDATES.to_vec());
        let log = attempts.clone();
        let _ = negotiator.negotiate(move || {
            Ok(Box::new(SimLidar::silent().with_attempt_log(log.clone()))
                as Box<dyn LidarTransport>)
        });
        assert_eq!(*attempts.lock().unwrap(), CANDIDATES.to_vec());
    }

    #[test]
    fn unplugged_device_rejects_every_candidate() {
        let negotiator = ConnectionNegotiator::new("/dev/ttyUSB0", CANDIDATES.to_vec());
        let err = negotiator
            .negotiate(|| Ok(Box::new(SimLidar::unplugged()) as Box<dyn LidarTransport>))
            .unwrap_err();
        assert!(matches!(err, BridgeError::LinkNegotiation { .. }));
    }
}
