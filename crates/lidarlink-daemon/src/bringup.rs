//! Sensor bring-up: one blocking pass of negotiation plus a health check.
//!
//! Runs to completion before any bus traffic. The only outcome that stops
//! the process here is a driver that cannot be allocated at all; a missing
//! or sick sensor degrades the service but never prevents it from coming up
//! on the bus.

use lidarlink_hal::{ConnectionNegotiator, DeviceSession, HealthMonitor, LidarTransport};
use lidarlink_types::{BridgeError, Severity};
use tracing::{info, warn};

use crate::config::Config;

/// Negotiate the link and evaluate device health.
///
/// Returns `Ok(None)` when no sensor could be brought up – the caller keeps
/// going without one.
///
/// # Errors
///
/// Only fatal-startup errors surface here (driver allocation failure);
/// everything else is logged and absorbed.
pub fn bring_up<F>(cfg: &Config, factory: F) -> Result<Option<DeviceSession>, BridgeError>
where
    F: FnMut() -> Result<Box<dyn LidarTransport>, BridgeError>,
{
    let negotiator = ConnectionNegotiator::new(&cfg.device_path, cfg.baud_candidates.clone());
    let mut session = match negotiator.negotiate(factory) {
        Ok(session) => session,
        Err(e) if e.severity() == Severity::FatalStartup => return Err(e),
        Err(e) => {
            warn!(error = %e, "continuing without a sensor");
            return Ok(None);
        }
    };

    info!(baud = session.baud(), device = %session.info(), "sensor link up");

    let monitor = HealthMonitor::new(cfg.recovery.into());
    match monitor.evaluate(&mut session) {
        Ok(status) => info!(?status, "health evaluated"),
        Err(e) => warn!(error = %e, "health unavailable; continuing"),
    }

    Ok(Some(session))
}
