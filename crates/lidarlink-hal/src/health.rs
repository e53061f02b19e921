//! [`HealthMonitor`] – classifies the device's health response after
//! bring-up.
//!
//! Health is advisory: whatever the device reports, the service still comes
//! up and registers on the bus. The monitor's job is to classify, log, and –
//! when configured – kick a soft reset on a fatal report. It never blocks
//! bring-up and never escalates.

use lidarlink_types::{BridgeError, HealthStatus};
use tracing::{error, info, warn};

use crate::negotiator::DeviceSession;
use crate::transport::HealthReading;

/// What to do when the device reports an internal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryPolicy {
    /// Log the fatal report and leave the device alone.
    #[default]
    LogOnly,
    /// Log, then issue a soft reset (result logged, never escalated).
    Reset,
}

/// Classifies a connected device's health response.
pub struct HealthMonitor {
    policy: RecoveryPolicy,
}

impl HealthMonitor {
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self { policy }
    }

    /// Pure classification of a raw reading. Never fails, never blocks.
    pub fn classify(reading: &HealthReading) -> HealthStatus {
        HealthStatus::from_code(reading.status)
    }

    /// Query the session's health and classify it, applying the recovery
    /// policy on a fatal report.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::HealthQuery`] when the query itself fails –
    /// a degraded outcome, not a startup blocker.
    pub fn evaluate(&self, session: &mut DeviceSession) -> Result<HealthStatus, BridgeError> {
        let reading = session
            .health()
            .map_err(|e| BridgeError::HealthQuery(e.to_string()))?;
        let status = Self::classify(&reading);
        match status {
            HealthStatus::Good => {
                info!(status = reading.status, "lidar health good");
            }
            HealthStatus::Warning => {
                warn!(
                    status = reading.status,
                    error_code = reading.error_code,
                    "lidar reports degraded health"
                );
            }
            HealthStatus::Fatal => {
                error!(
                    status = reading.status,
                    error_code = reading.error_code,
                    "lidar reports internal error; device needs a reboot"
                );
                if self.policy == RecoveryPolicy::Reset {
                    match session.reset() {
                        Ok(()) => info!("soft reset issued"),
                        Err(e) => warn!(error = %e, "soft reset failed"),
                    }
                }
            }
        }
        Ok(status)
    }
}
