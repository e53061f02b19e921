use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Untyped structured payload crossing the bus boundary in either direction.
///
/// A thin wrapper over a JSON object (key → value mapping, keys unique).
/// Handlers build replies with [`Message::with`] and read inbound fields
/// through the typed accessors; anything the accessors cannot interpret is
/// simply `None`, never a panic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(serde_json::Map<String, Value>);

impl Message {
    /// Empty payload (`{}`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw JSON string into a `Message`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Payload`] when `raw` is not a JSON object.
    pub fn parse(raw: &str) -> Result<Self, BridgeError> {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(Self(map)),
            Ok(other) => Err(BridgeError::Payload(format!(
                "expected a JSON object, got {other}"
            ))),
            Err(e) => Err(BridgeError::Payload(e.to_string())),
        }
    }

    /// Serialize back to a compact JSON string.
    pub fn to_json(&self) -> String {
        // A map of Values cannot fail to serialize.
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }

    /// Builder-style field insert.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Insert or replace a field.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Read a boolean field.
    pub fn bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    /// Read an integer field.
    pub fn i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    /// Read a string field.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// `true` when the payload has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Address of a method on the bus: a service identity plus a method path,
/// written `bus://<service>/<method-path>`.
///
/// e.g. `bus://io.lidarlink.clock/clock/get_time` targets the method bound
/// at `clock/get_time` on the service `io.lidarlink.clock`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BusUri {
    /// Reverse-DNS service identity, e.g. `io.lidarlink.bridge`.
    pub service: String,
    /// Method path under the service's category root, e.g. `clock/get_time`.
    pub method: String,
}

impl BusUri {
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
        }
    }
}

impl FromStr for BusUri {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("bus://")
            .ok_or_else(|| BridgeError::Payload(format!("bus URI missing scheme: '{s}'")))?;
        match rest.split_once('/') {
            Some((service, method)) if !service.is_empty() && !method.is_empty() => {
                Ok(Self::new(service, method))
            }
            _ => Err(BridgeError::Payload(format!(
                "bus URI needs '<service>/<method>': '{s}'"
            ))),
        }
    }
}

impl fmt::Display for BusUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bus://{}/{}", self.service, self.method)
    }
}

/// Device health, derived once from the sensor's health status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Status code 0 – the device reports normal operation.
    Good,
    /// Status code 1 – operational but degraded.
    Warning,
    /// Any other status code – internal error, device needs a reboot.
    Fatal,
}

impl HealthStatus {
    /// Map the raw wire status code to a [`HealthStatus`].
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => HealthStatus::Good,
            1 => HealthStatus::Warning,
            _ => HealthStatus::Fatal,
        }
    }
}

/// How severe an error is for the process as a whole.
///
/// The startup sequence aborts only on [`Severity::FatalStartup`]; everything
/// else is logged and the service keeps (or comes) up. Call sites branch on
/// this instead of guessing from the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The process must not proceed to bus registration / the loop.
    FatalStartup,
    /// Bring-up continues without the affected capability.
    Degraded,
    /// Logged at the point of occurrence; never propagated further.
    Recoverable,
}

/// Error type spanning sensor bring-up, bus registration, and per-message
/// dispatch failures.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The lidar driver could not be allocated at all.
    #[error("lidar driver unavailable: {0}")]
    DriverUnavailable(String),

    /// No candidate baud rate produced a live, identified device.
    #[error("no candidate baud rate produced a live device on {path}")]
    LinkNegotiation { path: String },

    /// The health query against a connected device failed.
    #[error("cannot retrieve lidar health: {0}")]
    HealthQuery(String),

    /// Serial transport or protocol failure underneath the driver.
    #[error("serial link: {0}")]
    Serial(String),

    /// The hub refused the service identity, or registration I/O failed.
    #[error("bus registration failed for '{service}': {reason}")]
    Registration { service: String, reason: String },

    /// Method-table bind was rejected (name collision or hub refusal).
    #[error("method bind failed: {0}")]
    MethodBind(String),

    /// The endpoint could not be wired to the event loop.
    #[error("event-loop attach failed: {0}")]
    LoopAttach(String),

    /// A payload failed to parse or was structurally invalid.
    #[error("malformed payload: {0}")]
    Payload(String),

    /// Sending a reply to an inbound call failed.
    #[error("reply send failed: {0}")]
    ReplySend(String),

    /// Bus socket I/O failure outside the registration sequence.
    #[error("bus i/o: {0}")]
    BusIo(String),

    /// Releasing the bus identity at shutdown failed.
    #[error("unregister failed: {0}")]
    Unregister(String),
}

impl BridgeError {
    /// Classify this error for the startup/runtime policy in one place.
    pub fn severity(&self) -> Severity {
        match self {
            BridgeError::DriverUnavailable(_)
            | BridgeError::Registration { .. }
            | BridgeError::MethodBind(_)
            | BridgeError::LoopAttach(_) => Severity::FatalStartup,

            BridgeError::LinkNegotiation { .. }
            | BridgeError::HealthQuery(_)
            | BridgeError::Serial(_) => Severity::Degraded,

            BridgeError::Payload(_)
            | BridgeError::ReplySend(_)
            | BridgeError::BusIo(_)
            | BridgeError::Unregister(_) => Severity::Recoverable,
        }
    }
}
