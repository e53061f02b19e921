//! [`SerialLidar`] – the real driver, speaking the lidar's request/response
//! exchange over a serial port.
//!
//! The wire protocol is the vendor's: every request is a two-byte
//! `[SYNC, opcode]` pair; every response (except reset, which answers
//! nothing) starts with a seven-byte descriptor carrying the payload length
//! and data type, followed by the payload itself. This driver only consumes
//! the exchange — it does not attempt scan streaming.

use std::io::{Read, Write};
use std::time::Duration;

use lidarlink_types::BridgeError;

use crate::transport::{DeviceInfo, HealthReading, LidarTransport};

// ────────────────────────────────────────────────────────────────────────────
// Protocol constants
// ────────────────────────────────────────────────────────────────────────────

const SYNC_REQUEST: u8 = 0xA5;
const SYNC_RESPONSE: u8 = 0x5A;

const CMD_RESET: u8 = 0x40;
const CMD_GET_INFO: u8 = 0x50;
const CMD_GET_HEALTH: u8 = 0x52;

const DTYPE_INFO: u8 = 0x04;
const DTYPE_HEALTH: u8 = 0x06;

const INFO_PAYLOAD_LEN: usize = 20;
const HEALTH_PAYLOAD_LEN: usize = 3;

/// Settle time after a reset command before the device accepts traffic again.
const RESET_SETTLE: Duration = Duration::from_millis(2);

// ────────────────────────────────────────────────────────────────────────────
// Driver
// ────────────────────────────────────────────────────────────────────────────

/// Serial-port lidar driver.
///
/// One instance owns at most one open port. The negotiator allocates a fresh
/// instance per connection attempt, so a failed attempt never leaks link
/// state into the next one.
pub struct SerialLidar {
    timeout: Duration,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialLidar {
    /// Create an unconnected driver. `timeout` bounds every read on the port.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            port: None,
        }
    }

    fn port(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>, BridgeError> {
        self.port
            .as_mut()
            .ok_or_else(|| BridgeError::Serial("not connected".to_string()))
    }

    /// Send a two-byte request frame.
    fn request(&mut self, opcode: u8) -> Result<(), BridgeError> {
        let port = self.port()?;
        port.write_all(&[SYNC_REQUEST, opcode])
            .and_then(|()| port.flush())
            .map_err(|e| BridgeError::Serial(format!("request 0x{opcode:02x}: {e}")))
    }

    /// Read exactly `n` bytes from the port.
    fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, BridgeError> {
        let port = self.port()?;
        let mut buf = vec![0u8; n];
        port.read_exact(&mut buf)
            .map_err(|e| BridgeError::Serial(format!("read {n} bytes: {e}")))?;
        Ok(buf)
    }

    /// Read and validate a response descriptor, returning (payload length,
    /// data type).
    fn read_descriptor(&mut self) -> Result<(usize, u8), BridgeError> {
        let raw = self.read_exact(7)?;
        parse_descriptor(&raw)
    }

    /// Run one request → descriptor → payload exchange, checking the
    /// descriptor against the expected data type and payload length.
    fn exchange(&mut self, opcode: u8, dtype: u8, len: usize) -> Result<Vec<u8>, BridgeError> {
        self.request(opcode)?;
        let (got_len, got_dtype) = self.read_descriptor()?;
        if got_dtype != dtype || got_len != len {
            return Err(BridgeError::Serial(format!(
                "unexpected response to 0x{opcode:02x}: type 0x{got_dtype:02x} len {got_len}"
            )));
        }
        self.read_exact(len)
    }
}

impl LidarTransport for SerialLidar {
    fn connect(&mut self, path: &str, baud: u32) -> Result<(), BridgeError> {
        let port = serialport::new(path, baud)
            .timeout(self.timeout)
            .open()
            .map_err(|e| BridgeError::Serial(format!("open {path} @ {baud}: {e}")))?;
        // Stale bytes from a previous session would desynchronize the first
        // descriptor read.
        port.clear(serialport::ClearBuffer::All)
            .map_err(|e| BridgeError::Serial(format!("clear buffers: {e}")))?;
        self.port = Some(port);
        Ok(())
    }

    fn device_info(&mut self) -> Result<DeviceInfo, BridgeError> {
        let payload = self.exchange(CMD_GET_INFO, DTYPE_INFO, INFO_PAYLOAD_LEN)?;
        parse_device_info(&payload)
    }

    fn health(&mut self) -> Result<HealthReading, BridgeError> {
        let payload = self.exchange(CMD_GET_HEALTH, DTYPE_HEALTH, HEALTH_PAYLOAD_LEN)?;
        parse_health(&payload)
    }

    fn reset(&mut self) -> Result<(), BridgeError> {
        self.request(CMD_RESET)?;
        std::thread::sleep(RESET_SETTLE);
        if let Some(port) = self.port.as_mut() {
            port.clear(serialport::ClearBuffer::All)
                .map_err(|e| BridgeError::Serial(format!("clear after reset: {e}")))?;
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.port = None;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Byte-level parsers (port-free, unit-testable)
// ────────────────────────────────────────────────────────────────────────────

fn parse_descriptor(raw: &[u8]) -> Result<(usize, u8), BridgeError> {
    if raw.len() != 7 || raw[0] != SYNC_REQUEST || raw[1] != SYNC_RESPONSE {
        return Err(BridgeError::Serial(format!(
            "bad response descriptor: {raw:02x?}"
        )));
    }
    // 30-bit little-endian payload length; the top two bits carry the send
    // mode, which is always single-response for the queries we issue.
    let len = u32::from_le_bytes([raw[2], raw[3], raw[4], raw[5]]) & 0x3FFF_FFFF;
    Ok((len as usize, raw[6]))
}

fn parse_device_info(payload: &[u8]) -> Result<DeviceInfo, BridgeError> {
    if payload.len() != INFO_PAYLOAD_LEN {
        return Err(BridgeError::Serial(format!(
            "info payload is {} bytes, expected {INFO_PAYLOAD_LEN}",
            payload.len()
        )));
    }
    let mut serial_number = [0u8; 16];
    serial_number.copy_from_slice(&payload[4..20]);
    Ok(DeviceInfo {
        model: payload[0],
        firmware_minor: payload[1],
        firmware_major: payload[2],
        hardware: payload[3],
        serial_number,
    })
}

fn parse_health(payload: &[u8]) -> Result<HealthReading, BridgeError> {
    if payload.len() != HEALTH_PAYLOAD_LEN {
        return Err(BridgeError::Serial(format!(
            "health payload is {} bytes, expected {HEALTH_PAYLOAD_LEN}",
            payload.len()
        )));
    }
    Ok(HealthReading {
        status: payload[0],
        error_code: u16::from_le_bytes([payload[1], payload[2]]),
    })
}
