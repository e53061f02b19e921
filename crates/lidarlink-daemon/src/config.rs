//! Configuration vault – reads `~/.lidarlink/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use lidarlink_hal::RecoveryPolicy;

/// What to do when the sensor reports an internal error at bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    /// Log the fatal report and leave the device alone.
    #[default]
    LogOnly,
    /// Log, then soft-reset the device.
    Reset,
}

impl From<RecoveryMode> for RecoveryPolicy {
    fn from(mode: RecoveryMode) -> Self {
        match mode {
            RecoveryMode::LogOnly => RecoveryPolicy::LogOnly,
            RecoveryMode::Reset => RecoveryPolicy::Reset,
        }
    }
}

/// Persisted daemon configuration stored in `~/.lidarlink/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Serial device node of the lidar.
    #[serde(default = "default_device_path")]
    pub device_path: String,

    /// Candidate baud rates, tried in this order during bring-up.
    #[serde(default = "default_baud_candidates")]
    pub baud_candidates: Vec<u32>,

    /// Per-read timeout on the serial link, in milliseconds.
    #[serde(default = "default_serial_timeout_ms")]
    pub serial_timeout_ms: u64,

    /// Unix socket of the message hub.
    #[serde(default = "default_bus_socket")]
    pub bus_socket: String,

    /// Our identity on the bus.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Address of the peer clock method queried once at startup.
    #[serde(default = "default_time_service")]
    pub time_service: String,

    /// Recovery action on a fatal health report.
    #[serde(default)]
    pub recovery: RecoveryMode,
}

fn default_device_path() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_baud_candidates() -> Vec<u32> {
    vec![115_200, 256_000]
}
fn default_serial_timeout_ms() -> u64 {
    500
}
fn default_bus_socket() -> String {
    "/run/lidarlink/hub.sock".to_string()
}
fn default_service_name() -> String {
    "io.lidarlink.bridge".to_string()
}
fn default_time_service() -> String {
    "bus://io.lidarlink.clock/clock/get_time".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_path: default_device_path(),
            baud_candidates: default_baud_candidates(),
            serial_timeout_ms: default_serial_timeout_ms(),
            bus_socket: default_bus_socket(),
            service_name: default_service_name(),
            time_service: default_time_service(),
            recovery: RecoveryMode::default(),
        }
    }
}

/// Return the path to `~/.lidarlink/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
/// Extracted for testability without mutating environment variables.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".lidarlink").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `LIDARLINK_*` environment variable overrides to `cfg`.
///
/// Supported variables:
///
/// | Variable | Config field |
/// |---|---|
/// | `LIDARLINK_DEVICE` | `device_path` |
/// | `LIDARLINK_BUS_SOCKET` | `bus_socket` |
/// | `LIDARLINK_RECOVERY` | `recovery` (`log_only` or `reset`) |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("LIDARLINK_DEVICE") {
        cfg.device_path = v;
    }
    if let Ok(v) = std::env::var("LIDARLINK_BUS_SOCKET") {
        cfg.bus_socket = v;
    }
    if let Ok(v) = std::env::var("LIDARLINK_RECOVERY") {
        match v.as_str() {
            "log_only" => cfg.recovery = RecoveryMode::LogOnly,
            "reset" => cfg.recovery = RecoveryMode::Reset,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(path: &PathBuf, cfg: &Config) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, toml::to_string_pretty(cfg).unwrap()).unwrap();
    }

    #[test]
    fn defaults_describe_a_usable_bridge() {
        let cfg = Config::default();
        assert_eq!(cfg.device_path, "/dev/ttyUSB0");
        assert_eq!(cfg.baud_candidates, vec![115_200, 256_000]);
        assert_eq!(cfg.service_name, "io.lidarlink.bridge");
        assert_eq!(cfg.recovery, RecoveryMode::LogOnly);
        assert!(cfg.time_service.starts_with("bus://"));
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config::default();
        write_config(&path, &cfg);

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "device_path = \"/dev/ttyUSB1\"\n").unwrap();

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.device_path, "/dev/ttyUSB1");
        assert_eq!(loaded.baud_candidates, vec![115_200, 256_000]);
    }

    #[test]
    fn config_path_points_to_lidarlink_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".lidarlink"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn apply_env_overrides_changes_device() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("LIDARLINK_DEVICE", "/dev/ttyAMA0") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.device_path, "/dev/ttyAMA0");
        unsafe { std::env::remove_var("LIDARLINK_DEVICE") };
    }

    #[test]
    fn apply_env_overrides_changes_recovery() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("LIDARLINK_RECOVERY", "reset") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.recovery, RecoveryMode::Reset);
        unsafe { std::env::remove_var("LIDARLINK_RECOVERY") };
    }

    #[test]
    fn apply_env_overrides_ignores_unknown_recovery_values() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("LIDARLINK_RECOVERY", "percussive") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.recovery, RecoveryMode::LogOnly);
        unsafe { std::env::remove_var("LIDARLINK_RECOVERY") };
    }

    #[test]
    fn recovery_mode_maps_onto_hal_policy() {
        assert_eq!(
            RecoveryPolicy::from(RecoveryMode::LogOnly),
            RecoveryPolicy::LogOnly
        );
        assert_eq!(
            RecoveryPolicy::from(RecoveryMode::Reset),
            RecoveryPolicy::Reset
        );
    }
}
