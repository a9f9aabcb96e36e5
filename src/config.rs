//! Daemon configuration.
//!
//! Loaded from TOML.  Every field has a default, so a partial file (or no
//! file at all) is valid; [`SystemConfig::validate`] runs after overrides.

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Core system configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub network: NetworkConfig,
    pub timing: TimingConfig,
    pub telemetry: TelemetryConfig,
    pub safety: SafetyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Listener address; loopback unless deliberately changed.
    pub bind_address: String,
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".into(),
            port: 7002,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Control loop period (milliseconds)
    pub control_period_ms: u32,
    /// Telemetry publish interval (milliseconds)
    pub telemetry_interval_ms: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            control_period_ms: 100,     // 10 Hz
            telemetry_interval_ms: 200, // 5 Hz
        }
    }
}

/// How telemetry is put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryEncoding {
    #[default]
    Binary,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Sensor presence file
    pub presence_path: String,
    pub encoding: TelemetryEncoding,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            presence_path: "/etc/stillctl/sensors.toml".into(),
            encoding: TelemetryEncoding::Binary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub max_boiler_temp_c: f32,
    pub max_vapour_pressure_kpa: f32,
    pub max_pcb_temp_c: f32,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_boiler_temp_c: 105.0,
            max_vapour_pressure_kpa: 150.0,
            max_pcb_temp_c: 70.0,
        }
    }
}

impl SystemConfig {
    /// Load from a TOML file.  Missing sections and fields take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&contents).map_err(|detail| ConfigError::Parse {
            path: path.display().to_string(),
            detail,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, String> {
        toml::from_str(contents).map_err(|e| e.to_string())
    }

    /// Range checks.  Rejects instead of clamping.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.timing;
        if t.control_period_ms == 0 {
            return Err(ConfigError::ValidationFailed("timing.control_period_ms must be > 0"));
        }
        if t.telemetry_interval_ms < t.control_period_ms {
            return Err(ConfigError::ValidationFailed(
                "timing.telemetry_interval_ms must be >= control_period_ms",
            ));
        }
        if self.network.port == 0 {
            return Err(ConfigError::ValidationFailed("network.port must be non-zero"));
        }
        let s = &self.safety;
        if !positive(s.max_boiler_temp_c) {
            return Err(ConfigError::ValidationFailed("safety.max_boiler_temp_c must be > 0"));
        }
        if !positive(s.max_vapour_pressure_kpa) {
            return Err(ConfigError::ValidationFailed(
                "safety.max_vapour_pressure_kpa must be > 0",
            ));
        }
        if !positive(s.max_pcb_temp_c) {
            return Err(ConfigError::ValidationFailed("safety.max_pcb_temp_c must be > 0"));
        }
        self.socket_addr().map(|_| ())
    }

    /// Resolved listener address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .network
            .bind_address
            .parse()
            .map_err(|_| ConfigError::BadAddress(self.network.bind_address.clone()))?;
        Ok(SocketAddr::new(ip, self.network.port))
    }
}

/// NaN is not positive.
fn positive(v: f32) -> bool {
    v > 0.0
}
