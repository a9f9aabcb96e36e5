//! Sensor presence mask.
//!
//! One bit per telemetry field.  Loaded once at startup and immutable
//! afterwards; a cleared bit makes the encoder emit the field's "absent"
//! sentinel instead of the live value.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Every telemetry field that can be present or absent, in bit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Sensor {
    TempVapourHead = 0,
    TempBoilerLiquid = 1,
    TempPcb = 2,
    PressureAmbient = 3,
    PressureVapour = 4,
    Flow = 5,
    ValveReflux = 6,
    ValveProduct = 7,
    Heater1 = 8,
    Heater2 = 9,
}

impl Sensor {
    pub const ALL: [Sensor; 10] = [
        Sensor::TempVapourHead,
        Sensor::TempBoilerLiquid,
        Sensor::TempPcb,
        Sensor::PressureAmbient,
        Sensor::PressureVapour,
        Sensor::Flow,
        Sensor::ValveReflux,
        Sensor::ValveProduct,
        Sensor::Heater1,
        Sensor::Heater2,
    ];

    pub const fn bit(self) -> u16 {
        1 << self as u8
    }

    /// Role name as used in the presence file.
    pub const fn name(self) -> &'static str {
        match self {
            Sensor::TempVapourHead => "temp_vapour_head",
            Sensor::TempBoilerLiquid => "temp_boiler_liquid",
            Sensor::TempPcb => "temp_pcb",
            Sensor::PressureAmbient => "pressure_ambient",
            Sensor::PressureVapour => "pressure_vapour",
            Sensor::Flow => "flow",
            Sensor::ValveReflux => "valve_reflux",
            Sensor::ValveProduct => "valve_product",
            Sensor::Heater1 => "heater_1",
            Sensor::Heater2 => "heater_2",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }
}

/// Bitfield of present sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorPresenceMask(u16);

/// On-disk shape: `present = ["temp_vapour_head", ...]`.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PresenceFile {
    present: Vec<String>,
}

impl SensorPresenceMask {
    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self(0x03FF);

    /// Build from raw bits.  Bits above 9 are dropped.
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn is_present(self, sensor: Sensor) -> bool {
        self.0 & sensor.bit() != 0
    }

    #[must_use]
    pub const fn with(self, sensor: Sensor) -> Self {
        Self(self.0 | sensor.bit())
    }

    /// Build from role names; an unknown name is an error.
    pub fn from_names<I, S>(names: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names.into_iter().try_fold(Self::NONE, |mask, name| {
            let name = name.as_ref();
            Sensor::from_name(name)
                .map(|s| mask.with(s))
                .ok_or_else(|| ConfigError::UnknownSensor(name.to_owned()))
        })
    }

    /// Load the mask from a presence file.
    ///
    /// A missing file is an error: the caller must not fall back to
    /// "everything present".
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        let file: PresenceFile = toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: display,
            detail: e.to_string(),
        })?;
        let mask = Self::from_names(&file.present)?;
        log::info!(
            "sensor presence loaded from {}: 0x{:03x} ({} of {})",
            path.display(),
            mask.0,
            mask.0.count_ones(),
            Sensor::ALL.len()
        );
        Ok(mask)
    }
}
