//! Binary telemetry frame.
//!
//! Fixed 32-byte little-endian record, fields in this order:
//!
//! | off | field              | type | scale | absent     |
//! |-----|--------------------|------|-------|------------|
//! |  0  | version            | u8   |       |            |
//! |  1  | timestamp_ms       | u64  |       |            |
//! |  9  | mode               | u8   |       |            |
//! | 10  | temp_vapour_head   | i16  | ×100  | `i16::MAX` |
//! | 12  | temp_boiler_liquid | i16  | ×100  | `i16::MAX` |
//! | 14  | temp_pcb           | i16  | ×100  | `i16::MAX` |
//! | 16  | pressure_ambient   | i16  | ×100  | `i16::MAX` |
//! | 18  | pressure_vapour    | i16  | ×100  | `i16::MAX` |
//! | 20  | flow_ml_min        | u16  | ×10   | `u16::MAX` |
//! | 22  | valve_reflux       | u8   |       | `u8::MAX`  |
//! | 23  | valve_product      | u8   |       | `u8::MAX`  |
//! | 24  | heater_1           | u8   |       | `u8::MAX`  |
//! | 25  | heater_2           | u8   |       | `u8::MAX`  |
//! | 26  | faults             | u32  |       |            |
//! | 30  | sensor_presence    | u16  |       |            |
//!
//! Present readings are rounded and saturated one step short of the
//! sentinel, so a real value can never be mistaken for "absent".  A
//! non-finite reading is encoded as absent.

use core::fmt;

use crate::app::state::{ControllerState, ProcessState};
use crate::telemetry::presence::{Sensor, SensorPresenceMask};

pub const FRAME_VERSION: u8 = 1;
pub const FRAME_LEN: usize = 32;

pub const TEMP_SCALE: f32 = 100.0;
pub const PRESSURE_SCALE: f32 = 100.0;
pub const FLOW_SCALE: f32 = 10.0;

pub const I16_ABSENT: i16 = i16::MAX;
pub const U16_ABSENT: u16 = u16::MAX;
pub const U8_ABSENT: u8 = u8::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    TooShort { len: usize },
    UnsupportedVersion(u8),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { len } => {
                write!(f, "frame too short: {len} bytes (need {FRAME_LEN})")
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported frame version {v}"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Wire-level frame contents.  Values are already scaled; sentinels are
/// stored as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TelemetryFrame {
    pub version: u8,
    pub timestamp_ms: u64,
    pub mode: u8,
    pub temp_vapour_head: i16,
    pub temp_boiler_liquid: i16,
    pub temp_pcb: i16,
    pub pressure_ambient: i16,
    pub pressure_vapour: i16,
    pub flow_ml_min: u16,
    pub valve_reflux: u8,
    pub valve_product: u8,
    pub heater_1: u8,
    pub heater_2: u8,
    pub faults: u32,
    pub sensor_presence: u16,
}

impl TelemetryFrame {
    /// Build a frame from live state.  Pure; no allocation.
    pub fn from_state(
        process: &ProcessState,
        controller: &ControllerState,
        presence: SensorPresenceMask,
        timestamp_ms: u64,
    ) -> Self {
        let s = &process.sensors;
        let o = &process.outputs;
        let temp = |sensor, v| scale_i16(presence.is_present(sensor), v, TEMP_SCALE);
        let pressure = |sensor, v| scale_i16(presence.is_present(sensor), v, PRESSURE_SCALE);
        let pct = |sensor, v: u8| {
            if presence.is_present(sensor) {
                v.min(100)
            } else {
                U8_ABSENT
            }
        };

        Self {
            version: FRAME_VERSION,
            timestamp_ms,
            mode: controller.mode.wire_code(),
            temp_vapour_head: temp(Sensor::TempVapourHead, s.temp_vapour_head_c),
            temp_boiler_liquid: temp(Sensor::TempBoilerLiquid, s.temp_boiler_liquid_c),
            temp_pcb: temp(Sensor::TempPcb, s.temp_pcb_c),
            pressure_ambient: pressure(Sensor::PressureAmbient, s.pressure_ambient_kpa),
            pressure_vapour: pressure(Sensor::PressureVapour, s.pressure_vapour_kpa),
            flow_ml_min: scale_u16(presence.is_present(Sensor::Flow), s.flow_ml_min, FLOW_SCALE),
            valve_reflux: pct(Sensor::ValveReflux, o.valve_reflux_pct),
            valve_product: pct(Sensor::ValveProduct, o.valve_product_pct),
            heater_1: pct(Sensor::Heater1, o.heater_1_pct),
            heater_2: pct(Sensor::Heater2, o.heater_2_pct),
            faults: process.fault_flags,
            sensor_presence: presence.bits(),
        }
    }

    /// Serialize into a caller-owned buffer.
    pub fn encode(&self, out: &mut [u8; FRAME_LEN]) {
        let mut w = Writer { buf: out, pos: 0 };
        w.put(&[self.version]);
        w.put(&self.timestamp_ms.to_le_bytes());
        w.put(&[self.mode]);
        w.put(&self.temp_vapour_head.to_le_bytes());
        w.put(&self.temp_boiler_liquid.to_le_bytes());
        w.put(&self.temp_pcb.to_le_bytes());
        w.put(&self.pressure_ambient.to_le_bytes());
        w.put(&self.pressure_vapour.to_le_bytes());
        w.put(&self.flow_ml_min.to_le_bytes());
        w.put(&[self.valve_reflux, self.valve_product, self.heater_1, self.heater_2]);
        w.put(&self.faults.to_le_bytes());
        w.put(&self.sensor_presence.to_le_bytes());
        debug_assert_eq!(w.pos, FRAME_LEN);
    }

    /// Parse the first [`FRAME_LEN`] bytes of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let Some(buf) = bytes.first_chunk::<FRAME_LEN>() else {
            return Err(FrameError::TooShort { len: bytes.len() });
        };
        if buf[0] != FRAME_VERSION {
            return Err(FrameError::UnsupportedVersion(buf[0]));
        }
        let mut r = Reader { buf, pos: 1 };
        Ok(Self {
            version: FRAME_VERSION,
            timestamp_ms: u64::from_le_bytes(r.take()),
            mode: r.byte(),
            temp_vapour_head: i16::from_le_bytes(r.take()),
            temp_boiler_liquid: i16::from_le_bytes(r.take()),
            temp_pcb: i16::from_le_bytes(r.take()),
            pressure_ambient: i16::from_le_bytes(r.take()),
            pressure_vapour: i16::from_le_bytes(r.take()),
            flow_ml_min: u16::from_le_bytes(r.take()),
            valve_reflux: r.byte(),
            valve_product: r.byte(),
            heater_1: r.byte(),
            heater_2: r.byte(),
            faults: u32::from_le_bytes(r.take()),
            sensor_presence: u16::from_le_bytes(r.take()),
        })
    }

    // ── Unscaled accessors (None = absent) ──────────────────────

    pub fn temp_vapour_head_c(&self) -> Option<f32> {
        unscale_i16(self.temp_vapour_head, TEMP_SCALE)
    }

    pub fn temp_boiler_liquid_c(&self) -> Option<f32> {
        unscale_i16(self.temp_boiler_liquid, TEMP_SCALE)
    }

    pub fn temp_pcb_c(&self) -> Option<f32> {
        unscale_i16(self.temp_pcb, TEMP_SCALE)
    }

    pub fn pressure_ambient_kpa(&self) -> Option<f32> {
        unscale_i16(self.pressure_ambient, PRESSURE_SCALE)
    }

    pub fn pressure_vapour_kpa(&self) -> Option<f32> {
        unscale_i16(self.pressure_vapour, PRESSURE_SCALE)
    }

    pub fn flow(&self) -> Option<f32> {
        (self.flow_ml_min != U16_ABSENT).then(|| f32::from(self.flow_ml_min) / FLOW_SCALE)
    }

    pub fn valve_reflux_pct(&self) -> Option<u8> {
        present_u8(self.valve_reflux)
    }

    pub fn valve_product_pct(&self) -> Option<u8> {
        present_u8(self.valve_product)
    }

    pub fn heater_1_pct(&self) -> Option<u8> {
        present_u8(self.heater_1)
    }

    pub fn heater_2_pct(&self) -> Option<u8> {
        present_u8(self.heater_2)
    }

    pub fn presence(&self) -> SensorPresenceMask {
        SensorPresenceMask::from_bits(self.sensor_presence)
    }
}

// ───────────────────────────────────────────────────────────────
// Scaling helpers
// ───────────────────────────────────────────────────────────────

fn scale_i16(present: bool, value: f32, scale: f32) -> i16 {
    if !present || !value.is_finite() {
        return I16_ABSENT;
    }
    (value * scale)
        .round()
        .clamp(f32::from(i16::MIN), f32::from(I16_ABSENT - 1)) as i16
}

fn scale_u16(present: bool, value: f32, scale: f32) -> u16 {
    if !present || !value.is_finite() {
        return U16_ABSENT;
    }
    (value * scale).round().clamp(0.0, f32::from(U16_ABSENT - 1)) as u16
}

fn unscale_i16(raw: i16, scale: f32) -> Option<f32> {
    (raw != I16_ABSENT).then(|| f32::from(raw) / scale)
}

fn present_u8(raw: u8) -> Option<u8> {
    (raw != U8_ABSENT).then_some(raw)
}

struct Writer<'a> {
    buf: &'a mut [u8; FRAME_LEN],
    pos: usize,
}

impl Writer<'_> {
    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }
}

struct Reader<'a> {
    buf: &'a [u8; FRAME_LEN],
    pos: usize,
}

impl Reader<'_> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn byte(&mut self) -> u8 {
        let [b] = self.take::<1>();
        b
    }
}
