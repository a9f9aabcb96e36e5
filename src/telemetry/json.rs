//! JSON rendering of a telemetry snapshot.
//!
//! Alternative to the binary frame for observers that only speak the line
//! protocol.  Produces one `telemetry` envelope per call:
//!
//! ```text
//! {"version":"v0","type":"telemetry","payload":{"timestamp_ms":...,"mode":"ACTIVE",
//!  "temps":{"vapour_head":78.3,"boiler_liquid":null,...},...,"faults":["boiler_over_temp"]}}
//! ```
//!
//! Absent sensors render as `null`.

use heapless::Vec as HVec;
use serde::Serialize;

use crate::app::state::{ControllerState, ProcessState};
use crate::rpc::codec::{self, msg_type};
use crate::safety;
use crate::telemetry::presence::{Sensor, SensorPresenceMask};

/// Initial capacity of the render buffer.  A full payload is well under this.
pub const JSON_BUFFER_CAPACITY: usize = 1024;

#[derive(Debug, Serialize)]
pub struct TelemetryPayload<'a> {
    pub timestamp_ms: u64,
    pub mode: &'a str,
    pub target_abv: f64,
    pub target_flow: f64,
    pub temps: Temps,
    pub pressures: Pressures,
    pub flow_ml_min: Option<f32>,
    pub valves: Valves,
    pub heaters: Heaters,
    pub faults: HVec<&'a str, 32>,
}

#[derive(Debug, Serialize)]
pub struct Temps {
    pub vapour_head: Option<f32>,
    pub boiler_liquid: Option<f32>,
    pub pcb_environment: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct Pressures {
    pub ambient: Option<f32>,
    pub vapour: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct Valves {
    pub reflux_control: Option<u8>,
    pub product_takeoff: Option<u8>,
}

#[derive(Debug, Serialize)]
pub struct Heaters {
    pub heater_1: Option<u8>,
    pub heater_2: Option<u8>,
}

impl TelemetryPayload<'static> {
    pub fn from_state(
        process: &ProcessState,
        controller: &ControllerState,
        presence: SensorPresenceMask,
        timestamp_ms: u64,
    ) -> Self {
        let s = &process.sensors;
        let o = &process.outputs;
        let f = |sensor, v: f32| (presence.is_present(sensor) && v.is_finite()).then_some(v);
        let pct = |sensor, v: u8| presence.is_present(sensor).then_some(v);

        let mut faults = HVec::new();
        for name in safety::fault_names(process.fault_flags) {
            // Capacity covers every bit of a u32.
            let _ = faults.push(name);
        }

        Self {
            timestamp_ms,
            mode: controller.mode.as_str(),
            target_abv: controller.target_abv,
            target_flow: controller.target_flow,
            temps: Temps {
                vapour_head: f(Sensor::TempVapourHead, s.temp_vapour_head_c),
                boiler_liquid: f(Sensor::TempBoilerLiquid, s.temp_boiler_liquid_c),
                pcb_environment: f(Sensor::TempPcb, s.temp_pcb_c),
            },
            pressures: Pressures {
                ambient: f(Sensor::PressureAmbient, s.pressure_ambient_kpa),
                vapour: f(Sensor::PressureVapour, s.pressure_vapour_kpa),
            },
            flow_ml_min: f(Sensor::Flow, s.flow_ml_min),
            valves: Valves {
                reflux_control: pct(Sensor::ValveReflux, o.valve_reflux_pct),
                product_takeoff: pct(Sensor::ValveProduct, o.valve_product_pct),
            },
            heaters: Heaters {
                heater_1: pct(Sensor::Heater1, o.heater_1_pct),
                heater_2: pct(Sensor::Heater2, o.heater_2_pct),
            },
            faults,
        }
    }
}

/// Renders telemetry lines into a buffer reserved once at construction.
pub struct JsonRenderer {
    buf: Vec<u8>,
}

impl JsonRenderer {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(JSON_BUFFER_CAPACITY),
        }
    }

    /// Render one newline-terminated telemetry line.
    pub fn render(
        &mut self,
        process: &ProcessState,
        controller: &ControllerState,
        presence: SensorPresenceMask,
        timestamp_ms: u64,
    ) -> Result<&[u8], serde_json::Error> {
        self.buf.clear();
        let payload = TelemetryPayload::from_state(process, controller, presence, timestamp_ms);
        codec::write_line(&mut self.buf, msg_type::TELEMETRY, &payload)?;
        Ok(&self.buf)
    }
}

impl Default for JsonRenderer {
    fn default() -> Self {
        Self::new()
    }
}
