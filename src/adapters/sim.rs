//! Simulated plant: lets the daemon run without hardware.
//!
//! Implements both [`SensorPort`] and [`ActuatorPort`]: applied outputs
//! feed a crude first-order model that the next refresh reads back.
//!
//! - Boiler liquid temperature relaxes toward a setpoint proportional to
//!   mean heater power.
//! - Vapour head follows the boiler once it passes the ethanol boiling point.
//! - Vapour pressure rises with boiler temperature above that point.
//! - Product flow is proportional to the product valve while vapour reaches
//!   the head.

use crate::app::ports::{ActuatorPort, SensorPort};
use crate::app::state::{ActuatorOutputs, SensorReadings};

const AMBIENT_C: f32 = 20.0;
const AMBIENT_KPA: f32 = 101.3;
const ETHANOL_BOIL_C: f32 = 78.4;
/// Temperature rise above ambient at 100% heater power.
const FULL_POWER_RISE_C: f32 = 85.0;
const BOILER_TAU_S: f32 = 30.0;
const HEAD_TAU_S: f32 = 10.0;
const KPA_PER_C: f32 = 0.8;
const FLOW_PER_VALVE_PCT: f32 = 0.5;

pub struct SimulatedPlant {
    readings: SensorReadings,
    outputs: ActuatorOutputs,
    dt_s: f32,
}

impl SimulatedPlant {
    /// `period_ms` is the control period; one refresh advances the model by it.
    pub fn new(period_ms: u32) -> Self {
        Self {
            readings: SensorReadings {
                temp_vapour_head_c: AMBIENT_C,
                temp_boiler_liquid_c: AMBIENT_C,
                temp_pcb_c: AMBIENT_C + 10.0,
                pressure_ambient_kpa: AMBIENT_KPA,
                pressure_vapour_kpa: AMBIENT_KPA,
                flow_ml_min: 0.0,
            },
            outputs: ActuatorOutputs::OFF,
            dt_s: period_ms as f32 / 1000.0,
        }
    }

    pub fn readings(&self) -> &SensorReadings {
        &self.readings
    }

    pub fn outputs(&self) -> &ActuatorOutputs {
        &self.outputs
    }

    fn step(&mut self) {
        let r = &mut self.readings;
        let o = &self.outputs;
        let power = (f32::from(o.heater_1_pct) + f32::from(o.heater_2_pct)) / 200.0;

        let boiler_target = AMBIENT_C + power * FULL_POWER_RISE_C;
        r.temp_boiler_liquid_c += (boiler_target - r.temp_boiler_liquid_c) * (self.dt_s / BOILER_TAU_S).min(1.0);

        let boiling = r.temp_boiler_liquid_c >= ETHANOL_BOIL_C;
        let head_target = if boiling { r.temp_boiler_liquid_c - 2.0 } else { AMBIENT_C };
        r.temp_vapour_head_c += (head_target - r.temp_vapour_head_c) * (self.dt_s / HEAD_TAU_S).min(1.0);

        r.pressure_vapour_kpa =
            AMBIENT_KPA + (r.temp_boiler_liquid_c - ETHANOL_BOIL_C).max(0.0) * KPA_PER_C;
        r.temp_pcb_c = AMBIENT_C + 10.0 + power * 5.0;
        r.flow_ml_min = if boiling {
            f32::from(o.valve_product_pct) * FLOW_PER_VALVE_PCT
        } else {
            0.0
        };
    }
}

impl SensorPort for SimulatedPlant {
    fn refresh(&mut self, readings: &mut SensorReadings) {
        self.step();
        *readings = self.readings;
    }
}

impl ActuatorPort for SimulatedPlant {
    fn apply(&mut self, outputs: &ActuatorOutputs) {
        self.outputs = *outputs;
    }
}
