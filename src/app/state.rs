//! Authoritative controller and process state.
//!
//! [`ControllerState`] is written by the protocol engine and read by the
//! control loop; the two meet through [`SharedState`].  [`ProcessState`]
//! is owned by the control loop alone.

use std::sync::{Arc, Mutex, MutexGuard};

/// Operating mode selected over the command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Idle,
    Active,
}

impl Mode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Mode::Idle => "IDLE",
            Mode::Active => "ACTIVE",
        }
    }

    /// Case-sensitive parse of the wire literal.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "IDLE" => Some(Mode::Idle),
            "ACTIVE" => Some(Mode::Active),
            _ => None,
        }
    }

    /// Process-mode code carried in the telemetry frame.
    ///
    /// 1, 3 and 4 are reserved for startup, shutdown and fault.
    pub const fn wire_code(self) -> u8 {
        match self {
            Mode::Idle => 0,
            Mode::Active => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControllerState {
    pub mode: Mode,
    /// Target alcohol by volume, percent, `[0, 100]`.
    pub target_abv: f64,
    /// Target product flow, mL/min, `>= 0`.
    pub target_flow: f64,
}

/// `ControllerState` behind a single lock.
///
/// Every update replaces whole fields, so a poisoned lock still holds a
/// consistent value and is recovered rather than propagated.
#[derive(Debug, Clone, Default)]
pub struct SharedState(Arc<Mutex<ControllerState>>);

impl SharedState {
    pub fn new(initial: ControllerState) -> Self {
        Self(Arc::new(Mutex::new(initial)))
    }

    pub fn snapshot(&self) -> ControllerState {
        *self.lock()
    }

    pub fn set_mode(&self, mode: Mode) -> Mode {
        let mut s = self.lock();
        std::mem::replace(&mut s.mode, mode)
    }

    /// Replace both targets under one lock acquisition.
    pub fn set_targets(&self, target_abv: f64, target_flow: f64) {
        let mut s = self.lock();
        s.target_abv = target_abv;
        s.target_flow = target_flow;
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

// ───────────────────────────────────────────────────────────────
// Process state (control loop only)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorReadings {
    pub temp_vapour_head_c: f32,
    pub temp_boiler_liquid_c: f32,
    pub temp_pcb_c: f32,
    pub pressure_ambient_kpa: f32,
    pub pressure_vapour_kpa: f32,
    pub flow_ml_min: f32,
}

/// Actuator commands, each a percentage `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActuatorOutputs {
    pub valve_reflux_pct: u8,
    pub valve_product_pct: u8,
    pub heater_1_pct: u8,
    pub heater_2_pct: u8,
}

impl ActuatorOutputs {
    pub const OFF: Self = Self {
        valve_reflux_pct: 0,
        valve_product_pct: 0,
        heater_1_pct: 0,
        heater_2_pct: 0,
    };

    /// Clamp every channel to 100.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            valve_reflux_pct: self.valve_reflux_pct.min(100),
            valve_product_pct: self.valve_product_pct.min(100),
            heater_1_pct: self.heater_1_pct.min(100),
            heater_2_pct: self.heater_2_pct.min(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProcessState {
    pub sensors: SensorReadings,
    pub outputs: ActuatorOutputs,
    pub fault_flags: u32,
}
