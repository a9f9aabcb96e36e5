//! Safety supervisor.
//!
//! Runs every tick right after the sensor refresh and maintains the fault
//! bitmask published in telemetry.  Only sensors marked present are
//! evaluated: an absent sensor can neither raise nor hold a fault.
//!
//! ## Fault lifecycle
//!
//! 1. A reading crosses its configured limit; the bit is set and logged.
//! 2. While any fault is active the control loop forces both heaters to 0
//!    after the control algorithm has run.
//! 3. Each tick re-evaluates.  When the reading returns within limits the
//!    bit clears.

use core::fmt;

use log::{error, info};

use crate::app::state::SensorReadings;
use crate::config::SafetyConfig;
use crate::telemetry::presence::{Sensor, SensorPresenceMask};

pub const FAULT_BOILER_OVER_TEMP: u32 = 1 << 0;
pub const FAULT_VAPOUR_OVER_PRESSURE: u32 = 1 << 1;
pub const FAULT_PCB_OVER_TEMP: u32 = 1 << 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyFault {
    BoilerOverTemp,
    VapourOverPressure,
    PcbOverTemp,
}

impl SafetyFault {
    pub const ALL: [SafetyFault; 3] = [
        SafetyFault::BoilerOverTemp,
        SafetyFault::VapourOverPressure,
        SafetyFault::PcbOverTemp,
    ];

    pub const fn mask(self) -> u32 {
        match self {
            SafetyFault::BoilerOverTemp => FAULT_BOILER_OVER_TEMP,
            SafetyFault::VapourOverPressure => FAULT_VAPOUR_OVER_PRESSURE,
            SafetyFault::PcbOverTemp => FAULT_PCB_OVER_TEMP,
        }
    }

    /// Name used in JSON telemetry.
    pub const fn name(self) -> &'static str {
        match self {
            SafetyFault::BoilerOverTemp => "boiler_over_temp",
            SafetyFault::VapourOverPressure => "vapour_over_pressure",
            SafetyFault::PcbOverTemp => "pcb_over_temp",
        }
    }
}

impl fmt::Display for SafetyFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Names of the faults set in `flags`, in bit order.
pub fn fault_names(flags: u32) -> impl Iterator<Item = &'static str> {
    SafetyFault::ALL
        .into_iter()
        .filter(move |f| flags & f.mask() != 0)
        .map(SafetyFault::name)
}

/// Displays the names of the faults in a mask, comma-separated.
pub struct FaultList(pub u32);

impl fmt::Display for FaultList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, name) in fault_names(self.0).enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(name)?;
        }
        Ok(())
    }
}

pub struct SafetySupervisor {
    limits: SafetyConfig,
    presence: SensorPresenceMask,
    faults: u32,
}

impl SafetySupervisor {
    pub fn new(limits: SafetyConfig, presence: SensorPresenceMask) -> Self {
        Self {
            limits,
            presence,
            faults: 0,
        }
    }

    /// Evaluate every limit against the latest readings.
    /// Returns the updated fault bitmask.
    pub fn evaluate(&mut self, s: &SensorReadings) -> u32 {
        self.eval_fault(
            SafetyFault::BoilerOverTemp,
            Sensor::TempBoilerLiquid,
            s.temp_boiler_liquid_c > self.limits.max_boiler_temp_c,
        );
        self.eval_fault(
            SafetyFault::VapourOverPressure,
            Sensor::PressureVapour,
            s.pressure_vapour_kpa > self.limits.max_vapour_pressure_kpa,
        );
        self.eval_fault(
            SafetyFault::PcbOverTemp,
            Sensor::TempPcb,
            s.temp_pcb_c > self.limits.max_pcb_temp_c,
        );
        self.faults
    }

    // ── Internal ──────────────────────────────────────────────────

    fn eval_fault(&mut self, fault: SafetyFault, sensor: Sensor, over_limit: bool) {
        let condition = self.presence.is_present(sensor) && over_limit;
        if condition {
            if self.faults & fault.mask() == 0 {
                error!("SAFETY FAULT SET: {fault}");
            }
            self.faults |= fault.mask();
        } else {
            if self.faults & fault.mask() != 0 {
                info!("SAFETY FAULT CLEARED: {fault}");
            }
            self.faults &= !fault.mask();
        }
    }
}
