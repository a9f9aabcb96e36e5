//! Default control algorithm.
//!
//! The real regulation law is a pluggable [`ControlAlgorithm`]; this one
//! only guarantees a safe baseline:
//!
//! - **IDLE**: every actuator is off.
//! - **ACTIVE**: outputs are held.  On entry from IDLE they start at the
//!   configured entry preset (all off unless set).

use crate::app::ports::ControlAlgorithm;
use crate::app::state::{ActuatorOutputs, ControllerState, Mode, ProcessState};

#[derive(Debug, Clone, Default)]
pub struct IdleSafeHold {
    entry_preset: ActuatorOutputs,
    was_active: bool,
}

impl IdleSafeHold {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outputs applied on the first ACTIVE tick after IDLE.
    #[must_use]
    pub fn with_entry_preset(mut self, preset: ActuatorOutputs) -> Self {
        self.entry_preset = preset.clamped();
        self
    }
}

impl ControlAlgorithm for IdleSafeHold {
    fn compute(&mut self, controller: &ControllerState, process: &ProcessState) -> ActuatorOutputs {
        match controller.mode {
            Mode::Idle => {
                self.was_active = false;
                ActuatorOutputs::OFF
            }
            Mode::Active if !self.was_active => {
                self.was_active = true;
                self.entry_preset
            }
            Mode::Active => process.outputs,
        }
    }
}
