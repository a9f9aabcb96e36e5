//! Port traits: the boundary between the control loop and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ ControlLoop (domain)
//! ```
//!
//! Driven adapters (sensors, actuators, telemetry fan-out, event sinks)
//! implement these traits.  The [`ControlLoop`](super::control_loop::ControlLoop)
//! owns them as generics, so the domain core never touches hardware or
//! sockets directly.
//!
//! Everything called from inside a tick must return promptly and must not
//! allocate in steady state.

use super::events::AppEvent;
use super::state::{ActuatorOutputs, ControllerState, ProcessState, SensorReadings};

// ───────────────────────────────────────────────────────────────
// Sensor port (driven adapter: hardware → domain)
// ───────────────────────────────────────────────────────────────

/// Read-side port: refreshes the readings in place once per tick.
pub trait SensorPort {
    fn refresh(&mut self, readings: &mut SensorReadings);
}

// ───────────────────────────────────────────────────────────────
// Actuator port (driven adapter: domain → hardware)
// ───────────────────────────────────────────────────────────────

/// Write-side port: applies the outputs computed for this tick.
pub trait ActuatorPort {
    fn apply(&mut self, outputs: &ActuatorOutputs);
}

// ───────────────────────────────────────────────────────────────
// Control algorithm (pluggable collaborator)
// ───────────────────────────────────────────────────────────────

/// Computes actuator outputs from the operator's targets and the latest
/// process state.  Safety overrides are applied after this returns.
pub trait ControlAlgorithm {
    fn compute(&mut self, controller: &ControllerState, process: &ProcessState) -> ActuatorOutputs;
}

// ───────────────────────────────────────────────────────────────
// Telemetry sink (driven adapter: domain → observers)
// ───────────────────────────────────────────────────────────────

/// Outbound telemetry.  Must never block the caller.
///
/// Returns `true` when every current observer received the record.
pub trait TelemetrySink {
    fn publish(&mut self, record: &[u8]) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`]s through this port.
pub trait EventSink {
    fn emit(&mut self, event: &AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Clock
// ───────────────────────────────────────────────────────────────

pub trait Clock {
    /// Milliseconds on a monotonic clock; drives publish cadence.
    fn monotonic_ms(&self) -> u64;

    /// Wall-clock milliseconds since the Unix epoch; stamped into telemetry.
    fn unix_ms(&self) -> u64;
}
