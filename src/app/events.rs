//! Outbound application events.
//!
//! The [`ControlLoop`](super::control_loop::ControlLoop) emits these through
//! the [`EventSink`](super::ports::EventSink) port.

use super::state::Mode;

/// Structured events emitted by the control loop.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// The loop has started (carries its cadence).
    Started {
        mode: Mode,
        period_ms: u32,
        telemetry_interval_ms: u32,
    },

    /// The loop observed a mode change made over the command channel.
    ModeChanged { from: Mode, to: Mode },

    /// One or more safety faults were raised.  Carries the full mask.
    FaultDetected(u32),

    /// All safety faults have been cleared.
    FaultCleared,

    /// A tick took longer than its period.
    Overrun {
        elapsed_ms: u64,
        period_ms: u32,
        total: u64,
    },

    /// The loop observed its stop flag and exited.
    Stopped { ticks: u64, overruns: u64 },
}
