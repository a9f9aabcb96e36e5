//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing each control-loop event as a single
//! log line through the `log` facade.

use log::{error, info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;
use crate::safety::FaultList;

/// Adapter that logs every [`AppEvent`].
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Started {
                mode,
                period_ms,
                telemetry_interval_ms,
            } => {
                info!(
                    "START | mode={} | period={}ms | telemetry every {}ms",
                    mode.as_str(),
                    period_ms,
                    telemetry_interval_ms
                );
            }
            AppEvent::ModeChanged { from, to } => {
                info!("MODE | {} -> {}", from.as_str(), to.as_str());
            }
            AppEvent::FaultDetected(flags) => {
                error!("FAULT | flags=0b{:03b} [{}]", flags, FaultList(*flags));
            }
            AppEvent::FaultCleared => {
                info!("FAULT | all cleared");
            }
            AppEvent::Overrun {
                elapsed_ms,
                period_ms,
                total,
            } => {
                warn!(
                    "OVERRUN | tick took {}ms (period {}ms), {} overruns so far",
                    elapsed_ms, period_ms, total
                );
            }
            AppEvent::Stopped { ticks, overruns } => {
                info!("STOP | {} ticks, {} overruns", ticks, overruns);
            }
        }
    }
}
