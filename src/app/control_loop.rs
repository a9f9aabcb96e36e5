//! Control loop: the fixed-period core.
//!
//! [`ControlLoop`] owns the process state, the safety supervisor and every
//! driven port.  One tick:
//!
//! ```text
//!  SensorPort ──▶ Safety ──▶ ControlAlgorithm ──▶ override ──▶ ActuatorPort
//!                                                         │
//!                          (every telemetry interval)     └──▶ encode ──▶ TelemetrySink
//! ```
//!
//! All buffers are sized in [`ControlLoop::new`]; a tick performs no heap
//! allocation.  Ticks never queue: an overrunning tick is followed
//! immediately by the next one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::{SystemConfig, TelemetryEncoding};
use crate::safety::SafetySupervisor;
use crate::telemetry::frame::{FRAME_LEN, TelemetryFrame};
use crate::telemetry::json::JsonRenderer;
use crate::telemetry::presence::SensorPresenceMask;

use super::events::AppEvent;
use super::ports::{ActuatorPort, Clock, ControlAlgorithm, EventSink, SensorPort, TelemetrySink};
use super::state::{ControllerState, Mode, ProcessState, SharedState};

/// What happened during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    /// Telemetry was encoded and handed to the sink this tick.
    pub published: bool,
    pub fault_flags: u32,
}

// ───────────────────────────────────────────────────────────────
// ControlLoop
// ───────────────────────────────────────────────────────────────

pub struct ControlLoop<H, A, T, E> {
    state: SharedState,
    process: ProcessState,
    safety: SafetySupervisor,
    presence: SensorPresenceMask,

    hw: H,
    algorithm: A,
    telemetry: T,
    events: E,

    period_ms: u32,
    telemetry_interval_ms: u32,
    encoding: TelemetryEncoding,
    frame_buf: [u8; FRAME_LEN],
    json: JsonRenderer,

    last_publish_ms: Option<u64>,
    last_mode: Mode,
    tick_count: u64,
    overruns: u64,
    incomplete_publishes: u64,
}

impl<H, A, T, E> ControlLoop<H, A, T, E>
where
    H: SensorPort + ActuatorPort,
    A: ControlAlgorithm,
    T: TelemetrySink,
    E: EventSink,
{
    pub fn new(
        config: &SystemConfig,
        presence: SensorPresenceMask,
        state: SharedState,
        hw: H,
        algorithm: A,
        telemetry: T,
        events: E,
    ) -> Self {
        let last_mode = state.snapshot().mode;
        Self {
            state,
            process: ProcessState::default(),
            safety: SafetySupervisor::new(config.safety, presence),
            presence,
            hw,
            algorithm,
            telemetry,
            events,
            period_ms: config.timing.control_period_ms,
            telemetry_interval_ms: config.timing.telemetry_interval_ms,
            encoding: config.telemetry.encoding,
            frame_buf: [0; FRAME_LEN],
            json: JsonRenderer::new(),
            last_publish_ms: None,
            last_mode,
            tick_count: 0,
            overruns: 0,
            incomplete_publishes: 0,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Tick every period until `running` is cleared.
    ///
    /// The flag is checked once per tick boundary; a tick in progress is
    /// never interrupted.
    pub fn run(&mut self, running: &AtomicBool, clock: &impl Clock) {
        let period = Duration::from_millis(u64::from(self.period_ms));
        self.events.emit(&AppEvent::Started {
            mode: self.last_mode,
            period_ms: self.period_ms,
            telemetry_interval_ms: self.telemetry_interval_ms,
        });

        while running.load(Ordering::Acquire) {
            let started = Instant::now();
            self.tick(clock.monotonic_ms(), clock.unix_ms());
            let elapsed = started.elapsed();

            match period.checked_sub(elapsed) {
                Some(remaining) => thread::sleep(remaining),
                None => {
                    self.overruns += 1;
                    self.events.emit(&AppEvent::Overrun {
                        elapsed_ms: elapsed.as_millis() as u64,
                        period_ms: self.period_ms,
                        total: self.overruns,
                    });
                }
            }
        }

        self.events.emit(&AppEvent::Stopped {
            ticks: self.tick_count,
            overruns: self.overruns,
        });
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// Run one control cycle.
    ///
    /// `now_ms` is monotonic and decides the publish cadence;
    /// `timestamp_ms` is stamped into the telemetry record.
    pub fn tick(&mut self, now_ms: u64, timestamp_ms: u64) -> TickOutcome {
        self.tick_count += 1;
        let controller = self.state.snapshot();
        if controller.mode != self.last_mode {
            self.events.emit(&AppEvent::ModeChanged {
                from: self.last_mode,
                to: controller.mode,
            });
            self.last_mode = controller.mode;
        }

        // 1. Refresh sensors
        self.hw.refresh(&mut self.process.sensors);

        // 2. Safety evaluation
        let prev_faults = self.process.fault_flags;
        let faults = self.safety.evaluate(&self.process.sensors);
        self.process.fault_flags = faults;
        if faults & !prev_faults != 0 {
            self.events.emit(&AppEvent::FaultDetected(faults));
        } else if faults == 0 && prev_faults != 0 {
            self.events.emit(&AppEvent::FaultCleared);
        }

        // 3. Control algorithm, then safety override
        let mut outputs = self.algorithm.compute(&controller, &self.process).clamped();
        if faults != 0 {
            outputs.heater_1_pct = 0;
            outputs.heater_2_pct = 0;
        }
        self.process.outputs = outputs;
        self.hw.apply(&outputs);

        // 4. Telemetry at its own cadence
        let due = self
            .last_publish_ms
            .is_none_or(|last| now_ms.saturating_sub(last) >= u64::from(self.telemetry_interval_ms));
        if due {
            self.publish(&controller, timestamp_ms);
            self.last_publish_ms = Some(now_ms);
        }

        TickOutcome {
            published: due,
            fault_flags: faults,
        }
    }

    fn publish(&mut self, controller: &ControllerState, timestamp_ms: u64) {
        let delivered = match self.encoding {
            TelemetryEncoding::Binary => {
                TelemetryFrame::from_state(&self.process, controller, self.presence, timestamp_ms)
                    .encode(&mut self.frame_buf);
                self.telemetry.publish(&self.frame_buf)
            }
            TelemetryEncoding::Json => {
                match self.json.render(&self.process, controller, self.presence, timestamp_ms) {
                    Ok(line) => self.telemetry.publish(line),
                    Err(e) => {
                        warn!("telemetry render failed: {}", e);
                        false
                    }
                }
            }
        };
        if !delivered {
            self.incomplete_publishes += 1;
            debug!(
                "telemetry not delivered to every peer ({} so far)",
                self.incomplete_publishes
            );
        }
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn process(&self) -> &ProcessState {
        &self.process
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    pub fn hw(&self) -> &H {
        &self.hw
    }

    pub fn telemetry(&self) -> &T {
        &self.telemetry
    }

    pub fn events(&self) -> &E {
        &self.events
    }

    /// Tear down and hand back the owned ports.
    pub fn into_parts(self) -> (H, A, T, E) {
        info!(
            "control loop released after {} ticks ({} overruns)",
            self.tick_count, self.overruns
        );
        (self.hw, self.algorithm, self.telemetry, self.events)
    }
}
