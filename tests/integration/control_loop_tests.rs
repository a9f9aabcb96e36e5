//! Integration tests for the command → shared state → control loop →
//! telemetry pipeline, driven tick by tick with a mock plant.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use super::mock_plant::{EventLog, MockPlant, NOMINAL, RecordingSink};

use stillctl::adapters::time::SystemClock;
use stillctl::app::control_loop::ControlLoop;
use stillctl::app::events::AppEvent;
use stillctl::app::ports::{ActuatorPort, SensorPort};
use stillctl::app::state::{ActuatorOutputs, Mode, SensorReadings, SharedState};
use stillctl::config::SystemConfig;
use stillctl::control::IdleSafeHold;
use stillctl::rpc::ProtocolEngine;
use stillctl::rpc::codec::parse_ack;
use stillctl::safety::FAULT_BOILER_OVER_TEMP;
use stillctl::telemetry::frame::{I16_ABSENT, U8_ABSENT};
use stillctl::telemetry::{FRAME_LEN, Sensor, SensorPresenceMask, TelemetryFrame};

const PRESET: ActuatorOutputs = ActuatorOutputs {
    valve_reflux_pct: 65,
    valve_product_pct: 30,
    heater_1_pct: 70,
    heater_2_pct: 70,
};

type Loop = ControlLoop<MockPlant, IdleSafeHold, RecordingSink, EventLog>;

fn make(plant: MockPlant, presence: SensorPresenceMask) -> (Loop, ProtocolEngine) {
    let state = SharedState::default();
    let engine = ProtocolEngine::new(state.clone());
    let cl = ControlLoop::new(
        &SystemConfig::default(),
        presence,
        state,
        plant,
        IdleSafeHold::new().with_entry_preset(PRESET),
        RecordingSink::default(),
        EventLog::default(),
    );
    (cl, engine)
}

fn send(engine: &ProtocolEngine, line: &str) {
    let ack = parse_ack(&engine.process(line)).unwrap();
    assert!(ack.is_ok(), "{line} rejected: {:?}", ack.message);
}

fn last_frame(cl: &Loop) -> TelemetryFrame {
    let record = cl.telemetry().records.last().expect("nothing published");
    assert_eq!(record.len(), FRAME_LEN);
    TelemetryFrame::decode(record).unwrap()
}

fn hot_boiler() -> SensorReadings {
    SensorReadings {
        temp_boiler_liquid_c: 112.0,
        ..NOMINAL
    }
}

// ── Command → loop ────────────────────────────────────────────

#[test]
fn set_mode_active_drives_outputs_on_next_tick() {
    let (mut cl, engine) = make(MockPlant::new(), SensorPresenceMask::ALL);

    cl.tick(0, 1_000);
    assert_eq!(cl.hw().last_applied(), Some(&ActuatorOutputs::OFF));

    send(
        &engine,
        r#"{"version":"v0","type":"set_mode","payload":{"mode":"ACTIVE"}}"#,
    );
    cl.tick(100, 1_100);
    assert_eq!(cl.hw().last_applied(), Some(&PRESET));
    assert_eq!(
        cl.events()
            .count(|e| matches!(e, AppEvent::ModeChanged { to: Mode::Active, .. })),
        1
    );

    send(
        &engine,
        r#"{"version":"v0","type":"set_mode","payload":{"mode":"IDLE"}}"#,
    );
    cl.tick(200, 1_200);
    assert_eq!(cl.hw().last_applied(), Some(&ActuatorOutputs::OFF));
}

#[test]
fn targets_reach_json_telemetry() {
    let state = SharedState::default();
    let engine = ProtocolEngine::new(state.clone());
    let mut config = SystemConfig::default();
    config.telemetry.encoding = stillctl::config::TelemetryEncoding::Json;
    let mut cl = ControlLoop::new(
        &config,
        SensorPresenceMask::ALL,
        state,
        MockPlant::new(),
        IdleSafeHold::new(),
        RecordingSink::default(),
        EventLog::default(),
    );

    send(
        &engine,
        r#"{"version":"v0","type":"set_targets","payload":{"target_abv":92.5,"target_flow":4}}"#,
    );
    cl.tick(0, 42);

    let record = cl.telemetry().records.last().unwrap();
    assert_eq!(record.last(), Some(&b'\n'));
    let v: serde_json::Value = serde_json::from_slice(record).unwrap();
    assert_eq!(v["type"], "telemetry");
    assert_eq!(v["payload"]["timestamp_ms"], 42);
    assert_eq!(v["payload"]["target_abv"], 92.5);
    assert_eq!(v["payload"]["target_flow"], 4.0);
    assert_eq!(v["payload"]["mode"], "IDLE");
}

// ── Telemetry content ────────────────────────────────────────

#[test]
fn frame_carries_scaled_readings_and_outputs() {
    let (mut cl, engine) = make(MockPlant::new(), SensorPresenceMask::ALL);
    send(
        &engine,
        r#"{"version":"v0","type":"set_mode","payload":{"mode":"ACTIVE"}}"#,
    );
    cl.tick(0, 1_700_000_000_000);

    let frame = last_frame(&cl);
    assert_eq!(frame.timestamp_ms, 1_700_000_000_000);
    assert_eq!(frame.mode, Mode::Active.wire_code());
    assert_eq!(frame.temp_vapour_head, 7825);
    assert_eq!(frame.temp_boiler_liquid, 9250);
    assert_eq!(frame.flow_ml_min, 125);
    assert_eq!(frame.valve_reflux, 65);
    assert_eq!(frame.heater_2, 70);
    assert_eq!(frame.faults, 0);
    assert_eq!(frame.presence(), SensorPresenceMask::ALL);
}

#[test]
fn absent_sensors_publish_sentinels() {
    let presence = SensorPresenceMask::NONE
        .with(Sensor::TempVapourHead)
        .with(Sensor::ValveReflux);
    let (mut cl, _engine) = make(MockPlant::new(), presence);
    cl.tick(0, 0);

    let frame = last_frame(&cl);
    assert_eq!(frame.temp_vapour_head, 7825);
    assert_eq!(frame.temp_boiler_liquid, I16_ABSENT);
    assert_eq!(frame.pressure_vapour, I16_ABSENT);
    assert_eq!(frame.valve_reflux, 0);
    assert_eq!(frame.valve_product, U8_ABSENT);
    assert_eq!(frame.heater_1, U8_ABSENT);
    assert_eq!(frame.sensor_presence, presence.bits());
}

#[test]
fn publish_cadence_follows_interval_not_period() {
    let (mut cl, _engine) = make(MockPlant::new(), SensorPresenceMask::ALL);
    let published: Vec<bool> = (0..10u64).map(|i| cl.tick(i * 100, i).published).collect();
    // 100 ms period, 200 ms interval
    assert_eq!(
        published,
        [true, false, true, false, true, false, true, false, true, false]
    );
    assert_eq!(cl.telemetry().records.len(), 5);
    assert_eq!(cl.tick_count(), 10);
}

// ── Safety ───────────────────────────────────────────────────

#[test]
fn boiler_over_temp_cuts_heaters_and_is_reported() {
    let plant = MockPlant::new().script([NOMINAL, hot_boiler(), hot_boiler(), NOMINAL]);
    let (mut cl, engine) = make(plant, SensorPresenceMask::ALL);
    send(
        &engine,
        r#"{"version":"v0","type":"set_mode","payload":{"mode":"ACTIVE"}}"#,
    );

    let outcome = cl.tick(0, 0);
    assert_eq!(outcome.fault_flags, 0);
    assert_eq!(cl.hw().last_applied().unwrap().heater_1_pct, 70);

    let outcome = cl.tick(200, 0);
    assert_eq!(outcome.fault_flags, FAULT_BOILER_OVER_TEMP);
    let applied = cl.hw().last_applied().unwrap();
    assert_eq!((applied.heater_1_pct, applied.heater_2_pct), (0, 0));
    assert_eq!(applied.valve_reflux_pct, 65, "valves are left alone");
    assert_eq!(last_frame(&cl).faults, FAULT_BOILER_OVER_TEMP);

    cl.tick(400, 0);
    cl.tick(600, 0);
    assert_eq!(cl.process().fault_flags, 0);
    assert_eq!(last_frame(&cl).faults, 0);

    let events = cl.events();
    assert_eq!(events.count(|e| matches!(e, AppEvent::FaultDetected(_))), 1);
    assert_eq!(events.count(|e| matches!(e, AppEvent::FaultCleared)), 1);
}

#[test]
fn heaters_stay_off_after_fault_until_mode_reentry() {
    let plant = MockPlant::new().script([hot_boiler(), NOMINAL]);
    let (mut cl, engine) = make(plant, SensorPresenceMask::ALL);
    send(
        &engine,
        r#"{"version":"v0","type":"set_mode","payload":{"mode":"ACTIVE"}}"#,
    );

    cl.tick(0, 0);
    cl.tick(100, 0);
    assert_eq!(cl.process().fault_flags, 0);
    assert_eq!(cl.hw().last_applied().unwrap().heater_1_pct, 0);

    send(
        &engine,
        r#"{"version":"v0","type":"set_mode","payload":{"mode":"IDLE"}}"#,
    );
    cl.tick(200, 0);
    send(
        &engine,
        r#"{"version":"v0","type":"set_mode","payload":{"mode":"ACTIVE"}}"#,
    );
    cl.tick(300, 0);
    assert_eq!(cl.hw().last_applied(), Some(&PRESET));
}

#[test]
fn absent_boiler_sensor_never_faults() {
    let presence = SensorPresenceMask::ALL.bits() & !Sensor::TempBoilerLiquid.bit();
    let plant = MockPlant::new().script([hot_boiler()]);
    let (mut cl, _engine) = make(plant, SensorPresenceMask::from_bits(presence));

    for i in 0..5 {
        assert_eq!(cl.tick(i * 100, 0).fault_flags, 0);
    }
    assert_eq!(cl.events().count(|e| matches!(e, AppEvent::FaultDetected(_))), 0);
}

#[test]
fn rejected_command_does_not_disturb_the_loop() {
    let (mut cl, engine) = make(MockPlant::new(), SensorPresenceMask::ALL);
    let ack = parse_ack(&engine.process(
        r#"{"version":"v0","type":"set_targets","payload":{"target_abv":140,"target_flow":1}}"#,
    ))
    .unwrap();
    assert!(!ack.is_ok());

    cl.tick(0, 0);
    let snapshot = engine.state().snapshot();
    assert_eq!(snapshot.target_abv, 0.0);
    assert_eq!(snapshot.mode, Mode::Idle);
    assert_eq!(last_frame(&cl).mode, Mode::Idle.wire_code());
}

#[test]
fn into_parts_returns_the_ports() {
    let (mut cl, _engine) = make(MockPlant::new(), SensorPresenceMask::ALL);
    cl.tick(0, 0);
    cl.tick(100, 0);
    let (plant, _algorithm, sink, _events) = cl.into_parts();
    assert_eq!(plant.applied.len(), 2);
    assert_eq!(sink.records.len(), 1);
}

// ── Real-time pacing ─────────────────────────────────────────

/// Records when each tick reads its sensors, oversleeps on chosen ticks,
/// and clears the run flag once `stop_after` ticks have started.
struct TimedPlant {
    started: Vec<Instant>,
    slow_ticks: &'static [usize],
    slow_for: Duration,
    stop_after: usize,
    running: Arc<AtomicBool>,
}

impl SensorPort for TimedPlant {
    fn refresh(&mut self, readings: &mut SensorReadings) {
        self.started.push(Instant::now());
        let n = self.started.len();
        if self.slow_ticks.contains(&n) {
            thread::sleep(self.slow_for);
        }
        if n >= self.stop_after {
            self.running.store(false, Ordering::Release);
        }
        *readings = NOMINAL;
    }
}

impl ActuatorPort for TimedPlant {
    fn apply(&mut self, _outputs: &ActuatorOutputs) {}
}

#[test]
fn run_paces_ticks_and_counts_overruns_without_catching_up() {
    const PERIOD_MS: u64 = 30;
    const SLOW: Duration = Duration::from_millis(60);
    const TICKS: usize = 8;

    let mut config = SystemConfig::default();
    config.timing.control_period_ms = PERIOD_MS as u32;
    config.timing.telemetry_interval_ms = PERIOD_MS as u32;
    let running = Arc::new(AtomicBool::new(true));
    let plant = TimedPlant {
        started: Vec::new(),
        slow_ticks: &[3, 6],
        slow_for: SLOW,
        stop_after: TICKS,
        running: Arc::clone(&running),
    };
    let mut cl = ControlLoop::new(
        &config,
        SensorPresenceMask::ALL,
        SharedState::default(),
        plant,
        IdleSafeHold::new(),
        RecordingSink::default(),
        EventLog::default(),
    );

    let begin = Instant::now();
    let handle = thread::spawn(move || {
        cl.run(&running, &SystemClock::new());
        cl
    });
    let cl = handle.join().expect("control loop thread panicked");
    let wall = begin.elapsed();

    assert_eq!(cl.tick_count(), TICKS as u64);
    assert_eq!(cl.overruns(), 2);
    let overruns: Vec<_> = cl
        .events()
        .events
        .iter()
        .filter_map(|e| match e {
            AppEvent::Overrun {
                elapsed_ms,
                period_ms,
                total,
            } => Some((*elapsed_ms, *period_ms, *total)),
            _ => None,
        })
        .collect();
    assert_eq!(overruns.len(), 2);
    for (i, (elapsed_ms, period_ms, total)) in overruns.into_iter().enumerate() {
        assert!(elapsed_ms >= PERIOD_MS, "overrun {i} only took {elapsed_ms} ms");
        assert_eq!(u64::from(period_ms), PERIOD_MS);
        assert_eq!(total, i as u64 + 1);
    }
    assert!(matches!(
        cl.events().events.last(),
        Some(AppEvent::Stopped { ticks, overruns: 2 }) if *ticks == TICKS as u64
    ));

    // On-time ticks sleep out their period, so tick starts are never
    // closer than one period apart: no burst after an overrun.
    let starts = &cl.hw().started;
    let period = Duration::from_millis(PERIOD_MS);
    let slack = Duration::from_millis(3);
    for (i, pair) in starts.windows(2).enumerate() {
        let gap = pair[1] - pair[0];
        assert!(gap + slack >= period, "ticks {} and {} only {:?} apart", i + 1, i + 2, gap);
    }
    // An overrunning tick is followed at once, not after another period.
    for slow in [3usize, 6] {
        let gap = starts[slow] - starts[slow - 1];
        assert!(gap < SLOW + period, "tick after overrun waited {gap:?}");
    }

    // Six paced ticks plus two slow ones bound the wall time from below;
    // the loop never ran more ticks than time allowed.
    assert!(wall >= period * 6 + SLOW * 2 - slack * 8, "finished in {wall:?}");
    let max_ticks = wall.as_millis() as u64 / PERIOD_MS + 1;
    assert!(cl.tick_count() <= max_ticks);
}
