//! stillctl: controller node daemon.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Adapters (outer ring)                     │
//! │  SimulatedPlant       LogEventSink       SystemClock         │
//! │  (Sensor+Actuator)    (EventSink)        (Clock)             │
//! │  IpcServer + Publisher (command channel, telemetry fan-out)  │
//! │                                                              │
//! │  ──────────────── Port Trait Boundary ───────────────────    │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │  ControlLoop (control-loop thread)                     │  │
//! │  │  Safety · ControlAlgorithm · Telemetry encoder         │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Context, Result, anyhow};
use log::{info, warn};

use stillctl::adapters::log_sink::LogEventSink;
use stillctl::adapters::sim::SimulatedPlant;
use stillctl::adapters::time::SystemClock;
use stillctl::app::control_loop::ControlLoop;
use stillctl::app::state::{ActuatorOutputs, SharedState};
use stillctl::config::SystemConfig;
use stillctl::control::IdleSafeHold;
use stillctl::rpc::{IpcServer, PeerSet, ProtocolEngine, Publisher};
use stillctl::telemetry::SensorPresenceMask;

const HELP: &str = "\
stillctl - reflux still controller node

USAGE:
  stillctl [OPTIONS]

OPTIONS:
  -h, --help              Prints help information
  -c, --config <path>     TOML configuration file (defaults apply without one)
  --presence <path>       Sensor presence file (overrides telemetry.presence_path)
  --port <n>              Command channel port (overrides network.port)

Log level is taken from RUST_LOG (default: info).
";

/// Outputs the simulated plant starts from when switched to ACTIVE.
const SIM_ENTRY_PRESET: ActuatorOutputs = ActuatorOutputs {
    valve_reflux_pct: 65,
    valve_product_pct: 30,
    heater_1_pct: 70,
    heater_2_pct: 70,
};

#[derive(Debug, Default)]
struct AppArgs {
    config: Option<String>,
    presence: Option<String>,
    port: Option<u16>,
}

fn parse_args() -> Result<AppArgs, pico_args::Error> {
    let mut pargs = pico_args::Arguments::from_env();

    if pargs.contains(["-h", "--help"]) {
        print!("{}", HELP);
        std::process::exit(0);
    }

    let args = AppArgs {
        config: pargs.opt_value_from_str(["-c", "--config"])?,
        presence: pargs.opt_value_from_str("--presence")?,
        port: pargs.opt_value_from_str("--port")?,
    };

    let rest = pargs.finish();
    if !rest.is_empty() {
        warn!("ignoring unknown arguments: {:?}", rest);
    }
    Ok(args)
}

fn load_config(args: &AppArgs) -> stillctl::Result<SystemConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Using config: {}", path);
            SystemConfig::from_file(path)?
        }
        None => {
            info!("No config file given, using defaults");
            SystemConfig::default()
        }
    };
    if let Some(path) = &args.presence {
        config.telemetry.presence_path.clone_from(path);
    }
    if let Some(port) = args.port {
        config.network.port = port;
    }
    config.validate()?;
    Ok(config)
}

fn start_server(
    config: &SystemConfig,
    state: &SharedState,
    peers: &PeerSet,
) -> stillctl::Result<IpcServer> {
    let server = IpcServer::start(
        config.socket_addr()?,
        ProtocolEngine::new(state.clone()),
        peers.clone(),
    )?;
    Ok(server)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("stillctl v{} starting...", env!("CARGO_PKG_VERSION"));

    let args = parse_args().map_err(|e| anyhow!("{e}\n\n{HELP}"))?;
    let config = load_config(&args)?;

    let presence = SensorPresenceMask::load(&config.telemetry.presence_path)
        .context("sensor presence map is required")?;

    let state = SharedState::default();
    let peers = PeerSet::new();

    let mut server = start_server(&config, &state, &peers)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::Release);
    })
    .context("installing Ctrl-C handler")?;

    let mut control = ControlLoop::new(
        &config,
        presence,
        state,
        SimulatedPlant::new(config.timing.control_period_ms),
        IdleSafeHold::new().with_entry_preset(SIM_ENTRY_PRESET),
        Publisher::new(peers),
        LogEventSink::new(),
    );
    let loop_running = Arc::clone(&running);
    let control_thread = thread::Builder::new()
        .name("control-loop".into())
        .spawn(move || {
            control.run(&loop_running, &SystemClock::new());
            control.into_parts()
        })
        .context("spawning control loop")?;

    let (_, _, publisher, _) = control_thread
        .join()
        .map_err(|_| anyhow!("control loop panicked"))?;
    info!(
        "publisher: {} peers reaped, {} records skipped",
        publisher.reaped(),
        publisher.skipped()
    );

    server.stop();
    info!("stillctl stopped");
    Ok(())
}
