//! Protocol engine: validates one command line and applies it.
//!
//! **Transport-decoupled**: the engine owns no socket.  Callers feed a line
//! via [`ProtocolEngine::dispatch`] and get back exactly one ack line.
//!
//! Every line passes through a fixed pipeline that stops at the first
//! failure:
//!
//! 1. **Envelope**: JSON object with `version`, `type`, `payload`.
//! 2. **Version**: must equal `"v0"`.
//! 3. **Type**: one of `get_telemetry`, `set_mode`, `set_targets`.
//! 4. **Payload**: per-command field presence, type, then range.
//!
//! Only a fully validated command touches [`SharedState`], and a
//! `set_targets` writes both targets under one lock, so a rejected line can
//! never leave the state half-updated.

use log::{debug, info};

use crate::app::state::{Mode, SharedState};
use crate::error::ProtocolError;

use super::codec::{
    self, AckPayload, Message, PROTOCOL_VERSION, ParseError, UNKNOWN_COMMAND, msg_type,
};

pub const ABV_MIN: f64 = 0.0;
pub const ABV_MAX: f64 = 100.0;

/// A validated command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    GetTelemetry,
    SetMode(Mode),
    SetTargets { target_abv: f64, target_flow: f64 },
}

impl Command {
    /// Route on `type` and validate the payload.  Does not check `version`.
    pub fn from_message(msg: &Message) -> Result<Self, ProtocolError> {
        let p = &msg.payload;
        match msg.msg_type.as_str() {
            msg_type::GET_TELEMETRY => Ok(Command::GetTelemetry),
            msg_type::SET_MODE => {
                let mode = p.str_field("mode")?;
                Mode::from_wire(mode)
                    .map(Command::SetMode)
                    .ok_or_else(|| ProtocolError::InvalidMode(mode.to_owned()))
            }
            msg_type::SET_TARGETS => {
                let target_abv = p.number_field("target_abv")?;
                let target_flow = p.number_field("target_flow")?;
                if !(ABV_MIN..=ABV_MAX).contains(&target_abv) {
                    return Err(ProtocolError::AbvOutOfRange(target_abv));
                }
                if target_flow < 0.0 {
                    return Err(ProtocolError::NegativeFlow(target_flow));
                }
                Ok(Command::SetTargets {
                    target_abv,
                    target_flow,
                })
            }
            other => Err(ProtocolError::UnknownType(other.to_owned())),
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Command::GetTelemetry => msg_type::GET_TELEMETRY,
            Command::SetMode(_) => msg_type::SET_MODE,
            Command::SetTargets { .. } => msg_type::SET_TARGETS,
        }
    }
}

/// Result of dispatching one line.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    /// Complete ack line, newline-terminated.
    pub response: String,
    /// The line was not JSON; the connection should be closed after the
    /// ack is written.
    pub fail_closed: bool,
}

/// Transport-decoupled protocol engine.  Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct ProtocolEngine {
    state: SharedState,
}

impl ProtocolEngine {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Process one line and return the ack line.
    pub fn process(&self, line: &str) -> String {
        self.dispatch(line).response
    }

    /// Raw bytes from the wire.  Invalid UTF-8 is treated like invalid JSON.
    pub fn dispatch_bytes(&self, line: &[u8]) -> Dispatch {
        match std::str::from_utf8(line) {
            Ok(text) => self.dispatch(text),
            Err(e) => reject(
                UNKNOWN_COMMAND,
                &ProtocolError::Envelope(ParseError::Malformed(e.to_string())),
            ),
        }
    }

    /// Process one line.  Never panics and never returns without an ack.
    pub fn dispatch(&self, line: &str) -> Dispatch {
        let msg = match codec::parse(line) {
            Ok(msg) => msg,
            Err(e) => return reject(UNKNOWN_COMMAND, &ProtocolError::from(e)),
        };

        match self.handle(&msg) {
            Ok(ack) => Dispatch {
                response: ack.to_line(),
                fail_closed: false,
            },
            Err(e) => reject(&msg.msg_type, &e),
        }
    }

    fn handle(&self, msg: &Message) -> Result<AckPayload, ProtocolError> {
        if msg.version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnknownVersion(msg.version.clone()));
        }
        let cmd = Command::from_message(msg)?;
        Ok(self.apply(cmd))
    }

    fn apply(&self, cmd: Command) -> AckPayload {
        match cmd {
            Command::GetTelemetry => {
                AckPayload::ok(cmd.name(), "Telemetry is broadcast periodically")
            }
            Command::SetMode(mode) => {
                let prev = self.state.set_mode(mode);
                if prev != mode {
                    info!("mode {} -> {}", prev.as_str(), mode.as_str());
                }
                AckPayload::ok(cmd.name(), format!("Mode set to {}", mode.as_str()))
            }
            Command::SetTargets {
                target_abv,
                target_flow,
            } => {
                self.state.set_targets(target_abv, target_flow);
                info!("targets: abv={}% flow={}mL/min", target_abv, target_flow);
                AckPayload::ok(cmd.name(), "Targets updated")
            }
        }
    }
}

fn reject(command: &str, err: &ProtocolError) -> Dispatch {
    debug!("rejected {}: {}", command, err);
    Dispatch {
        response: AckPayload::error(command, err.to_string()).to_line(),
        fail_closed: err.is_fail_closed(),
    }
}
