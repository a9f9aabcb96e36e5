//! Telemetry encoding: binary frame, JSON rendering, sensor presence.

pub mod frame;
pub mod json;
pub mod presence;

pub use frame::{FRAME_LEN, FRAME_VERSION, FrameError, TelemetryFrame};
pub use json::JsonRenderer;
pub use presence::{Sensor, SensorPresenceMask};
