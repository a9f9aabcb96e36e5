//! Application core: controller state and the control loop.
//!
//! All interaction with hardware and sockets happens through **port
//! traits** defined in [`ports`], keeping this layer testable without real
//! peripherals.

pub mod control_loop;
pub mod events;
pub mod ports;
pub mod state;
