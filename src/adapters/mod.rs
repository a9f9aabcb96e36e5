//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter    | Implements          | Connects to            |
//! |------------|---------------------|------------------------|
//! | `log_sink` | EventSink           | `log` facade           |
//! | `sim`      | SensorPort          | Simulated plant model  |
//! |            | ActuatorPort        |                        |
//! | `time`     | Clock               | `Instant` / `SystemTime` |

pub mod log_sink;
pub mod sim;
pub mod time;
