//! Command channel and telemetry transport.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        RPC Stack                             │
//! │                                                              │
//! │  ┌──────────┐   ┌──────────┐   ┌──────────────────────────┐  │
//! │  │  Server  │──▶│  Codec   │──▶│  Engine → SharedState    │  │
//! │  │ (TCP)    │   │ (JSON)   │   └──────────────────────────┘  │
//! │  └──────────┘   └──────────┘                                 │
//! │       ▲                                                      │
//! │       │ Link (per peer)      ┌───────────┐                   │
//! │       └──────────────────────│ Publisher │◀── ControlLoop    │
//! │                              └───────────┘                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod engine;
pub mod link;
pub mod publisher;
pub mod server;

pub use engine::ProtocolEngine;
pub use link::{Link, PeerSet};
pub use publisher::Publisher;
pub use server::IpcServer;
