//! Controller node library for a reflux still.
//!
//! A fixed-period control loop owns the process state; a line-delimited
//! JSON command channel mutates the controller state; compact telemetry
//! frames are fanned out to every connected observer.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod control;
pub mod error;
pub mod rpc;
pub mod safety;
pub mod telemetry;

pub use error::{Error, Result};
