//! Relay supervisor
//!
//! Detects the device's capabilities, derives the topology, serves it and
//! restarts the whole assembly whenever something below it fails.

pub mod runner;
pub mod state;

pub use runner::Supervisor;
pub use state::{CycleFailure, Phase, RestartPolicy, SupervisorEvent};
