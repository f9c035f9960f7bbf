//! External stream registry
//!
//! The registry is an HTTP service listing the streams a ground station can
//! play. This module keeps it in step with the streams currently served:
//!
//! ```text
//!   Supervisor --watch<Vec<StreamIdentity>>--> Reconciler --GET/POST /streams--> registry
//! ```

pub mod client;
pub mod config;
pub mod entry;
pub mod error;
pub mod reconciler;

pub use client::{HttpRegistryClient, MemoryRegistry, RegistryClient};
pub use config::RegistryConfig;
pub use entry::{NewStream, RegistryEntry};
pub use error::RegistryError;
pub use reconciler::{ReconcileReport, Reconciler};
