//! # camrelay
//!
//! Capability-driven relay of multi-camera device outputs to live network
//! streams.
//!
//! The relay connects to a camera device, detects which sensors are
//! attached, derives the set of streams it can serve and publishes them over
//! HTTP. Each stream is carried from the device to the network through a
//! relay channel: a bounded, leaky ingress queue feeding a local socket
//! endpoint, and a bounded, leaky egress queue draining it for the server.
//! The served streams are registered with an external stream registry.
//!
//! Any failure tears the whole assembly down and a new connection cycle
//! starts after a delay.
//!
//! ```text
//!   Device ──frames──► RelayChannel (ingress ─► socket ─► egress) ──► StreamServer ──► HTTP clients
//!     ▲                                                                     │
//!     └──────────────────────── Supervisor ◄────────── Reconciler ◄──────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use camrelay::device::{ReplayBackend, ReplayConfig};
//! use camrelay::registry::{HttpRegistryClient, RegistryConfig};
//! use camrelay::{RelayConfig, Supervisor};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> camrelay::Result<()> {
//!     let config = RelayConfig::default().registry(RegistryConfig::default());
//!     let backend = ReplayBackend::new(ReplayConfig::with_root("./devices"));
//!     let registry = HttpRegistryClient::new(&config.registry)?;
//!
//!     let supervisor = Supervisor::new(backend, registry, config)?;
//!     supervisor.run(CancellationToken::new()).await;
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod device;
pub mod error;
pub mod media;
pub mod registry;
pub mod relay;
pub mod server;
pub mod stats;
pub mod supervisor;
pub mod topology;

pub use catalog::{Catalog, StreamId, StreamIdentity};
pub use config::RelayConfig;
pub use error::{Error, ErrorKind, Result};
pub use server::{ServerConfig, StreamServer};
pub use supervisor::{Phase, RestartPolicy, Supervisor, SupervisorEvent};
