//! Stream server
//!
//! One network endpoint per active stream. Frames pushed with
//! [`StreamServer::send_frame`] cross the stream's relay channel and are
//! delivered to every client attached to its mount.

pub mod config;
pub mod http;
pub mod listener;
pub mod mount;
pub mod session;

pub use config::ServerConfig;
pub use listener::StreamServer;
pub use mount::{MediaUnit, Mount, Subscription};
pub use session::{SessionInfo, SessionTable};
