//! Relay and server statistics

pub mod metrics;

pub use metrics::{ChannelStats, ChannelStatsSnapshot, ServerStats, ServerStatsSnapshot};
