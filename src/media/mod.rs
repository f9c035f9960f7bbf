//! Media helpers for relayed H.264 streams
//!
//! This module provides:
//! - H.264 Annex-B NAL unit scanning and access-unit splitting
//! - GOP caching for late-joiner support

pub mod gop;
pub mod h264;

pub use gop::GopCache;
pub use h264::{split_access_units, AnnexBNalus, NaluType};
