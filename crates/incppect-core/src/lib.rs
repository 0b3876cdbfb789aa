//! incppect core
//!
//! Protocol primitives for the incppect live-inspection channel.
//!
//! This crate provides:
//! - The XOR/run-length diff stream used at both levels of the wire
//!   format ([`diff`])
//! - Aggregate frame encoding/decoding ([`frame`])
//! - Client→server control message parsing ([`control`])
//! - The variable registry mapping path templates to getters ([`registry`])
//! - Byte-view helpers for writing getters ([`view`])
//! - A reference client-side decoder ([`mirror`])

pub mod control;
pub mod diff;
pub mod error;
pub mod frame;
pub mod mirror;
pub mod registry;
pub mod time;
pub mod view;

pub use error::{Error, Result};
pub use registry::{Getter, Registry};

/// Default TCP listen port
pub const DEFAULT_PORT: u16 = 3000;

/// Default maximum message size accepted and sent (bytes)
pub const DEFAULT_MAX_PAYLOAD: usize = 256 * 1024;

/// WebSocket upgrade path
pub const WS_PATH: &str = "/incppect";

/// URL of the embedded browser decoder script
pub const SCRIPT_PATH: &str = "/incppect.js";
