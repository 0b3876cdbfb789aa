//! incppect transport layer
//!
//! The subscription engine talks to the network through a small
//! capability set: a per-connection outbound handle with a backpressure
//! ledger, a lifecycle event stream, and static resource serving. This
//! crate provides those capabilities over a single axum listener that
//! carries both the HTTP surface and the WebSocket upgrade, with
//! optional TLS termination behind the `tls` feature.

pub mod conn;
pub mod error;
pub mod http;
pub mod websocket;

pub use conn::{address_fingerprint, Connection, ConnectionInfo, TransportEvent};
pub use error::{Result, TransportError};
pub use http::{ResourceOverrides, StaticFiles};
pub use websocket::{ServeConfig, TlsMaterial, WebSocketServer};
