//! incppect
//!
//! Live inspection of application state from a browser. An application
//! registers named variables backed by getters; a page subscribes to a
//! subset of them over a WebSocket and the server pushes changes with a
//! compact two-level differential binary encoding, so thousands of live
//! values fit in very little bandwidth.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use incppect::{view, Parameters, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Arc::new(Server::new());
//!
//!     let counter = 42u32;
//!     server.var("app.counter", move |_| view::of(&counter));
//!
//!     server.run(Parameters::default()).await;
//! }
//! ```
//!
//! The page side loads `/incppect.js` and polls variables by path:
//!
//! ```text
//! incppect.init();
//! incppect.render = function () {
//!     var counter = incppect.get_int32('app.counter');
//! };
//! ```

mod client;
mod engine;
mod params;
mod server;
mod telemetry;

pub use params::Parameters;
pub use server::Server;

pub use bytes::Bytes;
pub use incppect_core::{view, Getter};

use std::sync::Arc;

/// Client lifecycle and custom-message events delivered to the
/// application handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    /// A client connected; the payload is its 4-byte address
    Connect,
    /// A client disconnected; the payload is empty
    Disconnect,
    /// A kind-4 message arrived; the payload is its body, verbatim
    Custom,
}

/// Application callback for [`ClientEvent`]s.
pub type Handler = Arc<dyn Fn(i32, ClientEvent, &[u8]) + Send + Sync>;
