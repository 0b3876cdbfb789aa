//! Connection trait and event surface
//!
//! The subscription engine owns no sockets. It sees each client through
//! the [`Connection`] trait and learns about connection lifecycle from
//! [`TransportEvent`]s delivered over a channel into its task. Both
//! directions are non-blocking: `send` enqueues onto the connection's
//! writer, and the engine polls `buffered_amount` to gate its encode
//! loop on backpressure.

use std::sync::Arc;

use bytes::Bytes;

/// Outbound half of one client connection.
pub trait Connection: Send + Sync {
    /// Queue an outbound message.
    ///
    /// Returns `false` when the connection already had queued bytes,
    /// i.e. this send increased backpressure. The caller may log but
    /// must not retry; the frame is still queued (or dropped if the
    /// connection is gone). `allow_compress` marks frames worth
    /// compressing; transports without per-message compression ignore
    /// it.
    fn send(&self, data: Bytes, binary: bool, allow_compress: bool) -> bool;

    /// Bytes queued but not yet written to the socket.
    fn buffered_amount(&self) -> u64;

    /// Begin closing the connection.
    fn close(&self);
}

/// A freshly opened connection, as handed to the engine.
#[derive(Clone)]
pub struct ConnectionInfo {
    /// Stable id, unique for the server's lifetime
    pub id: i32,
    /// Low four bytes of the remote address
    pub remote: [u8; 4],
    /// Outbound handle
    pub handle: Arc<dyn Connection>,
}

impl std::fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .finish()
    }
}

/// Events raised by the transport toward the engine.
pub enum TransportEvent {
    /// A client connected
    Open { conn: ConnectionInfo },
    /// An inbound message arrived
    Data { id: i32, data: Bytes, binary: bool },
    /// The connection's outbound queue drained to zero
    Drain { id: i32 },
    /// The connection closed
    Close { id: i32, code: u16, reason: String },
}

impl std::fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { conn } => f.debug_struct("Open").field("id", &conn.id).finish(),
            Self::Data { id, data, binary } => f
                .debug_struct("Data")
                .field("id", id)
                .field("len", &data.len())
                .field("binary", binary)
                .finish(),
            Self::Drain { id } => f.debug_struct("Drain").field("id", id).finish(),
            Self::Close { id, code, .. } => f
                .debug_struct("Close")
                .field("id", id)
                .field("code", code)
                .finish(),
        }
    }
}

/// Low four bytes of a remote IP, the shape exposed through the
/// `incppect.ip_address[%d]` telemetry path.
pub fn address_fingerprint(ip: std::net::IpAddr) -> [u8; 4] {
    match ip {
        std::net::IpAddr::V4(v4) => v4.octets(),
        std::net::IpAddr::V6(v6) => {
            let o = v6.octets();
            [o[12], o[13], o[14], o[15]]
        }
    }
}
