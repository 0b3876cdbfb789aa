//! Per-client state

use std::collections::BTreeMap;
use std::sync::Arc;

use incppect_transport::Connection;

/// Minimum spacing between encodings of one request.
pub(crate) const DEFAULT_MIN_UPDATE_MS: i64 = 16;

/// Staleness cutoff before the parameterised value is applied at
/// activation.
pub(crate) const DEFAULT_REQUEST_TIMEOUT_MS: i64 = 3000;

/// One subscribed variable of one client.
pub(crate) struct Request {
    pub getter_id: usize,
    pub idxs: Vec<i32>,
    /// When this request was last encoded; -1 = never
    pub t_last_updated_ms: i64,
    /// Last activate/refresh from the client; -1 = never, 0 = latched
    /// permanently active
    pub t_last_requested_ms: i64,
    pub t_min_update_ms: i64,
    pub t_last_request_timeout_ms: i64,
    /// Last encoded payload, zero-padded to a cell boundary
    pub prev_payload: Vec<u8>,
    /// Reusable XOR/RLE scratch
    pub diff: Vec<u8>,
}

impl Request {
    pub fn new(getter_id: usize, idxs: Vec<i32>) -> Self {
        Self {
            getter_id,
            idxs,
            t_last_updated_ms: -1,
            t_last_requested_ms: -1,
            t_min_update_ms: DEFAULT_MIN_UPDATE_MS,
            t_last_request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            prev_payload: Vec::new(),
            diff: Vec::new(),
        }
    }

    /// Whether this request gets encoded at `now_ms`: it must be
    /// actively requested (refreshed within its timeout, or latched by
    /// a negative timeout after at least one activation) and past its
    /// minimum update spacing.
    pub fn eligible(&self, now_ms: i64) -> bool {
        let active = (self.t_last_request_timeout_ms < 0 && self.t_last_requested_ms >= 0)
            || now_ms - self.t_last_requested_ms < self.t_last_request_timeout_ms;
        active && now_ms - self.t_last_updated_ms > self.t_min_update_ms
    }
}

/// Everything the engine tracks for one connected client.
pub(crate) struct ClientState {
    pub t_connected_ms: i64,
    pub ip_address: [u8; 4],
    /// Request ids from the client's last activate message
    pub last_active: Vec<i32>,
    /// Ascending id order keeps the outer diff aligned across ticks
    pub requests: BTreeMap<i32, Request>,
    /// Frame assembly buffers: current, previous, diff
    pub cur: Vec<u8>,
    pub prev: Vec<u8>,
    pub diff: Vec<u8>,
    pub conn: Arc<dyn Connection>,
}

impl ClientState {
    pub fn new(conn: Arc<dyn Connection>, ip_address: [u8; 4], now_ms: i64) -> Self {
        Self {
            t_connected_ms: now_ms,
            ip_address,
            last_active: Vec::new(),
            requests: BTreeMap::new(),
            cur: Vec::new(),
            prev: Vec::new(),
            diff: Vec::new(),
            conn,
        }
    }
}
