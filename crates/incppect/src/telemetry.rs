//! Built-in self-telemetry variables
//!
//! Every server pre-registers four paths so a page can inspect the
//! inspector: `incppect.nclients`, `incppect.tx_total`,
//! `incppect.rx_total` and `incppect.ip_address[%d]`. The counters are
//! updated by the engine task and read by getters running on the same
//! task, but they are atomics because `n_connected()` is callable from
//! anywhere.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use incppect_core::{view, Registry};
use parking_lot::RwLock;

#[derive(Default)]
pub(crate) struct Telemetry {
    n_clients: AtomicU32,
    tx_total: AtomicU64,
    rx_total: AtomicU64,
    addresses: RwLock<BTreeMap<i32, [u8; 4]>>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_connected(&self, id: i32, ip: [u8; 4]) {
        self.n_clients.fetch_add(1, Ordering::Relaxed);
        self.addresses.write().insert(id, ip);
    }

    pub fn client_closed(&self, id: i32) {
        self.n_clients.fetch_sub(1, Ordering::Relaxed);
        self.addresses.write().remove(&id);
    }

    pub fn add_tx(&self, bytes: u64) {
        self.tx_total.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_rx(&self, bytes: u64) {
        self.rx_total.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn n_clients(&self) -> u32 {
        self.n_clients.load(Ordering::Relaxed)
    }

    pub fn tx_total(&self) -> u64 {
        self.tx_total.load(Ordering::Relaxed)
    }

    pub fn rx_total(&self) -> u64 {
        self.rx_total.load(Ordering::Relaxed)
    }

    fn nth_address(&self, n: usize) -> Option<[u8; 4]> {
        self.addresses.read().values().nth(n).copied()
    }

    /// Register the `incppect.*` paths.
    pub fn register_builtins(self: &Arc<Self>, registry: &mut Registry) {
        let t = self.clone();
        registry.register(
            "incppect.nclients",
            Arc::new(move |_: &[i32]| view::of(&t.n_clients())),
        );

        let t = self.clone();
        registry.register(
            "incppect.tx_total",
            Arc::new(move |_: &[i32]| view::of(&(t.tx_total.load(Ordering::Relaxed) as f64))),
        );

        let t = self.clone();
        registry.register(
            "incppect.rx_total",
            Arc::new(move |_: &[i32]| view::of(&(t.rx_total.load(Ordering::Relaxed) as f64))),
        );

        let t = self.clone();
        registry.register(
            "incppect.ip_address[%d]",
            Arc::new(move |idxs: &[i32]| {
                idxs.first()
                    .and_then(|&i| usize::try_from(i).ok())
                    .and_then(|i| t.nth_address(i))
                    .map(|ip| Bytes::copy_from_slice(&ip))
                    .unwrap_or_default()
            }),
        );
    }
}
