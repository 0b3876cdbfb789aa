//! Subscription engine
//!
//! One engine instance owns every per-client record and runs on a
//! single task: transport callbacks arrive as events, application
//! mutations as deferred commands, and each tick encodes all clients to
//! completion before the next event is taken. Getters are the only
//! cross-thread touch point; they are invoked synchronously during the
//! tick and their bytes are copied into the frame buffer immediately.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use incppect_core::{control, diff, frame, registry::Registry};
use incppect_transport::ConnectionInfo;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::client::{ClientState, Request};
use crate::telemetry::Telemetry;
use crate::{ClientEvent, Handler};

pub(crate) struct Engine {
    registry: Arc<RwLock<Registry>>,
    telemetry: Arc<Telemetry>,
    handler: Arc<RwLock<Option<Handler>>>,
    clients: BTreeMap<i32, ClientState>,
    /// Timeout stamped onto requests at activate/refresh time
    request_timeout_ms: i64,
    max_payload: usize,
}

impl Engine {
    pub fn new(
        registry: Arc<RwLock<Registry>>,
        telemetry: Arc<Telemetry>,
        handler: Arc<RwLock<Option<Handler>>>,
        request_timeout_ms: i64,
        max_payload: usize,
    ) -> Self {
        Self {
            registry,
            telemetry,
            handler,
            clients: BTreeMap::new(),
            request_timeout_ms,
            max_payload,
        }
    }

    fn fire_handler(&self, client_id: i32, event: ClientEvent, payload: &[u8]) {
        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            handler(client_id, event, payload);
        }
    }

    pub fn on_open(&mut self, conn: ConnectionInfo, now_ms: i64) {
        info!(client = conn.id, "client connected");
        self.telemetry.client_connected(conn.id, conn.remote);
        self.clients
            .insert(conn.id, ClientState::new(conn.handle, conn.remote, now_ms));
        let remote = conn.remote;
        self.fire_handler(conn.id, ClientEvent::Connect, &remote);
    }

    pub fn on_close(&mut self, client_id: i32, code: u16, reason: &str, now_ms: i64) {
        let Some(client) = self.clients.remove(&client_id) else {
            return;
        };
        info!(
            client = client_id,
            code,
            reason,
            addr = ?client.ip_address,
            uptime_ms = now_ms - client.t_connected_ms,
            "client disconnected"
        );
        self.telemetry.client_closed(client_id);
        self.fire_handler(client_id, ClientEvent::Disconnect, &[]);
    }

    pub fn on_drain(&mut self, client_id: i32) {
        if let Some(client) = self.clients.get(&client_id) {
            debug!(
                client = client_id,
                buffered = client.conn.buffered_amount(),
                "outbound queue drained"
            );
        }
    }

    /// Process one inbound message. Returns whether a tick should be
    /// scheduled; ticks for a batch of messages coalesce into one.
    pub fn on_data(&mut self, client_id: i32, data: &[u8], now_ms: i64) -> bool {
        self.telemetry.add_rx(data.len() as u64);

        if !self.clients.contains_key(&client_id) {
            return false;
        }

        let msg = match control::parse(data) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(client = client_id, error = %e, "dropping malformed message");
                return false;
            }
        };

        match msg {
            control::ControlMessage::Register(entries) => {
                self.handle_register(client_id, entries);
                true
            }
            control::ControlMessage::Activate(ids) => {
                self.handle_activate(client_id, &ids, now_ms);
                true
            }
            control::ControlMessage::Refresh => {
                self.handle_refresh(client_id, now_ms);
                true
            }
            control::ControlMessage::Custom(body) => {
                if !body.is_empty() {
                    self.fire_handler(client_id, ClientEvent::Custom, &body);
                }
                false
            }
        }
    }

    fn handle_register(&mut self, client_id: i32, entries: Vec<control::RegisterEntry>) {
        let registry = self.registry.read();
        let Some(client) = self.clients.get_mut(&client_id) else {
            return;
        };

        for mut entry in entries {
            for idx in &mut entry.idxs {
                if *idx == -1 {
                    *idx = client_id;
                }
            }
            match registry.resolve(&entry.path) {
                Some(getter_id) => {
                    debug!(
                        client = client_id,
                        request = entry.request_id,
                        path = %entry.path,
                        n_idx = entry.idxs.len(),
                        "registered request"
                    );
                    client
                        .requests
                        .insert(entry.request_id, Request::new(getter_id, entry.idxs));
                }
                None => debug!(client = client_id, path = %entry.path, "unknown path"),
            }
        }
    }

    fn handle_activate(&mut self, client_id: i32, ids: &[i32], now_ms: i64) {
        let timeout = self.request_timeout_ms;
        let Some(client) = self.clients.get_mut(&client_id) else {
            return;
        };

        client.last_active.clear();
        for &id in ids {
            if let Some(req) = client.requests.get_mut(&id) {
                client.last_active.push(id);
                req.t_last_requested_ms = now_ms;
                req.t_last_request_timeout_ms = timeout;
            }
        }
        debug!(
            client = client_id,
            active = client.last_active.len(),
            "activated requests"
        );
    }

    fn handle_refresh(&mut self, client_id: i32, now_ms: i64) {
        let timeout = self.request_timeout_ms;
        let Some(client) = self.clients.get_mut(&client_id) else {
            return;
        };

        let ClientState {
            last_active,
            requests,
            ..
        } = client;
        for id in last_active.iter() {
            if let Some(req) = requests.get_mut(id) {
                req.t_last_requested_ms = now_ms;
                req.t_last_request_timeout_ms = timeout;
            }
        }
    }

    /// Encode and send one frame per client with pending updates.
    pub fn tick(&mut self, now_ms: i64) {
        let registry = self.registry.read();

        for (&client_id, client) in self.clients.iter_mut() {
            let buffered = client.conn.buffered_amount();
            if buffered != 0 {
                debug!(
                    client = client_id,
                    buffered, "backpressure, skipping update"
                );
                continue;
            }

            frame::begin(&mut client.cur);

            for (&request_id, req) in client.requests.iter_mut() {
                if !req.eligible(now_ms) {
                    continue;
                }
                if req.t_last_request_timeout_ms < 0 {
                    // latch: one activation keeps it live forever
                    req.t_last_requested_ms = 0;
                }

                let Some(getter) = registry.getter(req.getter_id) else {
                    continue;
                };
                let payload: Bytes = getter(&req.idxs);
                let padded = diff::padded_len(payload.len());

                if req.prev_payload.len() == padded && payload.len() > frame::DIFF_THRESHOLD {
                    req.diff.clear();
                    diff::encode(&req.prev_payload, &payload, &mut req.diff);
                    frame::push_diff(&mut client.cur, request_id, &req.diff);
                } else {
                    frame::push_full(&mut client.cur, request_id, &payload);
                }

                req.prev_payload.clear();
                req.prev_payload.extend_from_slice(&payload);
                req.prev_payload.resize(padded, 0);
                req.t_last_updated_ms = now_ms;
            }

            if client.cur.len() <= frame::HEADER_SIZE {
                continue;
            }

            let outer_diff =
                client.cur.len() == client.prev.len() && client.cur.len() > frame::DIFF_THRESHOLD;
            let emitted: &[u8] = if outer_diff {
                client.diff.clear();
                client
                    .diff
                    .extend_from_slice(&frame::TYPE_DIFF.to_le_bytes());
                diff::encode(
                    &client.prev[frame::HEADER_SIZE..],
                    &client.cur[frame::HEADER_SIZE..],
                    &mut client.diff,
                );
                &client.diff
            } else {
                &client.cur
            };

            if emitted.len() > self.max_payload {
                warn!(
                    client = client_id,
                    size = emitted.len(),
                    max = self.max_payload,
                    "frame exceeds max payload"
                );
            }

            let compress = emitted.len() > frame::COMPRESS_MIN_BYTES;
            if !client
                .conn
                .send(Bytes::copy_from_slice(emitted), true, compress)
            {
                warn!(client = client_id, "backpressure increased");
            }

            // tx accounting covers the pre-diff aggregate
            self.telemetry.add_tx(client.cur.len() as u64);
            std::mem::swap(&mut client.prev, &mut client.cur);
        }
    }

    /// Close every client, firing disconnect events. Used on shutdown
    /// so each client observes its close before `run` resolves.
    pub fn shutdown(&mut self) {
        let clients = std::mem::take(&mut self.clients);
        for (client_id, client) in clients {
            client.conn.close();
            self.telemetry.client_closed(client_id);
            self.fire_handler(client_id, ClientEvent::Disconnect, &[]);
        }
    }

    #[cfg(test)]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use incppect_core::control::{ControlMessage, RegisterEntry};
    use incppect_core::mirror::Mirror;
    use incppect_core::view;
    use incppect_transport::Connection;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    const T0: i64 = 1_700_000_000_000;

    struct MockConnection {
        sent: Mutex<Vec<(Bytes, bool)>>,
        buffered: AtomicU64,
        closed: std::sync::atomic::AtomicBool,
    }

    impl MockConnection {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                buffered: AtomicU64::new(0),
                closed: std::sync::atomic::AtomicBool::new(false),
            })
        }

        fn frames(&self) -> Vec<Bytes> {
            self.sent.lock().iter().map(|(b, _)| b.clone()).collect()
        }

        fn set_buffered(&self, n: u64) {
            self.buffered.store(n, Ordering::Relaxed);
        }
    }

    impl Connection for MockConnection {
        fn send(&self, data: Bytes, _binary: bool, compress: bool) -> bool {
            self.sent.lock().push((data, compress));
            true
        }

        fn buffered_amount(&self) -> u64 {
            self.buffered.load(Ordering::Relaxed)
        }

        fn close(&self) {
            self.closed.store(true, Ordering::Relaxed);
        }
    }

    struct Fixture {
        engine: Engine,
        conn: Arc<MockConnection>,
        telemetry: Arc<Telemetry>,
        handler_log: Arc<Mutex<Vec<(i32, ClientEvent, Vec<u8>)>>>,
    }

    fn fixture(vars: &[(&str, incppect_core::Getter)]) -> Fixture {
        fixture_with_timeout(vars, 3000)
    }

    fn fixture_with_timeout(
        vars: &[(&str, incppect_core::Getter)],
        timeout_ms: i64,
    ) -> Fixture {
        let mut registry = Registry::new();
        for (path, getter) in vars {
            registry.register(*path, getter.clone());
        }
        let registry = Arc::new(RwLock::new(registry));
        let telemetry = Arc::new(Telemetry::new());

        let handler_log: Arc<Mutex<Vec<(i32, ClientEvent, Vec<u8>)>>> =
            Arc::new(Mutex::new(Vec::new()));
        let log = handler_log.clone();
        let handler: Handler = Arc::new(move |id: i32, event: ClientEvent, payload: &[u8]| {
            log.lock().push((id, event, payload.to_vec()));
        });

        let mut engine = Engine::new(
            registry,
            telemetry.clone(),
            Arc::new(RwLock::new(Some(handler))),
            timeout_ms,
            incppect_core::DEFAULT_MAX_PAYLOAD,
        );

        let conn = MockConnection::new();
        engine.on_open(
            ConnectionInfo {
                id: 1,
                remote: [127, 0, 0, 1],
                handle: conn.clone(),
            },
            T0,
        );

        Fixture {
            engine,
            conn,
            telemetry,
            handler_log,
        }
    }

    fn register(engine: &mut Engine, path: &str, request_id: i32, idxs: Vec<i32>, now: i64) {
        let msg = control::encode(&ControlMessage::Register(vec![RegisterEntry {
            path: path.into(),
            request_id,
            idxs,
        }]));
        assert!(engine.on_data(1, &msg, now));
    }

    fn activate(engine: &mut Engine, ids: Vec<i32>, now: i64) {
        let msg = control::encode(&ControlMessage::Activate(ids));
        assert!(engine.on_data(1, &msg, now));
    }

    fn refresh(engine: &mut Engine, now: i64) {
        let msg = control::encode(&ControlMessage::Refresh);
        assert!(engine.on_data(1, &msg, now));
    }

    fn static_getter(bytes: &'static [u8]) -> incppect_core::Getter {
        Arc::new(move |_: &[i32]| Bytes::from_static(bytes))
    }

    #[test]
    fn static_scalar_frame_bytes() {
        let mut f = fixture(&[("v", static_getter(&[0x01, 0x00, 0x00, 0x00]))]);
        register(&mut f.engine, "v", 7, vec![], T0);
        activate(&mut f.engine, vec![7], T0);
        f.engine.tick(T0 + 20);

        let frames = f.conn.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(
            &frames[0][..],
            &[
                0x00, 0x00, 0x00, 0x00, //
                0x07, 0x00, 0x00, 0x00, //
                0x00, 0x00, 0x00, 0x00, //
                0x04, 0x00, 0x00, 0x00, //
                0x01, 0x00, 0x00, 0x00, //
            ]
        );
    }

    #[test]
    fn diff_threshold_switches_to_rle_on_second_tick() {
        static BLOB: [u8; 300] = [0xAA; 300];
        let mut f = fixture(&[("blob", static_getter(&BLOB))]);
        register(&mut f.engine, "blob", 1, vec![], T0);
        activate(&mut f.engine, vec![1], T0);

        f.engine.tick(T0 + 20);
        f.engine.tick(T0 + 60);

        let frames = f.conn.frames();
        assert_eq!(frames.len(), 2);

        // first: full payload
        assert_eq!(frames[0].len(), 4 + 12 + 300);
        assert_eq!(&frames[0][8..12], &0u32.to_le_bytes()); // inner full
        assert_eq!(&frames[0][12..16], &300u32.to_le_bytes());

        // second: one (75, 0) pair
        assert_eq!(
            &frames[1][..],
            &[
                [0u32.to_le_bytes(), 1u32.to_le_bytes()].concat(),
                [1u32.to_le_bytes(), 8u32.to_le_bytes()].concat(),
                [75u32.to_le_bytes(), 0u32.to_le_bytes()].concat(),
            ]
            .concat()[..]
        );

        // only frames above 64 bytes ask for per-message compression
        let flags: Vec<bool> = f.conn.sent.lock().iter().map(|(_, c)| *c).collect();
        assert_eq!(flags, vec![true, false]);
    }

    #[test]
    fn payload_of_256_stays_full() {
        static BLOB: [u8; 256] = [0x11; 256];
        let mut f = fixture(&[("b", static_getter(&BLOB))]);
        register(&mut f.engine, "b", 1, vec![], T0);
        activate(&mut f.engine, vec![1], T0);

        f.engine.tick(T0 + 20);
        f.engine.tick(T0 + 60);

        let frames = f.conn.frames();
        assert_eq!(&frames[1][8..12], &0u32.to_le_bytes()); // still inner full
    }

    #[test]
    fn min_update_spacing_suppresses_back_to_back_ticks() {
        let mut f = fixture(&[("v", static_getter(&[1, 2, 3, 4]))]);
        register(&mut f.engine, "v", 1, vec![], T0);
        activate(&mut f.engine, vec![1], T0);

        f.engine.tick(T0 + 20);
        f.engine.tick(T0 + 30); // only 10 ms later: nothing eligible
        f.engine.tick(T0 + 40);

        assert_eq!(f.conn.frames().len(), 2);
    }

    #[test]
    fn refresh_keeps_a_request_alive() {
        let mut f = fixture(&[("v", static_getter(&[9, 9, 9, 9]))]);
        register(&mut f.engine, "v", 3, vec![], T0);
        activate(&mut f.engine, vec![3], T0);
        f.engine.tick(T0 + 20);

        refresh(&mut f.engine, T0 + 2000);
        f.engine.tick(T0 + 2500);
        assert_eq!(f.conn.frames().len(), 2);

        // no refresh since T0+2000: stale by T0+6000
        f.engine.tick(T0 + 6000);
        assert_eq!(f.conn.frames().len(), 2);
    }

    #[test]
    fn negative_timeout_encodes_forever_after_one_activation() {
        let mut f = fixture_with_timeout(&[("v", static_getter(&[5, 0, 0, 0]))], -1);
        register(&mut f.engine, "v", 3, vec![], T0);
        activate(&mut f.engine, vec![3], T0);

        for i in 1..=10 {
            f.engine.tick(T0 + 30_000 * i);
        }
        assert_eq!(f.conn.frames().len(), 10);
    }

    #[test]
    fn backpressure_skips_the_client_without_touching_state() {
        let mut f = fixture(&[("v", static_getter(&[1, 0, 0, 0]))]);
        register(&mut f.engine, "v", 1, vec![], T0);
        activate(&mut f.engine, vec![1], T0);

        f.conn.set_buffered(1);
        f.engine.tick(T0 + 20);
        assert!(f.conn.frames().is_empty());

        // after drain the same previous state is compared against
        f.conn.set_buffered(0);
        f.engine.tick(T0 + 40);
        let frames = f.conn.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][8..12], &0u32.to_le_bytes()); // first encode: full
    }

    #[test]
    fn outer_diff_after_two_equal_length_aggregates() {
        // three 100-byte variables keep every aggregate at 340 bytes
        static A: [u8; 100] = [0x0A; 100];
        static B: [u8; 100] = [0x0B; 100];
        let counter = Arc::new(AtomicU64::new(0));
        let c = counter.clone();
        let changing: incppect_core::Getter = Arc::new(move |_: &[i32]| {
            let t = c.fetch_add(1, Ordering::Relaxed) as u8;
            Bytes::from(vec![t; 100])
        });

        let mut f = fixture(&[
            ("a", static_getter(&A)),
            ("b", static_getter(&B)),
            ("c", changing),
        ]);
        for (i, path) in ["a", "b", "c"].into_iter().enumerate() {
            register(&mut f.engine, path, i as i32 + 1, vec![], T0);
        }
        activate(&mut f.engine, vec![1, 2, 3], T0);

        f.engine.tick(T0 + 20);
        f.engine.tick(T0 + 60);

        let frames = f.conn.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..4], &0u32.to_le_bytes());
        assert_eq!(&frames[1][..4], &1u32.to_le_bytes());

        let mut mirror = Mirror::new();
        mirror.absorb(&frames[0]).unwrap();
        mirror.absorb(&frames[1]).unwrap();
        assert_eq!(mirror.get(1).unwrap(), &A[..]);
        assert_eq!(mirror.get(3).unwrap(), &[1u8; 100][..]);
    }

    #[test]
    fn own_id_substitutes_negative_index() {
        let echo: incppect_core::Getter = Arc::new(|idxs: &[i32]| view::of(&idxs[0]));
        let mut f = fixture(&[("who[%d]", echo)]);
        register(&mut f.engine, "who[%d]", 1, vec![-1], T0);
        activate(&mut f.engine, vec![1], T0);
        f.engine.tick(T0 + 20);

        let frames = f.conn.frames();
        assert_eq!(&frames[0][16..20], &1i32.to_le_bytes()); // client id 1
    }

    #[test]
    fn unknown_paths_and_ids_are_skipped() {
        let mut f = fixture(&[("v", static_getter(&[1, 0, 0, 0]))]);
        register(&mut f.engine, "nope", 1, vec![], T0);
        activate(&mut f.engine, vec![1, 99], T0);
        f.engine.tick(T0 + 20);

        assert!(f.conn.frames().is_empty());
    }

    #[test]
    fn malformed_messages_are_dropped_without_a_tick() {
        let mut f = fixture(&[]);
        assert!(!f.engine.on_data(1, &[1, 0], T0)); // too short
        assert!(!f.engine.on_data(1, &[9, 0, 0, 0], T0)); // unknown kind
        let ragged = [2u8, 0, 0, 0, 7, 0];
        assert!(!f.engine.on_data(1, &ragged, T0));
        // every byte still counts toward rx
        assert_eq!(f.telemetry.n_clients(), 1);
    }

    #[test]
    fn custom_messages_reach_the_handler_without_a_tick() {
        let mut f = fixture(&[]);
        let msg = control::encode(&ControlMessage::Custom(Bytes::from_static(b"hello")));
        assert!(!f.engine.on_data(1, &msg, T0));

        let log = f.handler_log.lock();
        // connect event first, then the custom payload
        assert_eq!(log.len(), 2);
        assert!(matches!(log[0], (1, ClientEvent::Connect, _)));
        assert_eq!(log[1].2, b"hello");
    }

    #[test]
    fn connect_event_carries_the_address() {
        let f = fixture(&[]);
        let log = f.handler_log.lock();
        assert_eq!(log[0].2, vec![127, 0, 0, 1]);
    }

    #[test]
    fn close_removes_the_client_once() {
        let mut f = fixture(&[]);
        f.engine.on_close(1, 1000, "done", T0 + 100);
        assert_eq!(f.engine.client_count(), 0);
        assert_eq!(f.telemetry.n_clients(), 0);

        // a second close for the same id is a no-op
        f.engine.on_close(1, 1000, "done", T0 + 100);
        let log = f.handler_log.lock();
        assert_eq!(log.len(), 2);
        assert!(matches!(log.last(), Some((1, ClientEvent::Disconnect, _))));
    }

    #[test]
    fn shutdown_closes_clients_and_fires_disconnects() {
        let mut f = fixture(&[]);
        f.engine.shutdown();

        assert_eq!(f.engine.client_count(), 0);
        assert!(f.conn.closed.load(Ordering::Relaxed));
        assert_eq!(f.telemetry.n_clients(), 0);
        let log = f.handler_log.lock();
        assert!(matches!(log.last(), Some((1, ClientEvent::Disconnect, _))));
    }

    #[test]
    fn traffic_totals_accumulate() {
        let mut f = fixture(&[("v", static_getter(&[1, 0, 0, 0]))]);
        let reg_msg = control::encode(&ControlMessage::Register(vec![RegisterEntry {
            path: "v".into(),
            request_id: 1,
            idxs: vec![],
        }]));
        let act_msg = control::encode(&ControlMessage::Activate(vec![1]));
        f.engine.on_data(1, &reg_msg, T0);
        f.engine.on_data(1, &act_msg, T0);
        f.engine.tick(T0 + 20);

        assert_eq!(
            f.telemetry.rx_total(),
            (reg_msg.len() + act_msg.len()) as u64
        );
        // one 20-byte frame for the scalar
        assert_eq!(f.telemetry.tx_total(), 20);
        assert_eq!(f.conn.frames()[0].len(), 20);
    }
}
