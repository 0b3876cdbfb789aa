//! Server API
//!
//! A [`Server`] is configured before it runs: variables, in-memory
//! resources and the event handler are registered first, then
//! [`Server::run`] binds the transport and hands all per-client state
//! to the engine task. `run` resolves when the server shuts down and
//! never returns an error; startup failures are logged and leave the
//! server not listening.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use incppect_core::{time, Registry};
use incppect_transport::{
    ResourceOverrides, ServeConfig, StaticFiles, TlsMaterial, TransportError, TransportEvent,
    WebSocketServer,
};
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use crate::engine::Engine;
use crate::telemetry::Telemetry;
use crate::{ClientEvent, Handler, Parameters};

/// The embedded browser decoder, served at `/incppect.js`.
const SCRIPT: &str = include_str!("../assets/incppect.js");

/// A live-inspection server instance.
pub struct Server {
    registry: Arc<RwLock<Registry>>,
    telemetry: Arc<Telemetry>,
    handler: Arc<RwLock<Option<Handler>>>,
    overrides: ResourceOverrides,
    stop: RwLock<Option<mpsc::UnboundedSender<()>>>,
}

impl Server {
    /// Create a server with the built-in telemetry variables
    /// registered.
    pub fn new() -> Self {
        let telemetry = Arc::new(Telemetry::new());
        let mut registry = Registry::new();
        telemetry.register_builtins(&mut registry);

        Self {
            registry: Arc::new(RwLock::new(registry)),
            telemetry,
            handler: Arc::new(RwLock::new(None)),
            overrides: ResourceOverrides::default(),
            stop: RwLock::new(None),
        }
    }

    /// Register a variable under a path template.
    ///
    /// The template may contain `%d` placeholders filled by the index
    /// vector of each request:
    ///
    /// ```no_run
    /// # let server = incppect::Server::new();
    /// use incppect::view;
    ///
    /// let cells = [1i32, 2, 3, 4];
    /// server.var("cells", move |_| view::of(&cells));
    /// server.var("cells[%d]", move |idxs| view::of(&cells[idxs[0] as usize]));
    /// ```
    ///
    /// Registration happens before `run`; the registry is read-only
    /// once clients are being served. Returns `false` when the path
    /// replaced an earlier registration.
    pub fn var(
        &self,
        path: impl Into<String>,
        getter: impl Fn(&[i32]) -> Bytes + Send + Sync + 'static,
    ) -> bool {
        self.registry.write().register(path, Arc::new(getter))
    }

    /// Install an in-memory static resource. Overrides win over files
    /// under `http_root`.
    pub fn set_resource(&self, url: impl AsRef<str>, content: impl Into<Bytes>) {
        self.overrides
            .write()
            .insert(url.as_ref().trim_start_matches('/').to_string(), content.into());
    }

    /// Install the handler for connect/disconnect/custom events.
    pub fn set_handler(&self, handler: impl Fn(i32, ClientEvent, &[u8]) + Send + Sync + 'static) {
        *self.handler.write() = Some(Arc::new(handler));
    }

    /// Number of currently connected clients.
    pub fn n_connected(&self) -> u32 {
        self.telemetry.n_clients()
    }

    /// Run the server until [`Server::stop`] is called. Startup
    /// failures (bind error, bad TLS material) are logged and resolve
    /// this future immediately.
    pub async fn run(&self, params: Parameters) {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<TransportEvent>();
        let (stop_tx, mut stop_rx) = mpsc::unbounded_channel::<()>();
        *self.stop.write() = Some(stop_tx);

        let tls = params.use_tls.then(|| TlsMaterial {
            key: params.ssl_key.clone(),
            cert: params.ssl_cert.clone(),
        });

        let config = ServeConfig {
            addr: SocketAddr::from(([0, 0, 0, 0], params.port)),
            max_payload: params.max_payload,
            idle_timeout: Duration::from_secs(u64::from(params.t_idle_timeout_s)),
            script: Bytes::from_static(SCRIPT.as_bytes()),
            routes: params.resources.clone(),
            tls,
        };
        let statics = StaticFiles::new(params.http_root.clone(), self.overrides.clone());

        let server = match WebSocketServer::bind(config, statics, event_tx).await {
            Ok(server) => server,
            Err(TransportError::TlsConfig { key, cert, message }) => {
                error!(
                    key = %key.display(),
                    cert = %cert.display(),
                    %message,
                    "invalid TLS material; place a PEM key and certificate at these paths"
                );
                return;
            }
            Err(e) => {
                error!(error = %e, "failed to start transport");
                return;
            }
        };

        info!(addr = %server.local_addr(), tls = params.use_tls, "incppect listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut engine = Engine::new(
            self.registry.clone(),
            self.telemetry.clone(),
            self.handler.clone(),
            params.t_last_request_timeout_ms,
            params.max_payload,
        );

        let engine_loop = async move {
            loop {
                let mut want_tick = false;
                tokio::select! {
                    event = event_rx.recv() => match event {
                        Some(event) => {
                            want_tick |= dispatch(&mut engine, event);
                            // inbound bursts coalesce into a single tick
                            while let Ok(event) = event_rx.try_recv() {
                                want_tick |= dispatch(&mut engine, event);
                            }
                        }
                        None => break,
                    },
                    _ = stop_rx.recv() => {
                        // deferred stop: close every client, then the
                        // listener; disconnect events fire before `run`
                        // resolves
                        engine.shutdown();
                        let _ = shutdown_tx.send(true);
                        break;
                    }
                }
                if want_tick {
                    engine.tick(time::timestamp_ms());
                }
            }
        };

        let (served, ()) = tokio::join!(server.serve(shutdown_rx), engine_loop);
        if let Err(e) = served {
            error!(error = %e, "transport error");
        }

        *self.stop.write() = None;
        info!("incppect stopped");
    }

    /// Run in the background; returns the task handle.
    pub fn run_async(self: &Arc<Self>, params: Parameters) -> tokio::task::JoinHandle<()> {
        let server = self.clone();
        tokio::spawn(async move { server.run(params).await })
    }

    /// Request shutdown. Callable from any thread; returns immediately.
    pub fn stop(&self) {
        if let Some(stop) = self.stop.read().as_ref() {
            let _ = stop.send(());
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

fn dispatch(engine: &mut Engine, event: TransportEvent) -> bool {
    let now = time::timestamp_ms();
    match event {
        TransportEvent::Open { conn } => {
            engine.on_open(conn, now);
            false
        }
        TransportEvent::Data { id, data, .. } => engine.on_data(id, &data, now),
        TransportEvent::Drain { id } => {
            engine.on_drain(id);
            false
        }
        TransportEvent::Close { id, code, reason } => {
            engine.on_close(id, code, &reason, now);
            false
        }
    }
}
