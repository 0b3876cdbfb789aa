//! HTTP/WebSocket server
//!
//! One listener carries the whole surface: the WebSocket upgrade at
//! `/incppect`, the embedded decoder script at `/incppect.js`, one GET
//! route per configured resource, and a `Resource not found` fallback.
//!
//! Each accepted socket is split into a reader and a writer task. The
//! writer drains an unbounded queue whose byte total is the
//! connection's `buffered_amount`; the queue emptying raises a `Drain`
//! event. The reader forwards messages as `Data` events and enforces
//! the idle timeout.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use incppect_core::{SCRIPT_PATH, WS_PATH};

use crate::conn::{address_fingerprint, Connection, ConnectionInfo, TransportEvent};
use crate::error::{Result, TransportError};
use crate::http::StaticFiles;

/// TLS key material locations, used when `tls` is requested.
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    pub key: PathBuf,
    pub cert: PathBuf,
}

/// Listener configuration.
#[derive(Clone)]
pub struct ServeConfig {
    pub addr: SocketAddr,
    /// Maximum inbound message size; oversize messages drop the socket
    pub max_payload: usize,
    /// Connections with no inbound traffic for this long are closed
    pub idle_timeout: Duration,
    /// Body served at [`SCRIPT_PATH`]
    pub script: Bytes,
    /// Resource URLs to expose as GET routes
    pub routes: Vec<String>,
    /// Terminate TLS when set (requires the `tls` feature)
    pub tls: Option<TlsMaterial>,
}

struct HttpState {
    statics: StaticFiles,
    script: Bytes,
    events: mpsc::UnboundedSender<TransportEvent>,
    next_id: AtomicI32,
    max_payload: usize,
    idle_timeout: Duration,
}

enum Listener {
    Plain(tokio::net::TcpListener),
    #[cfg(feature = "tls")]
    Tls {
        addr: SocketAddr,
        config: axum_server::tls_rustls::RustlsConfig,
    },
}

/// The bound server, ready to serve.
pub struct WebSocketServer {
    app: Router,
    listener: Listener,
    local_addr: SocketAddr,
}

impl WebSocketServer {
    /// Bind the listener and build the route table. This is the only
    /// place transport construction can fail: a bind error, or TLS
    /// material that is missing or invalid.
    pub async fn bind(
        config: ServeConfig,
        statics: StaticFiles,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self> {
        let state = Arc::new(HttpState {
            statics,
            script: config.script.clone(),
            events,
            next_id: AtomicI32::new(1),
            max_payload: config.max_payload,
            idle_timeout: config.idle_timeout,
        });

        let mut app = Router::new()
            .route(WS_PATH, get(ws_upgrade))
            .route(SCRIPT_PATH, get(serve_script));

        let mut seen = HashSet::new();
        for route in &config.routes {
            let path = format!("/{}", route.trim_start_matches('/'));
            if path == WS_PATH || path == SCRIPT_PATH || !seen.insert(path.clone()) {
                continue;
            }
            app = app.route(&path, get(serve_resource));
        }

        let app = app
            .fallback(not_found)
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let (listener, local_addr) = match config.tls {
            None => {
                let listener = tokio::net::TcpListener::bind(config.addr)
                    .await
                    .map_err(|source| TransportError::Bind {
                        addr: config.addr,
                        source,
                    })?;
                let local_addr = listener.local_addr()?;
                (Listener::Plain(listener), local_addr)
            }
            Some(tls) => (tls_listener(config.addr, tls).await?, config.addr),
        };

        Ok(Self {
            app,
            listener,
            local_addr,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until `shutdown` fires. Existing connections are expected
    /// to be closed by the caller before the signal.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        match self.listener {
            Listener::Plain(listener) => {
                axum::serve(
                    listener,
                    self.app
                        .into_make_service_with_connect_info::<SocketAddr>(),
                )
                .with_graceful_shutdown(async move {
                    let _ = shutdown.changed().await;
                })
                .await?;
            }
            #[cfg(feature = "tls")]
            Listener::Tls { addr, config } => {
                let handle = axum_server::Handle::new();
                let watcher = handle.clone();
                tokio::spawn(async move {
                    let _ = shutdown.changed().await;
                    watcher.graceful_shutdown(Some(Duration::from_secs(1)));
                });
                axum_server::bind_rustls(addr, config)
                    .handle(handle)
                    .serve(
                        self.app
                            .into_make_service_with_connect_info::<SocketAddr>(),
                    )
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(feature = "tls")]
async fn tls_listener(addr: SocketAddr, tls: TlsMaterial) -> Result<Listener> {
    let config = axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.cert, &tls.key)
        .await
        .map_err(|e| TransportError::TlsConfig {
            key: tls.key.clone(),
            cert: tls.cert.clone(),
            message: e.to_string(),
        })?;
    Ok(Listener::Tls { addr, config })
}

#[cfg(not(feature = "tls"))]
async fn tls_listener(_addr: SocketAddr, _tls: TlsMaterial) -> Result<Listener> {
    Err(TransportError::TlsNotCompiled)
}

// ---------------------------------------------------------------------------
// HTTP handlers
// ---------------------------------------------------------------------------

async fn serve_script(State(state): State<Arc<HttpState>>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/javascript")],
        state.script.clone(),
    )
        .into_response()
}

async fn serve_resource(State(state): State<Arc<HttpState>>, uri: Uri) -> Response {
    debug!(url = %uri.path(), "resource request");
    match state.statics.load(uri.path()).await {
        Some(resolved) => match resolved.content_type {
            Some(ct) => ([(header::CONTENT_TYPE, ct)], resolved.body).into_response(),
            None => resolved.body.into_response(),
        },
        None => not_found().await.into_response(),
    }
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Resource not found")
}

// ---------------------------------------------------------------------------
// WebSocket side
// ---------------------------------------------------------------------------

enum Outbound {
    Frame { data: Bytes, binary: bool },
    Close,
}

/// Outbound handle for one socket; the engine's view of the client.
pub struct WsConnection {
    queued: AtomicU64,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl WsConnection {
    fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            queued: AtomicU64::new(0),
            tx,
        }
    }

    /// Account a finished write; true when the queue just drained.
    fn complete_write(&self, len: u64) -> bool {
        self.queued.fetch_sub(len, Ordering::AcqRel) == len
    }
}

impl Connection for WsConnection {
    fn send(&self, data: Bytes, binary: bool, _allow_compress: bool) -> bool {
        let len = data.len() as u64;
        let backlog = self.queued.fetch_add(len, Ordering::AcqRel);
        if self.tx.send(Outbound::Frame { data, binary }).is_err() {
            self.queued.fetch_sub(len, Ordering::AcqRel);
            return false;
        }
        backlog == 0
    }

    fn buffered_amount(&self) -> u64 {
        self.queued.load(Ordering::Acquire)
    }

    fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

async fn ws_upgrade(
    State(state): State<Arc<HttpState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    let max_payload = state.max_payload;
    ws.max_message_size(max_payload)
        .on_upgrade(move |socket| client_session(state, socket, addr))
}

async fn client_session(state: Arc<HttpState>, socket: WebSocket, addr: SocketAddr) {
    let id = state.next_id.fetch_add(1, Ordering::Relaxed);
    let remote = address_fingerprint(addr.ip());
    info!(client = id, %addr, "websocket client connected");

    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let conn = Arc::new(WsConnection::new(out_tx));

    let opened = state.events.send(TransportEvent::Open {
        conn: ConnectionInfo {
            id,
            remote,
            handle: conn.clone(),
        },
    });
    if opened.is_err() {
        return;
    }

    let writer_conn = conn.clone();
    let writer_events = state.events.clone();
    let writer = tokio::spawn(async move {
        while let Some(out) = out_rx.recv().await {
            match out {
                Outbound::Frame { data, binary } => {
                    let len = data.len() as u64;
                    let msg = if binary {
                        Message::Binary(data)
                    } else {
                        Message::Text(String::from_utf8_lossy(&data).into_owned().into())
                    };
                    let failed = sink.send(msg).await.is_err();
                    if writer_conn.complete_write(len) {
                        let _ = writer_events.send(TransportEvent::Drain { id });
                    }
                    if failed {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    // 1006 = abnormal closure, overwritten when the peer says otherwise
    let mut code: u16 = 1006;
    let mut reason = String::new();

    loop {
        match tokio::time::timeout(state.idle_timeout, stream.next()).await {
            Err(_) => {
                debug!(client = id, "closing idle connection");
                code = 1001;
                conn.close();
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                warn!(client = id, error = %e, "websocket read error");
                break;
            }
            Ok(Some(Ok(msg))) => match msg {
                Message::Binary(data) => {
                    let _ = state.events.send(TransportEvent::Data {
                        id,
                        data,
                        binary: true,
                    });
                }
                Message::Text(text) => {
                    let _ = state.events.send(TransportEvent::Data {
                        id,
                        data: Bytes::copy_from_slice(text.as_bytes()),
                        binary: false,
                    });
                }
                Message::Close(frame) => {
                    if let Some(f) = frame {
                        code = f.code;
                        reason = f.reason.to_string();
                    } else {
                        code = 1005; // closed without a status
                    }
                    break;
                }
                // pings are answered by the protocol layer
                Message::Ping(_) | Message::Pong(_) => {}
            },
        }
    }

    conn.close();
    let _ = state.events.send(TransportEvent::Close { id, code, reason });
    let _ = writer.await;
    info!(client = id, "websocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_reports_backpressure_growth() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = WsConnection::new(tx);

        assert!(conn.send(Bytes::from_static(&[0; 8]), true, false));
        assert!(!conn.send(Bytes::from_static(&[0; 4]), true, false));
        assert_eq!(conn.buffered_amount(), 12);

        // writer catches up
        assert!(matches!(rx.try_recv(), Ok(Outbound::Frame { .. })));
        assert!(!conn.complete_write(8));
        assert!(conn.complete_write(4));
        assert_eq!(conn.buffered_amount(), 0);

        assert!(conn.send(Bytes::from_static(&[0; 2]), true, false));
    }

    #[test]
    fn send_to_dropped_writer_fails_without_leaking_backlog() {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = WsConnection::new(tx);
        drop(rx);

        assert!(!conn.send(Bytes::from_static(&[0; 8]), true, false));
        assert_eq!(conn.buffered_amount(), 0);
    }
}
