//! Server parameters

use std::path::PathBuf;

/// Tuning knobs for one server instance.
#[derive(Debug, Clone)]
pub struct Parameters {
    /// TCP listen port
    pub port: u16,
    /// Maximum message size accepted and sent; larger outbound frames
    /// are still sent, with a warning
    pub max_payload: usize,
    /// A request with no refresh for this long stops being encoded.
    /// Negative means "active once, forever after activation".
    pub t_last_request_timeout_ms: i64,
    /// Connections idle for this long are closed by the transport
    pub t_idle_timeout_s: u32,
    /// Disk root for static resources
    pub http_root: PathBuf,
    /// Resource URLs to serve from `http_root` (`""` and `"/"` resolve
    /// to `index.html`)
    pub resources: Vec<String>,
    /// TLS private key, used when `use_tls` is set
    pub ssl_key: PathBuf,
    /// TLS certificate, used when `use_tls` is set
    pub ssl_cert: PathBuf,
    /// Terminate TLS on the listener (requires the `tls` feature)
    pub use_tls: bool,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            port: incppect_core::DEFAULT_PORT,
            max_payload: incppect_core::DEFAULT_MAX_PAYLOAD,
            t_last_request_timeout_ms: 3000,
            t_idle_timeout_s: 120,
            http_root: PathBuf::from("."),
            resources: Vec::new(),
            ssl_key: PathBuf::from("key.pem"),
            ssl_cert: PathBuf::from("cert.pem"),
            use_tls: false,
        }
    }
}
