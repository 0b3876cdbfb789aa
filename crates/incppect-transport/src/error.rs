//! Transport error types

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    #[error("invalid TLS material (key '{key}', cert '{cert}'): {message}")]
    TlsConfig {
        key: PathBuf,
        cert: PathBuf,
        message: String,
    },

    #[error("TLS support not compiled in; enable the `tls` feature")]
    TlsNotCompiled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
