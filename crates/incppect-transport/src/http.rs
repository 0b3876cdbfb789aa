//! Static resource resolution
//!
//! Resources are looked up in two layers: in-memory overrides installed
//! through `set_resource` first, then the disk tree under `http_root`.
//! A URL that is empty or ends in `/` resolves to `index.html`. Missing
//! or empty files answer with a `Resource not found` body.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

/// Shared map of in-memory resources, keyed by URL without the leading
/// slash.
pub type ResourceOverrides = Arc<RwLock<HashMap<String, Bytes>>>;

/// Static file context for the HTTP side of the transport.
#[derive(Clone)]
pub struct StaticFiles {
    root: PathBuf,
    overrides: ResourceOverrides,
}

/// A resolved resource body plus its content type, when one is implied
/// by the URL.
pub struct Resolved {
    pub body: Bytes,
    pub content_type: Option<&'static str>,
}

impl StaticFiles {
    pub fn new(root: PathBuf, overrides: ResourceOverrides) -> Self {
        Self { root, overrides }
    }

    /// Resolve a request URL to a body, or `None` for "Resource not
    /// found".
    pub async fn load(&self, url: &str) -> Option<Resolved> {
        let mut url = url.to_string();
        if url.is_empty() || url.ends_with('/') {
            url.push_str("index.html");
        }
        let key = url.trim_start_matches('/').to_string();

        // the lock is not held across the disk read
        let cached = self.overrides.read().get(&key).cloned();
        let body = match cached {
            Some(content) => content,
            None => {
                let path = self.root.join(&key);
                debug!(path = %path.display(), "serving resource from disk");
                match tokio::fs::read(&path).await {
                    Ok(bytes) if !bytes.is_empty() => Bytes::from(bytes),
                    _ => return None,
                }
            }
        };

        Some(Resolved {
            body,
            content_type: content_type_for(&key),
        })
    }
}

fn content_type_for(url: &str) -> Option<&'static str> {
    if url.ends_with(".js") {
        Some("text/javascript")
    } else if url.ends_with(".html") {
        Some("text/html")
    } else {
        None
    }
}
