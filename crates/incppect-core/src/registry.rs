//! Variable registry
//!
//! Maps path templates to getters. A template may contain `%d`
//! placeholders; the indices that fill them travel separately in the
//! register-paths message, so resolution is a literal map lookup.
//!
//! The registry is append-only and built before the server starts
//! accepting clients; after that it is only read.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

/// A user-supplied read callback.
///
/// Called synchronously on the engine task with the request's index
/// vector; returns the variable's bytes, which the engine copies into
/// its frame buffer within the same tick.
pub type Getter = Arc<dyn Fn(&[i32]) -> Bytes + Send + Sync>;

#[derive(Default)]
pub struct Registry {
    getters: Vec<Getter>,
    by_path: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `getter` under `path`. Re-registering a template points
    /// it at the new getter. Returns `false` when an existing template
    /// was overwritten.
    pub fn register(&mut self, path: impl Into<String>, getter: Getter) -> bool {
        let id = self.getters.len();
        self.getters.push(getter);
        self.by_path.insert(path.into(), id).is_none()
    }

    /// Look up a path template. Literal match only.
    pub fn resolve(&self, path: &str) -> Option<usize> {
        self.by_path.get(path).copied()
    }

    pub fn getter(&self, id: usize) -> Option<&Getter> {
        self.getters.get(id)
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("paths", &self.by_path.len())
            .field("getters", &self.getters.len())
            .finish()
    }
}
