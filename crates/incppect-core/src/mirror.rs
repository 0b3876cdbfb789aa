//! Reference client-side decoder
//!
//! The browser page keeps one byte buffer per request id and inverts the
//! two diff levels against locally cached state: the outer diff against
//! the last full aggregate body, the inner diff against the variable's
//! own buffer. This module is the same inversion in Rust, used by the
//! test suite and by anyone writing a native client.

use std::collections::HashMap;

use crate::diff;
use crate::error::{Error, Result};
use crate::frame;

/// Client-side view of the pushed state.
#[derive(Default)]
pub struct Mirror {
    vars: HashMap<i32, Vec<u8>>,
    last_aggregate: Vec<u8>,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one inbound frame, updating every variable it carries.
    pub fn absorb(&mut self, frame: &[u8]) -> Result<()> {
        let (outer, body) = frame::split(frame)?;

        let aggregate = if outer == frame::TYPE_DIFF {
            if self.last_aggregate.is_empty() {
                return Err(Error::NoPreviousAggregate);
            }
            let mut agg = self.last_aggregate.clone();
            diff::apply(&mut agg, body)?;
            agg
        } else {
            body.to_vec()
        };

        for entry in frame::entries(&aggregate)? {
            if entry.inner_type == frame::TYPE_DIFF {
                let var = self
                    .vars
                    .get_mut(&entry.request_id)
                    .ok_or(Error::UnknownRequestId(entry.request_id))?;
                diff::apply(var, entry.payload)?;
            } else {
                self.vars.insert(entry.request_id, entry.payload.to_vec());
            }
        }

        self.last_aggregate = aggregate;
        Ok(())
    }

    /// Current bytes of a request, padding included.
    pub fn get(&self, request_id: i32) -> Option<&[u8]> {
        self.vars.get(&request_id).map(|v| v.as_slice())
    }

    /// Number of variables seen so far.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
