//! Error types for incppect

use thiserror::Error;

/// Result type alias for incppect operations
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol error types
#[derive(Error, Debug)]
pub enum Error {
    /// Inbound message shorter than its fixed prefix
    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall { needed: usize, have: usize },

    /// Activate body length is not a whole number of request ids
    #[error("activate body of {0} bytes is not a multiple of 4")]
    InvalidActivateLength(usize),

    /// First u32 of a client message is not a known kind
    #[error("unknown message kind: {0}")]
    UnknownMessageKind(i32),

    /// Register-paths text block stopped mid-group
    #[error("malformed register group near '{0}'")]
    MalformedRegisterGroup(String),

    /// Diff stream length is not a whole number of (run, value) pairs
    #[error("diff stream of {0} bytes is not a multiple of 8")]
    TruncatedDiffStream(usize),

    /// Diff stream writes past the end of the destination buffer
    #[error("diff run overruns destination: cell {cursor} of {cells}")]
    DiffOverrun { cursor: usize, cells: usize },

    /// Aggregate frame entry extends past the end of the frame
    #[error("frame truncated at offset {0}")]
    TruncatedFrame(usize),

    /// Inner diff referenced a request id with no cached payload
    #[error("no cached payload for request id {0}")]
    UnknownRequestId(i32),

    /// Outer diff received before any full aggregate
    #[error("diff aggregate received with no previous aggregate")]
    NoPreviousAggregate,
}
