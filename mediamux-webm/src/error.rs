//! WebM-specific error types.

use thiserror::Error;

/// Errors produced while muxing or demuxing WebM.
///
/// [`WebmError::BufferNotFull`] is the one non-fatal variant: it means the
/// byte source currently holds fewer bytes than the parse needs. The caller
/// feeds more data and retries; every demuxer entry point is idempotent up
/// to its advancing parse position, so retrying is always safe.
#[derive(Error, Debug)]
pub enum WebmError {
    /// The source needs more resident bytes before this call can complete.
    #[error("need more data: at least {needed} bytes must be available")]
    BufferNotFull {
        /// Minimum `available` length at which the call should be retried.
        needed: u64,
    },

    /// Invalid variable-length integer.
    #[error("invalid VINT encoding at offset {offset}")]
    InvalidVint {
        /// Byte offset of the offending length byte.
        offset: u64,
    },

    /// Element ID wider than the 4 bytes the format allows.
    #[error("invalid element ID at offset {offset}")]
    InvalidElementId {
        /// Byte offset where the ID starts.
        offset: u64,
    },

    /// Element size violates its enclosing bound.
    #[error("invalid element size at offset {offset}: {message}")]
    InvalidElementSize {
        /// Byte offset of the size field.
        offset: u64,
        /// Description of the violation.
        message: String,
    },

    /// An element with unknown size where a concrete size is required.
    #[error("unknown-size {element} is not supported here")]
    UnsupportedUnknownSize {
        /// Name of the element carrying the unknown size.
        element: &'static str,
    },

    /// A required element never appeared.
    #[error("missing required element: {0}")]
    MissingElement(&'static str),

    /// Malformed block payload.
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// The document is not the WebM profile this crate handles.
    #[error("not a WebM document: {0}")]
    InvalidWebm(String),

    /// Referenced track number does not exist.
    #[error("track {track_number} not found")]
    TrackNotFound {
        /// The missing track number.
        track_number: u64,
    },

    /// Tracks cannot change once the first frame has been written.
    #[error("track list is frozen after the first frame")]
    TracksFrozen,

    /// The muxer has been finalized; no further mutation is allowed.
    #[error("muxer already finalized")]
    MuxerFinalized,

    /// A frame's timecode does not fit the cluster-relative signed 16-bit
    /// field.
    #[error("frame timecode {relative} outside the representable cluster-relative range")]
    TimecodeOutOfRange {
        /// The cluster-relative timecode that did not fit.
        relative: i64,
    },

    /// The fixed-capacity seek table has no free slot.
    #[error("seek head is full")]
    SeekHeadFull,

    /// Zero-length payload where the format requires at least one byte.
    #[error("empty payload: {0}")]
    EmptyPayload(&'static str),

    /// I/O failure from the byte sink or source, propagated verbatim.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl WebmError {
    /// True for the retryable "feed more bytes" condition.
    pub fn is_buffer_not_full(&self) -> bool {
        matches!(self, WebmError::BufferNotFull { .. })
    }
}

impl From<String> for WebmError {
    fn from(s: String) -> Self {
        WebmError::Other(s)
    }
}

impl From<&str> for WebmError {
    fn from(s: &str) -> Self {
        WebmError::Other(s.to_string())
    }
}

/// Result type for WebM operations.
pub type Result<T> = std::result::Result<T, WebmError>;
