//! Domain-specific error types for the tilecast pipeline.
//!
//! All fallible operations return `Result<T, CastError>` or a more
//! specific error at the component seam. Steady-state, per-item
//! failures (one bad frame, one lost recipient) are absorbed locally
//! with counters and logs; only initialization-time failures
//! propagate to the owning process.

use thiserror::Error;

use crate::types::SurfaceId;

// ── CastError ────────────────────────────────────────────────────

/// The canonical error type for the tilecast subsystem.
#[derive(Debug, Error)]
pub enum CastError {
    /// The inbound stream socket could not be bound. Fatal — the
    /// subsystem must not start partially.
    #[error("failed to bind stream socket on port {port}: {source}")]
    Bind {
        port: u16,
        source: std::io::Error,
    },

    /// The socket layer reported an error.
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// One accumulated frame failed to decode. Transient — discard
    /// and continue, never fatal.
    #[error("frame decode failed: {0}")]
    FrameDecode(String),

    /// A wire message could not be synthesized.
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    /// The surface-identifier pool has no free ids.
    #[error("surface pool exhausted")]
    SurfacesExhausted,

    /// A surface id was released that was never allocated.
    #[error("surface {0} is not currently allocated")]
    SurfaceNotAllocated(SurfaceId),

    /// Encoding or decoding of a wire message failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A background worker ended abnormally.
    #[error("worker task failed: {0}")]
    Worker(String),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl From<String> for CastError {
    fn from(s: String) -> Self {
        CastError::Other(s)
    }
}

impl From<&str> for CastError {
    fn from(s: &str) -> Self {
        CastError::Other(s.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for CastError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        CastError::Encoding(e.to_string())
    }
}

// ── SynthesisError ───────────────────────────────────────────────

/// Per-sub-field synthesis failure.
///
/// A missing identifier slot aborts synthesis of the message. A
/// missing patch slot never reaches this type: it is a *soft*
/// failure, reported through the per-field synthesis report instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SynthesisError {
    /// No field in the schema can carry the surface identifier.
    #[error("no surface-identifier field found")]
    NoIdentifierField,

    /// The raster does not cover the full surface.
    #[error("raster length {got} does not cover the surface (expected {expected})")]
    RasterSize { got: usize, expected: usize },
}

// ── DeliveryError ────────────────────────────────────────────────

/// Per-recipient, per-message delivery failure.
///
/// `Disconnected` stops further sends to that recipient within the
/// current dispatch call; `Transient` is counted and skipped. Neither
/// aborts the dispatch as a whole.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The recipient left mid-stream.
    #[error("recipient gone: {0}")]
    Disconnected(String),

    /// A one-off failure for this message only.
    #[error("transient delivery failure: {0}")]
    Transient(String),
}

impl DeliveryError {
    /// Whether the failure means the recipient is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, DeliveryError::Disconnected(_))
    }

    /// Classify an I/O failure by its reason.
    pub fn classify_io(e: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof => DeliveryError::Disconnected(e.to_string()),
            _ => DeliveryError::Transient(e.to_string()),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
