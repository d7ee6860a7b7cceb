//! Domain-specific error types for the companion front-end.
//!
//! Two layers live here:
//!
//! - [`CompanionError`]: transport, codec and state-machine faults raised by
//!   the plumbing in this crate.
//! - [`FailureDescriptor`]: the pre-translation failure every handler
//!   returns. It carries a free-form cause and, when the producer knows it,
//!   a structured [`FailureKind`]. Descriptors never reach callers directly;
//!   the gateway runs them through [`crate::translate`] exactly once.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for companion plumbing.
#[derive(Debug, Error)]
pub enum CompanionError {
    // ── Framing Errors ───────────────────────────────────────────
    /// Received bytes that do not start with the `IDB0` magic sequence.
    #[error("invalid magic bytes: expected IDB0")]
    InvalidMagic,

    /// A field in the frame header could not be parsed.
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    /// The frame payload failed checksum verification.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// The payload exceeds the configured maximum size.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The received frame is shorter or longer than its header claims.
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidFrameLength { expected: usize, actual: usize },

    /// Buffered bytes exceeded the codec limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    // ── Connection Errors ────────────────────────────────────────
    /// The socket/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of a payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    // ── State Errors ─────────────────────────────────────────────
    /// A state machine was asked for a transition it does not allow.
    #[error("invalid transition: {0}")]
    InvalidTransition(&'static str),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for CompanionError {
    fn from(s: String) -> Self {
        CompanionError::Other(s)
    }
}

impl From<&str> for CompanionError {
    fn from(s: &str) -> Self {
        CompanionError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for CompanionError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        CompanionError::ChannelClosed
    }
}

impl From<Box<bincode::ErrorKind>> for CompanionError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        CompanionError::Encoding(e.to_string())
    }
}

impl From<serde_json::Error> for CompanionError {
    fn from(e: serde_json::Error) -> Self {
        CompanionError::Encoding(e.to_string())
    }
}

// ── FailureKind ──────────────────────────────────────────────────

/// Structured failure tag attached by producers that know what went wrong.
///
/// When present it takes precedence over text matching on the cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The caller supplied a malformed request.
    InvalidArgument,
    /// The capability is not available on this target class.
    Unsupported,
    /// The target is not in the runtime state the operation needs.
    PreconditionFailed,
    /// Generic transport or internal fault.
    Internal,
    /// An awaited resource did not become available in time.
    Timeout,
    /// A resource is transiently absent.
    Unavailable,
    /// A payload was malformed or invalid.
    DataLoss,
    /// The call was cancelled by its transport.
    Cancelled,
}

// ── FailureDescriptor ────────────────────────────────────────────

/// An internal failure condition: a cause plus an optional [`FailureKind`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{cause}")]
pub struct FailureDescriptor {
    cause: String,
    kind: Option<FailureKind>,
}

impl FailureDescriptor {
    /// An untagged failure; translation falls back to the cause text.
    pub fn new(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
            kind: None,
        }
    }

    /// A failure carrying a structured kind.
    pub fn with_kind(kind: FailureKind, cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
            kind: Some(kind),
        }
    }

    pub fn invalid_argument(cause: impl Into<String>) -> Self {
        Self::with_kind(FailureKind::InvalidArgument, cause)
    }

    pub fn unsupported(cause: impl Into<String>) -> Self {
        Self::with_kind(FailureKind::Unsupported, cause)
    }

    pub fn precondition(cause: impl Into<String>) -> Self {
        Self::with_kind(FailureKind::PreconditionFailed, cause)
    }

    pub fn internal(cause: impl Into<String>) -> Self {
        Self::with_kind(FailureKind::Internal, cause)
    }

    pub fn unavailable(cause: impl Into<String>) -> Self {
        Self::with_kind(FailureKind::Unavailable, cause)
    }

    pub fn data_loss(cause: impl Into<String>) -> Self {
        Self::with_kind(FailureKind::DataLoss, cause)
    }

    pub fn timeout(cause: impl Into<String>) -> Self {
        Self::with_kind(FailureKind::Timeout, cause)
    }

    /// The failure raised when a transport cancels a call.
    pub fn cancelled() -> Self {
        Self::with_kind(FailureKind::Cancelled, "call cancelled by transport")
    }

    /// Human-readable cause.
    pub fn cause(&self) -> &str {
        &self.cause
    }

    /// Structured kind, if the producer supplied one.
    pub fn kind(&self) -> Option<FailureKind> {
        self.kind
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == Some(FailureKind::Cancelled)
    }
}

impl From<CompanionError> for FailureDescriptor {
    fn from(e: CompanionError) -> Self {
        let kind = match &e {
            CompanionError::Timeout(_) => FailureKind::Timeout,
            CompanionError::ChecksumMismatch
            | CompanionError::Encoding(_)
            | CompanionError::InvalidFrameLength { .. } => FailureKind::DataLoss,
            _ => FailureKind::Internal,
        };
        Self::with_kind(kind, e.to_string())
    }
}
