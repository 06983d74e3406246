//! Domain-specific error types for the TCP file-transfer protocol.
//!
//! All fallible operations return `Result<T, CoreError>`. Handler-level
//! failures are never panics — the dispatcher converts every variant into
//! exactly one of the wire-level error kinds from spec §7.

use thiserror::Error;

/// The canonical error type for path, frame, wire, and session-layer
/// operations.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Path sandbox ─────────────────────────────────────────────
    /// The resolved path escaped the configured root.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    // ── Framing ──────────────────────────────────────────────────
    /// Declared payload length exceeded the 4 MiB frame limit.
    #[error("frame payload too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Trailing magic bytes did not match.
    #[error("bad frame trailer")]
    BadTrailer,

    // ── Wire codec ───────────────────────────────────────────────
    /// A wire-type byte did not map to a known variant.
    #[error("unknown wire type: {0}")]
    UnknownWireType(u8),

    /// The payload ended before a field's declared length.
    #[error("truncated field while decoding")]
    Truncated,

    // ── File operations ──────────────────────────────────────────
    #[error("not found: {0}")]
    NotFound(String),

    #[error("wrong type: {0}")]
    WrongType(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("decode error: {0}")]
    DecodeError(String),

    // ── Sessions ─────────────────────────────────────────────────
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("incomplete upload, missing chunks: {0:?}")]
    IncompleteUpload(Vec<u64>),

    // ── Format negotiation ───────────────────────────────────────
    #[error("unsupported format tag: {0:#x}")]
    UnsupportedFormat(u8),

    // ── I/O passthrough ──────────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for failures that don't fit another variant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The wire error-kind tag this error maps onto (spec §7).
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::InvalidPath(_) => "invalid-path",
            CoreError::FrameTooLarge { .. } | CoreError::BadTrailer => "internal-error",
            CoreError::UnknownWireType(_) | CoreError::Truncated => "decode-error",
            CoreError::NotFound(_) => "not-found",
            CoreError::WrongType(_) => "wrong-type",
            CoreError::AlreadyExists(_) => "already-exists",
            CoreError::MissingParameter(_) => "missing-parameter",
            CoreError::DecodeError(_) => "decode-error",
            CoreError::SessionNotFound(_) => "session-not-found",
            CoreError::SizeMismatch { .. } => "size-mismatch",
            CoreError::IncompleteUpload(_) => "incomplete-upload",
            CoreError::UnsupportedFormat(_) => "unsupported-format",
            CoreError::Io(_) => "internal-error",
            CoreError::Internal(_) => "internal-error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_mapping() {
        assert_eq!(CoreError::InvalidPath("x".into()).kind(), "invalid-path");
        assert_eq!(
            CoreError::SessionNotFound("s1".into()).kind(),
            "session-not-found"
        );
        assert_eq!(CoreError::UnsupportedFormat(0x01).kind(), "unsupported-format");
    }

    #[test]
    fn display_messages() {
        let e = CoreError::SizeMismatch {
            expected: 10,
            actual: 5,
        };
        assert!(e.to_string().contains("10"));
        assert!(e.to_string().contains('5'));
    }
}
