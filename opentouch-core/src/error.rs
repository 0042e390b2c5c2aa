//! Domain-specific error types for the streaming pipeline.
//!
//! All fallible operations return `Result<T, StreamError>`.
//! Only source initialization failures are meant to reach the caller of
//! [`CaptureLoop::start`](crate::stream::CaptureLoop::start); everything
//! else on the streaming path is logged and absorbed by the loop.

use std::time::Duration;

use thiserror::Error;

/// The canonical error type for OpenTouch.
#[derive(Debug, Error)]
pub enum StreamError {
    // ── Capture Errors ───────────────────────────────────────────
    /// The frame source could not be created (no display, no duplication).
    #[error("capture source initialization failed: {0}")]
    CaptureInit(String),

    /// A single frame acquisition failed.
    #[error("capture failed: {0}")]
    Capture(String),

    /// No new frame was produced within the deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The frame buffer does not match its declared geometry.
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),

    // ── Encoding Errors ──────────────────────────────────────────
    /// Compressing a raw frame failed.
    #[error("encode failed: {0}")]
    Encode(String),

    /// A control message could not be serialized or parsed.
    #[error("message encoding error: {0}")]
    Encoding(String),

    // ── Input Errors ─────────────────────────────────────────────
    /// The OS rejected an injected input command.
    #[error("input injection failed: {0}")]
    Injection(String),

    // ── Session Errors ───────────────────────────────────────────
    /// An operation referenced a session that is not registered.
    #[error("unknown session {0}")]
    UnknownSession(u64),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// The OS reported an I/O error (thread spawn, sockets).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for StreamError {
    fn from(e: serde_json::Error) -> Self {
        StreamError::Encoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let e = StreamError::CaptureInit("no display".into());
        assert_eq!(e.to_string(), "capture source initialization failed: no display");

        let e = StreamError::UnknownSession(7);
        assert_eq!(e.to_string(), "unknown session 7");
    }

    #[test]
    fn from_json_error() {
        let err = serde_json::from_str::<u32>("not json").unwrap_err();
        let e: StreamError = err.into();
        assert!(matches!(e, StreamError::Encoding(_)));
    }
}
