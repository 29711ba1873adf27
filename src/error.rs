//! Error types for the session engine.
//!
//! Internally every fallible operation returns one of these typed errors via
//! the usual `?` propagation. At the handler boundary `SessionError` collapses
//! to the wire-level contract: either the session closes (no `id` to answer
//! with) or a `resp ok=false` is emitted carrying `to_wire_message()`.

use thiserror::Error;

/// Errors that can terminate a session outright (transport, framing, or a
/// handshake/decode failure with no recoverable request id).
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("frame too large: {0} bytes exceeds maximum of {1}")]
    FrameTooLarge(u32, u32),

    #[error("peer closed connection")]
    PeerClosed,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Errors a handler can report back to the peer without ending the session.
/// `to_wire_message` is what actually crosses the wire in the `error` field
/// of a `resp` envelope -- it is intentionally just a string, per the
/// protocol's error-handling design.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Filesystem(String),

    #[error("out of memory")]
    Resource,

    #[error("unknown command")]
    UnknownCommand,

    #[error("read/write error")]
    MidStream,

    #[error("{0}")]
    BadArgument(String),

    #[error("{0}")]
    Other(String),
}

impl HandlerError {
    pub fn to_wire_message(&self) -> String {
        self.to_string()
    }

    pub fn filesystem(err: std::io::Error) -> Self {
        HandlerError::Filesystem(err.to_string())
    }
}

/// A decode failure. Whether this is fatal depends on whether the caller
/// had already recovered a request `id` to attach an error response to.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unexpected end of buffer")]
    Truncated,

    #[error("unknown type tag: 0x{0:02x}")]
    UnknownTag(u8),

    #[error("value is not valid UTF-8")]
    InvalidUtf8,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("field has wrong type: {0}")]
    WrongType(&'static str),
}
