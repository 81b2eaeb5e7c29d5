//! Error taxonomy of the connection engine.
//!
//! Failures are grouped by where recovery happens:
//!
//! - [`TransportError`]: the socket is gone or unusable. The connection and
//!   any open body channel are force-closed; nothing is retried.
//! - [`ProtocolError`]: the peer sent something HTTP/1.1 does not allow, or a
//!   frame arrived out of sequence. Fatal to the offending connection only.
//! - [`HandlerError`]: application code failed. The engine dispatches one
//!   synthetic error request (see [`crate::handler`]) and then closes the
//!   connection.
//!
//! [`HttpError`] is the umbrella type carried by the codec and the connection
//! loop. Configuration problems are not represented here: they belong to the
//! server bootstrap and must fail startup, not a connection.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinError;

/// Umbrella error for a single connection's lifecycle.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("transport error: {source}")]
    Transport {
        #[from]
        source: TransportError,
    },

    #[error("protocol error: {source}")]
    Protocol {
        #[from]
        source: ProtocolError,
    },

    #[error("handler error: {source}")]
    Handler {
        #[from]
        source: HandlerError,
    },
}

// tokio-util's codec traits require their error to absorb raw io errors
impl From<io::Error> for HttpError {
    fn from(source: io::Error) -> Self {
        TransportError::from(source).into()
    }
}

/// Socket-level failures. Never surfaced to handlers except as cleanup.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("peer closed the connection mid-message")]
    PeerClosed,

    #[error("connection idle for longer than {limit:?}")]
    IdleTimeout { limit: Duration },
}

impl TransportError {
    pub fn idle_timeout(limit: Duration) -> Self {
        Self::IdleTimeout { limit }
    }
}

/// Violations of HTTP/1.1 framing, fatal to the offending connection only.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("header section too large: {current_size} exceeds the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("more than {max_num} headers in one request")]
    TooManyHeaders { max_num: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("unsupported http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid http uri")]
    InvalidUri,

    #[error("invalid content-length: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid chunked framing: {reason}")]
    InvalidChunk { reason: String },

    #[error("{frame} frame arrived in {state} state")]
    UnexpectedFrame { frame: &'static str, state: &'static str },
}

impl ProtocolError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn invalid_header<S: ToString>(reason: S) -> Self {
        Self::InvalidHeader { reason: reason.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(reason: S) -> Self {
        Self::InvalidContentLength { reason: reason.to_string() }
    }

    pub fn invalid_chunk<S: ToString>(reason: S) -> Self {
        Self::InvalidChunk { reason: reason.to_string() }
    }

    pub fn unexpected_frame(frame: &'static str, state: &'static str) -> Self {
        Self::UnexpectedFrame { frame, state }
    }
}

/// Failures raised at the handler invocation boundary.
///
/// Cloneable so the original failure can ride along in the extensions of the
/// synthetic error request while the invoker keeps its own copy.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    #[error("handler failed: {reason}")]
    Failed { reason: String },

    #[error("handler panicked: {reason}")]
    Panicked { reason: String },

    #[error("deferred reply dropped before a response was sent")]
    ReplyDropped,
}

impl HandlerError {
    pub fn failed<S: ToString>(reason: S) -> Self {
        Self::Failed { reason: reason.to_string() }
    }

    pub fn panicked(join_error: &JoinError) -> Self {
        Self::Panicked { reason: join_error.to_string() }
    }
}
