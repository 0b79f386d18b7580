use std::time::Duration;

use epc_proto::{FrameError, Uid};
use epc_sexp::Value;

/// Errors that can occur in peer operations.
///
/// `Return`, `Epc`, and `Closed` are also what error continuations receive:
/// the first two report what the remote side said, the third fires when the
/// connection dies with the call still pending.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// I/O error outside the framing layer (connect, clone, spawn).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote method failed; payload of a `return-error` reply.
    #[error("remote method failed: {message}")]
    Return { message: String },

    /// The peer reported a protocol-level failure; payload of an
    /// `epc-error` reply.
    #[error("epc error from peer: {message}")]
    Epc { message: String },

    /// A reply arrived for a uid with no pending entry.
    ///
    /// Local-only condition: never sent over the wire, surfaced to the
    /// embedding application.
    #[error("no pending call for uid {uid:?}; dropped reply {reply}")]
    CallerUnknown { uid: Option<Uid>, reply: Value },

    /// The connection is closed.
    #[error("connection closed")]
    Closed,

    /// A synchronous call exceeded its deadline.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
}

impl PeerError {
    /// Extract the error text of a reply payload: strings unwrap to their
    /// content, everything else prints canonically.
    pub(crate) fn reply_text(value: &Value) -> String {
        match value.as_str() {
            Some(s) => s.to_string(),
            None => value.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;
