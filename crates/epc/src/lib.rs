//! Symmetric s-expression RPC between editor and worker processes.
//!
//! epc implements the EPC protocol: length-prefixed s-expression frames
//! over a stream, with uid-correlated calls flowing in both directions at
//! once. A worker binds an ephemeral port, prints it on stdout, and serves
//! its registered methods; the supervising editor connects, calls them,
//! and serves methods of its own over the same connection.
//!
//! # Crate Structure
//!
//! - [`sexp`] — S-expression values, parser, and canonical printer
//! - [`proto`] — Wire framing and the message grammar
//! - [`peer`] — Endpoints, the method registry, and call management

/// Re-export s-expression types.
pub mod sexp {
    pub use epc_sexp::*;
}

/// Re-export framing and message types.
pub mod proto {
    pub use epc_proto::*;
}

/// Re-export endpoint types.
pub mod peer {
    pub use epc_peer::*;
}
