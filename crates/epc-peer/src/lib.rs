//! Connection endpoints for the EPC protocol.
//!
//! An [`Endpoint`] wraps one connected stream and is fully symmetric: it
//! serves the methods in its [`Registry`] to the peer while issuing calls
//! of its own over the same connection, correlated by uid. [`Server`]
//! accepts connections on the worker side; [`connect`] opens them from the
//! supervising side. Dispatch runs on the receive thread by default, or on
//! a thread per request with [`DispatchPolicy::ThreadPerCall`].

mod call;
mod outbound;

pub mod connector;
pub mod endpoint;
pub mod error;
pub mod registry;
pub mod server;

pub use call::{ErrorFn, SuccessFn};
pub use connector::{connect, connect_with};
pub use endpoint::{DispatchPolicy, Endpoint, EndpointConfig, State};
pub use error::{PeerError, Result};
pub use registry::{
    LookupError, Method, MethodError, MethodInfo, MethodResolver, Namespace, Registry,
};
pub use server::Server;
