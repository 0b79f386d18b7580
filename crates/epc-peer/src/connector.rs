use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;

use crate::endpoint::{Endpoint, EndpointConfig};
use crate::error::Result;
use crate::registry::Registry;

/// Connect to a peer with an empty registry. The returned endpoint is
/// started and ready to issue calls.
pub fn connect(addr: impl ToSocketAddrs) -> Result<Endpoint> {
    connect_with(addr, Arc::new(Registry::new()), EndpointConfig::default())
}

/// Connect to a peer, serving `registry` for calls coming the other way.
pub fn connect_with(
    addr: impl ToSocketAddrs,
    registry: Arc<Registry>,
    config: EndpointConfig,
) -> Result<Endpoint> {
    let stream = TcpStream::connect(addr)?;
    tracing::info!(peer = %stream.peer_addr()?, "connected");
    let endpoint = Endpoint::new(stream, registry, config)?;
    endpoint.start()?;
    Ok(endpoint)
}
