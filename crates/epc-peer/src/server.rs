use std::io::Write;
use std::net::{TcpListener, ToSocketAddrs};
use std::sync::Arc;

use crate::endpoint::{Endpoint, EndpointConfig};
use crate::error::Result;
use crate::registry::Registry;

/// Accepts connections and serves one registry to every peer.
pub struct Server {
    listener: TcpListener,
    registry: Arc<Registry>,
    config: EndpointConfig,
}

impl Server {
    /// Bind to `addr`. Port 0 picks an ephemeral port; see
    /// [`port`](Server::port).
    pub fn bind(addr: impl ToSocketAddrs, registry: Arc<Registry>) -> Result<Self> {
        Self::bind_with(addr, registry, EndpointConfig::default())
    }

    pub fn bind_with(
        addr: impl ToSocketAddrs,
        registry: Arc<Registry>,
        config: EndpointConfig,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        tracing::info!(addr = %listener.local_addr()?, "listening");
        Ok(Self {
            listener,
            registry,
            config,
        })
    }

    /// The bound port, as assigned by the OS when binding to port 0.
    pub fn port(&self) -> Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Write the bound port followed by a newline and flush.
    ///
    /// This is the startup handshake a supervising editor reads from the
    /// worker's stdout to learn where to connect.
    pub fn print_port(&self, out: &mut impl Write) -> Result<()> {
        writeln!(out, "{}", self.port()?)?;
        out.flush()?;
        Ok(())
    }

    /// Accept one connection and return its started endpoint.
    pub fn accept(&self) -> Result<Endpoint> {
        let (stream, addr) = self.listener.accept()?;
        tracing::info!(peer = %addr, "accepted connection");
        let endpoint = Endpoint::new(stream, Arc::clone(&self.registry), self.config.clone())?;
        endpoint.start()?;
        Ok(endpoint)
    }

    /// Accept connections forever, joining each one before accepting the
    /// next. Returns only on accept failure.
    pub fn serve_forever(&self) -> Result<()> {
        loop {
            let endpoint = self.accept()?;
            endpoint.join()?;
        }
    }
}
