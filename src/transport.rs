//! Datagram sinks for replayed frames.
//!
//! The scheduler only needs "send these bytes to that address". [`Transport`]
//! is that seam; [`Connector`] acquires a transport when a replay starts so
//! the socket lives exactly as long as the replay does.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;
use tracing::debug;

use crate::{ReplayError, Result};

/// Sends whole datagrams.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send one datagram to `destination`.
    ///
    /// Errors are treated as transient by the scheduler: the same frame is
    /// retried on the next tick.
    async fn send_to(&self, datagram: &[u8], destination: SocketAddr) -> io::Result<usize>;
}

/// Acquires a [`Transport`] for one replay run.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    /// Open a transport.
    ///
    /// Failure here is fatal for the run and is reported by
    /// `play`/`restart`.
    async fn connect(&self) -> Result<Self::Transport>;
}

/// Opens broadcast-capable UDP sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpConnector {
    bind_address: SocketAddr,
    broadcast: bool,
}

impl Default for UdpConnector {
    fn default() -> Self {
        Self::new(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
    }
}

impl UdpConnector {
    /// Bind to `bind_address` with broadcast enabled.
    pub fn new(bind_address: SocketAddr) -> Self {
        Self { bind_address, broadcast: true }
    }

    pub fn with_broadcast(mut self, broadcast: bool) -> Self {
        self.broadcast = broadcast;
        self
    }

    pub fn bind_address(&self) -> SocketAddr {
        self.bind_address
    }
}

#[async_trait::async_trait]
impl Connector for UdpConnector {
    type Transport = UdpTransport;

    async fn connect(&self) -> Result<UdpTransport> {
        UdpTransport::bind(self.bind_address, self.broadcast).await
    }
}

/// A bound UDP socket.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub async fn bind(address: SocketAddr, broadcast: bool) -> Result<Self> {
        let socket = UdpSocket::bind(address)
            .await
            .map_err(|e| ReplayError::transport_io(format!("cannot bind {}", address), e))?;
        socket
            .set_broadcast(broadcast)
            .map_err(|e| ReplayError::transport_io("cannot configure broadcast", e))?;

        if let Ok(local) = socket.local_addr() {
            debug!("UDP transport bound to {}", local);
        }
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    async fn send_to(&self, datagram: &[u8], destination: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(datagram, destination).await
    }
}
