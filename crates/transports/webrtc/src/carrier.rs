//! Signaling carriers
//!
//! A carrier is the ordinary, already-connected channel used once to trade
//! session descriptions. Stream carriers are framed (see
//! [`crate::signaling::framing`]); packet carriers send one description per
//! datagram.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

/// Connected byte stream used for the offer/answer exchange
pub trait SignalCarrier: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Local address, inherited by the resulting connection
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Address of the signaling peer, reported as the connection's remote address
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl SignalCarrier for TcpStream {
    fn local_addr(&self) -> Option<SocketAddr> {
        TcpStream::local_addr(self).ok()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }
}

impl SignalCarrier for DuplexStream {}

/// Source of inbound signaling carriers
#[async_trait]
pub trait SignalListener: Send + 'static {
    /// Carrier type yielded by `accept`
    type Carrier: SignalCarrier;

    /// Wait for the next inbound carrier
    async fn accept(&mut self) -> io::Result<Self::Carrier>;

    /// Bound address, if any
    fn local_addr(&self) -> Option<SocketAddr>;
}

#[async_trait]
impl SignalListener for TcpListener {
    type Carrier = TcpStream;

    async fn accept(&mut self) -> io::Result<TcpStream> {
        let (stream, _) = TcpListener::accept(self).await?;
        Ok(stream)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        TcpListener::local_addr(self).ok()
    }
}

/// Datagram socket used for the offer/answer exchange of packet connections
#[async_trait]
pub trait PacketCarrier: Send + Sync + 'static {
    /// Send one datagram
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Receive one datagram
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Bound address
    fn local_addr(&self) -> Option<SocketAddr>;
}

#[async_trait]
impl PacketCarrier for UdpSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        UdpSocket::local_addr(self).ok()
    }
}
