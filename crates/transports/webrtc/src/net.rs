//! Connection traits
//!
//! Object-safe views of the adapters, so code that only needs "a
//! connection" can take `Box<dyn Conn>` and stay independent of how it was
//! negotiated.

use crate::conn::RtcConn;
use crate::listener::RtcListener;
use crate::packet::RtcPacketConn;
use crate::Result;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Instant;

/// Message-preserving stream connection
#[async_trait]
pub trait Conn: Send + Sync {
    /// Read one message, truncated to `buf`
    async fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Write `buf` as one message
    async fn write(&self, buf: &[u8]) -> Result<usize>;

    /// Close the connection (idempotent)
    async fn close(&self) -> Result<()>;

    /// Local address, if known
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Remote address, if known
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// Set the read and write deadlines
    fn set_deadline(&self, at: Option<Instant>);

    /// Set the read deadline
    fn set_read_deadline(&self, at: Option<Instant>);

    /// Set the write deadline
    fn set_write_deadline(&self, at: Option<Instant>);
}

/// Datagram connection
#[async_trait]
pub trait PacketConn: Send + Sync {
    /// Read one datagram and its sender
    async fn read_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)>;

    /// Write one datagram
    async fn write_to(&self, buf: &[u8], dest: SocketAddr) -> Result<usize>;

    /// Close the connection (idempotent)
    async fn close(&self) -> Result<()>;

    /// Local address, if known
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Set the read and write deadlines
    fn set_deadline(&self, at: Option<Instant>);

    /// Set the read deadline
    fn set_read_deadline(&self, at: Option<Instant>);

    /// Set the write deadline
    fn set_write_deadline(&self, at: Option<Instant>);
}

/// Stream listener
#[async_trait]
pub trait Listener: Send + Sync {
    /// Wait for the next connection
    async fn accept(&self) -> Result<Box<dyn Conn>>;

    /// Stop accepting (idempotent)
    async fn close(&self) -> Result<()>;

    /// Local address, if known
    fn local_addr(&self) -> Option<SocketAddr>;
}

#[async_trait]
impl Conn for RtcConn {
    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        RtcConn::read(self, buf).await
    }

    async fn write(&self, buf: &[u8]) -> Result<usize> {
        RtcConn::write(self, buf).await
    }

    async fn close(&self) -> Result<()> {
        RtcConn::close(self).await
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        RtcConn::local_addr(self)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        RtcConn::remote_addr(self)
    }

    fn set_deadline(&self, at: Option<Instant>) {
        RtcConn::set_deadline(self, at)
    }

    fn set_read_deadline(&self, at: Option<Instant>) {
        RtcConn::set_read_deadline(self, at)
    }

    fn set_write_deadline(&self, at: Option<Instant>) {
        RtcConn::set_write_deadline(self, at)
    }
}

#[async_trait]
impl PacketConn for RtcPacketConn {
    async fn read_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        RtcPacketConn::read_from(self, buf).await
    }

    async fn write_to(&self, buf: &[u8], dest: SocketAddr) -> Result<usize> {
        RtcPacketConn::write_to(self, buf, dest).await
    }

    async fn close(&self) -> Result<()> {
        RtcPacketConn::close(self).await
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        RtcPacketConn::local_addr(self)
    }

    fn set_deadline(&self, at: Option<Instant>) {
        RtcPacketConn::set_deadline(self, at)
    }

    fn set_read_deadline(&self, at: Option<Instant>) {
        RtcPacketConn::set_read_deadline(self, at)
    }

    fn set_write_deadline(&self, at: Option<Instant>) {
        RtcPacketConn::set_write_deadline(self, at)
    }
}

#[async_trait]
impl Listener for RtcListener {
    async fn accept(&self) -> Result<Box<dyn Conn>> {
        let conn = RtcListener::accept(self).await?;
        Ok(Box::new(conn))
    }

    async fn close(&self) -> Result<()> {
        RtcListener::close(self).await
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        RtcListener::local_addr(self)
    }
}
