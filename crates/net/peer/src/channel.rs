//! Byte transport seam: channels and dialers.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;

use crate::address::PeerAddress;

/// Bidirectional byte stream a peer runs over.
pub trait Channel: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Apply transport options once the channel is live.
    fn configure(&self) -> io::Result<()> {
        Ok(())
    }

    /// Address of the remote end, used as the identity of inbound peers.
    fn remote_address(&self) -> io::Result<PeerAddress>;
}

impl Channel for TcpStream {
    fn configure(&self) -> io::Result<()> {
        self.set_nodelay(true)
    }

    fn remote_address(&self) -> io::Result<PeerAddress> {
        self.peer_addr().map(PeerAddress::from)
    }
}

/// In-process channel. Has no remote address; bind it with an explicit identity.
impl Channel for DuplexStream {
    fn remote_address(&self) -> io::Result<PeerAddress> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "in-memory channel has no remote address",
        ))
    }
}

/// Opens outbound channels.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    type Channel: Channel;

    async fn dial(&self, address: &PeerAddress) -> io::Result<Self::Channel>;
}

/// Dials plain TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    type Channel = TcpStream;

    async fn dial(&self, address: &PeerAddress) -> io::Result<TcpStream> {
        TcpStream::connect(address.connect_target()).await
    }
}
