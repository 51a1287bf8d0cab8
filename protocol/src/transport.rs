//! Network primitives the chat core is driven by. TCP is the default; tests
//! plug in in-memory duplex pipes.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A duplex byte stream to one remote peer, already split into halves.
pub struct Stream {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    pub peer: String,
}

impl Stream {
    pub fn new<R, W>(reader: R, writer: W, peer: impl Into<String>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Stream {
            reader: Box::new(reader),
            writer: Box::new(writer),
            peer: peer.into(),
        }
    }

    pub fn from_tcp(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| String::from("unknown"));

        // raw framing relies on one segment per message where possible
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%peer, error = %err, "unable to set TCP_NODELAY");
        }

        let (tcp_read, tcp_write) = stream.into_split();
        Stream::new(tcp_read, tcp_write, peer)
    }

    pub fn from_duplex(stream: tokio::io::DuplexStream, peer: impl Into<String>) -> Self {
        let (read, write) = tokio::io::split(stream);
        Stream::new(read, write, peer)
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream").field("peer", &self.peer).finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> io::Result<Stream>;
}

#[async_trait]
pub trait Acceptor: Send {
    async fn accept(&mut self) -> io::Result<Stream>;

    /// Bound address, if the acceptor has one.
    fn local_addr(&self) -> Option<SocketAddr>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> io::Result<Stream> {
        let stream = TcpStream::connect((host, port)).await?;
        Ok(Stream::from_tcp(stream))
    }
}

#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    pub async fn bind(host: &str, port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        Ok(TcpAcceptor { listener })
    }
}

#[async_trait]
impl Acceptor for TcpAcceptor {
    async fn accept(&mut self) -> io::Result<Stream> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(Stream::from_tcp(stream))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn tcp_pair_carries_bytes_both_ways() {
        let mut acceptor = TcpAcceptor::bind("127.0.0.1", 0).await.unwrap();
        let port = acceptor.local_addr().unwrap().port();

        let connecting = tokio::spawn(async move { TcpConnector.connect("127.0.0.1", port).await });
        let mut server_side = acceptor.accept().await.unwrap();
        let mut client_side = connecting.await.unwrap().unwrap();

        server_side.writer.write_all(b"NICK").await.unwrap();
        let mut buf = [0u8; 4];
        client_side.reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"NICK");

        client_side.writer.write_all(b"zoe").await.unwrap();
        let mut buf = [0u8; 3];
        server_side.reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"zoe");
        assert!(server_side.peer.starts_with("127.0.0.1:"));
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        // bind then drop to get a port nobody listens on
        let port = {
            let acceptor = TcpAcceptor::bind("127.0.0.1", 0).await.unwrap();
            acceptor.local_addr().unwrap().port()
        };

        assert!(TcpConnector.connect("127.0.0.1", port).await.is_err());
    }
}
