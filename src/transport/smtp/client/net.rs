use std::{
    fmt::{self, Debug},
    io,
    pin::Pin,
    task::{Context, Poll},
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};
use tokio_rustls::TlsConnector;

use super::TlsParameters;
use crate::transport::smtp::{error, Error};

/// A duplex byte stream usable as a [`NetworkStream`]
pub trait AsyncTokioStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncTokioStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// A network stream
pub struct NetworkStream {
    inner: Box<dyn AsyncTokioStream>,
    encrypted: bool,
}

impl NetworkStream {
    /// Wraps a plain stream
    pub fn new<S: AsyncTokioStream + 'static>(stream: S) -> Self {
        NetworkStream {
            inner: Box::new(stream),
            encrypted: false,
        }
    }

    /// Wraps a stream already carrying TLS
    pub fn encrypted<S: AsyncTokioStream + 'static>(stream: S) -> Self {
        NetworkStream {
            inner: Box::new(stream),
            encrypted: true,
        }
    }

    /// Opens a TCP connection
    pub async fn connect(hostname: &str, port: u16) -> Result<NetworkStream, Error> {
        let tcp_stream = TcpStream::connect((hostname, port))
            .await
            .map_err(error::connection)?;
        Ok(NetworkStream::new(tcp_stream))
    }

    /// Runs a TLS handshake over this stream
    pub async fn upgrade_tls(self, tls_parameters: &TlsParameters) -> Result<NetworkStream, Error> {
        if self.encrypted {
            #[cfg(feature = "tracing")]
            tracing::debug!("connection is already encrypted");
            return Ok(self);
        }

        let connector = TlsConnector::from(tls_parameters.config.clone());
        let stream = connector
            .connect(tls_parameters.server_name.clone(), self.inner)
            .await
            .map_err(error::tls)?;
        Ok(NetworkStream::encrypted(stream))
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }
}

impl Debug for NetworkStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkStream")
            .field("encrypted", &self.encrypted)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for NetworkStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for NetworkStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Opens the streams a session talks over
///
/// Replace the default [`TokioConnector`] to tunnel connections or to script
/// a server in tests.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connects to `server` on `port`
    async fn connect(&self, server: &str, port: u16) -> Result<NetworkStream, Error>;

    /// Upgrades an established stream to TLS
    async fn upgrade_tls(
        &self,
        stream: NetworkStream,
        tls_parameters: &TlsParameters,
    ) -> Result<NetworkStream, Error> {
        stream.upgrade_tls(tls_parameters).await
    }
}

/// Connects over TCP, encrypts with rustls
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioConnector;

#[async_trait]
impl Connector for TokioConnector {
    async fn connect(&self, server: &str, port: u16) -> Result<NetworkStream, Error> {
        NetworkStream::connect(server, port).await
    }
}

#[cfg(test)]
mod test {
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    use super::NetworkStream;
    use crate::transport::smtp::client::TlsParameters;

    #[tokio::test]
    async fn delegates_to_inner_stream() {
        let (client, mut server) = duplex(64);
        let mut stream = NetworkStream::new(client);
        assert!(!stream.is_encrypted());

        stream.write_all(b"EHLO\r\n").await.unwrap();
        let mut buf = [0; 6];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"EHLO\r\n");

        server.write_all(b"250 ok\r\n").await.unwrap();
        let mut buf = [0; 8];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"250 ok\r\n");
    }

    #[tokio::test]
    async fn encrypted_streams_are_not_upgraded_twice() {
        let (client, _server) = duplex(64);
        let stream = NetworkStream::encrypted(client);
        let params = TlsParameters::new("localhost".to_owned()).unwrap();

        let stream = stream.upgrade_tls(&params).await.unwrap();
        assert!(stream.is_encrypted());
    }

    #[tokio::test]
    async fn handshake_failure_is_a_tls_error() {
        let (client, mut server) = duplex(4096);
        let params = TlsParameters::new("localhost".to_owned()).unwrap();

        let server = tokio::spawn(async move {
            let mut buf = [0; 16];
            let _ = server.read(&mut buf).await;
            server.write_all(b"220 not tls at all\r\n").await.unwrap();
        });

        let err = NetworkStream::new(client)
            .upgrade_tls(&params)
            .await
            .unwrap_err();
        assert!(err.is_tls());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn refused_connection() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = NetworkStream::connect("127.0.0.1", port).await.unwrap_err();
        assert!(err.is_connection());
    }
}
