//! Connection handling for the session driver
//!
//! [`SmtpConnection`] owns the stream of one cycle. It writes what the
//! session asks for and reads back complete replies, every step bounded by
//! the configured timeout.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

pub use self::{
    net::{AsyncTokioStream, Connector, NetworkStream, TokioConnector},
    tls::{Certificate, TlsParameters, TlsParametersBuilder},
};
use crate::transport::smtp::{
    error::{self, Error},
    response::{parse_response, Response},
};

mod net;
mod tls;

/// Structure that implements the SMTP client side of a cycle
pub(crate) struct SmtpConnection {
    /// TCP stream between client and server
    stream: BufReader<NetworkStream>,
    timeout: Duration,
}

impl SmtpConnection {
    pub(crate) fn new(stream: NetworkStream, timeout: Duration) -> Self {
        SmtpConnection {
            stream: BufReader::new(stream),
            timeout,
        }
    }

    pub(crate) fn is_encrypted(&self) -> bool {
        self.stream.get_ref().is_encrypted()
    }

    /// Runs the TLS handshake, bounded by the timeout
    pub(crate) async fn upgrade_tls(
        self,
        connector: &dyn Connector,
        tls_parameters: &TlsParameters,
    ) -> Result<Self, Error> {
        let timeout = self.timeout;
        let stream = self.stream.into_inner();
        let stream = tokio::time::timeout(timeout, connector.upgrade_tls(stream, tls_parameters))
            .await
            .map_err(error::timeout)??;

        #[cfg(feature = "tracing")]
        tracing::debug!("connection encrypted");
        Ok(SmtpConnection::new(stream, timeout))
    }

    /// Writes bytes to the server and flushes them
    pub(crate) async fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let stream = self.stream.get_mut();
        tokio::time::timeout(self.timeout, async {
            stream.write_all(bytes).await?;
            stream.flush().await
        })
        .await
        .map_err(error::timeout)?
        .map_err(error::network)?;

        #[cfg(feature = "tracing")]
        tracing::debug!("Wrote: {}", escape_crlf(&String::from_utf8_lossy(bytes)));
        Ok(())
    }

    /// Gets the next complete SMTP reply, whatever its code
    pub(crate) async fn read_response(&mut self) -> Result<Response, Error> {
        let timeout = self.timeout;
        tokio::time::timeout(timeout, self.read_response_inner())
            .await
            .map_err(error::timeout)?
    }

    async fn read_response_inner(&mut self) -> Result<Response, Error> {
        let mut buffer = String::with_capacity(100);

        while self
            .stream
            .read_line(&mut buffer)
            .await
            .map_err(error::network)?
            > 0
        {
            #[cfg(feature = "tracing")]
            tracing::debug!("<< {}", escape_crlf(&buffer));
            match parse_response(&buffer) {
                Ok((_remaining, response)) => return Ok(response),
                Err(nom::Err::Incomplete(_)) => { /* read more */ }
                Err(nom::Err::Failure(e)) | Err(nom::Err::Error(e)) => {
                    return Err(error::response(e.to_string()))
                }
            }
        }

        Err(error::network("connection closed by server"))
    }

    /// Shuts the stream down, errors are only logged
    pub(crate) async fn close(&mut self) {
        let result = tokio::time::timeout(self.timeout, self.stream.get_mut().shutdown())
            .await
            .map_err(error::timeout)
            .and_then(|shutdown| shutdown.map_err(error::network));
        #[cfg(feature = "tracing")]
        if let Err(err) = result {
            tracing::debug!("error while closing the connection: {}", err);
        }
        #[cfg(not(feature = "tracing"))]
        let _ = result;
    }
}

/// Returns the string replacing all the CRLF with "\<CRLF\>"
/// Used for debug displays
#[cfg(feature = "tracing")]
pub(super) fn escape_crlf(string: &str) -> String {
    string.replace("\r\n", "<CRLF>")
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    use super::{NetworkStream, SmtpConnection};

    #[test]
    #[cfg(feature = "tracing")]
    fn test_escape_crlf() {
        use super::escape_crlf;

        assert_eq!(escape_crlf("\r\n"), "<CRLF>");
        assert_eq!(escape_crlf("EHLO my_name\r\n"), "EHLO my_name<CRLF>");
        assert_eq!(
            escape_crlf("EHLO my_name\r\nSIZE 42\r\n"),
            "EHLO my_name<CRLF>SIZE 42<CRLF>"
        );
    }

    #[tokio::test]
    async fn reads_replies_split_across_packets() {
        let (client, mut server) = duplex(256);
        let mut conn = SmtpConnection::new(NetworkStream::new(client), Duration::from_secs(5));

        let server = tokio::spawn(async move {
            server.write_all(b"250-smtp.example.com\r\n250-STAR").await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            server.write_all(b"TTLS\r\n250 AUTH LOGIN\r\n").await.unwrap();
            server.write_all(b"354 go ahead\r\n").await.unwrap();
            server
        });

        let response = conn.read_response().await.unwrap();
        assert!(response.has_code(250));
        assert_eq!(
            response.message().collect::<Vec<_>>(),
            ["smtp.example.com", "STARTTLS", "AUTH LOGIN"]
        );

        let response = conn.read_response().await.unwrap();
        assert!(response.has_code(354));
        let _server = server.await.unwrap();
    }

    #[tokio::test]
    async fn negative_replies_are_returned() {
        let (client, mut server) = duplex(256);
        let mut conn = SmtpConnection::new(NetworkStream::new(client), Duration::from_secs(5));

        server.write_all(b"550 no such user\r\n").await.unwrap();
        let response = conn.read_response().await.unwrap();
        assert!(response.has_code(550));
        assert!(!response.is_positive());
    }

    #[tokio::test]
    async fn garbage_is_a_response_error() {
        let (client, mut server) = duplex(256);
        let mut conn = SmtpConnection::new(NetworkStream::new(client), Duration::from_secs(5));

        server.write_all(b"hello there\r\n").await.unwrap();
        assert!(conn.read_response().await.unwrap_err().is_response());
    }

    #[tokio::test]
    async fn closed_stream_is_a_network_error() {
        let (client, server) = duplex(256);
        let mut conn = SmtpConnection::new(NetworkStream::new(client), Duration::from_secs(5));

        drop(server);
        let err = conn.read_response().await.unwrap_err();
        assert!(err.is_connection());
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let (client, _server) = duplex(256);
        let mut conn =
            SmtpConnection::new(NetworkStream::new(client), Duration::from_millis(50));

        let err = conn.read_response().await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn writes_are_flushed() {
        let (client, mut server) = duplex(256);
        let mut conn = SmtpConnection::new(NetworkStream::new(client), Duration::from_secs(5));

        conn.write(b"QUIT\r\n").await.unwrap();
        let mut buf = [0; 6];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"QUIT\r\n");
    }
}
