//! The SMTP side of the queue: connecting, negotiating and talking to a relay.
//!
//! This SMTP client follows [RFC 5321](https://tools.ietf.org/html/rfc5321), and is designed to
//! hand messages over to a relay email server, relying as much as possible on the relay
//! for sanity and RFC compliance checks.
//!
//! It implements the following extensions:
//!
//! * STARTTLS ([RFC 2487](http://tools.ietf.org/html/rfc2487))
//! * AUTH ([RFC 4954](http://tools.ietf.org/html/rfc4954)) with the LOGIN mechanism
//!
//! One cycle opens one connection, then walks through:
//!
//! * the greeting, `EHLO`, and optionally `STARTTLS` followed by a second `EHLO`
//! * `AUTH LOGIN` when credentials are configured
//! * `MAIL FROM`, one `RCPT TO` per recipient, `DATA` and the payload for every queued message,
//!   with `RSET` between messages
//! * `QUIT` once the queue is empty
//!
//! Replies are classified by their first digit: `4yz` replies count as temporary failures,
//! `5yz` as permanent ones. Failures before the first message, unreadable replies, timeouts and
//! broken connections end the cycle and leave the remaining messages queued.

use std::time::Duration;

pub use self::{
    client::{
        AsyncTokioStream, Certificate, Connector, NetworkStream, TlsParameters,
        TlsParametersBuilder, TokioConnector,
    },
    error::Error,
};
use self::{
    authentication::{Credentials, Mechanism},
    extension::ClientId,
};

pub mod authentication;
pub mod client;
pub mod commands;
mod connection_url;
pub mod error;
pub mod extension;
pub mod response;
pub(crate) mod session;

pub(crate) use self::connection_url::from_connection_url;

// Registered port numbers:
// https://www.iana.org/assignments/service-names-port-numbers/service-names-port-numbers.xhtml

/// Default smtp port
pub const SMTP_PORT: u16 = 25;
/// Default submission port
pub const SUBMISSION_PORT: u16 = 587;
/// Default submission over TLS port
///
/// Defined in [RFC8314](https://tools.ietf.org/html/rfc8314)
pub const SUBMISSIONS_PORT: u16 = 465;

/// Default timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How to encrypt the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Encryption {
    /// Plaintext connection, for trusted local relays
    #[default]
    Unencrypted,
    /// Plaintext connection upgraded with `STARTTLS` before authenticating
    ///
    /// The cycle fails if the server does not advertise `STARTTLS`.
    StartTls,
    /// TLS from the first byte
    Ssl,
}

/// Settings of one relay, read-only while a cycle runs
#[derive(Clone, Debug)]
pub(crate) struct SmtpInfo {
    /// Name sent during EHLO
    pub(crate) hello_name: ClientId,
    /// Server we are connecting to
    pub(crate) server: String,
    /// Port to connect to
    pub(crate) port: u16,
    pub(crate) encryption: Encryption,
    /// Certificates validation, defaults to the Mozilla roots for `server`
    pub(crate) tls_parameters: Option<TlsParameters>,
    pub(crate) authentication: Mechanism,
    pub(crate) credentials: Option<Credentials>,
    /// Bounds every connect, write and read
    pub(crate) timeout: Duration,
}

impl SmtpInfo {
    pub(crate) fn new(server: String) -> Self {
        Self {
            server,
            port: SMTP_PORT,
            hello_name: ClientId::default(),
            credentials: None,
            authentication: Mechanism::NoAuth,
            timeout: DEFAULT_TIMEOUT,
            encryption: Encryption::Unencrypted,
            tls_parameters: None,
        }
    }

    /// TLS parameters to use, when the connection gets encrypted at all
    pub(crate) fn resolve_tls_parameters(&self) -> Result<Option<TlsParameters>, Error> {
        match (self.encryption, &self.tls_parameters) {
            (Encryption::Unencrypted, _) => Ok(None),
            (_, Some(tls_parameters)) => Ok(Some(tls_parameters.clone())),
            (_, None) => TlsParameters::new(self.server.clone()).map(Some),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Encryption, SmtpInfo, SMTP_PORT};

    #[test]
    fn defaults() {
        let info = SmtpInfo::new("localhost".to_owned());
        assert_eq!(info.port, SMTP_PORT);
        assert_eq!(info.timeout.as_millis(), 30_000);
        assert_eq!(info.encryption, Encryption::Unencrypted);
        assert!(info.credentials.is_none());
        assert!(info.resolve_tls_parameters().unwrap().is_none());
    }

    #[test]
    fn tls_parameters_default_to_server_name() {
        let mut info = SmtpInfo::new("smtp.example.com".to_owned());
        info.encryption = Encryption::StartTls;
        let params = info.resolve_tls_parameters().unwrap().unwrap();
        assert_eq!(params.domain(), "smtp.example.com");
    }
}
