//! SMTP commands

use std::fmt::{self, Display, Formatter};

use crate::transport::smtp::{authentication::Mechanism, extension::ClientId};

/// EHLO command
#[derive(PartialEq, Eq, Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Ehlo {
    client_id: ClientId,
}

impl Display for Ehlo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "EHLO {}\r\n", self.client_id)
    }
}

impl Ehlo {
    /// Creates a EHLO command
    pub fn new(client_id: ClientId) -> Ehlo {
        Ehlo { client_id }
    }
}

/// STARTTLS command
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Starttls;

impl Display for Starttls {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("STARTTLS\r\n")
    }
}

/// MAIL command
#[derive(PartialEq, Eq, Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Mail {
    sender: String,
}

impl Display for Mail {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "MAIL FROM:<{}>\r\n", self.sender)
    }
}

impl Mail {
    /// Creates a MAIL command
    pub fn new<S: Into<String>>(sender: S) -> Mail {
        Mail {
            sender: sender.into(),
        }
    }
}

/// RCPT command
#[derive(PartialEq, Eq, Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rcpt {
    recipient: String,
}

impl Display for Rcpt {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "RCPT TO:<{}>\r\n", self.recipient)
    }
}

impl Rcpt {
    /// Creates an RCPT command
    pub fn new<S: Into<String>>(recipient: S) -> Rcpt {
        Rcpt {
            recipient: recipient.into(),
        }
    }
}

/// DATA command
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Data;

impl Display for Data {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("DATA\r\n")
    }
}

/// QUIT command
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Quit;

impl Display for Quit {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("QUIT\r\n")
    }
}

/// RSET command
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rset;

impl Display for Rset {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("RSET\r\n")
    }
}

/// AUTH command, opening a challenge/response exchange
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Auth {
    mechanism: Mechanism,
}

impl Display for Auth {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "AUTH {}\r\n", self.mechanism)
    }
}

impl Auth {
    /// Creates an AUTH command
    pub fn new(mechanism: Mechanism) -> Auth {
        Auth { mechanism }
    }
}

/// A base64 answer to an AUTH challenge
#[derive(PartialEq, Eq, Clone)]
pub struct AuthResponse {
    encoded: String,
}

impl Display for AuthResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}\r\n", self.encoded)
    }
}

impl fmt::Debug for AuthResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthResponse").finish_non_exhaustive()
    }
}

impl AuthResponse {
    /// Wraps an already encoded response
    pub fn new(encoded: String) -> AuthResponse {
        AuthResponse { encoded }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_display() {
        let id = ClientId::Domain("localhost".to_owned());
        assert_eq!(format!("{}", Ehlo::new(id)), "EHLO localhost\r\n");
        assert_eq!(format!("{}", Starttls), "STARTTLS\r\n");
        assert_eq!(
            format!("{}", Mail::new("test@example.com")),
            "MAIL FROM:<test@example.com>\r\n"
        );
        assert_eq!(format!("{}", Mail::new("")), "MAIL FROM:<>\r\n");
        assert_eq!(
            format!("{}", Rcpt::new("test@example.com")),
            "RCPT TO:<test@example.com>\r\n"
        );
        assert_eq!(format!("{}", Quit), "QUIT\r\n");
        assert_eq!(format!("{}", Data), "DATA\r\n");
        assert_eq!(format!("{}", Rset), "RSET\r\n");
        assert_eq!(format!("{}", Auth::new(Mechanism::Login)), "AUTH LOGIN\r\n");
        assert_eq!(
            format!("{}", AuthResponse::new("YWxpY2U=".to_owned())),
            "YWxpY2U=\r\n"
        );
    }

    #[test]
    fn test_auth_response_debug_is_opaque() {
        let response = AuthResponse::new("d29uZGVybGFuZA==".to_owned());
        assert!(!format!("{response:?}").contains("d29u"));
    }
}
