//! Provides the LOGIN SASL authentication mechanism

use std::fmt::{self, Debug, Display, Formatter};

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::transport::smtp::error::{self, Error};

/// Contains user credentials
#[derive(PartialEq, Eq, Clone, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Credentials {
    authentication_identity: String,
    secret: String,
}

impl Credentials {
    /// Create a `Credentials` struct from username and password
    pub fn new(username: String, password: String) -> Credentials {
        Credentials {
            authentication_identity: username,
            secret: password,
        }
    }
}

impl<S, T> From<(S, T)> for Credentials
where
    S: Into<String>,
    T: Into<String>,
{
    fn from((username, password): (S, T)) -> Self {
        Credentials::new(username.into(), password.into())
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").finish()
    }
}

/// Authentication used after EHLO
#[derive(PartialEq, Eq, Copy, Clone, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mechanism {
    /// Skip authentication
    #[default]
    NoAuth,
    /// LOGIN authentication mechanism
    /// Obsolete but needed for some providers (like office365)
    ///
    /// Defined in [draft-murchison-sasl-login-00](https://www.ietf.org/archive/id/draft-murchison-sasl-login-00.txt).
    Login,
}

impl Display for Mechanism {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Mechanism::NoAuth => "NONE",
            Mechanism::Login => "LOGIN",
        })
    }
}

/// Position in the LOGIN exchange, named after what was last sent
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum LoginStep {
    /// `AUTH LOGIN` sent, waiting for the username challenge
    AuthLoginSent,
    /// Username sent, waiting for the password challenge
    UsernameSent,
    /// Password sent, waiting for the final verdict
    PasswordSent,
}

impl Credentials {
    /// Answers a LOGIN challenge
    ///
    /// The decoded challenge picks the field; servers sending something
    /// unrecognizable get the field matching `step`.
    pub(crate) fn login_response(
        &self,
        step: LoginStep,
        encoded_challenge: Option<&str>,
    ) -> Result<String, Error> {
        if step == LoginStep::PasswordSent {
            return Err(error::client("Unexpected LOGIN challenge after password"));
        }

        let decoded_challenge = encoded_challenge
            .and_then(|challenge| STANDARD.decode(challenge).ok())
            .and_then(|challenge| String::from_utf8(challenge).ok());

        let field = match decoded_challenge.as_deref() {
            Some("User Name" | "Username:" | "Username") => &self.authentication_identity,
            Some("Password" | "Password:") => &self.secret,
            _ => match step {
                LoginStep::AuthLoginSent => &self.authentication_identity,
                LoginStep::UsernameSent | LoginStep::PasswordSent => &self.secret,
            },
        };

        Ok(STANDARD.encode(field.as_bytes()))
    }
}
