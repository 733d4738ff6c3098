//! Messages waiting in the queue and their wire format
//!
//! ## Usage
//!
//! ```rust
//! use smtp_queue::message::Message;
//!
//! let m = Message::builder()
//!     .to("hei@domain.tld")
//!     .cc("yuin@domain.tld")
//!     .sender("nobody@domain.tld")
//!     .subject("Happy new year")
//!     .body("Be happy!")
//!     .build();
//!
//! assert_eq!(
//!     m.envelope_recipients().collect::<Vec<_>>(),
//!     ["hei@domain.tld", "yuin@domain.tld"]
//! );
//! ```
//!
//! Which is sent after `DATA` as:
//!
//! ```sh
//! To: hei@domain.tld
//! Cc: yuin@domain.tld
//! From: nobody@domain.tld
//! Subject: Happy new year
//!
//! Be happy!
//! .
//! ```
//!
//! Messages with attachments become `multipart/mixed`, see [`serializer`].

use std::path::{Path, PathBuf};

pub use self::{
    mimetype::{GuessMimeLookup, MimeLookup},
    serializer::{formatted, AttachmentPolicy},
};
use crate::transport::smtp::error::{self, Error};

mod codec;
mod mimetype;
pub mod serializer;

/// An email, immutable once built
///
/// Addresses are kept as given: in insertion order, without deduplication.
/// A message without any recipient, or failing [`Message::validate`], can be
/// built and queued. The session refuses it when its turn comes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Message {
    to: Vec<String>,
    cc: Vec<String>,
    bcc: Vec<String>,
    sender: String,
    subject: String,
    body: String,
    attachments: Vec<PathBuf>,
}

impl Message {
    /// Creates a new message builder without headers
    pub fn builder() -> MessageBuilder {
        MessageBuilder::new()
    }

    /// Creates a plain message to a single recipient
    pub fn new<T, S, U, B>(to: T, sender: S, subject: U, body: B) -> Message
    where
        T: Into<String>,
        S: Into<String>,
        U: Into<String>,
        B: Into<String>,
    {
        Message::builder()
            .to(to)
            .sender(sender)
            .subject(subject)
            .body(body)
            .build()
    }

    /// Addresses of the `To:` header
    pub fn to(&self) -> &[String] {
        &self.to
    }

    /// Addresses of the `Cc:` header
    pub fn cc(&self) -> &[String] {
        &self.cc
    }

    /// Addresses of the `Bcc:` header
    pub fn bcc(&self) -> &[String] {
        &self.bcc
    }

    /// Reverse-path, used for `MAIL FROM` and the `From:` header
    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Files attached to the message, in order
    pub fn attachments(&self) -> &[PathBuf] {
        &self.attachments
    }

    /// Every `RCPT TO` address: To, then Cc, then Bcc
    pub fn envelope_recipients(&self) -> impl Iterator<Item = &str> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(String::as_str)
    }

    /// Tells if at least one recipient is set
    pub fn has_recipients(&self) -> bool {
        !(self.to.is_empty() && self.cc.is_empty() && self.bcc.is_empty())
    }

    /// Checks the fields written as-is into commands and headers
    ///
    /// Addresses must not contain line breaks or angle brackets, the subject
    /// must not contain line breaks.
    pub fn validate(&self) -> Result<(), Error> {
        let addresses = self
            .envelope_recipients()
            .chain(std::iter::once(self.sender.as_str()));
        for address in addresses {
            if address.contains(['\r', '\n', '<', '>']) {
                return Err(error::client(format!("Invalid address {address:?}")));
            }
        }
        if self.subject.contains(['\r', '\n']) {
            return Err(error::client("Line break in subject"));
        }
        Ok(())
    }
}

/// A builder for messages
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    /// Creates a new default message builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `To:` recipient
    pub fn to<S: Into<String>>(mut self, address: S) -> Self {
        self.message.to.push(address.into());
        self
    }

    /// Add a `Cc:` recipient
    pub fn cc<S: Into<String>>(mut self, address: S) -> Self {
        self.message.cc.push(address.into());
        self
    }

    /// Add a `Bcc:` recipient
    ///
    /// Bcc addresses are written to the message headers as well.
    pub fn bcc<S: Into<String>>(mut self, address: S) -> Self {
        self.message.bcc.push(address.into());
        self
    }

    /// Set the sender address
    pub fn sender<S: Into<String>>(mut self, address: S) -> Self {
        self.message.sender = address.into();
        self
    }

    pub fn subject<S: Into<String>>(mut self, subject: S) -> Self {
        self.message.subject = subject.into();
        self
    }

    pub fn body<S: Into<String>>(mut self, body: S) -> Self {
        self.message.body = body.into();
        self
    }

    /// Attach a file, read when the message is sent
    pub fn attachment<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.message.attachments.push(path.as_ref().to_path_buf());
        self
    }

    /// Create a message
    pub fn build(self) -> Message {
        self.message
    }
}
