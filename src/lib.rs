//! smtp-queue is a queued SMTP client. Messages are appended to an in-memory
//! queue, then a sending cycle hands all of them over to one relay, through a
//! single connection.
//!
//! A cycle greets the server, optionally upgrades the connection with
//! `STARTTLS` and authenticates with `AUTH LOGIN`, then transmits every
//! queued message in order, resetting the transaction between two messages.
//! Failures are counted per message: temporary (`4yz`) and permanent (`5yz`)
//! ones never stop the cycle, connection level failures do.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use smtp_queue::{
//!     transport::smtp::authentication::Credentials, Event, Mailer, Message,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mailer = Mailer::starttls_relay("smtp.example.com")?
//!     .credentials(Credentials::new("user".to_owned(), "hunter2".to_owned()))
//!     .build();
//!
//! let message = Message::builder()
//!     .to("bob@example.org")
//!     .cc("carol@example.org")
//!     .sender("alice@example.com")
//!     .subject("Quarterly report")
//!     .body("See attached.")
//!     .attachment("report.pdf")
//!     .build();
//! mailer.enqueue(message);
//!
//! let mut events = mailer.subscribe();
//! if mailer.send_all().await {
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             Event::Progress { processed } => println!("{processed} processed"),
//!             Event::Error { text, .. } => eprintln!("cycle failed: {text}"),
//!             Event::Finished { .. } => break,
//!         }
//!     }
//! }
//!
//! let (temporary, permanent) = mailer.last_errors();
//! println!("{temporary} temporary and {permanent} permanent failures");
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! * **hostname** (default): use the local hostname in `EHLO`
//! * **tracing** (default): log the session with [tracing]
//! * **serde**: serialization of messages, events and settings
//!
//! [tracing]: https://docs.rs/tracing

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

mod mailer;
pub mod message;
mod queue;
pub mod transport;

pub use crate::{
    mailer::{Mailer, MailerBuilder},
    message::{Message, MessageBuilder},
    queue::Event,
    transport::smtp::Error,
};

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;
