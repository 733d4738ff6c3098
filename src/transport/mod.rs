//! ### Sending messages
//!
//! Messages leave through the [`smtp`] transport, which talks to a single
//! relay server. The queue in front of it lives in [`Mailer`](crate::Mailer).

pub mod smtp;
