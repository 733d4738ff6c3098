//! The protocol state of one sending cycle
//!
//! [`Session::on_response`] is the only place where the state changes on a
//! server reply. It returns the [`Action`] the driver in [`Session::run`]
//! has to perform next, so the transitions can be exercised without any
//! socket.

use std::{fmt, mem, sync::Arc};

use super::{
    authentication::{LoginStep, Mechanism},
    client::{SmtpConnection, TlsParameters},
    commands::{Auth, AuthResponse, Data, Ehlo, Mail, Quit, Rcpt, Rset, Starttls},
    error::{self, Error},
    extension::{Extension, ServerInfo},
    response::{Response, Severity},
    Encryption,
};
use crate::{
    mailer::MailerConfig,
    message::{self, Message},
    queue::{Failure, QueueManager},
};

/// The message being transmitted
pub(crate) struct InFlight {
    message: Message,
    /// Envelope recipients, in `RCPT TO` order
    recipients: Vec<String>,
    /// Recipient whose `RCPT TO` reply is awaited
    current: usize,
    accepted: usize,
    permanently_rejected: bool,
    /// Serialized message, taken when the server asks for it
    payload: Option<Vec<u8>>,
}

impl InFlight {
    fn new(message: Message, payload: Vec<u8>) -> Self {
        let recipients = message
            .envelope_recipients()
            .map(ToOwned::to_owned)
            .collect();
        InFlight {
            message,
            recipients,
            current: 0,
            accepted: 0,
            permanently_rejected: false,
            payload: Some(payload),
        }
    }

    fn rcpt(&self) -> Vec<u8> {
        Rcpt::new(self.recipients[self.current].as_str())
            .to_string()
            .into_bytes()
    }
}

impl fmt::Debug for InFlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlight")
            .field("recipients", &self.recipients.len())
            .field("current", &self.current)
            .field("accepted", &self.accepted)
            .finish_non_exhaustive()
    }
}

/// Where the session stands, named after the last command sent
#[derive(Debug)]
pub(crate) enum SessionState {
    Disconnected,
    /// Waiting for the greeting
    Connected,
    /// `EHLO` sent
    GreetingSent,
    /// `STARTTLS` sent, then handshaking
    TlsNegotiating,
    AuthInProgress(LoginStep),
    /// `MAIL FROM` sent
    SenderSet(InFlight),
    /// A `RCPT TO` sent
    RecipientsSet(InFlight),
    /// `DATA` sent
    DataHeaderSent(InFlight),
    /// Payload about to be written or written
    BodySent(InFlight),
    /// `RSET` sent
    Resetting,
    /// `QUIT` sent
    Quitting,
}

impl SessionState {
    fn take_in_flight(self) -> Option<InFlight> {
        match self {
            SessionState::SenderSet(in_flight)
            | SessionState::RecipientsSet(in_flight)
            | SessionState::DataHeaderSent(in_flight)
            | SessionState::BodySent(in_flight) => Some(in_flight),
            _ => None,
        }
    }
}

/// What the driver does next
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Action {
    /// Write these bytes, then wait for a reply
    Send(Vec<u8>),
    /// Run the TLS handshake, then report back with [`Session::on_tls_established`]
    StartTls,
    /// Close the connection, the cycle is over
    Close,
}

fn command<C: fmt::Display>(command: C) -> Action {
    Action::Send(command.to_string().into_bytes())
}

fn failure_of(response: &Response) -> Option<Failure> {
    match response.severity() {
        Severity::TransientNegativeCompletion => Some(Failure::Temporary),
        Severity::PermanentNegativeCompletion => Some(Failure::Permanent),
        _ => None,
    }
}

fn unexpected(response: &Response) -> Error {
    if response.is_positive() {
        error::response(format!(
            "Unexpected reply: {} {}",
            response.code(),
            response.text()
        ))
    } else {
        error::code(response.code(), Some(response.text()))
    }
}

pub(crate) struct Session {
    state: SessionState,
    config: Arc<MailerConfig>,
    queue: Arc<QueueManager>,
    tls_parameters: Option<TlsParameters>,
    encrypted: bool,
    server_info: Option<ServerInfo>,
}

impl Session {
    /// A session over a freshly opened connection, waiting for the greeting
    pub(crate) fn new(
        config: Arc<MailerConfig>,
        queue: Arc<QueueManager>,
        tls_parameters: Option<TlsParameters>,
        encrypted: bool,
    ) -> Self {
        Session {
            state: SessionState::Connected,
            config,
            queue,
            tls_parameters,
            encrypted,
            server_info: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &SessionState {
        &self.state
    }

    /// Feeds the reply to the last command
    pub(crate) fn on_response(&mut self, response: &Response) -> Action {
        let state = mem::replace(&mut self.state, SessionState::Disconnected);
        #[cfg(feature = "tracing")]
        tracing::debug!("{:?} got {}", state, response.code());

        let positive = response.severity() == Severity::PositiveCompletion;
        match state {
            SessionState::Connected if positive => self.ehlo(),
            SessionState::GreetingSent if positive => self.after_ehlo(response),
            SessionState::TlsNegotiating if positive => {
                self.state = SessionState::TlsNegotiating;
                Action::StartTls
            }
            SessionState::AuthInProgress(step) => self.login(step, response),
            SessionState::SenderSet(in_flight) if positive => {
                let action = Action::Send(in_flight.rcpt());
                self.state = SessionState::RecipientsSet(in_flight);
                action
            }
            SessionState::RecipientsSet(in_flight) => self.after_rcpt(in_flight, response),
            SessionState::DataHeaderSent(mut in_flight)
                if response.severity() == Severity::PositiveIntermediate =>
            {
                let payload = in_flight.payload.take().unwrap_or_default();
                self.state = SessionState::BodySent(in_flight);
                Action::Send(payload)
            }
            SessionState::BodySent(_) if positive => {
                self.queue.record_success();
                self.after_message()
            }
            SessionState::Resetting if positive => self.next_message(),
            SessionState::Quitting | SessionState::Disconnected => Action::Close,
            state => match (state.take_in_flight(), failure_of(response)) {
                (Some(in_flight), Some(failure)) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        "message to {:?} failed: {} {}",
                        in_flight.recipients,
                        response.code(),
                        response.text()
                    );
                    #[cfg(not(feature = "tracing"))]
                    let _ = in_flight;
                    self.queue.record_failure(failure);
                    self.after_message()
                }
                (in_flight, _) => self.abort(unexpected(response), in_flight),
            },
        }
    }

    /// The handshake requested with [`Action::StartTls`] succeeded
    pub(crate) fn on_tls_established(&mut self) -> Action {
        self.encrypted = true;
        self.ehlo()
    }

    /// Stops the cycle at the next step
    ///
    /// `pending` is the action the last reply produced, it is dropped unless
    /// the session was already quitting.
    pub(crate) fn cancel(&mut self, pending: Action) -> Action {
        let state = mem::replace(&mut self.state, SessionState::Disconnected);
        #[cfg(feature = "tracing")]
        tracing::debug!("sending cancelled in {:?}", state);

        match state {
            SessionState::Quitting => {
                self.state = SessionState::Quitting;
                pending
            }
            // the server expects message data or a handshake, QUIT would be misread
            SessionState::BodySent(in_flight) => {
                self.queue.requeue(in_flight.message);
                Action::Close
            }
            SessionState::TlsNegotiating | SessionState::Disconnected => Action::Close,
            state => {
                if let Some(in_flight) = state.take_in_flight() {
                    self.queue.requeue(in_flight.message);
                }
                self.quit()
            }
        }
    }

    /// The connection broke, the current message counts as a temporary failure
    pub(crate) fn connection_lost(&mut self, err: Error) {
        let state = mem::replace(&mut self.state, SessionState::Disconnected);
        match state {
            SessionState::Quitting | SessionState::Disconnected => {
                #[cfg(feature = "tracing")]
                tracing::debug!("connection lost while quitting: {}", err);
            }
            state => {
                self.queue.report_error(&err);
                if state.take_in_flight().is_some() {
                    self.queue.record_failure(Failure::Temporary);
                }
            }
        }
    }

    fn ehlo(&mut self) -> Action {
        self.state = SessionState::GreetingSent;
        command(Ehlo::new(self.config.info.hello_name.clone()))
    }

    fn after_ehlo(&mut self, response: &Response) -> Action {
        let server_info = match ServerInfo::from_response(response) {
            Ok(server_info) => server_info,
            Err(err) => return self.abort(err, None),
        };
        #[cfg(feature = "tracing")]
        tracing::debug!("server {}", server_info);

        let starttls = self.config.info.encryption == Encryption::StartTls && !self.encrypted;
        let supports_starttls = server_info.supports_feature(Extension::StartTls);
        self.server_info = Some(server_info);

        if starttls {
            if !supports_starttls {
                return self.abort(
                    error::connection("STARTTLS is not supported by the server"),
                    None,
                );
            }
            self.state = SessionState::TlsNegotiating;
            return command(Starttls);
        }

        match self.config.info.authentication {
            Mechanism::Login => {
                #[cfg(feature = "tracing")]
                if let Some(server_info) = &self.server_info {
                    if !server_info.supports_auth_mechanism(Mechanism::Login) {
                        tracing::warn!("server does not advertise AUTH LOGIN, trying anyway");
                    }
                }
                self.state = SessionState::AuthInProgress(LoginStep::AuthLoginSent);
                command(Auth::new(Mechanism::Login))
            }
            Mechanism::NoAuth => self.next_message(),
        }
    }

    fn login(&mut self, step: LoginStep, response: &Response) -> Action {
        match response.severity() {
            Severity::PositiveIntermediate if step == LoginStep::PasswordSent => self.abort(
                error::client("Unexpected LOGIN challenge after password"),
                None,
            ),
            Severity::PositiveIntermediate => {
                let Some(credentials) = self.config.info.credentials.as_ref() else {
                    return self.abort(error::client("Missing credentials"), None);
                };
                let answer = match credentials.login_response(step, response.first_word()) {
                    Ok(answer) => answer,
                    Err(err) => return self.abort(err, None),
                };
                self.state = SessionState::AuthInProgress(match step {
                    LoginStep::AuthLoginSent => LoginStep::UsernameSent,
                    LoginStep::UsernameSent | LoginStep::PasswordSent => LoginStep::PasswordSent,
                });
                command(AuthResponse::new(answer))
            }
            Severity::PositiveCompletion if step == LoginStep::PasswordSent => {
                #[cfg(feature = "tracing")]
                tracing::debug!("authenticated");
                self.next_message()
            }
            _ => self.abort(unexpected(response), None),
        }
    }

    fn after_rcpt(&mut self, mut in_flight: InFlight, response: &Response) -> Action {
        match response.severity() {
            Severity::PositiveCompletion => in_flight.accepted += 1,
            Severity::TransientNegativeCompletion => {}
            Severity::PermanentNegativeCompletion => in_flight.permanently_rejected = true,
            Severity::PositiveIntermediate => {
                return self.abort(unexpected(response), Some(in_flight))
            }
        }
        #[cfg(feature = "tracing")]
        if !response.is_positive() {
            tracing::warn!(
                "recipient {} rejected: {} {}",
                in_flight.recipients[in_flight.current],
                response.code(),
                response.text()
            );
        }

        in_flight.current += 1;
        if in_flight.current < in_flight.recipients.len() {
            let action = Action::Send(in_flight.rcpt());
            self.state = SessionState::RecipientsSet(in_flight);
            action
        } else if in_flight.accepted > 0 {
            self.state = SessionState::DataHeaderSent(in_flight);
            command(Data)
        } else {
            self.queue.record_failure(if in_flight.permanently_rejected {
                Failure::Permanent
            } else {
                Failure::Temporary
            });
            self.after_message()
        }
    }

    /// RSET when messages remain, QUIT otherwise
    fn after_message(&mut self) -> Action {
        if self.queue.is_empty() {
            self.quit()
        } else {
            self.state = SessionState::Resetting;
            command(Rset)
        }
    }

    /// Commits to the next sendable message
    ///
    /// Messages that cannot be sent at all are counted as permanent
    /// failures and skipped.
    fn next_message(&mut self) -> Action {
        while let Some(message) = self.queue.dequeue() {
            if !message.has_recipients() {
                #[cfg(feature = "tracing")]
                tracing::warn!("skipping message without recipients");
                self.queue.record_failure(Failure::Permanent);
                continue;
            }

            let payload = match message::formatted(
                &message,
                self.config.mime_lookup.as_ref(),
                self.config.attachment_policy,
            ) {
                Ok(payload) => payload,
                Err(err) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("skipping message: {}", err);
                    #[cfg(not(feature = "tracing"))]
                    let _ = err;
                    self.queue.record_failure(Failure::Permanent);
                    continue;
                }
            };

            let action = command(Mail::new(message.sender()));
            self.state = SessionState::SenderSet(InFlight::new(message, payload));
            return action;
        }
        self.quit()
    }

    fn quit(&mut self) -> Action {
        self.state = SessionState::Quitting;
        command(Quit)
    }

    /// Ends the cycle after a failure outside of a single message
    fn abort(&mut self, err: Error, in_flight: Option<InFlight>) -> Action {
        self.queue.report_error(&err);
        if in_flight.is_some() {
            self.queue.record_failure(Failure::Temporary);
        }
        self.quit()
    }

    /// Drives the cycle over `conn` until the session closes it
    pub(crate) async fn run(mut self, conn: SmtpConnection) {
        let mut conn = Some(conn);

        while let Some(mut connection) = conn.take() {
            let response = match connection.read_response().await {
                Ok(response) => response,
                Err(err) => {
                    self.connection_lost(err);
                    connection.close().await;
                    break;
                }
            };

            let mut action = self.on_response(&response);
            if action != Action::Close && self.queue.cancel_requested() {
                action = self.cancel(action);
            }

            if action == Action::StartTls {
                let Some(tls_parameters) = self.tls_parameters.clone() else {
                    self.connection_lost(error::tls("No TLS parameters"));
                    connection.close().await;
                    break;
                };
                let upgraded = connection
                    .upgrade_tls(self.config.connector.as_ref(), &tls_parameters)
                    .await;
                connection = match upgraded {
                    Ok(connection) => connection,
                    Err(err) => {
                        self.connection_lost(err);
                        break;
                    }
                };
                action = self.on_tls_established();
            }

            match action {
                Action::Send(bytes) => {
                    if let Err(err) = connection.write(&bytes).await {
                        self.connection_lost(err);
                        connection.close().await;
                        break;
                    }
                    conn = Some(connection);
                }
                Action::StartTls | Action::Close => {
                    self.state = SessionState::Disconnected;
                    connection.close().await;
                }
            }
        }

        self.queue.finish();
    }
}
