//! Scenario orchestration.
//!
//! A [`Scenario`] owns one primary connection, optionally one secondary
//! connection, and the harness-side expectations of the session
//! ([`SessionFixture`]). Every step is build → send → receive → match, and
//! the received response is returned so the scenario can branch on it.
//!
//! [`Scenario::run`] guarantees teardown: both connections are purged and
//! closed after the body finishes, whether it succeeded, failed or panicked.

use crate::config::{Capability, HarnessConfig};
use crate::connection::PushConnection;
use crate::error::{HarnessError, MismatchReport, Result};
use crate::matcher::{matches, ExpectedPattern};
use crate::race;
use crate::trigger::TriggerClient;
use futures_util::FutureExt;
use serde_json::Value;
use simplepush_protocol::message::KEY_CHANNEL_ID;
use simplepush_protocol::{MessageType, ProtocolMessage, Response, Status, UpdateRecord};
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, warn};

pub type ScenarioFuture<'s> = Pin<Box<dyn Future<Output = Result<()>> + 's>>;

/// Progress of the primary session, as far as the server has confirmed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioState {
    NotConnected,
    Connected,
    Handshaken,
    Registered,
    Acknowledging,
    Unregistering,
    Purged,
    Closed,
}

impl ScenarioState {
    /// The state after the server answered `message_type`.
    ///
    /// Rejected commands leave the state unchanged. `purge` is best-effort
    /// and always lands in [`Purged`](Self::Purged).
    #[must_use]
    pub fn after(self, message_type: MessageType, success: bool) -> Self {
        if matches!(self, Self::NotConnected | Self::Closed) {
            return self;
        }
        if message_type == MessageType::Purge {
            return Self::Purged;
        }
        if !success {
            return self;
        }
        match message_type {
            MessageType::Hello => Self::Handshaken,
            MessageType::Register => Self::Registered,
            MessageType::Unregister => Self::Unregistering,
            MessageType::Ack => Self::Acknowledging,
            MessageType::Ping | MessageType::Notification | MessageType::Purge => self,
        }
    }
}

/// The harness's copy of what the server should believe about the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFixture {
    pub uaid: Option<String>,
    /// Registered channel → push endpoint.
    pub channels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Primary,
    Secondary,
}

pub struct Scenario {
    name: String,
    config: HarnessConfig,
    primary: PushConnection,
    secondary: Option<PushConnection>,
    state: ScenarioState,
    session: SessionFixture,
    trigger: TriggerClient,
}

impl Scenario {
    /// Opens the primary connection for a scenario called `name`.
    pub async fn open(name: &str, config: &HarnessConfig) -> Result<Self> {
        config.validate()?;
        let primary =
            PushConnection::open_with_timeout(&config.server_url, config.connect_timeout).await?;
        let trigger = TriggerClient::new(config.trigger_timeout)?;
        debug!(scenario = name, url = %config.server_url, "scenario opened");
        Ok(Self {
            name: name.to_owned(),
            config: config.clone(),
            primary,
            secondary: None,
            state: ScenarioState::Connected,
            session: SessionFixture::default(),
            trigger,
        })
    }

    /// Runs `body` against a freshly opened scenario, then tears it down.
    ///
    /// Teardown runs even if `body` fails or panics; the body's error or
    /// panic is what the caller sees.
    pub async fn run<F>(name: &str, config: &HarnessConfig, body: F) -> Result<()>
    where
        F: for<'s> FnOnce(&'s mut Scenario) -> ScenarioFuture<'s>,
    {
        let mut scenario = Self::open(name, config).await?;
        info!(scenario = name, "scenario started");

        let outcome = AssertUnwindSafe(body(&mut scenario)).catch_unwind().await;
        scenario.teardown().await;

        match outcome {
            Ok(Ok(())) => {
                info!(scenario = name, "scenario passed");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(scenario = name, error = %e, "scenario failed");
                Err(e)
            }
            Err(panic) => {
                warn!(scenario = name, "scenario panicked");
                std::panic::resume_unwind(panic)
            }
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> ScenarioState {
        self.state
    }

    #[must_use]
    pub fn session(&self) -> &SessionFixture {
        &self.session
    }

    #[must_use]
    pub fn supports(&self, capability: Capability) -> bool {
        self.config.supports(capability)
    }

    /// Opens a secondary connection, purging and closing any previous one.
    pub async fn open_secondary(&mut self) -> Result<()> {
        if let Some(mut old) = self.secondary.take() {
            self.release(&mut old, "secondary").await;
        }
        let conn =
            PushConnection::open_with_timeout(&self.config.server_url, self.config.connect_timeout)
                .await?;
        self.secondary = Some(conn);
        Ok(())
    }

    /// Purges and closes the secondary connection, if open.
    pub async fn close_secondary(&mut self) {
        if let Some(mut conn) = self.secondary.take() {
            self.release(&mut conn, "secondary").await;
        }
    }

    fn conn(&mut self, target: Target) -> Result<&mut PushConnection> {
        match target {
            Target::Primary => Ok(&mut self.primary),
            Target::Secondary => self
                .secondary
                .as_mut()
                .ok_or_else(|| HarnessError::Assertion("no secondary connection open".into())),
        }
    }

    /// Sends `message` on `target` and returns the reply without checking it.
    pub async fn request_on(&mut self, target: Target, message: &ProtocolMessage) -> Result<Value> {
        let timeout = self.config.receive_timeout;
        let response = self.conn(target)?.request(message, timeout).await?;
        if target == Target::Primary {
            self.record(message, &response);
        }
        Ok(response)
    }

    pub async fn request(&mut self, message: &ProtocolMessage) -> Result<Value> {
        self.request_on(Target::Primary, message).await
    }

    /// Sends `message` on `target`, receives the reply and matches it
    /// against `expected`.
    pub async fn exchange_on(
        &mut self,
        target: Target,
        message: &ProtocolMessage,
        expected: &ExpectedPattern,
    ) -> Result<Value> {
        let response = self.request_on(target, message).await?;
        self.check(Some(&message.to_json()), &response, expected)?;
        Ok(response)
    }

    pub async fn exchange(
        &mut self,
        message: &ProtocolMessage,
        expected: &ExpectedPattern,
    ) -> Result<Value> {
        self.exchange_on(Target::Primary, message, expected).await
    }

    /// Matches `response` against `expected`, attaching full context on
    /// failure.
    pub fn check(
        &self,
        sent: Option<&Value>,
        response: &Value,
        expected: &ExpectedPattern,
    ) -> Result<()> {
        matches(response, expected).map_err(|failure| {
            HarnessError::Mismatch(Box::new(MismatchReport {
                scenario: self.name.clone(),
                sent: sent.cloned(),
                received: response.clone(),
                expected: expected.clone(),
                failure,
            }))
        })
    }

    /// Skips the check when the server reported an `error`; otherwise
    /// `expected` must match. Returns whether the check ran.
    ///
    /// Used for fuzzed inputs where the exact rejection is server-specific.
    pub fn expect_error_or(
        &self,
        sent: &ProtocolMessage,
        response: &Value,
        expected: &ExpectedPattern,
    ) -> Result<bool> {
        if Response::new(response).has_error() {
            debug!(scenario = %self.name, %response, "server rejected fuzzed input");
            return Ok(false);
        }
        self.check(Some(&sent.to_json()), response, expected)?;
        Ok(true)
    }

    pub async fn hello(&mut self, uaid: &str, channel_ids: &[&str]) -> Result<Value> {
        self.request(&ProtocolMessage::hello(uaid, channel_ids)).await
    }

    /// Handshakes and requires success; returns the server-assigned `uaid`.
    pub async fn handshake(&mut self, uaid: &str, channel_ids: &[&str]) -> Result<String> {
        let message = ProtocolMessage::hello(uaid, channel_ids);
        let expected = ExpectedPattern::new()
            .message_type(MessageType::Hello)
            .status(Status::Ok);
        let response = self.exchange(&message, &expected).await?;
        match Response::new(&response).uaid() {
            Some(assigned) if !assigned.is_empty() => Ok(assigned.to_owned()),
            _ => Err(HarnessError::Assertion(format!(
                "hello succeeded without a uaid: {response}"
            ))),
        }
    }

    pub async fn register(&mut self, channel_id: &str) -> Result<Value> {
        self.request(&ProtocolMessage::register(channel_id)).await
    }

    /// Registers and requires success; returns the push endpoint.
    pub async fn register_channel(&mut self, channel_id: &str) -> Result<String> {
        let message = ProtocolMessage::register(channel_id);
        let expected = ExpectedPattern::new()
            .message_type(MessageType::Register)
            .status(Status::Ok);
        let response = self.exchange(&message, &expected).await?;
        match Response::new(&response).push_endpoint() {
            Some(endpoint) if !endpoint.is_empty() => Ok(endpoint.to_owned()),
            _ => Err(HarnessError::Assertion(format!(
                "register {channel_id:?} succeeded without a pushEndpoint: {response}"
            ))),
        }
    }

    pub async fn unregister(&mut self, channel_id: &str) -> Result<Value> {
        self.request(&ProtocolMessage::unregister(channel_id)).await
    }

    pub async fn ack(&mut self, updates: &[UpdateRecord]) -> Result<Value> {
        self.request(&ProtocolMessage::ack(updates)).await
    }

    pub async fn ping(&mut self) -> Result<Value> {
        self.request(&ProtocolMessage::ping()).await
    }

    /// Requires a keep-alive reply: either `{}` or a 200 `ping`.
    pub fn expect_keepalive(&self, sent: &ProtocolMessage, response: &Value) -> Result<()> {
        if Response::new(response).is_empty_object() {
            return Ok(());
        }
        let expected = ExpectedPattern::new()
            .message_type(MessageType::Ping)
            .status(Status::Ok);
        self.check(Some(&sent.to_json()), response, &expected)
    }

    /// Best-effort purge of the primary session; the reply is not checked.
    pub async fn purge(&mut self) -> Result<()> {
        let timeout = self.config.receive_timeout;
        purge_connection(&mut self.primary, timeout).await?;
        self.state = self.state.after(MessageType::Purge, true);
        self.session = SessionFixture::default();
        Ok(())
    }

    pub async fn purge_on(&mut self, target: Target) -> Result<()> {
        if target == Target::Primary {
            return self.purge().await;
        }
        let timeout = self.config.receive_timeout;
        purge_connection(self.conn(target)?, timeout).await
    }

    pub async fn send_raw_on(&mut self, target: Target, payload: &str) -> Result<()> {
        self.conn(target)?.send_raw(payload).await
    }

    pub async fn send_raw(&mut self, payload: &str) -> Result<()> {
        self.send_raw_on(Target::Primary, payload).await
    }

    pub async fn receive_on(&mut self, target: Target) -> Result<Value> {
        let timeout = self.config.receive_timeout;
        self.conn(target)?.receive(timeout).await
    }

    pub async fn receive(&mut self) -> Result<Value> {
        self.receive_on(Target::Primary).await
    }

    /// Receives the next message and requires it to be a notification for
    /// `channel_id`. Returns the matching update record.
    pub async fn receive_notification(&mut self, channel_id: &str) -> Result<UpdateRecord> {
        let message = self.receive().await?;
        let expected = ExpectedPattern::new().message_type(MessageType::Notification);
        self.check(None, &message, &expected)?;
        Response::new(&message)
            .updates()
            .into_iter()
            .find(|u| u.channel_id == channel_id)
            .ok_or_else(|| {
                HarnessError::Assertion(format!(
                    "notification carries no update for {channel_id:?}: {message}"
                ))
            })
    }

    /// Publishes to `endpoint` via the trigger client; returns the version.
    pub async fn trigger(&self, endpoint: &str) -> Result<u64> {
        Ok(self.trigger.fire(endpoint).await?)
    }

    /// Nothing may arrive on `target` within the configured race window.
    pub async fn expect_no_message_on(&mut self, target: Target) -> Result<()> {
        let window = self.config.race_window;
        race::expect_no_message_within(self.conn(target)?, window).await
    }

    pub async fn expect_no_message(&mut self) -> Result<()> {
        self.expect_no_message_on(Target::Primary).await
    }

    /// Exactly one message may arrive on the primary within the race window.
    pub async fn expect_exactly_one(&mut self) -> Result<Value> {
        let window = self.config.race_window;
        race::expect_exactly_one_within(&mut self.primary, window).await
    }

    /// Purges and closes every open connection. Failures are logged, never
    /// raised.
    pub async fn teardown(&mut self) {
        if let Some(mut conn) = self.secondary.take() {
            self.release(&mut conn, "secondary").await;
        }
        let timeout = self.config.receive_timeout;
        if !self.primary.is_closed() {
            if let Err(e) = purge_connection(&mut self.primary, timeout).await {
                debug!(scenario = %self.name, error = %e, "primary purge failed");
            }
        }
        if let Err(e) = self.primary.close().await {
            warn!(scenario = %self.name, error = %e, "primary close failed");
        }
        self.session = SessionFixture::default();
        self.state = ScenarioState::Closed;
    }

    async fn release(&self, conn: &mut PushConnection, role: &str) {
        if !conn.is_closed() {
            if let Err(e) = purge_connection(conn, self.config.receive_timeout).await {
                debug!(scenario = %self.name, role, error = %e, "purge failed");
            }
        }
        if let Err(e) = conn.close().await {
            warn!(scenario = %self.name, role, error = %e, "close failed");
        }
    }

    fn record(&mut self, message: &ProtocolMessage, response: &Value) {
        let Some(message_type) = message.message_type().and_then(MessageType::parse) else {
            return;
        };
        let reply = Response::new(response);
        let success = reply.status() == Some(Status::Ok);
        self.state = self.state.after(message_type, success);
        if !success {
            return;
        }
        match message_type {
            MessageType::Hello => {
                self.session.uaid = reply.uaid().map(str::to_owned);
            }
            MessageType::Register => {
                if let (Some(channel), Some(endpoint)) = (
                    message.get(KEY_CHANNEL_ID).and_then(Value::as_str),
                    reply.push_endpoint(),
                ) {
                    self.session
                        .channels
                        .insert(channel.to_owned(), endpoint.to_owned());
                }
            }
            MessageType::Unregister => {
                if let Some(channel) = message.get(KEY_CHANNEL_ID).and_then(Value::as_str) {
                    self.session.channels.remove(channel);
                }
            }
            MessageType::Purge => self.session = SessionFixture::default(),
            MessageType::Ack | MessageType::Ping | MessageType::Notification => {}
        }
    }
}

/// Sends `purge` and drains one reply. A missing reply is not an error.
async fn purge_connection(conn: &mut PushConnection, timeout: Duration) -> Result<()> {
    conn.send(&ProtocolMessage::purge()).await?;
    match conn.receive(timeout).await {
        Ok(_) | Err(HarnessError::TimeoutExpired(_) | HarnessError::Decode { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}
