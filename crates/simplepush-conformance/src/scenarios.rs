//! The conformance scenarios.
//!
//! Each scenario drives one aspect of the protocol through a [`Scenario`]
//! and returns the first violation it finds. [`catalog`] lists them with the
//! manifest properties they cover; [`run_entry`] executes one with
//! guaranteed teardown.

use crate::config::{Capability, HarnessConfig};
use crate::error::{ensure, HarnessError, Result};
use crate::ids::{self, PADDED_UAID, VALID_UAID};
use crate::matcher::ExpectedPattern;
use crate::scenario::{Scenario, ScenarioFuture, ScenarioState, Target};
use serde_json::{json, Value};
use simplepush_protocol::message::KEY_UAID;
use simplepush_protocol::{
    validate_identifier, MessageType, ProtocolMessage, Response, Status, UpdateRecord,
    MAX_IDENTIFIER_LEN,
};
use tracing::debug;

pub type ScenarioFn = for<'s> fn(&'s mut Scenario) -> ScenarioFuture<'s>;

#[derive(Clone, Copy)]
pub struct ScenarioEntry {
    pub name: &'static str,
    /// Manifest statement ids this scenario covers.
    pub properties: &'static [&'static str],
    pub run: ScenarioFn,
}

impl std::fmt::Debug for ScenarioEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioEntry")
            .field("name", &self.name)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

macro_rules! entry {
    ($name:ident, [$($prop:literal),* $(,)?]) => {{
        fn run(scenario: &mut Scenario) -> ScenarioFuture<'_> {
            Box::pin($name(scenario))
        }
        ScenarioEntry {
            name: stringify!($name),
            properties: &[$($prop),*],
            run,
        }
    }};
}

#[must_use]
pub fn catalog() -> Vec<ScenarioEntry> {
    vec![
        entry!(hello_bad_types, ["SP-HELLO-TYPES", "SP-INVALID-CMD"]),
        entry!(hello_uaid_types, ["P1", "P2", "P3", "SP-PADDED-UAID"]),
        entry!(hello_invalid_keys, ["SP-INVALID-CMD"]),
        entry!(register_without_handshake, ["P5"]),
        entry!(register_duplicate, ["SP-DUP-CONFLICT", "SP-INVALID-CMD"]),
        entry!(register_plural, ["SP-REG-FUZZ"]),
        entry!(register_oversized_ids, ["P3"]),
        entry!(unregister_idempotent, ["P4", "SP-INVALID-CMD"]),
        entry!(unregister_race, ["P6"]),
        entry!(ping_keepalive, ["P7", "SP-ISOLATION"]),
        entry!(ack_unregistered, ["P8"]),
        entry!(end_to_end_notification, ["P9"]),
        entry!(session_reset, ["P1"]),
        entry!(empty_uaid_handshake, ["P2"]),
    ]
}

#[must_use]
pub fn find(name: &str) -> Option<ScenarioEntry> {
    catalog().into_iter().find(|entry| entry.name == name)
}

pub async fn run_entry(entry: &ScenarioEntry, config: &HarnessConfig) -> Result<()> {
    Scenario::run(entry.name, config, entry.run).await
}

fn hello_ok() -> ExpectedPattern {
    ExpectedPattern::new()
        .message_type(MessageType::Hello)
        .status(Status::Ok)
}

fn rejected(message_type: MessageType) -> ExpectedPattern {
    ExpectedPattern::new()
        .message_type(message_type)
        .invalid_command()
}

fn succeeded(message_type: MessageType) -> ExpectedPattern {
    ExpectedPattern::new()
        .message_type(message_type)
        .status(Status::Ok)
}

/// Every corpus value as `messageType`: only `hello` succeeds, the rest are
/// invalid commands that echo the type back. Non-string and `null` types
/// follow.
pub async fn hello_bad_types(s: &mut Scenario) -> Result<()> {
    for value in ids::type_corpus() {
        let message_type = value.to_lowercase();
        let uaid = ids::unique_id("uaid");
        let message = ProtocolMessage::with_raw_type(message_type.as_str())
            .with_uaid(uaid.as_str())
            .with_channel_ids(&[]);
        let expected = if message_type == MessageType::Hello.as_str() {
            hello_ok()
        } else {
            ExpectedPattern::new()
                .message_type_raw(message_type.as_str())
                .invalid_command()
        };
        s.exchange(&message, &expected.with(KEY_UAID, uaid))
            .await?;
    }

    let numeric = json!({ "messageType": 123 });
    s.send_raw(&numeric.to_string()).await?;
    let reply = s.receive().await?;
    s.check(
        Some(&numeric),
        &reply,
        &ExpectedPattern::new().status(Status::InvalidCommand),
    )?;

    // Any reply, or none, is acceptable; the harness only has to survive it.
    s.send_raw(r#"{"messageType": null}"#).await?;
    match s.receive().await {
        Ok(reply) => debug!(%reply, "null messageType answered"),
        Err(e) if e.is_timeout() => debug!("null messageType ignored"),
        Err(e) => return Err(e),
    }
    Ok(())
}

/// Every uaid-corpus value in a fresh `hello`, one connection per value.
pub async fn hello_uaid_types(s: &mut Scenario) -> Result<()> {
    let unknown = ids::random_string(32);
    s.open_secondary().await?;
    let reply = s
        .exchange_on(
            Target::Secondary,
            &ProtocolMessage::hello(unknown.as_str(), &["1", "2"]),
            &hello_ok(),
        )
        .await?;
    ensure(Response::new(&reply).uaid() != Some(unknown.as_str()), || {
        format!("unrecognised uaid {unknown:?} with channels was not reset: {reply}")
    })?;

    for uaid in ids::uaid_corpus() {
        s.open_secondary().await?;
        let message = ProtocolMessage::hello(uaid.as_str(), &[])
            .with_field("customKey", "custom value");
        let expected = if uaid == PADDED_UAID {
            ExpectedPattern::new()
                .message_type(MessageType::Hello)
                .status(Status::ServiceUnavailable)
        } else if let Err(e) = validate_identifier(KEY_UAID, &uaid) {
            debug!(error = %e, "oversized uaid must be rejected");
            rejected(MessageType::Hello)
        } else if uaid.starts_with(VALID_UAID) && uaid.chars().count() < MAX_IDENTIFIER_LEN {
            hello_ok().with(KEY_UAID, uaid.as_str())
        } else if uaid.is_empty() || uaid.chars().count() == MAX_IDENTIFIER_LEN {
            hello_ok()
        } else {
            ExpectedPattern::new().message_type(MessageType::Hello)
        };
        let reply = s.exchange_on(Target::Secondary, &message, &expected).await?;

        if uaid.is_empty() {
            ensure(
                Response::new(&reply).uaid().is_some_and(|u| !u.is_empty()),
                || format!("empty uaid was not replaced: {reply}"),
            )?;
        }
    }
    s.close_secondary().await;
    Ok(())
}

/// `{k: "hello"}` for every corpus key: a bare `messageType` lacks the
/// handshake fields, anything else lacks `messageType`. Both are invalid.
pub async fn hello_invalid_keys(s: &mut Scenario) -> Result<()> {
    for key in ids::type_corpus() {
        s.open_secondary().await?;
        let message = ProtocolMessage::empty().with_field(*key, "hello");
        let expected = if *key == "messageType" {
            rejected(MessageType::Hello)
        } else {
            ExpectedPattern::new().invalid_command()
        };
        s.exchange_on(Target::Secondary, &message, &expected).await?;
    }
    s.close_secondary().await;
    Ok(())
}

pub async fn register_without_handshake(s: &mut Scenario) -> Result<()> {
    s.exchange(
        &ProtocolMessage::register(ids::unique_id("chan")),
        &rejected(MessageType::Register),
    )
    .await?;
    ensure(s.state() == ScenarioState::Connected, || {
        format!("rejected register changed state to {:?}", s.state())
    })?;

    s.handshake("", &[]).await?;
    s.register_channel(&ids::unique_id("chan")).await?;
    ensure(s.state() == ScenarioState::Registered, || {
        format!("expected Registered, got {:?}", s.state())
    })
}

pub async fn register_duplicate(s: &mut Scenario) -> Result<()> {
    s.handshake("", &[]).await?;
    let channel = ids::unique_id("chan");
    s.register_channel(&channel).await?;

    let again = ProtocolMessage::register(channel.as_str());
    if s.supports(Capability::DuplicateConflict) {
        let conflict = ExpectedPattern::new()
            .message_type(MessageType::Register)
            .status(Status::Conflict);
        s.exchange(&again, &conflict).await?;
    } else {
        let reply = s.request(&again).await?;
        debug!(%reply, "duplicate registration not asserted");
    }

    let plural = ProtocolMessage::new(MessageType::Register)
        .with_channel_ids(&[ids::unique_id("chan").as_str()]);
    s.exchange(&plural, &rejected(MessageType::Register)).await?;
    Ok(())
}

/// Registers every corpus value as a channel id. Rejections are tolerated;
/// anything that is not rejected must be a successful registration.
pub async fn register_plural(s: &mut Scenario) -> Result<()> {
    s.handshake("", &[]).await?;
    let mut accepted = 0usize;
    for channel in ids::type_corpus() {
        let message = ProtocolMessage::register(*channel);
        let reply = s.request(&message).await?;
        if s.expect_error_or(&message, &reply, &succeeded(MessageType::Register))? {
            accepted += 1;
        }
    }
    debug!(accepted, total = ids::type_corpus().len(), "corpus registrations");
    Ok(())
}

/// 101-character identifiers are rejected in every field; 100 characters
/// are accepted.
pub async fn register_oversized_ids(s: &mut Scenario) -> Result<()> {
    let oversized = ids::oversized_id();

    s.open_secondary().await?;
    s.exchange_on(
        Target::Secondary,
        &ProtocolMessage::hello(oversized.as_str(), &[]),
        &rejected(MessageType::Hello),
    )
    .await?;

    s.open_secondary().await?;
    s.exchange_on(
        Target::Secondary,
        &ProtocolMessage::hello("", &[oversized.as_str()]),
        &rejected(MessageType::Hello),
    )
    .await?;
    s.close_secondary().await;

    s.handshake("", &[]).await?;
    s.exchange(
        &ProtocolMessage::register(oversized.as_str()),
        &rejected(MessageType::Register),
    )
    .await?;
    s.exchange(
        &ProtocolMessage::unregister(oversized.as_str()),
        &rejected(MessageType::Unregister),
    )
    .await?;

    let boundary = ids::unique_id_of_len("chan", MAX_IDENTIFIER_LEN);
    s.register_channel(&boundary).await?;
    Ok(())
}

pub async fn unregister_idempotent(s: &mut Scenario) -> Result<()> {
    s.exchange(
        &ProtocolMessage::unregister(ids::unique_id("chan")),
        &rejected(MessageType::Unregister),
    )
    .await?;

    s.handshake("", &[]).await?;
    s.exchange(
        &ProtocolMessage::new(MessageType::Unregister),
        &rejected(MessageType::Unregister),
    )
    .await?;

    let channel = ids::unique_id("chan");
    s.register_channel(&channel).await?;
    let message = ProtocolMessage::unregister(channel.as_str());
    s.exchange(&message, &succeeded(MessageType::Unregister))
        .await?;
    s.exchange(&message, &succeeded(MessageType::Unregister))
        .await?;
    ensure(!s.session().channels.contains_key(&channel), || {
        format!("{channel} still tracked after unregister")
    })
}

/// A delivered-but-unacknowledged notification must not be redelivered once
/// its channel is unregistered, and a publish to the stale endpoint must not
/// be delivered either.
pub async fn unregister_race(s: &mut Scenario) -> Result<()> {
    s.handshake("", &[]).await?;
    let channel = ids::unique_id("chan");
    let endpoint = s.register_channel(&channel).await?;

    let version = s.trigger(&endpoint).await?;
    let update = s.receive_notification(&channel).await?;
    debug!(%channel, fired = version, delivered = update.version, "holding ack");

    s.exchange(
        &ProtocolMessage::unregister(channel.as_str()),
        &succeeded(MessageType::Unregister),
    )
    .await?;
    s.expect_no_message().await?;

    match s.trigger(&endpoint).await {
        Ok(version) => debug!(%endpoint, version, "stale endpoint accepted publish"),
        Err(HarnessError::Trigger(e)) if e.is_client_error() => {
            debug!(%endpoint, error = %e, "stale endpoint rejected publish");
        }
        Err(e) => return Err(e),
    }
    s.expect_no_message().await
}

/// Keep-alives in every accepted form, interleaved with activity on a
/// second session that must not leak into this one.
pub async fn ping_keepalive(s: &mut Scenario) -> Result<()> {
    for message in [
        ProtocolMessage::empty(),
        ProtocolMessage::ping(),
        ProtocolMessage::ping()
            .with_field("extra", "arg")
            .with_field("nested", json!({ "k": [1, 2, 3] })),
    ] {
        let reply = s.request(&message).await?;
        s.expect_keepalive(&message, &reply)?;
    }

    s.open_secondary().await?;
    s.exchange_on(Target::Secondary, &ProtocolMessage::hello("", &[]), &hello_ok())
        .await?;
    s.exchange_on(
        Target::Secondary,
        &ProtocolMessage::register(ids::unique_id("chan")),
        &succeeded(MessageType::Register),
    )
    .await?;
    s.purge_on(Target::Secondary).await?;
    s.close_secondary().await;
    s.expect_no_message().await?;

    let empty = ProtocolMessage::empty();
    let reply = s.request(&empty).await?;
    s.expect_keepalive(&empty, &reply)?;

    let ping = ProtocolMessage::ping();
    for round in 0..s.config().ping_rounds {
        let reply = s.request(&ping).await?;
        if let Err(e) = s.expect_keepalive(&ping, &reply) {
            debug!(round = round + 1, "keep-alive failed");
            return Err(e);
        }
    }
    Ok(())
}

fn ensure_echoed(reply: &Value, update: &UpdateRecord) -> Result<()> {
    ensure(Response::new(reply).updates().contains(update), || {
        format!(
            "ack reply does not echo {}@{}: {reply}",
            update.channel_id, update.version
        )
    })
}

/// Acks for channels that are not registered keep their fields and carry an
/// error status, before and after the handshake.
pub async fn ack_unregistered(s: &mut Scenario) -> Result<()> {
    let update = UpdateRecord::new(ids::unique_id("chan"), 12_345);
    let message = ProtocolMessage::ack(std::slice::from_ref(&update));

    let reply = s.exchange(&message, &rejected(MessageType::Ack)).await?;
    ensure_echoed(&reply, &update)?;

    s.handshake("", &[]).await?;
    let reply = s
        .exchange(
            &message,
            &ExpectedPattern::new().message_type(MessageType::Ack),
        )
        .await?;
    ensure(
        Response::new(&reply)
            .status()
            .is_some_and(|status| !status.is_success()),
        || format!("ack for unregistered channel reported success: {reply}"),
    )?;
    ensure_echoed(&reply, &update)
}

pub async fn end_to_end_notification(s: &mut Scenario) -> Result<()> {
    let uaid = s.handshake("", &[]).await?;
    let endpoint = s.register_channel("c1").await?;
    debug!(%uaid, %endpoint, "registered c1");

    let version = s.trigger(&endpoint).await?;
    let update = s.receive_notification("c1").await?;
    debug!(fired = version, delivered = update.version, "notification received");

    let reply = s
        .exchange(
            &ProtocolMessage::ack(std::slice::from_ref(&update)),
            &succeeded(MessageType::Ack),
        )
        .await?;
    ensure_echoed(&reply, &update)?;
    ensure(s.state() == ScenarioState::Acknowledging, || {
        format!("expected Acknowledging, got {:?}", s.state())
    })
}

/// An unrecognised uaid presented with channels gets a new uaid, and the
/// new session is usable.
pub async fn session_reset(s: &mut Scenario) -> Result<()> {
    let stale = ids::random_string(32);
    let assigned = s.handshake(&stale, &["1", "2"]).await?;
    ensure(assigned != stale, || {
        format!("server kept unrecognised uaid {stale:?}")
    })?;
    ensure(s.session().uaid.as_deref() == Some(assigned.as_str()), || {
        "session fixture did not record the assigned uaid".to_owned()
    })?;
    s.register_channel(&ids::unique_id("chan")).await?;
    Ok(())
}

/// An empty uaid always yields a fresh, non-empty one, distinct per session.
pub async fn empty_uaid_handshake(s: &mut Scenario) -> Result<()> {
    let first = s.handshake("", &[]).await?;

    s.open_secondary().await?;
    let reply = s
        .exchange_on(Target::Secondary, &ProtocolMessage::hello("", &[]), &hello_ok())
        .await?;
    let second = Response::new(&reply).uaid().unwrap_or_default().to_owned();
    s.close_secondary().await;

    ensure(!second.is_empty(), || {
        format!("second empty-uaid hello returned no uaid: {reply}")
    })?;
    ensure(first != second, || {
        format!("two sessions were assigned the same uaid {first:?}")
    })
}
