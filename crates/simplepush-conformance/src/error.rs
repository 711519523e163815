use crate::matcher::{ExpectedPattern, MatchFailure};
use crate::trigger::TriggerError;
use serde_json::Value;
use simplepush_protocol::ProtocolError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Malformed response {payload:?}: {reason}")]
    Decode { payload: String, reason: String },

    #[error("No message within {0:?}")]
    TimeoutExpired(Duration),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Trigger failed: {0}")]
    Trigger(#[from] TriggerError),

    #[error("{0}")]
    Mismatch(Box<MismatchReport>),

    #[error("Unexpected delivery: {0}")]
    UnexpectedDelivery(Value),

    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl HarnessError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimeoutExpired(_))
    }
}

impl From<ProtocolError> for HarnessError {
    fn from(err: ProtocolError) -> Self {
        Self::Encode(err.to_string())
    }
}

/// Everything needed to diagnose a failed response check without
/// re-running the scenario.
#[derive(Debug, Clone)]
pub struct MismatchReport {
    pub scenario: String,
    pub sent: Option<Value>,
    pub received: Value,
    pub expected: ExpectedPattern,
    pub failure: MatchFailure,
}

impl fmt::Display for MismatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{}] response did not match", self.scenario)?;
        match &self.sent {
            Some(sent) => writeln!(f, "  sent:     {sent}")?,
            None => writeln!(f, "  sent:     <nothing>")?,
        }
        writeln!(f, "  received: {}", self.received)?;
        writeln!(f, "  expected: {}", self.expected)?;
        write!(f, "{}", self.failure)
    }
}

/// Fails with [`HarnessError::Assertion`] unless `condition` holds.
pub fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(HarnessError::Assertion(message()))
    }
}
