//! Partial response matching.
//!
//! An [`ExpectedPattern`] names the keys a response must carry and the
//! values they must hold. Keys the pattern does not mention are ignored, so
//! servers are free to add fields. [`matches`] reports every missing or
//! differing key at once, not just the first.
//!
//! `status` values are compared as integers: `200`, `"200"` and `200.0` are
//! equal.

use serde::Serialize;
use serde_json::{Map, Value};
use simplepush_protocol::message::{KEY_ERROR, KEY_MESSAGE_TYPE, KEY_STATUS};
use simplepush_protocol::status::normalize_code;
use simplepush_protocol::{MessageType, Status, INVALID_COMMAND};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpectedPattern {
    entries: BTreeMap<String, Value>,
}

impl ExpectedPattern {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a pattern from a JSON object. Returns `None` for non-objects.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        Some(Self {
            entries: object.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        })
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn status(self, status: Status) -> Self {
        self.with(KEY_STATUS, status.code())
    }

    #[must_use]
    pub fn message_type(self, message_type: MessageType) -> Self {
        self.with(KEY_MESSAGE_TYPE, message_type.as_str())
    }

    #[must_use]
    pub fn message_type_raw(self, message_type: impl Into<String>) -> Self {
        self.with(KEY_MESSAGE_TYPE, message_type.into())
    }

    /// `status: 401` together with the `"Invalid Command"` error marker.
    #[must_use]
    pub fn invalid_command(self) -> Self {
        self.status(Status::InvalidCommand)
            .with(KEY_ERROR, INVALID_COMMAND)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Map<String, Value>>(),
        )
    }
}

impl fmt::Display for ExpectedPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Difference {
    Missing { key: String, expected: Value },
    Unequal { key: String, expected: Value, actual: Value },
}

impl Difference {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Missing { key, .. } | Self::Unequal { key, .. } => key,
        }
    }
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { key, expected } => write!(f, "{key}: missing, expected {expected}"),
            Self::Unequal {
                key,
                expected,
                actual,
            } => write!(f, "{key}: expected {expected}, got {actual}"),
        }
    }
}

/// Every key of a pattern that a response failed to satisfy.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchFailure {
    pub differences: Vec<Difference>,
}

impl MatchFailure {
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.differences.iter().map(Difference::key).collect()
    }
}

impl fmt::Display for MatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  {} key(s) differ:", self.differences.len())?;
        for diff in &self.differences {
            write!(f, "\n    - {diff}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MatchFailure {}

/// Checks `actual` against `expected`.
///
/// A non-object `actual` has no keys, so every expected key is reported
/// missing.
pub fn matches(actual: &Value, expected: &ExpectedPattern) -> Result<(), MatchFailure> {
    let object = actual.as_object();
    let differences: Vec<Difference> = expected
        .entries
        .iter()
        .filter_map(|(key, want)| match object.and_then(|o| o.get(key)) {
            None => Some(Difference::Missing {
                key: key.clone(),
                expected: want.clone(),
            }),
            Some(got) if !values_equal(key, want, got) => Some(Difference::Unequal {
                key: key.clone(),
                expected: want.clone(),
                actual: got.clone(),
            }),
            Some(_) => None,
        })
        .collect();

    if differences.is_empty() {
        Ok(())
    } else {
        Err(MatchFailure { differences })
    }
}

fn values_equal(key: &str, expected: &Value, actual: &Value) -> bool {
    if key == KEY_STATUS {
        if let (Some(want), Some(got)) = (normalize_code(expected), normalize_code(actual)) {
            return want == got;
        }
    }
    expected == actual
}
