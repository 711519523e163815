//! Status codes carried in the `status` field of server responses.
//!
//! Servers are inconsistent about the JSON type of `status`; some send
//! `200`, some `"200"`. [`Status::from_json`] normalises both.

use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    InvalidCommand,
    Conflict,
    ServiceUnavailable,
    Other(u16),
}

impl Status {
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::InvalidCommand => 401,
            Self::Conflict => 409,
            Self::ServiceUnavailable => 503,
            Self::Other(code) => code,
        }
    }

    #[must_use]
    pub fn from_code(code: u16) -> Self {
        match code {
            200 => Self::Ok,
            401 => Self::InvalidCommand,
            409 => Self::Conflict,
            503 => Self::ServiceUnavailable,
            other => Self::Other(other),
        }
    }

    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::Ok
    }

    /// Reads a status from a JSON value.
    ///
    /// Accepts integers, integral floats and strings holding an integer.
    /// Returns `None` for anything else.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        normalize_code(value).map(Self::from_code)
    }
}

/// Normalises a JSON status value to its integer code.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn normalize_code(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => {
            if let Some(code) = n.as_u64() {
                return u16::try_from(code).ok();
            }
            let f = n.as_f64()?;
            if f.fract() == 0.0 && (0.0..=f64::from(u16::MAX)).contains(&f) {
                return Some(f as u16);
            }
            None
        }
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl From<Status> for Value {
    fn from(status: Status) -> Self {
        Value::from(status.code())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
