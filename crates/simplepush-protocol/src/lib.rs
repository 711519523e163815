//! SimplePush wire vocabulary.
//!
//! SimplePush clients and servers exchange JSON objects over a persistent
//! WebSocket. Every object carries a `messageType` key naming the exchange
//! (`hello`, `register`, `unregister`, `ack`, `ping`, `purge`, and the
//! server-initiated `notification`) plus type-specific fields.
//!
//! This crate only models what a client needs to *drive* a server: outbound
//! [`ProtocolMessage`] builders, the [`Status`] codes a server answers with,
//! [`UpdateRecord`]s, and a read-only [`Response`] view over decoded replies.

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod error;
pub mod message;
pub mod status;
pub mod validation;

pub use error::{ProtocolError, Result};
pub use message::{MessageType, ProtocolMessage, Response, UpdateRecord, INVALID_COMMAND};
pub use status::Status;
pub use validation::{is_valid_identifier, validate_identifier, MAX_IDENTIFIER_LEN};
