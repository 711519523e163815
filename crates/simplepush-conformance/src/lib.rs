//! SimplePush server conformance harness.
//!
//! Drives a remote SimplePush server over a WebSocket through handshake,
//! channel registration and unregistration, acknowledgment, keep-alive and
//! session reset, and checks every observable response against a partial
//! [`ExpectedPattern`](matcher::ExpectedPattern). Inbound notifications are
//! simulated with an HTTP `PUT` against the server-issued push endpoint.
//!
//! Each scenario in [`scenarios::catalog`] maps to statements in the
//! `conformance.toml` manifest; [`report`] renders coverage from it.
//!
//! ```no_run
//! # async fn demo() -> simplepush_conformance::Result<()> {
//! use simplepush_conformance::{scenarios, HarnessConfig};
//!
//! let config = HarnessConfig::from_env()?;
//! for entry in scenarios::catalog() {
//!     scenarios::run_entry(&entry, &config).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod connection;
pub mod error;
pub mod ids;
pub mod manifest;
pub mod matcher;
pub mod race;
pub mod report;
pub mod scenario;
pub mod scenarios;
pub mod trigger;

mod tls;

pub use config::{Capabilities, Capability, HarnessConfig};
pub use connection::PushConnection;
pub use error::{HarnessError, MismatchReport, Result};
pub use matcher::{matches, ExpectedPattern, MatchFailure};
pub use scenario::{Scenario, ScenarioState, SessionFixture, Target};
pub use trigger::{TriggerClient, TriggerError};
