//! Test identifiers and fuzz values.
//!
//! [`unique_id`] gives every scenario run fresh `uaid`/`channelID` values so
//! runs never collide on a shared server. The type corpus is a fixed table so
//! a failing scenario replays the same inputs; bump [`CORPUS_VERSION`]
//! whenever an entry changes.

use rand::distributions::Alphanumeric;
use rand::Rng;
use simplepush_protocol::MAX_IDENTIFIER_LEN;
use std::sync::{Mutex, OnceLock, PoisonError};
use ulid::{Generator, Ulid};

pub const CORPUS_VERSION: u32 = 1;

/// Seed of the session identifier servers are expected to accept and echo.
pub const VALID_UAID: &str = "valid_uaid";

/// A session identifier with surrounding whitespace, answered with 503 by
/// the reference server.
pub const PADDED_UAID: &str = " fooey barrey ";

/// Strings that look like protocol keys, message types in odd casing, or
/// JSON/type names. Only `HeLLO` lowercases to a client message type.
const TYPE_CORPUS: &[&str] = &[
    "HeLLO",
    "messageType",
    "uaid",
    "channelID",
    "channelIDs",
    "updates",
    "version",
    "status",
    "error",
    "pushEndpoint",
    "notification",
    "registered",
    "int",
    "float",
    "str",
    "string",
    "bool",
    "true",
    "false",
    "null",
    "None",
    "NaN",
    "Infinity",
    "undefined",
    "object",
    "array",
    "list",
    "dict",
    "0",
    "-1",
    "3.14159",
    "1e309",
    "[]",
    "{}",
    "\"\"",
    " ",
    "\\u0000",
    "' OR '1'='1",
    "<script>",
    "ünïcødé",
];

#[must_use]
pub fn type_corpus() -> &'static [&'static str] {
    TYPE_CORPUS
}

/// Session identifier probes: a valid id, the empty string, a padded id, the
/// largest accepted id, the smallest rejected id, then the type corpus.
///
/// The valid and largest ids open real sessions, so they are fresh on every
/// call; everything else is fixed.
#[must_use]
pub fn uaid_corpus() -> Vec<String> {
    let mut values = vec![
        unique_id(VALID_UAID),
        String::new(),
        PADDED_UAID.to_owned(),
        unique_id_of_len(VALID_UAID, MAX_IDENTIFIER_LEN),
        oversized_id(),
    ];
    values.extend(TYPE_CORPUS.iter().map(|s| (*s).to_owned()));
    values
}

/// A deterministic identifier of exactly `len` characters.
#[must_use]
pub fn boundary_id(len: usize) -> String {
    "0123456789abcdef".chars().cycle().take(len).collect()
}

/// The shortest identifier a server must reject.
#[must_use]
pub fn oversized_id() -> String {
    boundary_id(MAX_IDENTIFIER_LEN + 1)
}

fn generator() -> &'static Mutex<Generator> {
    static GENERATOR: OnceLock<Mutex<Generator>> = OnceLock::new();
    GENERATOR.get_or_init(|| Mutex::new(Generator::new()))
}

/// Returns `"{seed}-{ulid}"`. ULIDs come from a process-wide monotonic
/// generator, so no two calls return the same value.
#[must_use]
pub fn unique_id(seed: &str) -> String {
    let ulid = generator()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .generate()
        .unwrap_or_else(|_| Ulid::new());
    format!("{seed}-{ulid}")
}

/// A [`unique_id`] padded out to exactly `len` characters.
///
/// Used for boundary-length identifiers that must still be fresh per run.
/// When `len` is shorter than the unique id, the id is truncated from the
/// front so the ULID suffix survives.
#[must_use]
pub fn unique_id_of_len(seed: &str, len: usize) -> String {
    let id = unique_id(seed);
    let count = id.chars().count();
    if count >= len {
        return id.chars().skip(count - len).collect();
    }
    let mut padded = id;
    padded.extend(boundary_id(len - count).chars());
    padded
}

/// `length` characters drawn from `[A-Za-z0-9]`.
#[must_use]
pub fn random_string(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}
