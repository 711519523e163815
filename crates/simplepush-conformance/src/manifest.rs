//! Structured conformance manifest for tracking SimplePush server properties.
//!
//! The manifest is a TOML file (`conformance.toml`) that groups every
//! testable statement about a conforming server and maps it to its test
//! status and the scenarios that exercise it. Use
//! [`ConformanceManifest::load`] to deserialize and query coverage metrics.

#![allow(clippy::cast_precision_loss)]

use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Root manifest containing all statement groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConformanceManifest {
    pub groups: BTreeMap<String, Group>,
}

/// A themed group of statements (e.g. "handshake", "delivery").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub title: String,
    pub note: Option<String>,
    #[serde(default)]
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    pub id: String,
    pub level: Level,
    pub text: String,
    pub status: TestStatus,
    #[serde(default)]
    pub test_names: Vec<String>,
    pub note: Option<String>,
}

/// RFC 2119 requirement level of a statement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Level {
    Must,
    MustNot,
    Should,
    May,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TestStatus {
    Tested,
    Untested,
    Partial,
    Skipped,
    /// Asserted only when the server advertises the matching capability.
    CapabilityGated,
}

impl ConformanceManifest {
    /// Loads and deserializes a conformance manifest from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| HarnessError::Config(format!("invalid conformance manifest: {e}")))
    }

    pub fn statements(&self) -> impl Iterator<Item = &Statement> {
        self.groups.values().flat_map(|g| &g.statements)
    }

    #[must_use]
    pub fn statement(&self, id: &str) -> Option<&Statement> {
        self.statements().find(|st| st.id == id)
    }

    #[must_use]
    pub fn total_statements(&self) -> usize {
        self.statements().count()
    }

    #[must_use]
    pub fn count(&self, status: TestStatus) -> usize {
        self.statements().filter(|st| st.status == status).count()
    }

    #[must_use]
    pub fn tested_count(&self) -> usize {
        self.count(TestStatus::Tested)
    }

    #[must_use]
    pub fn untested_count(&self) -> usize {
        self.count(TestStatus::Untested)
    }

    /// Percentage of statements that are tested, capability-gated ones
    /// included.
    #[must_use]
    pub fn coverage_percentage(&self) -> f64 {
        let total = self.total_statements();
        if total == 0 {
            return 0.0;
        }
        let covered = self.tested_count() + self.count(TestStatus::CapabilityGated);
        (covered as f64 / total as f64) * 100.0
    }

    /// Test names referenced by the manifest that are not in `known`.
    #[must_use]
    pub fn unknown_test_names<'a>(&'a self, known: &[&str]) -> Vec<&'a str> {
        self.statements()
            .flat_map(|st| &st.test_names)
            .map(String::as_str)
            .filter(|name| !known.contains(name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[groups.handshake]
title = "Handshake"

[[groups.handshake.statements]]
id = "P2"
level = "Must"
text = "Empty uaid yields a generated uaid"
status = "Tested"
test_names = ["empty_uaid_handshake"]

[[groups.handshake.statements]]
id = "SP-DUP"
level = "May"
text = "Duplicate registration answers 409"
status = "CapabilityGated"
test_names = ["register_duplicate"]

[[groups.handshake.statements]]
id = "SP-X"
level = "Should"
text = "Not yet covered"
status = "Untested"
"#;

    #[test]
    fn test_counts() {
        let manifest = ConformanceManifest::from_toml_str(SAMPLE).unwrap();
        assert_eq!(manifest.total_statements(), 3);
        assert_eq!(manifest.tested_count(), 1);
        assert_eq!(manifest.untested_count(), 1);
        assert_eq!(manifest.count(TestStatus::CapabilityGated), 1);
        let pct = manifest.coverage_percentage();
        assert!((pct - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(manifest.statement("P2").map(|s| s.level), Some(Level::Must));
    }

    #[test]
    fn test_unknown_test_names() {
        let manifest = ConformanceManifest::from_toml_str(SAMPLE).unwrap();
        assert_eq!(
            manifest.unknown_test_names(&["empty_uaid_handshake"]),
            vec!["register_duplicate"]
        );
    }

    #[test]
    fn test_invalid_manifest() {
        let err = ConformanceManifest::from_toml_str("groups = 3").unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }
}
