//! Conformance coverage report generation.
//!
//! Produces human-readable text reports and machine-readable JSON from a
//! [`ConformanceManifest`], showing which statements are tested.

use crate::error::{HarnessError, Result};
use crate::manifest::{ConformanceManifest, TestStatus};
use std::fmt::Write;

pub struct ConformanceReport {
    manifest: ConformanceManifest,
}

impl ConformanceReport {
    #[must_use]
    pub fn new(manifest: ConformanceManifest) -> Self {
        Self { manifest }
    }

    /// Per-group coverage with a status marker for each statement.
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut out = String::new();
        out.push_str("SimplePush Conformance Report\n");
        out.push_str(&"=".repeat(60));
        out.push('\n');

        let total = self.manifest.total_statements();
        let tested = self.manifest.tested_count();
        let _ = writeln!(
            out,
            "Coverage: {tested}/{total} ({:.1}%)\n",
            self.manifest.coverage_percentage()
        );

        for (group_id, group) in &self.manifest.groups {
            let group_tested = group
                .statements
                .iter()
                .filter(|s| s.status == TestStatus::Tested)
                .count();
            let _ = writeln!(
                out,
                "{group_id}: {} ({group_tested}/{} tested)",
                group.title,
                group.statements.len()
            );

            for stmt in &group.statements {
                let marker = match stmt.status {
                    TestStatus::Tested => "[PASS]",
                    TestStatus::Untested => "[    ]",
                    TestStatus::Partial => "[PART]",
                    TestStatus::Skipped => "[SKIP]",
                    TestStatus::CapabilityGated => "[CAP ]",
                };
                let text = truncate(&stmt.text, 70);
                let _ = writeln!(out, "  {marker} {} ({:?}): {text}", stmt.id, stmt.level);
            }
            out.push('\n');
        }
        out
    }

    pub fn generate_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.manifest)
            .map_err(|e| HarnessError::Encode(e.to_string()))
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_owned()
    } else {
        let mut result: String = s.chars().take(max).collect();
        result.push_str("...");
        result
    }
}
