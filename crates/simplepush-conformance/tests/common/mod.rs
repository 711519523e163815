#![allow(dead_code, unused_imports)]

mod reference_server;

pub use reference_server::{Faults, ReferenceServer};
pub use simplepush_conformance::config::{Capabilities, Capability, HarnessConfig};
pub use simplepush_conformance::connection::PushConnection;
pub use simplepush_conformance::error::HarnessError;
pub use simplepush_conformance::ids::unique_id;
pub use simplepush_conformance::matcher::ExpectedPattern;
pub use simplepush_conformance::scenario::{Scenario, ScenarioState, Target};
pub use simplepush_conformance::scenarios;

use std::time::Duration;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Harness settings tuned for a loopback server.
pub fn test_config(server: &ReferenceServer) -> HarnessConfig {
    HarnessConfig::new(server.ws_url())
        .with_receive_timeout(Duration::from_secs(2))
        .with_race_window(Duration::from_millis(300))
        .with_ping_rounds(20)
}

/// Starts a reference server, runs the named catalogue scenario against it
/// and returns the outcome together with the server.
pub async fn run_scenario(
    name: &str,
    faults: Faults,
    capabilities: Capabilities,
) -> (ReferenceServer, simplepush_conformance::Result<()>) {
    init_tracing();
    let server = ReferenceServer::start_with(faults).await;
    let config = test_config(&server).with_capabilities(capabilities);
    let entry = scenarios::find(name).unwrap_or_else(|| panic!("no scenario named {name}"));
    let result = scenarios::run_entry(&entry, &config).await;
    (server, result)
}

/// Keys the matcher reported as differing; panics unless `err` is a mismatch.
pub fn mismatch_keys(err: &HarnessError) -> Vec<String> {
    match err {
        HarnessError::Mismatch(report) => report
            .failure
            .keys()
            .into_iter()
            .map(str::to_owned)
            .collect(),
        other => panic!("expected a mismatch, got {other}"),
    }
}
