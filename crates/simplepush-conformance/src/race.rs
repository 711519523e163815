//! Wall-clock bounded absence assertions.
//!
//! Proving that a server does *not* deliver something can only be done
//! within a window: each call makes one receive with a single deadline and
//! never retries. A delivery that lands after the window closes goes
//! unnoticed; callers pick the window from
//! [`HarnessConfig::race_window`](crate::config::HarnessConfig::race_window).

use crate::connection::PushConnection;
use crate::error::{HarnessError, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Succeeds if nothing arrives on `conn` within `window`.
///
/// A message that does arrive is returned inside
/// [`HarnessError::UnexpectedDelivery`]; a frame that is not JSON is still a
/// delivery and is carried as a JSON string of its raw payload. Transport
/// errors propagate.
pub async fn expect_no_message_within(conn: &mut PushConnection, window: Duration) -> Result<()> {
    match conn.receive(window).await {
        Err(HarnessError::TimeoutExpired(_)) => {
            debug!(url = conn.url(), ?window, "no delivery within window");
            Ok(())
        }
        Ok(message) => Err(HarnessError::UnexpectedDelivery(message)),
        Err(HarnessError::Decode { payload, reason }) => {
            debug!(url = conn.url(), %reason, "undecodable delivery within window");
            Err(HarnessError::UnexpectedDelivery(Value::String(payload)))
        }
        Err(e) => Err(e),
    }
}

/// Expects exactly one message within `window`, followed by another silent
/// `window`.
pub async fn expect_exactly_one_within(
    conn: &mut PushConnection,
    window: Duration,
) -> Result<Value> {
    let message = conn.receive(window).await?;
    expect_no_message_within(conn, window).await?;
    Ok(message)
}
