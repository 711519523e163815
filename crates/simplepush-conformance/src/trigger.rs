//! Fires inbound pushes through the HTTP side channel.
//!
//! A successful `register` returns a `pushEndpoint` URL. A `PUT` against it
//! stands in for an application server publishing an update; the push server
//! then delivers a `notification` over the WebSocket. [`TriggerClient::fire`]
//! covers only the first leg and returns once the HTTP request is accepted.

use crate::tls;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Method, Request};
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timeout")]
    Timeout,

    #[error("endpoint answered HTTP {0}")]
    Status(u16),
}

impl TriggerError {
    /// `true` when the endpoint answered with a 4xx status.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Status(code) if (400..500).contains(code))
    }
}

pub struct TriggerClient {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    timeout: Duration,
    next_version: AtomicU64,
}

impl TriggerClient {
    pub fn new(timeout: Duration) -> Result<Self, TriggerError> {
        let tls_config = tls::client_config().map_err(|e| TriggerError::Tls(e.to_string()))?;
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config((*tls_config).clone())
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(https);

        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(1, |d| d.as_secs());

        Ok(Self {
            client,
            timeout,
            next_version: AtomicU64::new(seed),
        })
    }

    /// Publishes to `endpoint` with the next version number and returns it.
    ///
    /// Versions increase with every call, starting from the current Unix
    /// time, so successive fires are always newer than earlier runs.
    pub async fn fire(&self, endpoint: &str) -> Result<u64, TriggerError> {
        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        self.fire_with_version(endpoint, version).await?;
        Ok(version)
    }

    /// Sends one `PUT` with body `version=<version>`. Never retries.
    pub async fn fire_with_version(&self, endpoint: &str, version: u64) -> Result<(), TriggerError> {
        let parsed = Url::parse(endpoint)
            .map_err(|e| TriggerError::InvalidUrl(format!("{endpoint}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(TriggerError::InvalidUrl(format!(
                "{endpoint}: scheme must be http or https"
            )));
        }

        let uri: http::Uri = parsed
            .as_str()
            .parse()
            .map_err(|e: http::uri::InvalidUri| TriggerError::InvalidUrl(e.to_string()))?;

        let request = Request::builder()
            .method(Method::PUT)
            .uri(uri)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Full::new(Bytes::from(format!("version={version}"))))
            .map_err(|e| TriggerError::InvalidUrl(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| TriggerError::Timeout)?
            .map_err(|e| TriggerError::Connection(e.to_string()))?;

        let status = response.status();
        if let Err(e) = response.into_body().collect().await {
            debug!(endpoint, error = %e, "failed to read trigger response body");
        }

        if !status.is_success() {
            debug!(endpoint, version, status = status.as_u16(), "trigger rejected");
            return Err(TriggerError::Status(status.as_u16()));
        }
        debug!(endpoint, version, "trigger accepted");
        Ok(())
    }
}
