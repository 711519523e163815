//! One persistent WebSocket connection to the server under test.
//!
//! [`PushConnection`] sends JSON text frames and decodes replies. It never
//! validates what it sends: [`send_raw`](PushConnection::send_raw) writes any
//! payload verbatim, which is how scenarios deliver bare values, `null`
//! fields and unparsable text.
//!
//! Requests and responses pair up by position. Callers must not send a second
//! request before reading the reply to the first when the order matters.

use crate::error::{HarnessError, Result};
use crate::tls;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use simplepush_protocol::ProtocolMessage;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct PushConnection {
    stream: WsStream,
    url: String,
    closed: bool,
}

impl PushConnection {
    /// Opens a connection to `url` (`ws://` or `wss://`).
    pub async fn open(url: &str) -> Result<Self> {
        let connector = tls::client_config()
            .map(Connector::Rustls)
            .map_err(|e| HarnessError::Connect(format!("TLS setup: {e}")))?;
        let (stream, _response) =
            tokio_tungstenite::connect_async_tls_with_config(url, None, false, Some(connector))
                .await
                .map_err(|e| HarnessError::Connect(format!("{url}: {e}")))?;
        debug!(url, "connection opened");
        Ok(Self {
            stream,
            url: url.to_owned(),
            closed: false,
        })
    }

    /// [`open`](Self::open) bounded by `timeout`.
    pub async fn open_with_timeout(url: &str, timeout: Duration) -> Result<Self> {
        tokio::time::timeout(timeout, Self::open(url))
            .await
            .map_err(|_| HarnessError::Connect(format!("{url}: no handshake within {timeout:?}")))?
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub async fn send(&mut self, message: &ProtocolMessage) -> Result<()> {
        let payload = message.encode()?;
        self.send_raw(&payload).await
    }

    /// Sends `payload` as one text frame, unmodified.
    pub async fn send_raw(&mut self, payload: &str) -> Result<()> {
        if self.closed {
            return Err(HarnessError::ConnectionClosed);
        }
        trace!(url = %self.url, payload, "send");
        self.stream
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| self.transport_error(e))
    }

    /// Waits up to `timeout` for the next data frame and decodes it as JSON.
    ///
    /// Control frames are skipped. A payload that is not JSON yields
    /// [`HarnessError::Decode`] and leaves the connection open.
    pub async fn receive(&mut self, timeout: Duration) -> Result<Value> {
        if self.closed {
            return Err(HarnessError::ConnectionClosed);
        }
        let deadline = Instant::now() + timeout;
        loop {
            let next = tokio::time::timeout_at(deadline, self.stream.next())
                .await
                .map_err(|_| HarnessError::TimeoutExpired(timeout))?;

            let text = match next {
                Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => text.to_owned(),
                    Err(e) => {
                        return Err(HarnessError::Decode {
                            payload: format!("{data:?}"),
                            reason: e.to_string(),
                        })
                    }
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    debug!(url = %self.url, ?frame, "peer closed connection");
                    self.closed = true;
                    return Err(HarnessError::ConnectionClosed);
                }
                Some(Err(e)) => return Err(self.transport_error(e)),
                None => {
                    self.closed = true;
                    return Err(HarnessError::ConnectionClosed);
                }
            };

            trace!(url = %self.url, payload = %text, "recv");
            return serde_json::from_str(&text).map_err(|e| HarnessError::Decode {
                payload: text.clone(),
                reason: e.to_string(),
            });
        }
    }

    /// Sends `message` and returns the next reply.
    pub async fn request(&mut self, message: &ProtocolMessage, timeout: Duration) -> Result<Value> {
        self.send(message).await?;
        self.receive(timeout).await
    }

    /// Sends a close frame. Calling it again, or after the peer closed, does
    /// nothing.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.stream.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                debug!(url = %self.url, "connection closed");
                Ok(())
            }
            Err(e) => Err(HarnessError::Transport(e.to_string())),
        }
    }

    fn transport_error(&mut self, err: tungstenite::Error) -> HarnessError {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                self.closed = true;
                HarnessError::ConnectionClosed
            }
            tungstenite::Error::Io(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                self.closed = true;
                HarnessError::ConnectionClosed
            }
            other => HarnessError::Transport(other.to_string()),
        }
    }
}
