//! In-process SimplePush server for exercising the harness hermetically.
//!
//! Speaks the WebSocket protocol on one loopback port and accepts
//! `PUT /update/{token}` publishes on another. [`Faults`] switch on specific
//! misbehaviours so tests can prove the harness catches them.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde_json::{json, Map, Value};
use simplepush_protocol::is_valid_identifier;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use ulid::Ulid;

const INVALID_COMMAND: &str = "Invalid Command";

#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    /// Answer a duplicate registration with 409.
    pub duplicate_conflict: bool,
    /// Push the last unacknowledged notification again after unregister.
    pub redeliver_unacked: bool,
    /// Accept `register` before `hello`.
    pub register_without_hello: bool,
    /// Reject unregistering a channel that is not registered.
    pub strict_unregister: bool,
    /// Keep an unrecognised uaid presented with channels.
    pub keep_unknown_uaid: bool,
    /// Answer an empty uaid with an empty uaid.
    pub keep_empty_uaid: bool,
    /// Skip the identifier length check.
    pub accept_oversized_ids: bool,
    /// Answer `ping` with an error status.
    pub ping_error: bool,
    /// Leave `updates` out of rejected `ack` replies.
    pub ack_drops_fields: bool,
    /// Answer acks for unknown channels with 200.
    pub ack_reports_success: bool,
    /// Accept publishes without pushing the notification.
    pub drop_notifications: bool,
}

struct Channel {
    token: String,
    pending: Option<u64>,
}

#[derive(Default)]
struct Session {
    channels: HashMap<String, Channel>,
    sender: Option<mpsc::UnboundedSender<Value>>,
}

struct State {
    faults: Faults,
    http_base: String,
    sessions: HashMap<String, Session>,
    /// Endpoint token → (uaid, channelID).
    endpoints: HashMap<String, (String, String)>,
    purges: usize,
}

type Shared = Arc<Mutex<State>>;

fn lock(state: &Shared) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ReferenceServer {
    ws_addr: SocketAddr,
    state: Shared,
    handles: Vec<JoinHandle<()>>,
}

impl ReferenceServer {
    pub async fn start() -> Self {
        Self::start_with(Faults::default()).await
    }

    pub async fn start_with(faults: Faults) -> Self {
        let ws_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_addr = ws_listener.local_addr().unwrap();
        let http_addr = http_listener.local_addr().unwrap();

        let state = Arc::new(Mutex::new(State {
            faults,
            http_base: format!("http://{http_addr}"),
            sessions: HashMap::new(),
            endpoints: HashMap::new(),
            purges: 0,
        }));

        let ws_state = Arc::clone(&state);
        let ws_handle = tokio::spawn(async move {
            while let Ok((stream, _)) = ws_listener.accept().await {
                tokio::spawn(serve_socket(Arc::clone(&ws_state), stream));
            }
        });

        let http_state = Arc::clone(&state);
        let http_handle = tokio::spawn(async move {
            while let Ok((stream, _)) = http_listener.accept().await {
                let state = Arc::clone(&http_state);
                tokio::spawn(async move {
                    let service = service_fn(move |req| handle_publish(Arc::clone(&state), req));
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self {
            ws_addr,
            state,
            handles: vec![ws_handle, http_handle],
        }
    }

    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}/", self.ws_addr)
    }

    /// Number of `purge` commands handled so far.
    #[must_use]
    pub fn purge_count(&self) -> usize {
        lock(&self.state).purges
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        lock(&self.state).sessions.len()
    }
}

impl Drop for ReferenceServer {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

struct Connection {
    uaid: Option<String>,
    outbox: mpsc::UnboundedSender<Value>,
}

async fn serve_socket(state: Shared, stream: TcpStream) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (outbox, mut inbox) = mpsc::unbounded_channel();
    let mut conn = Connection { uaid: None, outbox };

    'conn: loop {
        tokio::select! {
            frame = ws.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break 'conn,
                    Some(Ok(_)) => continue,
                };
                let replies = handle_text(&state, &mut conn, &text);
                for reply in replies {
                    if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                        break 'conn;
                    }
                }
            }
            Some(push) = inbox.recv() => {
                if ws.send(Message::Text(push.to_string().into())).await.is_err() {
                    break 'conn;
                }
            }
        }
    }

    if let Some(uaid) = conn.uaid {
        if let Some(session) = lock(&state).sessions.get_mut(&uaid) {
            session.sender = None;
        }
    }
}

fn invalid(request: &Value) -> Value {
    let mut reply = request.as_object().cloned().unwrap_or_default();
    reply.insert("status".into(), json!(401));
    reply.insert("error".into(), json!(INVALID_COMMAND));
    Value::Object(reply)
}

fn reply_with(request: &Value, status: u16, extra: &[(&str, Value)]) -> Value {
    let mut reply = request.as_object().cloned().unwrap_or_else(Map::new);
    reply.insert("status".into(), json!(status));
    for (key, value) in extra {
        reply.insert((*key).to_owned(), value.clone());
    }
    Value::Object(reply)
}

impl Faults {
    fn accepts_identifier(&self, id: &str) -> bool {
        self.accept_oversized_ids || is_valid_identifier(id)
    }
}

fn channel_id<'a>(faults: &Faults, request: &'a Value) -> Option<&'a str> {
    request
        .get("channelID")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty() && faults.accepts_identifier(id))
}

fn notification(channel: &str, version: u64) -> Value {
    json!({
        "messageType": "notification",
        "updates": [{ "channelID": channel, "version": version }],
    })
}

fn handle_text(state: &Shared, conn: &mut Connection, text: &str) -> Vec<Value> {
    let Ok(request) = serde_json::from_str::<Value>(text) else {
        return vec![invalid(&Value::Null)];
    };
    if request.as_object().is_some_and(Map::is_empty) {
        return vec![json!({})];
    }
    let mut state = lock(state);
    match request.get("messageType").and_then(Value::as_str) {
        Some("hello") => vec![state.hello(conn, &request)],
        Some("register") => vec![state.register(conn, &request)],
        Some("unregister") => state.unregister(conn, &request),
        Some("ack") => vec![state.ack(conn, &request)],
        Some("ping") if state.faults.ping_error => vec![invalid(&request)],
        Some("ping") => vec![json!({ "messageType": "ping", "status": 200 })],
        Some("purge") => vec![state.purge(conn, &request)],
        _ => vec![invalid(&request)],
    }
}

impl State {
    fn hello(&mut self, conn: &mut Connection, request: &Value) -> Value {
        let Some(channels) = request.get("channelIDs").and_then(Value::as_array) else {
            return invalid(request);
        };
        let channels_valid = channels
            .iter()
            .all(|c| c.as_str().is_some_and(|c| self.faults.accepts_identifier(c)));
        let uaid = match request.get("uaid") {
            None => "",
            Some(Value::String(uaid)) => uaid.as_str(),
            Some(_) => return invalid(request),
        };
        if !channels_valid || !self.faults.accepts_identifier(uaid) {
            return invalid(request);
        }
        if uaid.chars().any(char::is_whitespace) {
            return reply_with(request, 503, &[]);
        }

        let unknown = !self.sessions.contains_key(uaid) && !channels.is_empty();
        let assigned = if (uaid.is_empty() && !self.faults.keep_empty_uaid)
            || (unknown && !self.faults.keep_unknown_uaid)
        {
            Ulid::new().to_string()
        } else {
            uaid.to_owned()
        };

        let session = self.sessions.entry(assigned.clone()).or_default();
        session.sender = Some(conn.outbox.clone());
        conn.uaid = Some(assigned.clone());
        reply_with(request, 200, &[("uaid", json!(assigned))])
    }

    fn register(&mut self, conn: &mut Connection, request: &Value) -> Value {
        let uaid = match &conn.uaid {
            Some(uaid) => uaid.clone(),
            None if self.faults.register_without_hello => {
                let uaid = Ulid::new().to_string();
                self.sessions.entry(uaid.clone()).or_default().sender =
                    Some(conn.outbox.clone());
                conn.uaid = Some(uaid.clone());
                uaid
            }
            None => return invalid(request),
        };
        let Some(channel) = channel_id(&self.faults, request) else {
            return invalid(request);
        };

        let session = self.sessions.entry(uaid.clone()).or_default();
        if let Some(existing) = session.channels.get(channel) {
            if self.faults.duplicate_conflict {
                return reply_with(request, 409, &[]);
            }
            let endpoint = format!("{}/update/{}", self.http_base, existing.token);
            return reply_with(request, 200, &[("pushEndpoint", json!(endpoint))]);
        }

        let token = Ulid::new().to_string();
        session.channels.insert(
            channel.to_owned(),
            Channel {
                token: token.clone(),
                pending: None,
            },
        );
        self.endpoints
            .insert(token.clone(), (uaid, channel.to_owned()));
        let endpoint = format!("{}/update/{token}", self.http_base);
        reply_with(request, 200, &[("pushEndpoint", json!(endpoint))])
    }

    fn unregister(&mut self, conn: &Connection, request: &Value) -> Vec<Value> {
        let (Some(uaid), Some(channel)) = (&conn.uaid, channel_id(&self.faults, request)) else {
            return vec![invalid(request)];
        };
        let removed = self
            .sessions
            .get_mut(uaid)
            .and_then(|session| session.channels.remove(channel));

        let Some(removed) = removed else {
            if self.faults.strict_unregister {
                return vec![invalid(request)];
            }
            return vec![reply_with(request, 200, &[])];
        };
        self.endpoints.remove(&removed.token);

        let mut replies = vec![reply_with(request, 200, &[])];
        if self.faults.redeliver_unacked {
            if let Some(version) = removed.pending {
                replies.push(notification(channel, version));
            }
        }
        replies
    }

    fn reject_ack(&self, request: &Value) -> Value {
        if self.faults.ack_drops_fields {
            return json!({ "messageType": "ack", "status": 401, "error": INVALID_COMMAND });
        }
        invalid(request)
    }

    fn ack(&mut self, conn: &Connection, request: &Value) -> Value {
        let Some(uaid) = &conn.uaid else {
            return self.reject_ack(request);
        };
        let Some(updates) = request.get("updates").and_then(Value::as_array) else {
            return invalid(request);
        };
        let Some(session) = self.sessions.get_mut(uaid) else {
            return invalid(request);
        };
        let mut all_known = true;
        for update in updates {
            let channel = update.get("channelID").and_then(Value::as_str);
            match channel.and_then(|c| session.channels.get_mut(c)) {
                Some(registered) => registered.pending = None,
                None => all_known = false,
            }
        }
        if all_known || self.faults.ack_reports_success {
            reply_with(request, 200, &[])
        } else {
            self.reject_ack(request)
        }
    }

    fn purge(&mut self, conn: &mut Connection, request: &Value) -> Value {
        self.purges += 1;
        if let Some(uaid) = conn.uaid.take() {
            if let Some(session) = self.sessions.remove(&uaid) {
                for channel in session.channels.values() {
                    self.endpoints.remove(&channel.token);
                }
            }
        }
        reply_with(request, 200, &[])
    }

    fn publish(&mut self, token: &str, version: u64) -> bool {
        let Some((uaid, channel)) = self.endpoints.get(token).cloned() else {
            return false;
        };
        let Some(session) = self.sessions.get_mut(&uaid) else {
            return false;
        };
        if let Some(registered) = session.channels.get_mut(&channel) {
            registered.pending = Some(version);
        }
        if self.faults.drop_notifications {
            return true;
        }
        if let Some(sender) = &session.sender {
            let _ = sender.send(notification(&channel, version));
        }
        true
    }
}

fn parse_version(body: &[u8]) -> Option<u64> {
    std::str::from_utf8(body)
        .ok()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("version="))
        .and_then(|v| v.trim().parse().ok())
}

async fn handle_publish(
    state: Shared,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let status = match (req.method(), req.uri().path().strip_prefix("/update/")) {
        (&Method::PUT, Some(token)) => {
            let token = token.to_owned();
            let body = req
                .into_body()
                .collect()
                .await
                .map(|collected| collected.to_bytes())
                .unwrap_or_default();
            match parse_version(&body) {
                Some(version) if lock(&state).publish(&token, version) => StatusCode::OK,
                Some(_) => StatusCode::NOT_FOUND,
                None => StatusCode::BAD_REQUEST,
            }
        }
        (_, Some(_)) => StatusCode::METHOD_NOT_ALLOWED,
        (_, None) => StatusCode::NOT_FOUND,
    };

    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    Ok(response)
}

