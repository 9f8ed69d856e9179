//! Realtime change feed over websocket
//!
//! Speaks the Phoenix channel protocol used by the hosted realtime service:
//! one socket per feed, one channel (`phx_join` / `phx_leave`) per
//! subscription, `postgres_changes` configuration for row events and a
//! heartbeat on the `phoenix` topic.

use crate::sphere::backend::{ChangeFeed, Topic};
use crate::sphere::live::event::ChangeEvent;
use crate::sphere::live::subscription::Subscription;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::interval;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

/// Websocket write half
pub type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// Websocket read half
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

const HEARTBEAT_SECS: u64 = 25;

struct Route {
    table: String,
    topic: Topic,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

struct Connection {
    writer: Mutex<WsWriter>,
    routes: std::sync::Mutex<HashMap<String, Route>>,
}

impl Connection {
    async fn send(&self, frame: Value) -> Result<()> {
        let mut w = self.writer.lock().await;
        w.send(WsMessage::Text(frame.to_string()))
            .await
            .context("websocket send failed")
    }

    fn dispatch(&self, channel: &str, data: &Value) {
        let routes = match self.routes.lock() {
            Ok(r) => r,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(route) = routes.get(channel) else {
            debug!("[Realtime] event for unknown channel {}", channel);
            return;
        };
        let Some(event) = ChangeEvent::from_payload(&route.table, data) else {
            return;
        };
        if !route.topic.event.matches(event.op) {
            return;
        }
        if route.tx.send(event).is_err() {
            debug!("[Realtime] receiver for {} already gone", channel);
        }
    }
}

/// Realtime client, connects lazily on the first subscription
pub struct RealtimeFeed {
    socket_url: String,
    access_token: RwLock<Option<String>>,
    conn: Arc<Mutex<Option<Arc<Connection>>>>,
    next_ref: Arc<AtomicU64>,
}

impl RealtimeFeed {
    /// `base_url` is the platform URL (`https://<project>.example.co`)
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        let ws_base = if let Some(rest) = base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base_url.to_string()
        };
        Self {
            socket_url: format!(
                "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
                ws_base.trim_end_matches('/'),
                anon_key
            ),
            access_token: RwLock::new(None),
            conn: Arc::new(Mutex::new(None)),
            next_ref: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Token sent with new channel joins; row-level security applies to it
    pub async fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write().await = token;
    }

    fn next_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::Relaxed).to_string()
    }

    async fn connection(&self) -> Result<Arc<Connection>> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        info!("[Realtime] 🔗 connecting");
        let (ws_stream, response) = connect_async(&self.socket_url)
            .await
            .context("realtime connect failed")?;
        info!("[Realtime] ✅ connected, status: {}", response.status());

        let (write, read) = ws_stream.split();
        let conn = Arc::new(Connection {
            writer: Mutex::new(write),
            routes: std::sync::Mutex::new(HashMap::new()),
        });
        *slot = Some(conn.clone());

        let heartbeat_conn = Arc::downgrade(&conn);
        let refs = self.next_ref.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(HEARTBEAT_SECS));
            loop {
                ticker.tick().await;
                let Some(conn) = heartbeat_conn.upgrade() else {
                    break;
                };
                let frame = json!({
                    "topic": "phoenix",
                    "event": "heartbeat",
                    "payload": {},
                    "ref": refs.fetch_add(1, Ordering::Relaxed).to_string(),
                });
                if conn.send(frame).await.is_err() {
                    break;
                }
            }
        });

        let reader_conn = conn.clone();
        let slot_handle = self.conn.clone();
        tokio::spawn(async move {
            handle_frames(read, &reader_conn).await;
            // dropping the routes closes every subscriber's stream
            if let Ok(mut routes) = reader_conn.routes.lock() {
                routes.clear();
            }
            let mut slot = slot_handle.lock().await;
            if slot
                .as_ref()
                .map(|c| Arc::ptr_eq(c, &reader_conn))
                .unwrap_or(false)
            {
                *slot = None;
            }
        });

        Ok(conn)
    }
}

async fn handle_frames(mut read: WsReader, conn: &Connection) {
    while let Some(msg_result) = read.next().await {
        match msg_result {
            Ok(WsMessage::Text(text)) => {
                let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                    warn!("[Realtime] unparseable frame: {}", text);
                    continue;
                };
                let event = frame.get("event").and_then(Value::as_str).unwrap_or("");
                let channel = frame.get("topic").and_then(Value::as_str).unwrap_or("");
                match event {
                    "postgres_changes" => {
                        if let Some(data) = frame.pointer("/payload/data") {
                            conn.dispatch(channel, data);
                        }
                    }
                    "phx_reply" => {
                        let status = frame
                            .pointer("/payload/status")
                            .and_then(Value::as_str)
                            .unwrap_or("");
                        if status != "ok" {
                            warn!("[Realtime] {} replied {}: {}", channel, status, text);
                        }
                    }
                    "phx_error" | "phx_close" => {
                        warn!("[Realtime] channel {} {}", channel, event);
                    }
                    _ => {}
                }
            }
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {}
            Ok(WsMessage::Close(frame)) => {
                warn!("[Realtime] 👋 connection closed: {:?}", frame);
                break;
            }
            Err(e) => {
                error!("[Realtime] websocket error: {}", e);
                break;
            }
            _ => {}
        }
    }
}

#[async_trait]
impl ChangeFeed for RealtimeFeed {
    async fn subscribe(&self, topic: Topic) -> Result<Subscription> {
        let conn = self.connection().await?;
        let id = self.next_ref.fetch_add(1, Ordering::Relaxed);
        let channel = format!("realtime:{}:{}", topic.table, id);

        let mut change = json!({
            "event": topic.event.as_str(),
            "schema": "public",
            "table": topic.table,
        });
        if let Some(expr) = topic.filter_expr() {
            change["filter"] = Value::String(expr);
        }
        let mut payload = json!({ "config": { "postgres_changes": [change] } });
        if let Some(token) = self.access_token.read().await.clone() {
            payload["access_token"] = Value::String(token);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut routes) = conn.routes.lock() {
            routes.insert(
                channel.clone(),
                Route {
                    table: topic.table.clone(),
                    topic: topic.clone(),
                    tx,
                },
            );
        }

        let join = json!({
            "topic": channel,
            "event": "phx_join",
            "payload": payload,
            "ref": self.next_ref(),
        });
        if let Err(e) = conn.send(join).await {
            if let Ok(mut routes) = conn.routes.lock() {
                routes.remove(&channel);
            }
            return Err(e);
        }
        info!("[Realtime] 📡 joined {} ({})", channel, topic.event.as_str());

        let leave_ref = self.next_ref();
        let release_conn = conn.clone();
        let release_channel = channel.clone();
        Ok(Subscription::new(id, topic.table, rx, move || {
            if let Ok(mut routes) = release_conn.routes.lock() {
                routes.remove(&release_channel);
            }
            let frame = json!({
                "topic": release_channel,
                "event": "phx_leave",
                "payload": {},
                "ref": leave_ref,
            });
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = release_conn.send(frame).await {
                        debug!("[Realtime] leave not sent: {}", e);
                    }
                });
            }
        }))
    }
}
