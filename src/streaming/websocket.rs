// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! WebSocket push channel for the dashboard

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::core::{EventBus, Worker};

/// What the push channel asks of the application
#[async_trait]
pub trait PushContext: Send + Sync {
    /// Snapshot sent to every client on connect
    async fn status(&self) -> Value;

    /// Live sensor data, `None` when no adapter is connected
    async fn current_data(&self) -> Option<Value>;
}

/// Accepts dashboard clients and forwards bus events to them
pub struct PushServer {
    context: Arc<dyn PushContext>,
    bus: Arc<EventBus>,
    max_clients: usize,
    clients: Arc<RwLock<HashMap<String, SocketAddr>>>,
}

impl PushServer {
    pub fn new(context: Arc<dyn PushContext>, bus: Arc<EventBus>) -> Self {
        Self {
            context,
            bus,
            max_clients: 64,
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Run the accept loop on `listener` until the worker is stopped
    pub fn serve(self: Arc<Self>, listener: TcpListener) -> Worker {
        Worker::spawn("push-server", move |mut shutdown| async move {
            if let Ok(addr) = listener.local_addr() {
                info!("Push channel listening on ws://{}", addr);
            }

            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, addr)) => {
                            if self.clients.read().await.len() >= self.max_clients {
                                warn!("Max clients reached, rejecting connection from {}", addr);
                                continue;
                            }
                            tokio::spawn(self.clone().handle_connection(stream, addr));
                        }
                        Err(e) => error!("Accept error: {}", e),
                    },
                    _ = shutdown.recv() => {
                        info!("Push channel shutting down");
                        break;
                    }
                }
            }
        })
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let client_id = uuid::Uuid::new_v4().to_string();

        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                error!("WebSocket handshake failed for {}: {}", addr, e);
                return;
            }
        };

        info!("Dashboard client connected from {} (id: {})", addr, client_id);
        self.clients.write().await.insert(client_id.clone(), addr);

        let mut readings = self.bus.subscribe_readings();
        let mut alerts = self.bus.subscribe_alerts();
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let status = event("status", self.context.status().await);
        if let Err(e) = ws_sender.send(Message::Text(status)).await {
            warn!("Failed to send status to {}: {}", addr, e);
        }

        loop {
            let outgoing = tokio::select! {
                msg = ws_receiver.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!("Received from {}: {}", addr, text);
                        self.reply_to(&text).await
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_sender.send(Message::Pong(data)).await;
                        None
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    Some(Ok(_)) => None,
                },
                reading = readings.recv() => match reading {
                    Ok(reading) => serde_json::to_value(&reading).ok().map(|v| event("reading", v)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("Client {} skipped {} readings", addr, n);
                        None
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                alert = alerts.recv() => match alert {
                    Ok(alert) => serde_json::to_value(&alert).ok().map(|v| event("alert", v)),
                    Err(broadcast::error::RecvError::Lagged(_)) => None,
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };

            if let Some(text) = outgoing {
                if let Err(e) = ws_sender.send(Message::Text(text)).await {
                    warn!("Failed to send to {}: {}", addr, e);
                    break;
                }
            }
        }

        self.clients.write().await.remove(&client_id);
        info!("Dashboard client {} disconnected", addr);
    }

    async fn reply_to(&self, text: &str) -> Option<String> {
        let cmd: Value = serde_json::from_str(text).ok()?;
        match cmd.get("type").and_then(Value::as_str)? {
            "ping" => Some(json!({ "type": "pong" }).to_string()),
            "request_data" => {
                let data = match self.context.current_data().await {
                    Some(data) => data,
                    None => json!({ "error": "Not connected to vehicle" }),
                };
                Some(event("current_data", data))
            }
            other => {
                debug!("Ignoring unknown command '{}'", other);
                None
            }
        }
    }
}

fn event(kind: &str, data: Value) -> String {
    json!({ "type": kind, "data": data }).to_string()
}
