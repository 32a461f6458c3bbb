//! ES WebSocket session manager: single-active-socket-per-subscriber
//! invariant, plus the reliable-emit half of the disaster delivery engine
//! (emit "disaster", race the client's ack callback against `T_xmit`).

use crate::repo::{self, disaster_transmit, external_system};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Auth { system_name: String, api_key: String },
    Ack { log_id: i64, status: String, message: Option<String> },
    Heartbeat,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage<'a> {
    Disaster { log_id: i64, identifier: &'a str, raw_message: &'a str },
    HeartbeatAck { status: &'static str },
    AuthError { status: u16, message: &'a str },
}

pub enum AckOutcome {
    Ack,
    Nack,
}

struct EmitRequest {
    log_id: i64,
    identifier: String,
    raw_message: String,
    ack_tx: oneshot::Sender<AckOutcome>,
}

struct Registration {
    conn_id: Uuid,
    emit_tx: mpsc::Sender<EmitRequest>,
    close_tx: oneshot::Sender<()>,
}

#[derive(Clone)]
pub struct SubscriberRegistry {
    pool: PgPool,
    subscribers: Arc<RwLock<HashMap<i64, Registration>>>,
}

impl SubscriberRegistry {
    pub fn new(pool: PgPool) -> Self {
        SubscriberRegistry { pool, subscribers: Arc::new(RwLock::new(HashMap::new())) }
    }

    pub fn pool_handle(&self) -> PgPool {
        self.pool.clone()
    }

    /// Re-reads the row, applies the reliable-emit state machine, and drives
    /// one send attempt to completion (or to `PENDING` if nothing is
    /// connected / the ack never arrives).
    pub async fn reliable_emit(&self, log_id: i64, max_retries: u32, t_xmit: Duration) {
        let Ok(Some(row)) = disaster_transmit::find(&self.pool, log_id).await else { return };
        if row.status == "SUCCESS" || row.status == "FAILED" {
            return;
        }
        if row.retry_count as u32 >= max_retries {
            let _ = disaster_transmit::mark_failed(&self.pool, log_id).await;
            return;
        }

        let emit_tx = {
            let subs = self.subscribers.read().await;
            subs.get(&row.external_system_id).map(|r| r.emit_tx.clone())
        };
        let Some(emit_tx) = emit_tx else {
            if row.status == "SENT" {
                let _ = disaster_transmit::mark_pending(&self.pool, log_id).await;
            }
            return;
        };

        if disaster_transmit::mark_sent(&self.pool, log_id).await.is_err() {
            return;
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        if emit_tx
            .send(EmitRequest { log_id, identifier: row.identifier.clone(), raw_message: row.raw_message.clone(), ack_tx })
            .await
            .is_err()
        {
            let _ = disaster_transmit::mark_pending(&self.pool, log_id).await;
            return;
        }

        let outcome = tokio::select! {
            result = ack_rx => result.unwrap_or(AckOutcome::Nack),
            _ = tokio::time::sleep(t_xmit) => AckOutcome::Nack,
        };

        match outcome {
            AckOutcome::Ack => {
                let _ = disaster_transmit::mark_success(&self.pool, log_id).await;
            }
            AckOutcome::Nack => self.process_failure(log_id, max_retries).await,
        }
    }

    async fn process_failure(&self, log_id: i64, max_retries: u32) {
        let Ok(Some(row)) = disaster_transmit::find(&self.pool, log_id).await else { return };
        if row.status == "SUCCESS" || row.status == "FAILED" {
            return;
        }
        match disaster_transmit::bump_retry(&self.pool, log_id, max_retries).await {
            Ok(true) => {
                let _ = disaster_transmit::mark_failed(&self.pool, log_id).await;
            }
            Ok(false) => {
                let _ = disaster_transmit::mark_pending(&self.pool, log_id).await;
            }
            Err(_) => {}
        }
    }

    async fn register(
        &self,
        external_system_id: i64,
        system_name: &str,
        conn_id: Uuid,
        emit_tx: mpsc::Sender<EmitRequest>,
        close_tx: oneshot::Sender<()>,
    ) {
        let mut subs = self.subscribers.write().await;
        if let Some(old) = subs.remove(&external_system_id) {
            info!(external_system_id, "replacing active subscriber socket");
            let _ = old.close_tx.send(());
        }
        subs.insert(external_system_id, Registration { conn_id, emit_tx, close_tx });
        drop(subs);
        repo::log_connection_event(&self.pool, "CONNECTED", Some(system_name)).await;
    }

    /// Only removes the entry if it still belongs to `conn_id` — protects
    /// against the race where a newer socket already replaced this one.
    async fn unregister_if_current(&self, external_system_id: i64, system_name: &str, conn_id: Uuid) {
        let mut subs = self.subscribers.write().await;
        let removed = if subs.get(&external_system_id).map(|r| r.conn_id) == Some(conn_id) {
            subs.remove(&external_system_id);
            true
        } else {
            false
        };
        drop(subs);
        if removed {
            repo::log_connection_event(&self.pool, "DISCONNECTED", Some(system_name)).await;
        }
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(registry): State<SubscriberRegistry>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

async fn handle_socket(mut socket: WebSocket, registry: SubscriberRegistry) {
    let hello = match tokio::time::timeout(HELLO_TIMEOUT, socket.recv()).await {
        Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str::<ClientMessage>(&text).ok(),
        _ => None,
    };

    let Some(ClientMessage::Auth { system_name, api_key }) = hello else {
        send_auth_error(&mut socket, "expected auth as the first message").await;
        return;
    };

    let system = match external_system::authenticate(&registry.pool, &system_name, &api_key).await {
        Ok(Some(system)) => system,
        Ok(None) => {
            send_auth_error(&mut socket, "unknown system_name/api_key").await;
            return;
        }
        Err(e) => {
            warn!(error = %e, "auth lookup failed");
            send_auth_error(&mut socket, "internal error").await;
            return;
        }
    };

    let conn_id = Uuid::new_v4();
    let (emit_tx, mut emit_rx) = mpsc::channel::<EmitRequest>(32);
    let (close_tx, mut close_rx) = oneshot::channel::<()>();
    registry.register(system.id, &system.system_name, conn_id, emit_tx, close_tx).await;
    info!(external_system_id = system.id, system_name = %system.system_name, "ws subscriber connected");

    let mut pending: HashMap<i64, oneshot::Sender<AckOutcome>> = HashMap::new();

    loop {
        tokio::select! {
            _ = &mut close_rx => {
                info!(external_system_id = system.id, "forcibly closed, replaced by newer connection");
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Ack { log_id, status, .. }) => {
                                if let Some(tx) = pending.remove(&log_id) {
                                    let outcome = if status == "ack" { AckOutcome::Ack } else { AckOutcome::Nack };
                                    let _ = tx.send(outcome);
                                }
                            }
                            Ok(ClientMessage::Heartbeat) => {
                                let ack = ServerMessage::HeartbeatAck { status: "ok" };
                                if let Ok(json) = serde_json::to_string(&ack) {
                                    if socket.send(Message::Text(json.into())).await.is_err() { break; }
                                }
                            }
                            Ok(ClientMessage::Auth { .. }) => {}
                            Err(e) => warn!(external_system_id = system.id, error = %e, "invalid WS message"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => { warn!(external_system_id = system.id, error = %e, "WS error"); break; }
                    Some(Ok(_)) => {}
                }
            }
            Some(req) = emit_rx.recv() => {
                let payload = ServerMessage::Disaster { log_id: req.log_id, identifier: &req.identifier, raw_message: &req.raw_message };
                match serde_json::to_string(&payload) {
                    Ok(json) if socket.send(Message::Text(json.into())).await.is_ok() => {
                        pending.insert(req.log_id, req.ack_tx);
                    }
                    _ => {
                        let _ = req.ack_tx.send(AckOutcome::Nack);
                    }
                }
            }
        }
    }

    registry.unregister_if_current(system.id, &system.system_name, conn_id).await;
    info!(external_system_id = system.id, "ws subscriber disconnected");
}

async fn send_auth_error(socket: &mut WebSocket, message: &str) {
    let err = ServerMessage::AuthError { status: 401, message };
    if let Ok(json) = serde_json::to_string(&err) {
        let _ = socket.send(Message::Text(json.into())).await;
    }
    let _ = socket.send(Message::Close(None)).await;
}
