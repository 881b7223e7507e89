//! Live job updates over WebSocket.
//!
//! A connection to `/ws/:job_id` first receives the job's current snapshot,
//! then every later change in order. The server closes the socket after the
//! terminal snapshot has been sent.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use vidup_models::{JobId, WsMessage};

use crate::metrics;
use crate::security::is_valid_job_id;
use crate::state::AppState;

/// Global counter for active WebSocket connections.
static ACTIVE_WS_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

/// Configuration for WebSocket backpressure.
const WS_SEND_BUFFER_SIZE: usize = 32;
const WS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

const ENDPOINT: &str = "job";

/// Send a WebSocket message with backpressure handling.
async fn send_ws_message(tx: &mpsc::Sender<Message>, msg: &WsMessage) -> bool {
    let json = match serde_json::to_string(msg) {
        Ok(j) => j,
        Err(e) => {
            warn!("Failed to serialize WebSocket message: {}", e);
            return false;
        }
    };
    match tx.try_send(Message::Text(json)) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(msg)) => {
            debug!("WebSocket send buffer full, applying backpressure");
            tx.send(msg).await.is_ok()
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

fn close_message(reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code::NORMAL,
        reason: reason.into(),
    }))
}

/// GET /ws/:job_id
pub async fn ws_job(ws: WebSocketUpgrade, State(state): State<AppState>, Path(job_id): Path<String>) -> impl IntoResponse {
    let count = ACTIVE_WS_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
    metrics::set_ws_active_connections(count);
    metrics::record_ws_connection(ENDPOINT);

    ws.on_upgrade(move |socket| async move {
        handle_job_socket(socket, state, job_id).await;
        let count = ACTIVE_WS_CONNECTIONS.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_ws_active_connections(count);
    })
}

async fn handle_job_socket(socket: WebSocket, state: AppState, job_id: String) {
    let (ws_sender, mut receiver) = socket.split();

    // Bounded channel so a slow client only stalls its own connection
    let (tx, mut rx) = mpsc::channel::<Message>(WS_SEND_BUFFER_SIZE);
    let send_task = tokio::spawn(async move {
        let mut ws_sender = ws_sender;
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let id = JobId::from_string(job_id);
    let subscription = if is_valid_job_id(id.as_str()) {
        state.orchestrator.subscribe(&id).ok()
    } else {
        None
    };

    let Some(mut subscription) = subscription else {
        debug!(job_id = %id, "WebSocket for unknown job");
        if send_ws_message(&tx, &WsMessage::error("Job not found")).await {
            metrics::record_ws_message_sent(ENDPOINT, "error");
        }
        let _ = tx.send(close_message("Job not found")).await;
        drop(tx);
        let _ = send_task.await;
        return;
    };

    info!(job_id = %id, "WebSocket subscribed");
    let mut heartbeat = interval(WS_HEARTBEAT_INTERVAL);
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            snapshot = subscription.recv() => {
                let Some(snapshot) = snapshot else {
                    debug!(job_id = %id, "Subscription ended");
                    break;
                };
                last_activity = Instant::now();
                let terminal = snapshot.is_terminal();

                if !send_ws_message(&tx, &WsMessage::Status(snapshot)).await {
                    debug!(job_id = %id, "WebSocket send failed, client disconnected");
                    break;
                }
                metrics::record_ws_message_sent(ENDPOINT, "status");

                if terminal {
                    let _ = tx.send(close_message("Job finished")).await;
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if last_activity.elapsed() > WS_HEARTBEAT_INTERVAL / 2
                    && tx.send(Message::Ping(Vec::new())).await.is_err()
                {
                    warn!(job_id = %id, "Heartbeat failed, client disconnected");
                    break;
                }
            }
            client_msg = receiver.next() => {
                match client_msg {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        metrics::record_ws_message_received(ENDPOINT);
                        if !send_ws_message(&tx, &WsMessage::pong(text)).await {
                            break;
                        }
                        metrics::record_ws_message_sent(ENDPOINT, "pong");
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_activity = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(job_id = %id, "Client closed connection");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(job_id = %id, "WebSocket receive error: {}", e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    // Unsubscribe before waiting on the writer
    drop(subscription);
    drop(tx);
    let _ = send_task.await;
    info!(job_id = %id, "WebSocket closed");
}
