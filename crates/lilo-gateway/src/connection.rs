//! WebSocket connection lifecycle: read loop, send loop, keepalive pings.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lilo_core::broadcaster::{JoinRequest, Membership};
use lilo_core::error::{LiloError, Result};
use lilo_core::protocol::{ClientMessage, CursorTarget, Outbox, ServerEvent};
use lilo_core::types::OperationPayload;

use crate::state::GatewayState;

/// What one socket knows about itself.
struct Session {
    conn_id: String,
    membership: Option<Membership>,
    outbox: Outbox,
}

impl Session {
    fn new(conn_id: String, outbox: Outbox) -> Self {
        Self {
            conn_id,
            membership: None,
            outbox,
        }
    }

    /// The current membership, or `None` with a debug line when the client
    /// talks before joining.
    fn member(&self, what: &str) -> Option<&Membership> {
        if self.membership.is_none() {
            debug!(conn_id = %self.conn_id, what, "Message before join, dropping");
        }
        self.membership.as_ref()
    }

    async fn handle_text(&mut self, state: &GatewayState, text: &str) {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(conn_id = %self.conn_id, %e, "Invalid frame received");
                #[cfg(feature = "metrics")]
                crate::metrics::record_rejection("invalid_frame");
                self.send_error(format!("Invalid message: {e}"));
                return;
            }
        };
        if let Err(e) = self.dispatch(state, message).await {
            self.report(e);
        }
    }

    async fn dispatch(&mut self, state: &GatewayState, message: ClientMessage) -> Result<()> {
        match message {
            ClientMessage::JoinRoom {
                room_id,
                user_name,
                user_color,
            } => {
                let request = JoinRequest {
                    room_id,
                    display_name: user_name,
                    color_tag: user_color,
                };
                let membership = state
                    .broadcaster
                    .join(self.membership.as_ref(), request, self.outbox.clone())
                    .await?;
                debug!(conn_id = %self.conn_id, room_id = %membership.room_id, user_id = %membership.user_id, "Connection joined");
                self.membership = Some(membership);
            }
            ClientMessage::LeaveRoom => {
                if let Some(membership) = self.membership.take() {
                    state.broadcaster.leave(&membership).await;
                }
            }
            ClientMessage::Operation { id, kind, data } => {
                let payload = OperationPayload::from_wire(&kind, data)?;
                let Some(membership) = self.member("operation") else {
                    return Ok(());
                };
                let operation = state.broadcaster.submit(membership, id, payload).await?;
                debug!(conn_id = %self.conn_id, operation_id = %operation.id, "Operation accepted");
                #[cfg(feature = "metrics")]
                crate::metrics::record_operation(operation.payload.kind());
            }
            ClientMessage::CursorMove(CursorTarget(cursor)) => {
                if let Some(membership) = self.member("cursor-move") {
                    state.broadcaster.move_cursor(membership, cursor).await?;
                }
            }
            ClientMessage::Heartbeat => self.heartbeat(state).await?,
        }
        Ok(())
    }

    async fn heartbeat(&self, state: &GatewayState) -> Result<()> {
        match &self.membership {
            Some(membership) => state.broadcaster.heartbeat(membership).await,
            None => Ok(()),
        }
    }

    fn report(&mut self, err: LiloError) {
        #[cfg(feature = "metrics")]
        crate::metrics::record_rejection(err.kind());
        if err.is_silent() {
            debug!(conn_id = %self.conn_id, error = %err, "Dropping message");
            // The room no longer knows this connection, most likely after an
            // eviction. Forget the membership so a fresh join starts clean.
            if let Some(membership) = self.membership.take() {
                info!(conn_id = %self.conn_id, room_id = %membership.room_id, user_id = %membership.user_id, "Membership lapsed");
            }
            return;
        }
        warn!(conn_id = %self.conn_id, error = %err, "Rejected message");
        self.send_error(err.to_string());
    }

    fn send_error(&self, message: String) {
        let _ = self.outbox.send(Arc::new(ServerEvent::Error { message }));
    }
}

/// Handle a new WebSocket connection.
pub async fn handle_ws_connection(state: Arc<GatewayState>, ws: WebSocket) {
    let conn_id = Uuid::new_v4().to_string();
    let open = state.connection_opened();
    info!(conn_id = %conn_id, connections = open, "New WebSocket connection");
    #[cfg(feature = "metrics")]
    crate::metrics::record_ws_connect();

    let (ws_tx, mut ws_rx) = ws.split();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<Arc<ServerEvent>>();

    let send_task = tokio::spawn(send_loop(
        conn_id.clone(),
        ws_tx,
        event_rx,
        state.config.ping_interval(),
    ));

    let mut session = Session::new(conn_id.clone(), event_tx);

    while let Some(msg_result) = ws_rx.next().await {
        match msg_result {
            Ok(Message::Text(text)) => session.handle_text(&state, text.as_str()).await,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                if let Err(e) = session.heartbeat(&state).await {
                    session.report(e);
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(conn_id = %conn_id, "Binary frame received");
                session.send_error("Binary frames are not supported".into());
            }
            Ok(Message::Close(_)) => {
                debug!(conn_id = %conn_id, "Client requested close");
                break;
            }
            Err(e) => {
                warn!(conn_id = %conn_id, %e, "WebSocket error");
                break;
            }
        }
    }

    // Disconnect is an implicit leave.
    if let Some(membership) = session.membership.take() {
        state.broadcaster.leave(&membership).await;
    }
    send_task.abort();
    let open = state.connection_closed();
    #[cfg(feature = "metrics")]
    crate::metrics::record_ws_disconnect();
    info!(conn_id = %conn_id, connections = open, "WebSocket connection closed");
}

/// Encode outbox events as text frames and ping the peer on a fixed interval.
async fn send_loop(
    conn_id: String,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut event_rx: mpsc::UnboundedReceiver<Arc<ServerEvent>>,
    ping_interval: std::time::Duration,
) {
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&*event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(conn_id = %conn_id, event = event.name(), %e, "Failed to encode event");
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!(conn_id = %conn_id, "Send loop finished");
}
