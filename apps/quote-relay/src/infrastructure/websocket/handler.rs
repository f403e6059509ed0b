//! WebSocket connection handler.
//!
//! Upgrades `GET /ws/market/{symbol}` and runs one reader loop plus one
//! writer task per client. Protocol handling and cleanup live in
//! [`ClientSession`].

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use futures_util::stream::SplitSink;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::connection::WsConnection;
use crate::application::services::{ClientSession, Relay, SessionFlow};
use crate::domain::streaming::{OutboundMessage, Symbol};
use crate::domain::subscription::{DownstreamConnection, SharedConnection};

/// How long the writer may take to flush after the reader exits.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Shared state for the WebSocket routes.
#[derive(Debug)]
pub struct WsState {
    /// The relay core.
    pub relay: Arc<Relay>,
    /// Outbound queue size per client.
    pub client_queue_capacity: usize,
}

impl WsState {
    /// Create route state.
    #[must_use]
    pub const fn new(relay: Arc<Relay>, client_queue_capacity: usize) -> Self {
        Self {
            relay,
            client_queue_capacity,
        }
    }
}

/// WebSocket upgrade handler.
///
/// Invalid symbols are rejected with 400 before the upgrade.
pub async fn ws_handler(
    Path(raw): Path<String>,
    State(state): State<Arc<WsState>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let symbol = match Symbol::parse(&raw) {
        Ok(symbol) => symbol,
        Err(e) => {
            tracing::warn!(symbol = %raw, error = %e, "Rejecting WebSocket with invalid symbol");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    match ws {
        Ok(ws) => ws
            .on_upgrade(move |socket| handle_socket(socket, symbol, state))
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

/// Handles one upgraded connection.
async fn handle_socket(socket: WebSocket, symbol: Symbol, state: Arc<WsState>) {
    let (conn, rx) = WsConnection::new(state.client_queue_capacity);
    let closed = conn.closed_token();
    let conn_id = conn.id();
    let conn: SharedConnection = Arc::new(conn);

    let (sender, mut receiver) = socket.split();
    let mut writer = tokio::spawn(write_loop(sender, rx, closed.clone()));

    let Some(mut session) = ClientSession::open(Arc::clone(&state.relay), Arc::clone(&conn), symbol)
    else {
        tracing::info!(connection = %conn_id, "Relay is shut down, refusing client");
        let _ = writer.await;
        return;
    };

    loop {
        tokio::select! {
            () = closed.cancelled() => {
                tracing::debug!(connection = %conn_id, "Connection closed by server");
                break;
            }
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if session.handle_text(text.as_str()) == SessionFlow::Close {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        tracing::debug!(
                            connection = %conn_id,
                            len = data.len(),
                            "Ignoring binary frame"
                        );
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // axum answers pings itself
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Err(e)) => {
                        tracing::debug!(connection = %conn_id, error = %e, "WebSocket read error");
                        break;
                    }
                }
            }
        }
    }

    drop(session);
    conn.close();

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
}

/// Drains the outbound queue into the socket until closed.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<OutboundMessage>,
    closed: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            message = rx.recv() => {
                let Some(message) = message else { break };
                match message.to_json() {
                    Ok(json) => {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "Failed to serialize outbound message"),
                }
            }
            () = closed.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }
    // a dead socket must stop fan-out to this client
    closed.cancel();
}
