//! Downstream WebSocket connection handle.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::streaming::OutboundMessage;
use crate::domain::subscription::{ConnectionId, DownstreamConnection, SendError};

/// Handle to one client socket, shared with the registry.
///
/// Messages go through a bounded queue drained by the connection's writer
/// task; `send` never waits.
#[derive(Debug, Clone)]
pub struct WsConnection {
    id: ConnectionId,
    tx: mpsc::Sender<OutboundMessage>,
    closed: CancellationToken,
}

impl WsConnection {
    /// Create a handle and the receiving end of its outbound queue.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let conn = Self {
            id: ConnectionId::new(),
            tx,
            closed: CancellationToken::new(),
        };
        (conn, rx)
    }

    /// Token cancelled when the server closes this connection.
    #[must_use]
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl DownstreamConnection for WsConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, message: OutboundMessage) -> Result<(), SendError> {
        if self.closed.is_cancelled() {
            return Err(SendError::Closed);
        }
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    fn close(&self) {
        self.closed.cancel();
    }
}
