//! Downstream WebSocket Transport
//!
//! Serves `GET /ws/market/{symbol}`. Each client gets a bounded outbound
//! queue drained by a writer task; the reader loop feeds a `ClientSession`.

mod connection;
mod handler;
mod server;

pub use connection::WsConnection;
pub use handler::{WsState, ws_handler};
pub use server::{RelayServer, RelayServerError, router};
