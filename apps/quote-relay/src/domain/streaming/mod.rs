//! Streaming Types
//!
//! Symbols, normalized quotes, and the downstream client protocol. These
//! types are transport-agnostic: the upstream adapter produces JSON
//! payloads and the WebSocket layer only moves serialized frames.

mod protocol;
mod quote;
mod symbol;

pub use protocol::{ClientMessage, ControlMessage, OutboundMessage};
pub use quote::{MessageError, RelayMessage};
pub use symbol::{MAX_SYMBOL_LEN, Symbol, SymbolError};
