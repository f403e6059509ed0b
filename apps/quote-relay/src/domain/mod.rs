//! Domain Layer - Core relay types.
//!
//! Symbols, quotes, the client protocol, the subscription registry, and
//! the feed lifecycle record. Nothing here performs I/O.

/// Feed lifecycle state.
pub mod feed;

/// Symbols, quotes, and protocol frames.
pub mod streaming;

/// Symbol to connection registry.
pub mod subscription;
