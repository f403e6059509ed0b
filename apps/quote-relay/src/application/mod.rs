//! Application Layer - Use cases and port definitions.
//!
//! The relay core and the client session, plus the ports they use to reach
//! the upstream provider.

/// Port interfaces for the upstream feed and the demand set.
pub mod ports;

/// Relay and client session services.
pub mod services;
