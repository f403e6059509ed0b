//! Upstream Feed Supervision
//!
//! Provider-agnostic lifecycle for the single upstream session:
//!
//! - `reconnect`: exponential backoff policy
//! - `supervisor`: the [`FeedClient`] task driving a `FeedConnector`

mod reconnect;
mod supervisor;

pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use supervisor::{FeedClient, FeedClientConfig};
