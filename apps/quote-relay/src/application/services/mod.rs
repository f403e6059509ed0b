//! Application Services
//!
//! - `Relay`: registry and upstream feed orchestration, fan-out
//! - `ClientSession`: per-client protocol with guaranteed cleanup

mod relay;
mod session;

pub use relay::{FanoutReport, Relay, RelayStats};
pub use session::{ClientSession, SessionFlow};
