//! Site side of the protocol
//!
//! - `control`: state channel and abort flag, also the site's notification endpoint
//! - `agent`: the loop that runs queued transactions under coordinator locks

pub mod agent;
pub mod control;

pub use agent::{AgentSettings, SiteAgent, SiteReport, TransactionOutcome};
pub use control::{SiteControl, SiteState};
