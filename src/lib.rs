// src/lib.rs

// Import the top-level `civicsim` module.
pub mod civicsim;

// Re-export the component modules at the crate root so callers write
// `civicsim::reactor::AgentReactor` instead of navigating the hierarchy.
pub use civicsim::{
    adopter, aggregator, catalog, config, dm, fingerprint, interpreter, job, model, moderator,
    orchestrator, reactor, session, upstream,
};

#[cfg(feature = "ledger")]
pub use civicsim::ledger;

// Re-exporting key items for easier external access.
pub use civicsim::aggregator::ZoneAggregator;
pub use civicsim::config::SimConfig;
pub use civicsim::model::{
    AgentReaction, InterpretResult, MultiAgentResponse, Proposal, SimError, Stance, Transcript,
    ZoneSentiment,
};
pub use civicsim::orchestrator::SimulationOrchestrator;
pub use civicsim::session::SessionStore;
pub use civicsim::upstream::{Upstream, UpstreamClient, UpstreamError};
