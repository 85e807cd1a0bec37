//! Configuration for the simulation core.
//!
//! Provides the [`SimConfig`] struct consumed by the orchestrator and its
//! components. Users construct it manually; no config-file parsing
//! dependencies are introduced.
//!
//! # Example
//!
//! ```rust
//! use civicsim::config::SimConfig;
//!
//! let config = SimConfig::default();
//! assert_eq!(config.default_model, "amazon/nova-micro-v1");
//! assert_eq!(config.provider_for("anthropic/claude-3-haiku"), "anthropic");
//! ```

use std::path::PathBuf;
use std::time::Duration;

/// Models the simulation is allowed to route to.
pub const ALLOWED_MODELS: [&str; 3] = [
    "amazon/nova-micro-v1",      // default - speed/cost balanced
    "anthropic/claude-3-haiku",  // deep reasoning fallback
    "gemini-2.0-flash-lite-001", // flash tasks (explicit only)
];

/// Default model when no per-agent override applies.
pub const DEFAULT_MODEL: &str = "amazon/nova-micro-v1";

/// Global configuration for a [`SimulationOrchestrator`](crate::orchestrator::SimulationOrchestrator).
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Model used when no per-agent override applies.
    pub default_model: String,
    /// Upper bound on concurrent upstream sends within one reactor fan-out.
    /// Defaults to the agent catalog size, so one request saturates the
    /// upstream's per-session quota exactly once.
    pub max_concurrency: usize,
    /// Directory for the durable job store. `None` keeps jobs in memory only.
    pub job_dir: Option<PathBuf>,
    /// Directory for the durable fingerprint cache. `None` keeps entries in
    /// memory only.
    pub cache_dir: Option<PathBuf>,
    /// Directory for the per-session world-event ledger (only used when the
    /// crate is built with the `ledger` feature).
    pub ledger_dir: Option<PathBuf>,
    /// Time-to-live for job records.
    pub job_ttl: Duration,
    /// Time-to-live for fingerprint cache entries.
    pub cache_ttl: Duration,
    /// Maximum cached entries retained per scenario.
    pub cache_max_per_scenario: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            max_concurrency: crate::catalog::agent_count(),
            job_dir: None,
            cache_dir: None,
            ledger_dir: None,
            job_ttl: Duration::from_secs(3600),
            cache_ttl: Duration::from_secs(7 * 24 * 3600),
            cache_max_per_scenario: 1000,
        }
    }
}

impl SimConfig {
    /// Check if a model is in the allowed set.
    pub fn validate_model(&self, model: &str) -> bool {
        ALLOWED_MODELS.iter().any(|m| *m == model)
    }

    /// Provider name for a model, `"unknown"` if unmapped.
    pub fn provider_for(&self, model: &str) -> &'static str {
        provider_for(model)
    }
}

/// Fixed model → provider table.
pub fn provider_for(model: &str) -> &'static str {
    match model {
        "amazon/nova-micro-v1" => "amazon",
        "anthropic/claude-3-haiku" => "anthropic",
        "gemini-2.0-flash-lite-001" => "google",
        _ => "unknown",
    }
}
