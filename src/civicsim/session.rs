//! Process-wide session registry.
//!
//! A session is a logical conversation. It owns every upstream handle the
//! simulation has created on its behalf (interpreter, moderator, per-agent and
//! per-pair threads), a directed relationship graph between agents, a
//! version-stamped world state, and a pointer to its most recent simulation
//! job.
//!
//! Assistant and thread ids are opaque strings owned by the upstream; the
//! store only caches them. Once stored they are never overwritten; a missing
//! entry means "not yet created", not an error.
//!
//! Concurrency model: the registry map is guarded by a `std::sync::RwLock`
//! held only for lookups, and each session record sits behind its own
//! `tokio::sync::Mutex`. Mutations to one session serialize on that session's
//! lock; concurrent sessions are fully independent. There is no global write
//! lock on the hot path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::model::{AdoptedPolicy, PlacedItem, RelationshipShift, WorldStateSummary};

/// Maximum characters kept from a DM message snippet on an edge.
const MAX_EDGE_MESSAGE_LEN: usize = 120;

/// A directed relationship between two agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub from_agent: String,
    pub to_agent: String,
    /// Clamped to `[-1, +1]` on every update.
    pub score: f64,
    pub last_reason: String,
    /// Last DM snippet, at most 120 characters.
    pub last_message: String,
    pub stance_before: Option<String>,
    pub stance_after: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl RelationshipEdge {
    fn new(from_agent: &str, to_agent: &str) -> Self {
        Self {
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
            score: 0.0,
            last_reason: String::new(),
            last_message: String::new(),
            stance_before: None,
            stance_after: None,
            timestamp: None,
        }
    }
}

/// Canonical world state for a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldState {
    /// Strictly monotonic; bumped on any mutation.
    pub version: u64,
    pub placed_items: Vec<PlacedItem>,
    pub adopted_policies: Vec<AdoptedPolicy>,
}

impl WorldState {
    /// Record a placed build and bump the version.
    pub fn add_placed_item(&mut self, item: PlacedItem) {
        self.placed_items.push(item);
        self.version += 1;
    }

    /// Record an adopted policy and bump the version.
    pub fn add_adopted_policy(&mut self, policy: AdoptedPolicy) {
        self.adopted_policies.push(policy);
        self.version += 1;
    }
}

/// Everything the process remembers about one session.
#[derive(Debug, Clone)]
pub struct SessionThreads {
    pub session_id: String,
    pub interpreter_assistant_id: Option<String>,
    pub interpreter_thread_id: Option<String>,
    /// One reactor assistant per session; agent threads hang off it.
    pub reactor_assistant_id: Option<String>,
    /// agent key → thread id. BTreeMap for stable iteration order.
    pub agent_threads: BTreeMap<String, String>,
    pub moderator_assistant_id: Option<String>,
    pub moderator_thread_id: Option<String>,
    /// One DM assistant per session; pair threads hang off it.
    pub dm_assistant_id: Option<String>,
    /// Canonical pair key `(min,max)` → thread id.
    pub dm_threads: BTreeMap<String, String>,
    /// Directed edges keyed `from->to`.
    pub relationships: BTreeMap<String, RelationshipEdge>,
    pub world_state: WorldState,
    /// Most recently started simulation job for this session.
    pub latest_job_id: Option<String>,
    /// Per-thread send guards. The upstream serializes messages within a
    /// thread, but the core still must not issue two concurrent calls on the
    /// same thread id; senders take this lock around each send.
    send_locks: BTreeMap<String, Arc<Mutex<()>>>,
}

impl SessionThreads {
    fn new(session_id: String) -> Self {
        Self {
            session_id,
            interpreter_assistant_id: None,
            interpreter_thread_id: None,
            reactor_assistant_id: None,
            agent_threads: BTreeMap::new(),
            moderator_assistant_id: None,
            moderator_thread_id: None,
            dm_assistant_id: None,
            dm_threads: BTreeMap::new(),
            relationships: BTreeMap::new(),
            world_state: WorldState::default(),
            latest_job_id: None,
            send_locks: BTreeMap::new(),
        }
    }

    /// Lock guarding sends on one thread. Created on first use; callers
    /// acquire it *after* releasing the session lock so unrelated threads
    /// stay concurrent.
    pub fn send_lock(&mut self, thread_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.send_locks
                .entry(thread_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Canonical key for a DM pair thread (order-insensitive).
    pub fn dm_thread_key(agent_a: &str, agent_b: &str) -> String {
        if agent_a <= agent_b {
            format!("({},{})", agent_a, agent_b)
        } else {
            format!("({},{})", agent_b, agent_a)
        }
    }

    /// Key for a directed relationship edge.
    pub fn relationship_key(from_agent: &str, to_agent: &str) -> String {
        format!("{}->{}", from_agent, to_agent)
    }

    /// Atomically apply a delta to the `from -> to` edge and return the new
    /// score. The edge is created at zero if absent; the score is clamped to
    /// `[-1, +1]`.
    pub fn update_relationship(
        &mut self,
        from_agent: &str,
        to_agent: &str,
        delta: f64,
        reason: &str,
        message: &str,
        stance_before: Option<&str>,
        stance_after: Option<&str>,
    ) -> f64 {
        let key = Self::relationship_key(from_agent, to_agent);
        let edge = self
            .relationships
            .entry(key)
            .or_insert_with(|| RelationshipEdge::new(from_agent, to_agent));

        edge.score = (edge.score + delta).max(-1.0).min(1.0);
        if !reason.is_empty() {
            edge.last_reason = reason.to_string();
        }
        if !message.is_empty() {
            edge.last_message = crate::model::truncate_chars(message, MAX_EDGE_MESSAGE_LEN);
        }
        if let Some(before) = stance_before {
            edge.stance_before = Some(before.to_string());
        }
        if let Some(after) = stance_after {
            edge.stance_after = Some(after.to_string());
        }
        edge.timestamp = Some(Utc::now());

        log::info!(
            "[SESSION] relationship {} -> {}: {:.2} ({})",
            from_agent,
            to_agent,
            edge.score,
            reason
        );
        edge.score
    }

    /// Current score of the `from -> to` edge, zero if absent.
    pub fn relationship_score(&self, from_agent: &str, to_agent: &str) -> f64 {
        self.relationships
            .get(&Self::relationship_key(from_agent, to_agent))
            .map(|e| e.score)
            .unwrap_or(0.0)
    }

    /// Top `n` edges by |score| descending.
    pub fn top_relationships(&self, n: usize) -> Vec<RelationshipEdge> {
        let mut edges: Vec<RelationshipEdge> = self.relationships.values().cloned().collect();
        edges.sort_by(|a, b| {
            b.score
                .abs()
                .partial_cmp(&a.score.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        edges.truncate(n);
        edges
    }

    /// Top `n` edges that have meaningfully shifted (|score| > 0.1).
    pub fn top_relationship_shifts(&self, n: usize) -> Vec<RelationshipEdge> {
        let mut edges: Vec<RelationshipEdge> = self
            .relationships
            .values()
            .filter(|e| e.score.abs() > 0.1)
            .cloned()
            .collect();
        edges.sort_by(|a, b| {
            b.score
                .abs()
                .partial_cmp(&a.score.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        edges.truncate(n);
        edges
    }

    /// All edges, for graph visualization.
    pub fn all_edges(&self) -> Vec<RelationshipEdge> {
        self.relationships.values().cloned().collect()
    }

    /// Build the world-state summary injected into agent prompts: the
    /// current snapshot plus the three largest relationship shifts.
    pub fn world_summary(&self) -> WorldStateSummary {
        WorldStateSummary {
            version: self.world_state.version,
            placed_items: self.world_state.placed_items.clone(),
            adopted_policies: self.world_state.adopted_policies.clone(),
            top_relationship_shifts: self
                .top_relationship_shifts(3)
                .into_iter()
                .map(|e| RelationshipShift {
                    from_agent: e.from_agent,
                    to_agent: e.to_agent,
                    score: e.score,
                    reason: e.last_reason,
                })
                .collect(),
        }
    }

    /// Every thread id the session has touched, labeled for logging.
    pub fn all_threads(&self) -> Vec<(String, String)> {
        let mut threads = Vec::new();
        if let Some(id) = &self.interpreter_thread_id {
            threads.push(("interpreter".to_string(), id.clone()));
        }
        if let Some(id) = &self.moderator_thread_id {
            threads.push(("moderator".to_string(), id.clone()));
        }
        for (agent_key, thread_id) in &self.agent_threads {
            threads.push((format!("agent:{}", agent_key), thread_id.clone()));
        }
        threads
    }
}

/// Thread-safe registry of sessions for the life of the process.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionThreads>>>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        log::info!("[SESSION] SessionStore initialized");
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Get an existing session or create an empty one. When `session_id` is
    /// `None`, a fresh UUID is assigned. Returns the id together with the
    /// session's lock handle.
    pub fn get_or_create(&self, session_id: Option<&str>) -> (String, Arc<Mutex<SessionThreads>>) {
        let id = match session_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let fresh = Uuid::new_v4().to_string();
                log::info!("[SESSION] Created new session_id={}", fresh);
                fresh
            }
        };

        {
            let sessions = self.sessions.read().expect("session map poisoned");
            if let Some(existing) = sessions.get(&id) {
                return (id, Arc::clone(existing));
            }
        }

        let mut sessions = self.sessions.write().expect("session map poisoned");
        let entry = sessions
            .entry(id.clone())
            .or_insert_with(|| {
                log::info!("[SESSION] Registered session_id={}", id);
                Arc::new(Mutex::new(SessionThreads::new(id.clone())))
            });
        (id, Arc::clone(entry))
    }

    /// Look up a session without creating it.
    pub fn get(&self, session_id: &str) -> Option<Arc<Mutex<SessionThreads>>> {
        self.sessions
            .read()
            .expect("session map poisoned")
            .get(session_id)
            .map(Arc::clone)
    }

    /// All active session ids.
    pub fn list_sessions(&self) -> Vec<String> {
        self.sessions
            .read()
            .expect("session map poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Diagnostic snapshot of one session.
    pub async fn debug_info(&self, session_id: &str) -> serde_json::Value {
        let handle = match self.get(session_id) {
            Some(handle) => handle,
            None => {
                return serde_json::json!({
                    "error": format!("Session {} not found", session_id),
                    "active_sessions": self.list_sessions(),
                })
            }
        };

        let session = handle.lock().await;
        let relationships: serde_json::Map<String, serde_json::Value> = session
            .relationships
            .iter()
            .map(|(k, e)| {
                (
                    k.clone(),
                    serde_json::json!({
                        "from": e.from_agent,
                        "to": e.to_agent,
                        "score": e.score,
                        "reason": e.last_reason,
                    }),
                )
            })
            .collect();

        let total_threads = session.interpreter_thread_id.iter().count()
            + session.moderator_thread_id.iter().count()
            + session.agent_threads.len()
            + session.dm_threads.len();

        serde_json::json!({
            "session_id": session.session_id,
            "interpreter_assistant_id": session.interpreter_assistant_id,
            "interpreter_thread_id": session.interpreter_thread_id,
            "reactor_assistant_id": session.reactor_assistant_id,
            "moderator_assistant_id": session.moderator_assistant_id,
            "moderator_thread_id": session.moderator_thread_id,
            "agent_threads": session.agent_threads,
            "dm_threads": session.dm_threads,
            "relationships": relationships,
            "world_state_version": session.world_state.version,
            "latest_job_id": session.latest_job_id,
            "total_threads": total_threads,
        })
    }

    /// Drop all sessions (for tests).
    pub fn clear(&self) {
        self.sessions.write().expect("session map poisoned").clear();
        log::info!("[SESSION] Cleared all sessions");
    }
}
