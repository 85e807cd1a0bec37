//! Content-addressed cache of completed simulation runs.
//!
//! A run is cache-eligible when its inputs can be fingerprinted: the scenario,
//! a canonical extraction of the proposal, the per-agent model map, the
//! per-agent persona hashes, and the simulation mode. Identical inputs always
//! produce the same 32-hex key, so a promotion can be answered from the cache
//! without touching the upstream.
//!
//! Key recipe:
//! 1. Extract the canonical proposal fields `{kind, title, summary,
//!    spatial_type, policy_type, latitude, longitude, radius}`, serialize as
//!    sorted-key JSON, MD5-hash, truncate to 16 hex chars.
//! 2. Build `{scenario_id, proposal_hash, agent_models, archetype_overrides,
//!    sim_mode}` with the maps flattened to sorted `[key, value]` pairs,
//!    serialize as sorted-key JSON, SHA-256 hash, truncate to 32 hex chars.
//!
//! Durability follows the append-only `.jsonl` idiom: one file per scenario,
//! one JSON record per line, last-write-wins per key on load, rewritten
//! compactly on invalidation. An in-memory index answers reads.

use chrono::{DateTime, Utc};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::model::{MultiAgentResponse, Proposal, ProposalKind};

/// Canonical proposal extraction used for fingerprinting.
///
/// Only these fields participate in the digest; proposals that differ solely
/// outside this set fingerprint identically.
pub fn canonical_proposal(proposal: &Proposal) -> serde_json::Value {
    let spatial_type = match proposal.kind {
        ProposalKind::Build => serde_json::to_value(&proposal.location.kind)
            .unwrap_or(serde_json::Value::Null),
        ProposalKind::Policy => serde_json::Value::Null,
    };
    let policy_type = match proposal.kind {
        ProposalKind::Policy => proposal
            .parameters
            .target_group
            .clone()
            .map(serde_json::Value::String)
            .unwrap_or(serde_json::Value::Null),
        ProposalKind::Build => serde_json::Value::Null,
    };
    let (latitude, longitude) = match &proposal.location.point {
        Some(p) => (serde_json::json!(p.latitude), serde_json::json!(p.longitude)),
        None => (serde_json::Value::Null, serde_json::Value::Null),
    };

    // serde_json's default map keeps keys sorted, so this serializes
    // canonically as-is.
    serde_json::json!({
        "kind": proposal.kind.as_str(),
        "title": proposal.title,
        "summary": proposal.summary,
        "spatial_type": spatial_type,
        "policy_type": policy_type,
        "latitude": latitude,
        "longitude": longitude,
        "radius": proposal.location.radius_km,
    })
}

/// 16-hex MD5 digest of the canonical proposal.
pub fn proposal_hash(proposal: &Proposal) -> String {
    let canonical = canonical_proposal(proposal).to_string();
    let digest = Md5::digest(canonical.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..16].to_string()
}

/// 16-hex SHA-256 digest of a persona text, used in the fingerprint payload.
pub fn persona_hash(persona: &str) -> String {
    let digest = Sha256::digest(persona.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..16].to_string()
}

/// Compute the 32-hex cache key for a run's inputs.
///
/// `agent_models` maps agent key → overridden model; `persona_hashes` maps
/// agent key → [`persona_hash`] of the overriding persona. Both contain only
/// the agents that actually carry an override.
pub fn compute_key(
    scenario_id: &str,
    proposal: &Proposal,
    agent_models: &BTreeMap<String, String>,
    persona_hashes: &BTreeMap<String, String>,
    sim_mode: &str,
) -> String {
    let models: Vec<[&str; 2]> = agent_models
        .iter()
        .map(|(k, v)| [k.as_str(), v.as_str()])
        .collect();
    let overrides: Vec<[&str; 2]> = persona_hashes
        .iter()
        .map(|(k, v)| [k.as_str(), v.as_str()])
        .collect();

    let payload = serde_json::json!({
        "scenario_id": scenario_id,
        "proposal_hash": proposal_hash(proposal),
        "agent_models": models,
        "archetype_overrides": overrides,
        "sim_mode": sim_mode,
    });

    let digest = Sha256::digest(payload.to_string().as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..32].to_string()
}

/// The inputs recorded alongside a cached result, for debugging and for
/// agent-filtered invalidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheInputs {
    pub proposal_hash: String,
    pub agent_models: BTreeMap<String, String>,
    pub archetype_overrides: BTreeMap<String, String>,
    pub sim_mode: String,
}

/// A completed run stored under its fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub scenario_id: String,
    pub key: String,
    pub inputs: CacheInputs,
    pub result: MultiAgentResponse,
    /// Short human-readable summary of the providers the run used.
    pub provider_mix: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    /// True when the entry's inputs reference the given agent in either
    /// override map.
    fn depends_on_agent(&self, agent_key: &str) -> bool {
        self.inputs.agent_models.contains_key(agent_key)
            || self.inputs.archetype_overrides.contains_key(agent_key)
    }
}

/// Read-first, write-on-miss fingerprint store.
pub struct FingerprintCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    dir: Option<PathBuf>,
    ttl: Duration,
    max_per_scenario: usize,
}

impl FingerprintCache {
    /// Open the cache, loading any scenario files found under `dir`. Passing
    /// `None` (or a directory that cannot be prepared) yields a memory-only
    /// cache; the degradation is logged once and never fails the caller.
    pub fn open(dir: Option<PathBuf>, ttl: Duration, max_per_scenario: usize) -> Self {
        let mut entries = HashMap::new();
        let dir = match dir {
            Some(path) => match fs::create_dir_all(&path) {
                Ok(()) => {
                    Self::load_dir(&path, &mut entries);
                    Some(path)
                }
                Err(e) => {
                    log::warn!(
                        "[CACHE] cannot prepare cache dir {:?}, running memory-only: {}",
                        path,
                        e
                    );
                    None
                }
            },
            None => None,
        };
        Self {
            entries: RwLock::new(entries),
            dir,
            ttl,
            max_per_scenario,
        }
    }

    fn load_dir(dir: &PathBuf, entries: &mut HashMap<String, CacheEntry>) {
        let read_dir = match fs::read_dir(dir) {
            Ok(rd) => rd,
            Err(e) => {
                log::warn!("[CACHE] cannot list cache dir {:?}: {}", dir, e);
                return;
            }
        };
        for file in read_dir.flatten() {
            let path = file.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let reader = match fs::File::open(&path) {
                Ok(f) => BufReader::new(f),
                Err(e) => {
                    log::warn!("[CACHE] cannot open {:?}: {}", path, e);
                    continue;
                }
            };
            for line in reader.lines() {
                let line = match line {
                    Ok(l) => l,
                    Err(_) => break,
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<CacheEntry>(&line) {
                    // Later lines win: the file is append-only.
                    Ok(entry) => {
                        entries.insert(entry.key.clone(), entry);
                    }
                    Err(e) => log::warn!("[CACHE] skipping corrupt line in {:?}: {}", path, e),
                }
            }
        }
        log::info!("[CACHE] loaded {} cached runs", entries.len());
    }

    fn scenario_file(&self, scenario_id: &str) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|d| d.join(format!("{}.jsonl", scenario_id)))
    }

    /// Look up by key. Expired entries read as misses.
    pub async fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if let Ok(age) = Utc::now().signed_duration_since(entry.updated_at).to_std() {
            if age > self.ttl {
                log::debug!("[CACHE] key {} expired", key);
                return None;
            }
        }
        Some(entry.clone())
    }

    /// Store a completed run. Idempotent by key: re-storing refreshes
    /// `updated_at` and the payload but never duplicates.
    pub async fn store(&self, mut entry: CacheEntry) {
        entry.updated_at = Utc::now();
        let scenario_id = entry.scenario_id.clone();

        {
            let mut entries = self.entries.write().await;
            entries.insert(entry.key.clone(), entry.clone());

            // Enforce the per-scenario cap by evicting the oldest entries.
            let mut scenario_keys: Vec<(String, DateTime<Utc>)> = entries
                .values()
                .filter(|e| e.scenario_id == scenario_id)
                .map(|e| (e.key.clone(), e.updated_at))
                .collect();
            if scenario_keys.len() > self.max_per_scenario {
                scenario_keys.sort_by_key(|(_, at)| *at);
                let excess = scenario_keys.len() - self.max_per_scenario;
                for (key, _) in scenario_keys.into_iter().take(excess) {
                    entries.remove(&key);
                }
            }
        }

        if let Some(path) = self.scenario_file(&scenario_id) {
            let line = match serde_json::to_string(&entry) {
                Ok(l) => l,
                Err(e) => {
                    log::warn!("[CACHE] cannot serialize entry {}: {}", entry.key, e);
                    return;
                }
            };
            let appended = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .and_then(|mut f| writeln!(f, "{}", line));
            if let Err(e) = appended {
                // Write failures simply omit durability; the memory index
                // still serves the entry.
                log::warn!("[CACHE] write failed for {:?}: {}", path, e);
            }
        }
        log::info!("[CACHE] stored key={} scenario={}", entry.key, scenario_id);
    }

    /// Invalidate a scenario's entries. With an `agent_key`, only entries
    /// whose recorded inputs depend on that agent are removed. Returns the
    /// number of entries dropped.
    pub async fn invalidate(&self, scenario_id: &str, agent_key: Option<&str>) -> usize {
        let removed = {
            let mut entries = self.entries.write().await;
            let doomed: Vec<String> = entries
                .values()
                .filter(|e| {
                    e.scenario_id == scenario_id
                        && match agent_key {
                            Some(agent) => e.depends_on_agent(agent),
                            None => true,
                        }
                })
                .map(|e| e.key.clone())
                .collect();
            for key in &doomed {
                entries.remove(key);
            }
            doomed.len()
        };

        if removed > 0 {
            self.rewrite_scenario_file(scenario_id).await;
        }
        log::info!(
            "[CACHE] invalidated {} entries for scenario={} agent={:?}",
            removed,
            scenario_id,
            agent_key
        );
        removed
    }

    /// Compact the scenario's file down to the surviving entries.
    async fn rewrite_scenario_file(&self, scenario_id: &str) {
        let path = match self.scenario_file(scenario_id) {
            Some(p) => p,
            None => return,
        };
        let survivors: Vec<String> = {
            let entries = self.entries.read().await;
            entries
                .values()
                .filter(|e| e.scenario_id == scenario_id)
                .filter_map(|e| serde_json::to_string(e).ok())
                .collect()
        };
        let result = if survivors.is_empty() {
            match fs::remove_file(&path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            }
        } else {
            fs::write(&path, survivors.join("\n") + "\n")
        };
        if let Err(e) = result {
            log::warn!("[CACHE] compaction failed for {:?}: {}", path, e);
        }
    }

    /// Number of live entries (tests and diagnostics).
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
