//! Per-session world-event ledger (cargo feature `ledger`).
//!
//! An append-only log of the events that shape a session's world: adopted
//! policies, adopted builds, and significant DM shifts. Events are persisted
//! as newline-delimited JSON: one event per line, one `.jsonl` file per
//! session. The world state can be reconstructed at any time by folding
//! the log in order; the version equals the number of events.
//!
//! Everything here is best-effort: storage failures are logged and
//! swallowed, and callers receive `None`/empty results so the in-memory
//! snapshot remains the source of truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use uuid::Uuid;

use crate::model::{AdoptedPolicy, PlacedItem, RelationshipShift, WorldStateSummary};

/// Kinds of world events the ledger records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEventType {
    PolicyAdopted,
    BuildAdopted,
    DmShift,
}

/// One entry in a session's event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub id: String,
    pub session_id: String,
    pub event_type: LedgerEventType,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Disk-backed, per-session, append-only event log.
pub struct SessionLedger {
    dir: PathBuf,
}

impl SessionLedger {
    /// Open a ledger rooted at `dir`. The directory is created lazily on
    /// first write, so construction never fails.
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn session_file(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", session_id))
    }

    /// Append an event. Returns the event id, or `None` on any storage
    /// failure (logged, never raised).
    pub fn write_event(
        &self,
        session_id: &str,
        event_type: LedgerEventType,
        payload: serde_json::Value,
    ) -> Option<String> {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            log::warn!("[LEDGER] cannot prepare dir {:?}: {}", self.dir, e);
            return None;
        }

        let event = LedgerEvent {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            event_type,
            payload,
            created_at: Utc::now(),
        };
        let line = match serde_json::to_string(&event) {
            Ok(l) => l,
            Err(e) => {
                log::warn!("[LEDGER] cannot serialize event: {}", e);
                return None;
            }
        };

        let path = self.session_file(session_id);
        let appended = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| writeln!(f, "{}", line));
        match appended {
            Ok(()) => {
                log::info!(
                    "[LEDGER] wrote {:?} for session={}",
                    event.event_type,
                    &session_id[..8.min(session_id.len())]
                );
                Some(event.id)
            }
            Err(e) => {
                log::warn!("[LEDGER] failed to write {:?}: {}", event.event_type, e);
                None
            }
        }
    }

    /// All events for a session in append order, optionally filtered by
    /// type. Empty on any failure.
    pub fn session_events(
        &self,
        session_id: &str,
        event_type: Option<LedgerEventType>,
    ) -> Vec<LedgerEvent> {
        let path = self.session_file(session_id);
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };

        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    log::warn!("[LEDGER] read error in {:?}: {}", path, e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LedgerEvent>(&line) {
                Ok(event) => {
                    if event_type.map(|t| t == event.event_type).unwrap_or(true) {
                        events.push(event);
                    }
                }
                Err(e) => log::warn!("[LEDGER] skipping corrupt line in {:?}: {}", path, e),
            }
        }
        events
    }

    /// Reconstruct the world-state summary by folding the session's events.
    /// `None` when the log is empty or unreadable; callers fall back to the
    /// in-memory snapshot.
    pub fn build_world_state(&self, session_id: &str) -> Option<WorldStateSummary> {
        let events = self.session_events(session_id, None);
        if events.is_empty() {
            return None;
        }

        let mut placed_items = Vec::new();
        let mut adopted_policies = Vec::new();
        let mut dm_shifts: Vec<RelationshipShift> = Vec::new();

        for event in &events {
            match event.event_type {
                LedgerEventType::BuildAdopted => {
                    match serde_json::from_value::<PlacedItem>(event.payload.clone()) {
                        Ok(item) => placed_items.push(item),
                        Err(e) => log::warn!("[LEDGER] bad build payload: {}", e),
                    }
                }
                LedgerEventType::PolicyAdopted => {
                    match serde_json::from_value::<AdoptedPolicy>(event.payload.clone()) {
                        Ok(policy) => adopted_policies.push(policy),
                        Err(e) => log::warn!("[LEDGER] bad policy payload: {}", e),
                    }
                }
                LedgerEventType::DmShift => {
                    match serde_json::from_value::<RelationshipShift>(event.payload.clone()) {
                        Ok(shift) => dm_shifts.push(shift),
                        Err(e) => log::warn!("[LEDGER] bad dm payload: {}", e),
                    }
                }
            }
        }

        dm_shifts.sort_by(|a, b| {
            b.score
                .abs()
                .partial_cmp(&a.score.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        dm_shifts.truncate(3);

        Some(WorldStateSummary {
            version: events.len() as u64,
            placed_items,
            adopted_policies,
            top_relationship_shifts: dm_shifts,
        })
    }

    /// Drop a session's log. Returns true on success.
    pub fn clear_session(&self, session_id: &str) -> bool {
        let path = self.session_file(session_id);
        match fs::remove_file(&path) {
            Ok(()) => {
                log::info!(
                    "[LEDGER] cleared session={}",
                    &session_id[..8.min(session_id.len())]
                );
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                log::warn!("[LEDGER] failed to clear {:?}: {}", path, e);
                false
            }
        }
    }
}
