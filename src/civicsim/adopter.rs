//! Persists decisions into every thread a session has touched.
//!
//! Adopting (or forcing) a proposal broadcasts a single formatted
//! "[DECISION RECORD]" message to the interpreter thread, the moderator
//! thread, and every agent thread, so each conversation recalls the outcome
//! in later runs. Per-thread failures are logged and skipped; the decision
//! counts as recorded if at least one thread accepted it. The session's world
//! state gains the placed build or adopted policy and bumps its version.

use std::sync::Arc;
use uuid::Uuid;

use crate::catalog;
use crate::config::SimConfig;
use crate::model::{
    AdoptResponse, AdoptedPolicy, DecisionKind, DecisionRecord, PlacedItem, ProposalKind,
    SimError,
};
use crate::session::SessionStore;
use crate::upstream::Upstream;

/// Records decisions across a session's threads and world state.
pub struct Adopter {
    upstream: Arc<dyn Upstream>,
    sessions: Arc<SessionStore>,
    config: Arc<SimConfig>,
}

impl Adopter {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        sessions: Arc<SessionStore>,
        config: Arc<SimConfig>,
    ) -> Self {
        Self {
            upstream,
            sessions,
            config,
        }
    }

    /// Broadcast the decision to every session thread and fold it into the
    /// world state.
    pub async fn adopt(
        &self,
        session_id: &str,
        record: &DecisionRecord,
    ) -> Result<AdoptResponse, SimError> {
        let session_handle = self
            .sessions
            .get(session_id)
            .ok_or_else(|| SimError::InvalidInput(format!("unknown session: {}", session_id)))?;

        let message = Self::format_record(record);
        let threads = {
            let mut session = session_handle.lock().await;
            let listed = session.all_threads();
            listed
                .into_iter()
                .map(|(label, thread_id)| {
                    let lock = session.send_lock(&thread_id);
                    (label, thread_id, lock)
                })
                .collect::<Vec<_>>()
        };

        let model = self.config.default_model.clone();
        let provider = self.config.provider_for(&model);
        let mut threads_updated = 0usize;
        for (label, thread_id, send_lock) in &threads {
            let _guard = send_lock.lock().await;
            match self
                .upstream
                .send_message(thread_id, &message, &model, provider)
                .await
            {
                Ok(_) => {
                    threads_updated += 1;
                    log::debug!("[ADOPTER] decision recorded on {}", label);
                }
                Err(e) => {
                    log::warn!("[ADOPTER] thread {} rejected decision record: {}", label, e);
                }
            }
        }
        log::info!(
            "[ADOPTER] session={} decision \"{}\" recorded on {}/{} threads",
            session_id,
            record.title,
            threads_updated,
            threads.len()
        );

        let outcome = match record.kind {
            DecisionKind::Adopted => "adopted",
            DecisionKind::Forced => "forced",
        };

        // World-state append + version bump.
        {
            let mut session = session_handle.lock().await;
            match record.proposal_kind {
                ProposalKind::Build => {
                    let region_name = record
                        .region_id
                        .as_deref()
                        .and_then(|id| catalog::get_zone(id).map(|z| z.name.to_string()));
                    session.world_state.add_placed_item(PlacedItem {
                        id: Uuid::new_v4().to_string(),
                        item_type: record
                            .item_type
                            .clone()
                            .unwrap_or_else(|| "build".to_string()),
                        title: record.title.clone(),
                        region_id: record.region_id.clone(),
                        region_name,
                        radius_km: 0.5,
                        emoji: "📍".to_string(),
                    });
                }
                ProposalKind::Policy => {
                    session.world_state.add_adopted_policy(AdoptedPolicy {
                        id: Uuid::new_v4().to_string(),
                        title: record.title.clone(),
                        summary: record.summary.clone(),
                        outcome: outcome.to_string(),
                        vote_pct: record.vote_pct,
                        timestamp: chrono::Utc::now(),
                    });
                }
            }
        }

        Ok(AdoptResponse {
            threads_updated,
            outcome: outcome.to_string(),
        })
    }

    /// The broadcast message every thread receives.
    fn format_record(record: &DecisionRecord) -> String {
        let verb = match record.kind {
            DecisionKind::Adopted => "ADOPTED",
            DecisionKind::Forced => "FORCED through",
        };
        let mut message = format!(
            "[DECISION RECORD] The proposal \"{}\" was {} with {}% support.\nSummary: {}\n",
            record.title, verb, record.vote_pct, record.summary,
        );
        if !record.key_quotes.is_empty() {
            message.push_str("Key voices from the debate:\n");
            for quote in record.key_quotes.iter().take(3) {
                message.push_str(&format!("- {}: \"{}\"\n", quote.agent_name, quote.quote));
            }
        }
        if !record.zone_shifts.is_empty() {
            let mut shifts: Vec<(&String, &f64)> = record.zone_shifts.iter().collect();
            shifts.sort_by(|a, b| a.0.cmp(b.0));
            let rendered: Vec<String> = shifts
                .iter()
                .map(|(zone, delta)| format!("{} {:+.2}", zone, delta))
                .collect();
            message.push_str(&format!("Zone sentiment shifts: {}\n", rendered.join(", ")));
        }
        message.push_str("This is now part of Kingston's history. Remember it in future discussions.");
        message
    }
}
