//! Fan-out of one proposal to every agent in the catalog.
//!
//! For each agent the reactor lazily binds a per-agent thread (all hanging
//! off one reactor assistant per session), composes a prompt from the
//! agent's persona, the world-state snapshot, the proposal, and an optional
//! proximity hint, then issues one upstream call. Calls run in parallel,
//! bounded by [`SimConfig::max_concurrency`].
//!
//! Failure is contained per agent: an upstream error, a parse failure, or a
//! panicked task each degrade to a synthetic neutral reaction, so callers
//! always receive exactly one reaction per agent.
//!
//! Two entry points: [`AgentReactor::run_all`] awaits everything and returns
//! reactions in catalog order; [`AgentReactor::run_all_streaming`] invokes a
//! callback per completion, in the order the upstream answered.

use futures_util::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::aggregator::ZoneAggregator;
use crate::catalog::{self, AgentProfile};
use crate::config::SimConfig;
use crate::model::{
    normalize_string_list, strip_code_fences, truncate_chars, AffectedRegion, AgentOverridesMap,
    AgentReaction, DistanceBucket, Proposal, Stance, WorldStateSummary, ZoneEffect, ZoneSentiment,
    MAX_LIST_ITEMS, MAX_QUOTE_LEN,
};
use crate::session::SessionStore;
use crate::upstream::Upstream;

const REACTOR_ASSISTANT_NAME: &str = "CivicSim Agent";
const REACTOR_SYSTEM_PROMPT: &str = "You are a Kingston resident reacting to civic proposals. \
Respond in character with valid JSON only.";

/// Generates reactions from all agents in parallel.
pub struct AgentReactor {
    upstream: Arc<dyn Upstream>,
    sessions: Arc<SessionStore>,
    config: Arc<SimConfig>,
}

impl AgentReactor {
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

    /// React every agent and wait for all of them. The returned list has one
    /// entry per catalog agent, in catalog order.
    pub async fn run_all(
        &self,
        proposal: &Proposal,
        session_id: &str,
        vicinity: Option<&[AffectedRegion]>,
        world_state: Option<&WorldStateSummary>,
        overrides: Option<&AgentOverridesMap>,
    ) -> Vec<AgentReaction> {
        log::info!("[REACTOR] starting reactions for session={}", session_id);
        let handles = self.spawn_agent_tasks(proposal, session_id, vicinity, world_state, overrides);

        let mut reactions = Vec::with_capacity(handles.len());
        for (agent, handle) in handles {
            let reaction = match handle.await {
                Ok(reaction) => reaction,
                Err(e) => {
                    log::error!("[REACTOR] agent {} task failed: {}", agent.key, e);
                    Self::fallback_reaction(agent)
                }
            };
            reactions.push(reaction);
        }
        log::info!(
            "[REACTOR] completed {} reactions for session={}",
            reactions.len(),
            session_id
        );
        reactions
    }

    /// React every agent and surface each completion as it arrives, in
    /// upstream completion order. `on_complete` receives the reaction and the
    /// single-zone sentiment it induces. Returns all reactions in completion
    /// order.
    pub async fn run_all_streaming<F, Fut>(
        &self,
        proposal: &Proposal,
        session_id: &str,
        vicinity: Option<&[AffectedRegion]>,
        world_state: Option<&WorldStateSummary>,
        overrides: Option<&AgentOverridesMap>,
        mut on_complete: F,
    ) -> Vec<AgentReaction>
    where
        F: FnMut(AgentReaction, Option<ZoneSentiment>) -> Fut,
        Fut: Future<Output = ()>,
    {
        log::info!(
            "[REACTOR-PROGRESSIVE] starting reactions for session={}",
            session_id
        );
        let handles = self.spawn_agent_tasks(proposal, session_id, vicinity, world_state, overrides);

        let mut pending: FuturesUnordered<_> = handles
            .into_iter()
            .map(|(agent, handle)| async move {
                match handle.await {
                    Ok(reaction) => reaction,
                    Err(e) => {
                        log::error!("[REACTOR-PROGRESSIVE] agent {} task failed: {}", agent.key, e);
                        Self::fallback_reaction(agent)
                    }
                }
            })
            .collect();

        let mut reactions = Vec::new();
        while let Some(reaction) = pending.next().await {
            let sentiment = ZoneAggregator::zone_sentiment_for(&reaction);
            on_complete(reaction.clone(), sentiment).await;
            log::debug!(
                "[REACTOR-PROGRESSIVE] agent {} completed",
                reaction.agent_key
            );
            reactions.push(reaction);
        }
        log::info!(
            "[REACTOR-PROGRESSIVE] completed {} reactions for session={}",
            reactions.len(),
            session_id
        );
        reactions
    }

    /// Spawn one detached task per agent. Detached tasks run to completion
    /// even if the caller is dropped, so an upstream call that has already
    /// been issued is never orphaned mid-flight.
    fn spawn_agent_tasks(
        &self,
        proposal: &Proposal,
        session_id: &str,
        vicinity: Option<&[AffectedRegion]>,
        world_state: Option<&WorldStateSummary>,
        overrides: Option<&AgentOverridesMap>,
    ) -> Vec<(&'static AgentProfile, JoinHandle<AgentReaction>)> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut handles = Vec::with_capacity(catalog::AGENTS.len());

        for agent in catalog::AGENTS.iter() {
            let agent_override = overrides.and_then(|map| map.get(agent.key));
            let persona_override = agent_override.and_then(|o| o.persona.clone());
            let model = agent_override
                .and_then(|o| o.model.clone())
                .unwrap_or_else(|| self.config.default_model.clone());
            let provider = self.config.provider_for(&model).to_string();

            let prompt =
                Self::assemble_prompt(agent, proposal, vicinity, world_state, persona_override);
            let title = proposal.title.clone();

            let upstream = Arc::clone(&self.upstream);
            let sessions = Arc::clone(&self.sessions);
            let semaphore = Arc::clone(&semaphore);
            let session_id = session_id.to_string();

            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("reactor semaphore closed");
                Self::react_one(upstream, sessions, agent, &session_id, &prompt, &model, &provider, &title)
                    .await
            });
            handles.push((agent, handle));
        }
        handles
    }

    /// One agent's full round-trip. Never fails: every error path degrades to
    /// the synthetic neutral reaction.
    async fn react_one(
        upstream: Arc<dyn Upstream>,
        sessions: Arc<SessionStore>,
        agent: &'static AgentProfile,
        session_id: &str,
        prompt: &str,
        model: &str,
        provider: &str,
        proposal_title: &str,
    ) -> AgentReaction {
        let (_, session_handle) = sessions.get_or_create(Some(session_id));

        // Bind the thread and record the call edge under the session lock.
        // Thread creation is create-once: the id is never overwritten.
        let (thread_id, send_lock) = {
            let mut session = session_handle.lock().await;

            if !session.agent_threads.contains_key(agent.key) {
                if session.reactor_assistant_id.is_none() {
                    match upstream
                        .create_assistant(REACTOR_ASSISTANT_NAME, REACTOR_SYSTEM_PROMPT)
                        .await
                    {
                        Ok(assistant_id) => {
                            log::info!("[REACTOR] created reactor assistant={}", assistant_id);
                            session.reactor_assistant_id = Some(assistant_id);
                        }
                        Err(e) => {
                            log::error!(
                                "[REACTOR] session={} agent={} assistant creation failed: {}",
                                session_id,
                                agent.key,
                                e
                            );
                            return Self::fallback_reaction(agent);
                        }
                    }
                }
                let assistant_id = session
                    .reactor_assistant_id
                    .clone()
                    .expect("assistant id set above");
                match upstream.create_thread(&assistant_id).await {
                    Ok(thread_id) => {
                        log::info!(
                            "[REACTOR] created thread={} for agent={} session={}",
                            thread_id,
                            agent.key,
                            session_id
                        );
                        session
                            .agent_threads
                            .insert(agent.key.to_string(), thread_id);
                    }
                    Err(e) => {
                        log::error!(
                            "[REACTOR] session={} agent={} thread creation failed: {}",
                            session_id,
                            agent.key,
                            e
                        );
                        return Self::fallback_reaction(agent);
                    }
                }
            }

            // Zero-delta edge so graph observers can see the consultation.
            session.update_relationship(
                "system",
                agent.key,
                0.0,
                "API call for proposal reaction",
                &format!(
                    "Requesting reaction to: {}...",
                    truncate_chars(proposal_title, 60)
                ),
                None,
                None,
            );

            let thread_id = session
                .agent_threads
                .get(agent.key)
                .cloned()
                .expect("thread id set above");
            let send_lock = session.send_lock(&thread_id);
            (thread_id, send_lock)
        };

        log::info!(
            "[REACTOR] session={} agent={} thread={} model={} content_len={}",
            session_id,
            agent.key,
            thread_id,
            model,
            prompt.len()
        );

        let _guard = send_lock.lock().await;
        match upstream.send_message(&thread_id, prompt, model, provider).await {
            Ok(reply) => {
                log::info!(
                    "[REACTOR] session={} agent={} response_len={}",
                    session_id,
                    agent.key,
                    reply.len()
                );
                Self::parse_reaction(&reply, agent)
            }
            Err(e) => {
                log::error!(
                    "[REACTOR] session={} agent={} upstream error: {}",
                    session_id,
                    agent.key,
                    e
                );
                Self::fallback_reaction(agent)
            }
        }
    }

    /// Compose the reaction prompt for one agent.
    fn assemble_prompt(
        agent: &AgentProfile,
        proposal: &Proposal,
        vicinity: Option<&[AffectedRegion]>,
        world_state: Option<&WorldStateSummary>,
        persona_override: Option<String>,
    ) -> String {
        let region_name = catalog::get_zone(agent.key)
            .map(|z| z.name)
            .unwrap_or(agent.key);

        let affected = if proposal.location.zone_ids.is_empty() {
            "Citywide".to_string()
        } else {
            let names: Vec<&str> = proposal
                .location
                .zone_ids
                .iter()
                .filter_map(|id| catalog::get_zone(id).map(|z| z.name))
                .collect();
            if names.is_empty() {
                "Citywide".to_string()
            } else {
                names.join(", ")
            }
        };

        let world_state_context = world_state
            .map(|ws| ws.to_prompt_context())
            .unwrap_or_default();

        let vicinity_context = vicinity
            .and_then(|regions| regions.iter().find(|r| r.zone_id == agent.key))
            .map(|region| match region.bucket {
                DistanceBucket::Near => format!(
                    "\nPROXIMITY: This proposal is VERY CLOSE to your region ({}). It will strongly affect your community.",
                    region_name
                ),
                DistanceBucket::Medium => format!(
                    "\nPROXIMITY: This proposal is at a MODERATE DISTANCE from your region ({}). It will have some effect on your community.",
                    region_name
                ),
                DistanceBucket::Far => format!(
                    "\nPROXIMITY: This proposal is FAR from your region ({}). It will have minimal direct effect on your community, but you may still have opinions.",
                    region_name
                ),
            })
            .unwrap_or_default();

        let persona = persona_override.unwrap_or_else(|| agent.persona.to_string());

        format!(
            "You are {}, the {} representing {}.\n\n\
SPEAKING STYLE: {}\n\n\
{}\n\
{}\n\
A civic proposal has been made in Kingston:\n\
TITLE: {}\n\
TYPE: {}\n\
SUMMARY: {}\n\
AFFECTED AREAS: {}\n\
{}\n\n\
Based on your persona, priorities, concerns, and your region's interests, provide your reaction.\n\
Consider any existing buildings, adopted policies, or relationship dynamics when forming your opinion.\n\n\
Respond with ONLY valid JSON:\n\
- stance: \"support\", \"oppose\", or \"neutral\"\n\
- intensity: 0.0 to 1.0 (how strongly you feel)\n\
- support_reasons: list of 0-3 reasons you support (if any)\n\
- concerns: list of 0-3 concerns you have\n\
- quote: your reaction in 25 words or less, in first person, in character, using your speaking style\n\
- what_would_change_my_mind: 1-3 things that would shift your position\n\
- zones_most_affected: list of zones you think are most impacted, each with zone_id, effect (support/oppose/neutral), intensity\n\
- proposed_amendments: 0-3 changes you'd propose to improve it\n\n\
Available zone_ids: {}\n\n\
Respond with JSON only.",
            agent.display_name,
            agent.role,
            region_name,
            agent.speaking_style,
            persona,
            world_state_context,
            proposal.title,
            proposal.kind.as_str(),
            proposal.summary,
            affected,
            vicinity_context,
            catalog::zone_id_list(),
        )
    }

    /// Normalize an upstream reply into a typed reaction. Parse failures
    /// degrade to the synthetic neutral reaction.
    fn parse_reaction(reply: &str, agent: &AgentProfile) -> AgentReaction {
        let text = strip_code_fences(reply);
        let data: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => {
                log::warn!("[REACTOR] JSON parse failed for {}", agent.key);
                return Self::fallback_reaction(agent);
            }
        };

        let stance = data
            .get("stance")
            .and_then(|v| v.as_str())
            .map(Stance::parse)
            .unwrap_or(Stance::Neutral);
        let intensity = data
            .get("intensity")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.5)
            .max(0.0)
            .min(1.0);

        let zone_effects: Vec<ZoneEffect> = data
            .get("zones_most_affected")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|z| {
                        let zone_id = z.get("zone_id")?.as_str()?.to_string();
                        Some(ZoneEffect {
                            zone_id,
                            effect: z
                                .get("effect")
                                .and_then(|v| v.as_str())
                                .map(Stance::parse)
                                .unwrap_or(Stance::Neutral),
                            intensity: z
                                .get("intensity")
                                .and_then(|v| v.as_f64())
                                .unwrap_or(0.5)
                                .max(0.0)
                                .min(1.0),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        AgentReaction {
            agent_key: agent.key.to_string(),
            agent_name: agent.display_name.to_string(),
            role: agent.role.to_string(),
            stance,
            intensity,
            support_reasons: normalize_string_list(data.get("support_reasons"), MAX_LIST_ITEMS),
            concerns: normalize_string_list(data.get("concerns"), MAX_LIST_ITEMS),
            quote: truncate_chars(
                data.get("quote").and_then(|v| v.as_str()).unwrap_or(""),
                MAX_QUOTE_LEN,
            ),
            what_would_change_my_mind: normalize_string_list(
                data.get("what_would_change_my_mind"),
                MAX_LIST_ITEMS,
            ),
            zone_effects,
            proposed_amendments: normalize_string_list(
                data.get("proposed_amendments"),
                MAX_LIST_ITEMS,
            ),
        }
    }

    /// The synthetic neutral reaction used when an agent cannot answer.
    fn fallback_reaction(agent: &AgentProfile) -> AgentReaction {
        AgentReaction {
            agent_key: agent.key.to_string(),
            agent_name: agent.display_name.to_string(),
            role: agent.role.to_string(),
            stance: Stance::Neutral,
            intensity: 0.5,
            support_reasons: Vec::new(),
            concerns: vec!["More details needed".to_string()],
            quote: "I need more information to form an opinion on this.".to_string(),
            what_would_change_my_mind: Vec::new(),
            zone_effects: Vec::new(),
            proposed_amendments: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> &'static AgentProfile {
        catalog::get_agent("downtown").unwrap()
    }

    #[test]
    fn test_parse_reaction_normalizes() {
        let reply = r#"```json
        {
            "stance": "support",
            "intensity": 1.7,
            "support_reasons": ["foot traffic", {"reason": "tourism"}, "foot traffic", "jobs", "more jobs"],
            "concerns": [],
            "quote": "This will bring customers downtown, and that keeps my staff employed through the winter months which is honestly the hardest season for every restaurant on Princess Street believe me.",
            "zones_most_affected": [
                {"zone_id": "downtown", "effect": "support", "intensity": 0.9},
                {"effect": "oppose"}
            ],
            "proposed_amendments": ["add parking"]
        }
        ```"#;
        let reaction = AgentReactor::parse_reaction(reply, agent());
        assert_eq!(reaction.stance, Stance::Support);
        assert_eq!(reaction.intensity, 1.0); // clamped
        assert_eq!(
            reaction.support_reasons,
            vec!["foot traffic", "tourism", "jobs"]
        ); // deduped + capped at 3
        assert!(reaction.quote.chars().count() <= MAX_QUOTE_LEN);
        assert_eq!(reaction.zone_effects.len(), 1); // entry without zone_id dropped
        assert_eq!(reaction.zone_effects[0].zone_id, "downtown");
    }

    #[test]
    fn test_parse_garbage_falls_back() {
        let reaction = AgentReactor::parse_reaction("total nonsense", agent());
        assert_eq!(reaction.stance, Stance::Neutral);
        assert_eq!(reaction.intensity, 0.5);
        assert_eq!(
            reaction.quote,
            "I need more information to form an opinion on this."
        );
        assert_eq!(reaction.agent_key, "downtown");
    }

    #[test]
    fn test_missing_stance_defaults_neutral() {
        let reaction = AgentReactor::parse_reaction(r#"{"intensity": 0.2}"#, agent());
        assert_eq!(reaction.stance, Stance::Neutral);
        assert_eq!(reaction.intensity, 0.2);
    }

    #[test]
    fn test_prompt_includes_proximity_bucket() {
        let proposal = Proposal {
            kind: crate::model::ProposalKind::Build,
            title: "Waterfront Park".to_string(),
            summary: "A park".to_string(),
            location: Default::default(),
            parameters: Default::default(),
            affected_regions: vec![],
            containing_zone: None,
        };
        let vicinity = vec![AffectedRegion {
            zone_id: "downtown".to_string(),
            distance_m: 120.0,
            bucket: DistanceBucket::Near,
            proximity_weight: 0.95,
        }];
        let prompt = AgentReactor::assemble_prompt(
            agent(),
            &proposal,
            Some(&vicinity),
            None,
            None,
        );
        assert!(prompt.contains("VERY CLOSE"));
        assert!(prompt.contains("Downtown Core"));
        assert!(prompt.contains("Available zone_ids"));

        // A far-away agent gets no proximity hint.
        let other = catalog::get_agent("north_end").unwrap();
        let prompt = AgentReactor::assemble_prompt(other, &proposal, Some(&vicinity), None, None);
        assert!(!prompt.contains("PROXIMITY"));
    }

    #[test]
    fn test_prompt_uses_persona_override() {
        let proposal = Proposal {
            kind: crate::model::ProposalKind::Policy,
            title: "T".to_string(),
            summary: "S".to_string(),
            location: Default::default(),
            parameters: Default::default(),
            affected_regions: vec![],
            containing_zone: None,
        };
        let prompt = AgentReactor::assemble_prompt(
            agent(),
            &proposal,
            None,
            None,
            Some("You are a contrarian who opposes everything.".to_string()),
        );
        assert!(prompt.contains("contrarian"));
        assert!(!prompt.contains("family restaurant"));
    }
}
