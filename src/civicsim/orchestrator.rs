//! Top-level simulation coordinator.
//!
//! Wires the interpreter, reactor, aggregator, moderator, messenger, and
//! adopter together over shared session, job, cache, and override stores.
//!
//! Two execution modes:
//!
//! - **Synchronous** ([`SimulationOrchestrator::simulate_sync`]): interpret →
//!   react → aggregate → moderate inline, returning the assembled
//!   [`MultiAgentResponse`].
//! - **Progressive** ([`SimulationOrchestrator::simulate_start`]): creates a
//!   [`SimulationJob`](crate::job::SimulationJob), returns its id
//!   immediately, and drives the same pipeline in a spawned background task
//!   that is the job's single writer, updating the store at every phase
//!   boundary and agent completion. The task runs to completion even if the
//!   caller goes away; pollers find the finished result via
//!   [`SimulationOrchestrator::simulate_status`].
//!
//! The orchestrator also owns the promotion surface (fingerprint cache), the
//! per-(scenario, agent) override table, and the session graph views. The
//! handle itself is cheap to clone; all state lives behind one shared inner
//! record.

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};

use crate::adopter::Adopter;
use crate::aggregator::ZoneAggregator;
use crate::catalog;
use crate::config::SimConfig;
use crate::dm::DirectMessenger;
use crate::fingerprint::{self, CacheEntry, CacheInputs, FingerprintCache};
use crate::interpreter::Interpreter;
use crate::job::{JobProgress, JobStatus, JobStore, SimulationJob, SimulationPhase};
#[cfg(feature = "ledger")]
use crate::ledger::{LedgerEventType, SessionLedger};
use crate::model::{
    ActiveCalls, AdoptResponse, AffectedRegion, AgentOverride, AgentOverridesMap, AgentReaction,
    DecisionRecord, DmResponse, GraphData, GraphEdge, GraphNode, InterpretResult,
    MultiAgentResponse, PromoteRequest, PromoteResponse, Proposal, Receipt, SimError,
    SimulateRequest, Stance, Transcript, WorldStateSummary, ZoneSentiment,
};
use crate::moderator::Moderator;
use crate::reactor::AgentReactor;
use crate::session::SessionStore;
use crate::upstream::Upstream;

/// Seconds after completion during which an agent counts as "recently
/// completed" in [`SimulationOrchestrator::active_calls`].
const RECENT_WINDOW_SECS: i64 = 5;

/// Coordinates the full multi-agent simulation pipeline.
///
/// Cloning the orchestrator clones a handle; every clone shares the same
/// sessions, jobs, cache, and overrides.
#[derive(Clone)]
pub struct SimulationOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<SimConfig>,
    sessions: Arc<SessionStore>,
    jobs: Arc<JobStore>,
    cache: FingerprintCache,
    /// scenario id → (agent key → override).
    overrides: RwLock<HashMap<String, AgentOverridesMap>>,
    interpreter: Interpreter,
    reactor: AgentReactor,
    moderator: Moderator,
    messenger: DirectMessenger,
    adopter: Adopter,
    #[cfg(feature = "ledger")]
    ledger: Option<SessionLedger>,
}

impl SimulationOrchestrator {
    /// Build an orchestrator over the given upstream and configuration.
    pub fn new(upstream: Arc<dyn Upstream>, config: SimConfig) -> Self {
        let config = Arc::new(config);
        let sessions = Arc::new(SessionStore::new());
        let jobs = Arc::new(JobStore::open(config.job_dir.clone(), config.job_ttl));
        let cache = FingerprintCache::open(
            config.cache_dir.clone(),
            config.cache_ttl,
            config.cache_max_per_scenario,
        );

        #[cfg(feature = "ledger")]
        let ledger = config.ledger_dir.clone().map(SessionLedger::new);

        let inner = Inner {
            interpreter: Interpreter::new(
                Arc::clone(&upstream),
                Arc::clone(&sessions),
                Arc::clone(&config),
            ),
            reactor: AgentReactor::new(
                Arc::clone(&upstream),
                Arc::clone(&sessions),
                Arc::clone(&config),
            ),
            moderator: Moderator::new(
                Arc::clone(&upstream),
                Arc::clone(&sessions),
                Arc::clone(&config),
            ),
            messenger: DirectMessenger::new(
                Arc::clone(&upstream),
                Arc::clone(&sessions),
                Arc::clone(&config),
            ),
            adopter: Adopter::new(Arc::clone(&upstream), Arc::clone(&sessions), Arc::clone(&config)),
            config,
            sessions,
            jobs,
            cache,
            overrides: RwLock::new(HashMap::new()),
            #[cfg(feature = "ledger")]
            ledger,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// The shared session store (graph endpoints and tests read through it).
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.inner.sessions
    }

    /// The job store backing progressive runs.
    pub fn jobs(&self) -> &Arc<JobStore> {
        &self.inner.jobs
    }

    /// Run the full pipeline inline and return the assembled response.
    pub async fn simulate_sync(
        &self,
        request: &SimulateRequest,
    ) -> Result<MultiAgentResponse, SimError> {
        self.inner.simulate_sync(request).await
    }

    /// Create a job for the request, record it as the session's latest, and
    /// drive the pipeline in a background task. Returns the job id.
    pub async fn simulate_start(&self, request: SimulateRequest) -> Result<String, SimError> {
        if request.message.trim().is_empty() {
            return Err(SimError::InvalidInput("message cannot be empty".to_string()));
        }
        let (session_id, session_handle) = self
            .inner
            .sessions
            .get_or_create(request.session_id.as_deref());

        let payload = serde_json::to_value(&request)
            .map_err(|e| SimError::Storage(format!("cannot serialize request: {}", e)))?;
        let job = self.inner.jobs.create_job(&session_id, payload).await;
        let job_id = job.job_id.clone();

        {
            let mut session = session_handle.lock().await;
            session.latest_job_id = Some(job_id.clone());
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.run_progressive(job, session_id, request).await;
        });

        Ok(job_id)
    }

    /// Poll a job. `None` for unknown or expired ids.
    pub async fn simulate_status(&self, job_id: &str) -> Option<serde_json::Value> {
        self.inner
            .jobs
            .get_job(job_id)
            .await
            .map(|job| job.status_response())
    }

    /// Run-and-cache for an already structured proposal. Read-first: a
    /// fingerprint hit returns the stored result without any upstream calls;
    /// a miss runs the pipeline and writes the entry back.
    pub async fn promote(&self, request: &PromoteRequest) -> Result<PromoteResponse, SimError> {
        self.inner.promote(request).await
    }

    /// Direct cache read by key.
    pub async fn cache_get(&self, key: &str) -> Option<(MultiAgentResponse, String)> {
        self.inner
            .cache
            .lookup(key)
            .await
            .map(|entry| (entry.result, entry.provider_mix))
    }

    /// Drop cached runs for a scenario, optionally only those that depended
    /// on one agent. Returns the number of entries removed.
    pub async fn invalidate_cache(&self, scenario_id: &str, agent_key: Option<&str>) -> usize {
        self.inner.cache.invalidate(scenario_id, agent_key).await
    }

    /// Current overrides for a scenario (empty map when none are set).
    pub async fn scenario_overrides(&self, scenario_id: &str) -> AgentOverridesMap {
        self.inner.scenario_overrides(scenario_id).await
    }

    /// One agent's override for a scenario.
    pub async fn get_override(&self, scenario_id: &str, agent_key: &str) -> Option<AgentOverride> {
        self.inner
            .overrides
            .read()
            .await
            .get(scenario_id)
            .and_then(|map| map.get(agent_key))
            .cloned()
    }

    /// Set an agent's model/persona override. Models are checked against the
    /// allow-list. Any set invalidates the scenario's cached runs.
    pub async fn set_override(
        &self,
        scenario_id: &str,
        agent_key: &str,
        value: AgentOverride,
    ) -> Result<(), SimError> {
        if catalog::get_agent(agent_key).is_none() {
            return Err(SimError::InvalidInput(format!(
                "unknown agent key: {}",
                agent_key
            )));
        }
        if let Some(model) = &value.model {
            if !self.inner.config.validate_model(model) {
                return Err(SimError::InvalidInput(format!(
                    "model not in allow-list: {}",
                    model
                )));
            }
        }

        {
            let mut overrides = self.inner.overrides.write().await;
            let scenario = overrides.entry(scenario_id.to_string()).or_default();
            if value.is_empty() {
                scenario.remove(agent_key);
            } else {
                scenario.insert(agent_key.to_string(), value);
            }
        }
        self.inner.cache.invalidate(scenario_id, None).await;
        Ok(())
    }

    /// Remove one agent's override. Invalidates the scenario's cached runs.
    pub async fn reset_override(&self, scenario_id: &str, agent_key: &str) -> Result<(), SimError> {
        if catalog::get_agent(agent_key).is_none() {
            return Err(SimError::InvalidInput(format!(
                "unknown agent key: {}",
                agent_key
            )));
        }
        {
            let mut overrides = self.inner.overrides.write().await;
            if let Some(scenario) = overrides.get_mut(scenario_id) {
                scenario.remove(agent_key);
            }
        }
        self.inner.cache.invalidate(scenario_id, None).await;
        Ok(())
    }

    /// Remove all of a scenario's overrides. Invalidates its cached runs.
    pub async fn reset_all_overrides(&self, scenario_id: &str) {
        self.inner.overrides.write().await.remove(scenario_id);
        self.inner.cache.invalidate(scenario_id, None).await;
    }

    /// Agent-to-agent direct message; see [`DirectMessenger`].
    pub async fn dm(
        &self,
        session_id: &str,
        from: &str,
        to: &str,
        message: &str,
        proposal_title: Option<&str>,
    ) -> Result<DmResponse, SimError> {
        let response = self
            .inner
            .messenger
            .send(session_id, from, to, message, proposal_title)
            .await?;

        #[cfg(feature = "ledger")]
        if response.stance_update.relationship_delta.abs() > 0.1 {
            if let Some(ledger) = &self.inner.ledger {
                let payload = serde_json::to_value(crate::model::RelationshipShift {
                    from_agent: to.to_string(),
                    to_agent: from.to_string(),
                    score: response.relationship_score,
                    reason: response.stance_update.reason.clone(),
                })
                .unwrap_or_default();
                ledger.write_event(session_id, LedgerEventType::DmShift, payload);
            }
        }

        Ok(response)
    }

    /// Record a decision across the session's threads; see [`Adopter`].
    pub async fn adopt(
        &self,
        session_id: &str,
        record: &DecisionRecord,
    ) -> Result<AdoptResponse, SimError> {
        let response = self.inner.adopter.adopt(session_id, record).await?;

        #[cfg(feature = "ledger")]
        if let Some(ledger) = &self.inner.ledger {
            if let Some(session_handle) = self.inner.sessions.get(session_id) {
                let session = session_handle.lock().await;
                match record.proposal_kind {
                    crate::model::ProposalKind::Build => {
                        if let Some(item) = session.world_state.placed_items.last() {
                            let payload = serde_json::to_value(item).unwrap_or_default();
                            ledger.write_event(session_id, LedgerEventType::BuildAdopted, payload);
                        }
                    }
                    crate::model::ProposalKind::Policy => {
                        if let Some(policy) = session.world_state.adopted_policies.last() {
                            let payload = serde_json::to_value(policy).unwrap_or_default();
                            ledger.write_event(session_id, LedgerEventType::PolicyAdopted, payload);
                        }
                    }
                }
            }
        }

        Ok(response)
    }

    /// Nodes and edges for the session graph: every agent, the three
    /// synthetic nodes, and all relationship edges (including the reactor's
    /// system → agent call edges).
    pub async fn graph_data(&self, session_id: &str) -> Result<GraphData, SimError> {
        let session_handle = self
            .inner
            .sessions
            .get(session_id)
            .ok_or_else(|| SimError::InvalidInput(format!("unknown session: {}", session_id)))?;

        let mut nodes: Vec<GraphNode> = catalog::AGENTS
            .iter()
            .map(|a| GraphNode {
                id: a.key.to_string(),
                name: a.display_name.to_string(),
                role: a.role.to_string(),
            })
            .collect();
        nodes.push(GraphNode {
            id: "townhall".to_string(),
            name: "Town Hall".to_string(),
            role: "venue".to_string(),
        });
        nodes.push(GraphNode {
            id: "user".to_string(),
            name: "You".to_string(),
            role: "user".to_string(),
        });
        nodes.push(GraphNode {
            id: "system".to_string(),
            name: "System".to_string(),
            role: "system".to_string(),
        });

        let edges: Vec<GraphEdge> = {
            let session = session_handle.lock().await;
            session
                .all_edges()
                .into_iter()
                .map(|e| GraphEdge {
                    from: e.from_agent,
                    to: e.to_agent,
                    score: e.score,
                    reason: e.last_reason,
                    last_message: e.last_message,
                    timestamp: e.timestamp,
                })
                .collect()
        };

        Ok(GraphData { nodes, edges })
    }

    /// Which agents are in flight for the session's latest job, and which
    /// finished within the last five seconds.
    pub async fn active_calls(&self, session_id: &str) -> Result<ActiveCalls, SimError> {
        let session_handle = self
            .inner
            .sessions
            .get(session_id)
            .ok_or_else(|| SimError::InvalidInput(format!("unknown session: {}", session_id)))?;

        let latest_job_id = {
            let session = session_handle.lock().await;
            session.latest_job_id.clone()
        };
        let job = match latest_job_id {
            Some(job_id) => self.inner.jobs.get_job(&job_id).await,
            None => None,
        };
        let job = match job {
            Some(job) => job,
            None => {
                return Ok(ActiveCalls {
                    active: Vec::new(),
                    recently_completed: Vec::new(),
                })
            }
        };

        let now = Utc::now();
        let recently_completed: Vec<String> = job
            .partial_reactions
            .iter()
            .filter(|r| {
                now.signed_duration_since(r.completed_at).num_seconds() <= RECENT_WINDOW_SECS
            })
            .map(|r| r.reaction.agent_key.clone())
            .collect();

        let active = if job.status == JobStatus::Running
            && job.phase == SimulationPhase::AgentReactions
        {
            let completed: Vec<&str> = job
                .partial_reactions
                .iter()
                .map(|r| r.reaction.agent_key.as_str())
                .collect();
            catalog::AGENTS
                .iter()
                .filter(|a| !completed.contains(&a.key))
                .map(|a| a.key.to_string())
                .collect()
        } else {
            Vec::new()
        };

        Ok(ActiveCalls {
            active,
            recently_completed,
        })
    }
}

impl Inner {
    async fn simulate_sync(
        &self,
        request: &SimulateRequest,
    ) -> Result<MultiAgentResponse, SimError> {
        if request.message.trim().is_empty() {
            return Err(SimError::InvalidInput("message cannot be empty".to_string()));
        }
        let started = Instant::now();
        let (session_id, _) = self.sessions.get_or_create(request.session_id.as_deref());

        let interpretation = self
            .interpreter
            .interpret(&request.message, &session_id)
            .await?;

        if !interpretation.ok {
            return Ok(Self::clarification_response(
                &session_id,
                &interpretation,
                started,
            ));
        }
        let proposal = match interpretation.proposal {
            Some(p) => p,
            None => {
                return Ok(Self::clarification_response(
                    &session_id,
                    &InterpretResult::failed("The proposal could not be structured."),
                    started,
                ))
            }
        };

        let overrides = match &request.scenario_id {
            Some(scenario) => self.scenario_overrides(scenario).await,
            None => AgentOverridesMap::new(),
        };
        let vicinity = Self::pick_vicinity(request.vicinity.as_deref(), &proposal);

        let (reactions, zones, transcript) = self
            .run_stages(&session_id, &proposal, vicinity, &overrides)
            .await;

        Ok(Self::assemble_response(
            &session_id,
            Some(proposal),
            reactions,
            zones,
            transcript,
            started,
        ))
    }

    /// The background task body: owns the job record for its lifetime and is
    /// its only writer.
    async fn run_progressive(
        &self,
        job: SimulationJob,
        session_id: String,
        request: SimulateRequest,
    ) {
        let started = Instant::now();
        let progress = Arc::new(Mutex::new(JobProgress::new(job, Arc::clone(&self.jobs))));

        {
            let mut p = progress.lock().await;
            p.start(catalog::agent_count()).await;
            p.set_phase(SimulationPhase::Interpreting).await;
        }

        let interpretation = match self.interpreter.interpret(&request.message, &session_id).await {
            Ok(result) => result,
            Err(e) => {
                progress.lock().await.fail(&e.to_string()).await;
                return;
            }
        };

        if !interpretation.ok {
            // A clarification is a completed run with an empty payload, so
            // pollers surface the questions rather than an error.
            let response = Self::clarification_response(&session_id, &interpretation, started);
            progress.lock().await.complete(response).await;
            return;
        }
        let proposal = match interpretation.proposal {
            Some(p) => p,
            None => {
                progress
                    .lock()
                    .await
                    .fail("interpretation produced no proposal")
                    .await;
                return;
            }
        };

        {
            let mut p = progress.lock().await;
            p.set_phase(SimulationPhase::AnalyzingImpact).await;
            p.set_phase(SimulationPhase::AgentReactions).await;
        }

        let overrides = match &request.scenario_id {
            Some(scenario) => self.scenario_overrides(scenario).await,
            None => AgentOverridesMap::new(),
        };
        let vicinity = Self::pick_vicinity(request.vicinity.as_deref(), &proposal);
        let world_state = self.world_state_for(&session_id).await;

        let callback_progress = Arc::clone(&progress);
        let reactions = self
            .reactor
            .run_all_streaming(
                &proposal,
                &session_id,
                vicinity,
                world_state.as_ref(),
                Some(&overrides),
                move |reaction, sentiment| {
                    let progress = Arc::clone(&callback_progress);
                    async move {
                        progress.lock().await.agent_completed(reaction, sentiment).await;
                    }
                },
            )
            .await;

        progress
            .lock()
            .await
            .set_phase(SimulationPhase::CoalitionSynthesis)
            .await;
        let zones = ZoneAggregator::aggregate(&reactions);

        progress
            .lock()
            .await
            .set_phase(SimulationPhase::GeneratingTownhall)
            .await;
        let transcript = self.moderator.generate(&proposal, &reactions, &session_id).await;

        progress
            .lock()
            .await
            .set_phase(SimulationPhase::Finalizing)
            .await;
        let response = Self::assemble_response(
            &session_id,
            Some(proposal),
            reactions,
            zones,
            transcript,
            started,
        );
        progress.lock().await.complete(response).await;
    }

    async fn promote(&self, request: &PromoteRequest) -> Result<PromoteResponse, SimError> {
        if request.scenario_id.trim().is_empty() {
            return Err(SimError::InvalidInput("scenario_id is required".to_string()));
        }
        let started = Instant::now();

        let overrides = self.scenario_overrides(&request.scenario_id).await;
        let (agent_models, persona_hashes) = Self::override_maps(&overrides);
        let key = fingerprint::compute_key(
            &request.scenario_id,
            &request.proposal,
            &agent_models,
            &persona_hashes,
            &request.sim_mode,
        );

        if let Some(entry) = self.cache.lookup(&key).await {
            log::info!("[ORCHESTRATOR] promote cache hit key={}", key);
            return Ok(PromoteResponse {
                cached: true,
                key,
                result: entry.result,
                provider_mix: entry.provider_mix,
            });
        }

        let (session_id, _) = self.sessions.get_or_create(request.session_id.as_deref());
        let vicinity = Self::pick_vicinity(None, &request.proposal);
        let (reactions, zones, transcript) = self
            .run_stages(&session_id, &request.proposal, vicinity, &overrides)
            .await;
        let result = Self::assemble_response(
            &session_id,
            Some(request.proposal.clone()),
            reactions,
            zones,
            transcript,
            started,
        );

        let provider_mix = self.provider_mix(&overrides);
        let now = Utc::now();
        self.cache
            .store(CacheEntry {
                scenario_id: request.scenario_id.clone(),
                key: key.clone(),
                inputs: CacheInputs {
                    proposal_hash: fingerprint::proposal_hash(&request.proposal),
                    agent_models,
                    archetype_overrides: persona_hashes,
                    sim_mode: request.sim_mode.clone(),
                },
                result: result.clone(),
                provider_mix: provider_mix.clone(),
                created_at: now,
                updated_at: now,
            })
            .await;

        Ok(PromoteResponse {
            cached: false,
            key,
            result,
            provider_mix,
        })
    }

    /// react → aggregate → moderate, with the session's world state injected.
    async fn run_stages(
        &self,
        session_id: &str,
        proposal: &Proposal,
        vicinity: Option<&[AffectedRegion]>,
        overrides: &AgentOverridesMap,
    ) -> (Vec<AgentReaction>, Vec<ZoneSentiment>, Transcript) {
        let world_state = self.world_state_for(session_id).await;
        let reactions = self
            .reactor
            .run_all(
                proposal,
                session_id,
                vicinity,
                world_state.as_ref(),
                Some(overrides),
            )
            .await;
        let zones = ZoneAggregator::aggregate(&reactions);
        let transcript = self.moderator.generate(proposal, &reactions, session_id).await;
        (reactions, zones, transcript)
    }

    async fn scenario_overrides(&self, scenario_id: &str) -> AgentOverridesMap {
        self.overrides
            .read()
            .await
            .get(scenario_id)
            .cloned()
            .unwrap_or_default()
    }

    /// World state for prompts: the ledger reconstruction when available,
    /// otherwise the in-memory snapshot. `None` when there is nothing to say.
    async fn world_state_for(&self, session_id: &str) -> Option<WorldStateSummary> {
        #[cfg(feature = "ledger")]
        if let Some(ledger) = &self.ledger {
            if let Some(state) = ledger.build_world_state(session_id) {
                return Some(state);
            }
        }

        let session_handle = self.sessions.get(session_id)?;
        let summary = session_handle.lock().await.world_summary();
        if summary.is_empty() {
            None
        } else {
            Some(summary)
        }
    }

    /// Request-supplied vicinity wins over regions attached to the proposal.
    fn pick_vicinity<'a>(
        request_vicinity: Option<&'a [AffectedRegion]>,
        proposal: &'a Proposal,
    ) -> Option<&'a [AffectedRegion]> {
        match request_vicinity {
            Some(regions) if !regions.is_empty() => Some(regions),
            _ if !proposal.affected_regions.is_empty() => Some(&proposal.affected_regions),
            _ => None,
        }
    }

    /// Flatten the override table into the two fingerprint maps.
    fn override_maps(
        overrides: &AgentOverridesMap,
    ) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
        let mut agent_models = BTreeMap::new();
        let mut persona_hashes = BTreeMap::new();
        for (agent_key, o) in overrides {
            if let Some(model) = &o.model {
                agent_models.insert(agent_key.clone(), model.clone());
            }
            if let Some(persona) = &o.persona {
                persona_hashes.insert(agent_key.clone(), fingerprint::persona_hash(persona));
            }
        }
        (agent_models, persona_hashes)
    }

    /// Short human-readable provider summary for a run, e.g.
    /// `"amazon x6, anthropic x1"`.
    fn provider_mix(&self, overrides: &AgentOverridesMap) -> String {
        let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        for agent in catalog::AGENTS.iter() {
            let model = overrides
                .get(agent.key)
                .and_then(|o| o.model.clone())
                .unwrap_or_else(|| self.config.default_model.clone());
            *counts.entry(self.config.provider_for(&model)).or_insert(0) += 1;
        }
        counts
            .into_iter()
            .map(|(provider, n)| format!("{} x{}", provider, n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn clarification_response(
        session_id: &str,
        interpretation: &InterpretResult,
        started: Instant,
    ) -> MultiAgentResponse {
        let assistant_message = if interpretation.clarifying_questions.is_empty() {
            format!(
                "I couldn't quite interpret that proposal. Could you clarify what you'd like to simulate? {}",
                interpretation.error.as_deref().unwrap_or("")
            )
            .trim_end()
            .to_string()
        } else {
            format!(
                "Before I can simulate this, could you clarify: {}",
                interpretation.clarifying_questions.join(" ")
            )
        };

        MultiAgentResponse {
            session_id: session_id.to_string(),
            assistant_message,
            proposal: None,
            reactions: Vec::new(),
            zone_sentiments: Vec::new(),
            transcript: Transcript {
                moderator_summary: String::new(),
                turns: Vec::new(),
                compromise_options: Vec::new(),
            },
            receipt: Receipt {
                run_hash: crate::model::run_hash(&serde_json::json!({
                    "session_id": session_id,
                    "clarification": interpretation.clarifying_questions,
                })),
                timestamp: Utc::now(),
                agent_count: 0,
                duration_ms: started.elapsed().as_millis() as u64,
            },
        }
    }

    fn assemble_response(
        session_id: &str,
        proposal: Option<Proposal>,
        reactions: Vec<AgentReaction>,
        zones: Vec<ZoneSentiment>,
        transcript: Transcript,
        started: Instant,
    ) -> MultiAgentResponse {
        let support = reactions.iter().filter(|r| r.stance == Stance::Support).count();
        let oppose = reactions.iter().filter(|r| r.stance == Stance::Oppose).count();
        let neutral = reactions.len() - support - oppose;
        let title = proposal
            .as_ref()
            .map(|p| p.title.clone())
            .unwrap_or_else(|| "the proposal".to_string());
        let assistant_message = format!(
            "Here's how Kingston reacted to \"{}\": {} in support, {} opposed, {} neutral.",
            title, support, oppose, neutral
        );

        let run_hash = crate::model::run_hash(&serde_json::json!({
            "session_id": session_id,
            "proposal": proposal,
            "reactions": reactions,
            "zone_sentiments": zones,
        }));
        let agent_count = reactions.len();

        MultiAgentResponse {
            session_id: session_id.to_string(),
            assistant_message,
            proposal,
            reactions,
            zone_sentiments: zones,
            transcript,
            receipt: Receipt {
                run_hash,
                timestamp: Utc::now(),
                agent_count,
                duration_ms: started.elapsed().as_millis() as u64,
            },
        }
    }
}
