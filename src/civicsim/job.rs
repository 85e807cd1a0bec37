//! Durable tracking of progressive simulation jobs.
//!
//! A [`SimulationJob`] is the orchestrator's record of one progressive run:
//! status, phase, numeric progress, partial results as agents complete, and
//! the final payload. The orchestrator's background task is the job's single
//! writer; every save overwrites the whole record, so readers always observe
//! a consistent snapshot.
//!
//! The [`JobStore`] persists records as one JSON file per job under a
//! configurable directory, with a ~1 hour time-to-live enforced at read time.
//! If the directory cannot be prepared at startup the store degrades to an
//! in-memory map, logging a single warning; job polling keeps working, it
//! just no longer survives a restart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::model::{AgentReaction, MultiAgentResponse, ZoneSentiment};

/// Execution phases of a progressive simulation, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationPhase {
    Initializing,
    Interpreting,
    AnalyzingImpact,
    AgentReactions,
    CoalitionSynthesis,
    GeneratingTownhall,
    Finalizing,
    Complete,
    Error,
}

impl SimulationPhase {
    /// Progress weight of the phase. Weights over the seven working phases
    /// sum to 100.
    pub fn weight(self) -> f64 {
        match self {
            SimulationPhase::Initializing => 5.0,
            SimulationPhase::Interpreting => 10.0,
            SimulationPhase::AnalyzingImpact => 10.0,
            SimulationPhase::AgentReactions => 50.0,
            SimulationPhase::CoalitionSynthesis => 10.0,
            SimulationPhase::GeneratingTownhall => 10.0,
            SimulationPhase::Finalizing => 5.0,
            SimulationPhase::Complete | SimulationPhase::Error => 0.0,
        }
    }

    /// Cumulative progress at the start of the phase.
    pub fn start_progress(self) -> f64 {
        match self {
            SimulationPhase::Initializing => 0.0,
            SimulationPhase::Interpreting => 5.0,
            SimulationPhase::AnalyzingImpact => 15.0,
            SimulationPhase::AgentReactions => 25.0,
            SimulationPhase::CoalitionSynthesis => 75.0,
            SimulationPhase::GeneratingTownhall => 85.0,
            SimulationPhase::Finalizing => 95.0,
            SimulationPhase::Complete => 100.0,
            SimulationPhase::Error => 0.0,
        }
    }

    /// Default status message shown while the phase runs.
    pub fn message(self) -> &'static str {
        match self {
            SimulationPhase::Initializing => "Setting up simulation environment...",
            SimulationPhase::Interpreting => "Analyzing your proposal...",
            SimulationPhase::AnalyzingImpact => "Evaluating regional impacts...",
            SimulationPhase::AgentReactions => "Gathering stakeholder reactions...",
            SimulationPhase::CoalitionSynthesis => "Identifying coalitions and conflicts...",
            SimulationPhase::GeneratingTownhall => "Generating town hall debate...",
            SimulationPhase::Finalizing => "Preparing results...",
            SimulationPhase::Complete => "Simulation complete",
            SimulationPhase::Error => "Simulation failed",
        }
    }
}

/// Lifecycle status of a job. `Complete` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Error,
}

/// A reaction recorded in a job's partial results, stamped with its
/// completion time so pollers can derive "recently completed" agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedReaction {
    pub completed_at: DateTime<Utc>,
    pub reaction: AgentReaction,
}

/// The orchestrator's durable record of a progressive simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationJob {
    pub job_id: String,
    pub session_id: String,
    pub status: JobStatus,
    /// In `[0, 100]`, non-decreasing within a job.
    pub progress: f64,
    pub phase: SimulationPhase,
    pub message: String,
    /// Verbatim copy of the request, for replay and debugging.
    pub request_payload: serde_json::Value,
    pub completed_agents: usize,
    pub total_agents: usize,
    /// Append-only, in upstream completion order.
    pub partial_reactions: Vec<CompletedReaction>,
    /// Upsert-by-zone-id, last-write-wins.
    pub partial_zones: Vec<ZoneSentiment>,
    pub result: Option<MultiAgentResponse>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Refreshed on every save; drives the store's TTL.
    pub saved_at: DateTime<Utc>,
}

impl SimulationJob {
    fn new(session_id: &str, request_payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            status: JobStatus::Pending,
            progress: 0.0,
            phase: SimulationPhase::Initializing,
            message: SimulationPhase::Initializing.message().to_string(),
            request_payload,
            completed_agents: 0,
            total_agents: 0,
            partial_reactions: Vec::new(),
            partial_zones: Vec::new(),
            result: None,
            error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            saved_at: now,
        }
    }

    /// True once the job can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Complete | JobStatus::Error)
    }

    /// The polling payload: partials only when present, result only on
    /// completion, error only on failure.
    pub fn status_response(&self) -> serde_json::Value {
        let mut response = serde_json::json!({
            "job_id": self.job_id,
            "status": self.status,
            "progress": (self.progress * 10.0).round() / 10.0,
            "phase": self.phase,
            "message": self.message,
            "completed_agents": self.completed_agents,
            "total_agents": self.total_agents,
        });
        let obj = response.as_object_mut().expect("status payload is an object");
        if !self.partial_reactions.is_empty() {
            obj.insert(
                "partial_reactions".to_string(),
                serde_json::to_value(&self.partial_reactions).unwrap_or_default(),
            );
        }
        if !self.partial_zones.is_empty() {
            obj.insert(
                "partial_zones".to_string(),
                serde_json::to_value(&self.partial_zones).unwrap_or_default(),
            );
        }
        if self.status == JobStatus::Complete {
            if let Some(result) = &self.result {
                obj.insert(
                    "result".to_string(),
                    serde_json::to_value(result).unwrap_or_default(),
                );
            }
        }
        if self.status == JobStatus::Error {
            if let Some(error) = &self.error {
                obj.insert("error".to_string(), serde_json::json!(error));
            }
        }
        response
    }
}

enum Backend {
    Disk(PathBuf),
    Memory(RwLock<HashMap<String, SimulationJob>>),
}

/// Durable map from job id to [`SimulationJob`].
pub struct JobStore {
    backend: Backend,
    ttl: Duration,
}

impl JobStore {
    /// Open the store. `dir = None` (or an unpreparable directory) yields the
    /// in-memory fallback with a single startup warning.
    pub fn open(dir: Option<PathBuf>, ttl: Duration) -> Self {
        let backend = match dir {
            Some(path) => match fs::create_dir_all(&path) {
                Ok(()) => {
                    log::info!("[JOB] durable job store at {:?}", path);
                    Backend::Disk(path)
                }
                Err(e) => {
                    log::warn!(
                        "[JOB] job dir {:?} unavailable, using in-memory store: {}",
                        path,
                        e
                    );
                    Backend::Memory(RwLock::new(HashMap::new()))
                }
            },
            None => Backend::Memory(RwLock::new(HashMap::new())),
        };
        Self { backend, ttl }
    }

    fn job_path(dir: &PathBuf, job_id: &str) -> PathBuf {
        dir.join(format!("{}.json", job_id))
    }

    /// Create a pending job for a session.
    pub async fn create_job(
        &self,
        session_id: &str,
        request_payload: serde_json::Value,
    ) -> SimulationJob {
        let job = SimulationJob::new(session_id, request_payload);
        self.save(&job).await;
        log::info!("[JOB] created job {} for session {}", job.job_id, session_id);
        job
    }

    /// Fetch a job. Expired records read as missing.
    pub async fn get_job(&self, job_id: &str) -> Option<SimulationJob> {
        let job = match &self.backend {
            Backend::Disk(dir) => {
                let path = Self::job_path(dir, job_id);
                let text = fs::read_to_string(&path).ok()?;
                match serde_json::from_str::<SimulationJob>(&text) {
                    Ok(job) => Some(job),
                    Err(e) => {
                        log::warn!("[JOB] corrupt job file {:?}: {}", path, e);
                        None
                    }
                }
            }
            Backend::Memory(map) => map.read().await.get(job_id).cloned(),
        }?;

        if let Ok(age) = Utc::now().signed_duration_since(job.saved_at).to_std() {
            if age > self.ttl {
                log::debug!("[JOB] job {} expired", job_id);
                self.delete_job(job_id).await;
                return None;
            }
        }
        Some(job)
    }

    /// Overwrite the whole record. Atomicity within a job comes from the
    /// single-writer rule: only the orchestrator task for the job writes it.
    pub async fn update_job(&self, job: &SimulationJob) {
        self.save(job).await;
    }

    async fn save(&self, job: &SimulationJob) {
        let mut stamped = job.clone();
        stamped.saved_at = Utc::now();
        match &self.backend {
            Backend::Disk(dir) => {
                let path = Self::job_path(dir, &stamped.job_id);
                let write = serde_json::to_string(&stamped)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
                    .and_then(|text| fs::write(&path, text));
                if let Err(e) = write {
                    log::warn!("[JOB] save failed for {:?}: {}", path, e);
                }
            }
            Backend::Memory(map) => {
                map.write().await.insert(stamped.job_id.clone(), stamped);
            }
        }
    }

    /// Remove a job record.
    pub async fn delete_job(&self, job_id: &str) {
        match &self.backend {
            Backend::Disk(dir) => {
                let path = Self::job_path(dir, job_id);
                if let Err(e) = fs::remove_file(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        log::warn!("[JOB] delete failed for {:?}: {}", path, e);
                    }
                }
            }
            Backend::Memory(map) => {
                map.write().await.remove(job_id);
            }
        }
    }
}

/// Single-writer helper that owns a job record for the lifetime of one
/// progressive run and mirrors every mutation into the store.
pub struct JobProgress {
    job: SimulationJob,
    store: Arc<JobStore>,
}

impl JobProgress {
    pub fn new(job: SimulationJob, store: Arc<JobStore>) -> Self {
        Self { job, store }
    }

    pub fn job_id(&self) -> &str {
        &self.job.job_id
    }

    /// Mark the run as started with a known agent count.
    pub async fn start(&mut self, total_agents: usize) {
        self.job.status = JobStatus::Running;
        self.job.started_at = Some(Utc::now());
        self.job.total_agents = total_agents;
        self.job.phase = SimulationPhase::Initializing;
        self.job.message = SimulationPhase::Initializing.message().to_string();
        self.job.progress = 0.0;
        self.store.update_job(&self.job).await;
    }

    /// Enter a new phase. Progress jumps to the phase's cumulative start but
    /// never moves backwards.
    pub async fn set_phase(&mut self, phase: SimulationPhase) {
        self.job.phase = phase;
        self.job.message = phase.message().to_string();
        self.job.progress = self.job.progress.max(phase.start_progress());
        self.store.update_job(&self.job).await;
        log::info!(
            "[JOB {}] phase={:?} ({}%)",
            &self.job.job_id[..8.min(self.job.job_id.len())],
            phase,
            self.job.progress
        );
    }

    /// Record one agent completion: appends the reaction in completion
    /// order, upserts the zone sentiment, and interpolates progress through
    /// the agent-reactions phase weight.
    pub async fn agent_completed(
        &mut self,
        reaction: AgentReaction,
        zone_sentiment: Option<ZoneSentiment>,
    ) {
        self.job.completed_agents += 1;
        self.job.partial_reactions.push(CompletedReaction {
            completed_at: Utc::now(),
            reaction,
        });

        if let Some(sentiment) = zone_sentiment {
            match self
                .job
                .partial_zones
                .iter_mut()
                .find(|z| z.zone_id == sentiment.zone_id)
            {
                Some(existing) => *existing = sentiment,
                None => self.job.partial_zones.push(sentiment),
            }
        }

        let base = SimulationPhase::AgentReactions.start_progress();
        let weight = SimulationPhase::AgentReactions.weight();
        if self.job.total_agents > 0 {
            let within =
                (self.job.completed_agents as f64 / self.job.total_agents as f64) * weight;
            self.job.progress = self.job.progress.max(base + within);
        }
        self.job.message = format!(
            "Gathering stakeholder reactions... {}/{}",
            self.job.completed_agents, self.job.total_agents
        );
        self.store.update_job(&self.job).await;
    }

    /// Terminal success: stores the final result and stamps completion.
    pub async fn complete(&mut self, result: MultiAgentResponse) {
        self.job.status = JobStatus::Complete;
        self.job.phase = SimulationPhase::Complete;
        self.job.progress = 100.0;
        self.job.message = SimulationPhase::Complete.message().to_string();
        self.job.result = Some(result);
        self.job.completed_at = Some(Utc::now());
        self.store.update_job(&self.job).await;

        let started = self.job.started_at.unwrap_or(self.job.created_at);
        let duration = self
            .job
            .completed_at
            .map(|done| done.signed_duration_since(started).num_milliseconds())
            .unwrap_or(0);
        log::info!(
            "[JOB {}] complete in {}ms",
            &self.job.job_id[..8.min(self.job.job_id.len())],
            duration
        );
    }

    /// Terminal failure with a short human-readable message.
    pub async fn fail(&mut self, error: &str) {
        self.job.status = JobStatus::Error;
        self.job.phase = SimulationPhase::Error;
        self.job.message = format!("Simulation failed: {}", error);
        self.job.error = Some(error.to_string());
        self.job.completed_at = Some(Utc::now());
        self.store.update_job(&self.job).await;
        log::error!(
            "[JOB {}] failed: {}",
            &self.job.job_id[..8.min(self.job.job_id.len())],
            error
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_weights_sum_to_100() {
        let phases = [
            SimulationPhase::Initializing,
            SimulationPhase::Interpreting,
            SimulationPhase::AnalyzingImpact,
            SimulationPhase::AgentReactions,
            SimulationPhase::CoalitionSynthesis,
            SimulationPhase::GeneratingTownhall,
            SimulationPhase::Finalizing,
        ];
        let total: f64 = phases.iter().map(|p| p.weight()).sum();
        assert_eq!(total, 100.0);

        // start_progress is the running sum of earlier weights.
        let mut cumulative = 0.0;
        for phase in phases.iter() {
            assert_eq!(phase.start_progress(), cumulative);
            cumulative += phase.weight();
        }
    }

    #[tokio::test]
    async fn test_memory_store_crud() {
        let store = JobStore::open(None, Duration::from_secs(3600));
        let job = store
            .create_job("session-1", serde_json::json!({"message": "hi"}))
            .await;

        let fetched = store.get_job(&job.job_id).await.unwrap();
        assert_eq!(fetched.session_id, "session-1");
        assert_eq!(fetched.status, JobStatus::Pending);

        store.delete_job(&job.job_id).await;
        assert!(store.get_job(&job.job_id).await.is_none());
    }

    #[tokio::test]
    async fn test_disk_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(Some(dir.path().to_path_buf()), Duration::from_secs(3600));
        let job = store.create_job("session-1", serde_json::json!({})).await;

        // A second store over the same directory sees the record.
        let other = JobStore::open(Some(dir.path().to_path_buf()), Duration::from_secs(3600));
        assert!(other.get_job(&job.job_id).await.is_some());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = JobStore::open(None, Duration::from_secs(0));
        let job = store.create_job("session-1", serde_json::json!({})).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.get_job(&job.job_id).await.is_none());
    }

    #[tokio::test]
    async fn test_progress_is_monotone() {
        let store = Arc::new(JobStore::open(None, Duration::from_secs(3600)));
        let job = store.create_job("session-1", serde_json::json!({})).await;
        let mut progress = JobProgress::new(job, Arc::clone(&store));

        progress.start(2).await;
        let mut last = 0.0;
        let phases = [
            SimulationPhase::Interpreting,
            SimulationPhase::AnalyzingImpact,
            SimulationPhase::AgentReactions,
        ];
        for phase in phases.iter() {
            progress.set_phase(*phase).await;
            let current = store
                .get_job(progress.job_id())
                .await
                .unwrap()
                .progress;
            assert!(current >= last);
            last = current;
        }

        let reaction = AgentReaction {
            agent_key: "downtown".to_string(),
            agent_name: "David Park".to_string(),
            role: "Small Business Owner".to_string(),
            stance: crate::model::Stance::Support,
            intensity: 0.8,
            support_reasons: vec![],
            concerns: vec![],
            quote: "Sounds good.".to_string(),
            what_would_change_my_mind: vec![],
            zone_effects: vec![],
            proposed_amendments: vec![],
        };
        progress.agent_completed(reaction.clone(), None).await;
        let after_one = store.get_job(progress.job_id()).await.unwrap();
        assert_eq!(after_one.completed_agents, 1);
        assert!(after_one.progress >= last);
        assert!((after_one.progress - 50.0).abs() < 1e-9); // 25 + 1/2 * 50
        assert!(after_one.message.contains("1/2"));

        progress.agent_completed(reaction, None).await;
        let after_two = store.get_job(progress.job_id()).await.unwrap();
        assert_eq!(after_two.completed_agents, 2);
        assert!((after_two.progress - 75.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_status_response_shape() {
        let store = Arc::new(JobStore::open(None, Duration::from_secs(3600)));
        let job = store.create_job("s", serde_json::json!({})).await;

        let pending = job.status_response();
        assert!(pending.get("partial_reactions").is_none());
        assert!(pending.get("result").is_none());
        assert!(pending.get("error").is_none());

        let mut progress = JobProgress::new(job, Arc::clone(&store));
        progress.fail("interpretation failed").await;
        let failed = store.get_job(progress.job_id()).await.unwrap();
        let payload = failed.status_response();
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error"], "interpretation failed");
        assert!(failed.is_terminal());
    }
}
