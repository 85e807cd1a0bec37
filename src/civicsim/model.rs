//! Shared data types for the simulation pipeline.
//!
//! Every component exchanges the structures defined here: the interpreter
//! produces a [`Proposal`], the reactor produces one [`AgentReaction`] per
//! agent, the aggregator projects reactions into [`ZoneSentiment`]s, the
//! moderator produces a [`Transcript`], and the orchestrator assembles it all
//! into a [`MultiAgentResponse`] stamped with a [`Receipt`].
//!
//! Upstream replies arrive as untyped JSON; the producing components parse
//! them permissively and normalize into these types. The types themselves are
//! strict: stances are a closed enum, intensities are clamped to `[0, 1]`
//! where they are constructed, and list fields carry documented maxima that
//! the normalizers enforce.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Maximum characters kept from an agent quote.
pub const MAX_QUOTE_LEN: usize = 150;
/// Maximum characters kept from a transcript turn.
pub const MAX_TURN_LEN: usize = 250;
/// Maximum turns kept in a transcript.
pub const MAX_TURNS: usize = 12;
/// Maximum entries kept in reaction list fields.
pub const MAX_LIST_ITEMS: usize = 3;

/// An agent's position on a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    Support,
    Oppose,
    Neutral,
}

impl Stance {
    /// Sign used when projecting a stance onto a sentiment score.
    pub fn sign(self) -> f64 {
        match self {
            Stance::Support => 1.0,
            Stance::Oppose => -1.0,
            Stance::Neutral => 0.0,
        }
    }

    /// Lenient parse; anything unrecognized is neutral.
    pub fn parse(s: &str) -> Stance {
        match s {
            "support" => Stance::Support,
            "oppose" => Stance::Oppose,
            _ => Stance::Neutral,
        }
    }

    /// Emoji used when summarizing reactions for the moderator prompt.
    pub fn emoji(self) -> &'static str {
        match self {
            Stance::Support => "👍",
            Stance::Oppose => "👎",
            Stance::Neutral => "🤔",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stance::Support => "support",
            Stance::Oppose => "oppose",
            Stance::Neutral => "neutral",
        }
    }
}

/// Discriminator for proposals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalKind {
    Build,
    Policy,
}

impl ProposalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProposalKind::Build => "build",
            ProposalKind::Policy => "policy",
        }
    }
}

/// How a proposal is located in space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    None,
    Zone,
    Point,
    Polygon,
}

/// A latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Spatial extent of a proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalLocation {
    pub kind: LocationKind,
    /// Affected zone ids when `kind == Zone`. Validated against the catalog.
    #[serde(default)]
    pub zone_ids: Vec<String>,
    #[serde(default)]
    pub point: Option<GeoPoint>,
    #[serde(default)]
    pub polygon: Option<Vec<GeoPoint>>,
    /// Impact radius for point placements.
    #[serde(default)]
    pub radius_km: Option<f64>,
}

impl Default for ProposalLocation {
    fn default() -> Self {
        Self {
            kind: LocationKind::None,
            zone_ids: Vec::new(),
            point: None,
            polygon: None,
            radius_km: None,
        }
    }
}

/// Numeric parameters attached to a proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalParameters {
    /// Size multiplier; 1.0 is the default scale.
    pub scale: f64,
    #[serde(default)]
    pub budget_millions: Option<f64>,
    #[serde(default)]
    pub target_group: Option<String>,
}

impl Default for ProposalParameters {
    fn default() -> Self {
        Self {
            scale: 1.0,
            budget_millions: None,
            target_group: None,
        }
    }
}

/// Distance class of a zone relative to a placed build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceBucket {
    Near,
    Medium,
    Far,
}

/// A zone's proximity to a drag-drop build placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffectedRegion {
    pub zone_id: String,
    pub distance_m: f64,
    pub bucket: DistanceBucket,
    /// In `[0, 1]`; nearer regions weigh more.
    pub proximity_weight: f64,
}

/// A structured civic proposal, immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub kind: ProposalKind,
    /// Short title (5-10 words).
    pub title: String,
    /// One-sentence description.
    pub summary: String,
    #[serde(default)]
    pub location: ProposalLocation,
    #[serde(default)]
    pub parameters: ProposalParameters,
    /// Ordered proximity list for drag-drop build placements; empty otherwise.
    #[serde(default)]
    pub affected_regions: Vec<AffectedRegion>,
    /// Zone containing the placement point, when known.
    #[serde(default)]
    pub containing_zone: Option<String>,
}

/// Outcome of interpreting free text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpretResult {
    pub ok: bool,
    #[serde(default)]
    pub proposal: Option<Proposal>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub clarifying_questions: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub error: Option<String>,
}

impl InterpretResult {
    /// Failed interpretation carrying a human-readable error.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            proposal: None,
            assumptions: Vec::new(),
            clarifying_questions: Vec::new(),
            confidence: 0.0,
            error: Some(error.into()),
        }
    }
}

/// An agent's assessment of one zone's exposure to the proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneEffect {
    pub zone_id: String,
    pub effect: Stance,
    /// Clamped to `[0, 1]` during normalization.
    pub intensity: f64,
}

/// A single agent's structured response to a proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReaction {
    /// Agent key, identical to the agent's zone id.
    pub agent_key: String,
    pub agent_name: String,
    pub role: String,
    pub stance: Stance,
    /// How strongly the agent feels, in `[0, 1]`.
    pub intensity: f64,
    /// Up to three reasons for support.
    #[serde(default)]
    pub support_reasons: Vec<String>,
    /// Up to three concerns.
    #[serde(default)]
    pub concerns: Vec<String>,
    /// First-person quote, at most [`MAX_QUOTE_LEN`] characters.
    #[serde(default)]
    pub quote: String,
    /// Up to three conditions that would shift the agent's position.
    #[serde(default)]
    pub what_would_change_my_mind: Vec<String>,
    /// Zones the agent believes are most affected.
    #[serde(default)]
    pub zone_effects: Vec<ZoneEffect>,
    /// Up to three proposed amendments.
    #[serde(default)]
    pub proposed_amendments: Vec<String>,
}

/// A quote attributed to the agent who said it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteAttribution {
    pub agent_name: String,
    pub quote: String,
}

/// Aggregated sentiment for one zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneSentiment {
    pub zone_id: String,
    pub zone_name: String,
    pub sentiment: Stance,
    /// Signed score in `[-1, +1]`: stance sign × intensity, 3 decimals.
    pub score: f64,
    #[serde(default)]
    pub top_support_quotes: Vec<QuoteAttribution>,
    #[serde(default)]
    pub top_oppose_quotes: Vec<QuoteAttribution>,
}

/// One speaker turn in a town hall transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptTurn {
    pub speaker: String,
    pub text: String,
}

/// Moderated town hall debate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub moderator_summary: String,
    /// At most [`MAX_TURNS`] turns.
    pub turns: Vec<TranscriptTurn>,
    /// Up to three middle-ground options.
    #[serde(default)]
    pub compromise_options: Vec<String>,
}

/// A placed build item in the world state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacedItem {
    pub id: String,
    /// e.g. `"park"`, `"housing_development"`.
    pub item_type: String,
    pub title: String,
    #[serde(default)]
    pub region_id: Option<String>,
    #[serde(default)]
    pub region_name: Option<String>,
    pub radius_km: f64,
    pub emoji: String,
}

/// An adopted (or forced) policy in the world state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdoptedPolicy {
    pub id: String,
    pub title: String,
    pub summary: String,
    /// `"adopted"` or `"forced"`.
    pub outcome: String,
    pub vote_pct: u32,
    pub timestamp: DateTime<Utc>,
}

/// A relationship edge surfaced in the world-state summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipShift {
    pub from_agent: String,
    pub to_agent: String,
    pub score: f64,
    pub reason: String,
}

/// Version-stamped snapshot of world facts injected into agent prompts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldStateSummary {
    pub version: u64,
    #[serde(default)]
    pub placed_items: Vec<PlacedItem>,
    #[serde(default)]
    pub adopted_policies: Vec<AdoptedPolicy>,
    /// The three edges with the largest |score|.
    #[serde(default)]
    pub top_relationship_shifts: Vec<RelationshipShift>,
}

impl WorldStateSummary {
    /// True when there is nothing worth telling the agents about.
    pub fn is_empty(&self) -> bool {
        self.placed_items.is_empty()
            && self.adopted_policies.is_empty()
            && self.top_relationship_shifts.is_empty()
    }

    /// Render the snapshot as the short context block prepended to agent
    /// prompts.
    pub fn to_prompt_context(&self) -> String {
        if self.is_empty() {
            return String::new();
        }

        let mut out = String::from("\nCURRENT STATE OF KINGSTON:\n");
        if !self.placed_items.is_empty() {
            out.push_str("Existing developments:\n");
            for item in &self.placed_items {
                let region = item.region_name.as_deref().unwrap_or("unspecified area");
                out.push_str(&format!(
                    "- {} {} in {}\n",
                    item.emoji, item.title, region
                ));
            }
        }
        if !self.adopted_policies.is_empty() {
            out.push_str("Policies in effect:\n");
            for policy in &self.adopted_policies {
                out.push_str(&format!(
                    "- {} ({}, {}% vote)\n",
                    policy.title, policy.outcome, policy.vote_pct
                ));
            }
        }
        if !self.top_relationship_shifts.is_empty() {
            out.push_str("Recent relationship dynamics:\n");
            for shift in &self.top_relationship_shifts {
                out.push_str(&format!(
                    "- {} and {}: {} ({:+.2})\n",
                    shift.from_agent, shift.to_agent, shift.reason, shift.score
                ));
            }
        }
        out
    }
}

/// Per-agent model/persona override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentOverride {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub persona: Option<String>,
}

impl AgentOverride {
    pub fn is_empty(&self) -> bool {
        self.model.is_none() && self.persona.is_none()
    }
}

/// Map of agent key → override.
pub type AgentOverridesMap = HashMap<String, AgentOverride>;

/// Reproducibility stamp attached to every assembled response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    /// 12-hex SHA-256 digest of the canonical response payload.
    pub run_hash: String,
    pub timestamp: DateTime<Utc>,
    pub agent_count: usize,
    pub duration_ms: u64,
}

/// The assembled result of one simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiAgentResponse {
    pub session_id: String,
    /// Conversational message for the caller: a summary on success, the
    /// clarifying questions on interpretation failure.
    pub assistant_message: String,
    pub proposal: Option<Proposal>,
    pub reactions: Vec<AgentReaction>,
    pub zone_sentiments: Vec<ZoneSentiment>,
    pub transcript: Transcript,
    pub receipt: Receipt,
}

/// Request for a synchronous or progressive simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulateRequest {
    /// Existing session to continue, or `None` for a fresh one.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Free-text proposal from the user.
    pub message: String,
    /// Scenario whose per-agent overrides apply (and whose cache namespace
    /// promotion writes into).
    #[serde(default)]
    pub scenario_id: Option<String>,
    /// Simulation mode tag carried into the fingerprint.
    #[serde(default = "default_sim_mode")]
    pub sim_mode: String,
    /// Proximity data from a drag-drop placement, overriding any regions
    /// already attached to the interpreted proposal.
    #[serde(default)]
    pub vicinity: Option<Vec<AffectedRegion>>,
}

fn default_sim_mode() -> String {
    "multi_agent".to_string()
}

/// Request to run-and-cache a simulation for an already structured proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromoteRequest {
    pub scenario_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub proposal: Proposal,
    #[serde(default = "default_sim_mode")]
    pub sim_mode: String,
}

/// Result of a promotion: cached or freshly simulated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromoteResponse {
    pub cached: bool,
    pub key: String,
    pub result: MultiAgentResponse,
    pub provider_mix: String,
}

/// Structured follow-up extracted after a direct message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmUpdate {
    /// In `[-1, +1]`.
    pub relationship_delta: f64,
    pub stance_changed: bool,
    #[serde(default)]
    pub new_stance: Option<Stance>,
    #[serde(default)]
    pub new_intensity: Option<f64>,
    pub reason: String,
}

impl DmUpdate {
    /// The zero-delta default used when the structured call fails.
    pub fn no_change() -> Self {
        Self {
            relationship_delta: 0.0,
            stance_changed: false,
            new_stance: None,
            new_intensity: None,
            reason: "no significant change".to_string(),
        }
    }
}

/// Outcome of one agent-to-agent direct message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmResponse {
    /// The recipient's in-voice reply.
    pub reply: String,
    pub stance_update: DmUpdate,
    /// The recipient's updated score toward the speaker.
    pub relationship_score: f64,
}

/// Whether a decision was voted in or imposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionKind {
    Adopted,
    Forced,
}

/// A decision to persist into every thread the session has touched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub kind: DecisionKind,
    pub proposal_kind: ProposalKind,
    pub title: String,
    pub summary: String,
    /// Vote share in percent.
    pub vote_pct: u32,
    /// Up to three key quotes from the debate.
    #[serde(default)]
    pub key_quotes: Vec<QuoteAttribution>,
    /// Per-zone sentiment shifts caused by the decision.
    #[serde(default)]
    pub zone_shifts: HashMap<String, f64>,
    /// Build item type for placed builds, e.g. `"park"`.
    #[serde(default)]
    pub item_type: Option<String>,
    /// Zone the build was placed in, when known.
    #[serde(default)]
    pub region_id: Option<String>,
}

/// Result of recording a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdoptResponse {
    /// Threads that accepted the decision record.
    pub threads_updated: usize,
    pub outcome: String,
}

/// A node in the session relationship graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub name: String,
    pub role: String,
}

/// A directed edge in the session relationship graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub score: f64,
    pub reason: String,
    pub last_message: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Snapshot of the session graph for visualization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphData {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Which agents are in flight for the session's latest job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveCalls {
    /// Agents the reactor has not heard back from yet.
    pub active: Vec<String>,
    /// Agents that completed within the last five seconds.
    pub recently_completed: Vec<String>,
}

/// Error taxonomy for the simulation surface.
///
/// `InvalidInput` maps to a 4xx-class failure and is never retried;
/// `Upstream` maps to 502-class; `Storage` covers degraded persistence that
/// could not be swallowed locally.
#[derive(Debug, Clone)]
pub enum SimError {
    InvalidInput(String),
    Upstream(crate::upstream::UpstreamError),
    Storage(String),
}

impl std::fmt::Display for SimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimError::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            SimError::Upstream(err) => write!(f, "{}", err),
            SimError::Storage(msg) => write!(f, "storage failure: {}", msg),
        }
    }
}

impl std::error::Error for SimError {}

impl From<crate::upstream::UpstreamError> for SimError {
    fn from(err: crate::upstream::UpstreamError) -> Self {
        SimError::Upstream(err)
    }
}

/// Strip a surrounding markdown code fence from an LLM reply, if present.
///
/// Handles both ```` ```json ```` and bare ```` ``` ```` fences; anything
/// outside the first fenced block is discarded. Replies without fences are
/// returned trimmed.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        match rest.find("```") {
            Some(end) => return rest[..end].trim(),
            None => return rest.trim(),
        }
    }
    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        match rest.find("```") {
            Some(end) => return rest[..end].trim(),
            None => return rest.trim(),
        }
    }
    trimmed
}

/// Normalize a JSON list of mixed strings/objects into a deduplicated list
/// of strings, truncated to `max` entries.
///
/// Models occasionally return `[{"reason": "..."}]` where `["..."]` was asked
/// for; the first string value of any object is taken.
pub fn normalize_string_list(value: Option<&serde_json::Value>, max: usize) -> Vec<String> {
    let items = match value.and_then(|v| v.as_array()) {
        Some(arr) => arr,
        None => return Vec::new(),
    };
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let text = match item {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(map) => map
                .values()
                .find_map(|v| v.as_str().map(|s| s.to_string())),
            _ => None,
        };
        if let Some(text) = text {
            if !out.contains(&text) {
                out.push(text);
            }
        }
    }
    out.truncate(max);
    out
}

/// Truncate a string to at most `max` characters on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Short reproducibility hash over an arbitrary JSON payload.
///
/// Serialization goes through `serde_json`, whose default map
/// representation keeps keys sorted, so the digest is stable across runs.
pub fn run_hash(payload: &serde_json::Value) -> String {
    let canonical = payload.to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stance_parse_and_sign() {
        assert_eq!(Stance::parse("support"), Stance::Support);
        assert_eq!(Stance::parse("oppose"), Stance::Oppose);
        assert_eq!(Stance::parse("whatever"), Stance::Neutral);
        assert_eq!(Stance::Support.sign(), 1.0);
        assert_eq!(Stance::Oppose.sign(), -1.0);
        assert_eq!(Stance::Neutral.sign(), 0.0);
    }

    #[test]
    fn test_stance_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Stance::Support).unwrap(), "\"support\"");
        let parsed: Stance = serde_json::from_str("\"oppose\"").unwrap();
        assert_eq!(parsed, Stance::Oppose);
    }

    #[test]
    fn test_run_hash_is_stable_and_short() {
        let a = serde_json::json!({"b": 2, "a": 1});
        let b = serde_json::json!({"a": 1, "b": 2});
        assert_eq!(run_hash(&a), run_hash(&b));
        assert_eq!(run_hash(&a).len(), 12);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo");
        assert_eq!(truncate_chars("short", 150), "short");
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(
            strip_code_fences("Here you go:\n```json\n{\"a\":1}\n```\nanything else"),
            "{\"a\":1}"
        );
    }

    #[test]
    fn test_normalize_string_list_mixed_and_deduped() {
        let value = serde_json::json!([
            "traffic",
            {"concern": "parking"},
            "traffic",
            42,
            "noise",
            "dust",
        ]);
        let items = normalize_string_list(Some(&value), 3);
        assert_eq!(items, vec!["traffic", "parking", "noise"]);
        assert!(normalize_string_list(None, 3).is_empty());
    }

    #[test]
    fn test_world_state_prompt_context() {
        let empty = WorldStateSummary::default();
        assert!(empty.to_prompt_context().is_empty());

        let state = WorldStateSummary {
            version: 2,
            placed_items: vec![PlacedItem {
                id: "b1".to_string(),
                item_type: "park".to_string(),
                title: "Riverside Park".to_string(),
                region_id: Some("downtown".to_string()),
                region_name: Some("Downtown Core".to_string()),
                radius_km: 0.5,
                emoji: "🌳".to_string(),
            }],
            adopted_policies: Vec::new(),
            top_relationship_shifts: Vec::new(),
        };
        let context = state.to_prompt_context();
        assert!(context.contains("Riverside Park"));
        assert!(context.contains("Downtown Core"));
    }
}
