//! Town hall transcript generation.
//!
//! One upstream call that consumes the full set of reactions and produces a
//! moderated debate: a summary, a bounded list of speaker turns, and up to
//! three compromise options. The moderator assistant and its thread are
//! created once per session and reused.
//!
//! A transcript that parses to fewer than five turns, or any upstream/parse
//! failure, is replaced by a deterministic fallback built from the reactions
//! themselves, so the debate always has content.

use std::sync::Arc;

use crate::config::SimConfig;
use crate::model::{
    strip_code_fences, truncate_chars, AgentReaction, Proposal, Transcript, TranscriptTurn,
    MAX_TURNS, MAX_TURN_LEN,
};
use crate::session::SessionStore;
use crate::upstream::Upstream;

const MODERATOR_NAME: &str = "CivicSim Town Hall";
const MODERATOR_SYSTEM_PROMPT: &str = "You moderate town hall meetings and generate realistic \
debate transcripts. Respond with valid JSON only.";

/// Minimum turns for a parsed transcript to be accepted.
const MIN_TURNS: usize = 5;

/// Generates town hall debate transcripts.
pub struct Moderator {
    upstream: Arc<dyn Upstream>,
    sessions: Arc<SessionStore>,
    config: Arc<SimConfig>,
}

impl Moderator {
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

    /// Generate a transcript for the proposal from the full reaction set.
    pub async fn generate(
        &self,
        proposal: &Proposal,
        reactions: &[AgentReaction],
        session_id: &str,
    ) -> Transcript {
        let (_, session_handle) = self.sessions.get_or_create(Some(session_id));
        let prompt = Self::build_prompt(proposal, reactions);

        // Bind the moderator assistant + thread once per session.
        let (thread_id, send_lock) = {
            let mut session = session_handle.lock().await;
            if session.moderator_thread_id.is_none() {
                if session.moderator_assistant_id.is_none() {
                    match self
                        .upstream
                        .create_assistant(MODERATOR_NAME, MODERATOR_SYSTEM_PROMPT)
                        .await
                    {
                        Ok(assistant_id) => {
                            log::info!("[MODERATOR] created assistant={}", assistant_id);
                            session.moderator_assistant_id = Some(assistant_id);
                        }
                        Err(e) => {
                            log::error!("[MODERATOR] session={} assistant creation failed: {}", session_id, e);
                            return Self::fallback_transcript(reactions);
                        }
                    }
                }
                let assistant_id = session
                    .moderator_assistant_id
                    .clone()
                    .expect("assistant id set above");
                match self.upstream.create_thread(&assistant_id).await {
                    Ok(thread_id) => {
                        log::info!(
                            "[MODERATOR] created thread={} for session={}",
                            thread_id,
                            session_id
                        );
                        session.moderator_thread_id = Some(thread_id);
                    }
                    Err(e) => {
                        log::error!("[MODERATOR] session={} thread creation failed: {}", session_id, e);
                        return Self::fallback_transcript(reactions);
                    }
                }
            }
            let thread_id = session
                .moderator_thread_id
                .clone()
                .expect("thread id set above");
            let send_lock = session.send_lock(&thread_id);
            (thread_id, send_lock)
        };

        log::info!(
            "[MODERATOR] session={} thread={} content_len={}",
            session_id,
            thread_id,
            prompt.len()
        );

        let model = self.config.default_model.clone();
        let provider = self.config.provider_for(&model);
        let _guard = send_lock.lock().await;
        match self
            .upstream
            .send_message(&thread_id, &prompt, &model, provider)
            .await
        {
            Ok(reply) => {
                log::info!(
                    "[MODERATOR] session={} response_len={}",
                    session_id,
                    reply.len()
                );
                Self::parse_transcript(&reply, reactions)
            }
            Err(e) => {
                log::error!("[MODERATOR] session={} upstream error: {}", session_id, e);
                Self::fallback_transcript(reactions)
            }
        }
    }

    fn build_prompt(proposal: &Proposal, reactions: &[AgentReaction]) -> String {
        format!(
            "You are a moderator for a Kingston town hall meeting about a civic proposal.\n\n\
PROPOSAL: {}\n\
TYPE: {}\n\
SUMMARY: {}\n\n\
STAKEHOLDER REACTIONS:\n{}\n\n\
Generate a realistic, engaging town hall transcript with 6-10 turns. Include:\n\
1. Moderator opening summary\n\
2. Back-and-forth dialogue between stakeholders\n\
3. Some tension/disagreement\n\
4. At least one moment of agreement or common ground\n\
5. Moderator closing with compromise options\n\n\
Respond with ONLY valid JSON:\n\
- moderator_summary: 2-3 sentence overview of the debate\n\
- turns: array of speaker turns, each with \"speaker\" (name or \"Moderator\") and \"text\" (max 40 words)\n\
- compromise_options: 1-3 potential middle-ground solutions\n\n\
Keep it realistic and engaging. Each turn should be max 40 words.\n\
Respond with JSON only.",
            proposal.title,
            proposal.kind.as_str(),
            proposal.summary,
            Self::format_reactions(reactions),
        )
    }

    /// Compact per-reaction summary for the prompt: name, stance emoji,
    /// quote, first two concerns and support reasons.
    fn format_reactions(reactions: &[AgentReaction]) -> String {
        let mut lines = Vec::new();
        for r in reactions {
            lines.push(format!(
                "- {} ({}): {} {}",
                r.agent_name,
                r.role,
                r.stance.emoji(),
                r.stance.as_str().to_uppercase()
            ));
            if !r.quote.is_empty() {
                lines.push(format!("  Quote: \"{}\"", r.quote));
            }
            if !r.concerns.is_empty() {
                lines.push(format!(
                    "  Concerns: {}",
                    r.concerns.iter().take(2).cloned().collect::<Vec<_>>().join(", ")
                ));
            }
            if !r.support_reasons.is_empty() {
                lines.push(format!(
                    "  Supports because: {}",
                    r.support_reasons
                        .iter()
                        .take(2)
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                ));
            }
        }
        lines.join("\n")
    }

    /// Lenient transcript parse. Anything below [`MIN_TURNS`] usable turns
    /// falls back to the deterministic transcript.
    fn parse_transcript(reply: &str, reactions: &[AgentReaction]) -> Transcript {
        let text = strip_code_fences(reply);
        let data: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => {
                log::warn!("[MODERATOR] JSON parse failed");
                return Self::fallback_transcript(reactions);
            }
        };

        let turns: Vec<TranscriptTurn> = data
            .get("turns")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .take(MAX_TURNS)
                    .filter_map(|turn| {
                        let speaker = turn.get("speaker")?.as_str()?.to_string();
                        let text = turn.get("text")?.as_str()?;
                        Some(TranscriptTurn {
                            speaker,
                            text: truncate_chars(text, MAX_TURN_LEN),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        if turns.len() < MIN_TURNS {
            return Self::fallback_transcript(reactions);
        }

        Transcript {
            moderator_summary: truncate_chars(
                data.get("moderator_summary")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Town hall discussion on the proposal."),
                500,
            ),
            turns,
            compromise_options: crate::model::normalize_string_list(
                data.get("compromise_options"),
                3,
            ),
        }
    }

    /// Deterministic transcript: a moderator opening, each agent's quote as
    /// its own turn, and a moderator closing.
    fn fallback_transcript(reactions: &[AgentReaction]) -> Transcript {
        let mut turns = vec![TranscriptTurn {
            speaker: "Moderator".to_string(),
            text: "Welcome to today's town hall. We'll hear from various stakeholders about this proposal."
                .to_string(),
        }];

        for r in reactions {
            if !r.quote.is_empty() {
                turns.push(TranscriptTurn {
                    speaker: r.agent_name.clone(),
                    text: r.quote.clone(),
                });
            }
        }

        while turns.len() < MIN_TURNS {
            turns.push(TranscriptTurn {
                speaker: "Moderator".to_string(),
                text: "Thank you for your input. Let's continue the discussion.".to_string(),
            });
        }

        turns.push(TranscriptTurn {
            speaker: "Moderator".to_string(),
            text: "Thank you all for participating. We'll take these perspectives under consideration."
                .to_string(),
        });
        turns.truncate(MAX_TURNS);

        Transcript {
            moderator_summary:
                "A town hall discussion was held to gather community feedback on the proposal."
                    .to_string(),
            turns,
            compromise_options: vec![
                "Consider phased implementation".to_string(),
                "Gather more community input".to_string(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::model::Stance;

    fn reaction(agent_key: &str, stance: Stance, quote: &str) -> AgentReaction {
        let profile = catalog::get_agent(agent_key).unwrap();
        AgentReaction {
            agent_key: agent_key.to_string(),
            agent_name: profile.display_name.to_string(),
            role: profile.role.to_string(),
            stance,
            intensity: 0.6,
            support_reasons: vec!["jobs".to_string()],
            concerns: vec!["cost".to_string()],
            quote: quote.to_string(),
            what_would_change_my_mind: vec![],
            zone_effects: vec![],
            proposed_amendments: vec![],
        }
    }

    #[test]
    fn test_parse_good_transcript() {
        let reply = r#"{
            "moderator_summary": "A lively debate.",
            "turns": [
                {"speaker": "Moderator", "text": "Welcome."},
                {"speaker": "David Park", "text": "I like it."},
                {"speaker": "Malik Johnson", "text": "I have concerns."},
                {"speaker": "David Park", "text": "Fair point."},
                {"speaker": "Moderator", "text": "Common ground found."},
                {"speaker": "Moderator", "text": "Closing."}
            ],
            "compromise_options": ["Phase it in"]
        }"#;
        let transcript = Moderator::parse_transcript(reply, &[]);
        assert_eq!(transcript.moderator_summary, "A lively debate.");
        assert_eq!(transcript.turns.len(), 6);
        assert_eq!(transcript.compromise_options, vec!["Phase it in"]);
    }

    #[test]
    fn test_short_transcript_falls_back() {
        let reply = r#"{
            "moderator_summary": "Too short.",
            "turns": [
                {"speaker": "Moderator", "text": "Welcome."},
                {"speaker": "David Park", "text": "Hi."}
            ]
        }"#;
        let reactions = vec![
            reaction("downtown", Stance::Support, "Good for business."),
            reaction("sydenham", Stance::Oppose, "Bad for renters."),
        ];
        let transcript = Moderator::parse_transcript(reply, &reactions);
        // Fallback echoes the agent quotes between moderator bookends.
        assert!(transcript.turns.len() >= MIN_TURNS);
        assert!(transcript
            .turns
            .iter()
            .any(|t| t.text == "Good for business."));
        assert_eq!(transcript.turns[0].speaker, "Moderator");
        assert_eq!(transcript.turns.last().unwrap().speaker, "Moderator");
    }

    #[test]
    fn test_garbage_falls_back() {
        let transcript = Moderator::parse_transcript("not json", &[]);
        assert!(transcript.turns.len() >= MIN_TURNS);
    }

    #[test]
    fn test_turns_capped_and_truncated() {
        let long_text = "x".repeat(400);
        let turns: Vec<serde_json::Value> = (0..20)
            .map(|i| serde_json::json!({"speaker": format!("Speaker {}", i), "text": long_text}))
            .collect();
        let reply = serde_json::json!({
            "moderator_summary": "Long one.",
            "turns": turns,
        })
        .to_string();
        let transcript = Moderator::parse_transcript(&reply, &[]);
        assert_eq!(transcript.turns.len(), MAX_TURNS);
        assert!(transcript.turns.iter().all(|t| t.text.chars().count() <= MAX_TURN_LEN));
    }

    #[test]
    fn test_reaction_summary_format() {
        let reactions = vec![reaction("downtown", Stance::Support, "Looks good.")];
        let summary = Moderator::format_reactions(&reactions);
        assert!(summary.contains("David Park"));
        assert!(summary.contains("👍 SUPPORT"));
        assert!(summary.contains("Quote: \"Looks good.\""));
        assert!(summary.contains("Concerns: cost"));
    }
}
