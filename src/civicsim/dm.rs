//! Agent-to-agent direct messages.
//!
//! A DM between an ordered pair `(from, to)` runs on a dedicated thread keyed
//! by the unordered pair, so both directions share one conversation. The
//! exchange is two upstream calls: first the recipient's in-voice reply, then
//! a structured follow-up that extracts a relationship delta and an optional
//! stance change. The delta lands on the *recipient's* edge toward the
//! speaker, and a confirmed stance change is echoed into the recipient's main
//! agent thread so future reactions recall the shift.

use std::sync::Arc;

use crate::catalog;
use crate::config::SimConfig;
use crate::model::{
    strip_code_fences, truncate_chars, DmResponse, DmUpdate, SimError, Stance,
};
use crate::session::{SessionStore, SessionThreads};
use crate::upstream::Upstream;

const DM_ASSISTANT_NAME: &str = "CivicSim DM";
const DM_SYSTEM_PROMPT: &str = "You roleplay private conversations between Kingston civic \
stakeholders. Stay in character for whoever you are asked to speak as.";

/// Sends direct messages between agents and applies the fallout.
pub struct DirectMessenger {
    upstream: Arc<dyn Upstream>,
    sessions: Arc<SessionStore>,
    config: Arc<SimConfig>,
}

impl DirectMessenger {
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

    /// Deliver `message` from agent `from` to agent `to` and return the
    /// recipient's reply together with the structured relationship update.
    pub async fn send(
        &self,
        session_id: &str,
        from: &str,
        to: &str,
        message: &str,
        proposal_title: Option<&str>,
    ) -> Result<DmResponse, SimError> {
        let from_agent = catalog::get_agent(from)
            .ok_or_else(|| SimError::InvalidInput(format!("unknown agent key: {}", from)))?;
        let to_agent = catalog::get_agent(to)
            .ok_or_else(|| SimError::InvalidInput(format!("unknown agent key: {}", to)))?;
        if from == to {
            return Err(SimError::InvalidInput(
                "an agent cannot DM itself".to_string(),
            ));
        }
        if message.trim().is_empty() {
            return Err(SimError::InvalidInput("message cannot be empty".to_string()));
        }

        let (_, session_handle) = self.sessions.get_or_create(Some(session_id));

        // Bind the shared DM assistant and the pair thread under the lock.
        let (thread_id, send_lock) = {
            let mut session = session_handle.lock().await;
            let key = SessionThreads::dm_thread_key(from, to);
            if !session.dm_threads.contains_key(&key) {
                if session.dm_assistant_id.is_none() {
                    let assistant_id = self
                        .upstream
                        .create_assistant(DM_ASSISTANT_NAME, DM_SYSTEM_PROMPT)
                        .await?;
                    log::info!("[DM] created assistant={}", assistant_id);
                    session.dm_assistant_id = Some(assistant_id);
                }
                let assistant_id = session
                    .dm_assistant_id
                    .clone()
                    .expect("assistant id set above");
                let thread_id = self.upstream.create_thread(&assistant_id).await?;
                log::info!(
                    "[DM] created thread={} for pair={} session={}",
                    thread_id,
                    key,
                    session_id
                );
                session.dm_threads.insert(key.clone(), thread_id);
            }
            let thread_id = session
                .dm_threads
                .get(&key)
                .cloned()
                .expect("thread id set above");
            let send_lock = session.send_lock(&thread_id);
            (thread_id, send_lock)
        };

        let model = self.config.default_model.clone();
        let provider = self.config.provider_for(&model);

        // Hold the pair thread for the whole two-call exchange so an
        // opposite-direction DM cannot interleave.
        let exchange_guard = send_lock.lock().await;

        // First call: the recipient answers in voice.
        let reply_prompt = format!(
            "This is a private conversation between two Kingston stakeholders.\n\
{} ({}) says to {} ({}):\n\
\"{}\"\n\n\
Respond in the voice of {}, staying fully in character. 2-4 sentences, first person, \
no narration.",
            from_agent.display_name,
            from_agent.role,
            to_agent.display_name,
            to_agent.role,
            message,
            to_agent.display_name,
        );
        let reply = self
            .upstream
            .send_message(&thread_id, &reply_prompt, &model, provider)
            .await?;
        log::info!(
            "[DM] session={} {} -> {} reply_len={}",
            session_id,
            from,
            to,
            reply.len()
        );

        // Second call, same thread: extract the structured fallout.
        let update_prompt = format!(
            "Based on that exchange, how did {}'s view of {} shift?\n\n\
Respond with ONLY valid JSON:\n\
- relationship_delta: -1.0 to 1.0 (how much warmer or cooler {} now feels)\n\
- stance_changed: true or false\n\
- new_stance: \"support\", \"oppose\", or \"neutral\" (only if stance_changed)\n\
- new_intensity: 0.0 to 1.0 (only if stance_changed)\n\
- reason: one sentence explaining the shift\n\n\
Respond with JSON only.",
            to_agent.display_name, from_agent.display_name, to_agent.display_name,
        );
        let update = match self
            .upstream
            .send_message(&thread_id, &update_prompt, &model, provider)
            .await
        {
            Ok(text) => Self::parse_update(&text),
            Err(e) => {
                log::warn!("[DM] structured follow-up failed, assuming no change: {}", e);
                DmUpdate::no_change()
            }
        };
        drop(exchange_guard);

        // The delta lands on the recipient's edge toward the speaker.
        let new_score = {
            let mut session = session_handle.lock().await;
            session.update_relationship(
                to,
                from,
                update.relationship_delta,
                &update.reason,
                message,
                None,
                update.new_stance.map(|s| s.as_str()),
            )
        };

        // A confirmed stance change is remembered by the recipient's main
        // thread so later reactions pick it up.
        if update.stance_changed {
            if let Some(title) = proposal_title {
                self.note_stance_update(&session_handle, to_agent.display_name, to, from_agent.display_name, title, &update)
                    .await;
            }
        }

        Ok(DmResponse {
            reply,
            stance_update: update,
            relationship_score: new_score,
        })
    }

    /// Best-effort "[STANCE UPDATE]" note into the recipient's main agent
    /// thread. Failures are logged and swallowed.
    async fn note_stance_update(
        &self,
        session_handle: &Arc<tokio::sync::Mutex<SessionThreads>>,
        to_name: &str,
        to_key: &str,
        from_name: &str,
        proposal_title: &str,
        update: &DmUpdate,
    ) {
        let main_thread = {
            let mut session = session_handle.lock().await;
            match session.agent_threads.get(to_key).cloned() {
                Some(id) => {
                    let lock = session.send_lock(&id);
                    Some((id, lock))
                }
                None => None,
            }
        };
        let (thread_id, send_lock) = match main_thread {
            Some(pair) => pair,
            None => {
                log::debug!("[DM] no main thread for {} yet, skipping stance note", to_key);
                return;
            }
        };

        let stance = update
            .new_stance
            .map(|s| s.as_str())
            .unwrap_or(Stance::Neutral.as_str());
        let intensity = update.new_intensity.unwrap_or(0.5);
        let note = format!(
            "[STANCE UPDATE] After a private conversation with {}, you ({}) now feel \"{}\" \
(intensity {:.1}) about \"{}\". Reason: {}. Remember this in future reactions.",
            from_name,
            to_name,
            stance,
            intensity,
            truncate_chars(proposal_title, 80),
            update.reason,
        );

        let model = self.config.default_model.clone();
        let provider = self.config.provider_for(&model);
        let _guard = send_lock.lock().await;
        if let Err(e) = self
            .upstream
            .send_message(&thread_id, &note, &model, provider)
            .await
        {
            log::warn!("[DM] stance note to {} failed: {}", to_key, e);
        } else {
            log::info!("[DM] stance update recorded on {}'s main thread", to_key);
        }
    }

    /// Lenient parse of the structured follow-up. Any failure means "no
    /// significant change".
    fn parse_update(reply: &str) -> DmUpdate {
        let text = strip_code_fences(reply);
        let data: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => {
                log::warn!("[DM] structured update parse failed");
                return DmUpdate::no_change();
            }
        };

        let delta = data
            .get("relationship_delta")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
            .max(-1.0)
            .min(1.0);
        let stance_changed = data
            .get("stance_changed")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        DmUpdate {
            relationship_delta: delta,
            stance_changed,
            new_stance: if stance_changed {
                data.get("new_stance")
                    .and_then(|v| v.as_str())
                    .map(Stance::parse)
            } else {
                None
            },
            new_intensity: if stance_changed {
                data.get("new_intensity")
                    .and_then(|v| v.as_f64())
                    .map(|i| i.max(0.0).min(1.0))
            } else {
                None
            },
            reason: data
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or("no significant change")
                .to_string(),
        }
    }
}
