//! Scripted mock upstream shared by the integration tests.
//!
//! The mock answers each prompt kind (interpret, reaction, town hall, DM)
//! with canned JSON, records every sent message for assertions, and can be
//! switched into clarify / failing modes.

use async_trait::async_trait;
use civicsim::upstream::{Upstream, UpstreamError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// One recorded `send_message` call.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub thread_id: String,
    pub content: String,
    pub model: String,
}

pub struct MockUpstream {
    /// Interpretation replies ask for clarification instead of a proposal.
    clarify: bool,
    /// Reaction sends fail with a 503.
    fail_reactions: bool,
    /// Relationship delta returned by the structured DM follow-up.
    dm_delta: f64,
    /// Whether the structured DM follow-up reports a stance change.
    dm_stance_changed: bool,
    assistants_created: AtomicUsize,
    threads_created: AtomicUsize,
    counter: AtomicUsize,
    sent: Mutex<Vec<SentMessage>>,
}

impl MockUpstream {
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self {
            clarify: false,
            fail_reactions: false,
            dm_delta: 0.4,
            dm_stance_changed: true,
            assistants_created: AtomicUsize::new(0),
            threads_created: AtomicUsize::new(0),
            counter: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Interpretations come back as clarifying questions.
    pub fn clarifying() -> Self {
        let mut mock = Self::new();
        mock.clarify = true;
        mock
    }

    /// Every reaction call fails upstream.
    pub fn failing_reactions() -> Self {
        let mut mock = Self::new();
        mock.fail_reactions = true;
        mock
    }

    pub fn with_dm(delta: f64, stance_changed: bool) -> Self {
        let mut mock = Self::new();
        mock.dm_delta = delta;
        mock.dm_stance_changed = stance_changed;
        mock
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn assistants_created(&self) -> usize {
        self.assistants_created.load(Ordering::SeqCst)
    }

    pub fn threads_created(&self) -> usize {
        self.threads_created.load(Ordering::SeqCst)
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    fn interpret_reply(&self) -> String {
        if self.clarify {
            r#"{
                "ok": false,
                "clarifying_questions": ["What would you like to build or change?"],
                "confidence": 0.2
            }"#
            .to_string()
        } else {
            r#"{
                "ok": true,
                "proposal": {
                    "type": "build",
                    "title": "Waterfront Park",
                    "summary": "A new public park near the waterfront.",
                    "location": {"kind": "zone", "zone_ids": ["downtown"]},
                    "parameters": {"scale": 1.0}
                },
                "assumptions": ["Assumed a mid-size park"],
                "confidence": 0.9
            }"#
            .to_string()
        }
    }

    fn reaction_reply() -> String {
        r#"{
            "stance": "support",
            "intensity": 0.8,
            "support_reasons": ["good for the community"],
            "concerns": ["construction noise"],
            "quote": "This could really work for our neighborhood.",
            "what_would_change_my_mind": ["a much higher budget"],
            "zones_most_affected": [{"zone_id": "downtown", "effect": "support", "intensity": 0.7}],
            "proposed_amendments": []
        }"#
        .to_string()
    }

    fn transcript_reply() -> String {
        r#"{
            "moderator_summary": "A spirited but productive debate.",
            "turns": [
                {"speaker": "Moderator", "text": "Welcome, everyone."},
                {"speaker": "David Park", "text": "Foot traffic is good for business."},
                {"speaker": "Malik Johnson", "text": "Who is this park really for?"},
                {"speaker": "Margaret Chen", "text": "What about parking?"},
                {"speaker": "Sarah Mitchell", "text": "The plan balances both concerns."},
                {"speaker": "Moderator", "text": "Let's explore a phased rollout."}
            ],
            "compromise_options": ["Phase construction over two years"]
        }"#
        .to_string()
    }

    fn dm_update_reply(&self) -> String {
        format!(
            r#"{{
                "relationship_delta": {},
                "stance_changed": {},
                "new_stance": "support",
                "new_intensity": 0.9,
                "reason": "Convinced by the community benefits."
            }}"#,
            self.dm_delta, self.dm_stance_changed
        )
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    async fn create_assistant(
        &self,
        _name: &str,
        _system_prompt: &str,
    ) -> Result<String, UpstreamError> {
        self.assistants_created.fetch_add(1, Ordering::SeqCst);
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("asst-{}", n))
    }

    async fn create_thread(&self, _assistant_id: &str) -> Result<String, UpstreamError> {
        self.threads_created.fetch_add(1, Ordering::SeqCst);
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("thread-{}", n))
    }

    async fn send_message(
        &self,
        thread_id: &str,
        content: &str,
        model: &str,
        _provider: &str,
    ) -> Result<String, UpstreamError> {
        let is_reaction = content.contains("provide your reaction");
        if is_reaction && self.fail_reactions {
            return Err(UpstreamError::new(503, "upstream unavailable"));
        }

        self.sent.lock().unwrap().push(SentMessage {
            thread_id: thread_id.to_string(),
            content: content.to_string(),
            model: model.to_string(),
        });

        if content.starts_with("[DECISION RECORD]") || content.starts_with("[STANCE UPDATE]") {
            return Ok("Noted.".to_string());
        }
        if content.contains("You are interpreting a civic proposal") {
            return Ok(self.interpret_reply());
        }
        if content.contains("town hall meeting about a civic proposal") {
            return Ok(Self::transcript_reply());
        }
        if content.contains("relationship_delta") {
            return Ok(self.dm_update_reply());
        }
        if content.contains("private conversation between two Kingston stakeholders") {
            return Ok("I hear you. Let me think about what that means for my block.".to_string());
        }
        if is_reaction {
            return Ok(Self::reaction_reply());
        }
        Ok("{}".to_string())
    }
}
