//! Turns free text into a structured [`Proposal`].
//!
//! One upstream call per interpretation. The first call in a session lazily
//! creates the interpreter assistant and a thread; both ids are cached on the
//! session so subsequent interpretations reuse the thread and benefit from the
//! upstream's conversational memory.
//!
//! Replies are parsed leniently: markdown fences are stripped, a top-level
//! list is tolerated by taking its first object, and a list-valued
//! `target_group` is coerced to a comma-joined string. A reply that cannot be
//! parsed never raises; it produces `ok = false` with a human-readable
//! error. Upstream failures do propagate, as [`UpstreamError`].

use std::sync::Arc;

use crate::catalog;
use crate::config::SimConfig;
use crate::model::{
    strip_code_fences, GeoPoint, InterpretResult, LocationKind, Proposal, ProposalKind,
    ProposalLocation, ProposalParameters,
};
use crate::session::SessionStore;
use crate::upstream::{Upstream, UpstreamError};

const INTERPRETER_NAME: &str = "CivicSim Interpreter";
const INTERPRETER_SYSTEM_PROMPT: &str =
    "You interpret civic proposals into structured JSON. Always respond with valid JSON only.";

/// Interprets user proposals via the upstream gateway.
pub struct Interpreter {
    upstream: Arc<dyn Upstream>,
    sessions: Arc<SessionStore>,
    config: Arc<SimConfig>,
}

impl Interpreter {
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

    fn build_prompt(message: &str) -> String {
        let zone_names = catalog::ZONES
            .iter()
            .map(|z| z.name)
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "You are interpreting a civic proposal for Kingston, Ontario.\n\n\
Convert the user's message into a structured proposal. Determine if it's a BUILD action \
(spatial: parks, housing, transit, etc.) or a POLICY action (citywide: taxes, subsidies, \
regulations, etc.).\n\n\
Known Kingston zones: {}.\n\n\
Respond with ONLY valid JSON in this exact format:\n\
- ok: true if interpretation succeeded, false if unclear\n\
- proposal.type: \"build\" or \"policy\"\n\
- proposal.title: short title (5-10 words)\n\
- proposal.summary: one sentence description\n\
- proposal.location.kind: \"none\", \"zone\", \"point\", or \"polygon\"\n\
- proposal.location.zone_ids: list of affected zone IDs if kind=\"zone\" (use: {})\n\
- proposal.parameters.scale: 1.0 default, adjust for \"double\" (2.0), \"small\" (0.5), etc.\n\
- proposal.parameters.budget_millions: if mentioned\n\
- proposal.parameters.target_group: if targeting a specific group (low-income, students, etc.)\n\
- assumptions: list of assumptions you made\n\
- clarifying_questions: questions if input is ambiguous (max 2)\n\
- confidence: 0-1 how confident in interpretation\n\n\
USER MESSAGE: {}\n\n\
Respond with JSON only, no other text.",
            zone_names,
            catalog::zone_id_list(),
            message
        )
    }

    /// Interpret a user message into a structured proposal, reusing the
    /// session's interpreter thread for conversational continuity.
    pub async fn interpret(
        &self,
        message: &str,
        session_id: &str,
    ) -> Result<InterpretResult, UpstreamError> {
        let (_, session_handle) = self.sessions.get_or_create(Some(session_id));
        let prompt = Self::build_prompt(message);

        // Lazily bind the assistant + thread under the session lock so two
        // concurrent interpretations cannot double-create.
        let (thread_id, send_lock) = {
            let mut session = session_handle.lock().await;
            if session.interpreter_thread_id.is_none() {
                if session.interpreter_assistant_id.is_none() {
                    let assistant_id = self
                        .upstream
                        .create_assistant(INTERPRETER_NAME, INTERPRETER_SYSTEM_PROMPT)
                        .await?;
                    log::info!("[INTERPRETER] created assistant={}", assistant_id);
                    session.interpreter_assistant_id = Some(assistant_id);
                }
                let assistant_id = session
                    .interpreter_assistant_id
                    .clone()
                    .expect("assistant id set above");
                let thread_id = self.upstream.create_thread(&assistant_id).await?;
                log::info!(
                    "[INTERPRETER] created thread={} for session={}",
                    thread_id,
                    session_id
                );
                session.interpreter_thread_id = Some(thread_id);
            }
            let thread_id = session
                .interpreter_thread_id
                .clone()
                .expect("thread id set above");
            let send_lock = session.send_lock(&thread_id);
            (thread_id, send_lock)
        };

        log::info!(
            "[INTERPRETER] session={} thread={} content_len={}",
            session_id,
            thread_id,
            prompt.len()
        );

        let model = self.config.default_model.clone();
        let provider = self.config.provider_for(&model);
        let reply = {
            let _guard = send_lock.lock().await;
            self.upstream
                .send_message(&thread_id, &prompt, &model, provider)
                .await?
        };

        log::info!(
            "[INTERPRETER] session={} response_len={}",
            session_id,
            reply.len()
        );
        Ok(Self::parse_response(&reply))
    }

    /// Lenient parse of the upstream reply. Never fails; parse problems
    /// yield `ok = false` with an error message.
    fn parse_response(reply: &str) -> InterpretResult {
        let text = strip_code_fences(reply);

        let mut data: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("[INTERPRETER] JSON parse failed: {}", e);
                return InterpretResult::failed(format!(
                    "Failed to parse LLM response as JSON: {}",
                    crate::model::truncate_chars(&e.to_string(), 100)
                ));
            }
        };

        // Some models occasionally return a top-level list; take the first
        // object if there is one.
        if data.is_array() {
            log::warn!("[INTERPRETER] LLM returned list; using first element");
            let first = data
                .as_array()
                .and_then(|items| items.iter().find(|v| v.is_object()).cloned());
            match first {
                Some(object) => data = object,
                None => {
                    return InterpretResult::failed(
                        "Failed to construct result: LLM returned a list without an object payload",
                    )
                }
            }
        }

        let ok = data.get("ok").and_then(|v| v.as_bool()).unwrap_or(true);
        let proposal = if ok {
            data.get("proposal").and_then(Self::parse_proposal)
        } else {
            None
        };

        InterpretResult {
            ok,
            proposal,
            assumptions: crate::model::normalize_string_list(data.get("assumptions"), usize::MAX),
            clarifying_questions: crate::model::normalize_string_list(
                data.get("clarifying_questions"),
                2,
            ),
            confidence: data
                .get("confidence")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.8),
            error: data
                .get("error")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        }
    }

    fn parse_proposal(p: &serde_json::Value) -> Option<Proposal> {
        if !p.is_object() {
            return None;
        }

        let kind = match p.get("type").and_then(|v| v.as_str()) {
            Some("build") => ProposalKind::Build,
            _ => ProposalKind::Policy,
        };

        let loc = p.get("location").cloned().unwrap_or(serde_json::json!({}));
        let location_kind = match loc.get("kind").and_then(|v| v.as_str()) {
            Some("zone") => LocationKind::Zone,
            Some("point") => LocationKind::Point,
            Some("polygon") => LocationKind::Polygon,
            _ => LocationKind::None,
        };
        // Unknown zone ids are dropped rather than failing the proposal.
        let zone_ids: Vec<String> = loc
            .get("zone_ids")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .filter(|id| {
                        let known = catalog::get_zone(id).is_some();
                        if !known {
                            log::warn!("[INTERPRETER] dropping unknown zone id: {}", id);
                        }
                        known
                    })
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();
        let point = loc.get("point").and_then(|v| {
            Some(GeoPoint {
                latitude: v.get("latitude")?.as_f64()?,
                longitude: v.get("longitude")?.as_f64()?,
            })
        });

        let params = p
            .get("parameters")
            .cloned()
            .unwrap_or(serde_json::json!({}));
        // Coerce a list-valued target_group to a comma-joined string.
        let target_group = match params.get("target_group") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Array(items)) => {
                let joined = items
                    .iter()
                    .map(|v| match v.as_str() {
                        Some(s) => s.to_string(),
                        None => v.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                if joined.is_empty() {
                    None
                } else {
                    Some(joined)
                }
            }
            Some(serde_json::Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };

        Some(Proposal {
            kind,
            title: p
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or("Untitled Proposal")
                .to_string(),
            summary: p
                .get("summary")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
            location: ProposalLocation {
                kind: location_kind,
                zone_ids,
                point,
                polygon: None,
                radius_km: loc.get("radius_km").and_then(|v| v.as_f64()),
            },
            parameters: ProposalParameters {
                scale: params.get("scale").and_then(|v| v.as_f64()).unwrap_or(1.0),
                budget_millions: params.get("budget_millions").and_then(|v| v.as_f64()),
                target_group,
            },
            affected_regions: Vec::new(),
            containing_zone: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_build_proposal() {
        let reply = r#"{
            "ok": true,
            "proposal": {
                "type": "build",
                "title": "Waterfront Park",
                "summary": "A new park near the waterfront.",
                "location": {"kind": "zone", "zone_ids": ["downtown", "imaginary"]},
                "parameters": {"scale": 1.0, "target_group": ["families", "students"]}
            },
            "assumptions": ["Assumed mid-size park"],
            "clarifying_questions": [],
            "confidence": 0.9
        }"#;
        let result = Interpreter::parse_response(reply);
        assert!(result.ok);
        let proposal = result.proposal.unwrap();
        assert_eq!(proposal.kind, ProposalKind::Build);
        assert_eq!(proposal.title, "Waterfront Park");
        // Unknown zone ids are dropped.
        assert_eq!(proposal.location.zone_ids, vec!["downtown"]);
        // List-valued target_group is comma-joined.
        assert_eq!(
            proposal.parameters.target_group.as_deref(),
            Some("families, students")
        );
        assert_eq!(result.assumptions.len(), 1);
    }

    #[test]
    fn test_parse_fenced_reply() {
        let reply = "```json\n{\"ok\": true, \"proposal\": {\"type\": \"policy\", \"title\": \"T\", \"summary\": \"S\"}}\n```";
        let result = Interpreter::parse_response(reply);
        assert!(result.ok);
        assert_eq!(result.proposal.unwrap().kind, ProposalKind::Policy);
    }

    #[test]
    fn test_parse_top_level_list() {
        let reply = r#"[{"ok": true, "proposal": {"type": "policy", "title": "T", "summary": "S"}}]"#;
        let result = Interpreter::parse_response(reply);
        assert!(result.ok);
        assert!(result.proposal.is_some());
    }

    #[test]
    fn test_parse_failure_is_not_fatal() {
        let result = Interpreter::parse_response("this is not json at all");
        assert!(!result.ok);
        assert!(result.error.unwrap().contains("Failed to parse"));
    }

    #[test]
    fn test_clarification_reply() {
        let reply = r#"{
            "ok": false,
            "clarifying_questions": ["Where should it go?", "How big?", "Third question dropped"]
        }"#;
        let result = Interpreter::parse_response(reply);
        assert!(!result.ok);
        assert!(result.proposal.is_none());
        // Max two clarifying questions are kept.
        assert_eq!(result.clarifying_questions.len(), 2);
    }
}
