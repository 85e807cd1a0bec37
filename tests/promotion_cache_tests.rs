mod common;

use civicsim::config::SimConfig;
use civicsim::model::{
    AgentOverride, LocationKind, PromoteRequest, Proposal, ProposalKind, ProposalLocation,
    ProposalParameters,
};
use civicsim::orchestrator::SimulationOrchestrator;
use civicsim::upstream::Upstream;
use common::MockUpstream;
use std::sync::Arc;

fn park_proposal() -> Proposal {
    Proposal {
        kind: ProposalKind::Build,
        title: "Waterfront Park".to_string(),
        summary: "A new public park near the waterfront.".to_string(),
        location: ProposalLocation {
            kind: LocationKind::Zone,
            zone_ids: vec!["downtown".to_string()],
            point: None,
            polygon: None,
            radius_km: None,
        },
        parameters: ProposalParameters::default(),
        affected_regions: vec![],
        containing_zone: None,
    }
}

fn promote_request(scenario_id: &str) -> PromoteRequest {
    PromoteRequest {
        scenario_id: scenario_id.to_string(),
        session_id: Some("promo-session".to_string()),
        proposal: park_proposal(),
        sim_mode: "multi_agent".to_string(),
    }
}

#[tokio::test]
async fn test_promote_miss_then_hit() {
    let upstream = Arc::new(MockUpstream::new());
    let orchestrator =
        SimulationOrchestrator::new(Arc::clone(&upstream) as Arc<dyn Upstream>, SimConfig::default());

    let first = orchestrator.promote(&promote_request("scen-1")).await.unwrap();
    assert!(!first.cached);
    assert_eq!(first.key.len(), 32);
    let sends_after_first = upstream.send_count();
    assert!(sends_after_first > 0);

    // Second identical promote: cache hit, byte-equal result, zero new
    // upstream sends.
    let second = orchestrator.promote(&promote_request("scen-1")).await.unwrap();
    assert!(second.cached);
    assert_eq!(second.key, first.key);
    assert_eq!(
        serde_json::to_string(&second.result).unwrap(),
        serde_json::to_string(&first.result).unwrap()
    );
    assert_eq!(upstream.send_count(), sends_after_first);

    // cache_get agrees.
    let (cached_result, provider_mix) = orchestrator.cache_get(&first.key).await.unwrap();
    assert_eq!(
        serde_json::to_string(&cached_result).unwrap(),
        serde_json::to_string(&first.result).unwrap()
    );
    assert_eq!(provider_mix, first.provider_mix);
}

#[tokio::test]
async fn test_provider_mix_reflects_overrides() {
    let upstream = Arc::new(MockUpstream::new());
    let orchestrator = SimulationOrchestrator::new(upstream, SimConfig::default());

    let plain = orchestrator.promote(&promote_request("scen-1")).await.unwrap();
    assert_eq!(plain.provider_mix, "amazon x7");

    orchestrator
        .set_override(
            "scen-1",
            "downtown",
            AgentOverride {
                model: Some("anthropic/claude-3-haiku".to_string()),
                persona: None,
            },
        )
        .await
        .unwrap();

    let mixed = orchestrator.promote(&promote_request("scen-1")).await.unwrap();
    assert_eq!(mixed.provider_mix, "amazon x6, anthropic x1");
}

#[tokio::test]
async fn test_model_override_invalidates_and_changes_key() {
    let upstream = Arc::new(MockUpstream::new());
    let orchestrator = SimulationOrchestrator::new(upstream, SimConfig::default());

    let first = orchestrator.promote(&promote_request("scen-1")).await.unwrap();
    assert!(orchestrator.cache_get(&first.key).await.is_some());

    // Setting a per-agent model override evicts the scenario's entries.
    orchestrator
        .set_override(
            "scen-1",
            "downtown",
            AgentOverride {
                model: Some("anthropic/claude-3-haiku".to_string()),
                persona: None,
            },
        )
        .await
        .unwrap();
    assert!(orchestrator.cache_get(&first.key).await.is_none());

    // The next promote runs fresh under a different key.
    let second = orchestrator.promote(&promote_request("scen-1")).await.unwrap();
    assert!(!second.cached);
    assert_ne!(second.key, first.key);
}

#[tokio::test]
async fn test_persona_override_changes_key_too() {
    let upstream = Arc::new(MockUpstream::new());
    let orchestrator = SimulationOrchestrator::new(upstream, SimConfig::default());

    let base = orchestrator.promote(&promote_request("scen-1")).await.unwrap();
    orchestrator
        .set_override(
            "scen-1",
            "sydenham",
            AgentOverride {
                model: None,
                persona: Some("You are suddenly very enthusiastic about parks.".to_string()),
            },
        )
        .await
        .unwrap();

    let with_persona = orchestrator.promote(&promote_request("scen-1")).await.unwrap();
    assert_ne!(with_persona.key, base.key);

    // Resetting restores the original fingerprint (and invalidates again).
    orchestrator.reset_override("scen-1", "sydenham").await.unwrap();
    let restored = orchestrator.promote(&promote_request("scen-1")).await.unwrap();
    assert_eq!(restored.key, base.key);
    assert!(!restored.cached);
}

#[tokio::test]
async fn test_override_validation() {
    let upstream = Arc::new(MockUpstream::new());
    let orchestrator = SimulationOrchestrator::new(upstream, SimConfig::default());

    let err = orchestrator
        .set_override(
            "scen-1",
            "downtown",
            AgentOverride {
                model: Some("gpt-4o".to_string()),
                persona: None,
            },
        )
        .await
        .unwrap_err();
    assert!(format!("{}", err).contains("allow-list"));

    let err = orchestrator
        .set_override("scen-1", "atlantis", AgentOverride::default())
        .await
        .unwrap_err();
    assert!(format!("{}", err).contains("unknown agent"));
}

#[tokio::test]
async fn test_explicit_invalidation_by_scenario() {
    let upstream = Arc::new(MockUpstream::new());
    let orchestrator = SimulationOrchestrator::new(upstream, SimConfig::default());

    let scen1 = orchestrator.promote(&promote_request("scen-1")).await.unwrap();
    let scen2 = orchestrator.promote(&promote_request("scen-2")).await.unwrap();

    let removed = orchestrator.invalidate_cache("scen-1", None).await;
    assert_eq!(removed, 1);
    assert!(orchestrator.cache_get(&scen1.key).await.is_none());
    // Other scenarios are untouched.
    assert!(orchestrator.cache_get(&scen2.key).await.is_some());
}
