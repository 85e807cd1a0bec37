mod common;

use civicsim::catalog;
use civicsim::config::SimConfig;
use civicsim::model::SimulateRequest;
use civicsim::orchestrator::SimulationOrchestrator;
use common::MockUpstream;
use std::sync::Arc;
use std::time::Duration;

fn request(message: &str, session_id: &str) -> SimulateRequest {
    SimulateRequest {
        session_id: Some(session_id.to_string()),
        message: message.to_string(),
        scenario_id: None,
        sim_mode: "multi_agent".to_string(),
        vicinity: None,
    }
}

/// Poll the job until it reaches a terminal status, collecting every
/// observed progress value along the way.
async fn poll_to_completion(
    orchestrator: &Arc<SimulationOrchestrator>,
    job_id: &str,
) -> (serde_json::Value, Vec<f64>) {
    let mut observed_progress = Vec::new();
    for _ in 0..500 {
        let status = orchestrator
            .simulate_status(job_id)
            .await
            .expect("job should exist while polling");
        observed_progress.push(status["progress"].as_f64().unwrap());
        let state = status["status"].as_str().unwrap().to_string();
        if state == "complete" || state == "error" {
            return (status, observed_progress);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {} never reached a terminal status", job_id);
}

#[tokio::test]
async fn test_progressive_job_streams_all_completions() {
    let upstream = Arc::new(MockUpstream::new());
    let orchestrator = Arc::new(SimulationOrchestrator::new(upstream, SimConfig::default()));

    let job_id = orchestrator
        .simulate_start(request("Build a new park near the waterfront", "s1"))
        .await
        .unwrap();

    let (status, observed_progress) = poll_to_completion(&orchestrator, &job_id).await;

    assert_eq!(status["status"], "complete");
    assert_eq!(status["progress"].as_f64().unwrap(), 100.0);
    assert_eq!(
        status["completed_agents"].as_u64().unwrap() as usize,
        catalog::agent_count()
    );
    assert_eq!(
        status["total_agents"].as_u64().unwrap() as usize,
        catalog::agent_count()
    );

    // Progress only ever moves forward.
    for pair in observed_progress.windows(2) {
        assert!(
            pair[1] >= pair[0],
            "progress went backwards: {:?}",
            observed_progress
        );
    }

    // Partial reactions carry every agent, in completion order, and the
    // final result mirrors the synchronous response shape.
    let partials = status["partial_reactions"].as_array().unwrap();
    assert_eq!(partials.len(), catalog::agent_count());
    let result = &status["result"];
    assert_eq!(
        result["reactions"].as_array().unwrap().len(),
        catalog::agent_count()
    );
    assert_eq!(
        result["zone_sentiments"].as_array().unwrap().len(),
        catalog::ZONES.len()
    );
    assert!(result["transcript"]["turns"].as_array().unwrap().len() >= 5);
}

#[tokio::test]
async fn test_progressive_result_mirrors_sync_payload() {
    let upstream = Arc::new(MockUpstream::new());
    let orchestrator = Arc::new(SimulationOrchestrator::new(upstream, SimConfig::default()));

    let sync_response = orchestrator
        .simulate_sync(&request("Build a new park near the waterfront", "sync-session"))
        .await
        .unwrap();

    let job_id = orchestrator
        .simulate_start(request("Build a new park near the waterfront", "job-session"))
        .await
        .unwrap();
    let (status, _) = poll_to_completion(&orchestrator, &job_id).await;
    let result = &status["result"];

    // Same payload modulo the session-specific and timing fields.
    assert_eq!(
        result["proposal"]["title"],
        serde_json::json!(sync_response.proposal.as_ref().unwrap().title)
    );
    assert_eq!(
        result["reactions"].as_array().unwrap().len(),
        sync_response.reactions.len()
    );
    assert_eq!(
        result["zone_sentiments"].as_array().unwrap().len(),
        sync_response.zone_sentiments.len()
    );
}

#[tokio::test]
async fn test_clarification_completes_job_with_empty_payload() {
    let upstream = Arc::new(MockUpstream::clarifying());
    let orchestrator = Arc::new(SimulationOrchestrator::new(upstream, SimConfig::default()));

    let job_id = orchestrator
        .simulate_start(request("hello", "s1"))
        .await
        .unwrap();
    let (status, _) = poll_to_completion(&orchestrator, &job_id).await;

    assert_eq!(status["status"], "complete");
    let result = &status["result"];
    assert!(result["proposal"].is_null());
    assert_eq!(result["reactions"].as_array().unwrap().len(), 0);
    assert!(result["assistant_message"]
        .as_str()
        .unwrap()
        .contains("clarify"));
}

#[tokio::test]
async fn test_job_is_recorded_as_session_latest() {
    let upstream = Arc::new(MockUpstream::new());
    let orchestrator = Arc::new(SimulationOrchestrator::new(upstream, SimConfig::default()));

    let job_id = orchestrator
        .simulate_start(request("Build a new park near the waterfront", "s1"))
        .await
        .unwrap();

    let info = orchestrator.sessions().debug_info("s1").await;
    assert_eq!(info["latest_job_id"], serde_json::json!(job_id));

    let (_, _) = poll_to_completion(&orchestrator, &job_id).await;

    // After completion every agent shows up as recently completed and none
    // remain active.
    let calls = orchestrator.active_calls("s1").await.unwrap();
    assert!(calls.active.is_empty());
    assert_eq!(calls.recently_completed.len(), catalog::agent_count());
}

#[tokio::test]
async fn test_unknown_job_polls_as_none() {
    let upstream = Arc::new(MockUpstream::new());
    let orchestrator = Arc::new(SimulationOrchestrator::new(upstream, SimConfig::default()));
    assert!(orchestrator.simulate_status("no-such-job").await.is_none());
}
