//! Communication hub integration tests.
//!
//! These tests exercise help requests, handoffs, escalations and
//! subscriptions between teams, on their own and as posted by a run.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use agency::comms::{CommunicationHub, ItemStatus, MessageKind, Priority, Recipient};
use agency::core::TeamId;

use crate::fixtures::{orchestrator, test_config, two_branches, Response, ScriptedTeam, UNGROUNDED};

fn t(s: &str) -> TeamId {
    TeamId::from(s)
}

fn agency_hub() -> CommunicationHub {
    let hub = CommunicationHub::default();
    for team in [
        "architecture",
        "devops",
        "data_engineering",
        "data_science",
        "data_analytics",
        "qa",
        "product_owner",
    ] {
        hub.register_team(team);
    }
    hub
}

/// Test: Help request routing and answers
/// Given a help request about model drift
/// When data_science, the only routed team, answers
/// Then the collaboration is Resolved and the answer reaches the requester
#[test]
fn test_help_request_is_routed_and_resolved() {
    let hub = agency_hub();
    let id = hub
        .request_help(
            &t("data_analytics"),
            "model drift",
            "forecast error doubled since last week",
            &[],
            Priority::High,
        )
        .unwrap();

    let collaboration = hub.collaboration(&id).unwrap();
    assert_eq!(collaboration.targets, vec![t("data_science")]);
    assert_eq!(hub.get_open_collaborations(&t("data_science")).len(), 1);
    assert!(hub.get_open_collaborations(&t("qa")).is_empty());

    let status = hub
        .respond_to_collaboration(&id, &t("data_science"), "retraining on the new window")
        .unwrap();
    assert_eq!(status, ItemStatus::Resolved);
    assert!(hub.get_open_collaborations(&t("data_science")).is_empty());

    let answers: Vec<_> = hub
        .inbox(&t("data_analytics"))
        .into_iter()
        .filter(|m| m.kind == MessageKind::CollaborationResponse)
        .collect();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].body, "retraining on the new window");
}

/// Test: Partial answers keep a collaboration open
#[test]
fn test_partial_answers_acknowledge() {
    let hub = agency_hub();
    let id = hub
        .request_help(&t("data_analytics"), "deploy window", "", &[], Priority::Normal)
        .unwrap();
    let targets = hub.collaboration(&id).unwrap().targets;
    assert_eq!(targets, vec![t("devops"), t("qa")]);

    let status = hub
        .respond_to_collaboration(&id, &targets[0], "friday evening")
        .unwrap();
    assert_eq!(status, ItemStatus::Acknowledged);
    assert_eq!(hub.get_open_collaborations(&targets[1]).len(), 1);
}

/// Test: Unrouted requests go to the escalation team
#[test]
fn test_unrouted_request_falls_back() {
    let hub = agency_hub();
    let id = hub
        .request_help(&t("qa"), "office party", "who brings cake", &[], Priority::Low)
        .unwrap();
    assert_eq!(hub.collaboration(&id).unwrap().targets, vec![t("architecture")]);
}

/// Test: Subscribers see only messages addressed to them
#[test]
fn test_subscriber_receives_handoff() {
    let hub = agency_hub();
    let devops = hub.subscribe(&t("devops")).unwrap();
    let qa = hub.subscribe(&t("qa")).unwrap();

    let context = BTreeMap::from([("environment".to_string(), "staging".to_string())]);
    hub.handoff(
        &t("architecture"),
        &t("devops"),
        "landing zone design is ready",
        &["architecture.md".to_string()],
        context,
    )
    .unwrap();

    let message = devops.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(message.kind, MessageKind::Handoff);
    assert_eq!(message.from, t("architecture"));
    assert_eq!(
        message.metadata.get("environment"),
        Some(&"staging".to_string())
    );
    assert_eq!(
        message.metadata.get("deliverables"),
        Some(&"architecture.md".to_string())
    );
    assert!(qa.try_recv().is_err());
}

/// Test: Escalation lifecycle
/// Given an escalation from qa
/// When architecture resolves it
/// Then it leaves the open list and qa is told the decision
#[test]
fn test_escalation_resolution_notifies_requester() {
    let hub = agency_hub();
    let options = vec!["delay release".to_string(), "ship with waiver".to_string()];
    let id = hub
        .escalate(&t("qa"), "release blocked", &options, BTreeMap::new())
        .unwrap();

    let escalation = hub.escalation(&id).unwrap();
    assert_eq!(escalation.to, Recipient::Team(t("architecture")));
    assert_eq!(hub.open_escalations().len(), 1);

    hub.acknowledge_escalation(&id).unwrap();
    assert_eq!(hub.escalation(&id).unwrap().status, ItemStatus::Acknowledged);

    hub.resolve_escalation(&id, &t("architecture"), "ship with waiver")
        .unwrap();
    assert!(hub.open_escalations().is_empty());
    let resolved = hub.escalation(&id).unwrap();
    assert_eq!(resolved.decision.as_deref(), Some("ship with waiver"));
    assert_eq!(resolved.decided_by, Some(t("architecture")));

    let decision = hub
        .inbox(&t("qa"))
        .into_iter()
        .find(|m| m.kind == MessageKind::EscalationResolved)
        .unwrap();
    assert_eq!(decision.body, "ship with waiver");
}

/// Test: Escalations raised by a run belong to its project
/// Given a project whose task exhausts its retries
/// When the escalation is resolved
/// Then it disappears from the project report
#[tokio::test]
async fn test_run_escalation_is_resolved_from_report() {
    let x = Arc::new(
        ScriptedTeam::new("x").with_script("left", vec![Response::Content(UNGROUNDED.to_string())]),
    );
    let y = Arc::new(ScriptedTeam::new("y"));
    let architecture = Arc::new(ScriptedTeam::new("architecture"));
    let orch = orchestrator(&test_config(1), vec![x, y, architecture]);

    let id = orch.create_project("P", "", "c").await.unwrap();
    orch.submit_tasks(&id, two_branches("x", "y")).await.unwrap();
    let other = orch.create_project("Q", "", "c").await.unwrap();

    let report = orch.run_project(&id).await.unwrap();
    assert_eq!(report.open_escalations.len(), 1);
    let escalation = report.open_escalations[0].clone();
    assert_eq!(escalation.to, Recipient::Team(t("architecture")));
    assert!(escalation.context.contains_key("feedback"));

    let unrelated = orch.get_project_report(&other).await.unwrap();
    assert!(unrelated.open_escalations.is_empty());

    orch.hub()
        .resolve_escalation(&escalation.id, &t("architecture"), "accept with known issues")
        .unwrap();
    let report = orch.get_project_report(&id).await.unwrap();
    assert!(report.open_escalations.is_empty());

    // Dependents on the same team get no handoff.
    assert!(orch.hub().handoffs_to(&t("y")).is_empty());
    let context = orch.hub().team_context(&t("y")).unwrap();
    assert_eq!(context.status, "idle");
}
