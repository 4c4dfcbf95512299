//! End-to-end orchestrator tests.
//!
//! These tests drive whole projects through the orchestrator with
//! scripted teams: planning, concurrent dispatch, validation retries,
//! failure propagation, cancellation and persistence.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use agency::core::{
    Deliverable, Project, ProjectPhase, ProjectStatus, TaskId, TaskKind, TaskStatus, TeamId,
};
use agency::orchestration::{OrchestratorEvent, RequirementsDescriptor};
use agency::state::{JsonFileStore, MemoryStore, ProjectSnapshot, ProjectStore};
use agency::Error;

use crate::fixtures::{
    catalog_teams, chain, complete_deliverable, id_of, orchestrator, test_config, two_branches,
    with_per_team_limit, ConcurrencyProbe, FlakyStore, Response, ScriptedTeam, UNGROUNDED,
};

/// Wait until every named task has been sent to its team.
async fn wait_for_dispatch(rx: &mut mpsc::Receiver<OrchestratorEvent>, tasks: &[TaskId]) {
    let mut pending: Vec<TaskId> = tasks.to_vec();
    while !pending.is_empty() {
        match rx.recv().await {
            Some(OrchestratorEvent::TaskStarted { task, .. }) => pending.retain(|t| *t != task),
            Some(_) => continue,
            None => panic!("event channel closed before dispatch"),
        }
    }
}

/// Test: Full catalog project
/// Given every catalog team completing its work
/// When a project with ML and analytics is run
/// Then all nine tasks are Done and the project reaches Done
#[tokio::test]
async fn test_full_catalog_project_completes() {
    let config = test_config(3);
    let orch = orchestrator(&config, catalog_teams());
    let id = orch
        .create_project("Retail lakehouse", "Unify store sales", "acme")
        .await
        .unwrap();

    let descriptor = RequirementsDescriptor::default()
        .with_ml(true)
        .with_requirements(&["daily ingestion of store sales", "weekly demand forecast"]);
    let plan = orch.submit_requirements(&id, descriptor).await.unwrap();
    assert!(!plan.blocked);
    assert!(plan.issues.is_empty(), "{:?}", plan.issues);
    assert_eq!(plan.summary.total_tasks, 9);

    let report = orch.run_project(&id).await.unwrap();
    assert_eq!(report.progress.done, 9, "{}", report);
    assert_eq!(report.project.phase, ProjectPhase::Done);
    assert_eq!(report.project.status, ProjectStatus::Completed);
    assert!(report.failed.is_empty());
    assert!(report.open_escalations.is_empty());
    assert!(report.validation_queue.is_empty());

    let phases: Vec<ProjectPhase> = report.project.checkpoints.iter().map(|c| c.phase).collect();
    assert_eq!(
        phases,
        vec![
            ProjectPhase::Requirements,
            ProjectPhase::Planning,
            ProjectPhase::Architecture,
            ProjectPhase::Execution,
            ProjectPhase::Validation,
            ProjectPhase::Done,
        ]
    );

    // Architecture hands its output to the teams that build on it.
    let handoffs = orch.hub().handoffs_to(&TeamId::from("devops"));
    assert!(handoffs
        .iter()
        .any(|h| h.from == TeamId::from("architecture")));
}

/// Test: Independent tasks run concurrently
/// Given two branches on different teams
/// When the project runs
/// Then both branch heads are with their teams at the same time
#[tokio::test]
async fn test_independent_branches_run_concurrently() {
    let probe = ConcurrencyProbe::new();
    let delay = Duration::from_millis(150);
    let x = Arc::new(ScriptedTeam::new("x").with_delay(delay).with_probe(probe.clone()));
    let y = Arc::new(ScriptedTeam::new("y").with_delay(delay).with_probe(probe.clone()));
    let orch = orchestrator(&test_config(3), vec![x, y]);

    let id = orch.create_project("P", "", "c").await.unwrap();
    orch.submit_tasks(&id, two_branches("x", "y")).await.unwrap();
    let report = orch.run_project(&id).await.unwrap();

    assert_eq!(report.progress.done, 4);
    assert_eq!(probe.peak(), 2);
}

/// Test: Per-team limit during a run
/// Given three independent tasks on one team and a limit of one
/// When the project runs
/// Then the team never holds more than one task
#[tokio::test]
async fn test_team_limit_is_respected_during_run() {
    let probe = ConcurrencyProbe::new();
    let team = Arc::new(
        ScriptedTeam::new("qa")
            .with_delay(Duration::from_millis(50))
            .with_probe(probe.clone()),
    );
    let config = with_per_team_limit(test_config(3), 1);
    let orch = orchestrator(&config, vec![team.clone()]);

    let tasks = vec![
        agency::core::Task::new("one", "qa", TaskKind::General),
        agency::core::Task::new("two", "qa", TaskKind::General),
        agency::core::Task::new("three", "qa", TaskKind::General),
    ];
    let id = orch.create_project("P", "", "c").await.unwrap();
    orch.submit_tasks(&id, tasks).await.unwrap();
    let report = orch.run_project(&id).await.unwrap();

    assert_eq!(report.progress.done, 3);
    assert_eq!(probe.peak(), 1);
    assert_eq!(team.calls().len(), 3);
}

/// Test: Retry exhaustion
/// Given a team that keeps delivering ungrounded content for one task
/// When the project runs with max_retries = 3
/// Then the team is called exactly three times for it, the task fails,
/// its dependent is blocked, the other branch finishes and an
/// escalation is open
#[tokio::test]
async fn test_exhausted_task_fails_blocks_and_escalates() {
    let x = Arc::new(ScriptedTeam::new("x").with_script(
        "left",
        vec![
            Response::Content(UNGROUNDED.to_string()),
            Response::Content(UNGROUNDED.to_string()),
            Response::Content(UNGROUNDED.to_string()),
        ],
    ));
    let y = Arc::new(ScriptedTeam::new("y"));
    let orch = orchestrator(&test_config(3), vec![x.clone(), y]);

    let tasks = two_branches("x", "y");
    let left = id_of(&tasks, "left");
    let left_next = id_of(&tasks, "left-next");
    let id = orch.create_project("P", "", "c").await.unwrap();
    orch.submit_tasks(&id, tasks).await.unwrap();
    let report = orch.run_project(&id).await.unwrap();

    let calls = x.calls_for("left");
    assert_eq!(calls.len(), 3);
    assert!(calls[0].feedback.is_empty());
    assert!(!calls[1].feedback.is_empty(), "feedback reaches the team");
    assert!(x.calls_for("left-next").is_empty());

    assert_eq!(report.progress.done, 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, left);
    assert_eq!(report.failed[0].attempts, 3);
    assert_eq!(report.blocked.len(), 1);
    assert_eq!(report.blocked[0].id, left_next);
    assert_eq!(report.project.phase, ProjectPhase::Execution);

    assert_eq!(report.open_escalations.len(), 1);
    let escalation = &report.open_escalations[0];
    assert_eq!(escalation.from, TeamId::from("x"));
    assert_eq!(escalation.context.get("task"), Some(&left.to_string()));
    assert_eq!(escalation.options.len(), 3);

    let gate = orch.advance_phase(&id).await.unwrap();
    assert!(gate.blocked);
    assert!(gate.issues.iter().any(|i| i.contains("left")));

    let err = orch
        .submit_deliverable(&left, Deliverable::text("one more try"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RetriesExhausted { max: 3, .. }));
}

/// Test: Team failure is retried with the error as feedback
#[tokio::test]
async fn test_team_failure_is_retried() {
    let team = Arc::new(
        ScriptedTeam::new("x").with_script("A", vec![Response::Fail("disk full".to_string())]),
    );
    let orch = orchestrator(&test_config(3), vec![team.clone()]);
    let tasks = chain("x");
    let a = tasks[0].id;
    let id = orch.create_project("P", "", "c").await.unwrap();
    orch.submit_tasks(&id, tasks).await.unwrap();

    let report = orch.run_project(&id).await.unwrap();
    assert_eq!(report.progress.done, 3);

    let calls = team.calls_for("A");
    assert_eq!(calls.len(), 2);
    assert!(calls[1].feedback.iter().any(|f| f.contains("disk full")));
    let summary = report.tasks.iter().find(|t| t.id == a).unwrap();
    assert_eq!(summary.attempts, 2);
    assert_eq!(orch.validation().get(&a).unwrap().retry_count, 1);
}

/// Test: A team that does not answer in time fails its task
#[tokio::test]
async fn test_team_timeout_counts_as_rejection() {
    let team = Arc::new(ScriptedTeam::new("x").with_default(Response::Hang));
    let orch = orchestrator(&test_config(1), vec![team]);
    let id = orch.create_project("P", "", "c").await.unwrap();
    orch.submit_tasks(&id, vec![agency::core::Task::new("A", "x", TaskKind::General)])
        .await
        .unwrap();

    let report = orch.run_project(&id).await.unwrap();
    assert_eq!(report.failed.len(), 1);
    match &report.failed[0].status {
        TaskStatus::Failed { error } => assert!(error.contains("timed out"), "{error}"),
        other => panic!("unexpected status {other:?}"),
    }
}

/// Test: Cancellation
/// Given a project whose first task is with a team that never answers
/// When the project is cancelled mid-run
/// Then the run returns, every unfinished task is Cancelled and no
/// validation record of the project remains
#[tokio::test]
async fn test_cancel_mid_run() {
    let mut config = test_config(3);
    config.orchestrator.team_timeout_secs = 60;
    let team = Arc::new(ScriptedTeam::new("x").with_default(Response::Hang));
    let (tx, mut rx) = mpsc::channel(64);
    let orch = Arc::new(orchestrator(&config, vec![team]).with_events(tx));

    let tasks = chain("x");
    let a = tasks[0].id;
    let id = orch.create_project("P", "", "c").await.unwrap();
    orch.submit_tasks(&id, tasks).await.unwrap();

    let runner = {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move { orch.run_project(&id).await })
    };
    loop {
        match rx.recv().await {
            Some(OrchestratorEvent::TaskStarted { task, .. }) if task == a => break,
            Some(_) => continue,
            None => panic!("event channel closed before dispatch"),
        }
    }

    let cancelled = orch.cancel_project(&id).await.unwrap();
    assert_eq!(cancelled, 3);

    let report = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("run did not stop after cancellation")
        .unwrap()
        .unwrap();
    assert_eq!(report.project.status, ProjectStatus::Cancelled);
    assert_eq!(report.progress.cancelled, 3);
    assert!(orch.validation().get(&a).is_none());
    assert!(report.validation_queue.is_empty());

    assert!(matches!(
        orch.run_project(&id).await,
        Err(Error::ProjectCancelled(_))
    ));
    assert!(matches!(
        orch.submit_deliverable(&a, Deliverable::text("late")).await,
        Err(Error::ProjectCancelled(_))
    ));
}

/// Test: Outside submission while the team is still working
/// Given a run that has sent `left` to its team
/// When a deliverable for `left` is submitted directly and approved
/// Then the team's later answer is ignored and the run still finishes
#[tokio::test]
async fn test_outside_submission_during_run_does_not_strand_tasks() {
    let x = Arc::new(ScriptedTeam::new("x").with_delay(Duration::from_millis(300)));
    let y = Arc::new(ScriptedTeam::new("y").with_delay(Duration::from_millis(600)));
    let (tx, mut rx) = mpsc::channel(64);
    let orch = Arc::new(orchestrator(&test_config(3), vec![x.clone(), y.clone()]).with_events(tx));

    let tasks = two_branches("x", "y");
    let left = tasks[0].clone();
    let id = orch.create_project("P", "", "c").await.unwrap();
    orch.submit_tasks(&id, tasks).await.unwrap();

    let runner = {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move { orch.run_project(&id).await })
    };
    wait_for_dispatch(&mut rx, &[left.id]).await;

    let outside = orch
        .submit_deliverable(&left.id, complete_deliverable(&left))
        .await
        .unwrap();
    assert_eq!(outside.status, TaskStatus::Done);

    let report = tokio::time::timeout(Duration::from_secs(10), runner)
        .await
        .expect("run did not finish")
        .unwrap()
        .unwrap();
    assert_eq!(report.progress.done, 4);
    assert_eq!(report.progress.running, 0);
    assert_eq!(report.project.phase, ProjectPhase::Done);
    assert_eq!(x.calls_for("left").len(), 1);
    assert_eq!(x.calls_for("left-next").len(), 1);
    assert_eq!(y.calls_for("right-next").len(), 1);
}

/// Test: An aborted run releases its tasks
/// Given a run with both branch heads at their teams
/// When saving a snapshot fails and the run aborts
/// Then nothing is left Running and the next run finishes the project
#[tokio::test]
async fn test_aborted_run_releases_in_flight_tasks() {
    let x = Arc::new(ScriptedTeam::new("x").with_delay(Duration::from_millis(100)));
    let y = Arc::new(ScriptedTeam::new("y").with_delay(Duration::from_millis(400)));
    let store = FlakyStore::new();
    let (tx, mut rx) = mpsc::channel(64);
    let orch = Arc::new(
        orchestrator(&test_config(3), vec![x, y.clone()])
            .with_store(store.clone())
            .with_events(tx),
    );

    let tasks = two_branches("x", "y");
    let (left, right) = (tasks[0].id, tasks[2].id);
    let id = orch.create_project("P", "", "c").await.unwrap();
    orch.submit_tasks(&id, tasks).await.unwrap();

    let runner = {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move { orch.run_project(&id).await })
    };
    wait_for_dispatch(&mut rx, &[left, right]).await;
    store.set_failing(true);

    let aborted = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("run did not stop")
        .unwrap();
    assert!(matches!(aborted, Err(Error::Io(_))));

    let report = orch.get_project_report(&id).await.unwrap();
    assert_eq!(report.progress.running, 0);
    assert_eq!(report.progress.awaiting_validation, 0);
    assert_eq!(report.progress.done, 1);
    assert_eq!(report.progress.ready, 2);
    assert!(report.validation_queue.is_empty());

    store.set_failing(false);
    let report = orch.run_project(&id).await.unwrap();
    assert_eq!(report.progress.done, 4);
    let calls = y.calls_for("right");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].attempt, 2);
}

/// Test: Manual submissions drive the schedule without a run loop
#[tokio::test]
async fn test_manual_submission_flow() {
    let orch = orchestrator(&test_config(3), vec![]);
    let tasks = chain("x");
    let (a, b) = (tasks[0].id, tasks[1].id);
    let (task_a, task_b) = (tasks[0].clone(), tasks[1].clone());
    let id = orch.create_project("P", "", "c").await.unwrap();
    orch.submit_tasks(&id, tasks).await.unwrap();

    let first = orch
        .submit_deliverable(&a, complete_deliverable(&task_a))
        .await
        .unwrap();
    assert!(!first.blocked);
    assert_eq!(first.status, TaskStatus::Done);
    assert_eq!(first.unlocked, vec![b]);

    let rejected = orch
        .submit_deliverable(&b, Deliverable::text(UNGROUNDED))
        .await
        .unwrap();
    assert!(rejected.blocked);
    assert_eq!(rejected.status, TaskStatus::Running);
    assert_eq!(rejected.attempts_left, Some(2));
    assert!(!rejected.issues.is_empty());

    let report = orch.get_project_report(&id).await.unwrap();
    assert_eq!(report.validation_queue.awaiting_resubmission, vec![b]);

    let fixed = orch
        .submit_deliverable(&b, complete_deliverable(&task_b))
        .await
        .unwrap();
    assert!(!fixed.blocked, "{:?}", fixed.issues);
    assert!(fixed.score.unwrap() >= 0.7);
}

/// Test: Persistence
/// Given a finished project saved to a JSON store
/// When a fresh orchestrator loads it
/// Then the report matches the one taken before
#[tokio::test]
async fn test_project_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(3);
    let store = Arc::new(JsonFileStore::new(dir.path()));

    let teams = vec![Arc::new(ScriptedTeam::new("x")), Arc::new(ScriptedTeam::new("y"))];
    let orch = orchestrator(&config, teams).with_store(store.clone());
    let id = orch.create_project("P", "", "c").await.unwrap();
    orch.submit_tasks(&id, two_branches("x", "y")).await.unwrap();
    let before = orch.run_project(&id).await.unwrap();

    assert_eq!(store.list().await.unwrap(), vec![id]);

    let fresh = orchestrator(&config, vec![]).with_store(store.clone());
    fresh.load_project(&id).await.unwrap();
    let after = fresh.get_project_report(&id).await.unwrap();

    assert_eq!(after.project, before.project);
    assert_eq!(after.progress, before.progress);
    assert_eq!(after.tasks, before.tasks);
}

/// Test: Interrupted tasks are redone after a restart
/// Given a snapshot taken while a task was with its team
/// When the project is loaded and run
/// Then the task is dispatched again and the project finishes
#[tokio::test]
async fn test_interrupted_task_is_redone_after_load() {
    let store = Arc::new(MemoryStore::new());
    let mut tasks = chain("x");
    let a = tasks[0].id;
    tasks[0].status = TaskStatus::Running;
    tasks[0].attempts = 1;

    let mut project = Project::new("P", "", "c");
    project.transition(ProjectPhase::Planning, None).unwrap();
    let id = project.id;
    let mut snapshot = ProjectSnapshot::new(project);
    snapshot.tasks = tasks;
    store.save(&snapshot).await.unwrap();

    let team = Arc::new(ScriptedTeam::new("x"));
    let orch = orchestrator(&test_config(3), vec![team.clone()]).with_store(store.clone());
    orch.load_project(&id).await.unwrap();

    let loaded = orch.get_project_report(&id).await.unwrap();
    let first = loaded.tasks.iter().find(|t| t.id == a).unwrap();
    assert_eq!(first.status, TaskStatus::Ready);

    let report = orch.run_project(&id).await.unwrap();
    assert_eq!(report.progress.done, 3);
    assert_eq!(report.project.phase, ProjectPhase::Done);
    assert_eq!(team.calls_for("A")[0].attempt, 2);
}

/// Test: Archived projects never advance; unknown projects are refused
#[tokio::test]
async fn test_archived_project_does_not_advance() {
    let orch = orchestrator(&test_config(3), vec![]);
    let id = orch.create_project("P", "", "c").await.unwrap();
    orch.archive_project(&id).await.unwrap();

    assert!(matches!(
        orch.advance_phase(&id).await,
        Err(Error::InvalidPhaseTransition { .. })
    ));
    assert!(matches!(
        orch.cancel_project(&agency::core::ProjectId::new()).await,
        Err(Error::ProjectNotFound(_))
    ));
}
