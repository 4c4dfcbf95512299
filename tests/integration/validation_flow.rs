//! Validation workflow integration tests.
//!
//! These tests run deliverables through scoring, technical review and
//! business review, and check the retry bound.

use agency::config::ValidationConfig;
use agency::core::{Deliverable, Task, TaskKind};
use agency::quality::{IssueCategory, KnowledgeStore, QualityScorer, StaticKnowledgeStore};
use agency::validation::{ValidationOutcome, ValidationState, ValidationWorkflow};
use agency::Error;

use crate::fixtures::{complete_deliverable, UNGROUNDED};

fn workflow(max_retries: u32) -> ValidationWorkflow {
    ValidationWorkflow::new(
        QualityScorer::default(),
        ValidationConfig::with_max_retries(max_retries),
    )
}

/// Test: Ungrounded term fails the quality gate
/// Given a deliverable that confidently names a term no reference knows
/// When it is scored
/// Then the score is below 0.7 with a term-grounding issue
#[test]
fn test_ungrounded_term_scores_below_threshold() {
    let knowledge = StaticKnowledgeStore::builtin();
    let reference = knowledge.best_practices("data_engineering");
    let score = QualityScorer::default().score(UNGROUNDED, TaskKind::General, &reference, &[]);

    assert!(score.overall < 0.7, "score was {}", score.overall);
    assert!(!score.valid);
    assert_eq!(score.issues_in(IssueCategory::TermGrounding).count(), 1);
}

/// Test: The same term is grounded by a sibling output
#[test]
fn test_sibling_output_grounds_term() {
    let knowledge = StaticKnowledgeStore::builtin();
    let reference = knowledge.best_practices("data_engineering");
    let sibling = "events land in quantumgraphdb after ingestion";
    let score =
        QualityScorer::default().score(UNGROUNDED, TaskKind::General, &reference, &[sibling]);

    assert!(score.valid, "issues: {:?}", score.issues);
    assert_eq!(score.issues_in(IssueCategory::TermGrounding).count(), 0);
}

/// Test: Retry bound
/// Given max_retries = 3
/// When a deliverable is rejected three times
/// Then the third outcome is Exhausted and a fourth submission is refused
#[test]
fn test_retry_bound_is_exact() {
    let validation = workflow(3);
    let task = Task::new("Pipeline", "data_engineering", TaskKind::General);
    let reference = StaticKnowledgeStore::builtin().best_practices("data_engineering");
    let bad = || Deliverable::text(UNGROUNDED);

    let first = validation.submit(&task, bad(), &reference, &[]).unwrap();
    assert!(matches!(first, ValidationOutcome::Rejected { attempts_left: 2, .. }));
    let second = validation.submit(&task, bad(), &reference, &[]).unwrap();
    assert!(matches!(second, ValidationOutcome::Rejected { attempts_left: 1, .. }));
    let third = validation.submit(&task, bad(), &reference, &[]).unwrap();
    assert!(matches!(third, ValidationOutcome::Exhausted { .. }));

    let record = validation.get(&task.id).unwrap();
    assert_eq!(record.retry_count, 3);
    assert_eq!(record.state, ValidationState::Rejected);
    assert!(matches!(
        validation.submit(&task, bad(), &reference, &[]),
        Err(Error::RetriesExhausted { max: 3, .. })
    ));
    assert!(matches!(
        validation.ensure_open(&task.id),
        Err(Error::RetriesExhausted { .. })
    ));
}

/// Test: A rejected deliverable can be fixed on resubmission
#[test]
fn test_resubmission_after_rejection_is_approved() {
    let validation = workflow(3);
    let task = Task::new("Pipeline", "data_engineering", TaskKind::DataPipeline)
        .with_artifacts(&["runbook.md"]);
    let reference = StaticKnowledgeStore::builtin().best_practices("data_engineering");

    let rejected = validation
        .submit(&task, Deliverable::text(UNGROUNDED), &reference, &[])
        .unwrap();
    assert!(!rejected.feedback().is_empty());

    let approved = validation
        .submit(&task, complete_deliverable(&task), &reference, &[])
        .unwrap();
    assert!(approved.is_approved(), "{:?}", approved);
    let record = validation.get(&task.id).unwrap();
    assert_eq!(record.retry_count, 1);
    assert_eq!(record.state, ValidationState::Approved);
}

/// Test: Business review
/// Given a task with two requirements
/// When the deliverable covers only one
/// Then it is rejected in business review naming the missing requirement
#[test]
fn test_business_review_rejects_missing_requirement() {
    let validation = workflow(3);
    let requirements = vec![
        "daily refresh of sales figures".to_string(),
        "regional breakdown for managers".to_string(),
    ];
    let task = Task::new("Dashboards", "data_analytics", TaskKind::General)
        .with_requirements(&requirements);
    let reference = StaticKnowledgeStore::builtin().best_practices("data_analytics");

    let outcome = validation
        .submit(
            &task,
            Deliverable::text("the report supports a daily refresh of sales figures."),
            &reference,
            &[],
        )
        .unwrap();
    match outcome {
        ValidationOutcome::Rejected { feedback, .. } => {
            assert!(feedback.iter().any(|f| f.contains("regional breakdown")));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    let record = validation.get(&task.id).unwrap();
    let coverage = record.coverage.unwrap();
    assert!((coverage.ratio - 0.5).abs() < 1e-9);
}

/// Test: Technical checks
/// Given a testing task
/// When the deliverable has failing tests and misses its artifact
/// Then it is rejected with both problems in the feedback
#[test]
fn test_missing_artifact_and_failing_tests_reject() {
    let validation = workflow(3);
    let task = Task::new("Integrated testing", "qa", TaskKind::Testing)
        .with_artifacts(&["test_report.md"]);
    let reference = StaticKnowledgeStore::builtin().best_practices("qa");
    let mut deliverable = complete_deliverable(&task).with_tests(8, 2);
    deliverable.artifacts.clear();

    let outcome = validation
        .submit(&task, deliverable, &reference, &[])
        .unwrap();
    let feedback = outcome.feedback().join("\n");
    assert!(feedback.contains("test_report.md"));
    assert!(feedback.contains("2 of 10 tests failed"));
}

/// Test: Discarding in-flight records
#[test]
fn test_discard_keeps_approved_records() {
    let validation = workflow(3);
    let good = Task::new("good", "x", TaskKind::General);
    let bad = Task::new("bad", "x", TaskKind::General);
    let reference = StaticKnowledgeStore::builtin().best_practices("general");

    validation
        .submit(&good, complete_deliverable(&good), &reference, &[])
        .unwrap();
    validation
        .submit(&bad, Deliverable::text(UNGROUNDED), &reference, &[])
        .unwrap();

    assert_eq!(validation.discard(&[good.id, bad.id]), 1);
    assert!(validation.get(&good.id).is_some());
    assert!(validation.get(&bad.id).is_none());
}
