//! Scheduling integration tests.
//!
//! These tests verify level computation, cycle detection, failure
//! propagation and per-team limits through the public scheduler API.

use std::collections::HashSet;

use agency::config::SchedulerConfig;
use agency::core::{Deliverable, Task, TaskKind, TaskStatus};
use agency::orchestration::{RequirementsDescriptor, Scheduler};
use agency::Error;

use crate::fixtures::{chain, id_of, two_branches};

/// Test: Linear chain levels
/// Given A -> B -> C
/// When the plan is built
/// Then levels are [{A}], [{B}], [{C}] and only A is ready
#[test]
fn test_chain_levels() {
    let tasks = chain("x");
    let (a, b, c) = (tasks[0].id, tasks[1].id, tasks[2].id);
    let scheduler = Scheduler::from_tasks(tasks, SchedulerConfig::default()).unwrap();

    let levels: Vec<Vec<_>> = scheduler
        .levels()
        .iter()
        .map(|l| l.tasks.clone())
        .collect();
    assert_eq!(levels, vec![vec![a], vec![b], vec![c]]);
    assert_eq!(scheduler.next_runnable(), vec![a]);
}

/// Test: Cycle detection names every task on the cycle
/// Given A depends on B and B depends on A
/// When the plan is built
/// Then CyclicDependency is returned naming both tasks
#[test]
fn test_cycle_names_both_tasks() {
    let mut a = Task::new("A", "x", TaskKind::General);
    let b = Task::new("B", "x", TaskKind::General).depends_on(&[a.id]);
    a.add_prerequisite(b.id);
    let expected: HashSet<_> = [a.id, b.id].into_iter().collect();

    match Scheduler::from_tasks(vec![a, b], SchedulerConfig::default()) {
        Err(Error::CyclicDependency { tasks }) => {
            let named: HashSet<_> = tasks.into_iter().collect();
            assert_eq!(named, expected);
        }
        other => panic!("expected a cycle, got {:?}", other.map(|_| ())),
    }
}

/// Test: Structural changes re-level the schedule or leave it untouched
/// Given A -> B -> C
/// When a task with an unknown prerequisite is added
/// Then the addition is refused and the levels are unchanged
/// When D is added after C and B is removed
/// Then the schedule re-levels around the change
#[test]
fn test_structural_changes_relevel() {
    let tasks = chain("x");
    let (a, b, c) = (tasks[0].id, tasks[1].id, tasks[2].id);
    let mut scheduler =
        Scheduler::from_tasks(tasks, SchedulerConfig::with_max_concurrent(2)).unwrap();

    let orphan = Task::new("orphan", "x", TaskKind::General)
        .depends_on(&[agency::core::TaskId::new()]);
    let orphan_id = orphan.id;
    assert!(matches!(
        scheduler.add_task(orphan),
        Err(Error::UnknownPrerequisite { .. })
    ));
    assert!(scheduler.task(&orphan_id).is_none());
    assert_eq!(scheduler.levels().len(), 3);

    let d = Task::new("D", "x", TaskKind::General).depends_on(&[c]);
    let d_id = d.id;
    scheduler.add_task(d).unwrap();
    assert_eq!(scheduler.levels().len(), 4);

    scheduler.remove_task(&b).unwrap();
    let levels: Vec<Vec<_>> = scheduler
        .levels()
        .iter()
        .map(|l| l.tasks.clone())
        .collect();
    assert_eq!(levels, vec![vec![a, c], vec![d_id]]);
    assert_eq!(scheduler.next_runnable(), vec![a, c]);
}

/// Test: Failure blocks dependents but not independent branches
/// Given two independent branches
/// When the head of the left branch fails
/// Then its dependent is Blocked and the right branch continues
#[test]
fn test_failure_blocks_only_dependents() {
    let tasks = two_branches("x", "y");
    let left = id_of(&tasks, "left");
    let left_next = id_of(&tasks, "left-next");
    let right = id_of(&tasks, "right");
    let right_next = id_of(&tasks, "right-next");
    let mut scheduler = Scheduler::from_tasks(tasks, SchedulerConfig::default()).unwrap();

    scheduler.start(&left).unwrap();
    let blocked = scheduler.fail(&left, "team gave up").unwrap();
    assert_eq!(blocked, vec![left_next]);
    assert!(matches!(
        scheduler.task(&left_next).unwrap().status,
        TaskStatus::Blocked { .. }
    ));

    scheduler.start(&right).unwrap();
    scheduler.await_validation(&right).unwrap();
    let unlocked = scheduler
        .complete(&right, Deliverable::text("done"))
        .unwrap();
    assert_eq!(unlocked, vec![right_next]);

    let progress = scheduler.progress();
    assert_eq!(progress.failed, 1);
    assert_eq!(progress.blocked, 1);
    assert_eq!(progress.done, 1);
    assert_eq!(progress.ready, 1);
}

/// Test: Per-team limit
/// Given three independent tasks on one team and a limit of one
/// When runnable tasks are requested
/// Then only one is offered until it leaves the team
#[test]
fn test_per_team_limit() {
    let tasks = vec![
        Task::new("one", "qa", TaskKind::General),
        Task::new("two", "qa", TaskKind::General),
        Task::new("three", "qa", TaskKind::General),
    ];
    let first = tasks[0].id;
    let second = tasks[1].id;
    let mut scheduler =
        Scheduler::from_tasks(tasks, SchedulerConfig::with_max_concurrent(1)).unwrap();

    assert_eq!(scheduler.next_runnable(), vec![first]);
    scheduler.start(&first).unwrap();
    assert!(scheduler.next_runnable().is_empty());
    assert!(matches!(
        scheduler.start(&second),
        Err(Error::TeamAtCapacity { .. })
    ));

    scheduler.await_validation(&first).unwrap();
    assert!(scheduler.next_runnable().is_empty());
    scheduler.complete(&first, Deliverable::text("ok")).unwrap();
    assert_eq!(scheduler.next_runnable(), vec![second]);
}

/// Test: Catalog plan shape
/// Given a descriptor with ML and analytics
/// When the plan is built
/// Then ML and analytics share a level and sign-off comes last
#[test]
fn test_catalog_plan_levels() {
    let descriptor = RequirementsDescriptor::default().with_ml(true);
    let scheduler = Scheduler::build(&descriptor, SchedulerConfig::default()).unwrap();
    let summary = scheduler.plan_summary(descriptor.team_count);

    assert_eq!(summary.total_tasks, 9);
    let names_at = |level: usize| -> Vec<String> {
        scheduler.levels()[level]
            .tasks
            .iter()
            .map(|id| scheduler.task(id).unwrap().name.clone())
            .collect()
    };
    assert_eq!(names_at(0), vec!["Solution architecture".to_string()]);
    let parallel = names_at(3);
    assert!(parallel.contains(&"Machine learning models".to_string()));
    assert!(parallel.contains(&"Analytics and dashboards".to_string()));
    assert!(summary.levels[3].can_parallelize);
    assert_eq!(
        names_at(scheduler.levels().len() - 1),
        vec!["Business sign-off".to_string()]
    );
}

/// Test: Data volume scales the estimate
#[test]
fn test_volume_scales_hours() {
    use agency::orchestration::DataVolume;

    let medium = Scheduler::build(&RequirementsDescriptor::default(), SchedulerConfig::default())
        .unwrap()
        .plan_summary(3);
    let large = Scheduler::build(
        &RequirementsDescriptor::default().with_volume(DataVolume::Large),
        SchedulerConfig::default(),
    )
    .unwrap()
    .plan_summary(3);

    assert!((large.total_hours - medium.total_hours * 2.0).abs() < 1e-9);
    assert!(large.estimated_weeks > medium.estimated_weeks);
}
