//! Scheduler over a project's dependency graph.
//!
//! The Scheduler owns the task set and its execution levels. It decides
//! which Ready tasks may be dispatched, applies status changes one at a
//! time, re-evaluates readiness after each of them, and blocks everything
//! downstream of a failed task.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::config::SchedulerConfig;
use crate::core::{Deliverable, DependencyGraph, ExecutionLevel, Task, TaskId, TaskStatus, TeamId};
use crate::error::{Error, Result};
use crate::{alog_debug, alog_warn};

use super::catalog::{self, PlanSummary, RequirementsDescriptor};

/// Task counts per status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub total: usize,
    pub pending: usize,
    pub ready: usize,
    pub running: usize,
    pub awaiting_validation: usize,
    pub done: usize,
    pub failed: usize,
    pub blocked: usize,
    pub cancelled: usize,
    pub hours_total: f64,
    pub hours_done: f64,
}

impl Progress {
    /// Share of tasks that are Done, in percent.
    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.done as f64 / self.total as f64 * 1000.0).round() / 10.0
    }
}

/// Load carried by one team.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamWorkload {
    pub total_tasks: usize,
    pub total_hours: f64,
    pub done: usize,
    pub in_flight: usize,
    pub waiting: usize,
}

/// Dispatch policy and status bookkeeping for one project.
#[derive(Debug, Clone)]
pub struct Scheduler {
    graph: DependencyGraph,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Instantiate the catalog for `descriptor` and level it.
    pub fn build(descriptor: &RequirementsDescriptor, config: SchedulerConfig) -> Result<Self> {
        let tasks = catalog::instantiate(descriptor)?;
        Self::from_tasks(tasks, config)
    }

    /// Schedule an explicit task set.
    ///
    /// # Errors
    /// Returns `CyclicDependency` or `UnknownPrerequisite`; nothing is
    /// scheduled in that case.
    pub fn from_tasks(tasks: Vec<Task>, config: SchedulerConfig) -> Result<Self> {
        let graph = DependencyGraph::from_tasks(tasks)?;
        let mut scheduler = Self { graph, config };
        scheduler.refresh_readiness();
        alog_debug!(
            "Scheduler built: {} tasks in {} levels",
            scheduler.graph.task_count(),
            scheduler.levels().len()
        );
        Ok(scheduler)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Execution levels of the current task set.
    pub fn levels(&self) -> &[ExecutionLevel] {
        // Every structural change recomputes levels before it is committed.
        self.graph.cached_levels().unwrap_or(&[])
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.graph.get_task(id)
    }

    /// Tasks in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> + '_ {
        self.graph.tasks()
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.graph.task_ids().to_vec()
    }

    fn task_mut(&mut self, id: &TaskId) -> Result<&mut Task> {
        self.graph.get_task_mut(id).ok_or(Error::TaskNotFound(*id))
    }

    // ========== Readiness ==========

    /// Promote Pending tasks whose prerequisites are all Done, and block
    /// Pending tasks that depend on a task that can no longer finish.
    ///
    /// Returns the newly Ready tasks in insertion order.
    pub fn refresh_readiness(&mut self) -> Vec<TaskId> {
        let mut promote = Vec::new();
        let mut block = Vec::new();
        for task in self.graph.tasks() {
            if task.status != TaskStatus::Pending {
                continue;
            }
            let prerequisites: Vec<&Task> = task
                .prerequisites
                .iter()
                .filter_map(|p| self.graph.get_task(p))
                .collect();
            if let Some(dead) = prerequisites
                .iter()
                .find(|p| matches!(p.status, TaskStatus::Failed { .. } | TaskStatus::Blocked { .. }))
            {
                block.push((task.id, format!("prerequisite '{}' did not finish", dead.name)));
            } else if prerequisites.iter().all(|p| p.is_done()) {
                promote.push(task.id);
            }
        }

        for (id, reason) in block {
            if let Some(task) = self.graph.get_task_mut(&id) {
                let _ = task.block(&reason);
            }
        }
        for id in &promote {
            if let Some(task) = self.graph.get_task_mut(id) {
                let _ = task.mark_ready();
            }
        }
        promote
    }

    /// Number of a team's tasks that are with the team or in review.
    pub fn in_flight_for(&self, team: &TeamId) -> usize {
        self.graph
            .tasks()
            .filter(|t| &t.team == team && t.is_in_flight())
            .count()
    }

    /// Ready tasks that may be dispatched now.
    ///
    /// Every level is scanned, so a task whose prerequisites are all Done
    /// runs even while an earlier level still has work in flight. Ordered
    /// by level, then insertion order. A team never gets more than
    /// `max_concurrent_per_team` tasks in flight.
    pub fn next_runnable(&self) -> Vec<TaskId> {
        let cap = self.config.max_concurrent_per_team.max(1);
        let mut load: HashMap<&TeamId, usize> = HashMap::new();
        for task in self.graph.tasks().filter(|t| t.is_in_flight()) {
            *load.entry(&task.team).or_default() += 1;
        }

        let mut runnable = Vec::new();
        for level in self.levels() {
            for id in &level.tasks {
                let Some(task) = self.graph.get_task(id) else {
                    continue;
                };
                if task.status != TaskStatus::Ready {
                    continue;
                }
                let used = load.entry(&task.team).or_default();
                if *used < cap {
                    *used += 1;
                    runnable.push(*id);
                }
            }
        }
        runnable
    }

    // ========== Status changes ==========

    /// Dispatch a Ready task.
    ///
    /// # Errors
    /// - `TeamAtCapacity` if the team already has its maximum in flight
    /// - `InvalidTaskTransition` if the task is not Ready
    pub fn start(&mut self, id: &TaskId) -> Result<()> {
        let team = self
            .graph
            .get_task(id)
            .map(|t| t.team.clone())
            .ok_or(Error::TaskNotFound(*id))?;
        let max = self.config.max_concurrent_per_team.max(1);
        if self.in_flight_for(&team) >= max {
            return Err(Error::TeamAtCapacity { team, max });
        }
        self.task_mut(id)?.start()
    }

    pub fn await_validation(&mut self, id: &TaskId) -> Result<()> {
        self.task_mut(id)?.await_validation()
    }

    /// Send a rejected task back to its team with the review feedback.
    pub fn retry(&mut self, id: &TaskId, feedback: &[String]) -> Result<()> {
        self.task_mut(id)?.retry(feedback)
    }

    /// Accept a deliverable and return the tasks that became Ready.
    pub fn complete(&mut self, id: &TaskId, deliverable: Deliverable) -> Result<Vec<TaskId>> {
        self.task_mut(id)?.complete(deliverable)?;
        Ok(self.refresh_readiness())
    }

    /// Fail a task and block every transitive dependent that has not run.
    ///
    /// Returns the blocked tasks. Independent branches are untouched.
    pub fn fail(&mut self, id: &TaskId, reason: &str) -> Result<Vec<TaskId>> {
        let name = {
            let task = self.task_mut(id)?;
            task.fail(reason)?;
            task.name.clone()
        };

        let mut blocked = Vec::new();
        for dependent in self.graph.transitive_dependents(id) {
            if let Some(task) = self.graph.get_task_mut(&dependent) {
                if task.block(&format!("upstream task '{}' failed", name)).is_ok() {
                    blocked.push(dependent);
                }
            }
        }
        alog_warn!(
            "Task {} '{}' failed ({}); blocked {} dependents",
            id.short(),
            name,
            reason,
            blocked.len()
        );
        Ok(blocked)
    }

    /// Cancel every task that has not reached a terminal status.
    pub fn cancel_all(&mut self) -> Vec<TaskId> {
        let ids = self.task_ids();
        ids.into_iter()
            .filter(|id| {
                self.graph
                    .get_task_mut(id)
                    .is_some_and(|t| t.cancel().is_ok())
            })
            .collect()
    }

    /// Return every task that is with its team or in review to Ready.
    pub fn release_in_flight(&mut self) -> Vec<TaskId> {
        let ids = self.task_ids();
        ids.into_iter()
            .filter(|id| {
                self.graph
                    .get_task_mut(id)
                    .is_some_and(|t| t.is_in_flight() && t.release().is_ok())
            })
            .collect()
    }

    // ========== Structural changes ==========

    /// Add a task. The change is committed only if the result still levels.
    pub fn add_task(&mut self, task: Task) -> Result<()> {
        let mut next = self.graph.clone();
        next.add_task(task)?;
        next.levels()?;
        self.graph = next;
        self.refresh_readiness();
        Ok(())
    }

    /// Remove a task that is not with its team or in review.
    pub fn remove_task(&mut self, id: &TaskId) -> Result<Task> {
        let task = self.graph.get_task(id).ok_or(Error::TaskNotFound(*id))?;
        if task.is_in_flight() {
            return Err(Error::InvalidTaskTransition {
                task: *id,
                from: task.status.label().to_string(),
                to: "removed".to_string(),
            });
        }

        let mut next = self.graph.clone();
        let removed = next.remove_task(id)?;
        next.levels()?;
        self.graph = next;
        self.refresh_readiness();
        Ok(removed)
    }

    // ========== Reporting ==========

    pub fn progress(&self) -> Progress {
        let mut progress = Progress::default();
        for task in self.graph.tasks() {
            progress.total += 1;
            progress.hours_total += task.estimated_hours;
            match task.status {
                TaskStatus::Pending => progress.pending += 1,
                TaskStatus::Ready => progress.ready += 1,
                TaskStatus::Running => progress.running += 1,
                TaskStatus::AwaitingValidation => progress.awaiting_validation += 1,
                TaskStatus::Done => {
                    progress.done += 1;
                    progress.hours_done += task.estimated_hours;
                }
                TaskStatus::Failed { .. } => progress.failed += 1,
                TaskStatus::Blocked { .. } => progress.blocked += 1,
                TaskStatus::Cancelled => progress.cancelled += 1,
            }
        }
        progress
    }

    pub fn team_workload(&self) -> BTreeMap<TeamId, TeamWorkload> {
        let mut workload: BTreeMap<TeamId, TeamWorkload> = BTreeMap::new();
        for task in self.graph.tasks() {
            let entry = workload.entry(task.team.clone()).or_default();
            entry.total_tasks += 1;
            entry.total_hours += task.estimated_hours;
            if task.is_done() {
                entry.done += 1;
            } else if task.is_in_flight() {
                entry.in_flight += 1;
            } else if matches!(task.status, TaskStatus::Pending | TaskStatus::Ready) {
                entry.waiting += 1;
            }
        }
        workload
    }

    /// Whether no task can make further progress.
    pub fn is_finished(&self) -> bool {
        self.graph.tasks().all(|t| t.is_finished())
    }

    pub fn plan_summary(&self, team_count: usize) -> PlanSummary {
        catalog::summarize(&self.graph, self.levels(), team_count)
    }
}
