//! Project orchestrator.
//!
//! Owns every project and composes the scheduler, the validation workflow,
//! the communication hub and the team registry. Each project's state sits
//! behind its own async mutex; the lock is never held across a team call
//! or a scoring run, so independent tasks progress while one team works.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::comms::{CommunicationHub, ContextUpdate, Escalation, EscalationId};
use crate::config::{Config, SchedulerConfig};
use crate::core::{
    Deliverable, Project, ProjectId, ProjectPhase, ProjectStatus, Task, TaskId, TaskKind,
    TaskStatus, TeamId,
};
use crate::error::{Error, Result};
use crate::quality::{KnowledgeStore, QualityScorer, ReferenceMaterial};
use crate::state::{ProjectSnapshot, ProjectStore, SNAPSHOT_VERSION};
use crate::util::{blocking, truncate};
use crate::validation::{ValidationOutcome, ValidationQueue, ValidationState, ValidationWorkflow};
use crate::{alog, alog_debug, alog_error, alog_trace, alog_warn};

use super::catalog::{PlanSummary, RequirementsDescriptor};
use super::scheduler::{Progress, Scheduler, TeamWorkload};
use super::team::{Team, TeamRegistry};

/// Lifecycle events emitted while projects move.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    ProjectCreated {
        project: ProjectId,
    },
    PlanBuilt {
        project: ProjectId,
        tasks: usize,
        levels: usize,
    },
    PhaseAdvanced {
        project: ProjectId,
        from: ProjectPhase,
        to: ProjectPhase,
    },
    TaskStarted {
        project: ProjectId,
        task: TaskId,
        team: TeamId,
        attempt: u32,
    },
    TaskApproved {
        project: ProjectId,
        task: TaskId,
        score: f64,
    },
    TaskRejected {
        project: ProjectId,
        task: TaskId,
        attempts_left: u32,
    },
    TaskFailed {
        project: ProjectId,
        task: TaskId,
        reason: String,
    },
    TasksBlocked {
        project: ProjectId,
        tasks: Vec<TaskId>,
    },
    EscalationRaised {
        project: ProjectId,
        escalation: EscalationId,
    },
    ProjectCancelled {
        project: ProjectId,
    },
    RunFinished {
        project: ProjectId,
    },
}

/// Result of submitting requirements or a task set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanOutcome {
    pub project: ProjectId,
    pub blocked: bool,
    /// Warnings about the plan, e.g. teams nobody can staff.
    pub issues: Vec<String>,
    pub summary: PlanSummary,
}

/// Result of an `advance_phase` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseOutcome {
    pub project: ProjectId,
    /// Phase after the call.
    pub phase: ProjectPhase,
    /// The gate did not open; `issues` says why.
    pub blocked: bool,
    pub issues: Vec<String>,
}

/// Result of a deliverable submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub task: TaskId,
    /// Task status after the submission.
    pub status: TaskStatus,
    /// The deliverable was not accepted.
    pub blocked: bool,
    pub issues: Vec<String>,
    pub score: Option<f64>,
    pub attempts_left: Option<u32>,
    /// Tasks that became Ready because of this submission.
    pub unlocked: Vec<TaskId>,
    /// Tasks blocked because this one failed.
    pub blocked_tasks: Vec<TaskId>,
}

/// One task as shown in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub name: String,
    pub team: TeamId,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub level: Option<usize>,
    pub attempts: u32,
    pub score: Option<f64>,
    pub feedback: Vec<String>,
}

/// Last committed state of a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectReport {
    pub project: Project,
    pub progress: Progress,
    pub plan: Option<PlanSummary>,
    pub tasks: Vec<TaskSummary>,
    pub blocked: Vec<TaskSummary>,
    pub failed: Vec<TaskSummary>,
    pub validation_queue: ValidationQueue,
    pub open_escalations: Vec<Escalation>,
    pub team_workload: BTreeMap<TeamId, TeamWorkload>,
}

impl std::fmt::Display for ProjectReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} ({}) phase={} status={}",
            self.project.name,
            self.project.id.short(),
            self.project.phase,
            self.project.status
        )?;
        writeln!(
            f,
            "progress: {}/{} done ({:.1}%), {} failed, {} blocked, {} cancelled",
            self.progress.done,
            self.progress.total,
            self.progress.percent_complete(),
            self.progress.failed,
            self.progress.blocked,
            self.progress.cancelled
        )?;
        for task in &self.tasks {
            let level = task
                .level
                .map(|l| l.to_string())
                .unwrap_or_else(|| "-".to_string());
            let score = task
                .score
                .map(|s| format!(" score={:.2}", s))
                .unwrap_or_default();
            writeln!(
                f,
                "  [{}] {} ({}) {}{}",
                level, task.name, task.team, task.status, score
            )?;
        }
        if !self.open_escalations.is_empty() {
            writeln!(f, "open escalations:")?;
            for escalation in &self.open_escalations {
                writeln!(f, "  - {} ({})", escalation.topic, escalation.from)?;
            }
        }
        Ok(())
    }
}

struct ProjectState {
    project: Project,
    requirements: Option<RequirementsDescriptor>,
    scheduler: Option<Scheduler>,
}

impl ProjectState {
    fn scheduler(&self) -> Result<&Scheduler> {
        self.scheduler
            .as_ref()
            .ok_or(Error::NotPlanned(self.project.id))
    }

    fn scheduler_mut(&mut self) -> Result<&mut Scheduler> {
        let id = self.project.id;
        self.scheduler.as_mut().ok_or(Error::NotPlanned(id))
    }

    fn team_count(&self) -> usize {
        match (&self.requirements, &self.scheduler) {
            (Some(requirements), _) => requirements.team_count,
            (None, Some(scheduler)) => scheduler
                .tasks()
                .map(|t| &t.team)
                .collect::<BTreeSet<_>>()
                .len(),
            (None, None) => 1,
        }
    }
}

struct ProjectHandle {
    state: Mutex<ProjectState>,
    cancel: CancellationToken,
}

/// How a reviewed submission was applied to the schedule.
enum Applied {
    Approved {
        score: f64,
        unlocked: Vec<TaskId>,
    },
    Retry {
        feedback: Vec<String>,
        attempts_left: u32,
    },
    Failed {
        feedback: Vec<String>,
        blocked: Vec<TaskId>,
    },
    Discarded,
}

/// What a returned team call needs before it can be reviewed.
enum Review {
    Deliverable {
        deliverable: Deliverable,
        task: Task,
        reference: ReferenceMaterial,
        siblings: Vec<String>,
    },
    Failure {
        task: Task,
        message: String,
    },
}

/// Call a team with a deadline. A missing team or a timeout is a failure.
async fn call_team(
    team: Option<Arc<dyn Team>>,
    task: Task,
    limit: Duration,
) -> (Task, Result<Deliverable>) {
    let result = match team {
        None => Err(Error::UnknownTeam(task.team.clone())),
        Some(team) => match tokio::time::timeout(limit, team.execute(&task)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(limit)),
        },
    };
    (task, result)
}

fn ensure_active(project: &Project) -> Result<()> {
    match project.status {
        ProjectStatus::Active => Ok(()),
        ProjectStatus::Cancelled => Err(Error::ProjectCancelled(project.id)),
        other => Err(Error::InvalidPhaseTransition {
            from: other.to_string(),
            to: project.phase.to_string(),
        }),
    }
}

fn unfinished(scheduler: &Scheduler, keep: impl Fn(&Task) -> bool) -> Vec<String> {
    scheduler
        .tasks()
        .filter(|t| keep(t) && !t.is_done())
        .map(|t| format!("task '{}' ({}) is {}", t.name, t.team, t.status.label()))
        .collect()
}

/// Why the gate into `target` is closed. Empty when it is open.
fn gate_issues(state: &ProjectState, target: ProjectPhase) -> Vec<String> {
    let Some(scheduler) = state.scheduler.as_ref() else {
        return vec!["requirements have not been submitted".to_string()];
    };
    match target {
        ProjectPhase::Requirements | ProjectPhase::Planning | ProjectPhase::Architecture => {
            Vec::new()
        }
        ProjectPhase::Execution => unfinished(scheduler, |t| t.kind == TaskKind::Architecture),
        ProjectPhase::Validation => {
            unfinished(scheduler, |t| t.kind != TaskKind::BusinessSignoff)
        }
        ProjectPhase::Done => unfinished(scheduler, |_| true),
    }
}

fn summarize_task(scheduler: &Scheduler, validation: &ValidationWorkflow, task: &Task) -> TaskSummary {
    let score = validation
        .get(&task.id)
        .and_then(|r| r.score)
        .map(|s| s.overall);
    TaskSummary {
        id: task.id,
        name: task.name.clone(),
        team: task.team.clone(),
        kind: task.kind,
        status: task.status.clone(),
        level: scheduler.graph().level_of(&task.id),
        attempts: task.attempts,
        score,
        feedback: task.feedback.clone(),
    }
}

/// Runs projects from requirements to sign-off.
pub struct ProjectOrchestrator {
    validation: Arc<ValidationWorkflow>,
    hub: Arc<CommunicationHub>,
    knowledge: Arc<dyn KnowledgeStore>,
    teams: TeamRegistry,
    scheduler_config: SchedulerConfig,
    team_timeout: Duration,
    store: Option<Arc<dyn ProjectStore>>,
    events: Option<mpsc::Sender<OrchestratorEvent>>,
    projects: RwLock<HashMap<ProjectId, Arc<ProjectHandle>>>,
    owners: RwLock<HashMap<TaskId, ProjectId>>,
}

impl ProjectOrchestrator {
    pub fn new(config: &Config, teams: TeamRegistry, knowledge: Arc<dyn KnowledgeStore>) -> Self {
        let scorer = QualityScorer::new(config.scorer, config.validation.threshold);
        let validation = ValidationWorkflow::new(scorer, config.validation.clone());
        let hub = CommunicationHub::new(TeamId::from(config.orchestrator.escalation_team.as_str()));
        for id in teams.ids() {
            hub.register_team(id);
        }

        Self {
            validation: Arc::new(validation),
            hub: Arc::new(hub),
            knowledge,
            teams,
            scheduler_config: config.scheduler.clone(),
            team_timeout: config.orchestrator.team_timeout(),
            store: None,
            events: None,
            projects: RwLock::new(HashMap::new()),
            owners: RwLock::new(HashMap::new()),
        }
    }

    /// Persist every committed change through `store`.
    pub fn with_store(mut self, store: Arc<dyn ProjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Emit lifecycle events on `events`. Events are dropped when the
    /// channel is full.
    pub fn with_events(mut self, events: mpsc::Sender<OrchestratorEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn hub(&self) -> &Arc<CommunicationHub> {
        &self.hub
    }

    pub fn validation(&self) -> &Arc<ValidationWorkflow> {
        &self.validation
    }

    pub fn scorer(&self) -> &QualityScorer {
        self.validation.scorer()
    }

    pub fn teams(&self) -> &TeamRegistry {
        &self.teams
    }

    pub async fn project_ids(&self) -> Vec<ProjectId> {
        let mut ids: Vec<ProjectId> = self.projects.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    fn emit(&self, event: OrchestratorEvent) {
        if let Some(tx) = &self.events {
            if let Err(e) = tx.try_send(event) {
                alog_trace!("orchestrator event dropped: {}", e);
            }
        }
    }

    async fn handle(&self, id: &ProjectId) -> Result<Arc<ProjectHandle>> {
        self.projects
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(Error::ProjectNotFound(*id))
    }

    async fn owner_of(&self, task: &TaskId) -> Result<ProjectId> {
        self.owners
            .read()
            .await
            .get(task)
            .copied()
            .ok_or(Error::TaskNotFound(*task))
    }

    async fn persist(&self, state: &ProjectState) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let mut snapshot = ProjectSnapshot::new(state.project.clone());
        snapshot.requirements = state.requirements.clone();
        if let Some(scheduler) = &state.scheduler {
            snapshot.tasks = scheduler.tasks().cloned().collect();
            snapshot.levels = scheduler.levels().to_vec();
            snapshot.validation = self.validation.records_for(&scheduler.task_ids());
        }
        store.save(&snapshot).await.inspect_err(|e| {
            alog_error!("Snapshot for {} not written: {}", state.project.id.short(), e);
        })
    }

    // ========== Lifecycle ==========

    /// Register a new project in the Requirements phase.
    pub async fn create_project(
        &self,
        name: &str,
        description: &str,
        client: &str,
    ) -> Result<ProjectId> {
        let project = Project::new(name, description, client);
        let id = project.id;
        let state = ProjectState {
            project,
            requirements: None,
            scheduler: None,
        };
        self.persist(&state).await?;

        let handle = Arc::new(ProjectHandle {
            state: Mutex::new(state),
            cancel: CancellationToken::new(),
        });
        self.projects.write().await.insert(id, handle);
        alog!("Project created: {} '{}' for {}", id.short(), name, client);
        self.emit(OrchestratorEvent::ProjectCreated { project: id });
        Ok(id)
    }

    /// Build the task set and level plan from a requirements descriptor.
    ///
    /// # Errors
    /// Structural problems are returned as-is and nothing is committed.
    pub async fn submit_requirements(
        &self,
        id: &ProjectId,
        descriptor: RequirementsDescriptor,
    ) -> Result<PlanOutcome> {
        descriptor.validate()?;
        let scheduler = Scheduler::build(&descriptor, self.scheduler_config.clone())
            .inspect_err(|e| alog_error!("Plan for {} rejected: {}", id.short(), e))?;
        self.install_plan(id, scheduler, Some(descriptor)).await
    }

    /// Schedule an explicit task set instead of the catalog.
    pub async fn submit_tasks(&self, id: &ProjectId, tasks: Vec<Task>) -> Result<PlanOutcome> {
        let scheduler = Scheduler::from_tasks(tasks, self.scheduler_config.clone())
            .inspect_err(|e| alog_error!("Plan for {} rejected: {}", id.short(), e))?;
        self.install_plan(id, scheduler, None).await
    }

    async fn install_plan(
        &self,
        id: &ProjectId,
        scheduler: Scheduler,
        requirements: Option<RequirementsDescriptor>,
    ) -> Result<PlanOutcome> {
        let handle = self.handle(id).await?;
        let mut state = handle.state.lock().await;
        ensure_active(&state.project)?;
        if state.project.phase != ProjectPhase::Requirements || state.scheduler.is_some() {
            return Err(Error::InvalidPhaseTransition {
                from: state.project.phase.to_string(),
                to: ProjectPhase::Planning.to_string(),
            });
        }

        let mut issues = Vec::new();
        let teams: BTreeSet<TeamId> = scheduler.tasks().map(|t| t.team.clone()).collect();
        for team in &teams {
            self.hub.register_team(team.clone());
            if !self.teams.contains(team) {
                issues.push(format!("no team registered for '{}'", team));
            }
        }
        {
            let mut owners = self.owners.write().await;
            for task_id in scheduler.task_ids() {
                owners.insert(task_id, *id);
            }
        }

        let tasks = scheduler.graph().task_count();
        let levels = scheduler.levels().len();
        state.scheduler = Some(scheduler);
        state.requirements = requirements;
        let summary = state.scheduler()?.plan_summary(state.team_count());
        self.persist(&state).await?;

        alog!(
            "Plan built for {}: {} tasks in {} levels, {:.1}h",
            id.short(),
            tasks,
            levels,
            summary.total_hours
        );
        self.emit(OrchestratorEvent::PlanBuilt {
            project: *id,
            tasks,
            levels,
        });
        Ok(PlanOutcome {
            project: *id,
            blocked: false,
            issues,
            summary,
        })
    }

    fn try_advance(&self, state: &mut ProjectState) -> Result<PhaseOutcome> {
        ensure_active(&state.project)?;
        let id = state.project.id;
        let from = state.project.phase;
        let Some(target) = from.next() else {
            return Ok(PhaseOutcome {
                project: id,
                phase: from,
                blocked: true,
                issues: vec!["project is already done".to_string()],
            });
        };

        let issues = gate_issues(state, target);
        if !issues.is_empty() {
            alog_debug!(
                "Gate {} -> {} closed for {}: {} issues",
                from,
                target,
                id.short(),
                issues.len()
            );
            return Ok(PhaseOutcome {
                project: id,
                phase: from,
                blocked: true,
                issues,
            });
        }

        let note = state.scheduler.as_ref().map(|s| {
            let progress = s.progress();
            format!("{}/{} tasks done", progress.done, progress.total)
        });
        state.project.transition(target, note)?;
        alog!("Project {} entered {}", id.short(), target);
        self.emit(OrchestratorEvent::PhaseAdvanced {
            project: id,
            from,
            to: target,
        });
        Ok(PhaseOutcome {
            project: id,
            phase: target,
            blocked: false,
            issues: Vec::new(),
        })
    }

    /// Advance as many phases as the gates allow.
    fn advance_while_open(&self, state: &mut ProjectState) -> Result<PhaseOutcome> {
        loop {
            let outcome = self.try_advance(state)?;
            if outcome.blocked || outcome.phase == ProjectPhase::Done {
                return Ok(outcome);
            }
        }
    }

    /// Move the project to its next phase if the gate allows it.
    pub async fn advance_phase(&self, id: &ProjectId) -> Result<PhaseOutcome> {
        let handle = self.handle(id).await?;
        let mut state = handle.state.lock().await;
        let outcome = self.try_advance(&mut state)?;
        if !outcome.blocked {
            self.persist(&state).await?;
        }
        Ok(outcome)
    }

    // ========== Review ==========

    fn review_inputs(&self, scheduler: &Scheduler, task_id: &TaskId) -> Result<(Task, ReferenceMaterial, Vec<String>)> {
        let task = scheduler
            .task(task_id)
            .cloned()
            .ok_or(Error::TaskNotFound(*task_id))?;
        let reference = self.knowledge.best_practices(task.kind.domain());
        let siblings = scheduler
            .tasks()
            .filter(|t| t.id != *task_id)
            .filter_map(|t| t.result.as_ref().map(|d| d.content.clone()))
            .collect();
        Ok((task, reference, siblings))
    }

    /// Score and review a deliverable off the async workers.
    async fn review(
        &self,
        task: Task,
        deliverable: Deliverable,
        reference: ReferenceMaterial,
        siblings: Vec<String>,
    ) -> Result<ValidationOutcome> {
        let validation = Arc::clone(&self.validation);
        blocking(move || {
            let siblings: Vec<&str> = siblings.iter().map(String::as_str).collect();
            validation.submit(&task, deliverable, &reference, &siblings)
        })
        .await
    }

    /// Apply a review outcome to the schedule and post hub events.
    fn apply_outcome(
        &self,
        handle: &ProjectHandle,
        state: &mut ProjectState,
        task: &Task,
        deliverable: Deliverable,
        outcome: ValidationOutcome,
    ) -> Result<Applied> {
        let project = state.project.id;
        if handle.cancel.is_cancelled() {
            self.validation.discard(&[task.id]);
            return Ok(Applied::Discarded);
        }

        match outcome {
            ValidationOutcome::Approved { score } => {
                let artifacts = deliverable.artifacts.clone();
                let scheduler = state.scheduler_mut()?;
                let unlocked = scheduler.complete(&task.id, deliverable)?;
                let dependents: Vec<Task> = scheduler
                    .graph()
                    .dependents(&task.id)
                    .iter()
                    .filter_map(|id| scheduler.task(id).cloned())
                    .collect();

                if let Err(e) = self.hub.update_team_context(
                    &task.team,
                    ContextUpdate::idle().with_artifacts(&artifacts),
                ) {
                    alog_warn!("hub: {}", e);
                }
                for dependent in dependents.iter().filter(|d| d.team != task.team) {
                    let context = BTreeMap::from([
                        ("project".to_string(), project.to_string()),
                        ("task".to_string(), task.id.to_string()),
                    ]);
                    if let Err(e) = self.hub.handoff(
                        &task.team,
                        &dependent.team,
                        &format!("'{}' is ready for '{}'", task.name, dependent.name),
                        &artifacts,
                        context,
                    ) {
                        alog_warn!("hub: handoff to {} failed: {}", dependent.team, e);
                    }
                }

                alog!(
                    "Task {} '{}' approved (score {:.3})",
                    task.id.short(),
                    task.name,
                    score.overall
                );
                self.emit(OrchestratorEvent::TaskApproved {
                    project,
                    task: task.id,
                    score: score.overall,
                });
                Ok(Applied::Approved {
                    score: score.overall,
                    unlocked,
                })
            }
            ValidationOutcome::Rejected {
                feedback,
                attempts_left,
            } => {
                state.scheduler_mut()?.retry(&task.id, &feedback)?;
                self.emit(OrchestratorEvent::TaskRejected {
                    project,
                    task: task.id,
                    attempts_left,
                });
                Ok(Applied::Retry {
                    feedback,
                    attempts_left,
                })
            }
            ValidationOutcome::Exhausted { feedback } => {
                let max = self.validation.config().max_retries;
                let reason = format!(
                    "rejected {} times: {}",
                    max,
                    truncate(&feedback.join("; "), 200)
                );
                let blocked = state.scheduler_mut()?.fail(&task.id, &reason)?;

                let options = [
                    "revise the scope of the task".to_string(),
                    "reassign the task to another team".to_string(),
                    "accept the deliverable with known issues".to_string(),
                ];
                let context = BTreeMap::from([
                    ("project".to_string(), project.to_string()),
                    ("task".to_string(), task.id.to_string()),
                    ("feedback".to_string(), feedback.join("\n")),
                ]);
                match self.hub.escalate(
                    &task.team,
                    &format!("Task '{}' failed validation", task.name),
                    &options,
                    context,
                ) {
                    Ok(escalation) => self.emit(OrchestratorEvent::EscalationRaised {
                        project,
                        escalation,
                    }),
                    Err(e) => alog_warn!("hub: escalation for {} failed: {}", task.id.short(), e),
                }

                self.emit(OrchestratorEvent::TaskFailed {
                    project,
                    task: task.id,
                    reason,
                });
                if !blocked.is_empty() {
                    self.emit(OrchestratorEvent::TasksBlocked {
                        project,
                        tasks: blocked.clone(),
                    });
                }
                Ok(Applied::Failed { feedback, blocked })
            }
            ValidationOutcome::Discarded => Ok(Applied::Discarded),
        }
    }

    /// Submit a deliverable for a Ready or Running task.
    ///
    /// # Errors
    /// - `TaskNotFound` for an unknown task
    /// - `ProjectCancelled` if the owning project was cancelled
    /// - `RetriesExhausted` if the task's validation is already terminal
    pub async fn submit_deliverable(
        &self,
        task_id: &TaskId,
        deliverable: Deliverable,
    ) -> Result<SubmissionOutcome> {
        let project_id = self.owner_of(task_id).await?;
        let handle = self.handle(&project_id).await?;
        self.validation.ensure_open(task_id)?;

        let (task, reference, siblings) = {
            let mut state = handle.state.lock().await;
            ensure_active(&state.project)?;
            let scheduler = state.scheduler_mut()?;
            let status = scheduler
                .task(task_id)
                .map(|t| t.status.clone())
                .ok_or(Error::TaskNotFound(*task_id))?;
            match status {
                TaskStatus::Ready => scheduler.start(task_id)?,
                TaskStatus::Running => {}
                other => {
                    return Err(Error::InvalidTaskTransition {
                        task: *task_id,
                        from: other.label().to_string(),
                        to: TaskStatus::AwaitingValidation.label().to_string(),
                    })
                }
            }
            scheduler.await_validation(task_id)?;
            self.review_inputs(scheduler, task_id)?
        };

        let outcome = self
            .review(task.clone(), deliverable.clone(), reference, siblings)
            .await?;

        let mut state = handle.state.lock().await;
        let applied = self.apply_outcome(&handle, &mut state, &task, deliverable, outcome)?;
        self.persist(&state).await?;

        let status = state
            .scheduler
            .as_ref()
            .and_then(|s| s.task(task_id))
            .map(|t| t.status.clone())
            .unwrap_or(TaskStatus::Cancelled);
        let mut result = SubmissionOutcome {
            task: *task_id,
            status,
            blocked: true,
            issues: Vec::new(),
            score: None,
            attempts_left: None,
            unlocked: Vec::new(),
            blocked_tasks: Vec::new(),
        };
        match applied {
            Applied::Approved { score, unlocked } => {
                result.blocked = false;
                result.score = Some(score);
                result.unlocked = unlocked;
            }
            Applied::Retry {
                feedback,
                attempts_left,
            } => {
                result.issues = feedback;
                result.attempts_left = Some(attempts_left);
            }
            Applied::Failed { feedback, blocked } => {
                result.issues = feedback;
                result.attempts_left = Some(0);
                result.blocked_tasks = blocked;
            }
            Applied::Discarded => {
                result.issues = vec!["project was cancelled during review".to_string()];
            }
        }
        Ok(result)
    }

    // ========== Execution ==========

    /// Review a returned team call. Returns the task again when it must be
    /// sent back to its team.
    async fn settle(
        &self,
        handle: &ProjectHandle,
        task: Task,
        result: Result<Deliverable>,
    ) -> Result<Option<Task>> {
        let review = {
            let mut state = handle.state.lock().await;
            if handle.cancel.is_cancelled() {
                return Ok(None);
            }
            let scheduler = state.scheduler_mut()?;
            let current = scheduler
                .task(&task.id)
                .cloned()
                .ok_or(Error::TaskNotFound(task.id))?;
            if current.status != TaskStatus::Running || current.attempts != task.attempts {
                alog_debug!(
                    "Dropping stale answer for {} '{}' (attempt {}, task is {} at attempt {})",
                    task.id.short(),
                    task.name,
                    task.attempts,
                    current.status,
                    current.attempts
                );
                // A rejected outside submission left the task with its team.
                return Ok((current.status == TaskStatus::Running).then_some(current));
            }
            scheduler.await_validation(&task.id)?;
            match result {
                Ok(deliverable) => {
                    let (task, reference, siblings) = self.review_inputs(scheduler, &task.id)?;
                    Review::Deliverable {
                        deliverable,
                        task,
                        reference,
                        siblings,
                    }
                }
                Err(e) => Review::Failure {
                    task,
                    message: e.to_string(),
                },
            }
        };

        let (task, deliverable, outcome) = match review {
            Review::Deliverable {
                deliverable,
                task,
                reference,
                siblings,
            } => {
                let outcome = self
                    .review(task.clone(), deliverable.clone(), reference, siblings)
                    .await?;
                (task, deliverable, outcome)
            }
            Review::Failure { task, message } => {
                alog_warn!(
                    "Team {} failed on {} '{}': {}",
                    task.team,
                    task.id.short(),
                    task.name,
                    message
                );
                let outcome = self.validation.record_execution_failure(&task, &message)?;
                (task, Deliverable::default(), outcome)
            }
        };

        let mut state = handle.state.lock().await;
        let applied = self.apply_outcome(handle, &mut state, &task, deliverable, outcome)?;
        if !matches!(applied, Applied::Discarded) {
            self.advance_while_open(&mut state)?;
        }
        self.persist(&state).await?;

        match applied {
            Applied::Retry { .. } => Ok(state.scheduler()?.task(&task.id).cloned()),
            _ => Ok(None),
        }
    }

    /// Drive a planned project until no task can make progress.
    ///
    /// Ready tasks are dispatched to their teams concurrently, limited per
    /// team. Every returned deliverable is reviewed; rejected ones go back
    /// to the team with the feedback, exhausted ones fail and block their
    /// dependents. Phases advance whenever their gate opens.
    ///
    /// If the run aborts, tasks still with a team or in review go back to
    /// Ready so the next run dispatches them again.
    ///
    /// # Errors
    /// - `NotPlanned` if no requirements were submitted
    /// - `UnknownTeam` if a task's team is not registered; nothing runs
    /// - any error that aborted a settlement, after the release above
    pub async fn run_project(&self, id: &ProjectId) -> Result<ProjectReport> {
        let handle = self.handle(id).await?;
        {
            let mut state = handle.state.lock().await;
            ensure_active(&state.project)?;
            let scheduler = state.scheduler()?;
            if let Some(task) = scheduler
                .tasks()
                .find(|t| !t.is_finished() && !self.teams.contains(&t.team))
            {
                return Err(Error::UnknownTeam(task.team.clone()));
            }
            self.advance_while_open(&mut state)?;
            self.persist(&state).await?;
        }

        if let Err(e) = self.drive(&handle, id).await {
            alog_error!("Run for {} aborted: {}", id.short(), e);
            self.release_in_flight(&handle).await;
            return Err(e);
        }

        if !handle.cancel.is_cancelled() {
            let mut state = handle.state.lock().await;
            self.advance_while_open(&mut state)?;
            self.persist(&state).await?;
            alog!(
                "Run finished for {}: phase {}",
                id.short(),
                state.project.phase
            );
            self.emit(OrchestratorEvent::RunFinished { project: *id });
        }
        self.get_project_report(id).await
    }

    /// Dispatch and settle team calls until nothing is in flight.
    async fn drive(&self, handle: &ProjectHandle, id: &ProjectId) -> Result<()> {
        let mut in_flight = FuturesUnordered::new();
        loop {
            {
                let mut state = handle.state.lock().await;
                if handle.cancel.is_cancelled() {
                    break;
                }
                let scheduler = state.scheduler_mut()?;
                for task_id in scheduler.next_runnable() {
                    scheduler.start(&task_id)?;
                    let task = scheduler
                        .task(&task_id)
                        .cloned()
                        .ok_or(Error::TaskNotFound(task_id))?;

                    if let Err(e) = self
                        .hub
                        .update_team_context(&task.team, ContextUpdate::working_on(&task.name))
                    {
                        alog_warn!("hub: {}", e);
                    }
                    alog_debug!(
                        "Dispatching {} '{}' to {} (attempt {})",
                        task.id.short(),
                        task.name,
                        task.team,
                        task.attempts
                    );
                    self.emit(OrchestratorEvent::TaskStarted {
                        project: *id,
                        task: task.id,
                        team: task.team.clone(),
                        attempt: task.attempts,
                    });
                    in_flight.push(call_team(self.teams.get(&task.team), task, self.team_timeout));
                }
            }

            if in_flight.is_empty() {
                break;
            }

            let (task, result) = tokio::select! {
                _ = handle.cancel.cancelled() => break,
                next = in_flight.next() => match next {
                    Some(done) => done,
                    None => break,
                },
            };

            if let Some(task) = self.settle(handle, task, result).await? {
                alog_debug!(
                    "Sending {} '{}' back to {} (attempt {})",
                    task.id.short(),
                    task.name,
                    task.team,
                    task.attempts
                );
                self.emit(OrchestratorEvent::TaskStarted {
                    project: *id,
                    task: task.id,
                    team: task.team.clone(),
                    attempt: task.attempts,
                });
                in_flight.push(call_team(self.teams.get(&task.team), task, self.team_timeout));
            }
        }
        // Outstanding team calls are dropped with the set.
        Ok(())
    }

    /// Put every task stranded by an aborted run back to Ready and drop
    /// the reviews they had open.
    async fn release_in_flight(&self, handle: &ProjectHandle) {
        let mut state = handle.state.lock().await;
        let Some(scheduler) = state.scheduler.as_mut() else {
            return;
        };
        let released = scheduler.release_in_flight();
        if released.is_empty() {
            return;
        }
        let dropped = self.validation.abandon_reviews(&released);
        alog_warn!(
            "Released {} in-flight tasks of {} ({} open reviews dropped)",
            released.len(),
            state.project.id.short(),
            dropped
        );
        // persist logs its own failure
        let _ = self.persist(&state).await;
    }

    /// Abort a project: unfinished tasks become Cancelled and their
    /// in-flight validation records are dropped. Returns the number of
    /// cancelled tasks.
    pub async fn cancel_project(&self, id: &ProjectId) -> Result<usize> {
        let handle = self.handle(id).await?;
        let mut state = handle.state.lock().await;
        state.project.cancel()?;
        handle.cancel.cancel();

        let (cancelled, task_ids) = match state.scheduler.as_mut() {
            Some(scheduler) => (scheduler.cancel_all(), scheduler.task_ids()),
            None => (Vec::new(), Vec::new()),
        };
        let discarded = self.validation.discard(&task_ids);
        self.persist(&state).await?;

        alog!(
            "Project {} cancelled: {} tasks cancelled, {} validation records dropped",
            id.short(),
            cancelled.len(),
            discarded
        );
        self.emit(OrchestratorEvent::ProjectCancelled { project: *id });
        Ok(cancelled.len())
    }

    /// Archive a project. Archived projects are kept but never advance.
    pub async fn archive_project(&self, id: &ProjectId) -> Result<()> {
        let handle = self.handle(id).await?;
        let mut state = handle.state.lock().await;
        state.project.archive()?;
        self.persist(&state).await?;
        alog_debug!("Project {} archived", id.short());
        Ok(())
    }

    // ========== Reporting ==========

    pub async fn get_project_report(&self, id: &ProjectId) -> Result<ProjectReport> {
        let handle = self.handle(id).await?;
        let state = handle.state.lock().await;

        let project_key = id.to_string();
        let open_escalations = self
            .hub
            .open_escalations()
            .into_iter()
            .filter(|e| e.context.get("project") == Some(&project_key))
            .collect();

        let mut report = ProjectReport {
            project: state.project.clone(),
            progress: Progress::default(),
            plan: None,
            tasks: Vec::new(),
            blocked: Vec::new(),
            failed: Vec::new(),
            validation_queue: ValidationQueue::default(),
            open_escalations,
            team_workload: BTreeMap::new(),
        };
        if let Some(scheduler) = &state.scheduler {
            report.progress = scheduler.progress();
            report.plan = Some(scheduler.plan_summary(state.team_count()));
            report.tasks = scheduler
                .tasks()
                .map(|t| summarize_task(scheduler, &self.validation, t))
                .collect();
            report.blocked = report
                .tasks
                .iter()
                .filter(|t| matches!(t.status, TaskStatus::Blocked { .. }))
                .cloned()
                .collect();
            report.failed = report
                .tasks
                .iter()
                .filter(|t| matches!(t.status, TaskStatus::Failed { .. }))
                .cloned()
                .collect();
            report.validation_queue = self.validation.queue(&scheduler.task_ids());
            report.team_workload = scheduler.team_workload();
        }
        Ok(report)
    }

    // ========== Persistence ==========

    /// Load a saved project into memory and return its id.
    ///
    /// Tasks that were with a team when the snapshot was taken become
    /// Ready again; only settled validation records are restored.
    pub async fn load_project(&self, id: &ProjectId) -> Result<ProjectId> {
        if self.projects.read().await.contains_key(id) {
            return Ok(*id);
        }
        let store = self.store.as_ref().ok_or(Error::ProjectNotFound(*id))?;
        let snapshot = store.load(id).await?;
        if snapshot.version > SNAPSHOT_VERSION {
            alog_warn!(
                "Snapshot for {} has version {} (newer than {})",
                id.short(),
                snapshot.version,
                SNAPSHOT_VERSION
            );
        }

        let scheduler = if snapshot.tasks.is_empty() {
            None
        } else {
            let mut tasks = snapshot.tasks;
            for task in tasks.iter_mut().filter(|t| t.is_in_flight()) {
                // Interrupted team calls are redone.
                task.release()?;
            }
            Some(Scheduler::from_tasks(tasks, self.scheduler_config.clone())?)
        };

        let settled = snapshot
            .validation
            .into_iter()
            .filter(|r| matches!(r.state, ValidationState::Approved | ValidationState::Rejected))
            .collect();
        self.validation.restore(settled);

        if let Some(scheduler) = &scheduler {
            let mut owners = self.owners.write().await;
            for task in scheduler.tasks() {
                owners.insert(task.id, *id);
                self.hub.register_team(task.team.clone());
            }
        }

        let cancel = CancellationToken::new();
        if snapshot.project.status == ProjectStatus::Cancelled {
            cancel.cancel();
        }
        let state = ProjectState {
            project: snapshot.project,
            requirements: snapshot.requirements,
            scheduler,
        };
        self.projects
            .write()
            .await
            .insert(*id, Arc::new(ProjectHandle {
                state: Mutex::new(state),
                cancel,
            }));
        alog_debug!("Project {} loaded from store", id.short());
        Ok(*id)
    }
}
