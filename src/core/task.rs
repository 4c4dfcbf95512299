//! Task data model for the execution graph.
//!
//! Tasks are the atomic units of work assigned to teams. Each task
//! tracks its status, owning team, prerequisites and the deliverable
//! that was eventually accepted for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::Deliverable;
use crate::error::{Error, Result};

/// Unique identifier for a task within a project.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Identifier of a team, e.g. `data_engineering` or `qa`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamId(pub String);

impl TeamId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TeamId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TeamId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for TeamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What kind of work a task represents.
///
/// The kind decides which sections a deliverable is expected to contain
/// and which knowledge domain it is scored against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Architecture,
    Infrastructure,
    DataDesign,
    DataPipeline,
    MlModel,
    Analytics,
    Testing,
    Deployment,
    BusinessSignoff,
    General,
}

impl TaskKind {
    /// Knowledge domain used to fetch reference material.
    pub fn domain(&self) -> &'static str {
        match self {
            TaskKind::Architecture => "architecture",
            TaskKind::Infrastructure | TaskKind::Deployment => "devops",
            TaskKind::DataDesign | TaskKind::DataPipeline => "data_engineering",
            TaskKind::MlModel => "data_science",
            TaskKind::Analytics => "data_analytics",
            TaskKind::Testing => "qa",
            TaskKind::BusinessSignoff | TaskKind::General => "general",
        }
    }
}

impl Default for TaskKind {
    fn default() -> Self {
        Self::General
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskKind::Architecture => "architecture",
            TaskKind::Infrastructure => "infrastructure",
            TaskKind::DataDesign => "data_design",
            TaskKind::DataPipeline => "data_pipeline",
            TaskKind::MlModel => "ml_model",
            TaskKind::Analytics => "analytics",
            TaskKind::Testing => "testing",
            TaskKind::Deployment => "deployment",
            TaskKind::BusinessSignoff => "business_signoff",
            TaskKind::General => "general",
        };
        f.write_str(s)
    }
}

/// Task status in its lifecycle.
///
/// Tasks progress Pending → Ready → Running → AwaitingValidation → Done.
/// Backward moves are AwaitingValidation → Running for a retry, and
/// Running/AwaitingValidation → Ready when a team call was lost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Task created but prerequisites are not all done.
    Pending,
    /// Prerequisites done, ready to be dispatched.
    Ready,
    /// The owning team is producing a deliverable.
    Running,
    /// A deliverable was submitted and is in review.
    AwaitingValidation,
    /// Deliverable accepted. Immutable from here on.
    Done,
    /// Validation retries exhausted.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
    /// An upstream task failed, so this one can never run.
    Blocked {
        /// Reason why the task is blocked.
        reason: String,
    },
    /// The project was cancelled before the task finished.
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    /// Short label without payload, used in counters and error messages.
    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::AwaitingValidation => "awaiting_validation",
            TaskStatus::Done => "done",
            TaskStatus::Failed { .. } => "failed",
            TaskStatus::Blocked { .. } => "blocked",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Done
                | TaskStatus::Failed { .. }
                | TaskStatus::Blocked { .. }
                | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
            TaskStatus::Blocked { reason } => write!(f, "blocked: {}", reason),
            other => f.write_str(other.label()),
        }
    }
}

/// A single task in the execution graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Human-readable name for the task.
    pub name: String,
    /// Detailed description of what the task should accomplish.
    pub description: String,
    /// Team that owns the task.
    pub team: TeamId,
    pub kind: TaskKind,
    /// Prerequisite ids in declaration order, without duplicates.
    pub prerequisites: Vec<TaskId>,
    /// Artifacts the deliverable must declare to pass technical review.
    pub expected_artifacts: Vec<String>,
    /// Requirements the deliverable must cover in business review.
    pub requirements: Vec<String>,
    pub estimated_hours: f64,
    /// Current execution status.
    pub status: TaskStatus,
    /// Accepted deliverable, set once the task is Done.
    pub result: Option<Deliverable>,
    /// Feedback accumulated from rejected submissions.
    pub feedback: Vec<String>,
    /// Number of times the task was dispatched to its team.
    pub attempts: u32,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task first started execution.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new task with the given name, owning team and kind.
    ///
    /// The task is created with Pending status, a generated ID and
    /// no prerequisites.
    pub fn new(name: &str, team: impl Into<TeamId>, kind: TaskKind) -> Self {
        Self {
            id: TaskId::new(),
            name: name.to_string(),
            description: String::new(),
            team: team.into(),
            kind,
            prerequisites: Vec::new(),
            expected_artifacts: Vec::new(),
            requirements: Vec::new(),
            estimated_hours: 0.0,
            status: TaskStatus::Pending,
            result: None,
            feedback: Vec::new(),
            attempts: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Add prerequisites, keeping declaration order and dropping duplicates.
    pub fn depends_on(mut self, ids: &[TaskId]) -> Self {
        for id in ids {
            self.add_prerequisite(*id);
        }
        self
    }

    pub fn with_artifacts(mut self, artifacts: &[&str]) -> Self {
        self.expected_artifacts = artifacts.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_requirements(mut self, requirements: &[String]) -> Self {
        self.requirements = requirements.to_vec();
        self
    }

    pub fn with_hours(mut self, hours: f64) -> Self {
        self.estimated_hours = hours;
        self
    }

    pub fn add_prerequisite(&mut self, id: TaskId) {
        // A self-dependency is kept so the graph reports it as a cycle.
        if !self.prerequisites.contains(&id) {
            self.prerequisites.push(id);
        }
    }

    fn invalid(&self, to: &str) -> Error {
        Error::InvalidTaskTransition {
            task: self.id,
            from: self.status.label().to_string(),
            to: to.to_string(),
        }
    }

    /// Pending → Ready once every prerequisite is done.
    pub fn mark_ready(&mut self) -> Result<()> {
        match self.status {
            TaskStatus::Pending => {
                self.status = TaskStatus::Ready;
                Ok(())
            }
            _ => Err(self.invalid("ready")),
        }
    }

    /// Ready → Running. Counts one dispatch attempt.
    pub fn start(&mut self) -> Result<()> {
        match self.status {
            TaskStatus::Ready => {
                self.status = TaskStatus::Running;
                self.attempts += 1;
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
                Ok(())
            }
            _ => Err(self.invalid("running")),
        }
    }

    /// Running → AwaitingValidation when a deliverable arrives.
    pub fn await_validation(&mut self) -> Result<()> {
        match self.status {
            TaskStatus::Running => {
                self.status = TaskStatus::AwaitingValidation;
                Ok(())
            }
            _ => Err(self.invalid("awaiting_validation")),
        }
    }

    /// AwaitingValidation → Running after a rejected submission.
    pub fn retry(&mut self, feedback: &[String]) -> Result<()> {
        match self.status {
            TaskStatus::AwaitingValidation => {
                self.feedback.extend(feedback.iter().cloned());
                self.status = TaskStatus::Running;
                self.attempts += 1;
                Ok(())
            }
            _ => Err(self.invalid("running")),
        }
    }

    /// Running/AwaitingValidation → Ready when the team call was lost.
    /// The attempt counter is kept.
    pub fn release(&mut self) -> Result<()> {
        match self.status {
            TaskStatus::Running | TaskStatus::AwaitingValidation => {
                self.status = TaskStatus::Ready;
                Ok(())
            }
            _ => Err(self.invalid("ready")),
        }
    }

    /// AwaitingValidation → Done with the accepted deliverable.
    pub fn complete(&mut self, result: Deliverable) -> Result<()> {
        match self.status {
            TaskStatus::AwaitingValidation => {
                self.status = TaskStatus::Done;
                self.result = Some(result);
                self.completed_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(self.invalid("done")),
        }
    }

    /// Running/AwaitingValidation → Failed.
    ///
    /// Retries exhausted in review is the usual path; a team that cannot
    /// run the task at all fails it straight from Running.
    pub fn fail(&mut self, error: &str) -> Result<()> {
        match self.status {
            TaskStatus::Running | TaskStatus::AwaitingValidation => {
                self.status = TaskStatus::Failed {
                    error: error.to_string(),
                };
                self.completed_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(self.invalid("failed")),
        }
    }

    /// Pending/Ready → Blocked because an upstream task failed.
    pub fn block(&mut self, reason: &str) -> Result<()> {
        match self.status {
            TaskStatus::Pending | TaskStatus::Ready => {
                self.status = TaskStatus::Blocked {
                    reason: reason.to_string(),
                };
                self.completed_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(self.invalid("blocked")),
        }
    }

    /// Any non-terminal state → Cancelled.
    pub fn cancel(&mut self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(self.invalid("cancelled"));
        }
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Check if the task is in a terminal state.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }

    /// Check if the task is currently with its team or in review.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Running | TaskStatus::AwaitingValidation
        )
    }
}
