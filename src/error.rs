use thiserror::Error;

use crate::core::{ProjectId, TaskId, TeamId};

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Cyclic dependency between tasks: {}", format_ids(.tasks))]
    CyclicDependency { tasks: Vec<TaskId> },

    #[error("Task {task} depends on unknown task {prerequisite}")]
    UnknownPrerequisite { task: TaskId, prerequisite: TaskId },

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Task already exists: {0}")]
    TaskExists(TaskId),

    #[error("Project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("Project {0} has no schedule yet")]
    NotPlanned(ProjectId),

    #[error("Project {0} was cancelled")]
    ProjectCancelled(ProjectId),

    #[error("Team {team} failed to execute: {message}")]
    TeamExecution { team: TeamId, message: String },

    #[error("Unknown team: {0}")]
    UnknownTeam(TeamId),

    #[error("Unknown collaboration or escalation: {0}")]
    UnknownItem(String),

    #[error("Invalid task transition for {task} from {from} to {to}")]
    InvalidTaskTransition {
        task: TaskId,
        from: String,
        to: String,
    },

    #[error("Invalid validation transition for {task} from {from} to {to}")]
    InvalidValidationTransition {
        task: TaskId,
        from: String,
        to: String,
    },

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidPhaseTransition { from: String, to: String },

    #[error("Team {team} is at capacity (max: {max})")]
    TeamAtCapacity { team: TeamId, max: usize },

    #[error("Task {task} exhausted its {max} validation attempts")]
    RetriesExhausted { task: TaskId, max: u32 },

    #[error("Invalid requirements: {0}")]
    InvalidRequirements(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

fn format_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(|id| id.short())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Structural errors are surfaced immediately and never retried.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::CyclicDependency { .. }
                | Error::UnknownPrerequisite { .. }
                | Error::TaskNotFound(_)
                | Error::TaskExists(_)
                | Error::ProjectNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
