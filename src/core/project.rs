//! Project model with phase transition validation.
//!
//! A project moves through a fixed phase ordering:
//!
//! Requirements -> Planning -> Architecture -> Execution -> Validation -> Done
//!
//! Projects are never deleted; a finished or abandoned project is archived.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Unique identifier for a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub Uuid);

impl ProjectId {
    /// Create a new unique project identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ProjectId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Phases of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectPhase {
    /// Waiting for the client's requirements.
    Requirements,
    /// Task set and levels are being produced.
    Planning,
    /// Architecture tasks run first.
    Architecture,
    /// Execution teams deliver.
    Execution,
    /// QA and business sign-off.
    Validation,
    /// All tasks accepted.
    Done,
}

impl ProjectPhase {
    /// The phase that follows this one, if any.
    pub fn next(&self) -> Option<ProjectPhase> {
        match self {
            ProjectPhase::Requirements => Some(ProjectPhase::Planning),
            ProjectPhase::Planning => Some(ProjectPhase::Architecture),
            ProjectPhase::Architecture => Some(ProjectPhase::Execution),
            ProjectPhase::Execution => Some(ProjectPhase::Validation),
            ProjectPhase::Validation => Some(ProjectPhase::Done),
            ProjectPhase::Done => None,
        }
    }
}

impl std::fmt::Display for ProjectPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectPhase::Requirements => write!(f, "requirements"),
            ProjectPhase::Planning => write!(f, "planning"),
            ProjectPhase::Architecture => write!(f, "architecture"),
            ProjectPhase::Execution => write!(f, "execution"),
            ProjectPhase::Validation => write!(f, "validation"),
            ProjectPhase::Done => write!(f, "done"),
        }
    }
}

/// Status of a project in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Active,
    Completed,
    Cancelled,
    Archived,
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectStatus::Active => write!(f, "active"),
            ProjectStatus::Completed => write!(f, "completed"),
            ProjectStatus::Cancelled => write!(f, "cancelled"),
            ProjectStatus::Archived => write!(f, "archived"),
        }
    }
}

/// A checkpoint recorded whenever the project enters a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseCheckpoint {
    /// The phase that was entered.
    pub phase: ProjectPhase,
    /// When this phase was entered.
    pub entered_at: DateTime<Utc>,
    /// Optional note, e.g. what satisfied the gate.
    pub note: Option<String>,
}

/// A client project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub description: String,
    /// Client reference as given by the caller.
    pub client: String,
    pub phase: ProjectPhase,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// History of all phases visited, in order.
    pub checkpoints: Vec<PhaseCheckpoint>,
}

impl Project {
    /// Create a project in the Requirements phase.
    pub fn new(name: &str, description: &str, client: &str) -> Self {
        let now = Utc::now();
        Self {
            id: ProjectId::new(),
            name: name.to_string(),
            description: description.to_string(),
            client: client.to_string(),
            phase: ProjectPhase::Requirements,
            status: ProjectStatus::Active,
            created_at: now,
            updated_at: now,
            checkpoints: vec![PhaseCheckpoint {
                phase: ProjectPhase::Requirements,
                entered_at: now,
                note: None,
            }],
        }
    }

    /// Check if a transition to the target phase is valid.
    ///
    /// Only active projects move, and only to the immediately following phase.
    pub fn can_transition(&self, target: ProjectPhase) -> bool {
        self.status == ProjectStatus::Active && self.phase.next() == Some(target)
    }

    /// Move to the target phase and record a checkpoint.
    ///
    /// Entering Done also marks the project Completed.
    pub fn transition(&mut self, target: ProjectPhase, note: Option<String>) -> Result<()> {
        if !self.can_transition(target) {
            return Err(Error::InvalidPhaseTransition {
                from: self.phase.to_string(),
                to: target.to_string(),
            });
        }

        let now = Utc::now();
        self.phase = target;
        self.updated_at = now;
        self.checkpoints.push(PhaseCheckpoint {
            phase: target,
            entered_at: now,
            note,
        });
        if target == ProjectPhase::Done {
            self.status = ProjectStatus::Completed;
        }
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        if self.status != ProjectStatus::Active {
            return Err(Error::InvalidPhaseTransition {
                from: self.status.to_string(),
                to: ProjectStatus::Cancelled.to_string(),
            });
        }
        self.status = ProjectStatus::Cancelled;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Archive the project. Allowed from any status except Archived.
    pub fn archive(&mut self) -> Result<()> {
        if self.status == ProjectStatus::Archived {
            return Err(Error::InvalidPhaseTransition {
                from: self.status.to_string(),
                to: ProjectStatus::Archived.to_string(),
            });
        }
        self.status = ProjectStatus::Archived;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.status == ProjectStatus::Active
    }
}
