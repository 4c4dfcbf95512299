//! Core domain models for agency orchestration.
//!
//! This module contains the fundamental data structures used throughout
//! the orchestration system: projects, tasks, deliverables and the
//! dependency graph that orders them.

pub mod dag;
pub mod deliverable;
pub mod project;
pub mod task;

pub use dag::{DependencyGraph, ExecutionLevel};
pub use deliverable::{Deliverable, TestReport};
pub use project::{PhaseCheckpoint, Project, ProjectId, ProjectPhase, ProjectStatus};
pub use task::{Task, TaskId, TaskKind, TaskStatus, TeamId};
