//! Orchestration layer.
//!
//! Turns a requirements descriptor into a leveled task plan, dispatches
//! tasks to teams and drives each project through its phases.

mod catalog;
mod command;
mod orchestrator;
mod scheduler;
mod team;

pub use catalog::{
    catalog_teams, estimate_weeks, instantiate, summarize, DataVolume, LevelSummary, PlanSummary,
    RequirementsDescriptor,
};
pub use command::{CommandTeam, DEFAULT_TIMEOUT_SECS};
pub use orchestrator::{
    OrchestratorEvent, PhaseOutcome, PlanOutcome, ProjectOrchestrator, ProjectReport,
    SubmissionOutcome, TaskSummary,
};
pub use scheduler::{Progress, Scheduler, TeamWorkload};
pub use team::{Team, TeamRegistry};
