//! Fixed catalog of task templates and the plan summary built from it.
//!
//! A project's task set is instantiated from the templates below,
//! conditioned on the requirements descriptor. Prerequisites follow the
//! team precedence: architecture first, execution teams next, QA after
//! every execution team, business sign-off last.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use crate::core::{DependencyGraph, ExecutionLevel, Task, TaskId, TaskKind, TeamId};
use crate::error::{Error, Result};

/// Hours a team member works per week.
const HOURS_PER_WEEK: f64 = 40.0;
/// Share of a week that goes to planned work.
const EFFICIENCY: f64 = 0.7;

/// Expected data volume; scales every estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataVolume {
    Small,
    #[default]
    Medium,
    Large,
    Enterprise,
}

impl DataVolume {
    pub fn multiplier(&self) -> f64 {
        match self {
            DataVolume::Small => 0.5,
            DataVolume::Medium => 1.0,
            DataVolume::Large => 2.0,
            DataVolume::Enterprise => 3.0,
        }
    }
}

impl std::fmt::Display for DataVolume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataVolume::Small => write!(f, "small"),
            DataVolume::Medium => write!(f, "medium"),
            DataVolume::Large => write!(f, "large"),
            DataVolume::Enterprise => write!(f, "enterprise"),
        }
    }
}

/// What a client asked for. Only the listed options are recognized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequirementsDescriptor {
    /// Include a machine-learning model task.
    pub has_ml: bool,
    /// Include an analytics and dashboards task.
    pub has_analytics: bool,
    pub data_volume: DataVolume,
    /// People available across teams; drives the duration estimate.
    pub team_count: usize,
    /// Business requirements checked during business review.
    pub requirements: Vec<String>,
}

impl Default for RequirementsDescriptor {
    fn default() -> Self {
        Self {
            has_ml: false,
            has_analytics: true,
            data_volume: DataVolume::Medium,
            team_count: 3,
            requirements: Vec::new(),
        }
    }
}

impl RequirementsDescriptor {
    pub fn with_ml(mut self, has_ml: bool) -> Self {
        self.has_ml = has_ml;
        self
    }

    pub fn with_analytics(mut self, has_analytics: bool) -> Self {
        self.has_analytics = has_analytics;
        self
    }

    pub fn with_volume(mut self, volume: DataVolume) -> Self {
        self.data_volume = volume;
        self
    }

    pub fn with_team_count(mut self, team_count: usize) -> Self {
        self.team_count = team_count;
        self
    }

    pub fn with_requirements(mut self, requirements: &[&str]) -> Self {
        self.requirements = requirements.iter().map(|r| r.to_string()).collect();
        self
    }

    /// Reject descriptors no plan can be built from.
    pub fn validate(&self) -> Result<()> {
        if self.team_count == 0 {
            return Err(Error::InvalidRequirements(
                "team_count must be at least 1".to_string(),
            ));
        }
        if let Some(blank) = self.requirements.iter().position(|r| r.trim().is_empty()) {
            return Err(Error::InvalidRequirements(format!(
                "requirement #{} is empty",
                blank + 1
            )));
        }
        Ok(())
    }

    /// Load a descriptor from a `.json` file, or TOML otherwise.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let descriptor: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => toml::from_str(&content)?,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Condition {
    Always,
    Ml,
    Analytics,
}

/// A task the catalog can instantiate.
#[derive(Debug, Clone, Copy)]
struct TaskTemplate {
    key: &'static str,
    name: &'static str,
    team: &'static str,
    kind: TaskKind,
    description: &'static str,
    artifacts: &'static [&'static str],
    base_hours: f64,
    /// Whether business requirements are checked for this task.
    business_review: bool,
    /// Keys of templates that must finish first, when instantiated.
    after: &'static [&'static str],
    condition: Condition,
}

const CATALOG: &[TaskTemplate] = &[
    TaskTemplate {
        key: "architecture",
        name: "Solution architecture",
        team: "architecture",
        kind: TaskKind::Architecture,
        description: "Choose technologies and cloud provider, estimate costs, plan scalability and security",
        artifacts: &["adr.md", "components.md", "cost_estimate.md"],
        base_hours: 16.0,
        business_review: true,
        after: &[],
        condition: Condition::Always,
    },
    TaskTemplate {
        key: "infrastructure",
        name: "Infrastructure provisioning",
        team: "devops",
        kind: TaskKind::Infrastructure,
        description: "Provision the cloud environment as code, set up CI/CD and base monitoring",
        artifacts: &["iac", "ci_pipeline"],
        base_hours: 24.0,
        business_review: false,
        after: &["architecture"],
        condition: Condition::Always,
    },
    TaskTemplate {
        key: "data_design",
        name: "Data model and pipeline design",
        team: "data_engineering",
        kind: TaskKind::DataDesign,
        description: "Model the data, define schemas and contracts, plan data quality and lineage",
        artifacts: &["data_model.md", "schemas"],
        base_hours: 16.0,
        business_review: true,
        after: &["architecture"],
        condition: Condition::Always,
    },
    TaskTemplate {
        key: "pipelines",
        name: "Data pipeline implementation",
        team: "data_engineering",
        kind: TaskKind::DataPipeline,
        description: "Build ingestion jobs and transformations, configure orchestration and data tests",
        artifacts: &["pipelines", "runbook.md"],
        base_hours: 40.0,
        business_review: true,
        after: &["infrastructure", "data_design"],
        condition: Condition::Always,
    },
    TaskTemplate {
        key: "ml_model",
        name: "Machine learning models",
        team: "data_science",
        kind: TaskKind::MlModel,
        description: "Engineer features, train and evaluate models, expose an inference API",
        artifacts: &["model_card.md", "inference_api"],
        base_hours: 32.0,
        business_review: true,
        after: &["pipelines"],
        condition: Condition::Ml,
    },
    TaskTemplate {
        key: "analytics",
        name: "Analytics and dashboards",
        team: "data_analytics",
        kind: TaskKind::Analytics,
        description: "Write analytical queries, build dashboards and KPIs, configure business alerts",
        artifacts: &["dashboards", "metrics.md"],
        base_hours: 24.0,
        business_review: true,
        after: &["pipelines"],
        condition: Condition::Analytics,
    },
    TaskTemplate {
        key: "testing",
        name: "Integrated testing",
        team: "qa",
        kind: TaskKind::Testing,
        description: "Run end-to-end, performance, data quality and security tests",
        artifacts: &["test_report.md"],
        base_hours: 16.0,
        business_review: true,
        after: &["pipelines", "ml_model", "analytics"],
        condition: Condition::Always,
    },
    TaskTemplate {
        key: "deployment",
        name: "Production deployment",
        team: "devops",
        kind: TaskKind::Deployment,
        description: "Deploy to production, enable monitoring and alerts, hand over to operations",
        artifacts: &["release_notes.md", "rollback_plan.md"],
        base_hours: 8.0,
        business_review: true,
        after: &["testing"],
        condition: Condition::Always,
    },
    TaskTemplate {
        key: "signoff",
        name: "Business sign-off",
        team: "product_owner",
        kind: TaskKind::BusinessSignoff,
        description: "Confirm the delivered solution meets the agreed requirements",
        artifacts: &["signoff.md"],
        base_hours: 4.0,
        business_review: true,
        after: &["deployment"],
        condition: Condition::Always,
    },
];

impl TaskTemplate {
    fn applies(&self, descriptor: &RequirementsDescriptor) -> bool {
        match self.condition {
            Condition::Always => true,
            Condition::Ml => descriptor.has_ml,
            Condition::Analytics => descriptor.has_analytics,
        }
    }
}

/// Build the task set for a descriptor, in catalog order.
pub fn instantiate(descriptor: &RequirementsDescriptor) -> Result<Vec<Task>> {
    descriptor.validate()?;
    let multiplier = descriptor.data_volume.multiplier();

    let mut ids: HashMap<&'static str, TaskId> = HashMap::new();
    let mut tasks = Vec::new();
    for template in CATALOG.iter().filter(|t| t.applies(descriptor)) {
        // Skipped templates drop out of the chain.
        let prerequisites: Vec<TaskId> = template
            .after
            .iter()
            .filter_map(|key| ids.get(key).copied())
            .collect();

        let mut task = Task::new(template.name, template.team, template.kind)
            .with_description(template.description)
            .with_artifacts(template.artifacts)
            .with_hours(template.base_hours * multiplier)
            .depends_on(&prerequisites);
        if template.business_review {
            task = task.with_requirements(&descriptor.requirements);
        }

        ids.insert(template.key, task.id);
        tasks.push(task);
    }
    Ok(tasks)
}

/// Teams the catalog can assign work to.
pub fn catalog_teams() -> Vec<TeamId> {
    let teams: BTreeSet<&str> = CATALOG.iter().map(|t| t.team).collect();
    teams.into_iter().map(TeamId::from).collect()
}

/// One level of the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSummary {
    pub index: usize,
    pub tasks: Vec<String>,
    pub teams_involved: Vec<TeamId>,
    pub hours: f64,
    /// More than one task can run at the same time.
    pub can_parallelize: bool,
}

/// Estimates and level breakdown of a built plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub total_tasks: usize,
    pub total_hours: f64,
    pub estimated_weeks: f64,
    pub levels: Vec<LevelSummary>,
}

/// Weeks of work for `hours` spread over `team_count` people.
pub fn estimate_weeks(hours: f64, team_count: usize) -> f64 {
    let per_week = HOURS_PER_WEEK * team_count.max(1) as f64 * EFFICIENCY;
    (hours / per_week * 10.0).round() / 10.0
}

pub fn summarize(
    graph: &DependencyGraph,
    levels: &[ExecutionLevel],
    team_count: usize,
) -> PlanSummary {
    let levels: Vec<LevelSummary> = levels
        .iter()
        .map(|level| {
            let tasks: Vec<&Task> = level
                .tasks
                .iter()
                .filter_map(|id| graph.get_task(id))
                .collect();
            let teams: BTreeSet<TeamId> = tasks.iter().map(|t| t.team.clone()).collect();
            LevelSummary {
                index: level.index,
                tasks: tasks.iter().map(|t| t.name.clone()).collect(),
                teams_involved: teams.into_iter().collect(),
                hours: tasks.iter().map(|t| t.estimated_hours).sum(),
                can_parallelize: tasks.len() > 1,
            }
        })
        .collect();

    let total_hours: f64 = graph.tasks().map(|t| t.estimated_hours).sum();
    PlanSummary {
        total_tasks: graph.task_count(),
        total_hours,
        estimated_weeks: estimate_weeks(total_hours, team_count),
        levels,
    }
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} tasks, {:.1} hours, ~{:.1} weeks",
            self.total_tasks, self.total_hours, self.estimated_weeks
        )?;
        for level in &self.levels {
            let teams: Vec<&str> = level.teams_involved.iter().map(|t| t.as_str()).collect();
            writeln!(
                f,
                "  level {} [{}]{}",
                level.index,
                teams.join(", "),
                if level.can_parallelize { " parallel" } else { "" }
            )?;
            for task in &level.tasks {
                writeln!(f, "    - {}", task)?;
            }
        }
        Ok(())
    }
}
