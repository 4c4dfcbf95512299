use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use agency::config::Config;
use agency::core::{ProjectId, ProjectStatus};
use agency::orchestration::{
    CommandTeam, OrchestratorEvent, ProjectOrchestrator, ProjectReport, RequirementsDescriptor,
    Scheduler, TeamRegistry,
};
use agency::quality::{KnowledgeStore, StaticKnowledgeStore};
use agency::state::{JsonFileStore, ProjectStore};
use agency::{alog, alog_warn, Result};

/// Agency - multi-team data project orchestrator
#[derive(Parser, Debug)]
#[command(name = "agency")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    AGENCY_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.agency/agency.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Config file (defaults to ~/.agency/agency.toml)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Show the task plan for a requirements file without running it
    Plan {
        /// Requirements descriptor (TOML, or JSON with a .json extension)
        requirements: PathBuf,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a project from a requirements file and run it with the configured teams
    Run {
        requirements: PathBuf,

        /// Project name
        #[arg(long, short = 'n')]
        name: String,

        /// Client the project is delivered to
        #[arg(long, default_value = "internal")]
        client: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the last saved state of a project
    Report {
        /// Project ID (full or short prefix)
        project_id: String,

        #[arg(long)]
        json: bool,
    },

    /// List saved projects
    List,

    /// Cancel a saved project
    Cancel {
        project_id: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    agency::log::init_with_debug(cli.debug);
    if cli.debug {
        alog!("Agency starting (debug mode enabled)");
    }

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Command::Plan { requirements, json } => run_plan(&config, requirements, json),
        Command::Run {
            requirements,
            name,
            client,
            description,
            json,
        } => run_project(&config, requirements, &name, &client, &description, json),
        Command::Report { project_id, json } => run_report(&config, &project_id, json),
        Command::List => run_list(&config),
        Command::Cancel { project_id } => run_cancel(&config, &project_id),
    }
}

fn knowledge_store(config: &Config) -> Result<Arc<dyn KnowledgeStore>> {
    let store = match config.knowledge_path() {
        Some(path) => StaticKnowledgeStore::load(&path)?,
        None => StaticKnowledgeStore::builtin(),
    };
    Ok(Arc::new(store))
}

fn team_registry(config: &Config) -> TeamRegistry {
    let mut registry = TeamRegistry::new();
    for (id, command) in &config.teams {
        registry.register(Arc::new(
            CommandTeam::new(id.as_str(), command).with_timeout(config.orchestrator.team_timeout()),
        ));
    }
    registry
}

fn orchestrator(config: &Config) -> Result<(ProjectOrchestrator, Arc<JsonFileStore>)> {
    let store = Arc::new(JsonFileStore::new(config.projects_dir()?));
    let orchestrator =
        ProjectOrchestrator::new(config, team_registry(config), knowledge_store(config)?)
            .with_store(store.clone());
    Ok((orchestrator, store))
}

/// Print the plan for a requirements file.
fn run_plan(config: &Config, requirements: PathBuf, json: bool) -> Result<()> {
    let descriptor = RequirementsDescriptor::load(&requirements)?;
    descriptor.validate()?;
    let scheduler = Scheduler::build(&descriptor, config.scheduler.clone())?;
    let summary = scheduler.plan_summary(descriptor.team_count);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Plan for {}", requirements.display());
    println!(
        "  data volume: {}, ml: {}, analytics: {}, teams: {}",
        descriptor.data_volume, descriptor.has_ml, descriptor.has_analytics, descriptor.team_count
    );
    println!();
    print!("{}", summary);
    Ok(())
}

fn print_event(event: &OrchestratorEvent) {
    match event {
        OrchestratorEvent::PlanBuilt { tasks, levels, .. } => {
            println!("  plan: {} tasks in {} levels", tasks, levels)
        }
        OrchestratorEvent::PhaseAdvanced { to, .. } => println!("  phase -> {}", to),
        OrchestratorEvent::TaskStarted {
            task, team, attempt, ..
        } => println!("  {} started {} (attempt {})", team, task.short(), attempt),
        OrchestratorEvent::TaskApproved { task, score, .. } => {
            println!("  \x1b[32mapproved\x1b[0m {} (score {:.2})", task.short(), score)
        }
        OrchestratorEvent::TaskRejected {
            task,
            attempts_left,
            ..
        } => println!(
            "  \x1b[33mrejected\x1b[0m {} ({} attempts left)",
            task.short(),
            attempts_left
        ),
        OrchestratorEvent::TaskFailed { task, reason, .. } => {
            println!("  \x1b[31mfailed\x1b[0m {}: {}", task.short(), reason)
        }
        OrchestratorEvent::TasksBlocked { tasks, .. } => {
            println!("  blocked {} dependent tasks", tasks.len())
        }
        OrchestratorEvent::EscalationRaised { escalation, .. } => {
            println!("  escalation {} raised", escalation)
        }
        OrchestratorEvent::ProjectCreated { .. }
        | OrchestratorEvent::ProjectCancelled { .. }
        | OrchestratorEvent::RunFinished { .. } => {}
    }
}

/// Create, plan and run a project.
fn run_project(
    config: &Config,
    requirements: PathBuf,
    name: &str,
    client: &str,
    description: &str,
    json: bool,
) -> Result<()> {
    alog!(
        "Run command: requirements={}, name={:?}, client={:?}",
        requirements.display(),
        name,
        client
    );
    let descriptor = RequirementsDescriptor::load(&requirements)?;
    if config.teams.is_empty() {
        alog_warn!("No teams configured; every task will fail to dispatch");
    }

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let (tx, mut rx) = mpsc::channel(256);
        let (orchestrator, _) = orchestrator(config)?;
        let orchestrator = orchestrator.with_events(tx);

        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !json {
                    print_event(&event);
                }
            }
        });

        let id = orchestrator.create_project(name, description, client).await?;
        if !json {
            println!("Project {} ({})", name, id.short());
        }
        let plan = orchestrator.submit_requirements(&id, descriptor).await?;
        for issue in &plan.issues {
            alog_warn!("{}", issue);
            if !json {
                println!("  warning: {}", issue);
            }
        }

        let report = orchestrator.run_project(&id).await;
        drop(orchestrator);
        let _ = printer.await;
        report
    })?;

    print_report(&report, json)
}

fn print_report(report: &ProjectReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!();
    println!("  Project ID: {}", report.project.id.short());
    println!("  Status:     {}", format_status(report.project.status));
    println!();
    print!("{}", report);
    if !report.failed.is_empty() || !report.blocked.is_empty() {
        println!();
        println!("Next steps:");
        println!("  • Inspect failures: agency report {}", report.project.id.short());
        println!("  • Cancel project:   agency cancel {}", report.project.id.short());
    }
    Ok(())
}

/// Format project status with color codes for terminal.
fn format_status(status: ProjectStatus) -> String {
    match status {
        ProjectStatus::Completed => format!("\x1b[32m{}\x1b[0m", status), // Green
        ProjectStatus::Active => format!("\x1b[33m{}\x1b[0m", status),    // Yellow
        ProjectStatus::Cancelled => format!("\x1b[31m{}\x1b[0m", status), // Red
        ProjectStatus::Archived => format!("\x1b[90m{}\x1b[0m", status),  // Gray
    }
}

/// Parse a project ID from string, supporting both full UUIDs and short prefixes.
async fn resolve_project_id(id: &str, store: &dyn ProjectStore) -> Result<ProjectId> {
    if let Ok(project_id) = id.parse::<ProjectId>() {
        return Ok(project_id);
    }

    let matches: Vec<ProjectId> = store
        .list()
        .await?
        .into_iter()
        .filter(|p| p.short().starts_with(id) || p.to_string().starts_with(id))
        .collect();

    match matches.as_slice() {
        [] => Err(agency::Error::UnknownItem(format!(
            "no project matching '{}'",
            id
        ))),
        [single] => Ok(*single),
        _ => Err(agency::Error::UnknownItem(format!(
            "ambiguous project ID '{}' matches {} projects",
            id,
            matches.len()
        ))),
    }
}

fn run_report(config: &Config, project_id: &str, json: bool) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let (orchestrator, store) = orchestrator(config)?;
        let id = resolve_project_id(project_id, store.as_ref()).await?;
        orchestrator.load_project(&id).await?;
        orchestrator.get_project_report(&id).await
    })?;
    print_report(&report, json)
}

fn run_list(config: &Config) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let (_, store) = orchestrator(config)?;
        let ids = store.list().await?;
        if ids.is_empty() {
            println!("No projects in {}", store.dir().display());
            return Ok::<(), agency::Error>(());
        }
        for id in ids {
            let snapshot = store.load(&id).await?;
            println!(
                "{}  {:<30} {:<13} {}",
                id.short(),
                snapshot.project.name,
                snapshot.project.phase,
                format_status(snapshot.project.status)
            );
        }
        Ok(())
    })
}

fn run_cancel(config: &Config, project_id: &str) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let cancelled = rt.block_on(async {
        let (orchestrator, store) = orchestrator(config)?;
        let id = resolve_project_id(project_id, store.as_ref()).await?;
        orchestrator.load_project(&id).await?;
        orchestrator.cancel_project(&id).await
    })?;
    println!("Project cancelled ({} tasks cancelled)", cancelled);
    Ok(())
}
