//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Scripted teams with per-task responses
//! - Deliverables that pass or fail review
//! - Predefined task sets
//! - A project store whose writes can be switched off

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use agency::config::{Config, SchedulerConfig, ValidationConfig};
use agency::core::{Deliverable, ProjectId, Task, TaskId, TaskKind, TeamId};
use agency::orchestration::{ProjectOrchestrator, Team, TeamRegistry};
use agency::quality::{expected_sections, StaticKnowledgeStore};
use agency::state::{MemoryStore, ProjectSnapshot, ProjectStore};
use agency::{Error, Result};

/// What a scripted team does for one call.
#[derive(Debug, Clone)]
pub enum Response {
    /// Return a deliverable that passes both reviews.
    Complete,
    /// Return the given content as the deliverable.
    Content(String),
    /// Return an execution error.
    Fail(String),
    /// Never answer within any reasonable timeout.
    Hang,
}

/// One recorded call to a scripted team.
#[derive(Debug, Clone)]
pub struct Call {
    pub task: TaskId,
    pub name: String,
    pub attempt: u32,
    pub feedback: Vec<String>,
}

/// Tracks how many team calls overlap, across any number of teams.
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// A team that answers from a script keyed by task name.
///
/// Tasks without a script entry, or whose entries are used up, get the
/// default response.
pub struct ScriptedTeam {
    id: TeamId,
    default: Response,
    scripts: Mutex<HashMap<String, VecDeque<Response>>>,
    calls: Mutex<Vec<Call>>,
    delay: Duration,
    probe: Option<Arc<ConcurrencyProbe>>,
}

impl ScriptedTeam {
    pub fn new(id: &str) -> Self {
        Self {
            id: TeamId::from(id),
            default: Response::Complete,
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            probe: None,
        }
    }

    pub fn with_default(mut self, response: Response) -> Self {
        self.default = response;
        self
    }

    /// Queue responses for the task with the given name.
    pub fn with_script(self, task: &str, responses: Vec<Response>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(task.to_string(), responses.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_probe(mut self, probe: Arc<ConcurrencyProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, name: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.name == name).collect()
    }

    fn next_response(&self, task: &Task) -> Response {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&task.name)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| self.default.clone())
    }
}

#[async_trait]
impl Team for ScriptedTeam {
    fn id(&self) -> &TeamId {
        &self.id
    }

    async fn execute(&self, task: &Task) -> Result<Deliverable> {
        self.calls.lock().unwrap().push(Call {
            task: task.id,
            name: task.name.clone(),
            attempt: task.attempts,
            feedback: task.feedback.clone(),
        });

        if let Some(probe) = &self.probe {
            probe.enter();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(probe) = &self.probe {
            probe.leave();
        }

        match self.next_response(task) {
            Response::Complete => Ok(complete_deliverable(task)),
            Response::Content(content) => Ok(Deliverable::text(content)),
            Response::Fail(message) => Err(Error::TeamExecution {
                team: self.id.clone(),
                message,
            }),
            Response::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(Error::Timeout(Duration::from_secs(3600)))
            }
        }
    }
}

/// In-memory store that refuses every save while failing.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProjectStore for FlakyStore {
    async fn save(&self, snapshot: &ProjectSnapshot) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::other("disk full")));
        }
        self.inner.save(snapshot).await
    }

    async fn load(&self, id: &ProjectId) -> Result<ProjectSnapshot> {
        self.inner.load(id).await
    }

    async fn list(&self) -> Result<Vec<ProjectId>> {
        self.inner.list().await
    }
}

/// A deliverable that covers the expected sections, artifacts, tests and
/// requirements of `task`, written without any technical terms.
pub fn complete_deliverable(task: &Task) -> Deliverable {
    let mut content = String::new();
    for section in expected_sections(task.kind) {
        content.push_str(&format!("## {}\n", section));
        content.push_str("the work for this section is complete and reviewed.\n");
    }
    if !task.requirements.is_empty() {
        content.push_str("Requirements addressed:\n");
        for requirement in &task.requirements {
            content.push_str(&format!("- {}\n", requirement.to_lowercase()));
        }
    }
    if content.is_empty() {
        content.push_str("the work is complete and reviewed.\n");
    }

    let artifacts: Vec<&str> = task.expected_artifacts.iter().map(String::as_str).collect();
    let mut deliverable = Deliverable::text(content).with_artifacts(&artifacts);
    if task.kind == TaskKind::Testing {
        deliverable = deliverable.with_tests(12, 0);
    }
    deliverable
}

/// Content with a confidently stated term no reference material knows.
/// Scores below the default threshold for any task kind.
pub const UNGROUNDED: &str = "The platform always stores events in QuantumGraphDB.";

/// Config with fast timeouts and the given retry bound.
pub fn test_config(max_retries: u32) -> Config {
    let mut config = Config::default();
    config.validation = ValidationConfig::with_max_retries(max_retries);
    config.orchestrator.team_timeout_secs = 1;
    config
}

pub fn with_per_team_limit(mut config: Config, max: usize) -> Config {
    config.scheduler = SchedulerConfig::with_max_concurrent(max);
    config
}

/// Build an orchestrator over the given teams with the built-in knowledge.
pub fn orchestrator(config: &Config, teams: Vec<Arc<ScriptedTeam>>) -> ProjectOrchestrator {
    let mut registry = TeamRegistry::new();
    for team in teams {
        registry.register(team);
    }
    ProjectOrchestrator::new(config, registry, Arc::new(StaticKnowledgeStore::builtin()))
}

/// Every team the catalog assigns work to, completing everything.
pub fn catalog_teams() -> Vec<Arc<ScriptedTeam>> {
    agency::orchestration::catalog_teams()
        .into_iter()
        .map(|id| Arc::new(ScriptedTeam::new(id.as_str())))
        .collect()
}

/// A -> B -> C, all general tasks on one team.
pub fn chain(team: &str) -> Vec<Task> {
    let a = Task::new("A", team, TaskKind::General);
    let b = Task::new("B", team, TaskKind::General).depends_on(&[a.id]);
    let c = Task::new("C", team, TaskKind::General).depends_on(&[b.id]);
    vec![a, b, c]
}

/// Two independent branches: `left` -> `left-next` and `right` -> `right-next`.
pub fn two_branches(left_team: &str, right_team: &str) -> Vec<Task> {
    let left = Task::new("left", left_team, TaskKind::General);
    let left_next = Task::new("left-next", left_team, TaskKind::General).depends_on(&[left.id]);
    let right = Task::new("right", right_team, TaskKind::General);
    let right_next =
        Task::new("right-next", right_team, TaskKind::General).depends_on(&[right.id]);
    vec![left, left_next, right, right_next]
}

pub fn id_of(tasks: &[Task], name: &str) -> TaskId {
    tasks
        .iter()
        .find(|t| t.name == name)
        .map(|t| t.id)
        .unwrap_or_else(|| panic!("no task named {name}"))
}
