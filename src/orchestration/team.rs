//! Team capability and the registry that looks teams up by id.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::{Deliverable, Task, TeamId};
use crate::error::Result;

/// A unit that turns a task into a deliverable.
///
/// How the deliverable is produced is the team's business. A returned
/// error is treated like a rejected submission and may be retried.
#[async_trait]
pub trait Team: Send + Sync {
    fn id(&self) -> &TeamId;

    async fn execute(&self, task: &Task) -> Result<Deliverable>;
}

/// Teams available to the orchestrator, keyed by id.
#[derive(Clone, Default)]
pub struct TeamRegistry {
    teams: BTreeMap<TeamId, Arc<dyn Team>>,
}

impl TeamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a team, replacing any team with the same id.
    pub fn register(&mut self, team: Arc<dyn Team>) {
        self.teams.insert(team.id().clone(), team);
    }

    pub fn with(mut self, team: Arc<dyn Team>) -> Self {
        self.register(team);
        self
    }

    pub fn get(&self, id: &TeamId) -> Option<Arc<dyn Team>> {
        self.teams.get(id).cloned()
    }

    pub fn contains(&self, id: &TeamId) -> bool {
        self.teams.contains_key(id)
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<TeamId> {
        self.teams.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.teams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }
}

impl std::fmt::Debug for TeamRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeamRegistry")
            .field("teams", &self.ids())
            .finish()
    }
}
