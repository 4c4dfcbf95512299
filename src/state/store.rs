//! Project snapshots and where they are kept.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::core::{ExecutionLevel, Project, ProjectId, Task};
use crate::error::{Error, Result};
use crate::orchestration::RequirementsDescriptor;
use crate::util::{atomic_write, blocking};
use crate::validation::ValidationRecord;
use crate::alog_debug;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Committed state of one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub version: u32,
    pub project: Project,
    pub requirements: Option<RequirementsDescriptor>,
    /// Tasks in insertion order.
    pub tasks: Vec<Task>,
    pub levels: Vec<ExecutionLevel>,
    pub validation: Vec<ValidationRecord>,
    pub saved_at: DateTime<Utc>,
}

impl ProjectSnapshot {
    pub fn new(project: Project) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            project,
            requirements: None,
            tasks: Vec::new(),
            levels: Vec::new(),
            validation: Vec::new(),
            saved_at: Utc::now(),
        }
    }
}

/// Storage for project snapshots.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn save(&self, snapshot: &ProjectSnapshot) -> Result<()>;

    /// # Errors
    /// Returns `ProjectNotFound` if no snapshot exists for `id`.
    async fn load(&self, id: &ProjectId) -> Result<ProjectSnapshot>;

    async fn list(&self) -> Result<Vec<ProjectId>>;
}

/// One pretty-printed JSON file per project.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &ProjectId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn load_sync(path: &Path, id: &ProjectId) -> Result<ProjectSnapshot> {
        if !path.exists() {
            return Err(Error::ProjectNotFound(*id));
        }
        let contents = fs::read_to_string(path)?;
        let snapshot: ProjectSnapshot = serde_json::from_str(&contents)?;
        alog_debug!(
            "Snapshot loaded: {} ({} tasks)",
            path.display(),
            snapshot.tasks.len()
        );
        Ok(snapshot)
    }
}

#[async_trait]
impl ProjectStore for JsonFileStore {
    async fn save(&self, snapshot: &ProjectSnapshot) -> Result<()> {
        let contents = serde_json::to_string_pretty(snapshot)?;
        let path = self.path_for(&snapshot.project.id);
        blocking(move || {
            atomic_write(&path, &contents)?;
            alog_debug!("Snapshot saved: {}", path.display());
            Ok(())
        })
        .await
    }

    async fn load(&self, id: &ProjectId) -> Result<ProjectSnapshot> {
        let path = self.path_for(id);
        let id = *id;
        blocking(move || Self::load_sync(&path, &id)).await
    }

    async fn list(&self) -> Result<Vec<ProjectId>> {
        let dir = self.dir.clone();
        blocking(move || {
            if !dir.exists() {
                return Ok(Vec::new());
            }
            let mut ids = Vec::new();
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                if let Some(id) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse::<ProjectId>().ok())
                {
                    ids.push(id);
                }
            }
            ids.sort_by_key(|id| id.to_string());
            Ok(ids)
        })
        .await
    }
}

/// Snapshots kept in memory, for tests and one-off runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: Mutex<BTreeMap<String, ProjectSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn save(&self, snapshot: &ProjectSnapshot) -> Result<()> {
        let mut snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        snapshots.insert(snapshot.project.id.to_string(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, id: &ProjectId) -> Result<ProjectSnapshot> {
        let snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        snapshots
            .get(&id.to_string())
            .cloned()
            .ok_or(Error::ProjectNotFound(*id))
    }

    async fn list(&self) -> Result<Vec<ProjectId>> {
        let snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        Ok(snapshots.values().map(|s| s.project.id).collect())
    }
}
