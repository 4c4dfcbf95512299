//! Team backed by an external command.
//!
//! The command runs through `sh -c` with a JSON task brief on stdin. It
//! may print a JSON deliverable or plain text; plain text becomes the
//! deliverable content.

use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::core::{Deliverable, Task, TaskKind, TeamId};
use crate::error::{Error, Result};
use crate::{alog_debug, alog_trace};

use super::team::Team;

/// Default timeout for one team call (10 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// What the command receives on stdin.
#[derive(Debug, Serialize)]
struct TaskBrief<'a> {
    id: String,
    name: &'a str,
    description: &'a str,
    team: &'a str,
    kind: TaskKind,
    expected_artifacts: &'a [String],
    requirements: &'a [String],
    /// Review feedback from earlier rejected attempts.
    feedback: &'a [String],
    attempt: u32,
}

#[derive(Debug, Clone)]
pub struct CommandTeam {
    id: TeamId,
    command: String,
    timeout: Duration,
}

impl CommandTeam {
    pub fn new(id: impl Into<TeamId>, command: &str) -> Self {
        Self {
            id: id.into(),
            command: command.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// JSON brief for `task`.
    pub fn brief(task: &Task) -> Result<String> {
        let brief = TaskBrief {
            id: task.id.to_string(),
            name: &task.name,
            description: &task.description,
            team: task.team.as_str(),
            kind: task.kind,
            expected_artifacts: &task.expected_artifacts,
            requirements: &task.requirements,
            feedback: &task.feedback,
            attempt: task.attempts,
        };
        Ok(serde_json::to_string(&brief)?)
    }

    /// Turn command output into a deliverable.
    ///
    /// A JSON object with non-empty `content` is taken as a deliverable;
    /// anything else is plain text.
    pub fn parse_output(stdout: &str) -> Option<Deliverable> {
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('{') {
            if let Ok(deliverable) = serde_json::from_str::<Deliverable>(trimmed) {
                if !deliverable.content.trim().is_empty() {
                    return Some(deliverable);
                }
            }
        }
        Some(Deliverable::text(trimmed))
    }

    fn failure(&self, message: impl Into<String>) -> Error {
        Error::TeamExecution {
            team: self.id.clone(),
            message: message.into(),
        }
    }

    async fn run(&self, brief: String) -> Result<std::process::Output> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // The brief is written while output is drained, so a command that
        // echoes a large brief cannot fill both pipes.
        let stdin = child.stdin.take();
        let id = &self.id;
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // Commands that ignore stdin close it early.
                if let Err(e) = stdin.write_all(brief.as_bytes()).await {
                    alog_trace!("{}: brief not consumed: {}", id, e);
                }
            }
        };
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        Ok(output?)
    }
}

#[async_trait]
impl Team for CommandTeam {
    fn id(&self) -> &TeamId {
        &self.id
    }

    async fn execute(&self, task: &Task) -> Result<Deliverable> {
        let brief = Self::brief(task)?;
        alog_debug!(
            "{}: running '{}' for task {} (attempt {})",
            self.id,
            self.command,
            task.id.short(),
            task.attempts
        );

        let output = tokio::time::timeout(self.timeout, self.run(brief))
            .await
            .map_err(|_| self.failure(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| self.failure(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let message = if stderr.trim().is_empty() {
                format!("exited with code {}", output.status.code().unwrap_or(-1))
            } else {
                stderr.trim().to_string()
            };
            return Err(self.failure(message));
        }

        Self::parse_output(&stdout).ok_or_else(|| self.failure("produced no output"))
    }
}
