//! Message and open-item types held by the communication hub.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::core::TeamId;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Return first 8 characters of the UUID for display.
            pub fn short(&self) -> String {
                self.0.to_string()[..8].to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(
    /// Identifier of a logged message.
    MessageId
);
uuid_id!(
    /// Identifier of a help request.
    CollaborationId
);
uuid_id!(
    /// Identifier of an escalated decision.
    EscalationId
);

/// Message priority. Affects retrieval order only, never delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// Status of a collaboration or escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Open,
    Acknowledged,
    Resolved,
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemStatus::Open => write!(f, "open"),
            ItemStatus::Acknowledged => write!(f, "acknowledged"),
            ItemStatus::Resolved => write!(f, "resolved"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Direct,
    HelpRequest,
    CollaborationResponse,
    Handoff,
    Escalation,
    EscalationResolved,
    Notification,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "team")]
pub enum Recipient {
    Team(TeamId),
    Broadcast,
}

impl Recipient {
    /// Whether a message to this recipient reaches `team`.
    pub fn includes(&self, team: &TeamId) -> bool {
        match self {
            Recipient::Team(t) => t == team,
            Recipient::Broadcast => true,
        }
    }
}

impl std::fmt::Display for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Recipient::Team(t) => write!(f, "{}", t),
            Recipient::Broadcast => write!(f, "*"),
        }
    }
}

/// Entry of the append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// Position in the log; total delivery order.
    pub seq: u64,
    pub kind: MessageKind,
    pub from: TeamId,
    pub to: Recipient,
    pub subject: String,
    pub body: String,
    pub priority: Priority,
    pub timestamp: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
}

impl Message {
    /// Whether `team` sent or received this message.
    pub fn involves(&self, team: &TeamId) -> bool {
        &self.from == team || self.to.includes(team)
    }
}

/// A help request and the answers it received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collaboration {
    pub id: CollaborationId,
    pub requester: TeamId,
    pub targets: Vec<TeamId>,
    pub topic: String,
    pub description: String,
    pub required_expertise: Vec<String>,
    pub priority: Priority,
    pub responses: BTreeMap<TeamId, String>,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
}

/// Transfer of work from one team to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handoff {
    pub id: MessageId,
    pub from: TeamId,
    pub to: TeamId,
    pub description: String,
    pub deliverables: Vec<String>,
    pub context: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// A decision raised beyond the requesting team's authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub id: EscalationId,
    pub from: TeamId,
    pub to: Recipient,
    pub topic: String,
    pub options: Vec<String>,
    pub context: BTreeMap<String, String>,
    pub priority: Priority,
    pub status: ItemStatus,
    pub decision: Option<String>,
    pub decided_by: Option<TeamId>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Shared working context of one team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamContext {
    pub team: TeamId,
    pub current_task: Option<String>,
    pub status: String,
    pub blockers: Vec<String>,
    pub artifacts: Vec<String>,
    pub decisions: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl TeamContext {
    pub fn new(team: TeamId) -> Self {
        Self {
            team,
            current_task: None,
            status: "idle".to_string(),
            blockers: Vec::new(),
            artifacts: Vec::new(),
            decisions: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Partial update of a team context. `None` fields are left alone; list
/// fields are appended.
#[derive(Debug, Clone, Default)]
pub struct ContextUpdate {
    pub current_task: Option<Option<String>>,
    pub status: Option<String>,
    pub blockers: Vec<String>,
    pub artifacts: Vec<String>,
    pub decisions: Vec<String>,
}

impl ContextUpdate {
    pub fn working_on(task: &str) -> Self {
        Self {
            current_task: Some(Some(task.to_string())),
            status: Some("working".to_string()),
            ..Default::default()
        }
    }

    pub fn idle() -> Self {
        Self {
            current_task: Some(None),
            status: Some("idle".to_string()),
            ..Default::default()
        }
    }

    pub fn with_artifacts(mut self, artifacts: &[String]) -> Self {
        self.artifacts.extend(artifacts.iter().cloned());
        self
    }

    pub fn with_blocker(mut self, blocker: &str) -> Self {
        self.blockers.push(blocker.to_string());
        self
    }
}
