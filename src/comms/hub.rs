//! Team registry plus an append-only message log.
//!
//! Every operation appends to the log and updates open-item status under a
//! short lock; nothing waits for another team to answer. Subscribers get a
//! copy of each message addressed to them through an unbounded channel, so
//! a slow or dropped receiver never blocks a sender.

use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::core::TeamId;
use crate::error::{Error, Result};
use crate::{alog_debug, alog_trace};

use super::message::{
    Collaboration, CollaborationId, ContextUpdate, Escalation, EscalationId, Handoff, ItemStatus,
    Message, MessageId, MessageKind, Priority, Recipient, TeamContext,
};

/// Topic keywords and the teams that answer them, in routing order.
const TOPIC_ROUTING: &[(&str, &[&str])] = &[
    ("infra", &["devops", "architecture"]),
    ("data", &["data_engineering", "data_analytics"]),
    ("quality", &["qa", "data_engineering"]),
    ("security", &["security", "devops"]),
    ("ml", &["data_science", "data_engineering"]),
    ("model", &["data_science"]),
    ("requirement", &["product_owner", "project_manager"]),
    ("architecture", &["architecture", "data_engineering", "devops"]),
    ("deploy", &["devops", "qa"]),
    ("performance", &["qa", "devops", "data_engineering"]),
];

#[derive(Default)]
struct HubState {
    teams: BTreeMap<TeamId, TeamContext>,
    log: Vec<Message>,
    collaborations: Vec<Collaboration>,
    escalations: Vec<Escalation>,
    handoffs: Vec<Handoff>,
    subscribers: HashMap<TeamId, Vec<Sender<Message>>>,
}

impl HubState {
    fn ensure_registered(&self, team: &TeamId) -> Result<()> {
        if self.teams.contains_key(team) {
            Ok(())
        } else {
            Err(Error::UnknownTeam(team.clone()))
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn append(
        &mut self,
        kind: MessageKind,
        from: &TeamId,
        to: Recipient,
        subject: String,
        body: String,
        priority: Priority,
        metadata: BTreeMap<String, String>,
    ) -> MessageId {
        let message = Message {
            id: MessageId::new(),
            seq: self.log.len() as u64,
            kind,
            from: from.clone(),
            to,
            subject,
            body,
            priority,
            timestamp: Utc::now(),
            metadata,
        };
        alog_trace!(
            "hub #{} {:?} {} -> {}: {}",
            message.seq,
            message.kind,
            message.from,
            message.to,
            message.subject
        );

        for (team, senders) in self.subscribers.iter_mut() {
            if team != &message.from && message.to.includes(team) {
                senders.retain(|tx| tx.send(message.clone()).is_ok());
            }
        }

        let id = message.id;
        self.log.push(message);
        id
    }
}

/// Messaging substrate between teams, independent of scheduling order.
pub struct CommunicationHub {
    state: Mutex<HubState>,
    escalation_team: TeamId,
}

impl Default for CommunicationHub {
    fn default() -> Self {
        Self::new(TeamId::from("architecture"))
    }
}

impl CommunicationHub {
    /// Create a hub. Escalations and unrouted help requests go to
    /// `escalation_team`.
    pub fn new(escalation_team: TeamId) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            escalation_team,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a team. Registering twice is a no-op.
    pub fn register_team(&self, team: impl Into<TeamId>) {
        let team = team.into();
        let mut state = self.lock();
        if !state.teams.contains_key(&team) {
            alog_debug!("hub: registered team {}", team);
            state.teams.insert(team.clone(), TeamContext::new(team));
        }
    }

    pub fn is_registered(&self, team: &TeamId) -> bool {
        self.lock().teams.contains_key(team)
    }

    pub fn teams(&self) -> Vec<TeamId> {
        self.lock().teams.keys().cloned().collect()
    }

    /// Send a direct message.
    ///
    /// # Errors
    /// Returns `UnknownTeam` if either side is not registered.
    pub fn send(
        &self,
        from: &TeamId,
        to: &TeamId,
        subject: &str,
        body: &str,
        priority: Priority,
    ) -> Result<MessageId> {
        let mut state = self.lock();
        state.ensure_registered(from)?;
        state.ensure_registered(to)?;
        Ok(state.append(
            MessageKind::Direct,
            from,
            Recipient::Team(to.clone()),
            subject.to_string(),
            body.to_string(),
            priority,
            BTreeMap::new(),
        ))
    }

    /// Send a notification to every registered team.
    pub fn broadcast(&self, from: &TeamId, subject: &str, body: &str) -> Result<MessageId> {
        let mut state = self.lock();
        state.ensure_registered(from)?;
        Ok(state.append(
            MessageKind::Notification,
            from,
            Recipient::Broadcast,
            subject.to_string(),
            body.to_string(),
            Priority::Low,
            BTreeMap::new(),
        ))
    }

    /// Teams that should answer a help request, in routing order.
    fn route(&self, state: &HubState, from: &TeamId, topic: &str, expertise: &[&str]) -> Vec<TeamId> {
        let topic = topic.to_lowercase();
        // Blank expertise would match every routing key.
        let expertise: Vec<String> = expertise
            .iter()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();

        let mut targets: Vec<TeamId> = Vec::new();
        for (key, teams) in TOPIC_ROUTING {
            let hit = topic.contains(key)
                || expertise
                    .iter()
                    .any(|e| e.contains(key) || key.contains(e.as_str()));
            if !hit {
                continue;
            }
            for team in teams.iter().map(|t| TeamId::from(*t)) {
                if &team != from && state.teams.contains_key(&team) && !targets.contains(&team) {
                    targets.push(team);
                }
            }
        }
        // Expertise naming a registered team routes to it directly.
        for e in &expertise {
            let team = TeamId::from(e.as_str());
            if &team != from && state.teams.contains_key(&team) && !targets.contains(&team) {
                targets.push(team);
            }
        }
        targets
    }

    /// Ask other teams for help. Routed by topic and expertise; falls back
    /// to the escalation team.
    ///
    /// # Errors
    /// Returns `UnknownTeam` if the requester is unregistered or no team
    /// can be reached.
    pub fn request_help(
        &self,
        from: &TeamId,
        topic: &str,
        description: &str,
        required_expertise: &[&str],
        priority: Priority,
    ) -> Result<CollaborationId> {
        let mut state = self.lock();
        state.ensure_registered(from)?;

        let mut targets = self.route(&state, from, topic, required_expertise);
        if targets.is_empty() {
            state.ensure_registered(&self.escalation_team)?;
            targets.push(self.escalation_team.clone());
        }

        let collaboration = Collaboration {
            id: CollaborationId::new(),
            requester: from.clone(),
            targets: targets.clone(),
            topic: topic.to_string(),
            description: description.to_string(),
            required_expertise: required_expertise.iter().map(|e| e.to_string()).collect(),
            priority,
            responses: BTreeMap::new(),
            status: ItemStatus::Open,
            created_at: Utc::now(),
        };
        let id = collaboration.id;

        for target in targets {
            let metadata = BTreeMap::from([("collaboration".to_string(), id.to_string())]);
            state.append(
                MessageKind::HelpRequest,
                from,
                Recipient::Team(target),
                format!("Help requested: {}", topic),
                description.to_string(),
                priority,
                metadata,
            );
        }
        alog_debug!(
            "hub: {} requested help on '{}' from {:?}",
            from,
            topic,
            collaboration.targets
        );
        state.collaborations.push(collaboration);
        Ok(id)
    }

    /// Answer a help request. The collaboration becomes Acknowledged, and
    /// Resolved once every target has answered.
    pub fn respond_to_collaboration(
        &self,
        id: &CollaborationId,
        team: &TeamId,
        response: &str,
    ) -> Result<ItemStatus> {
        let mut state = self.lock();
        state.ensure_registered(team)?;

        let collaboration = state
            .collaborations
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| Error::UnknownItem(id.to_string()))?;
        collaboration
            .responses
            .insert(team.clone(), response.to_string());
        collaboration.status = if collaboration
            .targets
            .iter()
            .all(|t| collaboration.responses.contains_key(t))
        {
            ItemStatus::Resolved
        } else {
            ItemStatus::Acknowledged
        };
        let status = collaboration.status;
        let requester = collaboration.requester.clone();
        let subject = format!("Re: {}", collaboration.topic);

        let metadata = BTreeMap::from([("collaboration".to_string(), id.to_string())]);
        state.append(
            MessageKind::CollaborationResponse,
            team,
            Recipient::Team(requester),
            subject,
            response.to_string(),
            Priority::Normal,
            metadata,
        );
        Ok(status)
    }

    /// Transfer work to another team, carrying the sender's artifacts and
    /// decisions along with the given context.
    pub fn handoff(
        &self,
        from: &TeamId,
        to: &TeamId,
        description: &str,
        deliverables: &[String],
        context: BTreeMap<String, String>,
    ) -> Result<MessageId> {
        let mut state = self.lock();
        state.ensure_registered(from)?;
        state.ensure_registered(to)?;

        let mut metadata = context.clone();
        if let Some(ctx) = state.teams.get(from) {
            if !ctx.artifacts.is_empty() {
                metadata.insert("artifacts".to_string(), ctx.artifacts.join(", "));
            }
            if !ctx.decisions.is_empty() {
                metadata.insert("decisions".to_string(), ctx.decisions.join("; "));
            }
        }
        metadata.insert("deliverables".to_string(), deliverables.join(", "));

        let id = state.append(
            MessageKind::Handoff,
            from,
            Recipient::Team(to.clone()),
            format!("Handoff: {}", description),
            description.to_string(),
            Priority::High,
            metadata,
        );
        state.handoffs.push(Handoff {
            id,
            from: from.clone(),
            to: to.clone(),
            description: description.to_string(),
            deliverables: deliverables.to_vec(),
            context,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    /// Raise a decision to the escalation team, or to everyone if that team
    /// is not registered.
    pub fn escalate(
        &self,
        from: &TeamId,
        topic: &str,
        options: &[String],
        context: BTreeMap<String, String>,
    ) -> Result<EscalationId> {
        let mut state = self.lock();
        state.ensure_registered(from)?;

        let to = if state.teams.contains_key(&self.escalation_team) {
            Recipient::Team(self.escalation_team.clone())
        } else {
            Recipient::Broadcast
        };
        let escalation = Escalation {
            id: EscalationId::new(),
            from: from.clone(),
            to: to.clone(),
            topic: topic.to_string(),
            options: options.to_vec(),
            context: context.clone(),
            priority: Priority::High,
            status: ItemStatus::Open,
            decision: None,
            decided_by: None,
            created_at: Utc::now(),
            resolved_at: None,
        };
        let id = escalation.id;

        let mut metadata = context;
        metadata.insert("escalation".to_string(), id.to_string());
        let body = if options.is_empty() {
            topic.to_string()
        } else {
            format!("{}\noptions: {}", topic, options.join(" | "))
        };
        state.append(
            MessageKind::Escalation,
            from,
            to,
            format!("Escalation: {}", topic),
            body,
            Priority::High,
            metadata,
        );
        alog_debug!("hub: {} escalated '{}'", from, topic);
        state.escalations.push(escalation);
        Ok(id)
    }

    /// Mark an escalation as seen by the deciding team.
    pub fn acknowledge_escalation(&self, id: &EscalationId) -> Result<()> {
        let mut state = self.lock();
        let escalation = state
            .escalations
            .iter_mut()
            .find(|e| &e.id == id)
            .ok_or_else(|| Error::UnknownItem(id.to_string()))?;
        if escalation.status == ItemStatus::Open {
            escalation.status = ItemStatus::Acknowledged;
        }
        Ok(())
    }

    /// Record the decision for an escalation and notify the raising team.
    pub fn resolve_escalation(
        &self,
        id: &EscalationId,
        by: &TeamId,
        decision: &str,
    ) -> Result<()> {
        let mut state = self.lock();
        state.ensure_registered(by)?;
        let escalation = state
            .escalations
            .iter_mut()
            .find(|e| &e.id == id)
            .ok_or_else(|| Error::UnknownItem(id.to_string()))?;
        escalation.status = ItemStatus::Resolved;
        escalation.decision = Some(decision.to_string());
        escalation.decided_by = Some(by.clone());
        escalation.resolved_at = Some(Utc::now());
        let requester = escalation.from.clone();
        let subject = format!("Decision: {}", escalation.topic);

        let metadata = BTreeMap::from([("escalation".to_string(), id.to_string())]);
        state.append(
            MessageKind::EscalationResolved,
            by,
            Recipient::Team(requester),
            subject,
            decision.to_string(),
            Priority::High,
            metadata,
        );
        Ok(())
    }

    /// Unresolved help requests addressed to `team`, highest priority first.
    pub fn get_open_collaborations(&self, team: &TeamId) -> Vec<Collaboration> {
        let state = self.lock();
        let mut open: Vec<Collaboration> = state
            .collaborations
            .iter()
            .filter(|c| c.status != ItemStatus::Resolved && c.targets.contains(team))
            .cloned()
            .collect();
        // Stable sort keeps creation order within a priority.
        open.sort_by(|a, b| b.priority.cmp(&a.priority));
        open
    }

    pub fn collaboration(&self, id: &CollaborationId) -> Option<Collaboration> {
        self.lock()
            .collaborations
            .iter()
            .find(|c| &c.id == id)
            .cloned()
    }

    /// Every message `team` sent or received, in log order.
    pub fn get_history_for_team(&self, team: &TeamId) -> Vec<Message> {
        self.lock()
            .log
            .iter()
            .filter(|m| m.involves(team))
            .cloned()
            .collect()
    }

    /// Messages addressed to `team`, highest priority first, then log order.
    pub fn inbox(&self, team: &TeamId) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .lock()
            .log
            .iter()
            .filter(|m| &m.from != team && m.to.includes(team))
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        messages
    }

    /// Escalations that are not yet resolved, in creation order.
    pub fn open_escalations(&self) -> Vec<Escalation> {
        self.lock()
            .escalations
            .iter()
            .filter(|e| e.status != ItemStatus::Resolved)
            .cloned()
            .collect()
    }

    pub fn escalation(&self, id: &EscalationId) -> Option<Escalation> {
        self.lock().escalations.iter().find(|e| &e.id == id).cloned()
    }

    pub fn handoffs_to(&self, team: &TeamId) -> Vec<Handoff> {
        self.lock()
            .handoffs
            .iter()
            .filter(|h| &h.to == team)
            .cloned()
            .collect()
    }

    /// Number of messages in the log.
    pub fn log_len(&self) -> usize {
        self.lock().log.len()
    }

    /// Receive a copy of every future message addressed to `team`.
    pub fn subscribe(&self, team: &TeamId) -> Result<Receiver<Message>> {
        let mut state = self.lock();
        state.ensure_registered(team)?;
        let (tx, rx) = unbounded();
        state.subscribers.entry(team.clone()).or_default().push(tx);
        Ok(rx)
    }

    pub fn update_team_context(&self, team: &TeamId, update: ContextUpdate) -> Result<()> {
        let mut state = self.lock();
        let ctx = state
            .teams
            .get_mut(team)
            .ok_or_else(|| Error::UnknownTeam(team.clone()))?;
        if let Some(task) = update.current_task {
            ctx.current_task = task;
        }
        if let Some(status) = update.status {
            ctx.status = status;
        }
        ctx.blockers.extend(update.blockers);
        for artifact in update.artifacts {
            if !ctx.artifacts.contains(&artifact) {
                ctx.artifacts.push(artifact);
            }
        }
        ctx.decisions.extend(update.decisions);
        ctx.updated_at = Utc::now();
        Ok(())
    }

    pub fn team_context(&self, team: &TeamId) -> Option<TeamContext> {
        self.lock().teams.get(team).cloned()
    }
}
