//! Inter-team communication: direct messages, help requests, handoffs and
//! escalations over a single append-only log.

mod hub;
mod message;

pub use hub::CommunicationHub;
pub use message::{
    Collaboration, CollaborationId, ContextUpdate, Escalation, EscalationId, Handoff, ItemStatus,
    Message, MessageId, MessageKind, Priority, Recipient, TeamContext,
};
