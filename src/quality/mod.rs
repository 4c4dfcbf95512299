//! Quality gate for deliverables.
//!
//! Holds the deterministic scorer and the knowledge store that supplies
//! its reference material.

mod knowledge;
mod scorer;

pub use knowledge::{KnowledgeStore, ReferenceMaterial, StaticKnowledgeStore};
pub use scorer::{
    expected_sections, IssueCategory, QualityIssue, QualityScore, QualityScorer, Severity,
    CONTRADICTION_PENALTY, GROUNDING_PENALTY,
};
