//! Deterministic structural and requirement-coverage checks.

use serde::{Deserialize, Serialize};

use crate::core::{Deliverable, Task, TaskKind};
use crate::quality::{IssueCategory, QualityIssue, Severity};

/// Words ignored when extracting requirement keywords.
const FILLER: &[&str] = &[
    "the", "and", "for", "with", "from", "into", "that", "this", "must", "should", "have",
    "each", "every", "will", "shall", "able", "need", "needs", "using", "within", "over",
    "under", "than", "more", "less", "about", "they", "their", "there", "when", "where",
];

/// Result of the business review's coverage check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageVerdict {
    /// Fraction of requirements covered, 1.0 when there are none.
    pub ratio: f64,
    pub covered: Vec<String>,
    pub missing: Vec<String>,
    pub accepted: bool,
}

/// Structural checks run during technical review.
///
/// Every artifact the task declares must be present in the deliverable.
/// `Testing` tasks must attach a passing test report, and any attached
/// report must not contain failures.
pub fn technical_checks(task: &Task, deliverable: &Deliverable) -> Vec<QualityIssue> {
    let mut issues = Vec::new();

    for artifact in &task.expected_artifacts {
        if !deliverable.has_artifact(artifact) {
            issues.push(QualityIssue::new(
                IssueCategory::MissingArtifact,
                Severity::High,
                format!("declared artifact '{}' is missing", artifact),
            ));
        }
    }

    match deliverable.test_results {
        Some(report) if report.failed > 0 => issues.push(QualityIssue::new(
            IssueCategory::FailingTests,
            Severity::High,
            format!("{} of {} tests failed", report.failed, report.passed + report.failed),
        )),
        Some(report) if task.kind == TaskKind::Testing && report.passed == 0 => {
            issues.push(QualityIssue::new(
                IssueCategory::FailingTests,
                Severity::High,
                "test report contains no passing tests",
            ))
        }
        None if task.kind == TaskKind::Testing => issues.push(QualityIssue::new(
            IssueCategory::FailingTests,
            Severity::High,
            "testing task delivered no test results",
        )),
        _ => {}
    }

    issues
}

fn keywords(requirement: &str) -> Vec<String> {
    requirement
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .map(|w| w.trim_matches('-').to_lowercase())
        .filter(|w| w.len() >= 4 && !FILLER.contains(&w.as_str()))
        .collect()
}

/// Whether the text references a requirement.
///
/// Covered when the requirement appears verbatim or at least half of its
/// keywords (rounded up) appear in the text.
pub fn covers(text_lower: &str, requirement: &str) -> bool {
    let requirement_lower = requirement.trim().to_lowercase();
    if requirement_lower.is_empty() || text_lower.contains(&requirement_lower) {
        return true;
    }
    let words = keywords(requirement);
    if words.is_empty() {
        return false;
    }
    let hits = words.iter().filter(|w| text_lower.contains(w.as_str())).count();
    hits * 2 >= words.len()
}

/// Business review: how many requirements the deliverable covers.
pub fn requirement_coverage(
    requirements: &[String],
    text: &str,
    min_coverage: f64,
) -> CoverageVerdict {
    if requirements.is_empty() {
        return CoverageVerdict {
            ratio: 1.0,
            covered: Vec::new(),
            missing: Vec::new(),
            accepted: true,
        };
    }

    let lower = text.to_lowercase();
    let (covered, missing): (Vec<String>, Vec<String>) = requirements
        .iter()
        .cloned()
        .partition(|r| covers(&lower, r));
    let ratio = covered.len() as f64 / requirements.len() as f64;

    CoverageVerdict {
        ratio,
        accepted: ratio >= min_coverage,
        covered,
        missing,
    }
}
