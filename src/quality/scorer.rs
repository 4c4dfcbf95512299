//! Deterministic quality scoring of textual deliverables.
//!
//! Three independent checks each yield a sub-score in [0, 1]:
//!
//! - **term grounding**: technical terms must appear in the reference
//!   material or in a sibling output; absolute phrasing doubles the penalty
//! - **consistency**: the deliverable must not pick a different option than
//!   a sibling for the same decision (e.g. batch vs streaming)
//! - **completeness**: headings must cover the sections expected for the
//!   task kind
//!
//! The overall score is their weighted average, rounded to three decimals.
//! Scoring reads no clock, network or global state.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::config::ScorerWeights;
use crate::core::TaskKind;

use super::knowledge::{mentions, ReferenceMaterial};

/// Penalty for one ungrounded term stated without absolute phrasing.
pub const GROUNDING_PENALTY: f64 = 0.35;
/// Penalty for one contradicted decision.
pub const CONTRADICTION_PENALTY: f64 = 0.5;

/// Absolute or overconfident phrasing.
static CONFIDENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(always|never|guaranteed?|certainly|definitely|impossible|absolutely|without (a|any) doubt)\b|100\s?%").unwrap()
});

/// Word tokens, allowing inner dots, dashes and digits (e.g. `Node.js`).
static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z][A-Za-z0-9]*(?:[.\-][A-Za-z0-9]+)*").unwrap());

/// CamelCase identifiers such as `ClickHouse` or `PostgreSQL`.
static CAMEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][a-z0-9]+(?:[A-Z][a-z0-9]*)+$").unwrap());

/// Acronyms of three or more capitals, e.g. `HDFS`.
static ACRONYM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Z]{3,}[0-9]*$").unwrap());

/// Capitalized words that are ordinary English rather than technology names.
const STOPWORDS: &[&str] = &[
    "the", "this", "that", "these", "those", "we", "our", "it", "its", "all", "each", "every",
    "for", "and", "but", "with", "use", "using", "when", "then", "if", "in", "on", "at", "by",
    "to", "of", "an", "as", "is", "are", "be", "will", "should", "must", "can", "not", "no",
    "yes", "note", "phase", "step", "task", "team", "project", "client", "data", "see",
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december", "monday", "tuesday", "wednesday", "thursday",
    "friday", "saturday", "sunday", "todo", "none", "true", "false", "ok",
];

/// Mutually exclusive options for one decision. Each option lists its aliases.
const DECISIONS: &[(&str, &[&[&str]])] = &[
    (
        "processing mode",
        &[&["batch"], &["streaming", "real-time", "realtime"]],
    ),
    (
        "architecture style",
        &[&["monolith", "monolithic"], &["microservices", "microservice"]],
    ),
    ("relational database", &[&["mysql"], &["postgresql", "postgres"]]),
    (
        "cloud provider",
        &[&["aws"], &["gcp", "google cloud"], &["azure"]],
    ),
];

/// Category of a flagged issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueCategory {
    TermGrounding,
    Consistency,
    Completeness,
    MissingArtifact,
    FailingTests,
    RequirementCoverage,
    TeamExecution,
}

impl std::fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IssueCategory::TermGrounding => "term-grounding",
            IssueCategory::Consistency => "consistency",
            IssueCategory::Completeness => "completeness",
            IssueCategory::MissingArtifact => "missing-artifact",
            IssueCategory::FailingTests => "failing-tests",
            IssueCategory::RequirementCoverage => "requirement-coverage",
            IssueCategory::TeamExecution => "team-execution",
        };
        f.write_str(s)
    }
}

/// Issue severity, ordered from least to most serious.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub category: IssueCategory,
    pub severity: Severity,
    pub explanation: String,
}

impl QualityIssue {
    pub fn new(category: IssueCategory, severity: Severity, explanation: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            explanation: explanation.into(),
        }
    }
}

impl std::fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}/{}] {}", self.category, self.severity, self.explanation)
    }
}

/// Result of scoring one deliverable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    /// Weighted average of the sub-scores.
    pub overall: f64,
    pub grounding: f64,
    pub consistency: f64,
    pub completeness: f64,
    pub issues: Vec<QualityIssue>,
    /// Overall score reached the threshold and no issue is critical.
    pub valid: bool,
}

impl QualityScore {
    /// Score for output that could not be assessed at all.
    pub fn zero() -> Self {
        Self {
            overall: 0.0,
            grounding: 0.0,
            consistency: 0.0,
            completeness: 0.0,
            issues: Vec::new(),
            valid: false,
        }
    }

    pub fn has_critical(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Critical)
    }

    pub fn issues_in(&self, category: IssueCategory) -> impl Iterator<Item = &QualityIssue> {
        self.issues.iter().filter(move |i| i.category == category)
    }
}

/// Section keywords a deliverable's headings must cover, per task kind.
pub fn expected_sections(kind: TaskKind) -> &'static [&'static str] {
    match kind {
        TaskKind::Architecture => &["overview", "components", "decisions"],
        TaskKind::Infrastructure => &["environment", "provisioning", "monitoring"],
        TaskKind::DataDesign => &["schema", "quality"],
        TaskKind::DataPipeline => &["sources", "transformations", "schedule"],
        TaskKind::MlModel => &["features", "training", "evaluation"],
        TaskKind::Analytics => &["metrics", "dashboards"],
        TaskKind::Testing => &["test plan", "results"],
        TaskKind::Deployment => &["rollout", "rollback"],
        TaskKind::BusinessSignoff => &["summary", "acceptance"],
        TaskKind::General => &[],
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn is_heading(line: &str) -> bool {
    let line = line.trim();
    !line.is_empty() && (line.starts_with('#') || (line.ends_with(':') && line.len() <= 80))
}

/// Split text into sentences on terminal punctuation and line breaks.
fn sentences(text: &str) -> Vec<&str> {
    text.split(|c| matches!(c, '.' | '!' | '?' | '\n' | ';'))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Candidate technical terms in first-appearance order, with whether any
/// sentence stating them uses absolute phrasing.
fn candidate_terms(text: &str) -> Vec<(String, bool)> {
    let mut terms: Vec<(String, bool)> = Vec::new();
    for line in text.lines().filter(|l| !is_heading(l)) {
        // Split on sentence boundaries but keep dotted words like Node.js whole.
        for sentence in line.split(". ").flat_map(|s| s.split(['!', '?', ';'])) {
            let confident = CONFIDENT_RE.is_match(sentence);
            let mut first = true;
            for m in WORD_RE.find_iter(sentence) {
                let word = m.as_str().trim_end_matches('.');
                let initial = first;
                first = false;
                if word.len() < 3 || STOPWORDS.contains(&word.to_lowercase().as_str()) {
                    continue;
                }
                let capitalized = word.chars().next().is_some_and(char::is_uppercase)
                    && word.chars().skip(1).all(|c| !c.is_uppercase());
                let technical = CAMEL_RE.is_match(word)
                    || ACRONYM_RE.is_match(word)
                    || (capitalized && !initial);
                if !technical {
                    continue;
                }
                let lower = word.to_lowercase();
                match terms.iter_mut().find(|(t, _)| *t == lower) {
                    Some(entry) => entry.1 |= confident,
                    None => terms.push((lower, confident)),
                }
            }
        }
    }
    terms
}

/// Stateless scorer. Holds only the weights and the validity threshold.
#[derive(Debug, Clone)]
pub struct QualityScorer {
    weights: ScorerWeights,
    threshold: f64,
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self::new(ScorerWeights::default(), 0.7)
    }
}

impl QualityScorer {
    pub fn new(weights: ScorerWeights, threshold: f64) -> Self {
        Self { weights, threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score a deliverable against reference material and sibling outputs.
    ///
    /// Identical inputs always produce an identical score.
    pub fn score(
        &self,
        text: &str,
        kind: TaskKind,
        reference: &ReferenceMaterial,
        siblings: &[&str],
    ) -> QualityScore {
        let siblings_lower: Vec<String> = siblings.iter().map(|s| s.to_lowercase()).collect();
        let mut issues = Vec::new();

        let grounding = self.check_grounding(text, reference, &siblings_lower, &mut issues);
        let consistency = self.check_consistency(text, &siblings_lower, &mut issues);
        let completeness = self.check_completeness(text, kind, &mut issues);

        let w = self.weights;
        let total = w.grounding + w.consistency + w.completeness;
        let overall = if total > 0.0 {
            (w.grounding * grounding + w.consistency * consistency + w.completeness * completeness)
                / total
        } else {
            0.0
        };
        let overall = round3(overall.clamp(0.0, 1.0));

        let valid =
            overall >= self.threshold && !issues.iter().any(|i| i.severity == Severity::Critical);

        QualityScore {
            overall,
            grounding: round3(grounding),
            consistency: round3(consistency),
            completeness: round3(completeness),
            issues,
            valid,
        }
    }

    fn check_grounding(
        &self,
        text: &str,
        reference: &ReferenceMaterial,
        siblings: &[String],
        issues: &mut Vec<QualityIssue>,
    ) -> f64 {
        let mut penalty = 0.0;
        for (term, confident) in candidate_terms(text) {
            let grounded =
                reference.grounds(&term) || siblings.iter().any(|s| mentions(s, &term));
            if grounded {
                continue;
            }
            let (severity, weight) = if confident {
                (Severity::High, 2.0)
            } else {
                (Severity::Medium, 1.0)
            };
            penalty += GROUNDING_PENALTY * weight;
            let mut explanation = format!(
                "'{}' is not grounded in {} reference material or sibling outputs",
                term,
                if reference.domain.is_empty() {
                    "the"
                } else {
                    reference.domain.as_str()
                }
            );
            if confident {
                explanation.push_str(" yet is stated with absolute confidence");
            }
            issues.push(QualityIssue::new(
                IssueCategory::TermGrounding,
                severity,
                explanation,
            ));
        }
        (1.0 - penalty).max(0.0)
    }

    fn check_consistency(
        &self,
        text: &str,
        siblings: &[String],
        issues: &mut Vec<QualityIssue>,
    ) -> f64 {
        let lower = text.to_lowercase();
        let chosen = |haystack: &str, options: &[&[&str]]| -> HashSet<usize> {
            options
                .iter()
                .enumerate()
                .filter(|(_, aliases)| aliases.iter().any(|a| mentions(haystack, a)))
                .map(|(i, _)| i)
                .collect()
        };

        let mut contradictions = 0usize;
        for (decision, options) in DECISIONS {
            let mine = chosen(&lower, options);
            if mine.is_empty() {
                continue;
            }
            let conflicting = siblings.iter().find(|sibling| {
                let theirs = chosen(sibling, options);
                !theirs.is_empty() && mine.is_disjoint(&theirs)
            });
            let Some(sibling) = conflicting else {
                continue;
            };

            let name = |set: &HashSet<usize>| {
                let mut idx: Vec<usize> = set.iter().copied().collect();
                idx.sort_unstable();
                idx.iter()
                    .map(|&i| options[i][0])
                    .collect::<Vec<_>>()
                    .join("/")
            };
            let confident = sentences(text).iter().any(|s| {
                let s_lower = s.to_lowercase();
                CONFIDENT_RE.is_match(s)
                    && mine.iter().any(|&i| options[i].iter().any(|a| mentions(&s_lower, a)))
            });

            contradictions += 1;
            issues.push(QualityIssue::new(
                IssueCategory::Consistency,
                if confident { Severity::Critical } else { Severity::High },
                format!(
                    "{} contradicts a sibling output: {} vs {}",
                    decision,
                    name(&mine),
                    name(&chosen(sibling, options))
                ),
            ));
        }
        (1.0 - CONTRADICTION_PENALTY * contradictions as f64).max(0.0)
    }

    fn check_completeness(
        &self,
        text: &str,
        kind: TaskKind,
        issues: &mut Vec<QualityIssue>,
    ) -> f64 {
        let expected = expected_sections(kind);
        if expected.is_empty() {
            return 1.0;
        }
        let headings: Vec<String> = text
            .lines()
            .filter(|l| is_heading(l))
            .map(|l| l.to_lowercase())
            .collect();

        let mut present = 0usize;
        for section in expected {
            if headings.iter().any(|h| h.contains(section)) {
                present += 1;
            } else {
                issues.push(QualityIssue::new(
                    IssueCategory::Completeness,
                    Severity::Medium,
                    format!("missing '{}' section expected for {} tasks", section, kind),
                ));
            }
        }
        present as f64 / expected.len() as f64
    }
}
