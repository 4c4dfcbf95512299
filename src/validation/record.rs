//! Per-deliverable validation state machine.
//!
//! ```text
//! Submitted -> TechnicalReview -> BusinessReview -> Approved
//!                    |                  |
//!                    +----> Rejected <--+
//!                              |
//!                              +--> Submitted   (only while retry_count < max_retries)
//! ```
//!
//! Each transition is a method that checks the current state and returns
//! `InvalidValidationTransition` otherwise, so every edge can be tested alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Deliverable, TaskId};
use crate::error::{Error, Result};
use crate::quality::{QualityIssue, QualityScore, Severity};

use super::checks::CoverageVerdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationState {
    Submitted,
    TechnicalReview,
    BusinessReview,
    Approved,
    Rejected,
}

impl std::fmt::Display for ValidationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationState::Submitted => write!(f, "submitted"),
            ValidationState::TechnicalReview => write!(f, "technical_review"),
            ValidationState::BusinessReview => write!(f, "business_review"),
            ValidationState::Approved => write!(f, "approved"),
            ValidationState::Rejected => write!(f, "rejected"),
        }
    }
}

/// One state change, kept for the project report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationTransition {
    pub from: ValidationState,
    pub to: ValidationState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub task_id: TaskId,
    pub deliverable: Deliverable,
    /// Technical review result of the current cycle.
    pub score: Option<QualityScore>,
    /// Business review verdict of the current cycle.
    pub coverage: Option<CoverageVerdict>,
    pub state: ValidationState,
    /// Feedback of the current cycle, from both stages.
    pub feedback: Vec<String>,
    /// Number of rejections so far.
    pub retry_count: u32,
    pub max_retries: u32,
    pub history: Vec<ValidationTransition>,
    pub submitted_at: DateTime<Utc>,
}

impl ValidationRecord {
    pub fn new(task_id: TaskId, deliverable: Deliverable, max_retries: u32) -> Self {
        Self {
            task_id,
            deliverable,
            score: None,
            coverage: None,
            state: ValidationState::Submitted,
            feedback: Vec::new(),
            retry_count: 0,
            max_retries,
            history: Vec::new(),
            submitted_at: Utc::now(),
        }
    }

    fn expect_state(&self, expected: ValidationState, to: ValidationState) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidValidationTransition {
                task: self.task_id,
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    fn move_to(&mut self, to: ValidationState) {
        self.history.push(ValidationTransition {
            from: self.state,
            to,
            at: Utc::now(),
        });
        self.state = to;
    }

    fn reject(&mut self) {
        self.retry_count += 1;
        self.move_to(ValidationState::Rejected);
    }

    /// Submitted → TechnicalReview.
    pub fn begin_technical(&mut self) -> Result<()> {
        self.expect_state(ValidationState::Submitted, ValidationState::TechnicalReview)?;
        self.move_to(ValidationState::TechnicalReview);
        Ok(())
    }

    /// TechnicalReview → BusinessReview, or → Rejected when the score is
    /// not valid or a structural check flagged a high or critical issue.
    pub fn technical_review(
        &mut self,
        score: QualityScore,
        structural: Vec<QualityIssue>,
    ) -> Result<ValidationState> {
        self.expect_state(ValidationState::TechnicalReview, ValidationState::BusinessReview)?;

        let blocking: Vec<&QualityIssue> = structural
            .iter()
            .filter(|i| i.severity >= Severity::High)
            .collect();
        let passed = score.valid && blocking.is_empty();

        if !score.valid {
            self.feedback.push(format!(
                "quality score {:.3} did not pass the gate",
                score.overall
            ));
        }
        for issue in score.issues.iter().chain(structural.iter()) {
            self.feedback.push(issue.to_string());
        }

        let mut all = score;
        all.issues.extend(structural);
        self.score = Some(all);

        if passed {
            self.move_to(ValidationState::BusinessReview);
        } else {
            self.reject();
        }
        Ok(self.state)
    }

    /// BusinessReview → Approved when requirements are covered, else Rejected.
    pub fn business_review(&mut self, coverage: CoverageVerdict) -> Result<ValidationState> {
        self.expect_state(ValidationState::BusinessReview, ValidationState::Approved)?;

        let technical_ok = self.score.as_ref().is_some_and(|s| s.valid);
        if !coverage.accepted {
            self.feedback.push(format!(
                "requirement coverage {:.2} is below the gate; missing: {}",
                coverage.ratio,
                coverage.missing.join(", ")
            ));
        }
        let approved = coverage.accepted && technical_ok;
        self.coverage = Some(coverage);

        if approved {
            self.move_to(ValidationState::Approved);
        } else {
            self.reject();
        }
        Ok(self.state)
    }

    /// Rejected → Submitted with a new deliverable, while retries remain.
    pub fn resubmit(&mut self, deliverable: Deliverable) -> Result<()> {
        self.expect_state(ValidationState::Rejected, ValidationState::Submitted)?;
        if !self.can_retry() {
            return Err(Error::RetriesExhausted {
                task: self.task_id,
                max: self.max_retries,
            });
        }
        self.deliverable = deliverable;
        self.score = None;
        self.coverage = None;
        self.feedback.clear();
        self.submitted_at = Utc::now();
        self.move_to(ValidationState::Submitted);
        Ok(())
    }

    pub fn can_retry(&self) -> bool {
        self.state == ValidationState::Rejected && self.retry_count < self.max_retries
    }

    pub fn attempts_left(&self) -> u32 {
        self.max_retries.saturating_sub(self.retry_count)
    }

    /// Approved, or Rejected with no retries left.
    pub fn is_terminal(&self) -> bool {
        match self.state {
            ValidationState::Approved => true,
            ValidationState::Rejected => !self.can_retry(),
            _ => false,
        }
    }

    pub fn is_in_review(&self) -> bool {
        matches!(
            self.state,
            ValidationState::Submitted
                | ValidationState::TechnicalReview
                | ValidationState::BusinessReview
        )
    }
}
