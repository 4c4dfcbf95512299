//! Validation service holding one record per task.
//!
//! Scoring runs on a private copy of the record; the result is committed
//! under the lock only if the record was not discarded in the meantime, so
//! a cancelled project never observes a half-reviewed record.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::config::ValidationConfig;
use crate::core::{Deliverable, Task, TaskId};
use crate::error::{Error, Result};
use crate::quality::{
    IssueCategory, QualityIssue, QualityScore, QualityScorer, ReferenceMaterial, Severity,
};
use crate::{alog_debug, alog_warn};

use super::checks::{requirement_coverage, technical_checks};
use super::record::{ValidationRecord, ValidationState};

/// What happened to a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    /// Both reviews passed; the task can be marked Done.
    Approved { score: QualityScore },
    /// Rejected; the team may resubmit.
    Rejected {
        feedback: Vec<String>,
        attempts_left: u32,
    },
    /// Rejected with no retries left; the task fails.
    Exhausted { feedback: Vec<String> },
    /// The record was discarded while the submission was under review.
    Discarded,
}

impl ValidationOutcome {
    pub fn is_approved(&self) -> bool {
        matches!(self, ValidationOutcome::Approved { .. })
    }

    pub fn feedback(&self) -> &[String] {
        match self {
            ValidationOutcome::Rejected { feedback, .. } | ValidationOutcome::Exhausted { feedback } => {
                feedback
            }
            _ => &[],
        }
    }
}

/// Tasks currently in validation, per stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationQueue {
    pub submitted: Vec<TaskId>,
    pub technical_review: Vec<TaskId>,
    pub business_review: Vec<TaskId>,
    /// Rejected and waiting for the team to resubmit.
    pub awaiting_resubmission: Vec<TaskId>,
}

impl ValidationQueue {
    pub fn len(&self) -> usize {
        self.submitted.len()
            + self.technical_review.len()
            + self.business_review.len()
            + self.awaiting_resubmission.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct ValidationWorkflow {
    scorer: QualityScorer,
    config: ValidationConfig,
    records: Mutex<HashMap<TaskId, ValidationRecord>>,
}

impl ValidationWorkflow {
    pub fn new(scorer: QualityScorer, config: ValidationConfig) -> Self {
        Self {
            scorer,
            config,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    pub fn scorer(&self) -> &QualityScorer {
        &self.scorer
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, ValidationRecord>> {
        // A poisoned map still holds committed records only.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open a new cycle for a task and return a private copy of the record.
    fn open_cycle(&self, task_id: TaskId, deliverable: Deliverable) -> Result<ValidationRecord> {
        let mut records = self.lock();
        let record = match records.get(&task_id) {
            None => ValidationRecord::new(task_id, deliverable, self.config.max_retries),
            Some(existing) => {
                let mut next = existing.clone();
                next.resubmit(deliverable)?;
                next
            }
        };
        records.insert(task_id, record.clone());
        Ok(record)
    }

    /// Commit a reviewed record unless it was discarded meanwhile.
    fn commit(&self, record: ValidationRecord) -> ValidationOutcome {
        let mut records = self.lock();
        let still_open = records
            .get(&record.task_id)
            .is_some_and(|r| r.state == ValidationState::Submitted);
        if !still_open {
            alog_debug!("Validation for {} discarded before commit", record.task_id.short());
            return ValidationOutcome::Discarded;
        }

        let outcome = match record.state {
            ValidationState::Approved => ValidationOutcome::Approved {
                score: record.score.clone().unwrap_or_else(QualityScore::zero),
            },
            _ if record.is_terminal() => ValidationOutcome::Exhausted {
                feedback: record.feedback.clone(),
            },
            _ => ValidationOutcome::Rejected {
                feedback: record.feedback.clone(),
                attempts_left: record.attempts_left(),
            },
        };
        alog_debug!(
            "Validation for {} -> {} (rejections {}/{})",
            record.task_id.short(),
            record.state,
            record.retry_count,
            record.max_retries
        );
        records.insert(record.task_id, record);
        outcome
    }

    /// Run a deliverable through technical and business review.
    ///
    /// # Errors
    /// - `RetriesExhausted` if the task's record is already terminal
    /// - `InvalidValidationTransition` if a review of the task is in progress
    pub fn submit(
        &self,
        task: &Task,
        deliverable: Deliverable,
        reference: &ReferenceMaterial,
        siblings: &[&str],
    ) -> Result<ValidationOutcome> {
        let mut record = self.open_cycle(task.id, deliverable)?;

        record.begin_technical()?;
        let score = self
            .scorer
            .score(&record.deliverable.content, task.kind, reference, siblings);
        let structural = technical_checks(task, &record.deliverable);
        if record.technical_review(score, structural)? == ValidationState::BusinessReview {
            let coverage = requirement_coverage(
                &task.requirements,
                &record.deliverable.content,
                self.config.min_coverage,
            );
            record.business_review(coverage)?;
        }

        if record.state == ValidationState::Rejected {
            alog_warn!(
                "Deliverable for {} '{}' rejected: {}",
                task.id.short(),
                task.name,
                record.feedback.join("; ")
            );
        }
        Ok(self.commit(record))
    }

    /// Count a failed or timed-out team call as a rejected submission.
    pub fn record_execution_failure(&self, task: &Task, message: &str) -> Result<ValidationOutcome> {
        let mut record = self.open_cycle(task.id, Deliverable::default())?;
        record.begin_technical()?;
        let issue = QualityIssue::new(
            IssueCategory::TeamExecution,
            Severity::High,
            format!("team {} failed: {}", task.team, message),
        );
        record.technical_review(QualityScore::zero(), vec![issue])?;
        Ok(self.commit(record))
    }

    /// Drop every non-approved record of the given tasks.
    pub fn discard(&self, task_ids: &[TaskId]) -> usize {
        let mut records = self.lock();
        let before = records.len();
        for id in task_ids {
            if records
                .get(id)
                .is_some_and(|r| r.state != ValidationState::Approved)
            {
                records.remove(id);
            }
        }
        before - records.len()
    }

    /// Drop records of the given tasks whose review never settled.
    /// Approved and Rejected records are kept.
    pub fn abandon_reviews(&self, task_ids: &[TaskId]) -> usize {
        let mut records = self.lock();
        let before = records.len();
        for id in task_ids {
            if records.get(id).is_some_and(|r| {
                !matches!(r.state, ValidationState::Approved | ValidationState::Rejected)
            }) {
                records.remove(id);
            }
        }
        before - records.len()
    }

    pub fn get(&self, task_id: &TaskId) -> Option<ValidationRecord> {
        self.lock().get(task_id).cloned()
    }

    /// Records of the given tasks, in the given order.
    pub fn records_for(&self, task_ids: &[TaskId]) -> Vec<ValidationRecord> {
        let records = self.lock();
        task_ids
            .iter()
            .filter_map(|id| records.get(id).cloned())
            .collect()
    }

    /// Put back previously saved records.
    pub fn restore(&self, saved: Vec<ValidationRecord>) {
        let mut records = self.lock();
        for record in saved {
            records.insert(record.task_id, record);
        }
    }

    /// Non-terminal records of the given tasks, grouped by stage.
    pub fn queue(&self, task_ids: &[TaskId]) -> ValidationQueue {
        let records = self.lock();
        let mut queue = ValidationQueue::default();
        for id in task_ids {
            let Some(record) = records.get(id) else {
                continue;
            };
            match record.state {
                ValidationState::Submitted => queue.submitted.push(*id),
                ValidationState::TechnicalReview => queue.technical_review.push(*id),
                ValidationState::BusinessReview => queue.business_review.push(*id),
                ValidationState::Rejected if record.can_retry() => {
                    queue.awaiting_resubmission.push(*id)
                }
                _ => {}
            }
        }
        queue
    }

    /// Reject a direct call when the record for a task is terminal.
    pub fn ensure_open(&self, task_id: &TaskId) -> Result<()> {
        match self.lock().get(task_id) {
            Some(r) if r.is_terminal() && r.state == ValidationState::Rejected => {
                Err(Error::RetriesExhausted {
                    task: *task_id,
                    max: r.max_retries,
                })
            }
            _ => Ok(()),
        }
    }
}
