//! Two-stage acceptance gate for deliverables.
//!
//! Technical review scores the content and checks declared artifacts and
//! test results. Business review checks requirement coverage. A rejected
//! deliverable may be resubmitted a bounded number of times.

mod checks;
mod record;
mod workflow;

pub use checks::{covers, requirement_coverage, technical_checks, CoverageVerdict};
pub use record::{ValidationRecord, ValidationState, ValidationTransition};
pub use workflow::{ValidationOutcome, ValidationQueue, ValidationWorkflow};
