//! Output a team produces for a task.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Test results reported by the team that produced a deliverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestReport {
    pub passed: u32,
    pub failed: u32,
}

impl TestReport {
    pub fn is_passing(&self) -> bool {
        self.failed == 0 && self.passed > 0
    }
}

/// Free-form text plus optional structured fields.
///
/// The core never inspects how a team produced the text; it only scores
/// the content and checks the declared artifacts and test results.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Deliverable {
    pub content: String,
    /// Names of artifacts the team declares it produced.
    pub artifacts: Vec<String>,
    pub test_results: Option<TestReport>,
    pub metadata: BTreeMap<String, String>,
}

impl Deliverable {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_artifacts(mut self, artifacts: &[&str]) -> Self {
        self.artifacts = artifacts.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_tests(mut self, passed: u32, failed: u32) -> Self {
        self.test_results = Some(TestReport { passed, failed });
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn has_artifact(&self, name: &str) -> bool {
        self.artifacts.iter().any(|a| a.eq_ignore_ascii_case(name))
    }
}
