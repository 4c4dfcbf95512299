//! Reference material lookup for the quality scorer.
//!
//! The knowledge store maps a domain (e.g. `data_engineering`) to the set of
//! terms and checklist items a deliverable in that domain may rely on. The
//! built-in vocabulary can be extended from a TOML file:
//!
//! ```toml
//! [domains.data_engineering]
//! terms = ["dagster", "snowflake"]
//! checklist = ["Document data retention"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use crate::{alog_debug, Result};

/// Accepted terms and checklist items for one domain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceMaterial {
    pub domain: String,
    /// Lowercased accepted terms. Multi-word terms are kept whole.
    pub terms: BTreeSet<String>,
    pub checklist: Vec<String>,
    /// Free text that also counts as grounding, e.g. the project brief.
    pub text: String,
}

impl ReferenceMaterial {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            ..Default::default()
        }
    }

    pub fn with_terms(mut self, terms: &[&str]) -> Self {
        self.terms
            .extend(terms.iter().map(|t| t.to_lowercase()));
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.text.push_str(text);
        self
    }

    /// Whether a lowercased term is accepted by this material.
    ///
    /// Matches a whole term, a word of a multi-word term, or a word in the
    /// free text.
    pub fn grounds(&self, term: &str) -> bool {
        if self.terms.contains(term) {
            return true;
        }
        if self
            .terms
            .iter()
            .any(|t| t.contains(' ') && mentions(t, term))
        {
            return true;
        }
        !self.text.is_empty() && mentions(&self.text.to_lowercase(), term)
    }
}

/// Case-sensitive whole-word search. Both sides are expected lowercased.
pub(crate) fn mentions(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let begin = start + pos;
        let end = begin + needle.len();
        let before_ok = haystack[..begin].chars().next_back().map_or(true, |c| !is_word(c));
        let after_ok = haystack[end..].chars().next().map_or(true, |c| !is_word(c));
        if before_ok && after_ok {
            return true;
        }
        start = begin + needle.chars().next().map_or(1, |c| c.len_utf8());
    }
    false
}

/// Read-only source of reference material.
pub trait KnowledgeStore: Send + Sync {
    fn best_practices(&self, domain: &str) -> ReferenceMaterial;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct DomainEntry {
    terms: Vec<String>,
    checklist: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct KnowledgeFile {
    common: Vec<String>,
    domains: BTreeMap<String, DomainEntry>,
}

const COMMON_TERMS: &[&str] = &[
    "api", "sql", "etl", "elt", "json", "csv", "yaml", "http", "https", "rest", "sla", "slo",
    "kpi", "pii", "gdpr", "lgpd", "rbac", "iam", "vpc", "ssl", "tls", "python", "git",
    "github", "docker", "linux", "cloud", "aws", "gcp", "azure", "s3", "dashboard",
    "schema", "pipeline", "monitoring", "logging", "mvp", "poc", "roi", "uat",
];

const BUILTIN_DOMAINS: &[(&str, &[&str], &[&str])] = &[
    (
        "data_engineering",
        &[
            "airflow", "dbt", "spark", "kafka", "postgresql", "postgres", "mysql",
            "data warehouse", "data lake", "lakehouse", "dag", "orchestration", "batch",
            "streaming", "delta lake", "iceberg", "hudi", "parquet", "avro", "cdc",
            "idempotent", "partitioning",
        ],
        &["Define source systems", "Document transformations", "Schedule and retries"],
    ),
    (
        "data_science",
        &[
            "machine learning", "deep learning", "neural network", "regression",
            "classification", "clustering", "nlp", "tensorflow", "pytorch", "scikit-learn",
            "pandas", "numpy", "feature engineering", "model training", "hyperparameter",
            "cross-validation", "overfitting", "underfitting", "mlflow", "auc", "rmse",
        ],
        &["Describe features", "Report evaluation metrics"],
    ),
    (
        "devops",
        &[
            "kubernetes", "terraform", "ansible", "jenkins", "github actions", "ci/cd",
            "gitops", "helm", "argocd", "prometheus", "grafana", "elk", "observability",
            "sre", "infrastructure as code", "container", "microservices", "rollback",
            "blue-green", "canary",
        ],
        &["Provision environments as code", "Define rollback procedure"],
    ),
    (
        "qa",
        &[
            "pytest", "unittest", "selenium", "cypress", "jest", "test automation",
            "unit test", "integration test", "e2e test", "load test", "stress test", "tdd",
            "bdd", "great expectations", "data quality", "validation", "regression",
        ],
        &["Attach test results", "Cover acceptance criteria"],
    ),
    (
        "architecture",
        &[
            "microservices", "monolith", "event-driven", "lakehouse", "data mesh",
            "medallion", "bronze", "silver", "gold", "adr", "c4", "scalability",
            "batch", "streaming", "data lake", "data warehouse",
        ],
        &["Record architecture decisions", "List components and boundaries"],
    ),
    (
        "data_analytics",
        &[
            "power bi", "tableau", "looker", "metabase", "superset", "kpi", "cohort",
            "funnel", "olap", "star schema", "dimension", "fact table", "semantic layer",
        ],
        &["Define metrics", "Describe dashboards"],
    ),
];

/// In-memory knowledge store seeded with built-in vocabularies.
#[derive(Debug, Clone)]
pub struct StaticKnowledgeStore {
    common: BTreeSet<String>,
    domains: BTreeMap<String, ReferenceMaterial>,
}

impl StaticKnowledgeStore {
    /// Store with no terms at all.
    pub fn empty() -> Self {
        Self {
            common: BTreeSet::new(),
            domains: BTreeMap::new(),
        }
    }

    /// Store seeded with the built-in domain vocabularies.
    pub fn builtin() -> Self {
        let mut store = Self::empty();
        store.common = COMMON_TERMS.iter().map(|t| t.to_string()).collect();
        for (domain, terms, checklist) in BUILTIN_DOMAINS {
            let material = store
                .domains
                .entry(domain.to_string())
                .or_insert_with(|| ReferenceMaterial::new(domain));
            material.terms.extend(terms.iter().map(|t| t.to_string()));
            material
                .checklist
                .extend(checklist.iter().map(|c| c.to_string()));
        }
        store
    }

    /// Built-in store extended with a TOML knowledge file.
    pub fn load(path: &Path) -> Result<Self> {
        let mut store = Self::builtin();
        store.merge_toml(&fs::read_to_string(path)?)?;
        alog_debug!(
            "Knowledge loaded from {}: {} domains",
            path.display(),
            store.domains.len()
        );
        Ok(store)
    }

    pub fn merge_toml(&mut self, content: &str) -> Result<()> {
        let file: KnowledgeFile = toml::from_str(content)?;
        self.common
            .extend(file.common.iter().map(|t| t.to_lowercase()));
        for (domain, entry) in file.domains {
            let material = self
                .domains
                .entry(domain.clone())
                .or_insert_with(|| ReferenceMaterial::new(&domain));
            material
                .terms
                .extend(entry.terms.iter().map(|t| t.to_lowercase()));
            material.checklist.extend(entry.checklist);
        }
        Ok(())
    }

    pub fn add_terms(&mut self, domain: &str, terms: &[&str]) {
        let material = self
            .domains
            .entry(domain.to_string())
            .or_insert_with(|| ReferenceMaterial::new(domain));
        material.terms.extend(terms.iter().map(|t| t.to_lowercase()));
    }

    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.domains.keys().map(String::as_str)
    }
}

impl Default for StaticKnowledgeStore {
    fn default() -> Self {
        Self::builtin()
    }
}

impl KnowledgeStore for StaticKnowledgeStore {
    /// Domain terms plus the common vocabulary. The `general` domain, and
    /// any domain without its own entry, sees every known term.
    fn best_practices(&self, domain: &str) -> ReferenceMaterial {
        let mut material = match self.domains.get(domain) {
            Some(known) => known.clone(),
            None => {
                let mut all = ReferenceMaterial::new(domain);
                for known in self.domains.values() {
                    all.terms.extend(known.terms.iter().cloned());
                }
                all
            }
        };
        material.terms.extend(self.common.iter().cloned());
        material
    }
}
