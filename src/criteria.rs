//! Match criteria providers.
//!
//! The matcher never caches criteria: the detail worker asks its
//! [`CriteriaSource`] for a fresh snapshot on every evaluation, so edits
//! to the criteria file apply to the next item without a restart.
//!
//! Criteria file format:
//!
//! ```toml
//! keywords = ["laptop", "/serv(er|ice)s?/i"]
//!
//! [[semantic]]
//! text = "supply of computer equipment"
//! threshold = 0.72
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use catalog_watch_core::error::MatchBackendError;
use catalog_watch_core::matcher::{compile_keywords, MatchCriteria};

/// Supplies the current match criteria snapshot.
#[async_trait]
pub trait CriteriaSource: Send + Sync {
    async fn current(&self) -> Result<MatchCriteria, MatchBackendError>;
}

/// Reads a TOML criteria file on every call.
pub struct FileCriteriaSource {
    path: PathBuf,
}

impl FileCriteriaSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Parse criteria TOML, checking value ranges and reporting bad patterns.
pub fn parse_criteria(content: &str) -> Result<MatchCriteria, MatchBackendError> {
    let criteria: MatchCriteria = toml::from_str(content)
        .map_err(|e| MatchBackendError::Criteria(format!("parse error: {}", e)))?;

    for query in &criteria.semantic_queries {
        if !(0.0..=1.0).contains(&query.threshold) {
            return Err(MatchBackendError::Criteria(format!(
                "threshold {} for '{}' is outside [0, 1]",
                query.threshold, query.text
            )));
        }
    }

    let (_, invalid) = compile_keywords(&criteria.keywords);
    for pattern in invalid {
        tracing::warn!(pattern = %pattern, "ignoring keyword with invalid regex");
    }

    Ok(criteria)
}

#[async_trait]
impl CriteriaSource for FileCriteriaSource {
    async fn current(&self) -> Result<MatchCriteria, MatchBackendError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            MatchBackendError::Criteria(format!("{}: {}", self.path.display(), e))
        })?;
        parse_criteria(&content)
    }
}

/// Fixed criteria, for tests and one-off `inspect` runs.
#[derive(Debug, Clone, Default)]
pub struct StaticCriteria(pub MatchCriteria);

#[async_trait]
impl CriteriaSource for StaticCriteria {
    async fn current(&self) -> Result<MatchCriteria, MatchBackendError> {
        Ok(self.0.clone())
    }
}
