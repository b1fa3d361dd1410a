//! Error types for storage, rule table and reconciliation failures.

use crate::storage::Scope;
use crate::types::RuleId;

/// Error reading or writing persisted state.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{scope} storage failed: {message}")]
    Backend { scope: Scope, message: String },
    #[error("invalid value for '{key}' in {scope} storage: {source}")]
    Schema {
        scope: Scope,
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Error reported by the platform rule table.
#[derive(Debug, thiserror::Error)]
pub enum RuleTableError {
    #[error("rule {id} rejected: {reason}")]
    Rejected { id: RuleId, reason: String },
    #[error("duplicate rule id {0}")]
    DuplicateId(RuleId),
    #[error("rule quota exceeded: {requested} rules, limit {limit}")]
    QuotaExceeded { requested: usize, limit: usize },
    #[error("rule table unavailable: {0}")]
    Backend(String),
}

/// Any failure inside a reconciliation pass.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    RuleTable(#[from] RuleTableError),
}
