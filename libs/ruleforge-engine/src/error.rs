//! Rule Engine Error Types

use thiserror::Error;

use crate::catalog::{Namespace, RuleId};

/// Result type for rule operations
pub type Result<T> = std::result::Result<T, RuleError>;

/// Rule engine errors
///
/// Every failure is returned as a value; nothing in the engine retries on its own.
#[derive(Debug, Clone, Error)]
pub enum RuleError {
    /// A pipeline, dependency closure or lookup referenced an unregistered rule
    #[error("Rule not found: {0}")]
    RuleNotFound(String),

    /// Registration attempted before the namespace table was initialized
    #[error("Namespace not initialized: {0}")]
    NamespaceNotInitialized(Namespace),

    /// Registration rejected an entry
    #[error("Registration error: {0}")]
    Registration(String),

    /// A non-threadable rule reached the worker pool
    #[error("Rule {0} is not threadable")]
    NotThreadable(RuleId),

    /// Admission queue full at submission time
    #[error("Worker pool saturated (queue depth {queue_depth})")]
    PoolSaturated { queue_depth: usize },

    /// Pool is shutting down or already stopped
    #[error("Worker pool is closed")]
    PoolClosed,

    /// Worker crashed while executing the job
    #[error("Worker {worker_id} faulted on job {job_id}: {message}")]
    WorkerFault {
        job_id: u64,
        worker_id: u64,
        message: String,
    },

    /// Worker did not answer before the job deadline
    #[error("Job {job_id} timed out after {timeout_ms}ms")]
    JobTimeout { job_id: u64, timeout_ms: u64 },

    /// OS refused to start a worker thread
    #[error("Worker spawn failed: {0}")]
    WorkerSpawn(String),

    /// Payload could not cross the worker boundary
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Rule body returned an error
    #[error("Rule {rule} failed: {message}")]
    RuleFailed {
        rule: String,
        message: String,
        stack: Vec<String>,
    },

    /// Input data did not have the shape the rule expects
    #[error("Invalid input for {rule}: {message}")]
    InvalidInput { rule: RuleId, message: String },

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RuleError {
    pub fn not_found(id: impl ToString) -> Self {
        RuleError::RuleNotFound(id.to_string())
    }

    pub fn invalid_input(rule: RuleId, message: impl Into<String>) -> Self {
        RuleError::InvalidInput {
            rule,
            message: message.into(),
        }
    }

    /// Whether the failure came from the pool rather than the rule itself
    pub fn is_pool_error(&self) -> bool {
        matches!(
            self,
            RuleError::PoolSaturated { .. }
                | RuleError::PoolClosed
                | RuleError::WorkerFault { .. }
                | RuleError::JobTimeout { .. }
        )
    }
}

impl From<serde_json::Error> for RuleError {
    fn from(err: serde_json::Error) -> Self {
        RuleError::SerializationError(err.to_string())
    }
}
