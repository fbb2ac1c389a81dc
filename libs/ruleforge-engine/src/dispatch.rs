//! Dispatch decision - where a pipeline stage runs
//!
//! Threadability is a permission, never a mandate: every path that cannot
//! offload ends in `Local`, and a stage's result never depends on which side
//! ran it.

use async_trait::async_trait;
use std::time::Duration;
use tracing::trace;

use crate::catalog::RuleId;
use crate::error::Result;
use crate::registry::RuleMetadataEntry;
use crate::types::{MetaData, RuleData};

/// Where a stage executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Direct call on the caller's thread
    Local,
    /// Job submitted to the worker pool
    Offload,
}

/// Job submission surface seen by the dispatch layer
///
/// Implemented by `WorkerPool`; tests substitute an instrumented sink.
#[async_trait]
pub trait JobSink: Send + Sync {
    /// Whether a job would be admitted right now
    fn has_capacity(&self) -> bool;

    /// Wait up to `budget` for capacity; returns whether it appeared
    async fn wait_for_capacity(&self, budget: Duration) -> bool;

    async fn submit_job(
        &self,
        rule_id: RuleId,
        input_data: RuleData,
        input_meta_data: &MetaData,
    ) -> Result<RuleData>;
}

/// Configuration consulted by each decision
#[derive(Debug, Clone, Copy)]
pub struct DispatchPolicy {
    pub threading_enabled: bool,
    /// How long a decision may wait for pool capacity before choosing `Local`
    pub admission_wait: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            threading_enabled: true,
            admission_wait: Duration::ZERO,
        }
    }
}

impl DispatchPolicy {
    pub fn local_only() -> Self {
        Self {
            threading_enabled: false,
            admission_wait: Duration::ZERO,
        }
    }

    /// Offload is permitted at all for this rule and metadata
    pub fn permits_offload(&self, entry: &RuleMetadataEntry, meta: &MetaData) -> bool {
        entry.threadable && self.threading_enabled && meta.is_transferable()
    }

    /// Decide where one stage runs
    pub async fn decide<P>(
        &self,
        entry: &RuleMetadataEntry,
        meta: &MetaData,
        pool: Option<&P>,
    ) -> Dispatch
    where
        P: JobSink + ?Sized,
    {
        if !self.permits_offload(entry, meta) {
            return Dispatch::Local;
        }
        let Some(pool) = pool else {
            return Dispatch::Local;
        };

        if pool.has_capacity() {
            return Dispatch::Offload;
        }
        if !self.admission_wait.is_zero() && pool.wait_for_capacity(self.admission_wait).await {
            return Dispatch::Offload;
        }

        trace!("{}: pool has no capacity, running locally", entry.id);
        Dispatch::Local
    }
}
