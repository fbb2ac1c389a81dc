//! Ruleforge Engine - rule dispatch and concurrent execution
//!
//! A registry of named, composable data transformations ("rules"), a pipeline
//! executor that chains them, and a fixed-size worker pool that runs rules
//! declared threadable in isolated worker threads.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ RuleBroker  │────▶│   Dispatch   │────▶│  WorkerPool  │
//! │ (pipeline)  │     │ Local|Offload│     │ (N threads)  │
//! └─────────────┘     └──────────────┘     └──────────────┘
//!        │                   │                    │ JSON job
//!        ▼                   ▼                    ▼
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ RuleContext │     │ RuleRegistry │     │    Worker    │
//! │  (local)    │     │ (metadata)   │     │ (closure only)│
//! └─────────────┘     └──────────────┘     └──────────────┘
//! ```

mod broker;
mod catalog;
mod config;
mod context;
mod dispatch;
mod error;
mod job;
pub mod library;
mod pool;
mod registry;
pub mod types;
mod worker;

// Re-export public API
pub use broker::RuleBroker;
pub use catalog::{parse_pipeline, standard_entries, Namespace, RuleId};
pub use config::EngineConfig;
pub use context::{run_rule, RuleContext, RuleFn, RuleTable, MAX_CALL_DEPTH};
pub use dispatch::{Dispatch, DispatchPolicy, JobSink};
pub use error::{Result, RuleError};
pub use job::{Job, JobId, JobOutcome, JobPayload, JobReply, JobResult};
pub use pool::{
    JobTicket, PoolConfig, PoolStats, WorkerPool, WorkerSnapshot, WorkerState,
    DEFAULT_SHUTDOWN_GRACE_MS,
};
pub use registry::{RuleDeclaration, RuleMetadataEntry, RuleRegistry};
pub use worker::{execute_payload, JobRunner};

// Re-export value types for convenience
pub use types::{
    fits_wire, nesting_depth, MetaData, MetaKind, RuleData, WireMeta, MAX_WIRE_DEPTH,
};
