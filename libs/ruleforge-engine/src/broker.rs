//! Rule Broker - pipeline executor
//!
//! Runs an ordered pipeline of rules, feeding each stage's output to the next
//! stage. Each stage is dispatched independently: locally on the caller's
//! thread or as a job on the worker pool. Stages never overlap.

use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::catalog::RuleId;
use crate::config::EngineConfig;
use crate::context::{run_rule, RuleContext, RuleTable};
use crate::dispatch::{Dispatch, DispatchPolicy, JobSink};
use crate::error::{Result, RuleError};
use crate::pool::WorkerPool;
use crate::registry::{RuleMetadataEntry, RuleRegistry};
use crate::types::{fits_wire, MetaData, RuleData};

/// Pipeline executor
pub struct RuleBroker<P: JobSink = WorkerPool> {
    registry: Arc<RuleRegistry>,
    /// Every registered rule, for local execution
    table: RuleTable,
    policy: DispatchPolicy,
    fallback_on_saturation: bool,
    pool: Option<Arc<P>>,
}

impl RuleBroker<WorkerPool> {
    /// Broker that runs every stage in-process
    pub fn local(registry: Arc<RuleRegistry>) -> Self {
        Self {
            table: RuleTable::from_registry(&registry),
            registry,
            policy: DispatchPolicy::local_only(),
            fallback_on_saturation: true,
            pool: None,
        }
    }

    /// Broker configured from `config`, starting a worker pool when threading is enabled
    pub fn start(registry: Arc<RuleRegistry>, config: &EngineConfig) -> Result<Self> {
        config.validate()?;

        if !config.threading_enabled {
            info!("Threading disabled; all rules run in-process");
            return Ok(Self::local(registry));
        }

        let pool = WorkerPool::start(Arc::clone(&registry), config.pool_config())?;
        Ok(Self::with_pool(registry, Arc::new(pool), config))
    }

    /// Drain and stop the worker pool, if any
    pub async fn shutdown(&self) {
        if let Some(pool) = &self.pool {
            pool.shutdown().await;
        }
    }
}

impl<P: JobSink> RuleBroker<P> {
    /// Broker over an existing job sink
    pub fn with_pool(registry: Arc<RuleRegistry>, pool: Arc<P>, config: &EngineConfig) -> Self {
        Self {
            table: RuleTable::from_registry(&registry),
            registry,
            policy: config.dispatch_policy(),
            fallback_on_saturation: config.fallback_on_saturation,
            pool: Some(pool),
        }
    }

    pub fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> Option<&Arc<P>> {
        self.pool.as_ref()
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// Run `pipeline` over `input_data`
    ///
    /// Every id, and every dependency those rules declare, is checked against
    /// the registry before the first stage runs. Any failure aborts the
    /// pipeline and discards intermediate results.
    pub async fn process_rules(
        &self,
        input_data: RuleData,
        input_meta_data: &MetaData,
        pipeline: &[RuleId],
    ) -> Result<RuleData> {
        let entries = pipeline
            .iter()
            .map(|id| {
                let entry = self.registry.get(*id)?;
                self.registry.resolve_closure(id.namespace(), *id)?;
                Ok(entry)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut current = input_data;
        for (stage, entry) in entries.into_iter().enumerate() {
            debug!("Pipeline stage {}/{}: {}", stage + 1, pipeline.len(), entry.id);
            current = self.run_stage(entry, current, input_meta_data).await?;
        }
        Ok(current)
    }

    /// Run `pipeline` on the current thread without any offload decision
    ///
    /// For call sites already inside a rule body.
    pub fn process_rules_internal(
        &self,
        input_data: RuleData,
        input_meta_data: &MetaData,
        pipeline: &[RuleId],
    ) -> Result<RuleData> {
        let ctx = RuleContext::new(&self.table);
        ctx.process_rules_internal(input_data, input_meta_data, pipeline)
    }

    async fn run_stage(
        &self,
        entry: &RuleMetadataEntry,
        data: RuleData,
        meta: &MetaData,
    ) -> Result<RuleData> {
        let pool = self.pool.as_deref();
        let decision = if fits_wire(&data) {
            self.policy.decide(entry, meta, pool).await
        } else {
            trace!("{}: input too deeply nested for a worker, running locally", entry.id);
            Dispatch::Local
        };

        if let (Dispatch::Offload, Some(pool)) = (decision, pool) {
            let fallback_input = self.fallback_on_saturation.then(|| data.clone());
            match (pool.submit_job(entry.id, data, meta).await, fallback_input) {
                (Err(RuleError::PoolSaturated { queue_depth }), Some(data)) => {
                    warn!(
                        "Pool saturated (queue depth {}); running {} locally",
                        queue_depth, entry.id
                    );
                    return run_rule(&self.table, entry.id, data, meta);
                },
                (result, _) => return result,
            }
        }

        run_rule(&self.table, entry.id, data, meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use crate::catalog::Namespace;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tracing_test::traced_test;

    /// Sink that claims capacity but rejects every job
    struct SaturatedSink;

    #[async_trait]
    impl JobSink for SaturatedSink {
        fn has_capacity(&self) -> bool {
            true
        }

        async fn wait_for_capacity(&self, _budget: Duration) -> bool {
            true
        }

        async fn submit_job(&self, _: RuleId, _: RuleData, _: &MetaData) -> Result<RuleData> {
            Err(RuleError::PoolSaturated { queue_depth: 0 })
        }
    }

    /// Sink that accepts every job and counts it
    #[derive(Default)]
    struct CountingSink {
        jobs: AtomicUsize,
    }

    #[async_trait]
    impl JobSink for CountingSink {
        fn has_capacity(&self) -> bool {
            true
        }

        async fn wait_for_capacity(&self, _budget: Duration) -> bool {
            true
        }

        async fn submit_job(
            &self,
            id: RuleId,
            data: RuleData,
            meta: &MetaData,
        ) -> Result<RuleData> {
            self.jobs.fetch_add(1, Ordering::SeqCst);
            run_rule(&RuleTable::from_ids(RuleId::ALL.iter().copied()), id, data, meta)
        }
    }

    fn broker() -> RuleBroker {
        RuleBroker::local(Arc::new(RuleRegistry::standard().unwrap()))
    }

    #[tokio::test]
    async fn test_pipeline_chains_stages() {
        let out = broker()
            .process_rules(json!(5), &MetaData::Empty, &[RuleId::Double, RuleId::AddOne])
            .await
            .unwrap();
        assert_eq!(out, json!(11));
    }

    #[tokio::test]
    async fn test_empty_pipeline_returns_input() {
        let input = json!({"untouched": [1, 2, 3]});
        let out = broker()
            .process_rules(input.clone(), &MetaData::Empty, &[])
            .await
            .unwrap();
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn test_metadata_is_carried_to_every_stage() {
        let out = broker()
            .process_rules(
                json!("  b a  b "),
                &MetaData::data("+"),
                &[RuleId::SplitWords, RuleId::UniqueSorted, RuleId::JoinArray],
            )
            .await
            .unwrap();
        assert_eq!(out, json!("a+b"));
    }

    #[tokio::test]
    async fn test_unregistered_rule_aborts_before_running() {
        let mut registry = RuleRegistry::new();
        registry.init_namespace(crate::catalog::Namespace::MathOperations);
        registry.register(
            crate::catalog::Namespace::MathOperations,
            vec![RuleId::Double.standard_entry()],
        );
        let broker = RuleBroker::local(Arc::new(registry));

        let err = broker
            .process_rules(json!(1), &MetaData::Empty, &[RuleId::Double, RuleId::TrimWhitespace])
            .await
            .unwrap_err();
        assert!(matches!(err, RuleError::RuleNotFound(name) if name == "trimWhitespace"));
    }

    #[tokio::test]
    async fn test_missing_dependency_aborts_before_running() {
        let mut registry = RuleRegistry::new();
        registry.init_namespace(Namespace::MathOperations);
        registry.init_namespace(Namespace::StringParsing);
        registry.register(Namespace::MathOperations, vec![RuleId::Double.standard_entry()]);
        // normalizeArray, its dependency, is never registered
        registry.register(
            Namespace::StringParsing,
            vec![RuleId::NormalizeValue.standard_entry()],
        );

        let sink = Arc::new(CountingSink::default());
        let broker =
            RuleBroker::with_pool(Arc::new(registry), Arc::clone(&sink), &EngineConfig::default());

        let err = broker
            .process_rules(json!(" A "), &MetaData::Empty, &[RuleId::NormalizeValue])
            .await
            .unwrap_err();
        assert!(matches!(err, RuleError::RuleNotFound(ref name) if name == "normalizeArray"));

        let err = broker
            .process_rules(json!(1), &MetaData::Empty, &[RuleId::Double, RuleId::NormalizeValue])
            .await
            .unwrap_err();
        assert!(matches!(err, RuleError::RuleNotFound(_)));
        assert_eq!(sink.jobs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_deeply_nested_input_stays_local() {
        let sink = Arc::new(CountingSink::default());
        let broker = RuleBroker::with_pool(
            Arc::new(RuleRegistry::standard().unwrap()),
            Arc::clone(&sink),
            &EngineConfig::default(),
        );
        let deep = (0..200).fold(json!(1), |inner, _| json!([inner]));
        let input = json!([deep.clone(), 2]);

        let out = broker
            .process_rules(input, &MetaData::Empty, &[RuleId::ReverseArray])
            .await
            .unwrap();
        assert_eq!(out, json!([2, deep]));
        assert_eq!(sink.jobs.load(Ordering::SeqCst), 0);

        let out = broker
            .process_rules(json!([1, 2]), &MetaData::Empty, &[RuleId::ReverseArray])
            .await
            .unwrap();
        assert_eq!(out, json!([2, 1]));
        assert_eq!(sink.jobs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stage_failure_aborts_pipeline() {
        let err = broker()
            .process_rules(json!(2), &MetaData::Empty, &[RuleId::Double, RuleId::TrimWhitespace])
            .await
            .unwrap_err();
        assert!(matches!(err, RuleError::RuleFailed { rule, .. } if rule == "trimWhitespace"));
    }

    #[test]
    fn test_internal_pipeline_runs_synchronously() {
        let out = broker()
            .process_rules_internal(
                json!([3, 1, 3]),
                &MetaData::Empty,
                &[RuleId::UniqueSorted, RuleId::Sum],
            )
            .unwrap();
        assert_eq!(out, json!(4));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_saturated_pool_falls_back_to_local() {
        let registry = Arc::new(RuleRegistry::standard().unwrap());

        let broker = RuleBroker::with_pool(
            Arc::clone(&registry),
            Arc::new(SaturatedSink),
            &EngineConfig::default(),
        );
        let out = broker
            .process_rules(json!(4), &MetaData::Empty, &[RuleId::Double])
            .await
            .unwrap();
        assert_eq!(out, json!(8));
        assert!(logs_contain("running double locally"));

        let strict = RuleBroker::with_pool(
            registry,
            Arc::new(SaturatedSink),
            &EngineConfig {
                fallback_on_saturation: false,
                ..Default::default()
            },
        );
        let err = strict
            .process_rules(json!(4), &MetaData::Empty, &[RuleId::Double])
            .await
            .unwrap_err();
        assert!(matches!(err, RuleError::PoolSaturated { .. }));
    }
}
