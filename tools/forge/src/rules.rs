//! Rule commands: list, run, submit

use anyhow::{bail, Context, Result};
use colored::*;
use ruleforge_engine::{
    parse_pipeline, MetaData, MetaKind, Namespace, RuleBroker, RuleId, RuleRegistry,
};
use serde_json::Value;
use tracing::debug;

/// Build pipeline metadata from `--meta` / `--pattern`
pub fn metadata_from_args(meta: Option<&str>, pattern: Option<&str>) -> Result<MetaData> {
    match (meta, pattern) {
        (Some(_), Some(_)) => bail!("--meta and --pattern are mutually exclusive"),
        (Some(json), None) => {
            let value: Value = serde_json::from_str(json).context("--meta is not valid JSON")?;
            Ok(MetaData::from(value))
        },
        (None, Some(pattern)) => Ok(MetaData::pattern(pattern)?),
        (None, None) => Ok(MetaData::Empty),
    }
}

pub fn parse_input(input: &str) -> Result<Value> {
    serde_json::from_str(input).context("--input is not valid JSON")
}

/// Print registered rules, optionally limited to one namespace
pub fn list(registry: &RuleRegistry, namespace: Option<&str>) -> Result<()> {
    let namespaces: Vec<Namespace> = match namespace {
        Some(name) => vec![name.parse()?],
        None => registry.namespaces().collect(),
    };

    for ns in namespaces {
        println!("{}", ns.to_string().bright_cyan().bold());
        for entry in registry.entries(ns) {
            let threadable = if entry.threadable {
                "threadable".green()
            } else {
                "local-only".yellow()
            };
            let meta = match entry.meta_kind() {
                MetaKind::None => String::new(),
                kind => format!(" meta={}", kind),
            };
            let deps = if entry.dependencies.is_empty() {
                String::new()
            } else {
                let names: Vec<&str> = entry.dependencies.iter().map(|d| d.name()).collect();
                format!(" deps=[{}]", names.join(", "))
            };

            println!(
                "  {:<20} {}{}{}  {}",
                entry.id.name().bright_white(),
                threadable,
                meta,
                deps,
                entry.source_location.dimmed()
            );
        }
    }
    Ok(())
}

/// Run a pipeline and print the result
pub async fn run(broker: &RuleBroker, pipeline: &str, input: Value, meta: &MetaData) -> Result<()> {
    let pipeline = parse_pipeline(pipeline)?;
    debug!("Running pipeline of {} rules", pipeline.len());

    let output = broker
        .process_rules(input, meta, &pipeline)
        .await
        .context("Pipeline failed")?;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Submit one job straight to the worker pool and print the result
pub async fn submit(broker: &RuleBroker, rule: &str, input: Value, meta: &MetaData) -> Result<()> {
    let rule: RuleId = rule.parse()?;
    let Some(pool) = broker.pool() else {
        bail!("Worker pool is disabled (threading_enabled = false or --no-threads)");
    };

    let result = pool
        .submit(rule, input, meta)
        .await
        .with_context(|| format!("Job for {} failed", rule))?;

    eprintln!(
        "{} {} on worker {}",
        "Completed".bright_green(),
        result.job_id,
        result.worker_id
    );
    println!("{}", serde_json::to_string_pretty(&result.value)?);
    Ok(())
}
