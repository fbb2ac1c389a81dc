//! Batch mode: one pipeline request per stdin line, one result line per request
//!
//! Request: `{"input": .., "meta": .., "pattern": "..", "pipeline": ["double", ..]}`
//! Response: `{"ok": ..}` or `{"error": ".."}`

use anyhow::{bail, Result};
use ruleforge_engine::{MetaData, RuleBroker, RuleId};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchRequest {
    pub input: Value,
    #[serde(default)]
    pub meta: Value,
    #[serde(default)]
    pub pattern: Option<String>,
    pub pipeline: Vec<RuleId>,
}

impl BatchRequest {
    fn metadata(&self) -> ruleforge_engine::Result<MetaData> {
        match &self.pattern {
            Some(pattern) => MetaData::pattern(pattern),
            None => Ok(MetaData::from(self.meta.clone())),
        }
    }
}

/// Process one request line into its response line
pub async fn handle_line(broker: &RuleBroker, line: &str) -> (Value, bool) {
    let request: BatchRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return (json!({ "error": format!("invalid request: {}", e) }), false),
    };

    let meta = match request.metadata() {
        Ok(meta) => meta,
        Err(e) => return (json!({ "error": e.to_string() }), false),
    };

    match broker
        .process_rules(request.input, &meta, &request.pipeline)
        .await
    {
        Ok(value) => (json!({ "ok": value }), true),
        Err(e) => (json!({ "error": e.to_string() }), false),
    }
}

/// Read requests from stdin until EOF or a shutdown signal
pub async fn run(broker: &RuleBroker) -> Result<()> {
    let mut shutdown = common::shutdown::shutdown_flag();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    let (mut total, mut failed) = (0usize, 0usize);
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = shutdown.changed() => {
                if let Some(signal) = *shutdown.borrow() {
                    warn!("Batch interrupted by {} after {} requests", signal, total);
                }
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        total += 1;
        let (response, ok) = handle_line(broker, &line).await;
        if !ok {
            failed += 1;
            debug!("Request {} failed: {}", total, response);
        }

        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }

    info!("Batch finished: {} requests, {} failed", total, failed);
    if failed > 0 {
        bail!("{} of {} requests failed", failed, total);
    }
    Ok(())
}
