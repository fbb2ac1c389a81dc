//! Forge - command-line front end for the Ruleforge engine
//!
//! Lists registered rules, runs pipelines (in-process or through the worker
//! pool) and serves JSON-line batches from stdin.

mod batch;
mod config;
mod rules;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use ruleforge_engine::{RuleBroker, RuleRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::config::{ForgeConfig, Overrides};

#[derive(Parser)]
#[command(name = "forge")]
#[command(about = "Forge - run Ruleforge rule pipelines")]
#[command(long_about = "Forge - run Ruleforge rule pipelines

Commands:
  list        Show registered rules and their dispatch metadata
  run         Run a pipeline of rules over a JSON input
  submit      Submit one rule directly to the worker pool
  batch       Run JSON-line requests from stdin

Examples:
  forge list --namespace mathOperations
  forge run --pipeline double,addOne --input 5
  forge run --pipeline splitWords,joinArray --input '\"a  b\"' --meta '\"-\"'
  forge submit --rule average --input '[1, 2, 3]'
  echo '{\"input\": 5, \"pipeline\": [\"double\"]}' | forge batch")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Force worker-pool offloading on
    #[arg(long, global = true, conflicts_with = "no_threads")]
    threads: bool,

    /// Run every rule in-process
    #[arg(long, global = true)]
    no_threads: bool,

    /// Number of worker threads
    #[arg(long, global = true)]
    pool_size: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered rules
    List {
        /// Only rules in this namespace (stringParsing, arrayParsing, mathOperations)
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Run a pipeline
    Run {
        /// Comma separated rule names, e.g. "double,addOne"
        #[arg(short, long)]
        pipeline: String,

        /// Input data as JSON
        #[arg(short, long)]
        input: String,

        /// Pipeline metadata as JSON
        #[arg(short, long)]
        meta: Option<String>,

        /// Regular expression metadata (forces in-process execution)
        #[arg(long)]
        pattern: Option<String>,
    },

    /// Submit a single rule to the worker pool
    Submit {
        /// Rule name
        #[arg(short, long)]
        rule: String,

        /// Input data as JSON
        #[arg(short, long)]
        input: String,

        /// Metadata as JSON
        #[arg(short, long)]
        meta: Option<String>,
    },

    /// Process JSON-line requests from stdin
    Batch,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        let threads = match (self.threads, self.no_threads) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        Overrides {
            threads,
            pool_size: self.pool_size,
            verbose: self.verbose,
            no_color: self.no_color,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "ERROR".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = ForgeConfig::load(cli.config.as_deref(), cli.overrides())?;
    common::logging::init_with_config(config.logging.clone())
        .context("Failed to initialize logging")?;
    debug!("Engine configuration: {:?}", config.engine);

    let registry = Arc::new(RuleRegistry::standard().context("Failed to build rule registry")?);

    if let Commands::List { namespace } = &cli.command {
        return rules::list(&registry, namespace.as_deref());
    }

    let broker = RuleBroker::start(registry, &config.engine).context("Failed to start engine")?;
    let result = match cli.command {
        Commands::List { .. } => Ok(()),
        Commands::Run {
            pipeline,
            input,
            meta,
            pattern,
        } => {
            let meta = rules::metadata_from_args(meta.as_deref(), pattern.as_deref())?;
            let input = rules::parse_input(&input)?;
            rules::run(&broker, &pipeline, input, &meta).await
        },
        Commands::Submit { rule, input, meta } => {
            let meta = rules::metadata_from_args(meta.as_deref(), None)?;
            let input = rules::parse_input(&input)?;
            rules::submit(&broker, &rule, input, &meta).await
        },
        Commands::Batch => batch::run(&broker).await,
    };

    broker.shutdown().await;
    result
}
