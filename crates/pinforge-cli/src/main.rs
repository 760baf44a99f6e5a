//! pinforge - build every package in a fresh runtime and pin what it pulled in
//!
//! With no arguments, `pinforge` processes `packages/<platform-tag>/` under
//! the current directory one package at a time: reset the working runtime,
//! rebuild, purge caches, build, write `constraints/<pkg>-constraint.txt`
//! and run the package's declared tests.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::Parser;
use pinforge_ci::{BuildEnv, FailurePolicy, Orchestrator, OrchestratorConfig, RunReport};
use pinforge_core::{init_tracing, Console};
use tracing::{error, info, Level};

#[derive(Parser, Debug)]
#[command(name = "pinforge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Per-package build, constraint and test orchestrator", long_about = None)]
struct Cli {
    /// Layout root containing the runtime and `packages/`
    #[arg(long, env = "PINFORGE_ROOT", default_value = ".")]
    root: PathBuf,

    /// Package sub-directory to process instead of the host's
    #[arg(long, env = "PINFORGE_PLATFORM_TAG")]
    platform_tag: Option<String>,

    /// Interpreter path relative to a runtime directory
    #[arg(long, env = "PINFORGE_INTERPRETER")]
    interpreter: Option<PathBuf>,

    /// Warn about failures and process every package instead of stopping
    #[arg(long, env = "PINFORGE_KEEP_GOING", value_parser = BoolishValueParser::new())]
    keep_going: bool,

    /// Kill build and test subprocesses after this many seconds (0 = never)
    #[arg(long, env = "PINFORGE_TIMEOUT_SECS", default_value_t = 0)]
    timeout_secs: u64,

    /// Extra KEY=VALUE for build and test subprocesses (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_assignment)]
    env: Vec<(String, String)>,

    /// Write a JSON run report to this file
    #[arg(long, env = "PINFORGE_REPORT")]
    report: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            root: self.root.clone(),
            platform_tag: self.platform_tag.clone(),
            interpreter: self.interpreter.clone(),
            policy: FailurePolicy::from_abort_flag(!self.keep_going),
            timeout_secs: self.timeout_secs,
            env: BuildEnv::from_pairs(self.env.iter().cloned()),
        }
    }
}

fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    BuildEnv::parse_assignment(raw).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let config = cli.orchestrator_config();
    info!(root = %config.root.display(), policy = ?config.policy, "pinforge starting");

    let console = Console::stdio();
    let orchestrator = Orchestrator::new(config, console.clone());
    let result = match orchestrator.run().await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Environment check failed");
            console.fatal(&e.to_string());
            std::process::exit(1);
        }
    };

    if let Some(path) = &cli.report {
        RunReport::from_result(&result)
            .write(path)
            .with_context(|| format!("Failed to write run report to {}", path.display()))?;
        info!(path = %path.display(), "Wrote run report");
    }

    std::process::exit(result.exit_code());
}
