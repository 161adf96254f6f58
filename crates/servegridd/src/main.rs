//! servegridd: the ServeGrid daemon.
//!
//! Drives the router and migration subsystems against an in-process cluster.
//!
//! # Usage
//!
//! ```text
//! servegridd run --scenario scenarios/migrate-opt.toml
//! servegridd check --scenario scenarios/migrate-opt.toml
//! ```
//!
//! The run report is printed to stdout as JSON; logs go to stderr.

mod scenario;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::scenario::Scenario;

#[derive(Parser)]
#[command(name = "servegridd", about = "ServeGrid daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Place a source instance and migrate it as described by a scenario.
    Run {
        /// Scenario file (TOML).
        #[arg(long)]
        scenario: PathBuf,
    },
    /// Parse and validate a scenario without running it.
    Check {
        #[arg(long)]
        scenario: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Command::Run { scenario } => run(scenario).await,
        Command::Check { scenario } => {
            let scenario = Scenario::from_file(&scenario)?;
            println!("{}", serde_json::to_string_pretty(&scenario.migration)?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,servegridd=debug,servegrid_router=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(path: PathBuf) -> anyhow::Result<()> {
    let scenario = Scenario::from_file(&path)?;
    info!(
        path = %path.display(),
        model = %scenario.router.model_name,
        source_node = %scenario.source_node,
        target_node = %scenario.target_node,
        "running migration scenario"
    );

    let report = scenario::run(&scenario).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.succeeded() {
        let reason = report.error.as_deref().unwrap_or("cutover aborted");
        anyhow::bail!("migration failed: {reason}");
    }
    Ok(())
}
