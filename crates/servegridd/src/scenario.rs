//! Migration scenarios run against an in-process cluster.
//!
//! A scenario places one source instance, scripts the generation states its
//! backend reports, migrates it to a target node and collects what happened.
//!
//! ```toml
//! source_node = "node-1"
//! target_node = "node-2"
//! generation_state_lengths = [42, 25, 8]
//!
//! [router]
//! model_name = "facebook/opt-6.7b"
//!
//! [migration]
//! max_drain_iterations = 1000
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use servegrid_backend::{LocalCluster, TokenId};
use servegrid_router::{
    ClusterClients, EventLog, MigrationConfig, MigrationEvent, MigrationOutcome, RoundRobinRouter,
    RouterConfig,
};
use servegrid_state::{InstanceStatus, MigrationPlan};
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub router: RouterConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
    /// Fixed id for the source; a fresh one is generated when unset.
    #[serde(default)]
    pub source_instance_id: Option<String>,
    pub source_node: String,
    pub target_node: String,
    /// Lengths of the successive states the source reports while draining.
    #[serde(default)]
    pub generation_state_lengths: Vec<usize>,
    /// Length reported once the scripted states run out. Empty by default.
    #[serde(default)]
    pub steady_state_length: Option<usize>,
}

impl Scenario {
    /// Parse and validate a scenario document.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let scenario: Scenario = toml::from_str(content).context("invalid scenario")?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Load and validate a scenario file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Check router, migration and node settings.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.router.validate()?;
        self.migration.validate()?;
        if self.source_node.is_empty() || self.target_node.is_empty() {
            bail!("source_node and target_node must not be empty");
        }
        if self.source_instance_id.as_deref() == Some("") {
            bail!("source_instance_id must not be empty");
        }
        Ok(())
    }

    fn scripted_states(&self) -> Vec<Vec<TokenId>> {
        self.generation_state_lengths
            .iter()
            .map(|&len| tokens(len))
            .collect()
    }
}

fn tokens(len: usize) -> Vec<TokenId> {
    (0..len).map(|i| i as TokenId).collect()
}

/// Everything observable after a scenario ran.
#[derive(Debug, Serialize)]
pub struct Report {
    pub source_instance_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<MigrationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Routable instances after the migration.
    pub instances: Vec<InstanceStatus>,
    pub events: Vec<MigrationEvent>,
    /// Inject calls received by each instance, as batch lengths.
    pub injected_batches: Vec<usize>,
}

impl Report {
    /// Whether the migration completed its cutover.
    pub fn succeeded(&self) -> bool {
        self.outcome.as_ref().is_some_and(MigrationOutcome::is_completed)
    }
}

/// Run `scenario` to completion. Migration failures end up in the report;
/// only setup failures are returned as errors.
pub async fn run(scenario: &Scenario) -> anyhow::Result<Report> {
    let cluster = LocalCluster::new();
    let router = Arc::new(RoundRobinRouter::new(
        scenario.router.clone(),
        ClusterClients::local(&cluster),
    )?);

    let source_instance_id = match &scenario.source_instance_id {
        Some(id) => {
            router.place_instance_as(id, &scenario.source_node).await?;
            id.clone()
        }
        None => router.place_instance(&scenario.source_node).await?,
    };
    cluster.script_generation_states(&source_instance_id, scenario.scripted_states());
    if let Some(len) = scenario.steady_state_length {
        cluster.set_steady_state(&source_instance_id, tokens(len));
    }

    let log = EventLog::new();
    let executor = router
        .migration_executor(&scenario.migration)?
        .with_hook(log.hook());
    let plan = MigrationPlan::new(source_instance_id.clone(), scenario.target_node.clone());

    let (outcome, error) = match executor.execute_migration_plan(&plan).await {
        Ok(outcome) => {
            info!(source = %source_instance_id, outcome = ?outcome, "scenario finished");
            (Some(outcome), None)
        }
        Err(e) => {
            warn!(source = %source_instance_id, error = %e, "migration failed");
            (None, Some(e.to_string()))
        }
    };

    Ok(Report {
        source_instance_id,
        outcome,
        error,
        instances: router.list_instances().await,
        events: log.events(),
        injected_batches: cluster.injected().iter().map(|(_, batch)| batch.len()).collect(),
    })
}
