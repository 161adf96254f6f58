//! Drain loop: streams generation state from a source to a target backend.
//!
//! Each iteration fetches the source's current generation state. A state at
//! or below the threshold is cheap enough to drop and ends the loop;
//! anything longer is injected into the target (fire-and-forget) and the
//! loop goes again immediately.
//!
//! The handover is best-effort: the target is never guaranteed to hold the
//! source's final state, only everything but a residual tail of at most
//! `threshold` tokens. Without bounds the loop runs until the source
//! converges, however long that takes.

use std::time::Duration;

use servegrid_state::InstanceHandle;
use tokio::time::Instant;
use tracing::trace;

use crate::error::{DrainStop, RouterError, RouterResult};
use crate::events::{EventSink, MigrationEvent};

/// Residual token count below which the remaining state is dropped.
pub const DEFAULT_DRAIN_THRESHOLD: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainPolicy {
    pub threshold: usize,
    /// Maximum number of fetches. `None` never gives up.
    pub max_iterations: Option<u64>,
    /// Wall-clock bound on the whole drain. `None` never gives up.
    pub timeout: Option<Duration>,
}

impl Default for DrainPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_DRAIN_THRESHOLD,
            max_iterations: None,
            timeout: None,
        }
    }
}

/// What a completed drain did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Fetch calls issued, including the final one.
    pub iterations: u64,
    /// Inject calls issued; always `iterations - 1`.
    pub injected_batches: u64,
    pub injected_tokens: usize,
    /// Length of the last fetched state, which was dropped.
    pub residual_tokens: usize,
}

/// Drain `source` into `target` until the source state falls to the
/// threshold.
///
/// Returns [`RouterError::DrainIncomplete`] when a configured bound is hit
/// and [`RouterError::DrainFailed`] when a fetch fails.
pub async fn drain_generation_state(
    source: &InstanceHandle,
    target: &InstanceHandle,
    policy: &DrainPolicy,
    events: &EventSink,
) -> RouterResult<DrainReport> {
    // A timeout too large to represent as an instant never fires.
    let deadline = policy
        .timeout
        .and_then(|timeout| Instant::now().checked_add(timeout));
    let mut report = DrainReport::default();

    loop {
        if let Some(reason) = bound_reached(policy, deadline, report.iterations) {
            return Err(RouterError::DrainIncomplete {
                target_instance_id: target.instance_id().to_string(),
                iterations: report.iterations,
                reason,
            });
        }

        let fetch = source.backend().fetch_generation_state();
        let fetched = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, fetch).await {
                Ok(fetched) => fetched,
                Err(_) => {
                    return Err(RouterError::DrainIncomplete {
                        target_instance_id: target.instance_id().to_string(),
                        iterations: report.iterations,
                        reason: DrainStop::Timeout,
                    });
                }
            },
            None => fetch.await,
        };
        let tokens = fetched.map_err(|source_err| RouterError::DrainFailed {
            instance_id: source.instance_id().to_string(),
            target_instance_id: target.instance_id().to_string(),
            source: source_err,
        })?;
        report.iterations += 1;
        trace!(iteration = report.iterations, tokens = tokens.len(), "generation state fetched");

        if tokens.len() <= policy.threshold {
            report.residual_tokens = tokens.len();
            events
                .emit(MigrationEvent::DrainCompleted {
                    source_instance_id: source.instance_id().to_string(),
                    iterations: report.iterations,
                    residual_tokens: report.residual_tokens,
                })
                .await;
            return Ok(report);
        }

        let count = tokens.len();
        target.backend().inject_generation_state(tokens);
        report.injected_batches += 1;
        report.injected_tokens += count;

        events
            .emit(MigrationEvent::DrainIteration {
                source_instance_id: source.instance_id().to_string(),
                target_instance_id: target.instance_id().to_string(),
                iteration: report.iterations,
                tokens: count,
            })
            .await;
    }
}

fn bound_reached(policy: &DrainPolicy, deadline: Option<Instant>, iterations: u64) -> Option<DrainStop> {
    if policy.max_iterations.is_some_and(|max| iterations >= max) {
        return Some(DrainStop::IterationBudget);
    }
    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
        return Some(DrainStop::Timeout);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use servegrid_backend::{
        BackendDirectory, LocalCluster, Provisioner, ResourceRequirements, StartInstanceRequest,
        StartupConfig,
    };

    async fn started(cluster: &LocalCluster, instance_id: &str, node_id: &str) -> InstanceHandle {
        cluster
            .start_instance(StartInstanceRequest {
                instance_id: instance_id.to_string(),
                model_name: "opt".to_string(),
                backend_kind: "transformers".to_string(),
                backend_config: serde_json::json!({}),
                startup: StartupConfig::pinned_to(node_id, &ResourceRequirements::default()),
            })
            .await
            .unwrap();
        let handle = InstanceHandle::new(instance_id, 10, 1, cluster.resolve(instance_id).unwrap());
        handle.mark_ready(node_id).await.unwrap();
        handle
    }

    fn tokens(n: usize) -> Vec<u32> {
        (0..n as u32).collect()
    }

    #[tokio::test]
    async fn stops_when_state_crosses_threshold() {
        let cluster = LocalCluster::new();
        let source = started(&cluster, "src", "node-1").await;
        let target = started(&cluster, "dst", "node-2").await;
        cluster.script_generation_states("src", vec![tokens(40), tokens(30), tokens(20), tokens(10)]);

        let report = drain_generation_state(&source, &target, &DrainPolicy::default(), &EventSink::default())
            .await
            .unwrap();

        assert_eq!(report.iterations, 4);
        assert_eq!(report.injected_batches, 3);
        assert_eq!(report.injected_tokens, 90);
        assert_eq!(report.residual_tokens, 10);
        assert_eq!(cluster.fetch_count("src"), 4);
        assert_eq!(
            cluster.injected_into("dst"),
            vec![tokens(40), tokens(30), tokens(20)]
        );
    }

    #[tokio::test]
    async fn empty_state_ends_immediately() {
        let cluster = LocalCluster::new();
        let source = started(&cluster, "src", "node-1").await;
        let target = started(&cluster, "dst", "node-2").await;

        let report = drain_generation_state(&source, &target, &DrainPolicy::default(), &EventSink::default())
            .await
            .unwrap();

        assert_eq!(report.iterations, 1);
        assert_eq!(report.injected_batches, 0);
        assert_eq!(report.residual_tokens, 0);
        assert!(cluster.injected().is_empty());
    }

    #[tokio::test]
    async fn threshold_is_inclusive() {
        let cluster = LocalCluster::new();
        let source = started(&cluster, "src", "node-1").await;
        let target = started(&cluster, "dst", "node-2").await;
        cluster.script_generation_states("src", vec![tokens(11), tokens(10)]);

        let report = drain_generation_state(&source, &target, &DrainPolicy::default(), &EventSink::default())
            .await
            .unwrap();

        assert_eq!(report.iterations, 2);
        assert_eq!(cluster.injected_into("dst"), vec![tokens(11)]);
    }

    #[tokio::test]
    async fn custom_threshold() {
        let cluster = LocalCluster::new();
        let source = started(&cluster, "src", "node-1").await;
        let target = started(&cluster, "dst", "node-2").await;
        cluster.script_generation_states("src", vec![tokens(100), tokens(50)]);

        let policy = DrainPolicy {
            threshold: 64,
            ..DrainPolicy::default()
        };
        let report = drain_generation_state(&source, &target, &policy, &EventSink::default())
            .await
            .unwrap();

        assert_eq!(report.iterations, 2);
        assert_eq!(report.residual_tokens, 50);
    }

    #[tokio::test]
    async fn iteration_budget_detects_non_convergence() {
        let cluster = LocalCluster::new();
        let source = started(&cluster, "src", "node-1").await;
        let target = started(&cluster, "dst", "node-2").await;
        cluster.set_steady_state("src", tokens(11));

        let policy = DrainPolicy {
            max_iterations: Some(25),
            ..DrainPolicy::default()
        };
        let err = drain_generation_state(&source, &target, &policy, &EventSink::default())
            .await
            .unwrap_err();

        match err {
            RouterError::DrainIncomplete {
                target_instance_id,
                iterations,
                reason,
            } => {
                assert_eq!(target_instance_id, "dst");
                assert_eq!(iterations, 25);
                assert_eq!(reason, DrainStop::IterationBudget);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(cluster.fetch_count("src"), 25);
        assert_eq!(cluster.injected_into("dst").len(), 25);
    }

    #[tokio::test]
    async fn timeout_detects_non_convergence() {
        let cluster = LocalCluster::new();
        let source = started(&cluster, "src", "node-1").await;
        let target = started(&cluster, "dst", "node-2").await;
        cluster.set_steady_state("src", tokens(11));

        let policy = DrainPolicy {
            timeout: Some(Duration::from_millis(20)),
            ..DrainPolicy::default()
        };
        let err = drain_generation_state(&source, &target, &policy, &EventSink::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RouterError::DrainIncomplete {
                reason: DrainStop::Timeout,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn oversized_timeout_is_treated_as_unbounded() {
        let cluster = LocalCluster::new();
        let source = started(&cluster, "src", "node-1").await;
        let target = started(&cluster, "dst", "node-2").await;
        cluster.script_generation_states("src", vec![tokens(30), tokens(3)]);

        let policy = DrainPolicy {
            timeout: Some(Duration::from_secs(i64::MAX as u64)),
            ..DrainPolicy::default()
        };
        let report = drain_generation_state(&source, &target, &policy, &EventSink::default())
            .await
            .unwrap();

        assert_eq!(report.iterations, 2);
        assert_eq!(cluster.injected_into("dst"), vec![tokens(30)]);
    }

    #[tokio::test]
    async fn fetch_failure_is_reported() {
        let cluster = LocalCluster::new();
        let source = started(&cluster, "src", "node-1").await;
        let target = started(&cluster, "dst", "node-2").await;
        source.backend().terminate();

        let err = drain_generation_state(&source, &target, &DrainPolicy::default(), &EventSink::default())
            .await
            .unwrap_err();

        assert!(matches!(err, RouterError::DrainFailed { .. }));
    }
}
