//! Migration phase events.
//!
//! Every phase boundary of a migration produces a [`MigrationEvent`]. Events
//! are always written to the tracing log; an optional [`MigrationHook`] is
//! awaited as well, which lets callers observe the phase sequence (or run
//! work in between phases) without parsing log lines.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use servegrid_backend::BoxFuture;
use tracing::{debug, error, info, warn};

/// Callback awaited at each migration phase boundary.
pub type MigrationHook = Arc<dyn Fn(MigrationEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Teardown step that failed after cutover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownStage {
    Shutdown,
    Deallocate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MigrationEvent {
    /// Target process started and bound to its node.
    Provisioned { instance_id: String, node_id: String },
    /// Target backend loaded the model.
    Initialized { instance_id: String },
    /// One batch of generation state forwarded to the target.
    DrainIteration {
        source_instance_id: String,
        target_instance_id: String,
        iteration: u64,
        tokens: usize,
    },
    /// Source state fell to the threshold; ready for cutover.
    DrainCompleted {
        source_instance_id: String,
        iterations: u64,
        residual_tokens: usize,
    },
    CutoverCompleted {
        retired_instance_id: String,
        instance_id: String,
    },
    /// Source vanished before cutover; the target was left running.
    CutoverAborted {
        source_instance_id: String,
        orphaned_instance_id: String,
    },
    /// Source backend shut down and its resources released.
    Retired { instance_id: String },
    TeardownFailed {
        instance_id: String,
        stage: TeardownStage,
        error: String,
    },
}

impl MigrationEvent {
    /// Short phase name, e.g. `"drain_iteration"`.
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Provisioned { .. } => "provisioned",
            Self::Initialized { .. } => "initialized",
            Self::DrainIteration { .. } => "drain_iteration",
            Self::DrainCompleted { .. } => "drain_completed",
            Self::CutoverCompleted { .. } => "cutover_completed",
            Self::CutoverAborted { .. } => "cutover_aborted",
            Self::Retired { .. } => "retired",
            Self::TeardownFailed { .. } => "teardown_failed",
        }
    }
}

/// Write an event to the tracing log at the level it deserves.
pub fn log_event(event: &MigrationEvent) {
    match event {
        MigrationEvent::Provisioned {
            instance_id,
            node_id,
        } => info!(%instance_id, %node_id, "instance provisioned"),
        MigrationEvent::Initialized { instance_id } => {
            info!(%instance_id, "backend initialized")
        }
        MigrationEvent::DrainIteration {
            source_instance_id,
            target_instance_id,
            iteration,
            tokens,
        } => debug!(
            source = %source_instance_id,
            target = %target_instance_id,
            iteration,
            tokens,
            "generation state forwarded"
        ),
        MigrationEvent::DrainCompleted {
            source_instance_id,
            iterations,
            residual_tokens,
        } => info!(
            source = %source_instance_id,
            iterations,
            residual_tokens,
            "drain completed"
        ),
        MigrationEvent::CutoverCompleted {
            retired_instance_id,
            instance_id,
        } => info!(
            retired = %retired_instance_id,
            %instance_id,
            "cutover completed"
        ),
        MigrationEvent::CutoverAborted {
            source_instance_id,
            orphaned_instance_id,
        } => error!(
            source = %source_instance_id,
            orphaned = %orphaned_instance_id,
            "source instance vanished before cutover, target left unregistered"
        ),
        MigrationEvent::Retired { instance_id } => info!(%instance_id, "instance retired"),
        MigrationEvent::TeardownFailed {
            instance_id,
            stage,
            error,
        } => warn!(%instance_id, ?stage, %error, "teardown step failed"),
    }
}

/// Where a migration sends its events.
#[derive(Clone, Default)]
pub struct EventSink {
    hook: Option<MigrationHook>,
}

impl EventSink {
    /// Create a sink that logs every event and awaits `hook` if set.
    pub fn new(hook: Option<MigrationHook>) -> Self {
        Self { hook }
    }

    /// Log `event` and hand it to the hook.
    pub async fn emit(&self, event: MigrationEvent) {
        log_event(&event);
        if let Some(hook) = &self.hook {
            hook(event).await;
        }
    }
}

/// Hook that keeps every event it sees.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<MigrationEvent>>>,
}

impl EventLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hook that appends each event to this log.
    pub fn hook(&self) -> MigrationHook {
        let events = Arc::clone(&self.events);
        Arc::new(move |event: MigrationEvent| -> BoxFuture<'static, ()> {
            events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event);
            Box::pin(async {})
        })
    }

    /// Events recorded so far, in emission order.
    pub fn events(&self) -> Vec<MigrationEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Phase names in the order they were emitted.
    pub fn phases(&self) -> Vec<&'static str> {
        self.events().iter().map(MigrationEvent::phase).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sink_without_hook_only_logs() {
        let sink = EventSink::default();
        sink.emit(MigrationEvent::Initialized {
            instance_id: "inst-a".to_string(),
        })
        .await;
    }

    #[tokio::test]
    async fn event_log_records_in_order() {
        let log = EventLog::new();
        let sink = EventSink::new(Some(log.hook()));

        sink.emit(MigrationEvent::Provisioned {
            instance_id: "inst-b".to_string(),
            node_id: "node-2".to_string(),
        })
        .await;
        sink.emit(MigrationEvent::Initialized {
            instance_id: "inst-b".to_string(),
        })
        .await;

        assert_eq!(log.phases(), vec!["provisioned", "initialized"]);
        assert_eq!(log.events().len(), 2);
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = MigrationEvent::TeardownFailed {
            instance_id: "inst-a".to_string(),
            stage: TeardownStage::Deallocate,
            error: "boom".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "teardown_failed");
        assert_eq!(json["stage"], "deallocate");
    }

    #[derive(Clone, Default)]
    struct LevelRecorder(Arc<Mutex<Vec<tracing::Level>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for LevelRecorder {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            self.0.lock().unwrap().push(*event.metadata().level());
        }
    }

    fn logged_level(event: &MigrationEvent) -> Vec<tracing::Level> {
        use tracing_subscriber::layer::SubscriberExt;

        let recorder = LevelRecorder::default();
        let subscriber = tracing_subscriber::registry().with(recorder.clone());
        tracing::subscriber::with_default(subscriber, || log_event(event));
        let levels = recorder.0.lock().unwrap().clone();
        levels
    }

    #[test]
    fn cutover_aborted_is_logged_as_error() {
        let event = MigrationEvent::CutoverAborted {
            source_instance_id: "inst-a".to_string(),
            orphaned_instance_id: "inst-b".to_string(),
        };
        assert_eq!(logged_level(&event), vec![tracing::Level::ERROR]);
    }

    #[test]
    fn teardown_failure_is_logged_as_warning() {
        let event = MigrationEvent::TeardownFailed {
            instance_id: "inst-a".to_string(),
            stage: TeardownStage::Shutdown,
            error: "boom".to_string(),
        };
        assert_eq!(logged_level(&event), vec![tracing::Level::WARN]);

        let retired = MigrationEvent::Retired {
            instance_id: "inst-a".to_string(),
        };
        assert_eq!(logged_level(&retired), vec![tracing::Level::INFO]);
    }
}
