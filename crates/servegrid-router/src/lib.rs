//! servegrid-router: routing and live migration of model-serving instances.
//!
//! A router owns the registry of routable instances for one model. On top of
//! round-robin routing it can move a serving instance to another node while
//! carrying its generation state (KV cache) across.
//!
//! # Migration phases
//!
//! ```text
//! MigrationExecutor::execute_migration_plan
//!   1. provision   start a process pinned to the target node
//!   2. register    build the handle, bind node, mark Ready (not routable yet)
//!   3. initialize  load the model on the new backend
//!   4. drain       fetch source state, inject into target, until ≤ threshold
//!   5. cutover     swap source → target in the registry under its lock
//!   6. retire      shutdown + terminate source, release its resources
//! ```
//!
//! Failures in 1–4 are returned to the caller and leave the registry
//! untouched. A cutover whose source has vanished is reported as
//! [`MigrationOutcome::CutoverAborted`]. Failures in 6 are logged only.

pub mod config;
pub mod context;
pub mod drain;
pub mod error;
pub mod events;
pub mod executor;
pub mod lifecycle;
pub mod load_balancer;
pub mod router;
pub mod status;

pub use config::{MigrationConfig, RouterConfig};
pub use context::{ClusterClients, RouterContext};
pub use drain::{DrainPolicy, DrainReport, drain_generation_state};
pub use error::{DrainStop, RouterError, RouterResult};
pub use events::{EventLog, EventSink, MigrationEvent, MigrationHook, TeardownStage};
pub use executor::{MigrationExecutor, MigrationOutcome};
pub use load_balancer::RoundRobinBalancer;
pub use router::RoundRobinRouter;
pub use status::get_instance_status;
