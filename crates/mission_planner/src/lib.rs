//! Centralized mission planner for a heterogeneous fleet.
//!
//! Tasks come in, get validated against the [`MissionCatalog`], and are
//! handed to the cheapest capable agent whose battery allows it. Every agent
//! gets its whole ordered queue on each change and must acknowledge it; an
//! unacknowledged queue is rolled back. Agents that stop beaconing lose their
//! queue to the others.

pub mod agent;
pub mod allocator;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod cost;
pub mod error;
pub mod liveness;
pub mod metrics;
pub mod runtime;
pub mod task;

pub use agent::{AgentRecord, Liveness};
pub use catalog::MissionCatalog;
pub use config::PlannerConfig;
pub use coordinator::{AgentSnapshot, Coordinator, FleetSnapshot};
pub use cost::{CostOracle, StraightLine};
pub use error::PlannerError;
pub use metrics::Metrics;
pub use runtime::{OutboundDispatch, Planner, PlannerEvent, PlannerHandle};
pub use task::{Task, TaskStatus};
