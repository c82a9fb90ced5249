use axum::{response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Prometheus collectors of the mission planner.
///
/// Wrapped in an `Arc` and shared between the coordinator and the HTTP
/// endpoint that exposes it.
pub struct Metrics {
    pub registry: Registry,
    /// Tasks accepted by ingestion.
    pub tasks_ingested_total: IntCounter,
    pub tasks_succeeded_total: IntCounter,
    /// Failed results reported by agents, retried or not.
    pub tasks_failed_total: IntCounter,
    /// Tasks dropped after exhausting their attempts.
    pub tasks_abandoned_total: IntCounter,
    pub allocation_passes_total: IntCounter,
    /// Times a task found no feasible agent in a pass.
    pub allocation_stalls_total: IntCounter,
    pub assignments_total: IntCounter,
    pub agents_lost_total: IntCounter,
    pub agents_recovered_total: IntCounter,
    /// Dispatches that were rejected or never acknowledged.
    pub dispatch_rollbacks_total: IntCounter,
    pub agents_alive: IntGauge,
    pub pending_tasks: IntGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Creates a new `Metrics` struct, initializing and registering all collectors.
    pub fn new() -> Self {
        // A custom registry keeps several planners in one process apart.
        let registry = Registry::new_custom(Some("mission_planner".into()), None)
            .expect("Failed to create custom metrics registry");

        macro_rules! reg {
            ($metric:expr) => {{
                let collector = $metric.expect("Failed to create metric");
                registry
                    .register(Box::new(collector.clone()))
                    .expect("Failed to register metric");
                collector
            }};
        }

        Self {
            tasks_ingested_total: reg!(IntCounter::new(
                "tasks_ingested_total",
                "Total number of tasks accepted by ingestion"
            )),
            tasks_succeeded_total: reg!(IntCounter::new(
                "tasks_succeeded_total",
                "Total number of tasks reported as succeeded"
            )),
            tasks_failed_total: reg!(IntCounter::new(
                "tasks_failed_total",
                "Total number of failed task results"
            )),
            tasks_abandoned_total: reg!(IntCounter::new(
                "tasks_abandoned_total",
                "Total number of tasks dropped after too many failures"
            )),
            allocation_passes_total: reg!(IntCounter::new(
                "allocation_passes_total",
                "Total number of allocation passes run"
            )),
            allocation_stalls_total: reg!(IntCounter::new(
                "allocation_stalls_total",
                "Total number of times a task had no feasible agent"
            )),
            assignments_total: reg!(IntCounter::new(
                "assignments_total",
                "Total number of task to agent assignments"
            )),
            agents_lost_total: reg!(IntCounter::new(
                "agents_lost_total",
                "Total number of agents declared lost"
            )),
            agents_recovered_total: reg!(IntCounter::new(
                "agents_recovered_total",
                "Total number of agents that beaconed again after being suspected or lost"
            )),
            dispatch_rollbacks_total: reg!(IntCounter::new(
                "dispatch_rollbacks_total",
                "Total number of dispatches rolled back"
            )),
            agents_alive: reg!(IntGauge::new(
                "agents_alive",
                "Number of agents currently alive"
            )),
            pending_tasks: reg!(IntGauge::new(
                "pending_tasks",
                "Number of tasks waiting for an agent"
            )),
            registry,
        }
    }

    /// Creates an `axum::Router` that serves the metrics on the `/metrics` endpoint.
    pub fn router(&self) -> Router {
        let registry = self.registry.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let registry = registry.clone();
                async move {
                    let metric_families = registry.gather();
                    let mut buffer = Vec::new();
                    if let Err(e) = TextEncoder::new().encode(&metric_families, &mut buffer) {
                        tracing::error!(error = %e, "Failed to encode metrics");
                    }
                    String::from_utf8_lossy(&buffer).into_owned().into_response()
                }
            }),
        )
    }
}
