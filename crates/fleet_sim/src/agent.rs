use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use api::{AgentId, Beacon, DispatchAck, Position, TaskAssignment, TaskKind, TaskOutcome, TaskResult};
use mission_planner::{OutboundDispatch, PlannerError, PlannerHandle};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

use crate::config::AgentSpec;
use crate::metrics::FleetMetrics;

const AGENT_TICK_RATE_HZ: u64 = 10;
/// Distance under which a route point counts as reached.
const ARRIVAL_TOLERANCE_M: f64 = 0.5;

/// Physical model shared by every simulated agent.
#[derive(Debug, Clone, Copy)]
pub struct AgentModel {
    pub speed_mps: f64,
    pub drain_per_meter: f64,
    pub beacon_interval: Duration,
    pub failure_percent: u8,
}

/// Headless stand-in for one vehicle.
pub struct SimAgent {
    spec: AgentSpec,
    model: AgentModel,
    position: Position,
    battery: f64,
    plan: VecDeque<TaskAssignment>,
    /// Index of the next point of the head task's route.
    waypoint: usize,
    last_transaction: Option<u64>,
    planner: PlannerHandle,
    metrics: Arc<FleetMetrics>,
}

impl SimAgent {
    pub fn new(
        spec: AgentSpec,
        model: AgentModel,
        start: Position,
        planner: PlannerHandle,
        metrics: Arc<FleetMetrics>,
    ) -> Self {
        Self {
            spec,
            model,
            position: start,
            battery: 1.0,
            plan: VecDeque::new(),
            waypoint: 0,
            last_transaction: None,
            planner,
            metrics,
        }
    }

    fn id(&self) -> &AgentId {
        &self.spec.id
    }

    pub fn spawn(
        mut self,
        mut inbox: mpsc::Receiver<OutboundDispatch>,
        mut shutdown_rx: watch::Receiver<()>,
    ) -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move {
            tracing::info!(agent_id = %self.id(), capability = %self.spec.capability, "Simulated agent started.");

            let started = Instant::now();
            let mut tick = tokio::time::interval(Duration::from_millis(1000 / AGENT_TICK_RATE_HZ));
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut beacon = tokio::time::interval(self.model.beacon_interval);
            let mut last_tick = Instant::now();

            loop {
                if self
                    .spec
                    .silent_after
                    .is_some_and(|after| started.elapsed() >= after)
                {
                    tracing::warn!(agent_id = %self.id(), "Agent going silent.");
                    break;
                }

                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    Some(out) = inbox.recv() => self.accept(out).await,
                    _ = beacon.tick() => self.send_beacon().await?,
                    _ = tick.tick() => {
                        let now = Instant::now();
                        let dt = now.duration_since(last_tick);
                        last_tick = now;
                        if let Some(result) = self.step(dt) {
                            self.report(result).await?;
                        }
                    }
                }
            }

            tracing::info!(agent_id = %self.id(), "Simulated agent stopped.");
            Ok(())
        })
    }

    /// Replaces the local plan with a dispatched queue and acknowledges it.
    async fn accept(&mut self, out: OutboundDispatch) {
        let transaction = out.dispatch.transaction;
        if self.last_transaction.is_some_and(|last| transaction <= last) {
            tracing::debug!(agent_id = %self.id(), transaction, "Ignoring out-of-order dispatch");
            let _ = out.ack.send(DispatchAck::Rejected);
            return;
        }
        self.last_transaction = Some(transaction);

        let same_head = self.plan.front().map(|t| t.task_id)
            == out.dispatch.tasks.first().map(|t| t.task_id);
        if !same_head {
            self.waypoint = 0;
        }
        self.plan = out.dispatch.tasks.into();
        tracing::info!(
            agent_id = %self.id(),
            transaction,
            queue_len = self.plan.len(),
            "Accepted dispatched queue"
        );
        if out.ack.send(DispatchAck::Accepted).is_err() {
            tracing::debug!(agent_id = %self.id(), transaction, "Planner stopped waiting for the ack");
            return;
        }

        match self.planner.battery_for_queue(self.id().clone()).await {
            Ok(false) => tracing::warn!(agent_id = %self.id(), battery = self.battery, "Planner reports battery short for queue"),
            Ok(true) => {}
            Err(e) => tracing::debug!(agent_id = %self.id(), error = %e, "Battery query failed"),
        }
    }

    async fn send_beacon(&self) -> anyhow::Result<()> {
        self.planner
            .beacon(Beacon {
                agent_id: self.id().clone(),
                capability: self.spec.capability,
                position: self.position,
                battery_fraction: self.battery,
                timestamp_ms: chrono::Utc::now().timestamp_millis(),
            })
            .await?;
        self.metrics
            .beacons_sent_total
            .with_label_values(&[self.id().as_str()])
            .inc();
        self.metrics
            .battery_fraction
            .with_label_values(&[self.id().as_str()])
            .set(self.battery);
        Ok(())
    }

    /// Advances the head task by `dt`. Returns its result once the last route
    /// point is reached.
    fn step(&mut self, dt: Duration) -> Option<TaskResult> {
        let head = self.plan.front()?;
        let route_len = head.route.len();
        let Some(&target) = head.route.get(self.waypoint) else {
            return self.finish_head();
        };

        let remaining = self.position.distance_to(&target);
        let reach = self.model.speed_mps * dt.as_secs_f64();
        let travelled = remaining.min(reach);
        if remaining > 0.0 {
            let f = travelled / remaining;
            self.position = Position::new(
                self.position.x + (target.x - self.position.x) * f,
                self.position.y + (target.y - self.position.y) * f,
                self.position.z + (target.z - self.position.z) * f,
            );
        }
        self.battery = (self.battery - travelled * self.model.drain_per_meter).max(0.0);

        if self.position.distance_to(&target) <= ARRIVAL_TOLERANCE_M {
            self.waypoint += 1;
            if self.waypoint >= route_len {
                return self.finish_head();
            }
        }
        None
    }

    fn finish_head(&mut self) -> Option<TaskResult> {
        let task = self.plan.pop_front()?;
        self.waypoint = 0;

        let fails = self.model.failure_percent > 0
            && rand::random::<u8>() % 100 < self.model.failure_percent;
        // An agent that ran dry cannot complete anything.
        let outcome = if fails || self.battery <= 0.0 {
            TaskOutcome::Failed
        } else {
            TaskOutcome::Succeeded
        };
        if task.kind == TaskKind::Recharge && outcome == TaskOutcome::Succeeded {
            self.battery = 1.0;
        }
        Some(TaskResult {
            agent_id: self.id().clone(),
            task_id: task.task_id,
            outcome,
        })
    }

    async fn report(&self, result: TaskResult) -> anyhow::Result<()> {
        let outcome = match result.outcome {
            TaskOutcome::Succeeded => "succeeded",
            TaskOutcome::Failed => "failed",
        };
        tracing::info!(agent_id = %self.id(), task_id = %result.task_id, outcome, "Task finished");
        self.metrics
            .tasks_reported_total
            .with_label_values(&[self.id().as_str(), outcome])
            .inc();

        match self.planner.report_result(result).await {
            Ok(()) => Ok(()),
            Err(PlannerError::PlannerStopped) => Err(PlannerError::PlannerStopped.into()),
            Err(e) => {
                tracing::warn!(agent_id = %self.id(), error = %e, "Planner refused task result");
                Ok(())
            }
        }
    }
}
