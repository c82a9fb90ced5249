use std::time::Duration;

use api::{AgentId, Beacon, Dispatch, DispatchAck, TaskId, TaskParams, TaskResult};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

use crate::coordinator::{Coordinator, FleetSnapshot};
use crate::error::PlannerError;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Everything the planner reacts to. Events are handled strictly one at a time.
#[derive(Debug)]
pub enum PlannerEvent {
    NewTask {
        params: TaskParams,
        reply: oneshot::Sender<Result<TaskId, PlannerError>>,
    },
    UpdateTask {
        task_id: TaskId,
        params: TaskParams,
        reply: oneshot::Sender<Result<(), PlannerError>>,
    },
    CancelTask {
        task_id: TaskId,
        reply: oneshot::Sender<Result<(), PlannerError>>,
    },
    Beacon(Beacon),
    TaskResult {
        result: TaskResult,
        reply: oneshot::Sender<Result<(), PlannerError>>,
    },
    DispatchAck {
        agent_id: AgentId,
        transaction: u64,
        ack: DispatchAck,
    },
    BatteryQuery {
        agent_id: AgentId,
        reply: oneshot::Sender<bool>,
    },
    RemoveAgent {
        agent_id: AgentId,
        reply: oneshot::Sender<Result<(), PlannerError>>,
    },
    MissionOver(bool),
}

/// A queue on its way to an agent. The transport answers through `ack`;
/// dropping it counts as a rejection.
#[derive(Debug)]
pub struct OutboundDispatch {
    pub dispatch: Dispatch,
    pub ack: oneshot::Sender<DispatchAck>,
}

/// Cloneable front door to a running planner.
#[derive(Debug, Clone)]
pub struct PlannerHandle {
    events: mpsc::Sender<PlannerEvent>,
    snapshots: watch::Receiver<FleetSnapshot>,
}

impl PlannerHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> PlannerEvent,
    ) -> Result<T, PlannerError> {
        let (reply, rx) = oneshot::channel();
        self.events
            .send(make(reply))
            .await
            .map_err(|_| PlannerError::PlannerStopped)?;
        rx.await.map_err(|_| PlannerError::PlannerStopped)
    }

    async fn notify(&self, event: PlannerEvent) -> Result<(), PlannerError> {
        self.events
            .send(event)
            .await
            .map_err(|_| PlannerError::PlannerStopped)
    }

    pub async fn submit_task(&self, params: TaskParams) -> Result<TaskId, PlannerError> {
        self.request(|reply| PlannerEvent::NewTask { params, reply })
            .await?
    }

    pub async fn update_task(&self, task_id: TaskId, params: TaskParams) -> Result<(), PlannerError> {
        self.request(|reply| PlannerEvent::UpdateTask {
            task_id,
            params,
            reply,
        })
        .await?
    }

    pub async fn cancel_task(&self, task_id: TaskId) -> Result<(), PlannerError> {
        self.request(|reply| PlannerEvent::CancelTask { task_id, reply })
            .await?
    }

    pub async fn beacon(&self, beacon: Beacon) -> Result<(), PlannerError> {
        self.notify(PlannerEvent::Beacon(beacon)).await
    }

    pub async fn report_result(&self, result: TaskResult) -> Result<(), PlannerError> {
        self.request(|reply| PlannerEvent::TaskResult { result, reply })
            .await?
    }

    /// Whether the agent's battery covers its queue. Unknown agents get `false`.
    pub async fn battery_for_queue(&self, agent_id: AgentId) -> Result<bool, PlannerError> {
        self.request(|reply| PlannerEvent::BatteryQuery { agent_id, reply })
            .await
    }

    pub async fn remove_agent(&self, agent_id: AgentId) -> Result<(), PlannerError> {
        self.request(|reply| PlannerEvent::RemoveAgent { agent_id, reply })
            .await?
    }

    pub async fn mission_over(&self, flag: bool) -> Result<(), PlannerError> {
        self.notify(PlannerEvent::MissionOver(flag)).await
    }

    /// The latest published fleet snapshot.
    pub fn snapshot(&self) -> FleetSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FleetSnapshot> {
        self.snapshots.clone()
    }
}

/// The actor that owns the [`Coordinator`].
pub struct Planner {
    coordinator: Coordinator,
    events: mpsc::Receiver<PlannerEvent>,
    /// Lets ack waiters report back without keeping the planner alive.
    acks: mpsc::WeakSender<PlannerEvent>,
    outbound: mpsc::Sender<OutboundDispatch>,
    snapshot_tx: watch::Sender<FleetSnapshot>,
    sweep_interval: Duration,
    ack_timeout: Duration,
}

impl Planner {
    /// Starts the planner loop. It stops when `shutdown_rx` fires or every
    /// handle has been dropped.
    pub fn spawn(
        coordinator: Coordinator,
        outbound: mpsc::Sender<OutboundDispatch>,
        mut shutdown_rx: watch::Receiver<()>,
    ) -> (PlannerHandle, JoinHandle<anyhow::Result<()>>) {
        let (events_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (snapshot_tx, snapshots) = watch::channel(coordinator.snapshot());

        let planner = Planner {
            sweep_interval: coordinator.config().sweep_interval,
            ack_timeout: coordinator.config().dispatch_ack_timeout,
            acks: events_tx.downgrade(),
            coordinator,
            events,
            outbound,
            snapshot_tx,
        };

        let handle = tokio::spawn(async move {
            tracing::info!(
                mission_id = %planner.coordinator.config().mission_id,
                "Planner started."
            );
            let res = planner.run(&mut shutdown_rx).await;
            match &res {
                Ok(()) => tracing::info!("Planner has shut down."),
                Err(e) => tracing::error!(error = %e, "Planner loop failed."),
            }
            res
        });

        (
            PlannerHandle {
                events: events_tx,
                snapshots,
            },
            handle,
        )
    }

    async fn run(mut self, shutdown_rx: &mut watch::Receiver<()>) -> anyhow::Result<()> {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    tracing::info!("Shutdown signal received, stopping planner.");
                    break;
                }
                event = self.events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => {
                        tracing::info!("All planner handles dropped.");
                        break;
                    }
                },
                _ = sweep.tick() => {
                    tracing::trace!("Running liveness sweep");
                    self.coordinator.check_beacons_timeout(Instant::now());
                }
            }

            self.flush_dispatches();
            self.snapshot_tx.send_replace(self.coordinator.snapshot());
        }
        Ok(())
    }

    fn handle(&mut self, event: PlannerEvent) {
        let coordinator = &mut self.coordinator;
        match event {
            PlannerEvent::NewTask { params, reply } => {
                let _ = reply.send(coordinator.incoming_task(params));
            }
            PlannerEvent::UpdateTask {
                task_id,
                params,
                reply,
            } => {
                let _ = reply.send(coordinator.update_task_params(task_id, params));
            }
            PlannerEvent::CancelTask { task_id, reply } => {
                let _ = reply.send(coordinator.cancel_task(task_id));
            }
            PlannerEvent::Beacon(beacon) => coordinator.beacon(beacon, Instant::now()),
            PlannerEvent::TaskResult { result, reply } => {
                let _ = reply.send(coordinator.task_result(result));
            }
            PlannerEvent::DispatchAck {
                agent_id,
                transaction,
                ack,
            } => coordinator.dispatch_ack(&agent_id, transaction, ack),
            PlannerEvent::BatteryQuery { agent_id, reply } => {
                let _ = reply.send(coordinator.is_battery_for_queue(&agent_id));
            }
            PlannerEvent::RemoveAgent { agent_id, reply } => {
                let _ = reply.send(coordinator.remove_agent(&agent_id));
            }
            PlannerEvent::MissionOver(flag) => coordinator.mission_over(flag),
        }
    }

    /// Hands new dispatches to the transport and arms an ack waiter for each.
    /// A dispatch the transport cannot take right away is rolled back.
    fn flush_dispatches(&mut self) {
        for dispatch in self.coordinator.take_dispatches() {
            let agent_id = dispatch.agent_id.clone();
            let transaction = dispatch.transaction;
            let (ack_tx, ack_rx) = oneshot::channel();

            if let Err(e) = self.outbound.try_send(OutboundDispatch {
                dispatch,
                ack: ack_tx,
            }) {
                tracing::warn!(agent_id = %agent_id, transaction, error = %e, "Dispatch could not be sent");
                self.coordinator
                    .dispatch_ack(&agent_id, transaction, DispatchAck::Rejected);
                continue;
            }

            let acks = self.acks.clone();
            let timeout = self.ack_timeout;
            tokio::spawn(async move {
                let ack = match tokio::time::timeout(timeout, ack_rx).await {
                    Ok(Ok(ack)) => ack,
                    Ok(Err(_)) => {
                        tracing::debug!(agent_id = %agent_id, transaction, "Dispatch dropped by transport");
                        DispatchAck::Rejected
                    }
                    Err(_) => {
                        tracing::warn!(
                            agent_id = %agent_id,
                            transaction,
                            timeout_ms = timeout.as_millis() as u64,
                            "Dispatch not acknowledged in time"
                        );
                        DispatchAck::Rejected
                    }
                };
                if let Some(events) = acks.upgrade() {
                    let _ = events
                        .send(PlannerEvent::DispatchAck {
                            agent_id,
                            transaction,
                            ack,
                        })
                        .await;
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Liveness;
    use crate::catalog::MissionCatalog;
    use crate::config::PlannerConfig;
    use crate::cost::StraightLine;
    use crate::metrics::Metrics;
    use api::{Capability, InspectParams, Position, TaskOutcome};
    use std::sync::Arc;

    const MISSION: &str = r#"
locations:
  bridge: { x: 10.0, y: 0.0 }
"#;

    struct Harness {
        handle: PlannerHandle,
        outbound: mpsc::Receiver<OutboundDispatch>,
        metrics: Arc<Metrics>,
        shutdown_tx: watch::Sender<()>,
        join: JoinHandle<anyhow::Result<()>>,
    }

    fn start(config: PlannerConfig) -> Harness {
        let metrics = Arc::new(Metrics::new());
        let coordinator = Coordinator::new(
            config,
            MissionCatalog::from_yaml_str(MISSION).unwrap(),
            Arc::new(StraightLine),
            metrics.clone(),
        );
        let (outbound_tx, outbound) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let (handle, join) = Planner::spawn(coordinator, outbound_tx, shutdown_rx);
        Harness {
            handle,
            outbound,
            metrics,
            shutdown_tx,
            join,
        }
    }

    fn beacon(id: &str) -> Beacon {
        Beacon {
            agent_id: AgentId::from(id),
            capability: Capability::Inspect,
            position: Position::default(),
            battery_fraction: 1.0,
            timestamp_ms: 0,
        }
    }

    fn inspect(waypoint: &str) -> TaskParams {
        TaskParams::Inspect(InspectParams {
            waypoints: vec![waypoint.into()],
        })
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_dispatch_is_reflected_in_snapshot() {
        let mut h = start(PlannerConfig::default());
        h.handle.beacon(beacon("uav-1")).await.unwrap();
        let task_id = h.handle.submit_task(inspect("bridge")).await.unwrap();

        let out = h.outbound.recv().await.unwrap();
        assert_eq!(out.dispatch.agent_id, AgentId::from("uav-1"));
        assert_eq!(out.dispatch.tasks[0].task_id, task_id);
        out.ack.send(DispatchAck::Accepted).unwrap();

        let mut snapshots = h.handle.subscribe();
        let snapshot = snapshots
            .wait_for(|s| {
                s.agents
                    .first()
                    .is_some_and(|a| !a.in_transaction && !a.queue.is_empty())
            })
            .await
            .unwrap()
            .clone();
        assert_eq!(snapshot.agents[0].queue, vec![task_id]);
        assert!(snapshot.pending.is_empty());

        h.handle
            .report_result(TaskResult {
                agent_id: AgentId::from("uav-1"),
                task_id,
                outcome: TaskOutcome::Succeeded,
            })
            .await
            .unwrap();
        assert_eq!(h.metrics.tasks_succeeded_total.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_task_is_refused() {
        let h = start(PlannerConfig::default());
        let err = h.handle.submit_task(inspect("nowhere")).await.unwrap_err();
        assert!(matches!(err, PlannerError::InvalidTaskParams { .. }));
        assert_eq!(h.metrics.tasks_ingested_total.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_dispatch_is_retried_on_next_sweep() {
        let mut h = start(PlannerConfig::default());
        h.handle.beacon(beacon("uav-1")).await.unwrap();
        let task_id = h.handle.submit_task(inspect("bridge")).await.unwrap();

        drop(h.outbound.recv().await.unwrap());
        let retry = h.outbound.recv().await.unwrap();
        assert_eq!(retry.dispatch.tasks[0].task_id, task_id);
        assert_eq!(h.metrics.dispatch_rollbacks_total.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_dispatch_rolls_back_after_timeout() {
        let config = PlannerConfig {
            beacon_timeout: Duration::from_secs(60),
            dispatch_ack_timeout: Duration::from_secs(2),
            ..PlannerConfig::default()
        };
        let mut h = start(config);
        h.handle.beacon(beacon("uav-1")).await.unwrap();
        h.handle.submit_task(inspect("bridge")).await.unwrap();

        let started = Instant::now();
        let unanswered = h.outbound.recv().await.unwrap();
        let retry = h.outbound.recv().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(retry.dispatch.transaction, unanswered.dispatch.transaction + 1);
        assert_eq!(h.metrics.dispatch_rollbacks_total.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_agent_is_declared_lost() {
        let mut h = start(PlannerConfig::default());
        h.handle.beacon(beacon("uav-1")).await.unwrap();
        let task_id = h.handle.submit_task(inspect("bridge")).await.unwrap();
        h.outbound
            .recv()
            .await
            .unwrap()
            .ack
            .send(DispatchAck::Accepted)
            .unwrap();

        let mut snapshots = h.handle.subscribe();
        let snapshot = snapshots
            .wait_for(|s| s.agents.first().is_some_and(|a| a.liveness == Liveness::Lost))
            .await
            .unwrap()
            .clone();
        assert!(snapshot.agents[0].queue.is_empty());
        assert_eq!(snapshot.pending, vec![task_id]);
        assert_eq!(h.metrics.agents_lost_total.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn battery_query_answers_through_the_handle() {
        let h = start(PlannerConfig::default());
        h.handle.beacon(beacon("uav-1")).await.unwrap();
        assert!(h.handle.battery_for_queue(AgentId::from("uav-1")).await.unwrap());
        assert!(!h.handle.battery_for_queue(AgentId::from("ghost")).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_planner() {
        let h = start(PlannerConfig::default());
        drop(h.shutdown_tx);
        h.join.await.unwrap().unwrap();
        assert_eq!(
            h.handle.submit_task(inspect("bridge")).await,
            Err(PlannerError::PlannerStopped)
        );
    }
}
