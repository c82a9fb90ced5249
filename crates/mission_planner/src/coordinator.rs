//! Registries of one mission and the event handlers that change them.
//!
//! The [`Coordinator`] is the single owner of every agent record and every
//! task that is not yet finished. It is plain synchronous state: the runtime
//! feeds it one event at a time and ships the dispatches it leaves behind.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use api::{
    AgentId, Beacon, Capability, Dispatch, DispatchAck, Position, RechargeParams, TaskId, TaskKind,
    TaskOutcome, TaskParams, TaskResult,
};
use tokio::time::Instant;

use crate::agent::{AgentRecord, Liveness};
use crate::allocator::allocate_tasks;
use crate::catalog::MissionCatalog;
use crate::config::PlannerConfig;
use crate::cost::{CostEvaluator, CostOracle};
use crate::error::PlannerError;
use crate::liveness::LivenessMonitor;
use crate::metrics::Metrics;
use crate::task::{Task, TaskStatus};

/// Point-in-time view of the fleet, published after every event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FleetSnapshot {
    pub mission_id: String,
    pub timestamp_ms: i64,
    pub agents: Vec<AgentSnapshot>,
    pub pending: Vec<TaskId>,
    pub mission_over: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentSnapshot {
    pub agent_id: AgentId,
    pub capability: Capability,
    pub liveness: Liveness,
    pub position: Position,
    pub battery_fraction: f64,
    pub queue: Vec<TaskId>,
    pub in_transaction: bool,
}

pub struct Coordinator {
    config: PlannerConfig,
    catalog: MissionCatalog,
    evaluator: CostEvaluator,
    liveness: LivenessMonitor,
    metrics: Arc<Metrics>,
    agents: BTreeMap<AgentId, AgentRecord>,
    pending_tasks: BTreeMap<TaskId, Task>,
    kind_index: BTreeMap<TaskKind, BTreeSet<TaskId>>,
    /// Template for the recharge tasks the planner creates on its own.
    recharge_task: TaskParams,
    mission_over: bool,
    next_task_id: u64,
    next_transaction: u64,
    outbox: Vec<Dispatch>,
}

impl Coordinator {
    pub fn new(
        config: PlannerConfig,
        catalog: MissionCatalog,
        oracle: Arc<dyn CostOracle>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            evaluator: CostEvaluator::new(&config, oracle),
            liveness: LivenessMonitor::new(config.beacon_timeout),
            config,
            catalog,
            metrics,
            agents: BTreeMap::new(),
            pending_tasks: BTreeMap::new(),
            kind_index: TaskKind::ALL.iter().map(|k| (*k, BTreeSet::new())).collect(),
            recharge_task: TaskParams::Recharge(RechargeParams::default()),
            mission_over: false,
            next_task_id: 1,
            next_transaction: 1,
            outbox: Vec::new(),
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn agent(&self, agent_id: &AgentId) -> Option<&AgentRecord> {
        self.agents.get(agent_id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentRecord> {
        self.agents.values()
    }

    pub fn pending_task(&self, task_id: TaskId) -> Option<&Task> {
        self.pending_tasks.get(&task_id)
    }

    pub fn pending_len(&self) -> usize {
        self.pending_tasks.len()
    }

    /// Pending task ids of one kind, ascending.
    pub fn pending_of_kind(&self, kind: TaskKind) -> impl Iterator<Item = TaskId> + '_ {
        self.kind_index.get(&kind).into_iter().flatten().copied()
    }

    pub fn is_mission_over(&self) -> bool {
        self.mission_over
    }

    /// Dispatches produced since the last call, in the order they were made.
    pub fn take_dispatches(&mut self) -> Vec<Dispatch> {
        std::mem::take(&mut self.outbox)
    }

    // --- Event handlers ---

    /// Validates and registers a new task, then runs an allocation pass.
    pub fn incoming_task(&mut self, params: TaskParams) -> Result<TaskId, PlannerError> {
        let route = self.catalog.resolve_route(&params).inspect_err(|e| {
            tracing::warn!(error = %e, kind = %params.kind(), "Rejected new task");
        })?;

        let task_id = self.fresh_task_id();
        tracing::info!(task_id = %task_id, kind = %params.kind(), "Task ingested");
        self.metrics.tasks_ingested_total.inc();
        self.insert_pending(Task::new(task_id, params, route));
        self.perform_task_allocation();
        Ok(task_id)
    }

    /// Replaces the params of a task that is still pending.
    pub fn update_task_params(
        &mut self,
        task_id: TaskId,
        params: TaskParams,
    ) -> Result<(), PlannerError> {
        if !self.pending_tasks.contains_key(&task_id) {
            tracing::warn!(task_id = %task_id, "Update for a task that is not pending");
            return Err(PlannerError::UnknownTask(task_id));
        }
        let route = self.catalog.resolve_route(&params)?;
        let mut task = self
            .take_pending(task_id)
            .ok_or(PlannerError::UnknownTask(task_id))?;
        task.update(params, route);
        tracing::info!(task_id = %task_id, kind = %task.kind(), "Task parameters updated");
        self.insert_pending(task);
        self.perform_task_allocation();
        Ok(())
    }

    /// Records a beacon. Unknown agents join the fleet; suspected or lost
    /// agents come back alive with whatever queue they still hold.
    pub fn beacon(&mut self, beacon: Beacon, now: Instant) {
        match self.agents.get_mut(&beacon.agent_id) {
            Some(agent) => {
                if agent.capability() != beacon.capability {
                    tracing::warn!(
                        agent_id = %beacon.agent_id,
                        registered = %agent.capability(),
                        reported = %beacon.capability,
                        "Beacon capability differs from the registered one; keeping registered"
                    );
                }
                if let Some(previous) = agent.update_from_beacon(&beacon, now) {
                    tracing::info!(
                        agent_id = %beacon.agent_id,
                        previous = previous.as_str(),
                        "Agent recovered"
                    );
                    self.metrics.agents_recovered_total.inc();
                }
            }
            None => {
                let base = self
                    .catalog
                    .agent_base(&beacon.agent_id)
                    .unwrap_or(beacon.position);
                tracing::info!(
                    agent_id = %beacon.agent_id,
                    capability = %beacon.capability,
                    "Agent joined the fleet"
                );
                self.agents.insert(
                    beacon.agent_id.clone(),
                    AgentRecord::new(&beacon, base, now),
                );
            }
        }
        self.maybe_recharge(&beacon.agent_id);
        self.refresh_gauges();
    }

    /// Withdraws a task wherever it is. A queued task leaves its agent's
    /// queue and the shortened queue is dispatched again.
    pub fn cancel_task(&mut self, task_id: TaskId) -> Result<(), PlannerError> {
        if self.take_pending(task_id).is_some() {
            tracing::info!(task_id = %task_id, "Pending task cancelled");
            self.refresh_gauges();
            return Ok(());
        }

        let agent_id = self
            .agents
            .values()
            .find(|agent| agent.is_task_in_queue(task_id))
            .map(|agent| agent.id().clone())
            .ok_or(PlannerError::UnknownTask(task_id))?;
        let agent = self
            .agents
            .get_mut(&agent_id)
            .ok_or(PlannerError::UnknownTask(task_id))?;

        // An open transaction is abandoned; its late ack will be ignored and
        // the agent gets the restored queue instead.
        let abandoned = agent.in_transaction();
        let orphaned = agent.restore_old_task_queue();
        let removed = agent.replace_task_from_queue(task_id);
        self.repend(orphaned);
        if removed.is_none() {
            self.take_pending(task_id);
        }
        if removed.is_some() || abandoned {
            self.begin_transaction(&agent_id, Vec::new());
        }
        tracing::info!(task_id = %task_id, agent_id = %agent_id, "Queued task cancelled");

        self.perform_task_allocation();
        self.refresh_gauges();
        Ok(())
    }

    /// Handles the report for the head of an agent's queue.
    pub fn task_result(&mut self, result: TaskResult) -> Result<(), PlannerError> {
        let Some(agent) = self.agents.get_mut(&result.agent_id) else {
            tracing::warn!(agent_id = %result.agent_id, task_id = %result.task_id, "Result from unknown agent ignored");
            return Err(PlannerError::UnknownAgent(result.agent_id));
        };
        let head = agent.first_task().map(|t| t.id);
        let not_at_head = || PlannerError::TaskNotAtHead {
            agent_id: result.agent_id.clone(),
            task_id: result.task_id,
            head,
        };
        if head != Some(result.task_id) {
            let err = not_at_head();
            tracing::warn!(error = %err, "Stale or duplicate task result ignored");
            return Err(err);
        }
        let mut task = agent.pop_first_task().ok_or_else(not_at_head)?;

        match result.outcome {
            TaskOutcome::Succeeded => {
                task.status = TaskStatus::Succeeded;
                tracing::info!(task_id = %task.id, agent_id = %result.agent_id, "Task succeeded");
                self.metrics.tasks_succeeded_total.inc();
            }
            TaskOutcome::Failed => {
                task.attempts += 1;
                self.metrics.tasks_failed_total.inc();
                if task.auto_recharge {
                    tracing::warn!(task_id = %task.id, agent_id = %result.agent_id, "Recharge failed");
                } else if task.attempts >= self.config.max_task_attempts {
                    task.status = TaskStatus::Failed;
                    tracing::error!(
                        task_id = %task.id,
                        attempts = task.attempts,
                        "Task abandoned after repeated failures"
                    );
                    self.metrics.tasks_abandoned_total.inc();
                } else {
                    tracing::warn!(
                        task_id = %task.id,
                        agent_id = %result.agent_id,
                        attempts = task.attempts,
                        "Task failed; returning it to pending"
                    );
                    self.insert_pending(task);
                }
            }
        }

        self.perform_task_allocation();
        self.refresh_gauges();
        Ok(())
    }

    /// Settles the reassignment transaction `transaction` of an agent.
    /// Acks for anything but the agent's open transaction are ignored.
    pub fn dispatch_ack(&mut self, agent_id: &AgentId, transaction: u64, ack: DispatchAck) {
        let Some(agent) = self.agents.get_mut(agent_id) else {
            tracing::debug!(agent_id = %agent_id, transaction, "Ack from unknown agent ignored");
            return;
        };
        if agent.transaction_id() != Some(transaction) {
            tracing::debug!(agent_id = %agent_id, transaction, "Ack for a superseded dispatch ignored");
            return;
        }
        match ack {
            DispatchAck::Accepted => {
                agent.delete_old_task_queue();
                tracing::debug!(agent_id = %agent_id, transaction, "Dispatch acknowledged");
            }
            DispatchAck::Rejected => {
                let orphaned = agent.restore_old_task_queue();
                tracing::warn!(
                    agent_id = %agent_id,
                    transaction,
                    returned = orphaned.len(),
                    "Dispatch rolled back"
                );
                self.metrics.dispatch_rollbacks_total.inc();
                self.repend(orphaned);
            }
        }
        self.refresh_gauges();
    }

    /// Periodic liveness sweep. Lost agents hand their whole queue back to
    /// pending; any pending work then gets an allocation pass.
    pub fn check_beacons_timeout(&mut self, now: Instant) {
        for (agent_id, liveness) in self.liveness.sweep(&self.agents, now) {
            let Some(agent) = self.agents.get_mut(&agent_id) else {
                continue;
            };
            agent.set_liveness(liveness);
            match liveness {
                Liveness::SuspectedLost => {
                    tracing::warn!(agent_id = %agent_id, "Agent suspected lost: beacon overdue");
                }
                Liveness::Lost => {
                    let tasks = agent.empty_the_queue();
                    tracing::warn!(
                        agent_id = %agent_id,
                        requeued = tasks.len(),
                        timeout_ms = self.liveness.timeout().as_millis() as u64,
                        "Agent lost; returning its queue to pending"
                    );
                    self.metrics.agents_lost_total.inc();
                    self.repend(tasks);
                }
                Liveness::Alive => {}
            }
        }

        if !self.pending_tasks.is_empty() {
            self.perform_task_allocation();
        }
        self.refresh_gauges();
    }

    /// Latches the end of the mission. Dispatches already out are left alone.
    pub fn mission_over(&mut self, flag: bool) {
        if self.mission_over {
            if !flag {
                tracing::debug!("Mission already over; ignoring reset");
            }
            return;
        }
        if flag {
            tracing::info!(pending = self.pending_tasks.len(), "Mission over; allocation stopped");
            self.mission_over = true;
        }
    }

    /// Removes an agent from the fleet. Its queue goes back to pending.
    pub fn remove_agent(&mut self, agent_id: &AgentId) -> Result<(), PlannerError> {
        let mut agent = self
            .agents
            .remove(agent_id)
            .ok_or_else(|| PlannerError::UnknownAgent(agent_id.clone()))?;
        let tasks = agent.empty_the_queue();
        tracing::info!(agent_id = %agent_id, requeued = tasks.len(), "Agent removed from the fleet");
        self.repend(tasks);
        self.perform_task_allocation();
        self.refresh_gauges();
        Ok(())
    }

    /// Answers an agent asking whether its battery covers its queue.
    pub fn is_battery_for_queue(&self, agent_id: &AgentId) -> bool {
        self.agents
            .get(agent_id)
            .is_some_and(|agent| agent.is_battery_for_queue(self.evaluator.battery_model()))
    }

    // --- Allocation ---

    /// Runs one allocation pass over all pending tasks and dispatches the
    /// resulting queues. Does nothing once the mission is over.
    pub fn perform_task_allocation(&mut self) {
        if self.mission_over || self.pending_tasks.is_empty() {
            return;
        }
        self.metrics.allocation_passes_total.inc();

        let outcome = allocate_tasks(&self.pending_tasks, &self.agents, &self.evaluator);
        for task_id in &outcome.stalled {
            tracing::debug!(task_id = %task_id, "No feasible agent; task stays pending");
            self.metrics.allocation_stalls_total.inc();
        }

        let mut per_agent: BTreeMap<AgentId, Vec<Task>> = BTreeMap::new();
        for assignment in outcome.assignments {
            if let Some(task) = self.take_pending(assignment.task_id) {
                tracing::info!(
                    task_id = %assignment.task_id,
                    agent_id = %assignment.agent_id,
                    cost = assignment.cost,
                    "Task assigned"
                );
                self.metrics.assignments_total.inc();
                per_agent.entry(assignment.agent_id).or_default().push(task);
            }
        }
        for (agent_id, tasks) in per_agent {
            self.begin_transaction(&agent_id, tasks);
        }
        self.refresh_gauges();
    }

    /// Snapshots the agent's queue, appends `tasks` and queues the dispatch.
    fn begin_transaction(&mut self, agent_id: &AgentId, tasks: Vec<Task>) {
        let transaction = self.next_transaction;
        self.next_transaction += 1;

        let Some(agent) = self.agents.get_mut(agent_id) else {
            self.repend(tasks);
            return;
        };
        agent.set_old_task_queue(transaction);
        for mut task in tasks {
            task.mark_queued(agent_id);
            agent.add_task_to_queue(task);
        }
        self.outbox.push(agent.dispatch(transaction));
    }

    /// Sends an idle agent with a low battery to recharge. Nothing new is
    /// dispatched once the mission is over.
    fn maybe_recharge(&mut self, agent_id: &AgentId) {
        let Some(agent) = self.agents.get(agent_id) else {
            return;
        };
        if self.mission_over
            || agent.liveness() != Liveness::Alive
            || agent.in_transaction()
            || !agent.is_queue_empty()
            || agent.battery() >= self.config.recharge_threshold
        {
            return;
        }
        let battery = agent.battery();

        let task_id = self.fresh_task_id();
        let mut task = Task::new(task_id, self.recharge_task.clone(), Vec::new());
        task.auto_recharge = true;
        tracing::info!(agent_id = %agent_id, task_id = %task_id, battery, "Sending agent to recharge");
        self.begin_transaction(agent_id, vec![task]);
    }

    // --- Registry bookkeeping ---

    fn fresh_task_id(&mut self) -> TaskId {
        let id = TaskId(self.next_task_id);
        self.next_task_id += 1;
        id
    }

    fn insert_pending(&mut self, mut task: Task) {
        task.mark_pending();
        self.kind_index.entry(task.kind()).or_default().insert(task.id);
        self.pending_tasks.insert(task.id, task);
    }

    fn take_pending(&mut self, task_id: TaskId) -> Option<Task> {
        let task = self.pending_tasks.remove(&task_id)?;
        if let Some(ids) = self.kind_index.get_mut(&task.kind()) {
            ids.remove(&task_id);
        }
        Some(task)
    }

    /// Returns tasks to pending. Recharges made for one agent are dropped;
    /// that agent gets a fresh one when it needs it.
    fn repend(&mut self, tasks: impl IntoIterator<Item = Task>) {
        for task in tasks {
            if task.auto_recharge {
                tracing::debug!(task_id = %task.id, "Dropping agent-specific recharge");
                continue;
            }
            self.insert_pending(task);
        }
    }

    fn refresh_gauges(&self) {
        let alive = self
            .agents
            .values()
            .filter(|a| a.liveness() == Liveness::Alive)
            .count();
        self.metrics.agents_alive.set(alive as i64);
        self.metrics.pending_tasks.set(self.pending_tasks.len() as i64);
    }

    pub fn snapshot(&self) -> FleetSnapshot {
        FleetSnapshot {
            mission_id: self.config.mission_id.clone(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            agents: self
                .agents
                .values()
                .map(|agent| AgentSnapshot {
                    agent_id: agent.id().clone(),
                    capability: agent.capability(),
                    liveness: agent.liveness(),
                    position: agent.position(),
                    battery_fraction: agent.battery(),
                    queue: agent.tasks().map(|t| t.id).collect(),
                    in_transaction: agent.in_transaction(),
                })
                .collect(),
            pending: self.pending_tasks.keys().copied().collect(),
            mission_over: self.mission_over,
        }
    }
}
