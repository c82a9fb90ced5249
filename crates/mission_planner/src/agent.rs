//! Planner-side mirror of one physical agent and its task queue.

use std::collections::VecDeque;

use api::{AgentId, Beacon, Capability, Dispatch, Position, TaskId, TaskKind};
use tokio::time::Instant;

use crate::config::BatteryModel;
use crate::task::{Task, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    SuspectedLost,
    Lost,
}

impl Liveness {
    pub fn as_str(self) -> &'static str {
        match self {
            Liveness::Alive => "alive",
            Liveness::SuspectedLost => "suspected_lost",
            Liveness::Lost => "lost",
        }
    }
}

/// A queue handed to the agent but not yet acknowledged.
#[derive(Debug, Clone)]
struct Transaction {
    id: u64,
    /// The queue as it was before the transaction changed it.
    shadow: VecDeque<Task>,
}

#[derive(Debug, Clone)]
pub struct AgentRecord {
    id: AgentId,
    capability: Capability,
    /// Where the agent goes back to once its queue is done.
    base: Position,
    position: Position,
    battery_fraction: f64,
    last_beacon_time: Instant,
    liveness: Liveness,
    queue: VecDeque<Task>,
    transaction: Option<Transaction>,
}

impl AgentRecord {
    /// Creates the record on the first beacon of an unknown agent.
    pub fn new(beacon: &Beacon, base: Position, now: Instant) -> Self {
        Self {
            id: beacon.agent_id.clone(),
            capability: beacon.capability,
            base,
            position: beacon.position,
            battery_fraction: beacon.battery_fraction.clamp(0.0, 1.0),
            last_beacon_time: now,
            liveness: Liveness::Alive,
            queue: VecDeque::new(),
            transaction: None,
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn base(&self) -> Position {
        self.base
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn battery(&self) -> f64 {
        self.battery_fraction
    }

    pub fn last_beacon_time(&self) -> Instant {
        self.last_beacon_time
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness
    }

    pub(crate) fn set_liveness(&mut self, liveness: Liveness) {
        self.liveness = liveness;
    }

    /// Refreshes position, battery and beacon time. Returns the previous
    /// liveness when the beacon brings a suspected or lost agent back.
    pub(crate) fn update_from_beacon(&mut self, beacon: &Beacon, now: Instant) -> Option<Liveness> {
        self.position = beacon.position;
        self.battery_fraction = beacon.battery_fraction.clamp(0.0, 1.0);
        self.last_beacon_time = now;
        let previous = std::mem::replace(&mut self.liveness, Liveness::Alive);
        (previous != Liveness::Alive).then_some(previous)
    }

    // --- Task queue ---

    pub fn is_queue_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn first_task(&self) -> Option<&Task> {
        self.queue.front()
    }

    pub fn last_task(&self) -> Option<&Task> {
        self.queue.back()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.queue.iter()
    }

    pub fn is_task_in_queue(&self, task_id: TaskId) -> bool {
        self.queue.iter().any(|t| t.id == task_id)
    }

    pub(crate) fn add_task_to_queue(&mut self, task: Task) {
        self.queue.push_back(task);
    }

    /// Removes a task by id, keeping the rest of the queue in order.
    pub(crate) fn replace_task_from_queue(&mut self, task_id: TaskId) -> Option<Task> {
        let index = self.queue.iter().position(|t| t.id == task_id)?;
        self.queue.remove(index)
    }

    /// Removes the head after the agent reported it finished. The task is
    /// also dropped from an in-flight shadow so a rollback cannot bring it back.
    /// With no dispatch in flight the agent moves straight on to the next head.
    pub(crate) fn pop_first_task(&mut self) -> Option<Task> {
        let task = self.queue.pop_front()?;
        match self.transaction.as_mut() {
            Some(txn) => txn.shadow.retain(|t| t.id != task.id),
            None => {
                if let Some(head) = self.queue.front_mut() {
                    head.status = TaskStatus::InProgress;
                }
            }
        }
        Some(task)
    }

    /// Takes every task out, in queue order. An in-flight transaction is
    /// rolled back first and the tasks it added come last.
    pub(crate) fn empty_the_queue(&mut self) -> Vec<Task> {
        let added = self.restore_old_task_queue();
        self.queue.drain(..).chain(added).collect()
    }

    /// Position the agent will be at once its current queue is done.
    pub fn tail_position(&self) -> Position {
        self.queue
            .back()
            .map_or(self.position, |task| task.end(self.base))
    }

    // --- Battery feasibility ---

    /// Battery left after running `tasks` in order from the current position
    /// and flying back to base. `None` when the agent would run dry on the
    /// way to a recharge.
    fn projected_battery<'a>(
        &self,
        tasks: impl IntoIterator<Item = &'a Task>,
        model: &BatteryModel,
    ) -> Option<f64> {
        let mut battery = self.battery_fraction;
        let mut at = self.position;
        for task in tasks {
            let start = task.start(self.base);
            if task.kind() == TaskKind::Recharge {
                battery -= model.travel_drain(at.distance_to(&start));
                if battery < 0.0 {
                    return None;
                }
                battery = 1.0;
            } else {
                battery -= model.task_drain(at.distance_to(&start) + task.path_length());
            }
            at = task.end(self.base);
        }
        Some(battery - model.travel_drain(at.distance_to(&self.base)))
    }

    /// Whether the whole queue, plus the return to base, keeps the battery
    /// above the reserve.
    pub fn is_battery_for_queue(&self, model: &BatteryModel) -> bool {
        self.projected_battery(self.queue.iter(), model)
            .is_some_and(|left| left >= model.reserve)
    }

    /// Whether `task` alone, from the current position and battery, keeps the
    /// battery above the reserve. Recharging is always allowed.
    pub fn is_battery_enough(&self, task: &Task, model: &BatteryModel) -> bool {
        if task.kind() == TaskKind::Recharge {
            return true;
        }
        self.projected_battery(std::iter::once(task), model)
            .is_some_and(|left| left >= model.reserve)
    }

    // --- Reassignment transaction ---

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    pub fn transaction_id(&self) -> Option<u64> {
        self.transaction.as_ref().map(|t| t.id)
    }

    /// Snapshots the queue before the coordinator changes it.
    pub(crate) fn set_old_task_queue(&mut self, transaction: u64) {
        debug_assert!(self.transaction.is_none(), "nested reassignment transaction");
        self.transaction = Some(Transaction {
            id: transaction,
            shadow: self.queue.clone(),
        });
    }

    /// The agent accepted the new queue: forget the snapshot and mark the
    /// head as running.
    pub(crate) fn delete_old_task_queue(&mut self) {
        self.transaction = None;
        if let Some(head) = self.queue.front_mut() {
            head.status = TaskStatus::InProgress;
        }
    }

    /// Puts the snapshot back. Returns the tasks the aborted transaction had
    /// added, which now belong to nobody until the caller re-pends them.
    pub(crate) fn restore_old_task_queue(&mut self) -> Vec<Task> {
        let Some(txn) = self.transaction.take() else {
            return Vec::new();
        };
        let current = std::mem::replace(&mut self.queue, txn.shadow);
        current
            .into_iter()
            .filter(|task| !self.queue.iter().any(|kept| kept.id == task.id))
            .collect()
    }

    /// The full ordered queue as sent to the agent.
    pub fn dispatch(&self, transaction: u64) -> Dispatch {
        Dispatch {
            agent_id: self.id.clone(),
            transaction,
            tasks: self.queue.iter().map(|t| t.assignment(self.base)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::{DeliverParams, RechargeParams, TaskParams};

    fn beacon(id: &str, position: Position, battery: f64) -> Beacon {
        Beacon {
            agent_id: AgentId::from(id),
            capability: Capability::Deliver,
            position,
            battery_fraction: battery,
            timestamp_ms: 0,
        }
    }

    fn delivery(id: u64, from: Position, to: Position) -> Task {
        Task::new(
            TaskId(id),
            TaskParams::Deliver(DeliverParams {
                human_target: "victim".into(),
                tool: "kit".into(),
            }),
            vec![from, to],
        )
    }

    fn model() -> BatteryModel {
        BatteryModel {
            reserve: 0.2,
            drain_per_meter: 0.001,
            drain_per_task: 0.0,
        }
    }

    fn agent_at_origin(battery: f64) -> AgentRecord {
        AgentRecord::new(
            &beacon("uav-1", Position::default(), battery),
            Position::default(),
            Instant::now(),
        )
    }

    fn ids(agent: &AgentRecord) -> Vec<u64> {
        agent.tasks().map(|t| t.id.0).collect()
    }

    #[test]
    fn queue_is_fifo() {
        let mut agent = agent_at_origin(1.0);
        assert!(agent.is_queue_empty());
        for id in 1..=3 {
            agent.add_task_to_queue(delivery(id, Position::default(), Position::default()));
        }
        assert_eq!(agent.first_task().map(|t| t.id), Some(TaskId(1)));
        assert_eq!(agent.last_task().map(|t| t.id), Some(TaskId(3)));
        assert_eq!(agent.queue_len(), 3);
    }

    #[test]
    fn replace_keeps_relative_order() {
        let mut agent = agent_at_origin(1.0);
        for id in 1..=4 {
            agent.add_task_to_queue(delivery(id, Position::default(), Position::default()));
        }
        let removed = agent.replace_task_from_queue(TaskId(2)).unwrap();
        assert_eq!(removed.id, TaskId(2));
        assert_eq!(ids(&agent), vec![1, 3, 4]);
        assert!(agent.replace_task_from_queue(TaskId(2)).is_none());
        assert!(!agent.is_task_in_queue(TaskId(2)));
    }

    #[test]
    fn tail_position_follows_last_task() {
        let mut agent = agent_at_origin(1.0);
        assert_eq!(agent.tail_position(), Position::default());
        let end = Position::new(50.0, 0.0, 0.0);
        agent.add_task_to_queue(delivery(1, Position::new(10.0, 0.0, 0.0), end));
        assert_eq!(agent.tail_position(), end);
    }

    #[test]
    fn battery_enough_accounts_for_return_to_base() {
        // 100 m out, 100 m of task, 200 m back: 0.4 of the battery.
        let task = delivery(1, Position::new(100.0, 0.0, 0.0), Position::new(200.0, 0.0, 0.0));
        assert!(agent_at_origin(0.7).is_battery_enough(&task, &model()));
        assert!(!agent_at_origin(0.5).is_battery_enough(&task, &model()));
    }

    #[test]
    fn battery_for_queue_sums_every_task() {
        let mut agent = agent_at_origin(0.7);
        let out = Position::new(100.0, 0.0, 0.0);
        agent.add_task_to_queue(delivery(1, Position::default(), out));
        assert!(agent.is_battery_for_queue(&model()));
        agent.add_task_to_queue(delivery(2, out, Position::new(300.0, 0.0, 0.0)));
        assert!(!agent.is_battery_for_queue(&model()));
    }

    #[test]
    fn recharge_restores_queue_feasibility() {
        let mut agent = agent_at_origin(0.3);
        let far = Position::new(300.0, 0.0, 0.0);
        agent.add_task_to_queue(Task::new(
            TaskId(1),
            TaskParams::Recharge(RechargeParams::default()),
            Vec::new(),
        ));
        agent.add_task_to_queue(delivery(2, Position::default(), far));
        assert!(agent.is_battery_for_queue(&model()));

        let recharge = agent.first_task().unwrap().clone();
        assert!(agent_at_origin(0.0).is_battery_enough(&recharge, &model()));
    }

    #[test]
    fn rollback_restores_exact_queue() {
        let mut agent = agent_at_origin(1.0);
        for id in [5, 2, 9] {
            agent.add_task_to_queue(delivery(id, Position::default(), Position::default()));
        }
        agent.set_old_task_queue(7);
        assert_eq!(agent.transaction_id(), Some(7));
        agent.add_task_to_queue(delivery(11, Position::default(), Position::default()));
        agent.replace_task_from_queue(TaskId(2));

        let orphaned = agent.restore_old_task_queue();
        assert_eq!(ids(&agent), vec![5, 2, 9]);
        assert_eq!(orphaned.iter().map(|t| t.id.0).collect::<Vec<_>>(), vec![11]);
        assert!(!agent.in_transaction());
    }

    #[test]
    fn accepted_transaction_marks_head_running() {
        let mut agent = agent_at_origin(1.0);
        agent.set_old_task_queue(1);
        agent.add_task_to_queue(delivery(1, Position::default(), Position::default()));
        agent.delete_old_task_queue();
        assert!(!agent.in_transaction());
        assert_eq!(agent.first_task().unwrap().status, TaskStatus::InProgress);
        assert!(agent.restore_old_task_queue().is_empty());
    }

    #[test]
    fn next_head_runs_once_the_head_finishes() {
        let mut agent = agent_at_origin(1.0);
        for id in 1..=2 {
            agent.add_task_to_queue(delivery(id, Position::default(), Position::default()));
        }
        assert_eq!(agent.pop_first_task().map(|t| t.id), Some(TaskId(1)));
        assert_eq!(agent.first_task().unwrap().status, TaskStatus::InProgress);
    }

    #[test]
    fn finished_head_is_not_resurrected_by_rollback() {
        let mut agent = agent_at_origin(1.0);
        agent.add_task_to_queue(delivery(1, Position::default(), Position::default()));
        agent.set_old_task_queue(3);
        agent.add_task_to_queue(delivery(2, Position::default(), Position::default()));
        assert_eq!(agent.pop_first_task().map(|t| t.id), Some(TaskId(1)));
        let orphaned = agent.restore_old_task_queue();
        assert!(agent.is_queue_empty());
        assert_eq!(orphaned.len(), 1);
    }

    #[test]
    fn emptying_includes_tasks_of_an_open_transaction() {
        let mut agent = agent_at_origin(1.0);
        agent.add_task_to_queue(delivery(1, Position::default(), Position::default()));
        agent.set_old_task_queue(4);
        agent.add_task_to_queue(delivery(2, Position::default(), Position::default()));
        let all: Vec<u64> = agent.empty_the_queue().iter().map(|t| t.id.0).collect();
        assert_eq!(all, vec![1, 2]);
        assert!(agent.is_queue_empty());
        assert!(!agent.in_transaction());
    }

    #[test]
    fn beacon_recovers_lost_agent() {
        let mut agent = agent_at_origin(1.0);
        agent.set_liveness(Liveness::Lost);
        let previous = agent.update_from_beacon(
            &beacon("uav-1", Position::new(1.0, 1.0, 0.0), 0.5),
            Instant::now(),
        );
        assert_eq!(previous, Some(Liveness::Lost));
        assert_eq!(agent.liveness(), Liveness::Alive);
        assert_eq!(agent.battery(), 0.5);
        assert_eq!(
            agent.update_from_beacon(&beacon("uav-1", Position::default(), 0.5), Instant::now()),
            None
        );
    }
}
