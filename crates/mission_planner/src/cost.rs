//! Ranking of (agent, task) pairs.

use std::cmp::Ordering;
use std::sync::Arc;

use api::{AgentId, Position};

use crate::agent::AgentRecord;
use crate::config::{BatteryModel, PlannerConfig};
use crate::task::Task;

/// Cost of giving a task to an agent. Ordered by value, then by agent id so
/// that equal costs always resolve the same way.
#[derive(Debug, Clone)]
pub struct Cost {
    pub value: f64,
    pub agent_id: AgentId,
}

impl PartialEq for Cost {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cost {}

impl PartialOrd for Cost {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cost {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value
            .total_cmp(&other.value)
            .then_with(|| self.agent_id.cmp(&other.agent_id))
    }
}

/// Why a pair was not ranked at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Infeasible {
    /// The agent is not alive.
    NotAlive,
    /// The agent has a dispatch waiting for acknowledgement.
    Busy,
    /// The agent cannot perform this kind of task.
    CapabilityMismatch,
    /// The task would leave the agent below the battery reserve.
    BatteryReserve,
}

/// Travel cost between two positions for a given agent.
///
/// This is where an external path planner plugs in. Returning `None` makes
/// the evaluator fall back to straight-line distance.
pub trait CostOracle: Send + Sync {
    fn travel_cost(&self, agent_id: &AgentId, from: Position, to: Position) -> Option<f64>;
}

/// Straight-line distance, used when no path planner is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct StraightLine;

impl CostOracle for StraightLine {
    fn travel_cost(&self, _agent_id: &AgentId, from: Position, to: Position) -> Option<f64> {
        Some(from.distance_to(&to))
    }
}

/// Where an agent's queue ends and how long it is, as seen by an allocation
/// pass that may already have appended tasks to it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueProjection {
    pub tail: Position,
    pub depth: usize,
}

impl QueueProjection {
    pub fn of(agent: &AgentRecord) -> Self {
        Self {
            tail: agent.tail_position(),
            depth: agent.queue_len(),
        }
    }

    /// The projection after `task` is appended.
    pub fn after(self, task: &Task, base: Position) -> Self {
        Self {
            tail: task.end(base),
            depth: self.depth + 1,
        }
    }
}

#[derive(Clone)]
pub struct CostEvaluator {
    oracle: Arc<dyn CostOracle>,
    battery: BatteryModel,
    queue_depth_penalty: f64,
}

impl CostEvaluator {
    pub fn new(config: &PlannerConfig, oracle: Arc<dyn CostOracle>) -> Self {
        Self {
            oracle,
            battery: config.battery_model(),
            queue_depth_penalty: config.queue_depth_penalty,
        }
    }

    pub fn battery_model(&self) -> &BatteryModel {
        &self.battery
    }

    /// Cost of appending `task` to the agent's current queue.
    pub fn cost(&self, agent: &AgentRecord, task: &Task) -> Result<Cost, Infeasible> {
        self.cost_with_projection(agent, QueueProjection::of(agent), task)
    }

    /// Cost of appending `task` to a queue that looks like `projection`.
    pub fn cost_with_projection(
        &self,
        agent: &AgentRecord,
        projection: QueueProjection,
        task: &Task,
    ) -> Result<Cost, Infeasible> {
        if !agent.capability().serves(task.kind()) {
            return Err(Infeasible::CapabilityMismatch);
        }
        if !agent.is_battery_enough(task, &self.battery) {
            return Err(Infeasible::BatteryReserve);
        }

        let start = task.start(agent.base());
        let travel = self
            .oracle
            .travel_cost(agent.id(), projection.tail, start)
            .unwrap_or_else(|| projection.tail.distance_to(&start));

        Ok(Cost {
            value: travel + projection.depth as f64 * self.queue_depth_penalty,
            agent_id: agent.id().clone(),
        })
    }
}
