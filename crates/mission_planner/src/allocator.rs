//! Greedy batch assignment of pending tasks to the cheapest feasible agents.

use std::collections::BTreeMap;

use api::{AgentId, TaskId, TaskKind};

use crate::agent::{AgentRecord, Liveness};
use crate::cost::{Cost, CostEvaluator, Infeasible, QueueProjection};
use crate::task::Task;

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllocationOutcome {
    /// In the order the tasks must be appended to the agents' queues.
    pub assignments: Vec<Assignment>,
    /// Tasks no agent could take this pass. They stay pending.
    pub stalled: Vec<TaskId>,
}

/// Agents that may receive new work in this pass.
fn eligible(agent: &AgentRecord) -> Result<(), Infeasible> {
    if agent.liveness() != Liveness::Alive {
        return Err(Infeasible::NotAlive);
    }
    if agent.in_transaction() {
        return Err(Infeasible::Busy);
    }
    Ok(())
}

/// Runs one allocation pass.
///
/// Kinds are visited recharge first, then deliver, inspect, monitor; tasks of
/// one kind by ascending id. Every task goes to the minimum [`Cost`] among
/// feasible candidates. Later tasks in the same pass see the queue depth and
/// tail position left by earlier assignments. Nothing is mutated: the caller
/// applies the returned assignments.
pub fn allocate_tasks(
    pending: &BTreeMap<TaskId, Task>,
    agents: &BTreeMap<AgentId, AgentRecord>,
    evaluator: &CostEvaluator,
) -> AllocationOutcome {
    let mut by_kind: BTreeMap<TaskKind, Vec<&Task>> = BTreeMap::new();
    for task in pending.values() {
        by_kind.entry(task.kind()).or_default().push(task);
    }

    let mut projections: BTreeMap<&AgentId, QueueProjection> = agents
        .iter()
        .filter(|(_, agent)| eligible(agent).is_ok())
        .map(|(id, agent)| (id, QueueProjection::of(agent)))
        .collect();

    let mut outcome = AllocationOutcome::default();
    for task in by_kind.into_values().flatten() {
        let best = projections
            .iter()
            .filter_map(|(id, projection)| {
                let agent = &agents[*id];
                evaluator
                    .cost_with_projection(agent, *projection, task)
                    .map_err(|reason| {
                        tracing::trace!(task_id = %task.id, agent_id = %id, ?reason, "Pair infeasible");
                    })
                    .ok()
            })
            .min();

        match best {
            Some(Cost { value, agent_id }) => {
                let agent = &agents[&agent_id];
                if let Some(projection) = projections.get_mut(&agent_id) {
                    *projection = projection.after(task, agent.base());
                }
                outcome.assignments.push(Assignment {
                    task_id: task.id,
                    agent_id,
                    cost: value,
                });
            }
            None => outcome.stalled.push(task.id),
        }
    }
    outcome
}
