// src/lib.rs
//! Messages exchanged between the mission planner and the agents of a fleet.
//!
//! These are the logical message classes only. How they travel (topics,
//! streams, in-process channels) is up to the transport that carries them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a physical or simulated agent.
///
/// Ordering is lexicographic and is used to break cost ties.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Identifier assigned by the planner when a task is ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// The four kinds of work a mission can contain.
///
/// Variant order is the order in which an allocation pass visits kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Recharge,
    Deliver,
    Inspect,
    Monitor,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [
        TaskKind::Recharge,
        TaskKind::Deliver,
        TaskKind::Inspect,
        TaskKind::Monitor,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Recharge => "recharge",
            TaskKind::Deliver => "deliver",
            TaskKind::Inspect => "inspect",
            TaskKind::Monitor => "monitor",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an agent is built to do. Every agent can additionally recharge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Deliver,
    Inspect,
    Monitor,
}

impl Capability {
    /// Whether an agent of this capability may be given a task of `kind`.
    pub fn serves(self, kind: TaskKind) -> bool {
        matches!(
            (self, kind),
            (_, TaskKind::Recharge)
                | (Capability::Deliver, TaskKind::Deliver)
                | (Capability::Inspect, TaskKind::Inspect)
                | (Capability::Monitor, TaskKind::Monitor)
        )
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::Deliver => "deliver",
            Capability::Inspect => "inspect",
            Capability::Monitor => "monitor",
        })
    }
}

impl std::str::FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deliver" => Ok(Capability::Deliver),
            "inspect" => Ok(Capability::Inspect),
            "monitor" => Ok(Capability::Monitor),
            other => Err(format!("unknown capability '{other}'")),
        }
    }
}

/// A point in the mission frame, in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Bring a tool to a human target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliverParams {
    pub human_target: String,
    pub tool: String,
}

/// Visit a list of named locations in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectParams {
    pub waypoints: Vec<String>,
}

/// Keep watch over a human target for a number of loops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorParams {
    pub human_target: String,
    #[serde(default = "default_loops")]
    pub loops: u32,
}

fn default_loops() -> u32 {
    1
}

/// Go charge. Without a station the agent returns to its own base.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RechargeParams {
    #[serde(default)]
    pub station: Option<String>,
}

/// Kind-specific payload of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskParams {
    Deliver(DeliverParams),
    Inspect(InspectParams),
    Monitor(MonitorParams),
    Recharge(RechargeParams),
}

impl TaskParams {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskParams::Deliver(_) => TaskKind::Deliver,
            TaskParams::Inspect(_) => TaskKind::Inspect,
            TaskParams::Monitor(_) => TaskKind::Monitor,
            TaskParams::Recharge(_) => TaskKind::Recharge,
        }
    }
}

/// Periodic liveness and status report, agent to planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beacon {
    pub agent_id: AgentId,
    pub capability: Capability,
    pub position: Position,
    /// Remaining charge in `[0, 1]`.
    pub battery_fraction: f64,
    pub timestamp_ms: i64,
}

/// One entry of a dispatched queue, with its route already resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub params: TaskParams,
    pub route: Vec<Position>,
}

/// Planner to agent: the agent's complete ordered queue.
///
/// The agent replaces whatever plan it holds with `tasks` and answers with a
/// [`DispatchAck`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    pub agent_id: AgentId,
    pub transaction: u64,
    pub tasks: Vec<TaskAssignment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchAck {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded,
    Failed,
}

/// Agent to planner: the head of the agent's queue finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub agent_id: AgentId,
    pub task_id: TaskId,
    pub outcome: TaskOutcome,
}
