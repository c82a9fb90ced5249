use api::{AgentId, TaskId};

/// Errors reported back to whoever sent an event to the planner.
///
/// None of these are fatal to the planner itself. Stale references are logged
/// and the offending request is dropped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlannerError {
    /// A task referenced a human target, tool or waypoint the mission does not know.
    #[error("invalid task parameters: {reason}")]
    InvalidTaskParams { reason: String },

    /// The task is not pending (never existed, already dispatched, or finished).
    #[error("unknown task {0}")]
    UnknownTask(TaskId),

    #[error("unknown agent {0}")]
    UnknownAgent(AgentId),

    /// A result arrived for a task that is not at the head of the agent's queue.
    #[error("task {task_id} is not at the head of agent {agent_id}'s queue (head: {head:?})")]
    TaskNotAtHead {
        agent_id: AgentId,
        task_id: TaskId,
        head: Option<TaskId>,
    },

    /// The planner runtime has exited and no longer accepts events.
    #[error("planner is not running")]
    PlannerStopped,
}

impl PlannerError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        PlannerError::InvalidTaskParams {
            reason: reason.into(),
        }
    }
}
