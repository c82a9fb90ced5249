use api::{AgentId, Position, TaskAssignment, TaskId, TaskKind, TaskParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Queued,
    InProgress,
    Succeeded,
    Failed,
}

/// One unit of work.
///
/// A `Task` value is owned by exactly one place at a time: the coordinator's
/// pending map or one agent's queue. Moving it between them is a move of the
/// value, so a task can never be in two places at once.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub params: TaskParams,
    pub assigned_agent: Option<AgentId>,
    pub status: TaskStatus,
    /// Failed results reported so far.
    pub attempts: u32,
    /// Resolved at ingestion. Empty means "the executing agent's base".
    route: Vec<Position>,
    /// Created by the planner for one specific agent rather than requested.
    pub(crate) auto_recharge: bool,
}

impl Task {
    pub fn new(id: TaskId, params: TaskParams, route: Vec<Position>) -> Self {
        Self {
            id,
            params,
            assigned_agent: None,
            status: TaskStatus::Pending,
            attempts: 0,
            route,
            auto_recharge: false,
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.params.kind()
    }

    pub fn route(&self) -> &[Position] {
        &self.route
    }

    /// Replaces params and route of a task that has not been dispatched yet.
    pub(crate) fn update(&mut self, params: TaskParams, route: Vec<Position>) {
        self.params = params;
        self.route = route;
    }

    /// First position the executing agent has to reach.
    pub fn start(&self, base: Position) -> Position {
        self.route.first().copied().unwrap_or(base)
    }

    /// Where the executing agent is once the task is done.
    pub fn end(&self, base: Position) -> Position {
        self.route.last().copied().unwrap_or(base)
    }

    /// Distance covered between the first and last route positions.
    pub fn path_length(&self) -> f64 {
        self.route
            .windows(2)
            .map(|leg| leg[0].distance_to(&leg[1]))
            .sum()
    }

    pub fn assignment(&self, base: Position) -> TaskAssignment {
        let route = if self.route.is_empty() {
            vec![base]
        } else {
            self.route.clone()
        };
        TaskAssignment {
            task_id: self.id,
            kind: self.kind(),
            params: self.params.clone(),
            route,
        }
    }

    pub(crate) fn mark_pending(&mut self) {
        self.assigned_agent = None;
        self.status = TaskStatus::Pending;
    }

    pub(crate) fn mark_queued(&mut self, agent_id: &AgentId) {
        self.assigned_agent = Some(agent_id.clone());
        self.status = TaskStatus::Queued;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::{InspectParams, RechargeParams};

    #[test]
    fn path_length_sums_legs() {
        let task = Task::new(
            TaskId(1),
            TaskParams::Inspect(InspectParams {
                waypoints: vec!["a".into(), "b".into(), "c".into()],
            }),
            vec![
                Position::new(0.0, 0.0, 0.0),
                Position::new(3.0, 4.0, 0.0),
                Position::new(3.0, 10.0, 0.0),
            ],
        );
        assert_eq!(task.path_length(), 11.0);
        assert_eq!(task.start(Position::default()), Position::new(0.0, 0.0, 0.0));
        assert_eq!(task.end(Position::default()), Position::new(3.0, 10.0, 0.0));
    }

    #[test]
    fn empty_route_uses_base() {
        let base = Position::new(7.0, 7.0, 0.0);
        let task = Task::new(
            TaskId(2),
            TaskParams::Recharge(RechargeParams::default()),
            Vec::new(),
        );
        assert_eq!(task.start(base), base);
        assert_eq!(task.end(base), base);
        assert_eq!(task.path_length(), 0.0);
        assert_eq!(task.assignment(base).route, vec![base]);
    }
}
