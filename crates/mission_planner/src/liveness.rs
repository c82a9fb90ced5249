//! Beacon recency tracking.

use std::collections::BTreeMap;
use std::time::Duration;

use api::AgentId;
use tokio::time::Instant;

use crate::agent::{AgentRecord, Liveness};

/// Decides how alive an agent is from the age of its last beacon.
///
/// After half the timeout an agent is suspected; after the full timeout it is
/// lost. Only a beacon brings it back, so sweeps never improve liveness.
#[derive(Debug, Clone, Copy)]
pub struct LivenessMonitor {
    timeout: Duration,
}

impl LivenessMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn assess(&self, last_beacon: Instant, now: Instant) -> Liveness {
        let silence = now.saturating_duration_since(last_beacon);
        if silence > self.timeout {
            Liveness::Lost
        } else if silence > self.timeout / 2 {
            Liveness::SuspectedLost
        } else {
            Liveness::Alive
        }
    }

    /// Agents whose liveness must degrade at `now`, with their new state.
    pub fn sweep(
        &self,
        agents: &BTreeMap<AgentId, AgentRecord>,
        now: Instant,
    ) -> Vec<(AgentId, Liveness)> {
        agents
            .values()
            .filter_map(|agent| {
                let assessed = self.assess(agent.last_beacon_time(), now);
                let degraded = match (agent.liveness(), assessed) {
                    (Liveness::Alive, Liveness::SuspectedLost | Liveness::Lost) => true,
                    (Liveness::SuspectedLost, Liveness::Lost) => true,
                    _ => false,
                };
                degraded.then(|| (agent.id().clone(), assessed))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::{Beacon, Capability, Position};

    fn agent(id: &str, last_beacon: Instant) -> AgentRecord {
        AgentRecord::new(
            &Beacon {
                agent_id: AgentId::from(id),
                capability: Capability::Inspect,
                position: Position::default(),
                battery_fraction: 1.0,
                timestamp_ms: 0,
            },
            Position::default(),
            last_beacon,
        )
    }

    #[test]
    fn assess_uses_half_timeout_grace() {
        let monitor = LivenessMonitor::new(Duration::from_secs(10));
        let then = Instant::now();
        assert_eq!(monitor.assess(then, then + Duration::from_secs(4)), Liveness::Alive);
        assert_eq!(monitor.assess(then, then + Duration::from_secs(6)), Liveness::SuspectedLost);
        assert_eq!(monitor.assess(then, then + Duration::from_secs(11)), Liveness::Lost);
    }

    #[test]
    fn sweep_reports_only_degradations() {
        let monitor = LivenessMonitor::new(Duration::from_secs(10));
        let now = Instant::now() + Duration::from_secs(60);
        let fresh = agent("fresh", now);
        let quiet = agent("quiet", now - Duration::from_secs(7));
        let silent = agent("silent", now - Duration::from_secs(30));
        let mut already_lost = agent("already-lost", now - Duration::from_secs(30));
        already_lost.set_liveness(Liveness::Lost);

        let agents: BTreeMap<_, _> = [fresh, quiet, silent, already_lost]
            .into_iter()
            .map(|a| (a.id().clone(), a))
            .collect();

        let transitions = monitor.sweep(&agents, now);
        assert_eq!(
            transitions,
            vec![
                (AgentId::from("quiet"), Liveness::SuspectedLost),
                (AgentId::from("silent"), Liveness::Lost),
            ]
        );
    }

    #[test]
    fn suspected_agent_becomes_lost() {
        let monitor = LivenessMonitor::new(Duration::from_millis(100));
        let now = Instant::now() + Duration::from_secs(1);
        let mut quiet = agent("quiet", now - Duration::from_millis(150));
        quiet.set_liveness(Liveness::SuspectedLost);
        let agents = BTreeMap::from([(quiet.id().clone(), quiet)]);
        assert_eq!(
            monitor.sweep(&agents, now),
            vec![(AgentId::from("quiet"), Liveness::Lost)]
        );
    }
}
