//! Read-only resources of a mission: who needs help, what can be carried, and
//! where things are.

use std::collections::BTreeMap;

use api::{AgentId, Position, TaskParams};
use serde::{Deserialize, Serialize};

use crate::error::PlannerError;

/// Name of the per-agent position agents return to after their work.
pub const BASE_POSITION: &str = "base";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanTarget {
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Where the tool is picked up.
    pub position: Position,
    #[serde(default)]
    pub weight_kg: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MissionCatalog {
    pub human_targets: BTreeMap<String, HumanTarget>,
    pub tools: BTreeMap<String, Tool>,
    /// Mission-wide named positions: waypoints and charging stations.
    pub locations: BTreeMap<String, Position>,
    /// Named positions that only make sense for one agent, such as its base.
    pub agent_positions: BTreeMap<AgentId, BTreeMap<String, Position>>,
}

impl MissionCatalog {
    pub fn from_yaml_str(doc: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(doc)
    }

    pub fn agent_base(&self, agent_id: &AgentId) -> Option<Position> {
        self.agent_positions
            .get(agent_id)
            .and_then(|named| named.get(BASE_POSITION))
            .copied()
    }

    /// Validates `params` against the catalog and resolves the positions the
    /// task visits, in order.
    ///
    /// An empty route means "the executing agent's base" and is only produced
    /// for a recharge without a station.
    pub fn resolve_route(&self, params: &TaskParams) -> Result<Vec<Position>, PlannerError> {
        match params {
            TaskParams::Deliver(p) => {
                let tool = self
                    .tools
                    .get(&p.tool)
                    .ok_or_else(|| PlannerError::invalid(format!("unknown tool '{}'", p.tool)))?;
                let target = self.human_target(&p.human_target)?;
                Ok(vec![tool.position, target.position])
            }
            TaskParams::Inspect(p) => {
                if p.waypoints.is_empty() {
                    return Err(PlannerError::invalid("inspection needs at least one waypoint"));
                }
                p.waypoints.iter().map(|name| self.location(name)).collect()
            }
            TaskParams::Monitor(p) => {
                if p.loops == 0 {
                    return Err(PlannerError::invalid("monitoring needs at least one loop"));
                }
                Ok(vec![self.human_target(&p.human_target)?.position])
            }
            TaskParams::Recharge(p) => match &p.station {
                Some(station) => Ok(vec![self.location(station)?]),
                None => Ok(Vec::new()),
            },
        }
    }

    fn human_target(&self, id: &str) -> Result<&HumanTarget, PlannerError> {
        self.human_targets
            .get(id)
            .ok_or_else(|| PlannerError::invalid(format!("unknown human target '{id}'")))
    }

    fn location(&self, name: &str) -> Result<Position, PlannerError> {
        self.locations
            .get(name)
            .copied()
            .ok_or_else(|| PlannerError::invalid(format!("unknown waypoint '{name}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::{DeliverParams, InspectParams, MonitorParams, RechargeParams};

    const MISSION: &str = r#"
human_targets:
  victim-1:
    position: { x: 100.0, y: 0.0 }
tools:
  first_aid_kit:
    position: { x: 10.0, y: 0.0 }
    weight_kg: 1.5
locations:
  bridge: { x: 0.0, y: 50.0, z: 5.0 }
  tower: { x: 40.0, y: 50.0 }
  station: { x: 0.0, y: 0.0 }
agent_positions:
  uav-1:
    base: { x: -5.0, y: 0.0 }
"#;

    fn catalog() -> MissionCatalog {
        MissionCatalog::from_yaml_str(MISSION).unwrap()
    }

    #[test]
    fn parses_mission_document() {
        let catalog = catalog();
        assert_eq!(catalog.human_targets.len(), 1);
        assert_eq!(catalog.tools["first_aid_kit"].weight_kg, 1.5);
        assert_eq!(catalog.locations["bridge"].z, 5.0);
        assert_eq!(
            catalog.agent_base(&AgentId::from("uav-1")),
            Some(Position::new(-5.0, 0.0, 0.0))
        );
        assert_eq!(catalog.agent_base(&AgentId::from("uav-2")), None);
    }

    #[test]
    fn delivery_route_goes_through_the_tool() {
        let route = catalog()
            .resolve_route(&TaskParams::Deliver(DeliverParams {
                human_target: "victim-1".into(),
                tool: "first_aid_kit".into(),
            }))
            .unwrap();
        assert_eq!(route, vec![Position::new(10.0, 0.0, 0.0), Position::new(100.0, 0.0, 0.0)]);
    }

    #[test]
    fn unknown_tool_is_rejected() {
        let err = catalog()
            .resolve_route(&TaskParams::Deliver(DeliverParams {
                human_target: "victim-1".into(),
                tool: "chainsaw".into(),
            }))
            .unwrap_err();
        assert!(matches!(err, PlannerError::InvalidTaskParams { .. }));
    }

    #[test]
    fn unknown_waypoint_is_rejected() {
        let err = catalog()
            .resolve_route(&TaskParams::Inspect(InspectParams {
                waypoints: vec!["bridge".into(), "dam".into()],
            }))
            .unwrap_err();
        assert_eq!(err, PlannerError::invalid("unknown waypoint 'dam'"));
    }

    #[test]
    fn monitor_needs_a_known_target() {
        let catalog = catalog();
        assert!(catalog
            .resolve_route(&TaskParams::Monitor(MonitorParams {
                human_target: "victim-1".into(),
                loops: 2,
            }))
            .is_ok());
        assert!(catalog
            .resolve_route(&TaskParams::Monitor(MonitorParams {
                human_target: "victim-9".into(),
                loops: 2,
            }))
            .is_err());
    }

    #[test]
    fn recharge_without_station_resolves_to_base() {
        let catalog = catalog();
        let route = catalog
            .resolve_route(&TaskParams::Recharge(RechargeParams::default()))
            .unwrap();
        assert!(route.is_empty());
        let route = catalog
            .resolve_route(&TaskParams::Recharge(RechargeParams {
                station: Some("station".into()),
            }))
            .unwrap();
        assert_eq!(route, vec![Position::new(0.0, 0.0, 0.0)]);
    }
}
