use std::sync::Arc;
use std::time::Duration;

use api::{DeliverParams, InspectParams, MonitorParams, TaskParams};
use mission_planner::{MissionCatalog, PlannerError, PlannerHandle};
use rand::{seq::IteratorRandom, Rng};
use tokio::{sync::watch, task::JoinHandle};

/// Submits a random task drawn from the mission catalog at a fixed interval.
pub struct TaskGenerator {
    catalog: Arc<MissionCatalog>,
    interval: Duration,
    planner: PlannerHandle,
}

impl TaskGenerator {
    pub fn new(catalog: Arc<MissionCatalog>, interval: Duration, planner: PlannerHandle) -> Self {
        Self {
            catalog,
            interval,
            planner,
        }
    }

    pub fn spawn(self, mut shutdown_rx: watch::Receiver<()>) -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // The first tick completes immediately; give agents time to beacon.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        let Some(params) = random_task(&self.catalog, &mut rand::thread_rng()) else {
                            tracing::warn!("Mission catalog offers nothing to generate tasks from.");
                            break;
                        };
                        match self.planner.submit_task(params).await {
                            Ok(task_id) => tracing::debug!(task_id = %task_id, "Generated task"),
                            Err(PlannerError::PlannerStopped) => break,
                            Err(e) => tracing::warn!(error = %e, "Generated task was refused"),
                        }
                    }
                }
            }
            tracing::info!("Task generator has shut down.");
            Ok(())
        })
    }
}

/// A task of a random kind the catalog can support.
pub fn random_task<R: Rng + ?Sized>(catalog: &MissionCatalog, rng: &mut R) -> Option<TaskParams> {
    let human_target = catalog.human_targets.keys().choose(rng).cloned();
    let tool = catalog.tools.keys().choose(rng).cloned();
    let waypoints: Vec<String> = catalog
        .locations
        .keys()
        .choose_multiple(rng, 3)
        .into_iter()
        .cloned()
        .collect();

    let mut options = Vec::new();
    if let (Some(human_target), Some(tool)) = (human_target.clone(), tool) {
        options.push(TaskParams::Deliver(DeliverParams { human_target, tool }));
    }
    if !waypoints.is_empty() {
        options.push(TaskParams::Inspect(InspectParams { waypoints }));
    }
    if let Some(human_target) = human_target {
        options.push(TaskParams::Monitor(MonitorParams {
            human_target,
            loops: rng.gen_range(1..=3),
        }));
    }

    if options.is_empty() {
        return None;
    }
    let pick = rng.gen_range(0..options.len());
    Some(options.swap_remove(pick))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    const MISSION: &str = r#"
human_targets:
  victim-1:
    position: { x: 10.0, y: 5.0 }
tools:
  medkit:
    position: { x: 0.0, y: 0.0 }
locations:
  bridge: { x: 40.0, y: 0.0 }
  tower: { x: 40.0, y: 40.0 }
"#;

    #[test]
    fn generated_tasks_resolve_against_the_catalog() {
        let catalog = MissionCatalog::from_yaml_str(MISSION).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let params = random_task(&catalog, &mut rng).unwrap();
            assert!(catalog.resolve_route(&params).is_ok(), "{params:?}");
        }
    }

    #[test]
    fn empty_catalog_generates_nothing() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(random_task(&MissionCatalog::default(), &mut rng).is_none());
    }

    #[test]
    fn locations_alone_yield_inspections() {
        let catalog = MissionCatalog::from_yaml_str("locations:\n  bridge: { x: 1.0, y: 2.0 }\n").unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            random_task(&catalog, &mut rng),
            Some(TaskParams::Inspect(InspectParams { waypoints })) if waypoints == vec!["bridge".to_owned()]
        ));
    }
}
