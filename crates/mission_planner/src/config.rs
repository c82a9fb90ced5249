use std::time::Duration;

/// Tunables of the planner. Loaded once before the planner starts.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Identifier reported in every fleet snapshot.
    pub mission_id: String,
    /// Battery fraction an agent must still hold after a task and the trip back to base.
    pub battery_reserve: f64,
    /// An idle agent below this fraction is sent to recharge.
    pub recharge_threshold: f64,
    /// Battery fraction consumed per meter travelled.
    pub drain_per_meter: f64,
    /// Fixed battery fraction consumed by executing one task.
    pub drain_per_task: f64,
    /// Beacon silence after which an agent is declared lost.
    pub beacon_timeout: Duration,
    /// Cadence of the liveness sweep.
    pub sweep_interval: Duration,
    /// Cost added per task already queued on an agent.
    pub queue_depth_penalty: f64,
    /// A dispatch not acknowledged within this window is rolled back.
    pub dispatch_ack_timeout: Duration,
    /// Failed results tolerated before a task is abandoned.
    pub max_task_attempts: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            mission_id: uuid::Uuid::new_v4().to_string(),
            battery_reserve: 0.2,
            recharge_threshold: 0.3,
            drain_per_meter: 0.0005,
            drain_per_task: 0.01,
            beacon_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(1),
            queue_depth_penalty: 25.0,
            dispatch_ack_timeout: Duration::from_secs(5),
            max_task_attempts: 3,
        }
    }
}

impl PlannerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let fraction = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(anyhow::anyhow!("{name} must be within [0, 1], got {v}"))
            }
        };
        fraction("battery_reserve", self.battery_reserve)?;
        fraction("recharge_threshold", self.recharge_threshold)?;
        if self.drain_per_meter < 0.0 || self.drain_per_task < 0.0 {
            anyhow::bail!("battery drain rates must not be negative");
        }
        if self.queue_depth_penalty < 0.0 {
            anyhow::bail!("queue_depth_penalty must not be negative");
        }
        if self.beacon_timeout.is_zero() || self.sweep_interval.is_zero() {
            anyhow::bail!("beacon_timeout and sweep_interval must be non-zero");
        }
        if self.max_task_attempts == 0 {
            anyhow::bail!("max_task_attempts must be at least 1");
        }
        Ok(())
    }

    pub fn battery_model(&self) -> BatteryModel {
        BatteryModel {
            reserve: self.battery_reserve,
            drain_per_meter: self.drain_per_meter,
            drain_per_task: self.drain_per_task,
        }
    }
}

/// Battery consumption estimate handed to agent records by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryModel {
    pub reserve: f64,
    pub drain_per_meter: f64,
    pub drain_per_task: f64,
}

impl BatteryModel {
    /// Charge used to travel `distance` meters and then carry out one task.
    pub fn task_drain(&self, distance: f64) -> f64 {
        distance * self.drain_per_meter + self.drain_per_task
    }

    /// Charge used to travel `distance` meters.
    pub fn travel_drain(&self, distance: f64) -> f64 {
        distance * self.drain_per_meter
    }
}
