use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::Context;
use api::{AgentId, Capability};
use clap::Parser;
use mission_planner::PlannerConfig;

/// `fleet_sim` - Runs the mission planner against a simulated fleet.
///
/// Every simulated agent beacons, flies the queue the planner dispatches to
/// it and reports results. Dispatches travel over an impaired link so that
/// rollbacks and agent loss can be observed.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Path to the YAML mission file (human targets, tools, locations).
    #[arg(long, env = "MISSION_FILE")]
    pub mission_file: PathBuf,

    /// The listen address for the Prometheus metrics server.
    #[arg(long, env = "METRICS_LISTEN_ADDR", default_value = "0.0.0.0:9091")]
    pub metrics_listen_addr: SocketAddr,

    /// Simulated agents as `id:capability[:silent_after_secs]`.
    ///
    /// An agent with `silent_after_secs` stops beaconing and answering after
    /// that many seconds, as if it had crashed.
    #[arg(
        long = "agent",
        env = "SIM_AGENTS",
        value_delimiter = ',',
        required = true
    )]
    pub agents: Vec<AgentSpec>,

    /// Cruise speed of every simulated agent, in meters per second.
    #[arg(long, env = "SIM_AGENT_SPEED_MPS", default_value_t = 5.0)]
    pub agent_speed_mps: f64,

    /// Interval between beacons, in milliseconds. Must be positive.
    #[arg(long, env = "SIM_BEACON_INTERVAL_MS", default_value_t = 500, value_parser = clap::value_parser!(u64).range(1..))]
    pub beacon_interval_ms: u64,

    /// Chance, in percent, that a simulated agent reports a task as failed.
    #[arg(long, env = "SIM_FAILURE_PERCENT", default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub failure_percent: u8,

    #[arg(long, env = "LINK_LATENCY_MS", default_value_t = 0)]
    pub link_latency_ms: u64,

    #[arg(long, env = "LINK_JITTER_MS", default_value_t = 0)]
    pub link_jitter_ms: u64,

    /// Chance, in percent, that a dispatch is lost on the way to its agent.
    #[arg(long, env = "LINK_DROP_PERCENT", default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub link_drop_percent: u8,

    /// Interval between generated tasks. Zero disables the generator.
    #[arg(long, env = "SIM_TASK_INTERVAL_MS", default_value_t = 3000)]
    pub task_interval_ms: u64,

    /// Declare the mission over after this many seconds.
    #[arg(long, env = "SIM_MISSION_DURATION_SECS")]
    pub mission_duration_secs: Option<u64>,
}

/// One simulated agent from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSpec {
    pub id: AgentId,
    pub capability: Capability,
    pub silent_after: Option<Duration>,
}

impl FromStr for AgentSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let id = parts
            .next()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| format!("missing agent id in '{s}'"))?;
        let capability = parts
            .next()
            .ok_or_else(|| format!("missing capability in '{s}'"))?
            .parse()?;
        let silent_after = parts
            .next()
            .map(|secs| {
                secs.parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|e| format!("invalid silence delay in '{s}': {e}"))
            })
            .transpose()?;
        if parts.next().is_some() {
            return Err(format!("too many fields in '{s}'"));
        }
        Ok(Self {
            id: AgentId::from(id),
            capability,
            silent_after,
        })
    }
}

fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("Failed to parse {name}")),
        Err(_) => Ok(default),
    }
}

/// Parses the planner tunables from environment variables.
pub fn planner_config_from_env() -> anyhow::Result<PlannerConfig> {
    let defaults = PlannerConfig::default();
    let millis = |d: Duration| d.as_millis() as u64;

    let config = PlannerConfig {
        mission_id: std::env::var("PLANNER_MISSION_ID").unwrap_or(defaults.mission_id),
        battery_reserve: env_or("PLANNER_BATTERY_RESERVE", defaults.battery_reserve)?,
        recharge_threshold: env_or("PLANNER_RECHARGE_THRESHOLD", defaults.recharge_threshold)?,
        drain_per_meter: env_or("PLANNER_DRAIN_PER_METER", defaults.drain_per_meter)?,
        drain_per_task: env_or("PLANNER_DRAIN_PER_TASK", defaults.drain_per_task)?,
        beacon_timeout: Duration::from_millis(env_or(
            "PLANNER_BEACON_TIMEOUT_MS",
            millis(defaults.beacon_timeout),
        )?),
        sweep_interval: Duration::from_millis(env_or(
            "PLANNER_SWEEP_INTERVAL_MS",
            millis(defaults.sweep_interval),
        )?),
        queue_depth_penalty: env_or("PLANNER_QUEUE_DEPTH_PENALTY", defaults.queue_depth_penalty)?,
        dispatch_ack_timeout: Duration::from_millis(env_or(
            "PLANNER_DISPATCH_ACK_TIMEOUT_MS",
            millis(defaults.dispatch_ack_timeout),
        )?),
        max_task_attempts: env_or("PLANNER_MAX_TASK_ATTEMPTS", defaults.max_task_attempts)?,
    };
    config.validate().context("Invalid planner configuration")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_agent_specs() {
        let spec: AgentSpec = "uav-1:deliver".parse().unwrap();
        assert_eq!(spec.id, AgentId::from("uav-1"));
        assert_eq!(spec.capability, Capability::Deliver);
        assert_eq!(spec.silent_after, None);

        let spec: AgentSpec = "uav-2:monitor:30".parse().unwrap();
        assert_eq!(spec.silent_after, Some(Duration::from_secs(30)));
    }

    #[test]
    fn rejects_malformed_agent_specs() {
        assert!("uav-1".parse::<AgentSpec>().is_err());
        assert!(":deliver".parse::<AgentSpec>().is_err());
        assert!("uav-1:swim".parse::<AgentSpec>().is_err());
        assert!("uav-1:deliver:soon".parse::<AgentSpec>().is_err());
        assert!("uav-1:deliver:3:4".parse::<AgentSpec>().is_err());
    }

    #[test]
    fn cli_accepts_comma_separated_agents() {
        let config = Config::try_parse_from([
            "fleet_sim",
            "--mission-file",
            "missions/demo.yaml",
            "--agent",
            "uav-1:deliver,uav-2:inspect",
            "--agent",
            "uav-3:monitor:20",
        ])
        .unwrap();
        assert_eq!(config.agents.len(), 3);
        assert_eq!(config.task_interval_ms, 3000);
        assert!(Config::try_parse_from(["fleet_sim", "--mission-file", "m.yaml"]).is_err());
    }

    #[test]
    fn cli_rejects_a_zero_beacon_interval() {
        let args = |interval: &'static str| {
            [
                "fleet_sim",
                "--mission-file",
                "m.yaml",
                "--agent",
                "uav-1:deliver",
                "--beacon-interval-ms",
                interval,
            ]
        };
        assert!(Config::try_parse_from(args("0")).is_err());
        let config = Config::try_parse_from(args("250")).unwrap();
        assert_eq!(config.beacon_interval_ms, 250);
    }
}
