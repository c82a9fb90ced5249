use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, GaugeVec, Opts, Registry};

/// Collectors of the simulated fleet and its link.
///
/// Registered next to the planner's own collectors so that one `/metrics`
/// endpoint serves both.
pub struct FleetMetrics {
    pub beacons_sent_total: IntCounterVec,
    pub tasks_reported_total: IntCounterVec,
    pub battery_fraction: GaugeVec,
    pub dispatches_delivered_total: IntCounter,
    pub dispatches_dropped_total: IntCounter,
    pub link_latency_seconds: Histogram,
}

impl FleetMetrics {
    pub fn register(registry: &Registry) -> anyhow::Result<Self> {
        macro_rules! reg {
            ($m:expr) => {{
                let m = $m?;
                registry.register(Box::new(m.clone()))?;
                m
            }};
        }

        Ok(Self {
            beacons_sent_total: reg!(IntCounterVec::new(
                Opts::new("sim_beacons_sent_total", "Total beacons sent by simulated agents"),
                &["agent_id"]
            )),
            tasks_reported_total: reg!(IntCounterVec::new(
                Opts::new("sim_tasks_reported_total", "Total task results reported by simulated agents"),
                &["agent_id", "outcome"]
            )),
            battery_fraction: reg!(GaugeVec::new(
                Opts::new("sim_battery_fraction", "Battery fraction of each simulated agent"),
                &["agent_id"]
            )),
            dispatches_delivered_total: reg!(IntCounter::new(
                "link_dispatches_delivered_total",
                "Total dispatches delivered by the link"
            )),
            dispatches_dropped_total: reg!(IntCounter::new(
                "link_dispatches_dropped_total",
                "Total dispatches dropped by the link"
            )),
            link_latency_seconds: reg!(Histogram::with_opts(HistogramOpts::new(
                "link_latency_seconds",
                "Delay applied to each delivered dispatch"
            ))),
        })
    }
}
