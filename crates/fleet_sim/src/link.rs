//! Lossy, delayed delivery of dispatches from the planner to its agents.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use api::AgentId;
use mission_planner::OutboundDispatch;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{sleep, Instant},
};

use crate::metrics::FleetMetrics;

#[derive(Debug, Clone, Copy, Default)]
pub struct LinkConfig {
    pub latency: Duration,
    pub jitter: Duration,
    pub drop_percent: u8,
}

impl LinkConfig {
    fn delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            rand::random::<u64>() % (jitter_ms + 1)
        } else {
            0
        };
        self.latency + Duration::from_millis(jitter)
    }

    fn drops(&self) -> bool {
        self.drop_percent > 0 && rand::random::<u8>() % 100 < self.drop_percent
    }
}

/// Routes each dispatch to the inbox of the agent it is addressed to.
pub struct ImpairedLink {
    config: LinkConfig,
    routes: BTreeMap<AgentId, mpsc::Sender<OutboundDispatch>>,
    metrics: Arc<FleetMetrics>,
}

impl ImpairedLink {
    pub fn new(
        config: LinkConfig,
        routes: BTreeMap<AgentId, mpsc::Sender<OutboundDispatch>>,
        metrics: Arc<FleetMetrics>,
    ) -> Self {
        Self {
            config,
            routes,
            metrics,
        }
    }

    pub fn spawn(
        self,
        mut outbound: mpsc::Receiver<OutboundDispatch>,
        mut shutdown_rx: watch::Receiver<()>,
    ) -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move {
            tracing::info!(config = ?self.config, "Dispatch link started.");
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    out = outbound.recv() => match out {
                        Some(out) => self.forward(out),
                        None => break,
                    },
                }
            }
            tracing::info!("Dispatch link has shut down.");
            Ok(())
        })
    }

    fn forward(&self, out: OutboundDispatch) {
        let agent_id = out.dispatch.agent_id.clone();
        let transaction = out.dispatch.transaction;

        let Some(inbox) = self.routes.get(&agent_id).cloned() else {
            tracing::warn!(agent_id = %agent_id, transaction, "No route to agent; dispatch discarded");
            return;
        };

        if self.config.drops() {
            tracing::warn!(agent_id = %agent_id, transaction, "Dropping dispatch");
            self.metrics.dispatches_dropped_total.inc();
            // A lost message is never answered: keep the ack open until the
            // planner stops waiting for it.
            tokio::spawn(async move {
                let mut ack = out.ack;
                ack.closed().await;
            });
            return;
        }

        let delay = self.config.delay();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            let sent = Instant::now();
            if !delay.is_zero() {
                sleep(delay).await;
            }
            metrics.link_latency_seconds.observe(sent.elapsed().as_secs_f64());
            if inbox.send(out).await.is_err() {
                tracing::debug!(agent_id = %agent_id, transaction, "Agent inbox closed");
                return;
            }
            metrics.dispatches_delivered_total.inc();
        });
    }
}
