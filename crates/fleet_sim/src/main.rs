mod agent;
mod config;
mod generator;
mod link;
mod metrics;

use crate::agent::{AgentModel, SimAgent};
use crate::config::Config;
use crate::generator::TaskGenerator;
use crate::link::{ImpairedLink, LinkConfig};
use crate::metrics::FleetMetrics;
use anyhow::Context;
use clap::Parser;
use mission_planner::{Coordinator, Metrics, MissionCatalog, Planner, StraightLine};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{fmt, EnvFilter};

const OUTBOUND_CHANNEL_CAPACITY: usize = 256;
const AGENT_INBOX_CAPACITY: usize = 8;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let config = Config::parse();
    let planner_config = config::planner_config_from_env()?;
    tracing::info!(config = ?config, planner = ?planner_config, "Loaded configuration");

    let mission = std::fs::read_to_string(&config.mission_file)
        .with_context(|| format!("Failed to read mission file '{}'", config.mission_file.display()))?;
    let catalog = Arc::new(
        MissionCatalog::from_yaml_str(&mission).context("Failed to parse mission file")?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let metrics = Arc::new(Metrics::new());
    let fleet_metrics = Arc::new(FleetMetrics::register(&metrics.registry)?);

    let model = AgentModel {
        speed_mps: config.agent_speed_mps,
        drain_per_meter: planner_config.drain_per_meter,
        beacon_interval: Duration::from_millis(config.beacon_interval_ms),
        failure_percent: config.failure_percent,
    };

    // Spawn the planner
    let coordinator = Coordinator::new(
        planner_config,
        catalog.as_ref().clone(),
        Arc::new(StraightLine),
        metrics.clone(),
    );
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
    let (planner, planner_task) = Planner::spawn(coordinator, outbound_tx, shutdown_rx.clone());

    // Spawn the simulated fleet
    let mut routes = BTreeMap::new();
    let mut agent_handles = Vec::with_capacity(config.agents.len());
    for spec in config.agents.iter().cloned() {
        let (inbox_tx, inbox_rx) = mpsc::channel(AGENT_INBOX_CAPACITY);
        routes.insert(spec.id.clone(), inbox_tx);
        let start = catalog.agent_base(&spec.id).unwrap_or_default();
        let agent = SimAgent::new(spec, model, start, planner.clone(), fleet_metrics.clone());
        agent_handles.push(agent.spawn(inbox_rx, shutdown_rx.clone()));
    }

    // Spawn the dispatch link
    let link_config = LinkConfig {
        latency: Duration::from_millis(config.link_latency_ms),
        jitter: Duration::from_millis(config.link_jitter_ms),
        drop_percent: config.link_drop_percent,
    };
    let link_handle = ImpairedLink::new(link_config, routes, fleet_metrics.clone())
        .spawn(outbound_rx, shutdown_rx.clone());

    // Spawn the task generator
    let generator_handle = (config.task_interval_ms > 0).then(|| {
        TaskGenerator::new(
            catalog.clone(),
            Duration::from_millis(config.task_interval_ms),
            planner.clone(),
        )
        .spawn(shutdown_rx.clone())
    });

    if let Some(secs) = config.mission_duration_secs {
        let planner = planner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            if let Err(e) = planner.mission_over(true).await {
                tracing::warn!(error = %e, "Failed to end the mission");
            }
        });
    }

    // Spawn the metrics server
    let metrics_handle = {
        let router = metrics.router();
        let addr = config.metrics_listen_addr;
        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind metrics listener on {addr}"))?;
            tracing::info!(addr = %addr, "Metrics server started");
            axum::serve(listener, router.into_make_service()).await?;
            Ok::<(), anyhow::Error>(())
        })
    };

    tracing::info!(agents = config.agents.len(), "All services started. Awaiting shutdown signal...");

    shutdown_signal().await;

    tracing::info!("Shutdown signal received. Terminating services...");
    let snapshot = planner.snapshot();
    tracing::info!(
        pending = snapshot.pending.len(),
        agents = snapshot.agents.len(),
        mission_over = snapshot.mission_over,
        "Final fleet state"
    );
    // The drop of the sender will cause all receivers to receive the shutdown signal.
    drop(shutdown_tx);

    match planner_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Planner failed."),
        Err(e) => tracing::error!(error = %e, "Planner task panicked."),
    }
    if let Err(e) = link_handle.await {
        tracing::error!(error = %e, "Dispatch link task failed.");
    }
    for handle in agent_handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Simulated agent exited with an error."),
            Err(e) => tracing::error!(error = %e, "Simulated agent task panicked."),
        }
    }
    if let Some(handle) = generator_handle {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Task generator failed.");
        }
    }
    metrics_handle.abort();

    tracing::info!("Fleet simulation shut down gracefully.");
    Ok(())
}

/// Listens for OS shutdown signals (SIGINT, SIGTERM) and resolves when one is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
