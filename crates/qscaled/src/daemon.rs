//! Subsystem assembly and the daemon's lifecycle.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{info, warn};

use qscale_autoscale::{ControlLoop, Outcome};
use qscale_core::{ControllerConfig, OrchestratorConfig};
use qscale_orchestrator::{DockerComposeOrchestrator, InMemoryOrchestrator, Orchestrator};
use qscale_queue::{QueueSampler, RedisQueueSampler};

/// Load the file under the environment overrides, and validate.
pub fn load_config(path: &Path) -> anyhow::Result<ControllerConfig> {
    let config = ControllerConfig::load(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    Ok(config)
}

pub fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;
    print!("{}", config.to_redacted_toml()?);
    info!(path = %path.display(), groups = config.groups.len(), "configuration valid");
    Ok(())
}

/// Bootstrap, then tick until SIGINT or SIGTERM.
pub async fn run(path: &Path, dry_run: bool) -> anyhow::Result<()> {
    info!("qscale daemon starting");

    let mut control = build_control_loop(&load_config(path)?, dry_run)?;
    control.bootstrap().await;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let loop_handle = tokio::spawn(async move {
        control.run(shutdown_rx).await;
    });

    shutdown_signal().await?;
    info!("shutdown signal received, finishing current tick");
    let _ = shutdown_tx.send(true);

    loop_handle.await.context("control loop task failed")?;

    info!("qscale daemon stopped");
    Ok(())
}

/// Bootstrap and run a single tick. Fails if any group's action failed.
pub async fn once(path: &Path, dry_run: bool) -> anyhow::Result<()> {
    let mut control = build_control_loop(&load_config(path)?, dry_run)?;
    control.bootstrap().await;

    let report = control.tick().await;
    for group in &report.groups {
        let decision = group
            .decision
            .map(|d| format!("{}->{}", d.action, d.target_replicas));
        println!(
            "{}\tdepth={}\treplicas={}\tdecision={}\toutcome={}",
            group.group,
            display_or_dash(group.queue_depth),
            display_or_dash(group.replicas),
            decision.as_deref().unwrap_or("-"),
            group.outcome.label(),
        );
    }

    let failed: Vec<&str> = report
        .groups
        .iter()
        .filter(|g| matches!(g.outcome, Outcome::Failed(_)))
        .map(|g| g.group.as_str())
        .collect();
    if !failed.is_empty() {
        anyhow::bail!("scaling failed for {}", failed.join(", "));
    }
    Ok(())
}

fn display_or_dash<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn build_control_loop(config: &ControllerConfig, dry_run: bool) -> anyhow::Result<ControlLoop> {
    let sampler: Arc<dyn QueueSampler> = Arc::new(
        RedisQueueSampler::new(&config.queue, config.timeouts.request_timeout())
            .context("creating redis queue sampler")?,
    );
    info!(queue = ?config.queue, "queue sampler initialized");

    let orchestrator = build_orchestrator(&config.orchestrator)?;

    for group in config.service_groups() {
        info!(group = %group, queue_key = %group.queue_key, "managing service group");
    }

    Ok(ControlLoop::new(config, sampler, orchestrator).with_dry_run(dry_run))
}

fn build_orchestrator(config: &OrchestratorConfig) -> anyhow::Result<Arc<dyn Orchestrator>> {
    match config {
        OrchestratorConfig::DockerCompose { project, .. } => {
            let docker = DockerComposeOrchestrator::from_config(config)
                .context("docker compose orchestrator settings")?;
            info!(
                %project,
                socket = %docker.socket().display(),
                "docker compose orchestrator initialized"
            );
            Ok(Arc::new(docker))
        }
        OrchestratorConfig::Static { replicas } => {
            warn!(
                roles = replicas.len(),
                "static orchestrator in use, no real replicas will change"
            );
            Ok(Arc::new(InMemoryOrchestrator::from_counts(replicas)))
        }
    }
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() -> anyhow::Result<()> {
    let mut terminate =
        signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("installing SIGINT handler")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}
