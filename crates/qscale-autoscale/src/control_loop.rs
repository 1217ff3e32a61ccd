//! The control loop — sample, decide, act, once per poll interval.
//!
//! Each tick evaluates every service group concurrently: queue depth and
//! live replica count are read together, [`decide`] picks an action, and the
//! [`ReplicaController`] carries it out. State updates are applied after all
//! groups finish, so one slow or failing group never blocks another's
//! decision.
//!
//! A group whose inputs could not be read is skipped for the tick. A failed
//! action is logged and leaves state untouched; the loop itself never stops
//! on a per-group error.
//!
//! [`ControllerState`] only changes on a confirmed action. Live counts seen
//! along the way are kept apart, as the baseline for drift logging.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::{Instant, timeout};
use tracing::{Instrument, debug, error, info, info_span, warn};

use qscale_core::{
    ControllerConfig, ControllerState, QueueDepth, ScalingConfig, ScalingDecision, ServiceGroup,
};
use qscale_orchestrator::{OrchestrationError, Orchestrator, inspect_group};
use qscale_queue::{QueueError, QueueSampler};

use crate::controller::ReplicaController;
use crate::decision::decide;
use crate::error::ScalingError;

/// What happened to one group during a tick.
#[derive(Debug)]
pub enum Outcome {
    /// Queue depth could not be read; no decision was made.
    QueueUnavailable(QueueError),
    /// Live replica counts could not be read; no decision was made.
    OrchestrationUnavailable(OrchestrationError),
    /// Inside the hysteresis band, at a bound, or cooling down.
    NoAction,
    /// Decision computed but not applied (`--dry-run`).
    DryRun,
    /// Action applied and the new count confirmed.
    Scaled { confirmed: u32 },
    /// Action attempted and failed.
    Failed(ScalingError),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::QueueUnavailable(_) => "queue_unavailable",
            Outcome::OrchestrationUnavailable(_) => "orchestration_unavailable",
            Outcome::NoAction => "no_action",
            Outcome::DryRun => "dry_run",
            Outcome::Scaled { .. } => "scaled",
            Outcome::Failed(_) => "failed",
        }
    }
}

/// Per-group result of one tick.
#[derive(Debug)]
pub struct GroupReport {
    pub group: String,
    pub queue_depth: Option<QueueDepth>,
    /// Effective (minimum across roles) live replica count.
    pub replicas: Option<u32>,
    pub decision: Option<ScalingDecision>,
    pub outcome: Outcome,
}

/// Result of one tick across all groups.
#[derive(Debug, Default)]
pub struct TickReport {
    pub groups: Vec<GroupReport>,
}

impl TickReport {
    pub fn group(&self, name: &str) -> Option<&GroupReport> {
        self.groups.iter().find(|g| g.group == name)
    }

    /// Groups where an action failed.
    pub fn failures(&self) -> usize {
        self.groups
            .iter()
            .filter(|g| matches!(g.outcome, Outcome::Failed(_)))
            .count()
    }
}

/// Periodic queue-driven scaling of every configured service group.
pub struct ControlLoop {
    scaling: ScalingConfig,
    request_timeout: Duration,
    groups: Vec<ServiceGroup>,
    sampler: Arc<dyn QueueSampler>,
    orchestrator: Arc<dyn Orchestrator>,
    controller: ReplicaController,
    state: ControllerState,
    observed: HashMap<String, u32>,
    dry_run: bool,
}

impl ControlLoop {
    pub fn new(
        config: &ControllerConfig,
        sampler: Arc<dyn QueueSampler>,
        orchestrator: Arc<dyn Orchestrator>,
    ) -> Self {
        Self {
            scaling: config.scaling.clone(),
            request_timeout: config.timeouts.request_timeout(),
            groups: config.service_groups(),
            sampler,
            controller: ReplicaController::new(orchestrator.clone(), &config.timeouts),
            orchestrator,
            state: ControllerState::new(),
            observed: HashMap::new(),
            dry_run: false,
        }
    }

    /// Compute and log decisions without actuating anything.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Live effective count most recently read for `group`.
    pub fn last_observed(&self, group: &str) -> Option<u32> {
        self.observed.get(group).copied()
    }

    /// Read every group's live count as the drift baseline.
    ///
    /// Groups that cannot be inspected are left unknown and picked up on the
    /// first tick. Neither confirmed state nor any cooldown is touched.
    pub async fn bootstrap(&mut self) {
        let orchestrator = self.orchestrator.as_ref();
        let request_timeout = self.request_timeout;
        let observed = join_all(self.groups.iter().map(|group| async move {
            (group, inspect_group(orchestrator, group, request_timeout).await)
        }))
        .await;

        for (group, result) in observed {
            match result {
                Ok(live) => {
                    info!(
                        group = %group.name,
                        replicas = live.effective(),
                        by_role = ?live.by_role,
                        "bootstrapped replica count"
                    );
                    if live.is_divergent() {
                        warn!(group = %group.name, by_role = ?live.by_role, "group roles diverged");
                    }
                    self.observed.insert(group.name.clone(), live.effective());
                }
                Err(e) => {
                    warn!(group = %group.name, error = %e, "could not read replica count at startup");
                }
            }
        }
    }

    /// Run one evaluation pass over every group.
    pub async fn tick(&mut self) -> TickReport {
        let now = Instant::now();
        let this = &*self;
        let reports = join_all(this.groups.iter().map(|group| this.evaluate(group, now))).await;

        for report in &reports {
            self.apply(report);
        }
        TickReport { groups: reports }
    }

    async fn evaluate(&self, group: &ServiceGroup, now: Instant) -> GroupReport {
        let (depth, live) = tokio::join!(
            self.sample(&group.queue_key),
            inspect_group(self.orchestrator.as_ref(), group, self.request_timeout),
        );

        let mut report = GroupReport {
            group: group.name.clone(),
            queue_depth: None,
            replicas: None,
            decision: None,
            outcome: Outcome::NoAction,
        };

        let depth = match depth {
            Ok(depth) => depth,
            Err(e) => {
                report.outcome = Outcome::QueueUnavailable(e);
                return report;
            }
        };
        report.queue_depth = Some(depth);

        let live = match live {
            Ok(live) => live,
            Err(e) => {
                report.outcome = Outcome::OrchestrationUnavailable(e);
                return report;
            }
        };
        let current = live.effective();
        report.replicas = Some(current);

        if live.is_divergent() {
            warn!(group = %group.name, by_role = ?live.by_role, "group roles diverged");
        }
        if let Some(known) = self.last_observed(&group.name)
            && known != current
        {
            info!(
                group = %group.name,
                known,
                live = current,
                "replica count changed outside the controller"
            );
        }

        let since_last_action = self.state.time_since_last_action(&group.name, now);
        let decision = decide(depth, current, &self.scaling, since_last_action);
        report.decision = Some(decision);

        if !decision.is_action() {
            return report;
        }
        if self.dry_run {
            report.outcome = Outcome::DryRun;
            return report;
        }

        let span = info_span!(
            "acting",
            group = %group.name,
            action = %decision.action,
            from = current,
            to = decision.target_replicas
        );
        report.outcome = match self
            .controller
            .apply_scaling(group, decision.target_replicas)
            .instrument(span)
            .await
        {
            Ok(confirmed) => Outcome::Scaled { confirmed },
            Err(e) => Outcome::Failed(e),
        };
        report
    }

    async fn sample(&self, key: &str) -> Result<QueueDepth, QueueError> {
        timeout(self.request_timeout, self.sampler.sample(key))
            .await
            .map_err(|_| QueueError::Timeout(self.request_timeout))?
    }

    fn apply(&mut self, report: &GroupReport) {
        let group = report.group.as_str();
        let outcome = report.outcome.label();
        let action = report.decision.map(|d| d.action.to_string());
        let action = action.as_deref();
        let target = report.decision.map(|d| d.target_replicas);

        if let Some(replicas) = report.replicas {
            self.observed.insert(group.to_string(), replicas);
        }

        match &report.outcome {
            Outcome::QueueUnavailable(e) => {
                warn!(%group, outcome, error = %e, "queue unavailable, skipping group");
            }
            Outcome::OrchestrationUnavailable(e) => {
                warn!(
                    %group,
                    outcome,
                    queue_depth = report.queue_depth,
                    error = %e,
                    "orchestration unavailable, skipping group"
                );
            }
            Outcome::NoAction => {
                info!(
                    %group,
                    outcome,
                    queue_depth = report.queue_depth,
                    replicas = report.replicas,
                    action,
                    "evaluated"
                );
            }
            Outcome::DryRun => {
                info!(
                    %group,
                    outcome,
                    queue_depth = report.queue_depth,
                    replicas = report.replicas,
                    action,
                    target,
                    "dry run, not scaling"
                );
            }
            Outcome::Scaled { confirmed } => {
                self.state.record_action(group, *confirmed, Instant::now());
                self.observed.insert(group.to_string(), *confirmed);
                info!(
                    %group,
                    outcome,
                    queue_depth = report.queue_depth,
                    from = report.replicas,
                    to = confirmed,
                    action,
                    "scaled"
                );
            }
            Outcome::Failed(e) => {
                error!(
                    %group,
                    outcome,
                    queue_depth = report.queue_depth,
                    replicas = report.replicas,
                    action,
                    target,
                    error = %e,
                    "scaling action failed"
                );
            }
        }
    }

    /// Tick every poll interval until `shutdown` flips to `true`.
    ///
    /// An in-flight tick always completes; no new tick starts once shutdown
    /// is signalled.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.scaling.poll_interval();
        info!(
            groups = self.groups.len(),
            interval_secs = interval.as_secs(),
            dry_run = self.dry_run,
            "control loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let started = Instant::now();
            let report = self.tick().await;
            debug!(
                groups = report.groups.len(),
                failures = report.failures(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "tick complete"
            );

            tokio::select! {
                _ = tokio::time::sleep_until(started + interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("control loop stopped");
    }
}
