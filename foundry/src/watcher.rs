//! Background watchers that follow a build job to a terminal state and then
//! hand over to the deployer.

use std::{
    collections::HashMap,
    fmt::Display,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use k8s_openapi::api::batch::v1::Job;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    context::Ctx,
    deploy::{DeployReconciler, DeployRequest},
    project::ProjectStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Running,
    Succeeded,
    Failed,
}

/// Reads the job's status counters. Success wins when both are set.
pub fn job_phase(job: &Job) -> JobPhase {
    let status = job.status.as_ref();
    let succeeded = status.and_then(|s| s.succeeded).unwrap_or(0);
    let failed = status.and_then(|s| s.failed).unwrap_or(0);
    if succeeded > 0 {
        JobPhase::Succeeded
    } else if failed > 0 {
        JobPhase::Failed
    } else {
        JobPhase::Running
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl Display for WatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl AsRef<str> for WatchOutcome {
    fn as_ref(&self) -> &str {
        match self {
            WatchOutcome::Succeeded => "succeeded",
            WatchOutcome::Failed => "failed",
            WatchOutcome::TimedOut => "timed_out",
            WatchOutcome::Cancelled => "cancelled",
        }
    }
}

/// Registration of one running watcher.
#[derive(Debug, Clone)]
pub struct WatchHandle {
    project_id: String,
    id: u64,
    token: CancellationToken,
}

impl WatchHandle {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// At most one live watcher per project. Registering a new watcher cancels
/// the previous one.
#[derive(Debug, Default)]
pub struct WatcherRegistry {
    next_id: AtomicU64,
    active: Mutex<HashMap<String, (u64, CancellationToken)>>,
}

impl WatcherRegistry {
    pub fn register(&self, project_id: &str) -> WatchHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let previous = self
            .lock()
            .insert(project_id.to_string(), (id, token.clone()));
        if let Some((_, old)) = previous {
            debug!(project_id, "superseding previous build watcher");
            old.cancel();
        }
        WatchHandle {
            project_id: project_id.to_string(),
            id,
            token,
        }
    }

    /// Cancels the project's watcher. Returns whether one was running.
    pub fn cancel(&self, project_id: &str) -> bool {
        match self.lock().remove(project_id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Removes the registration, unless a newer watcher already replaced it.
    pub fn finish(&self, handle: &WatchHandle) {
        let mut active = self.lock();
        if active.get(&handle.project_id).map(|(id, _)| *id) == Some(handle.id) {
            active.remove(&handle.project_id);
        }
    }

    pub fn is_active(&self, project_id: &str) -> bool {
        self.lock().contains_key(project_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (u64, CancellationToken)>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Polls the build job until it succeeds, fails, times out or is cancelled,
/// and records the resulting project status.
///
/// The first poll happens one interval after `started`; the deadline counts
/// from `started` as well.
pub async fn watch_build(
    ctx: Ctx,
    handle: WatchHandle,
    job_name: String,
    deploy: DeployRequest,
    started: Instant,
) -> WatchOutcome {
    let project_id = deploy.project_id.as_str();
    let period = ctx.settings.build.poll_interval();
    let deadline = tokio::time::sleep_until(started + ctx.settings.build.timeout());
    tokio::pin!(deadline);

    let mut ticker = tokio::time::interval_at(started + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let outcome = loop {
        tokio::select! {
            biased;
            _ = handle.token.cancelled() => break WatchOutcome::Cancelled,
            _ = &mut deadline => break WatchOutcome::TimedOut,
            _ = ticker.tick() => {
                match poll_job(&ctx, &job_name).await {
                    Some(JobPhase::Succeeded) => break WatchOutcome::Succeeded,
                    Some(JobPhase::Failed) => break WatchOutcome::Failed,
                    Some(JobPhase::Running) | None => {}
                }
            }
        }
    };

    let mut status = PipelineStatus::new(&ctx, project_id);
    let outcome = match outcome {
        WatchOutcome::Succeeded => {
            info!(project_id, job = %job_name, "build succeeded, deploying");
            deploy_build(&ctx, &handle, &deploy, &mut status).await
        }
        WatchOutcome::Failed => {
            warn!(project_id, job = %job_name, "build failed");
            status.advance(ProjectStatus::Error, None).await;
            outcome
        }
        WatchOutcome::TimedOut => {
            warn!(project_id, job = %job_name, "build timed out");
            status.advance(ProjectStatus::Error, None).await;
            outcome
        }
        WatchOutcome::Cancelled => outcome,
    };
    if outcome == WatchOutcome::Cancelled {
        info!(project_id, job = %job_name, "build watcher cancelled");
    }

    ctx.metrics.record_build(outcome.as_ref());
    ctx.watchers.finish(&handle);
    outcome
}

/// Deploys a successful build. The watcher may be cancelled at any point
/// until the deploy completes; a cancelled deploy is abandoned and leaves the
/// status alone.
async fn deploy_build(
    ctx: &Ctx,
    handle: &WatchHandle,
    deploy: &DeployRequest,
    status: &mut PipelineStatus<'_>,
) -> WatchOutcome {
    if handle.is_cancelled() {
        return WatchOutcome::Cancelled;
    }
    status.advance(ProjectStatus::Deploying, None).await;

    let reconciler = DeployReconciler::new(ctx.clone());
    let result = tokio::select! {
        biased;
        _ = handle.token.cancelled() => None,
        result = reconciler.deploy(deploy) => Some(result),
    };
    let Some(result) = result.filter(|_| !handle.is_cancelled()) else {
        return WatchOutcome::Cancelled;
    };

    match result {
        Ok(url) => {
            status.advance(ProjectStatus::Running, Some(&url)).await;
        }
        Err(e) => {
            error!(project_id = deploy.project_id.as_str(), error = %e, "deploy failed");
            status.advance(ProjectStatus::Error, None).await;
        }
    }
    WatchOutcome::Succeeded
}

/// Status writes of one build attempt. Starts at `building`; a write the
/// pipeline does not allow from the current status is dropped.
struct PipelineStatus<'a> {
    ctx: &'a Ctx,
    project_id: &'a str,
    current: ProjectStatus,
}

impl<'a> PipelineStatus<'a> {
    fn new(ctx: &'a Ctx, project_id: &'a str) -> Self {
        Self {
            ctx,
            project_id,
            current: ProjectStatus::Building,
        }
    }

    async fn advance(&mut self, next: ProjectStatus, url: Option<&str>) -> bool {
        let project_id = self.project_id;
        if !self.current.pipeline_allows(next) {
            warn!(project_id, from = %self.current, to = %next, "dropping out-of-order status");
            return false;
        }
        if let Err(e) = self.ctx.status.update_status(project_id, next, url).await {
            error!(project_id, status = %next, error = %e, "failed to record project status");
        }
        self.current = next;
        true
    }
}

/// One poll. Errors and a missing job are logged and treated as "not done
/// yet".
async fn poll_job(ctx: &Ctx, job_name: &str) -> Option<JobPhase> {
    let cluster = match ctx.cluster() {
        Ok(c) => c,
        Err(e) => {
            warn!(job = job_name, error = %e, "cannot poll build job");
            return None;
        }
    };
    match cluster.jobs(ctx.namespace()).get(job_name).await {
        Ok(Some(job)) => Some(job_phase(&job)),
        Ok(None) => {
            debug!(job = job_name, "build job not found yet");
            None
        }
        Err(e) => {
            warn!(job = job_name, error = %e, "error getting build job");
            None
        }
    }
}
