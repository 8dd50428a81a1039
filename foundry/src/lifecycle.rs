use std::str::FromStr;

use k8s_openapi::api::autoscaling::v1::ScaleSpec;
use kube::ResourceExt;
use tracing::{info, warn};

use crate::{
    apply::{delete_if_exists, with_outcome},
    context::Ctx,
    error::{Error, StepFailures},
    naming,
    project::ProjectStatus,
};

/// User-facing lifecycle actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
}

impl Action {
    pub fn replicas(self) -> i32 {
        match self {
            Action::Start => 1,
            Action::Stop => 0,
        }
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Action::Start),
            "stop" => Ok(Action::Stop),
            other => Err(Error::InvalidAction(other.to_string())),
        }
    }
}

/// Start, stop and teardown of deployed projects.
#[derive(Clone)]
pub struct LifecycleController {
    ctx: Ctx,
}

impl LifecycleController {
    pub fn new(ctx: Ctx) -> Self {
        Self { ctx }
    }

    /// Parses and applies `start` or `stop`. Anything else is rejected before
    /// the cluster is touched.
    pub async fn apply_action(&self, project_id: &str, action: &str) -> Result<ProjectStatus, Error> {
        let action: Action = action.parse()?;
        self.set_replicas(project_id, action.replicas()).await
    }

    pub async fn set_replicas(&self, project_id: &str, replicas: i32) -> Result<ProjectStatus, Error> {
        let cluster = self.ctx.cluster()?;
        let ns = self.ctx.namespace();

        let mut scale = cluster.get_scale(ns, project_id).await?;
        scale.spec.get_or_insert_with(ScaleSpec::default).replicas = Some(replicas);
        cluster.replace_scale(ns, project_id, &scale).await?;

        let status = if replicas == 0 {
            ProjectStatus::Stopped
        } else {
            ProjectStatus::Running
        };
        info!(project_id, replicas, "project {}", if replicas == 0 { "stopped" } else { "started" });
        self.ctx.status.update_status(project_id, status, None).await?;
        Ok(status)
    }

    /// Removes every cluster resource of the project. Each step is attempted
    /// regardless of earlier failures; failures come back together.
    ///
    /// A still running build watcher is cancelled first so it cannot deploy
    /// into the project being removed.
    pub async fn delete(&self, project_id: &str) -> Result<(), Error> {
        let cluster = self.ctx.cluster()?;
        let ns = self.ctx.namespace();

        if self.ctx.watchers.cancel(project_id) {
            info!(project_id, "cancelled build watcher");
        }

        let mut failures = StepFailures::new();

        let ingresses = cluster.ingresses(ns);
        failures.record(
            "ingress",
            with_outcome("ingress", project_id, delete_if_exists(ingresses.as_ref(), project_id)).await,
        );

        let services = cluster.services(ns);
        failures.record(
            "service",
            with_outcome("service", project_id, delete_if_exists(services.as_ref(), project_id)).await,
        );

        let workloads = cluster.workloads(ns);
        failures.record(
            "deployment",
            with_outcome("deployment", project_id, delete_if_exists(workloads.as_ref(), project_id)).await,
        );

        let job_name = naming::build_job_name(project_id);
        let jobs = cluster.jobs(ns);
        failures.record(
            "job",
            with_outcome("job", &job_name, delete_if_exists(jobs.as_ref(), &job_name)).await,
        );

        let secrets = cluster.secrets(ns);
        let listed = secrets.list(&naming::project_selector(project_id)).await;
        if let Some(found) = failures.record("list secrets", listed) {
            for secret in found {
                let name = secret.name_any();
                let result = with_outcome("secret", &name, delete_if_exists(secrets.as_ref(), &name)).await;
                failures.record(format!("secret {name}"), result);
            }
        }

        if failures.is_empty() {
            info!(project_id, "deleted project resources");
        } else {
            self.ctx.metrics.teardown_failures.inc();
            warn!(project_id, failed = ?failures.steps(), "project teardown incomplete");
        }
        failures.into_result()
    }
}
