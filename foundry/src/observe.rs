use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{context::Ctx, error::Error, naming};

pub const NO_PODS_MESSAGE: &str = "No pods found (deployment might be starting or stopped)";

/// Current resource usage of a project's pod, as reported by the metrics API.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PodStats {
    pub cpu: String,
    pub memory: String,
}

impl Default for PodStats {
    fn default() -> Self {
        Self {
            cpu: "0".into(),
            memory: "0".into(),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
struct PodMetrics {
    #[serde(default)]
    containers: Vec<ContainerMetrics>,
}

#[derive(Deserialize, Debug, Default)]
struct ContainerMetrics {
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize, Debug, Default)]
struct Usage {
    #[serde(default)]
    cpu: String,
    #[serde(default)]
    memory: String,
}

/// Usage of the first container, or zeroes when the body has none.
pub fn parse_pod_metrics(body: serde_json::Value) -> PodStats {
    let metrics: PodMetrics = match serde_json::from_value(body) {
        Ok(m) => m,
        Err(e) => {
            debug!(error = %e, "unreadable pod metrics");
            return PodStats::default();
        }
    };
    match metrics.containers.into_iter().next() {
        Some(c) => PodStats {
            cpu: c.usage.cpu,
            memory: c.usage.memory,
        },
        None => PodStats::default(),
    }
}

/// Read-only views of a running project.
#[derive(Clone)]
pub struct Observer {
    ctx: Ctx,
}

impl Observer {
    pub fn new(ctx: Ctx) -> Self {
        Self { ctx }
    }

    /// Tail of the first project pod's log, or [`NO_PODS_MESSAGE`] when no pod
    /// exists.
    pub async fn logs(&self, project_id: &str) -> Result<String, Error> {
        let cluster = self.ctx.cluster()?;
        let ns = self.ctx.namespace();

        let pods = cluster.pods(ns).list(&naming::project_selector(project_id)).await?;
        let Some(pod) = pods.first() else {
            return Ok(NO_PODS_MESSAGE.to_string());
        };
        let tail = self.ctx.settings.observe.log_tail_lines;
        match cluster.pod_logs(ns, &pod.name_any(), tail).await {
            Err(e) if e.is_not_found() => Ok(NO_PODS_MESSAGE.to_string()),
            other => other,
        }
    }

    /// Advisory usage figures. Only a missing cluster connection is an
    /// error; anything else degrades to zeroes.
    pub async fn stats(&self, project_id: &str) -> Result<PodStats, Error> {
        let cluster = self.ctx.cluster()?;
        let ns = self.ctx.namespace();
        let observe = &self.ctx.settings.observe;

        let pod = match cluster.pods(ns).list(&naming::project_selector(project_id)).await {
            Ok(pods) => match pods.into_iter().next() {
                Some(p) => p.name_any(),
                None => return Ok(PodStats::default()),
            },
            Err(e) => {
                debug!(project_id, error = %e, "listing pods for stats failed");
                return Ok(PodStats::default());
            }
        };

        match cluster
            .pod_metrics(ns, &pod, &observe.metrics_group, &observe.metrics_version)
            .await
        {
            Ok(body) => Ok(parse_pod_metrics(body)),
            Err(e) => {
                debug!(project_id, pod = %pod, error = %e, "pod metrics unavailable");
                Ok(PodStats::default())
            }
        }
    }
}
