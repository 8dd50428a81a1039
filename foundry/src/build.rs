use std::{collections::BTreeMap, time::Duration};

use k8s_openapi::api::{
    batch::v1::{Job, JobSpec},
    core::v1::{
        Container, KeyToPath, PodSpec, PodTemplateSpec, SecretVolumeSource, Volume, VolumeMount,
    },
};
use kube::api::ObjectMeta;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::{
    config::Settings,
    context::Ctx,
    deploy::DeployRequest,
    error::Error,
    naming,
    project::{Project, ProjectStatus, effective_branch, effective_port},
    watcher::{WatchOutcome, watch_build},
};

const DOCKER_CONFIG_VOLUME: &str = "docker-config";
const DOCKER_CONFIG_MOUNT: &str = "/kaniko/.docker";
const CREATE_ATTEMPTS: usize = 5;
const CREATE_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub project_id: String,
    pub owner_id: String,
    pub name: String,
    pub repo_url: String,
    pub branch: String,
    /// Short-lived git credential, embedded into the clone URL.
    pub credential: String,
    pub config: BTreeMap<String, String>,
    pub port: i32,
}

impl BuildRequest {
    pub fn for_project(
        project: &Project,
        credential: impl Into<String>,
        config: BTreeMap<String, String>,
    ) -> Self {
        Self {
            project_id: project.id.clone(),
            owner_id: project.owner_id.clone(),
            name: project.name.clone(),
            repo_url: project.repo_url.clone(),
            branch: project.branch.clone(),
            credential: credential.into(),
            config,
            port: project.port,
        }
    }

    pub fn deploy_request(&self) -> DeployRequest {
        DeployRequest {
            project_id: self.project_id.clone(),
            owner_id: self.owner_id.clone(),
            name: self.name.clone(),
            config: self.config.clone(),
            port: effective_port(self.port),
        }
    }
}

/// Submits build jobs and spawns their watchers.
#[derive(Clone)]
pub struct BuildOrchestrator {
    ctx: Ctx,
}

impl BuildOrchestrator {
    pub fn new(ctx: Ctx) -> Self {
        Self { ctx }
    }

    /// Replaces the project's build job with a fresh one and returns once it is
    /// submitted. The outcome is followed by a background watcher.
    pub async fn trigger(
        &self,
        req: BuildRequest,
    ) -> Result<tokio::task::JoinHandle<WatchOutcome>, Error> {
        let cluster = self.ctx.cluster()?;
        let settings = &self.ctx.settings;
        let ns = self.ctx.namespace();
        let project_id = req.project_id.as_str();

        let job_name = naming::build_job_name(project_id);
        let image = naming::image_ref(&settings.registry, project_id);
        let context = git_context(&req.repo_url, &req.credential, effective_branch(&req.branch));
        let job = desired_job(settings, project_id, &req.owner_id, &context, &image);

        let jobs = cluster.jobs(ns);
        match jobs.delete(&job_name).await {
            Ok(()) => debug!(job = %job_name, "deleted previous build job"),
            Err(e) if e.is_not_found() => {}
            Err(e) => debug!(job = %job_name, error = %e, "ignoring build job cleanup error"),
        }

        let mut attempt = 1;
        loop {
            match jobs.create(&job).await {
                Ok(_) => break,
                // The previous job may still be on its way out.
                Err(e) if e.is_conflict() && attempt < CREATE_ATTEMPTS => {
                    debug!(job = %job_name, attempt, "build job still terminating, retrying");
                    attempt += 1;
                    tokio::time::sleep(CREATE_RETRY_DELAY).await;
                }
                Err(e) => {
                    error!(project_id, job = %job_name, error = %e, "failed to create build job");
                    if let Err(se) = self
                        .ctx
                        .status
                        .update_status(project_id, ProjectStatus::Error, None)
                        .await
                    {
                        error!(project_id, error = %se, "failed to record project status");
                    }
                    return Err(e);
                }
            }
        }

        info!(project_id, job = %job_name, repo = %req.repo_url, "triggered build job");
        self.ctx.metrics.builds_triggered.inc();
        if let Err(e) = self
            .ctx
            .status
            .update_status(project_id, ProjectStatus::Building, None)
            .await
        {
            error!(project_id, error = %e, "failed to record project status");
        }

        let handle = self.ctx.watchers.register(project_id);
        let started = Instant::now();
        Ok(tokio::spawn(watch_build(
            self.ctx.clone(),
            handle,
            job_name,
            req.deploy_request(),
            started,
        )))
    }
}

/// Clone URL with the credential embedded, so the builder needs no separate
/// credential mount.
pub fn git_context(repo_url: &str, credential: &str, branch: &str) -> String {
    let rest = repo_url.strip_prefix("https://").unwrap_or(repo_url);
    format!("git://oauth2:{credential}@{rest}#refs/heads/{branch}")
}

pub fn desired_job(
    settings: &Settings,
    project_id: &str,
    owner_id: &str,
    git_context: &str,
    image: &str,
) -> Job {
    // Build pods must not carry `project-id`; log lookups select app pods by it.
    let pod_labels = BTreeMap::from([
        (naming::LABEL_FOUNDRY_APP.to_string(), project_id.to_string()),
        (naming::LABEL_TYPE.to_string(), naming::TYPE_BUILD.to_string()),
    ]);

    let container = Container {
        name: "kaniko".into(),
        image: Some(settings.build.builder_image.clone()),
        args: Some(vec![
            format!("--context={git_context}"),
            format!("--destination={image}"),
            "--cache=true".into(),
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: DOCKER_CONFIG_VOLUME.into(),
            mount_path: DOCKER_CONFIG_MOUNT.into(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(naming::build_job_name(project_id)),
            labels: Some(naming::build_labels(project_id, owner_id)),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            ttl_seconds_after_finished: Some(settings.build.ttl_seconds_after_finished),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".into()),
                    node_selector: Some(BTreeMap::from([(
                        "role".to_string(),
                        settings.build.node_pool.clone(),
                    )])),
                    volumes: Some(vec![Volume {
                        name: DOCKER_CONFIG_VOLUME.into(),
                        secret: Some(SecretVolumeSource {
                            secret_name: Some(settings.build.pull_secret.clone()),
                            items: Some(vec![KeyToPath {
                                key: ".dockerconfigjson".into(),
                                path: "config.json".into(),
                                ..Default::default()
                            }]),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
