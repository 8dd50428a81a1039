use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{
            Container, ContainerPort, EnvFromSource, LocalObjectReference, PodSpec,
            PodTemplateSpec, ResourceRequirements, SecretEnvSource, Service, ServicePort,
            ServiceSpec,
        },
        networking::v1::{
            HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
            IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
        },
    },
    apimachinery::pkg::{
        api::resource::Quantity, apis::meta::v1::LabelSelector, util::intstr::IntOrString,
    },
};
use kube::api::ObjectMeta;
use tracing::{info, warn};

use crate::{
    apply::{apply, keep_token, with_outcome},
    config::Settings,
    context::Ctx,
    error::{Error, StepFailures},
    naming,
    project::effective_port,
    secret::SecretManager,
};

pub const SERVICE_PORT: i32 = 80;
const CONTAINER_NAME: &str = "app";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    pub project_id: String,
    pub owner_id: String,
    pub name: String,
    pub config: BTreeMap<String, String>,
    pub port: i32,
}

/// Brings the secret, workload, service and ingress of a project to their
/// desired state.
#[derive(Clone)]
pub struct DeployReconciler {
    ctx: Ctx,
    secrets: SecretManager,
}

impl DeployReconciler {
    pub fn new(ctx: Ctx) -> Self {
        let secrets = SecretManager::new(ctx.clone());
        Self { ctx, secrets }
    }

    /// Reconciles all four resources in order and returns the public URL.
    ///
    /// Every step runs even when an earlier one failed. Failures are returned
    /// together as [`Error::Aggregate`]; resources that did reconcile are left
    /// in place.
    pub async fn deploy(&self, req: &DeployRequest) -> Result<String, Error> {
        let cluster = self.ctx.cluster()?;
        let settings = &self.ctx.settings;
        let ns = self.ctx.namespace();
        let port = effective_port(req.port);
        let project_id = req.project_id.as_str();

        info!(project_id, name = %req.name, "deploying project");

        let mut failures = StepFailures::new();

        let secret_name = naming::project_secret_name(&req.owner_id, project_id);
        let secret_result = self
            .secrets
            .upsert_project_secret(ns, project_id, &req.owner_id, &req.config)
            .await;
        if let Err(e) = &secret_result {
            warn!(project_id, secret = %secret_name, error = %e, "secret step failed");
        }
        failures.record("secret", secret_result);

        let workloads = cluster.workloads(ns);
        let deployment = desired_deployment(settings, project_id, &req.owner_id, &secret_name, port);
        failures.record(
            "deployment",
            with_outcome(
                "deployment",
                project_id,
                apply(workloads.as_ref(), deployment, keep_token),
            )
            .await,
        );

        let services = cluster.services(ns);
        let service = desired_service(project_id, &req.owner_id, port);
        failures.record(
            "service",
            with_outcome(
                "service",
                project_id,
                apply(services.as_ref(), service, carry_cluster_ip),
            )
            .await,
        );

        let ingresses = cluster.ingresses(ns);
        let ingress = desired_ingress(settings, project_id, &req.owner_id);
        failures.record(
            "ingress",
            with_outcome(
                "ingress",
                project_id,
                apply(ingresses.as_ref(), ingress, keep_token),
            )
            .await,
        );

        let url = deploy_url(settings, project_id);
        let ok = failures.is_empty();
        self.ctx.metrics.record_deploy(ok);
        if ok {
            info!(project_id, secret = %secret_name, url = %url, "deployed project");
        } else {
            warn!(project_id, failed = ?failures.steps(), "deploy finished with failures");
        }
        failures.into_result().map(|()| url)
    }
}

pub fn deploy_url(settings: &Settings, project_id: &str) -> String {
    format!(
        "{}://{}",
        settings.url_scheme,
        naming::ingress_host(project_id, &settings.domain)
    )
}

/// The cluster assigns a Service its `clusterIP` once; a replace without it is
/// rejected, so it is copied from the live object.
fn carry_cluster_ip(existing: &Service, desired: &mut Service) {
    let cluster_ip = existing.spec.as_ref().and_then(|s| s.cluster_ip.clone());
    if let Some(spec) = desired.spec.as_mut() {
        spec.cluster_ip = cluster_ip;
    }
}

pub fn desired_deployment(
    settings: &Settings,
    project_id: &str,
    owner_id: &str,
    secret_name: &str,
    port: i32,
) -> Deployment {
    let selector = naming::workload_selector(project_id, owner_id);
    let labels = naming::workload_labels(project_id, owner_id);

    let limits = BTreeMap::from([
        ("cpu".to_string(), Quantity(settings.workload.cpu.clone())),
        ("memory".to_string(), Quantity(settings.workload.memory.clone())),
    ]);

    let container = Container {
        name: CONTAINER_NAME.into(),
        image: Some(naming::image_ref(&settings.registry, project_id)),
        ports: Some(vec![ContainerPort {
            container_port: port,
            ..Default::default()
        }]),
        env_from: Some(vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: secret_name.into(),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        image_pull_policy: Some("Always".into()),
        resources: Some(ResourceRequirements {
            requests: Some(limits.clone()),
            limits: Some(limits),
            ..Default::default()
        }),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(project_id.into()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    node_selector: Some(BTreeMap::from([(
                        "role".to_string(),
                        settings.build.node_pool.clone(),
                    )])),
                    image_pull_secrets: Some(vec![LocalObjectReference {
                        name: settings.build.pull_secret.clone(),
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn desired_service(project_id: &str, owner_id: &str, port: i32) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(project_id.into()),
            labels: Some(naming::workload_labels(project_id, owner_id)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(naming::workload_selector(project_id, owner_id)),
            ports: Some(vec![ServicePort {
                protocol: Some("TCP".into()),
                port: SERVICE_PORT,
                target_port: Some(IntOrString::Int(port)),
                ..Default::default()
            }]),
            type_: Some("ClusterIP".into()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn desired_ingress(settings: &Settings, project_id: &str, owner_id: &str) -> Ingress {
    let host = naming::ingress_host(project_id, &settings.domain);

    let annotations = BTreeMap::from([(
        "cert-manager.io/cluster-issuer".to_string(),
        settings.workload.cluster_issuer.clone(),
    )]);

    Ingress {
        metadata: ObjectMeta {
            name: Some(project_id.into()),
            labels: Some(naming::workload_labels(project_id, owner_id)),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: Some(settings.workload.ingress_class.clone()),
            tls: Some(vec![IngressTLS {
                hosts: Some(vec![host.clone()]),
                secret_name: Some(naming::tls_secret_name(project_id)),
            }]),
            rules: Some(vec![IngressRule {
                host: Some(host),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".into()),
                        path_type: "Prefix".into(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: project_id.into(),
                                port: Some(ServiceBackendPort {
                                    number: Some(SERVICE_PORT),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
