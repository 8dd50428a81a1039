//! Cluster access. Everything that talks to the Kubernetes API goes through
//! [`ClusterGateway`], so components can be handed an in-memory cluster in
//! tests.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::{
    NamespaceResourceScope,
    api::{
        apps::v1::Deployment,
        autoscaling::v1::Scale,
        batch::v1::Job,
        core::v1::{Pod, Secret, Service},
        networking::v1::Ingress,
    },
};
use kube::{
    Api, Client, Resource,
    api::{ApiResource, DeleteParams, DynamicObject, ListParams, LogParams, PostParams},
    core::gvk::GroupVersionKind,
};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::Error;

/// Uniform access to one namespaced resource kind.
#[async_trait]
pub trait ResourceApi<K: Send + Sync>: Send + Sync {
    /// Fails with [`Error::Conflict`] when an object of that name exists.
    async fn create(&self, obj: &K) -> Result<K, Error>;

    async fn get(&self, name: &str) -> Result<Option<K>, Error>;

    /// Full replacement. The object's `resourceVersion` is the concurrency
    /// token and must match the stored one.
    async fn replace(&self, name: &str, obj: &K) -> Result<K, Error>;

    /// Deletes with background propagation. Fails with [`Error::NotFound`]
    /// when absent.
    async fn delete(&self, name: &str) -> Result<(), Error>;

    async fn list(&self, label_selector: &str) -> Result<Vec<K>, Error>;
}

#[async_trait]
pub trait ClusterGateway: Send + Sync {
    fn jobs(&self, ns: &str) -> Box<dyn ResourceApi<Job>>;
    fn secrets(&self, ns: &str) -> Box<dyn ResourceApi<Secret>>;
    fn workloads(&self, ns: &str) -> Box<dyn ResourceApi<Deployment>>;
    fn services(&self, ns: &str) -> Box<dyn ResourceApi<Service>>;
    fn ingresses(&self, ns: &str) -> Box<dyn ResourceApi<Ingress>>;
    fn pods(&self, ns: &str) -> Box<dyn ResourceApi<Pod>>;

    async fn get_scale(&self, ns: &str, workload: &str) -> Result<Scale, Error>;
    async fn replace_scale(&self, ns: &str, workload: &str, scale: &Scale) -> Result<Scale, Error>;

    /// Last `tail_lines` lines of the pod's log.
    async fn pod_logs(&self, ns: &str, pod: &str, tail_lines: i64) -> Result<String, Error>;

    /// Raw PodMetrics body (everything but `metadata`), as served under
    /// `/apis/<group>/<version>/namespaces/<ns>/pods/<pod>`.
    async fn pod_metrics(
        &self,
        ns: &str,
        pod: &str,
        group: &str,
        version: &str,
    ) -> Result<serde_json::Value, Error>;
}

pub struct KubeResource<K> {
    api: Api<K>,
}

impl<K> KubeResource<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    pub fn new(client: Client, ns: &str) -> Self {
        Self {
            api: Api::namespaced(client, ns),
        }
    }
}

#[async_trait]
impl<K> ResourceApi<K> for KubeResource<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn create(&self, obj: &K) -> Result<K, Error> {
        Ok(self.api.create(&PostParams::default(), obj).await?)
    }

    async fn get(&self, name: &str) -> Result<Option<K>, Error> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn replace(&self, name: &str, obj: &K) -> Result<K, Error> {
        Ok(self.api.replace(name, &PostParams::default(), obj).await?)
    }

    async fn delete(&self, name: &str) -> Result<(), Error> {
        self.api.delete(name, &DeleteParams::background()).await?;
        Ok(())
    }

    async fn list(&self, label_selector: &str) -> Result<Vec<K>, Error> {
        let lp = ListParams::default().labels(label_selector);
        Ok(self.api.list(&lp).await?.items)
    }
}

/// Gateway backed by a live cluster connection.
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
}

impl KubeGateway {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connects with the ambient configuration: in-cluster first, then the
    /// local kubeconfig.
    pub async fn connect() -> Result<Self, Error> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    fn resource<K>(&self, ns: &str) -> Box<dyn ResourceApi<K>>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug
            + Send
            + Sync
            + 'static,
    {
        Box::new(KubeResource::<K>::new(self.client.clone(), ns))
    }
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    fn jobs(&self, ns: &str) -> Box<dyn ResourceApi<Job>> {
        self.resource(ns)
    }

    fn secrets(&self, ns: &str) -> Box<dyn ResourceApi<Secret>> {
        self.resource(ns)
    }

    fn workloads(&self, ns: &str) -> Box<dyn ResourceApi<Deployment>> {
        self.resource(ns)
    }

    fn services(&self, ns: &str) -> Box<dyn ResourceApi<Service>> {
        self.resource(ns)
    }

    fn ingresses(&self, ns: &str) -> Box<dyn ResourceApi<Ingress>> {
        self.resource(ns)
    }

    fn pods(&self, ns: &str) -> Box<dyn ResourceApi<Pod>> {
        self.resource(ns)
    }

    async fn get_scale(&self, ns: &str, workload: &str) -> Result<Scale, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), ns);
        Ok(api.get_scale(workload).await?)
    }

    async fn replace_scale(&self, ns: &str, workload: &str, scale: &Scale) -> Result<Scale, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), ns);
        let body = serde_json::to_vec(scale)?;
        Ok(api
            .replace_scale(workload, &PostParams::default(), body)
            .await?)
    }

    async fn pod_logs(&self, ns: &str, pod: &str, tail_lines: i64) -> Result<String, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), ns);
        let lp = LogParams {
            tail_lines: Some(tail_lines),
            ..Default::default()
        };
        Ok(api.logs(pod, &lp).await?)
    }

    async fn pod_metrics(
        &self,
        ns: &str,
        pod: &str,
        group: &str,
        version: &str,
    ) -> Result<serde_json::Value, Error> {
        let ar = ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk(group, version, "PodMetrics"),
            "pods",
        );
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), ns, &ar);
        Ok(api.get(pod).await?.data)
    }
}
