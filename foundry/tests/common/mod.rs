#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use foundry::{
    ClusterGateway, Ctx, Error, ProjectStatus, ResourceApi, Settings, StatusStore, naming,
};
use k8s_openapi::api::{
    apps::v1::Deployment,
    autoscaling::v1::{Scale, ScaleSpec},
    batch::v1::{Job, JobStatus},
    core::v1::{Pod, Secret, Service},
    networking::v1::Ingress,
};
use kube::{Resource, ResourceExt, api::ObjectMeta};

pub const NS: &str = "apps";
pub const DOMAIN: &str = "example.dev";

type Journal = Arc<Mutex<Vec<String>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    Get,
    Replace,
    Delete,
    List,
}

impl Op {
    fn verb(self) -> &'static str {
        match self {
            Op::Create => "create",
            Op::Get => "get",
            Op::Replace => "replace",
            Op::Delete => "delete",
            Op::List => "list",
        }
    }
}

/// Per-kind behavior of the fake API server.
pub trait FakeKind: Resource<DynamicType = ()> + Clone + Send + Sync + 'static {
    const KIND: &'static str;

    fn on_create(&mut self, _seq: u64) {}

    fn check_replace(_stored: &Self, _next: &Self) -> Result<(), Error> {
        Ok(())
    }
}

impl FakeKind for Job {
    const KIND: &'static str = "job";
}

impl FakeKind for Secret {
    const KIND: &'static str = "secret";
}

impl FakeKind for Deployment {
    const KIND: &'static str = "deployment";
}

impl FakeKind for Ingress {
    const KIND: &'static str = "ingress";
}

impl FakeKind for Pod {
    const KIND: &'static str = "pod";
}

impl FakeKind for Service {
    const KIND: &'static str = "service";

    fn on_create(&mut self, seq: u64) {
        if let Some(spec) = self.spec.as_mut() {
            if spec.cluster_ip.is_none() {
                spec.cluster_ip = Some(format!("10.96.0.{seq}"));
            }
        }
    }

    fn check_replace(stored: &Self, next: &Self) -> Result<(), Error> {
        let ip = |s: &Service| s.spec.as_ref().and_then(|s| s.cluster_ip.clone());
        if ip(stored) != ip(next) {
            return Err(Error::Rejected("spec.clusterIP: field is immutable".into()));
        }
        Ok(())
    }
}

type Script<K> = (usize, Box<dyn Fn(&mut K) + Send + Sync>);

struct StoreInner<K> {
    objects: Mutex<BTreeMap<(String, String), K>>,
    failures: Mutex<HashSet<(Op, String)>>,
    conflicts: Mutex<HashMap<(Op, String), usize>>,
    vanishing: Mutex<HashSet<String>>,
    gets: Mutex<HashMap<String, usize>>,
    scripts: Mutex<HashMap<String, Script<K>>>,
    versions: Arc<AtomicU64>,
    journal: Journal,
}

/// In-memory objects of one kind, shared by every handle the fake hands out.
pub struct Store<K> {
    inner: Arc<StoreInner<K>>,
}

impl<K> Clone for Store<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K: FakeKind> Store<K> {
    fn new(versions: Arc<AtomicU64>, journal: Journal) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                objects: Mutex::new(BTreeMap::new()),
                failures: Mutex::new(HashSet::new()),
                conflicts: Mutex::new(HashMap::new()),
                vanishing: Mutex::new(HashSet::new()),
                gets: Mutex::new(HashMap::new()),
                scripts: Mutex::new(HashMap::new()),
                versions,
                journal,
            }),
        }
    }

    fn next_version(&self) -> u64 {
        self.inner.versions.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn record(&self, op: Op, name: &str) -> Result<(), Error> {
        self.inner
            .journal
            .lock()
            .unwrap()
            .push(format!("{} {} {name}", op.verb(), K::KIND));
        if self.inner.failures.lock().unwrap().contains(&(op, name.to_string())) {
            return Err(Error::Rejected(format!("injected {} failure for {} {name}", op.verb(), K::KIND)));
        }
        let mut conflicts = self.inner.conflicts.lock().unwrap();
        if let Some(left) = conflicts.get_mut(&(op, name.to_string())).filter(|left| **left > 0) {
            *left -= 1;
            return Err(Error::Conflict(format!("injected {} conflict for {} {name}", op.verb(), K::KIND)));
        }
        Ok(())
    }

    /// Makes every `op` on `name` fail.
    pub fn fail(&self, op: Op, name: &str) {
        self.inner.failures.lock().unwrap().insert((op, name.to_string()));
    }

    pub fn heal(&self, op: Op, name: &str) {
        self.inner.failures.lock().unwrap().remove(&(op, name.to_string()));
    }

    /// Makes the next `times` calls of `op` on `name` fail with a conflict, as
    /// when a concurrent writer got there first.
    pub fn conflict_times(&self, op: Op, name: &str, times: usize) {
        self.inner
            .conflicts
            .lock()
            .unwrap()
            .insert((op, name.to_string()), times);
    }

    /// Removes `name` right before the next get answers, as when another
    /// client deletes it between two calls.
    pub fn vanish_on_next_get(&self, name: &str) {
        self.inner.vanishing.lock().unwrap().insert(name.to_string());
    }

    /// Seeds an object without going through the API.
    pub fn insert(&self, mut obj: K) {
        let seq = self.next_version();
        obj.meta_mut().namespace = Some(NS.into());
        obj.meta_mut().resource_version = Some(seq.to_string());
        obj.on_create(seq);
        let key = (NS.to_string(), obj.name_any());
        self.inner.objects.lock().unwrap().insert(key, obj);
    }

    pub fn get(&self, name: &str) -> Option<K> {
        self.inner
            .objects
            .lock()
            .unwrap()
            .get(&(NS.to_string(), name.to_string()))
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner
            .objects
            .lock()
            .unwrap()
            .keys()
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.objects.lock().unwrap().len()
    }

    /// Number of `get` calls made for `name`.
    pub fn gets(&self, name: &str) -> usize {
        self.inner.gets.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    /// Applies `mutate` to the stored object when the `n`-th get for `name`
    /// arrives, before answering it.
    pub fn on_nth_get(&self, name: &str, n: usize, mutate: impl Fn(&mut K) + Send + Sync + 'static) {
        let script: Box<dyn Fn(&mut K) + Send + Sync> = Box::new(mutate);
        self.inner
            .scripts
            .lock()
            .unwrap()
            .insert(name.to_string(), (n, script));
    }

    fn mutate(&self, name: &str, f: impl FnOnce(&mut K)) -> Result<K, Error> {
        let mut objects = self.inner.objects.lock().unwrap();
        let obj = objects
            .get_mut(&(NS.to_string(), name.to_string()))
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        f(obj);
        obj.meta_mut().resource_version = Some(self.next_version().to_string());
        Ok(obj.clone())
    }
}

pub struct FakeResource<K> {
    store: Store<K>,
    ns: String,
}

#[async_trait]
impl<K: FakeKind> ResourceApi<K> for FakeResource<K> {
    async fn create(&self, obj: &K) -> Result<K, Error> {
        let name = obj.name_any();
        self.store.record(Op::Create, &name)?;
        let mut objects = self.store.inner.objects.lock().unwrap();
        let key = (self.ns.clone(), name.clone());
        if objects.contains_key(&key) {
            return Err(Error::Conflict(format!("{} {name} already exists", K::KIND)));
        }
        let seq = self.store.next_version();
        let mut stored = obj.clone();
        stored.meta_mut().namespace = Some(self.ns.clone());
        stored.meta_mut().resource_version = Some(seq.to_string());
        stored.meta_mut().uid = Some(format!("uid-{seq}"));
        stored.on_create(seq);
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn get(&self, name: &str) -> Result<Option<K>, Error> {
        let count = {
            let mut gets = self.store.inner.gets.lock().unwrap();
            let count = gets.entry(name.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        self.store.record(Op::Get, name)?;

        let mut objects = self.store.inner.objects.lock().unwrap();
        let key = (self.ns.clone(), name.to_string());
        if let Some((n, script)) = self.store.inner.scripts.lock().unwrap().get(name) {
            if *n == count {
                if let Some(obj) = objects.get_mut(&key) {
                    script(obj);
                }
            }
        }
        if self.store.inner.vanishing.lock().unwrap().remove(name) {
            objects.remove(&key);
        }
        Ok(objects.get(&key).cloned())
    }

    async fn replace(&self, name: &str, obj: &K) -> Result<K, Error> {
        self.store.record(Op::Replace, name)?;
        let mut objects = self.store.inner.objects.lock().unwrap();
        let key = (self.ns.clone(), name.to_string());
        let stored = objects
            .get(&key)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        if obj.meta().resource_version.is_none()
            || obj.meta().resource_version != stored.meta().resource_version
        {
            return Err(Error::Conflict(format!("{} {name} was modified", K::KIND)));
        }
        K::check_replace(stored, obj)?;

        let mut next = obj.clone();
        next.meta_mut().namespace = Some(self.ns.clone());
        next.meta_mut().uid = stored.meta().uid.clone();
        next.meta_mut().resource_version = Some(self.store.next_version().to_string());
        objects.insert(key, next.clone());
        Ok(next)
    }

    async fn delete(&self, name: &str) -> Result<(), Error> {
        self.store.record(Op::Delete, name)?;
        self.store
            .inner
            .objects
            .lock()
            .unwrap()
            .remove(&(self.ns.clone(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    async fn list(&self, label_selector: &str) -> Result<Vec<K>, Error> {
        self.store.record(Op::List, label_selector)?;
        let selector = parse_selector(label_selector)
            .ok_or_else(|| Error::Rejected(format!("unsupported selector {label_selector}")))?;
        Ok(self
            .store
            .inner
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), obj)| {
                *ns == self.ns && selector_matches(&selector, obj.meta().labels.as_ref())
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }
}

/// Parses an equality-based selector (`a=b,c=d`, `==` accepted). Set-based
/// and `!=` terms yield `None`.
pub fn parse_selector(selector: &str) -> Option<BTreeMap<String, String>> {
    selector
        .split(',')
        .filter(|term| !term.trim().is_empty())
        .map(|term| {
            let (k, v) = term.split_once('=')?;
            let v = v.strip_prefix('=').unwrap_or(v);
            if k.ends_with('!') {
                return None;
            }
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

pub fn selector_matches(
    selector: &BTreeMap<String, String>,
    labels: Option<&BTreeMap<String, String>>,
) -> bool {
    match labels {
        Some(labels) => selector.iter().all(|(k, v)| labels.get(k) == Some(v)),
        None => selector.is_empty(),
    }
}

/// An API server in memory: resource versions, conflicts on create,
/// token-checked replaces, immutable service `clusterIP`s and injectable
/// failures.
pub struct FakeCluster {
    pub jobs: Store<Job>,
    pub secrets: Store<Secret>,
    pub workloads: Store<Deployment>,
    pub services: Store<Service>,
    pub ingresses: Store<Ingress>,
    pub pods: Store<Pod>,
    journal: Journal,
    logs: Mutex<HashMap<String, String>>,
    metrics: Mutex<HashMap<String, serde_json::Value>>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        let versions = Arc::new(AtomicU64::new(0));
        let journal: Journal = Arc::default();
        Arc::new(Self {
            jobs: Store::new(versions.clone(), journal.clone()),
            secrets: Store::new(versions.clone(), journal.clone()),
            workloads: Store::new(versions.clone(), journal.clone()),
            services: Store::new(versions.clone(), journal.clone()),
            ingresses: Store::new(versions.clone(), journal.clone()),
            pods: Store::new(versions, journal.clone()),
            journal,
            logs: Mutex::default(),
            metrics: Mutex::default(),
        })
    }

    /// Every call made so far, as `"<verb> <kind> <name>"`.
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    pub fn clear_journal(&self) {
        self.journal.lock().unwrap().clear();
    }

    pub fn add_pod(&self, name: &str, project_id: &str, logs: &str) {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(name.into()),
                labels: Some(BTreeMap::from([(
                    naming::LABEL_PROJECT_ID.to_string(),
                    project_id.to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };
        self.pods.insert(pod);
        self.logs.lock().unwrap().insert(name.into(), logs.into());
    }

    pub fn set_pod_metrics(&self, pod: &str, body: serde_json::Value) {
        self.metrics.lock().unwrap().insert(pod.into(), body);
    }

    fn note(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }
}

pub fn job_status(succeeded: i32, failed: i32) -> impl Fn(&mut Job) + Send + Sync + 'static {
    move |job: &mut Job| {
        job.status = Some(JobStatus {
            succeeded: Some(succeeded),
            failed: Some(failed),
            ..Default::default()
        });
    }
}

#[async_trait]
impl ClusterGateway for FakeCluster {
    fn jobs(&self, ns: &str) -> Box<dyn ResourceApi<Job>> {
        Box::new(FakeResource {
            store: self.jobs.clone(),
            ns: ns.into(),
        })
    }

    fn secrets(&self, ns: &str) -> Box<dyn ResourceApi<Secret>> {
        Box::new(FakeResource {
            store: self.secrets.clone(),
            ns: ns.into(),
        })
    }

    fn workloads(&self, ns: &str) -> Box<dyn ResourceApi<Deployment>> {
        Box::new(FakeResource {
            store: self.workloads.clone(),
            ns: ns.into(),
        })
    }

    fn services(&self, ns: &str) -> Box<dyn ResourceApi<Service>> {
        Box::new(FakeResource {
            store: self.services.clone(),
            ns: ns.into(),
        })
    }

    fn ingresses(&self, ns: &str) -> Box<dyn ResourceApi<Ingress>> {
        Box::new(FakeResource {
            store: self.ingresses.clone(),
            ns: ns.into(),
        })
    }

    fn pods(&self, ns: &str) -> Box<dyn ResourceApi<Pod>> {
        Box::new(FakeResource {
            store: self.pods.clone(),
            ns: ns.into(),
        })
    }

    async fn get_scale(&self, _ns: &str, workload: &str) -> Result<Scale, Error> {
        self.note(format!("get-scale deployment {workload}"));
        let d = self
            .workloads
            .get(workload)
            .ok_or_else(|| Error::NotFound(workload.to_string()))?;
        Ok(Scale {
            metadata: ObjectMeta {
                name: Some(workload.into()),
                resource_version: d.metadata.resource_version.clone(),
                ..Default::default()
            },
            spec: Some(ScaleSpec {
                replicas: d.spec.as_ref().and_then(|s| s.replicas),
            }),
            ..Default::default()
        })
    }

    async fn replace_scale(&self, _ns: &str, workload: &str, scale: &Scale) -> Result<Scale, Error> {
        let replicas = scale.spec.as_ref().and_then(|s| s.replicas);
        self.note(format!("replace-scale deployment {workload}"));
        self.workloads.mutate(workload, |d| {
            if let Some(spec) = d.spec.as_mut() {
                spec.replicas = replicas;
            }
        })?;
        Ok(scale.clone())
    }

    async fn pod_logs(&self, _ns: &str, pod: &str, tail_lines: i64) -> Result<String, Error> {
        self.note(format!("logs pod {pod}"));
        let logs = self
            .logs
            .lock()
            .unwrap()
            .get(pod)
            .cloned()
            .ok_or_else(|| Error::NotFound(pod.to_string()))?;
        let lines: Vec<&str> = logs.lines().collect();
        let skip = lines.len().saturating_sub(tail_lines.max(0) as usize);
        Ok(lines[skip..].join("\n"))
    }

    async fn pod_metrics(
        &self,
        _ns: &str,
        pod: &str,
        _group: &str,
        _version: &str,
    ) -> Result<serde_json::Value, Error> {
        self.note(format!("metrics pod {pod}"));
        self.metrics
            .lock()
            .unwrap()
            .get(pod)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("metrics for {pod}")))
    }
}

/// Status store keeping the full history of every project.
#[derive(Default)]
pub struct RecordingStatusStore {
    history: Mutex<HashMap<String, Vec<ProjectStatus>>>,
    urls: Mutex<HashMap<String, String>>,
    slow: Mutex<Option<(ProjectStatus, Duration)>>,
}

impl RecordingStatusStore {
    /// Makes the next write of `status` take `delay` after recording it.
    pub fn slow_write(&self, status: ProjectStatus, delay: Duration) {
        *self.slow.lock().unwrap() = Some((status, delay));
    }

    pub fn history(&self, project_id: &str) -> Vec<ProjectStatus> {
        self.history
            .lock()
            .unwrap()
            .get(project_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn current(&self, project_id: &str) -> Option<ProjectStatus> {
        self.history(project_id).last().copied()
    }

    pub fn url(&self, project_id: &str) -> Option<String> {
        self.urls.lock().unwrap().get(project_id).cloned()
    }
}

#[async_trait]
impl StatusStore for RecordingStatusStore {
    async fn update_status(
        &self,
        project_id: &str,
        status: ProjectStatus,
        deploy_url: Option<&str>,
    ) -> Result<(), Error> {
        self.history
            .lock()
            .unwrap()
            .entry(project_id.to_string())
            .or_default()
            .push(status);
        if let Some(url) = deploy_url.filter(|u| !u.is_empty()) {
            self.urls
                .lock()
                .unwrap()
                .insert(project_id.to_string(), url.to_string());
        }
        let delay = {
            let mut slow = self.slow.lock().unwrap();
            match *slow {
                Some((s, delay)) if s == status => {
                    *slow = None;
                    Some(delay)
                }
                _ => None,
            }
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

pub fn settings() -> Settings {
    Settings {
        namespace: NS.into(),
        domain: DOMAIN.into(),
        ..Default::default()
    }
}

pub fn ctx(cluster: &Arc<FakeCluster>, store: &Arc<RecordingStatusStore>) -> Ctx {
    let cluster: Arc<dyn ClusterGateway> = cluster.clone();
    let store: Arc<dyn StatusStore> = store.clone();
    Ctx::new(Some(cluster), store, settings()).unwrap()
}

pub fn unavailable_ctx() -> Ctx {
    Ctx::new(None, Arc::new(RecordingStatusStore::default()), settings()).unwrap()
}

pub fn config(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Steps named by an aggregate error.
pub fn failed_steps(err: Error) -> Vec<String> {
    match err {
        Error::Aggregate(failures) => failures.steps().into_iter().map(String::from).collect(),
        other => panic!("expected aggregate error, got {other:?}"),
    }
}
