use std::sync::Arc;

use crate::{
    config::Settings, error::Error, gateway::ClusterGateway, metrics::Metrics,
    status::StatusStore, watcher::WatcherRegistry,
};

/// Capabilities shared by every component. Built once at startup and passed
/// to each component constructor.
#[derive(Clone)]
pub struct Ctx {
    cluster: Option<Arc<dyn ClusterGateway>>,
    pub status: Arc<dyn StatusStore>,
    pub settings: Arc<Settings>,
    pub watchers: Arc<WatcherRegistry>,
    pub metrics: Arc<Metrics>,
}

impl Ctx {
    pub fn new(
        cluster: Option<Arc<dyn ClusterGateway>>,
        status: Arc<dyn StatusStore>,
        settings: Settings,
    ) -> Result<Self, Error> {
        Ok(Self {
            cluster,
            status,
            settings: Arc::new(settings),
            watchers: Arc::new(WatcherRegistry::default()),
            metrics: Arc::new(Metrics::new()?),
        })
    }

    /// The cluster gateway, or [`Error::Unavailable`] when the control plane
    /// started without a cluster connection.
    pub fn cluster(&self) -> Result<&dyn ClusterGateway, Error> {
        self.cluster.as_deref().ok_or(Error::Unavailable)
    }

    pub fn namespace(&self) -> &str {
        &self.settings.namespace
    }
}
