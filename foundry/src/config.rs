use std::path::Path;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Control plane settings. Every field has a default, so an empty file (or no
/// file at all) yields a working configuration.
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Namespace holding every project-owned resource.
    pub namespace: String,
    /// Registry prefix for built images.
    pub registry: String,
    /// Platform domain used for ingress hosts.
    pub domain: String,
    /// Scheme of the returned deploy URL.
    pub url_scheme: String,
    pub build: BuildSettings,
    pub workload: WorkloadSettings,
    pub observe: ObserveSettings,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildSettings {
    pub builder_image: String,
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
    pub ttl_seconds_after_finished: i32,
    /// Docker config secret used to push built images and pull them again.
    pub pull_secret: String,
    /// Value of the `role` node label builds and apps are pinned to.
    pub node_pool: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkloadSettings {
    pub cpu: String,
    pub memory: String,
    pub ingress_class: String,
    pub cluster_issuer: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ObserveSettings {
    pub log_tail_lines: i64,
    pub metrics_group: String,
    pub metrics_version: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            namespace: "apps".into(),
            registry: "foundry-local".into(),
            domain: "heejunp.com".into(),
            url_scheme: "http".into(),
            build: BuildSettings::default(),
            workload: WorkloadSettings::default(),
            observe: ObserveSettings::default(),
        }
    }
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            builder_image: "gcr.io/kaniko-project/executor:latest".into(),
            poll_interval_secs: 5,
            timeout_secs: 20 * 60,
            ttl_seconds_after_finished: 3600,
            pull_secret: "regcred".into(),
            node_pool: "apps".into(),
        }
    }
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            cpu: "1".into(),
            memory: "1Gi".into(),
            ingress_class: "nginx".into(),
            cluster_issuer: "letsencrypt-prod".into(),
        }
    }
}

impl Default for ObserveSettings {
    fn default() -> Self {
        Self {
            log_tail_lines: 100,
            metrics_group: "metrics.k8s.io".into(),
            metrics_version: "v1beta1".into(),
        }
    }
}

impl BuildSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Settings {
    /// Parses settings from YAML. Missing fields fall back to defaults.
    pub fn from_yaml(raw: &str) -> Result<Self, Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|e| Error::Config(e.to_string()))
    }

    /// Loads settings from an optional file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let mut settings = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .map_err(|e| Error::Config(format!("{}: {e}", p.display())))?;
                Self::from_yaml(&raw)?
            }
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(registry) = non_empty("CONTAINER_REGISTRY") {
            self.registry = registry;
        }
        if let Some(domain) = non_empty("FOUNDRY_DOMAIN") {
            self.domain = domain;
        }
        if let Some(namespace) = non_empty("FOUNDRY_NAMESPACE") {
            self.namespace = namespace;
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.namespace.is_empty() {
            return Err(Error::Config("namespace must not be empty".into()));
        }
        if self.build.poll_interval_secs == 0 {
            return Err(Error::Config("build.pollIntervalSecs must be positive".into()));
        }
        if self.build.timeout_secs < self.build.poll_interval_secs {
            return Err(Error::Config(
                "build.timeoutSecs must not be shorter than the poll interval".into(),
            ));
        }
        Ok(())
    }

    /// JSON schema of the settings file, rendered as YAML.
    pub fn schema_yaml() -> Result<String, Error> {
        let schema = schemars::schema_for!(Settings);
        serde_yaml::to_string(&schema).map_err(|e| Error::Config(e.to_string()))
    }
}
