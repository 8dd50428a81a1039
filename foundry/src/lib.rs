//! Control plane of the Foundry app hosting platform: builds a project's
//! image on the cluster, deploys it behind a public hostname and manages its
//! lifecycle.

pub mod apply;
pub mod build;
pub mod config;
pub mod context;
pub mod deploy;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod metrics;
pub mod naming;
pub mod observe;
pub mod project;
pub mod secret;
pub mod status;
pub mod watcher;

pub use build::{BuildOrchestrator, BuildRequest};
pub use config::Settings;
pub use context::Ctx;
pub use deploy::{DeployReconciler, DeployRequest};
pub use error::Error;
pub use gateway::{ClusterGateway, KubeGateway, ResourceApi};
pub use lifecycle::{Action, LifecycleController};
pub use observe::{Observer, PodStats};
pub use project::{ConfigEntry, Project, ProjectStatus, ValueCipher};
pub use secret::SecretManager;
pub use status::StatusStore;
