//! Resource names and labels. These must stay bit-exact: already deployed
//! projects are found again by them.

use std::collections::BTreeMap;

pub const MANAGED_BY: &str = "foundry";

pub const LABEL_PROJECT_ID: &str = "project-id";
pub const LABEL_OWNER_ID: &str = "owner-id";
pub const LABEL_ENVIRONMENT_ID: &str = "environment-id";
pub const LABEL_MANAGED_BY: &str = "managed-by";
pub const LABEL_TYPE: &str = "type";
pub const LABEL_APP: &str = "app";
pub const LABEL_FOUNDRY_APP: &str = "foundry-app";

pub const TYPE_BUILD: &str = "build";
pub const TYPE_PROJECT_SECRET: &str = "project-secret";
pub const TYPE_ENVIRONMENT_GROUP: &str = "environment-group";

pub const APP_LABEL_VALUE: &str = "foundry-app";

pub fn build_job_name(project_id: &str) -> String {
    format!("build-{project_id}")
}

pub fn project_secret_name(owner_id: &str, project_id: &str) -> String {
    format!("foundry-secret-{owner_id}-{project_id}")
}

pub fn environment_secret_name(environment_id: &str) -> String {
    format!("foundry-env-{environment_id}")
}

pub fn ingress_host(project_id: &str, domain: &str) -> String {
    format!("{project_id}-foundry.{domain}")
}

pub fn image_ref(registry: &str, project_id: &str) -> String {
    format!("{registry}/{project_id}:latest")
}

pub fn tls_secret_name(project_id: &str) -> String {
    format!("{project_id}-foundry-tls")
}

/// Selector matching every resource tagged with the project identity.
pub fn project_selector(project_id: &str) -> String {
    format!("{LABEL_PROJECT_ID}={project_id}")
}

/// Selector labels of the project workload. Deployment selectors are immutable,
/// so this set must never change.
pub fn workload_selector(project_id: &str, owner_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_APP.to_string(), APP_LABEL_VALUE.to_string()),
        (LABEL_PROJECT_ID.to_string(), project_id.to_string()),
        (LABEL_OWNER_ID.to_string(), owner_id.to_string()),
    ])
}

pub fn workload_labels(project_id: &str, owner_id: &str) -> BTreeMap<String, String> {
    let mut labels = workload_selector(project_id, owner_id);
    labels.insert(LABEL_MANAGED_BY.into(), MANAGED_BY.into());
    labels
}

pub fn build_labels(project_id: &str, owner_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_FOUNDRY_APP.to_string(), project_id.to_string()),
        (LABEL_PROJECT_ID.to_string(), project_id.to_string()),
        (LABEL_OWNER_ID.to_string(), owner_id.to_string()),
        (LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string()),
        (LABEL_TYPE.to_string(), TYPE_BUILD.to_string()),
    ])
}

pub fn project_secret_labels(project_id: &str, owner_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_PROJECT_ID.to_string(), project_id.to_string()),
        (LABEL_OWNER_ID.to_string(), owner_id.to_string()),
        (LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string()),
        (LABEL_TYPE.to_string(), TYPE_PROJECT_SECRET.to_string()),
    ])
}

pub fn environment_secret_labels(environment_id: &str, owner_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_ENVIRONMENT_ID.to_string(), environment_id.to_string()),
        (LABEL_OWNER_ID.to_string(), owner_id.to_string()),
        (LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string()),
        (LABEL_TYPE.to_string(), TYPE_ENVIRONMENT_GROUP.to_string()),
    ])
}
