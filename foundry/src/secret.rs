use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use tracing::info;

use crate::{
    apply::{Outcome, apply, delete_if_exists, keep_token},
    context::Ctx,
    error::Error,
    naming,
};

/// Materializes configuration as Opaque secrets. Every write replaces the
/// whole value set.
#[derive(Clone)]
pub struct SecretManager {
    ctx: Ctx,
}

impl SecretManager {
    pub fn new(ctx: Ctx) -> Self {
        Self { ctx }
    }

    /// Creates the secret, or replaces the existing one carrying its
    /// concurrency token. Returns the secret name.
    pub async fn upsert(
        &self,
        namespace: &str,
        name: &str,
        labels: BTreeMap<String, String>,
        values: &BTreeMap<String, String>,
    ) -> Result<String, Error> {
        let api = self.ctx.cluster()?.secrets(namespace);
        let secret = desired_secret(name, labels, values);

        let outcome = apply(api.as_ref(), secret, keep_token).await?;
        let action = if outcome == Outcome::Created { "created" } else { "updated" };
        info!(secret = name, variables = values.len(), "{action} secret");
        Ok(name.to_string())
    }

    pub async fn upsert_project_secret(
        &self,
        namespace: &str,
        project_id: &str,
        owner_id: &str,
        values: &BTreeMap<String, String>,
    ) -> Result<String, Error> {
        let name = naming::project_secret_name(owner_id, project_id);
        let labels = naming::project_secret_labels(project_id, owner_id);
        self.upsert(namespace, &name, labels, values).await
    }

    /// Secret of a reusable environment group. An empty group has nothing to
    /// materialize: a previously written secret is removed and `None` is
    /// returned.
    pub async fn upsert_environment_secret(
        &self,
        environment_id: &str,
        owner_id: &str,
        values: &BTreeMap<String, String>,
    ) -> Result<Option<String>, Error> {
        let name = naming::environment_secret_name(environment_id);
        let ns = self.ctx.namespace().to_string();
        if values.is_empty() {
            self.delete(&ns, &name).await?;
            return Ok(None);
        }
        let labels = naming::environment_secret_labels(environment_id, owner_id);
        self.upsert(&ns, &name, labels, values).await.map(Some)
    }

    /// Absence counts as success.
    pub async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api = self.ctx.cluster()?.secrets(namespace);
        if delete_if_exists(api.as_ref(), name).await? == Outcome::Deleted {
            info!(secret = name, "deleted secret");
        }
        Ok(())
    }

    pub async fn delete_environment_secret(&self, environment_id: &str) -> Result<(), Error> {
        let name = naming::environment_secret_name(environment_id);
        let ns = self.ctx.namespace().to_string();
        self.delete(&ns, &name).await
    }
}

pub fn desired_secret(
    name: &str,
    labels: BTreeMap<String, String>,
    values: &BTreeMap<String, String>,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.into()),
            labels: Some(labels),
            ..Default::default()
        },
        string_data: Some(values.clone()),
        type_: Some("Opaque".into()),
        ..Default::default()
    }
}
