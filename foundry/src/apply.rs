//! Create-or-update and delete helpers shared by every resource kind.

use std::future::Future;

use kube::{Resource, ResourceExt};
use tracing::{debug, warn};

use crate::{error::Error, gateway::ResourceApi};

/// Attempts at the fetch-and-replace step before a conflict is given up on.
const REPLACE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    NoOp,
    Created,
    Updated,
    Deleted,
}

/// Creates `desired`, or replaces the existing object of the same name.
///
/// On conflict the live object is fetched and its `resourceVersion` carried
/// onto `desired` before replacing. `carry` may copy further fields the
/// server owns (a Service's `clusterIP`, for example). A conflict during the
/// replace means a concurrent writer won; the fetch is repeated. An object
/// deleted in between is created again.
pub async fn apply<K, F>(api: &dyn ResourceApi<K>, desired: K, carry: F) -> Result<Outcome, Error>
where
    K: Resource + Clone + Send + Sync,
    F: Fn(&K, &mut K) + Send + Sync,
{
    let name = desired.name_any();
    match api.create(&desired).await {
        Ok(_) => return Ok(Outcome::Created),
        Err(e) if e.is_conflict() => debug!(name = %name, "already exists, replacing"),
        Err(e) => return Err(e),
    }

    let mut last = Error::Conflict(name.clone());
    for _ in 0..REPLACE_ATTEMPTS {
        let Some(existing) = api.get(&name).await? else {
            debug!(name = %name, "gone before replace, creating again");
            match api.create(&desired).await {
                Ok(_) => return Ok(Outcome::Created),
                Err(e) if e.is_conflict() => {
                    last = e;
                    continue;
                }
                Err(e) => return Err(e),
            }
        };
        let mut next = desired.clone();
        next.meta_mut().resource_version = existing.meta().resource_version.clone();
        carry(&existing, &mut next);
        match api.replace(&name, &next).await {
            Ok(_) => return Ok(Outcome::Updated),
            Err(e) if e.is_conflict() || e.is_not_found() => last = e,
            Err(e) => return Err(e),
        }
    }
    Err(last)
}

/// Carries nothing beyond the concurrency token.
pub fn keep_token<K>(_existing: &K, _desired: &mut K) {}

/// Deletes `name`; an absent object counts as success.
pub async fn delete_if_exists<K: Send + Sync>(api: &dyn ResourceApi<K>, name: &str) -> Result<Outcome, Error> {
    match api.delete(name).await {
        Ok(()) => Ok(Outcome::Deleted),
        Err(e) if e.is_not_found() => Ok(Outcome::NoOp),
        Err(e) => Err(e),
    }
}

/// Runs one resource step and logs its outcome.
pub async fn with_outcome(
    resource: &str,
    name: &str,
    op: impl Future<Output = Result<Outcome, Error>>,
) -> Result<Outcome, Error> {
    match op.await {
        Ok(outcome) => {
            match outcome {
                Outcome::Created => debug!(resource, name, "created"),
                Outcome::Updated => debug!(resource, name, "updated"),
                Outcome::Deleted => debug!(resource, name, "deleted"),
                Outcome::NoOp => {}
            }
            Ok(outcome)
        }
        Err(e) => {
            warn!(resource, name, error = %e, "resource step failed");
            Err(e)
        }
    }
}
