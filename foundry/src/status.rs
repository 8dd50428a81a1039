use async_trait::async_trait;
use tracing::info;

use crate::{error::Error, project::ProjectStatus};

/// Persistence of project status, owned by the surrounding application.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Partial update: the deploy URL is only written when present and non-empty.
    async fn update_status(
        &self,
        project_id: &str,
        status: ProjectStatus,
        deploy_url: Option<&str>,
    ) -> Result<(), Error>;
}

/// Store that only records transitions in the log. Used by the CLI, where no
/// database is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatusStore;

#[async_trait]
impl StatusStore for LogStatusStore {
    async fn update_status(
        &self,
        project_id: &str,
        status: ProjectStatus,
        deploy_url: Option<&str>,
    ) -> Result<(), Error> {
        match deploy_url.filter(|u| !u.is_empty()) {
            Some(url) => info!(project_id, %status, deploy_url = url, "project status changed"),
            None => info!(project_id, %status, "project status changed"),
        }
        Ok(())
    }
}
