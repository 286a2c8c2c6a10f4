//! Directory client definitions.

use std::sync::Arc;

use async_trait::async_trait;
use habsync_core::{Outcome, Result, ResultExt};
use tracing::{info, warn};

use crate::directory::IdentityDirectory;
use crate::report::StageReport;
use crate::stage::{Stage, StageContext, StageName};

/// Creates or updates every configured client.
pub struct DirectoryClientsStage {
    directory: Arc<dyn IdentityDirectory>,
}

impl DirectoryClientsStage {
    pub fn new(directory: Arc<dyn IdentityDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl Stage for DirectoryClientsStage {
    fn name(&self) -> StageName {
        StageName::DirectoryClients
    }

    async fn run(&self, ctx: &StageContext<'_>) -> Result<StageReport> {
        let mut report = StageReport::new(self.name());
        for client in &ctx.config.clients {
            ctx.cancel.check()?;
            match self.directory.save_client(client).await.entity_scoped()? {
                Ok(Outcome::Changed) => {
                    info!(client = %client.client_id, "saved client");
                    report.record_change();
                }
                Ok(Outcome::Unchanged) => report.record_unchanged(),
                Err(e) => {
                    warn!(client = %client.client_id, error = %e, "failed to save client");
                    report.record_failure(client.client_id.clone(), "save client", e);
                }
            }
        }
        Ok(report)
    }
}
