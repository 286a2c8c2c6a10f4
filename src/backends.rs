//! Collaborators selected by the configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use habsync_config::{BoardsConfig, BoardsSource, Config, DirectoryConfig, DirectorySource};
use habsync_keycloak::{Credentials, KeycloakDirectory};
use habsync_reconciler::{BoardSystem, IdentityDirectory, InMemoryBoards, InMemoryDirectory};
use tracing::info;

/// A snapshot-backed collaborator, written back after the run.
enum Snapshot {
    Directory(Arc<InMemoryDirectory>, PathBuf),
    Boards(Arc<InMemoryBoards>, PathBuf),
}

/// The collaborators of one run.
#[derive(Default)]
pub struct Backends {
    pub directory: Option<Arc<dyn IdentityDirectory>>,
    pub boards: Option<Arc<dyn BoardSystem>>,
    snapshots: Vec<Snapshot>,
}

impl Backends {
    /// Connect or load every configured collaborator.
    ///
    /// # Errors
    ///
    /// Fails when a snapshot cannot be loaded or a client cannot be built.
    pub async fn open(config: &Config) -> Result<Self> {
        let mut backends = Self::default();
        if let Some(directory) = &config.directory {
            backends.open_directory(directory).await?;
        }
        if let Some(boards) = &config.boards {
            backends.open_boards(boards).await?;
        }
        Ok(backends)
    }

    async fn open_directory(&mut self, config: &DirectoryConfig) -> Result<()> {
        match &config.source {
            DirectorySource::Keycloak(keycloak) => {
                let directory = KeycloakDirectory::new(Credentials {
                    url: keycloak.url.clone(),
                    realm: keycloak.realm.clone(),
                    login_realm: keycloak.login_realm.clone(),
                    username: keycloak.username.clone(),
                    password: keycloak.password.clone(),
                })
                .context("failed to set up the keycloak client")?;
                info!(url = %keycloak.url, realm = %keycloak.realm, "using keycloak directory");
                self.directory = Some(Arc::new(directory));
            }
            DirectorySource::Snapshot { path } => {
                let directory = Arc::new(
                    InMemoryDirectory::load(path)
                        .await
                        .with_context(|| format!("failed to load directory snapshot {}", path.display()))?,
                );
                info!(path = %path.display(), "using directory snapshot");
                self.directory = Some(directory.clone());
                self.snapshots.push(Snapshot::Directory(directory, path.clone()));
            }
        }
        Ok(())
    }

    async fn open_boards(&mut self, config: &BoardsConfig) -> Result<()> {
        match &config.source {
            BoardsSource::Snapshot { path } => {
                let mut boards = InMemoryBoards::load(path)
                    .await
                    .with_context(|| format!("failed to load boards snapshot {}", path.display()))?;
                if let Some(domain) = &config.slug_domain {
                    boards = boards.with_domain(domain.clone());
                }
                let boards = Arc::new(boards);
                info!(path = %path.display(), "using boards snapshot");
                self.boards = Some(boards.clone());
                self.snapshots.push(Snapshot::Boards(boards, path.clone()));
            }
        }
        Ok(())
    }

    /// Write snapshot-backed collaborators back to their files.
    ///
    /// # Errors
    ///
    /// Fails on the first snapshot that cannot be written.
    pub async fn save(&self) -> Result<()> {
        for snapshot in &self.snapshots {
            match snapshot {
                Snapshot::Directory(directory, path) => directory
                    .save(path)
                    .await
                    .with_context(|| format!("failed to save directory snapshot {}", path.display()))?,
                Snapshot::Boards(boards, path) => boards
                    .save(path)
                    .await
                    .with_context(|| format!("failed to save boards snapshot {}", path.display()))?,
            }
            info!("snapshot saved");
        }
        Ok(())
    }
}
