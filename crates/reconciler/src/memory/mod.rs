//! In-memory collaborators.
//!
//! Both keep their whole state in one serializable snapshot, so a run can be
//! rehearsed offline against a JSON dump of the real systems.

mod boards;
mod directory;

use std::path::Path;

use habsync_core::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;

pub use boards::{BoardsSnapshot, InMemoryBoards};
pub use directory::{DirectorySnapshot, InMemoryDirectory, SnapshotClient};

fn new_id() -> String {
    ulid::Ulid::new().to_string().to_lowercase()
}

async fn read_snapshot<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::transport(format!("read {}", path.display()), e.to_string()))?;
    serde_json::from_str(&raw)
        .map_err(|e| Error::invalid_input(format!("snapshot {}: {e}", path.display())))
}

async fn write_snapshot<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let raw = serde_json::to_string_pretty(value)
        .map_err(|e| Error::invalid_input(format!("snapshot {}: {e}", path.display())))?;
    tokio::fs::write(path, raw)
        .await
        .map_err(|e| Error::transport(format!("write {}", path.display()), e.to_string()))
}

#[derive(Debug, Clone)]
struct Fault {
    operation: &'static str,
    key: Option<String>,
    error: Error,
}

/// Failures armed by tests, keyed by operation name and optional entity key.
#[derive(Debug, Default)]
struct Faults {
    armed: RwLock<Vec<Fault>>,
}

impl Faults {
    async fn arm(&self, operation: &'static str, key: Option<String>, error: Error) {
        self.armed.write().await.push(Fault { operation, key, error });
    }

    async fn clear(&self) {
        self.armed.write().await.clear();
    }

    async fn check(&self, operation: &str, key: &str) -> Result<()> {
        let armed = self.armed.read().await;
        match armed
            .iter()
            .find(|f| f.operation == operation && f.key.as_deref().is_none_or(|k| k == key))
        {
            Some(fault) => Err(fault.error.clone()),
            None => Ok(()),
        }
    }
}
