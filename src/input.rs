//! Desired-state document loading.
//!
//! The document is a list of user records, in YAML or in JSON when the file
//! name ends with `.json`.

use std::path::Path;

use anyhow::{Context, Result};
use habsync_reconciler::{DesiredState, DesiredUserRecord};
use tracing::info;

/// Parse a document into user records.
///
/// # Errors
///
/// Fails when the text is not a list of user records.
pub fn parse_records(text: &str, json: bool) -> Result<Vec<DesiredUserRecord>> {
    if json {
        serde_json::from_str(text).context("invalid JSON user stock")
    } else {
        serde_yaml::from_str(text).context("invalid YAML user stock")
    }
}

/// Read the desired state from `path`.
///
/// # Errors
///
/// Fails when the file cannot be read or parsed, or declares a user twice.
pub async fn load_desired_state(path: &Path) -> Result<DesiredState> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read user stock {}", path.display()))?;
    let json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let records = parse_records(&text, json)
        .with_context(|| format!("failed to parse user stock {}", path.display()))?;

    let desired = DesiredState::from_records(records)
        .with_context(|| format!("invalid user stock {}", path.display()))?;
    info!(path = %path.display(), users = desired.len(), "loaded user stock");
    Ok(desired)
}
