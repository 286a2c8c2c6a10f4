//! Layered loading: main file, drop-in directory, override file.

use std::fs;
use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Format, Toml};
use itertools::Itertools;
use toml::Value;
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::raw::RawConfig;
use crate::schema::Config;

pub const DEFAULT_CONFIG_FILE: &str = "config.toml";
pub const DROP_IN_DIR: &str = "config.d";

/// Files read for a main config path, in merge order.
///
/// The drop-in directory sits next to the main file. A missing drop-in
/// directory contributes nothing.
///
/// # Errors
///
/// Returns `ConfigError::Read` when the drop-in directory cannot be listed.
pub fn config_files(main: &Path, override_file: Option<&Path>) -> Result<Vec<PathBuf>> {
    let drop_in = main
        .parent()
        .map_or_else(|| PathBuf::from(DROP_IN_DIR), |dir| dir.join(DROP_IN_DIR));

    let mut files = vec![main.to_path_buf()];
    files.extend(drop_in_files(&drop_in)?);
    files.extend(override_file.map(Path::to_path_buf));
    Ok(files)
}

/// `*.toml` files of `dir`, sorted by name.
fn drop_in_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let pattern = format!("{}/*.toml", glob::Pattern::escape(&dir.to_string_lossy()));
    let mut files = glob::glob(&pattern)
        .map_err(|e| ConfigError::read(dir, e.to_string()))?
        .map(|entry| entry.map_err(|e| ConfigError::read(e.path(), e.error().to_string())))
        .filter_ok(|path| path.is_file())
        .collect::<Result<Vec<_>>>()?;
    files.sort();
    Ok(files)
}

/// One configuration file, checked for syntax.
#[derive(Debug)]
struct Layer {
    path: PathBuf,
    text: String,
    clients: Vec<Value>,
}

fn read_layer(path: &Path) -> Result<Layer> {
    let text = fs::read_to_string(path).map_err(|e| ConfigError::read(path, e.to_string()))?;
    let mut document = text
        .parse::<toml::Table>()
        .map_err(|e| ConfigError::parse(path, e.to_string()))?;
    let clients = match document.remove("clients") {
        Some(Value::Array(clients)) => clients,
        Some(_) => return Err(ConfigError::parse(path, "`clients` must be an array of tables")),
        None => Vec::new(),
    };
    Ok(Layer {
        path: path.to_path_buf(),
        text,
        clients,
    })
}

/// Merge `layers` in order: later values win, tables merge key by key,
/// `clients` of every layer are concatenated.
fn merge(main: &Path, layers: Vec<Layer>) -> Result<RawConfig> {
    let figment = layers.iter().fold(Figment::new(), |figment, layer| {
        debug!(path = %layer.path.display(), clients = layer.clients.len(), "merging config file");
        figment.merge(Toml::string(&layer.text))
    });
    let mut raw: RawConfig = figment
        .extract()
        .map_err(|e| ConfigError::parse(main, e.to_string()))?;
    raw.clients = layers.into_iter().flat_map(|layer| layer.clients).collect();
    Ok(raw)
}

/// Load, merge and validate the configuration.
///
/// # Errors
///
/// Returns the first read or parse failure, or every validation problem of
/// the merged document.
pub fn load(main: &Path, override_file: Option<&Path>) -> Result<Config> {
    let layers = config_files(main, override_file)?
        .iter()
        .map(|path| read_layer(path))
        .collect::<Result<Vec<_>>>()?;
    Config::from_raw(merge(main, layers)?)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn layer(document: &str) -> Layer {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layer.toml");
        fs::write(&path, document).unwrap();
        read_layer(&path).unwrap()
    }

    fn merged(documents: &[&str]) -> RawConfig {
        merge(Path::new("config.toml"), documents.iter().map(|d| layer(d)).collect()).unwrap()
    }

    #[test]
    fn test_later_scalars_win_and_siblings_stay() {
        let raw = merged(&[
            "[stock]\nmax_changes = 10\ndesired_state = \"a.yaml\"\n",
            "[stock]\nmax_changes = 20\n",
        ]);

        assert_eq!(raw.stock.max_changes, Some(20));
        assert_eq!(raw.stock.desired_state.as_deref(), Some(Path::new("a.yaml")));
    }

    #[test]
    fn test_clients_of_every_layer_are_concatenated() {
        let raw = merged(&[
            "[[clients]]\nclient_id = \"a\"\n",
            "[[clients]]\nclient_id = \"b\"\n[[clients]]\nclient_id = \"c\"\n",
        ]);

        let ids: Vec<&str> = raw
            .clients
            .iter()
            .filter_map(|c| c.get("client_id").and_then(Value::as_str))
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_other_arrays_are_replaced() {
        let raw = merged(&[
            "[stock]\nrole_clients = [\"a\", \"b\"]\n",
            "[stock]\nrole_clients = [\"c\"]\n",
        ]);

        assert_eq!(raw.stock.role_clients, Some(vec!["c".to_string()]));
    }

    #[test]
    fn test_clients_must_be_an_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "clients = \"portal\"\n").unwrap();

        let err = read_layer(&path).unwrap_err();

        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_drop_ins_are_sorted_toml_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["20-b.toml", "10-a.toml", "notes.txt"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::create_dir(dir.path().join("nested.toml")).unwrap();

        let files = drop_in_files(dir.path()).unwrap();

        let names: Vec<_> = files
            .iter()
            .filter_map(|f| f.file_name().and_then(|n| n.to_str()))
            .collect();
        assert_eq!(names, vec!["10-a.toml", "20-b.toml"]);
    }

    #[test]
    fn test_drop_in_dir_with_glob_characters() {
        let dir = tempfile::tempdir().unwrap();
        let odd = dir.path().join("conf[1]");
        fs::create_dir(&odd).unwrap();
        fs::write(odd.join("a.toml"), "").unwrap();

        assert_eq!(drop_in_files(&odd).unwrap().len(), 1);
    }
}
