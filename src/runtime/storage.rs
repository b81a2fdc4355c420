//! Persistence helpers and atomic write operations
//!
//! Configuration files and variable snapshots are JSON documents written via a
//! temp file, fsync, and rename so a crash never leaves a torn file behind.

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::RuntimeConfig;
use super::error::{StorageError, StorageResult};
use super::store::{VariableChange, VariableSink};

/// Write data atomically to a file
///
/// Creates a temporary file, writes the data, syncs, then renames
pub fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
    let failed = |detail: String| StorageError::AtomicWriteFailed {
        path: path.to_path_buf(),
        detail,
    };

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    // Unique per write so concurrent writers never share a temp file.
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("snapshot");
    let temp_path = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));
    let mut file = File::create(&temp_path)
        .map_err(|err| failed(format!("create {}: {err}", temp_path.display())))?;
    file.write_all(data)
        .map_err(|err| failed(format!("write: {err}")))?;
    file.sync_all()
        .map_err(|err| failed(format!("sync: {err}")))?;
    drop(file);

    fs::rename(&temp_path, path)
        .map_err(|err| failed(format!("rename {}: {err}", temp_path.display())))?;

    // Sync parent directory
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        let dir = OpenOptions::new().read(true).open(parent)?;
        dir.sync_all()?;
    }

    Ok(())
}

/// Write runtime configuration
pub fn write_config(path: &Path, config: &RuntimeConfig) -> Result<()> {
    let json = serde_json::to_vec_pretty(config).context("Failed to serialize config")?;
    write_atomic(path, &json)
        .with_context(|| format!("Failed to write config: {}", path.display()))?;
    Ok(())
}

/// Load runtime configuration
pub fn load_config(path: &Path) -> Result<RuntimeConfig> {
    let data =
        fs::read(path).with_context(|| format!("Failed to read config: {}", path.display()))?;
    let config: RuntimeConfig =
        serde_json::from_slice(&data).context("Failed to deserialize config")?;
    Ok(config)
}

/// Read a variable snapshot. A missing file is an empty snapshot.
pub fn load_snapshot(path: &Path) -> StorageResult<BTreeMap<String, Value>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let data = fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

/// Variable sink that writes the whole snapshot to one JSON file.
#[derive(Debug, Clone)]
pub struct JsonSnapshotSink {
    path: PathBuf,
}

impl JsonSnapshotSink {
    /// Sink writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Snapshot file location.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl VariableSink for JsonSnapshotSink {
    fn persist(
        &self,
        change: &VariableChange,
        snapshot: &BTreeMap<String, Value>,
    ) -> StorageResult<()> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        write_atomic(&self.path, &json)?;
        tracing::trace!(?change, path = %self.path.display(), entries = snapshot.len(), "variables persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("charmkit.json");

        let config = RuntimeConfig {
            strict_structured: true,
            while_max_iterations: 500,
            variables_path: Some(temp.path().join("vars.json")),
            ..RuntimeConfig::default()
        };

        write_config(&path, &config).unwrap();
        let loaded = load_config(&path).unwrap();

        assert!(loaded.strict_structured);
        assert_eq!(loaded.while_max_iterations, 500);
        assert_eq!(loaded.variables_path, config.variables_path);
        assert_eq!(loaded.max_depth, 64);
    }

    #[test]
    fn test_missing_config_has_context() {
        let temp = TempDir::new().unwrap();
        let err = load_config(&temp.path().join("absent.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }

    #[test]
    fn test_atomic_write() {
        let temp = TempDir::new().unwrap();
        let test_file = temp.path().join("nested/test.dat");

        let data = b"Hello, world!";
        write_atomic(&test_file, data).unwrap();

        let read_data = fs::read(&test_file).unwrap();
        assert_eq!(data, &read_data[..]);
        assert!(!test_file.with_extension("tmp").exists());
    }

    #[test]
    fn test_snapshot_sink_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("vars.json");
        assert!(load_snapshot(&path).unwrap().is_empty());

        let sink = JsonSnapshotSink::new(&path);
        let mut snapshot = BTreeMap::new();
        snapshot.insert("prefix".to_string(), json!("!"));
        snapshot.insert("user".to_string(), json!({"level": 2}));
        sink.persist(&VariableChange::Flush, &snapshot).unwrap();

        assert_eq!(load_snapshot(&path).unwrap(), snapshot);
    }
}
