//! Plugin descriptor loading.

use std::path::{Path, PathBuf};

use fleetgraph_core::PluginDescriptor;

use crate::error::Result;

/// Produces the plugins to run on every server.
pub trait PluginSource {
    fn load(&self) -> Result<Vec<PluginDescriptor>>;
}

/// Reads every `*.json` file of a directory, in file name order.
///
/// Any invalid descriptor fails the whole load, before a server is touched.
pub struct DirectoryPluginSource {
    dir: PathBuf,
}

impl DirectoryPluginSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl PluginSource for DirectoryPluginSource {
    fn load(&self) -> Result<Vec<PluginDescriptor>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<_>>()?;
        paths.sort();

        let mut plugins = Vec::new();
        for path in paths {
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                tracing::debug!(path = %path.display(), "Skipping non-descriptor file");
                continue;
            }
            let Some(plugin) = load_descriptor(&path)? else {
                tracing::warn!(path = %path.display(), "Descriptor maps to no graph work, skipping");
                continue;
            };
            tracing::info!(plugin = %plugin.name, mode = plugin.mode(), "Loaded plugin");
            plugins.push(plugin);
        }

        Ok(plugins)
    }
}

fn load_descriptor(path: &Path) -> Result<Option<PluginDescriptor>> {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let json = std::fs::read_to_string(path)?;
    let value: serde_json::Value =
        serde_json::from_str(&json).map_err(fleetgraph_core::FleetError::from)?;
    if PluginDescriptor::is_inert(&value) {
        return Ok(None);
    }
    Ok(Some(PluginDescriptor::from_value(&name, value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiscoverError;

    #[test]
    fn test_loads_json_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("20_os.json"),
            r#"{"type": "properties", "script": "os.sh", "node_params": {"os": "$1"}}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("10_docker.json"),
            r#"{"type": "Software", "name": "docker",
                "script": {"script": "d.sh", "relation": "HAS", "truevalue": "1", "falsevalue": "0"}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "notes").unwrap();

        let plugins = DirectoryPluginSource::new(dir.path()).load().unwrap();
        let names: Vec<&str> = plugins.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["10_docker", "20_os"]);
    }

    #[test]
    fn test_inert_descriptor_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("legacy.json"),
            r#"{"type": "Relation", "script": {"script": "x.sh"}}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("os.json"),
            r#"{"type": "properties", "script": "os.sh", "node_params": {"os": "$1"}}"#,
        )
        .unwrap();

        let plugins = DirectoryPluginSource::new(dir.path()).load().unwrap();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].name, "os");
    }

    #[test]
    fn test_invalid_descriptor_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("bad.json"),
            r#"{"type": "relation", "script": "x.sh", "right_node": "App"}"#,
        )
        .unwrap();

        let err = DirectoryPluginSource::new(dir.path()).load().unwrap_err();
        assert!(matches!(err, DiscoverError::Plugin(_)));
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let err = DirectoryPluginSource::new("/nonexistent/fleetgraph/plugins")
            .load()
            .unwrap_err();
        assert!(matches!(err, DiscoverError::Io(_)));
    }
}
