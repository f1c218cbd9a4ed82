//! Cluster connection config.
//!
//! The config file is TOML:
//!
//! ```toml
//! backend = "dir"            # "memory" or "dir"
//! root = "/var/lib/radoskv"  # required for "dir"
//! pools = ["data"]           # created at connect time
//! ```
//!
//! Unknown tables (for example a `[datastore]` section read by the adapter)
//! are ignored.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dir::DirCluster;
use crate::error::PoolError;
use crate::memory::MemCluster;
use crate::traits::Cluster;

/// Which Cluster implementation a config selects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    Dir,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub backend: BackendKind,

    /// Root directory for the `dir` backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Pools to create when connecting.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pools: Vec<String>,
}

impl ClusterConfig {
    /// Load a config file from disk.
    pub fn load(path: &Path) -> Result<Self, PoolError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PoolError::Config(format!("cannot read {:?}: {}", path, e)))?;
        Self::from_toml(&content)
            .map_err(|e| PoolError::Config(format!("{:?}: {}", path, e)))
    }

    /// Parse a config from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, PoolError> {
        toml::from_str(content).map_err(|e| PoolError::Config(e.to_string()))
    }

    /// Build the cluster this config describes and create the listed pools.
    pub fn connect(&self) -> Result<Arc<dyn Cluster>, PoolError> {
        let cluster: Arc<dyn Cluster> = match self.backend {
            BackendKind::Memory => Arc::new(MemCluster::new()),
            BackendKind::Dir => {
                let root = self.root.as_ref().ok_or_else(|| {
                    PoolError::Config("backend \"dir\" requires `root`".to_string())
                })?;
                Arc::new(DirCluster::open(root)?)
            }
        };
        for pool in &self.pools {
            cluster.create_pool(pool)?;
        }
        debug!(backend = ?self.backend, pools = self.pools.len(), "cluster connected");
        Ok(cluster)
    }
}

/// Read the config at `config_path` and connect to the cluster it describes.
pub fn connect(config_path: &Path) -> Result<Arc<dyn Cluster>, PoolError> {
    ClusterConfig::load(config_path)?.connect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parse_memory_config() {
        let config = ClusterConfig::from_toml(r#"pools = ["a", "b"]"#).unwrap();
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.pools, vec!["a".to_string(), "b".to_string()]);
        assert!(config.root.is_none());
    }

    #[test]
    fn unknown_tables_are_ignored() {
        let config = ClusterConfig::from_toml(
            r#"
            backend = "dir"
            root = "/tmp/x"

            [datastore]
            read_chunk_size = 4096
            "#,
        )
        .unwrap();
        assert_eq!(config.backend, BackendKind::Dir);
        assert_eq!(config.root, Some(PathBuf::from("/tmp/x")));
    }

    #[test]
    fn malformed_config_is_config_error() {
        assert!(matches!(
            ClusterConfig::from_toml("backend = [1"),
            Err(PoolError::Config(_))
        ));
        assert!(matches!(
            ClusterConfig::from_toml(r#"backend = "s3""#),
            Err(PoolError::Config(_))
        ));
    }

    #[test]
    fn missing_file_is_config_error() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            connect(&tmp.path().join("missing.toml")),
            Err(PoolError::Config(_))
        ));
    }

    #[test]
    fn dir_backend_requires_root() {
        let config = ClusterConfig {
            backend: BackendKind::Dir,
            ..Default::default()
        };
        assert!(matches!(config.connect(), Err(PoolError::Config(_))));
    }

    #[test]
    fn connect_dir_creates_pools() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cluster.toml");
        let config = ClusterConfig {
            backend: BackendKind::Dir,
            root: Some(tmp.path().join("root")),
            pools: vec!["data".to_string()],
        };
        std::fs::create_dir_all(tmp.path().join("root")).unwrap();
        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let cluster = connect(&path).unwrap();
        assert_eq!(cluster.list_pools().unwrap(), vec!["data".to_string()]);
        assert!(cluster.open_context("data").is_ok());
    }
}
