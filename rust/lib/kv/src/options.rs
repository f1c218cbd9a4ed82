use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DatastoreError;

/// Buffer size for each backend read call.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 1024;

/// Capacity of the channel between a query worker and its consumer.
pub const DEFAULT_QUERY_BUFFER: usize = 128;

/// Adapter tuning, read from the optional `[datastore]` table of the same
/// config file the cluster connection is built from:
///
/// ```toml
/// backend = "dir"
/// root = "/var/lib/radoskv"
///
/// [datastore]
/// read_chunk_size = 1024
/// max_write_size = 0      # 0 = write values in one call
/// query_buffer = 128
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatastoreOptions {
    pub read_chunk_size: usize,
    pub max_write_size: usize,
    pub query_buffer: usize,
}

impl Default for DatastoreOptions {
    fn default() -> Self {
        Self {
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            max_write_size: 0,
            query_buffer: DEFAULT_QUERY_BUFFER,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    datastore: DatastoreOptions,
}

impl DatastoreOptions {
    /// Read the `[datastore]` table from a config file. A missing table yields
    /// the defaults.
    pub fn load(path: &Path) -> Result<Self, DatastoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DatastoreError::Connection(format!("cannot read config {:?}: {}", path, e))
        })?;
        let file: ConfigFile = toml::from_str(&content)
            .map_err(|e| DatastoreError::Connection(format!("config {:?}: {}", path, e)))?;
        file.datastore.validate()?;
        Ok(file.datastore)
    }

    pub fn validate(&self) -> Result<(), DatastoreError> {
        if self.read_chunk_size == 0 {
            return Err(DatastoreError::Connection(
                "read_chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.query_buffer == 0 {
            return Err(DatastoreError::Connection(
                "query_buffer must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(content: &str) -> (TempDir, std::path::PathBuf) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cluster.toml");
        std::fs::write(&path, content).unwrap();
        (tmp, path)
    }

    #[test]
    fn defaults_without_table() {
        let (_tmp, path) = write_config(r#"backend = "memory""#);
        assert_eq!(DatastoreOptions::load(&path).unwrap(), DatastoreOptions::default());
    }

    #[test]
    fn partial_table_keeps_other_defaults() {
        let (_tmp, path) = write_config(
            r#"
            backend = "memory"

            [datastore]
            max_write_size = 4096
            "#,
        );
        let options = DatastoreOptions::load(&path).unwrap();
        assert_eq!(options.max_write_size, 4096);
        assert_eq!(options.read_chunk_size, DEFAULT_READ_CHUNK_SIZE);
        assert_eq!(options.query_buffer, DEFAULT_QUERY_BUFFER);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let (_tmp, path) = write_config("[datastore]\nread_chunk_size = 0\n");
        assert!(matches!(
            DatastoreOptions::load(&path),
            Err(DatastoreError::Connection(_))
        ));

        let options = DatastoreOptions {
            query_buffer: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }
}
