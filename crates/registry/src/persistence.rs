//! Catalog snapshot persistence.
//!
//! Snapshots capture the whole registry in postcard's compact binary form
//! so a service restart does not depend on every provider re-registering.
//! The snapshot path comes from `SKEIN_CATALOG_PATH` when set, otherwise
//! the platform config directory.

use std::env;
use std::fs;
use std::path::PathBuf;

use dirs_next::config_dir;
use tracing::debug;

use crate::{OperationRegistry, RegistryError};

/// Environment variable overriding the snapshot location.
pub const CATALOG_PATH_ENV: &str = "SKEIN_CATALOG_PATH";

/// Default snapshot filename under the config directory.
pub const CATALOG_FILE_NAME: &str = "catalog.bin";

/// Resolves the snapshot path from the environment or config directory.
pub fn snapshot_path() -> Result<PathBuf, RegistryError> {
    if let Ok(configured) = env::var(CATALOG_PATH_ENV) {
        let trimmed = configured.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }
    config_dir()
        .map(|directory| directory.join("skein").join(CATALOG_FILE_NAME))
        .ok_or(RegistryError::NoSnapshotPath)
}

impl OperationRegistry {
    /// Writes the catalog to the given path, creating parent directories.
    pub fn save_snapshot(&self, path: &std::path::Path) -> Result<(), RegistryError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let encoded = postcard::to_stdvec(self)?;
        fs::write(path, encoded)?;
        debug!(path = %path.display(), operations = self.len(), "catalog snapshot saved");
        Ok(())
    }

    /// Loads a catalog previously written by [`Self::save_snapshot`].
    pub fn load_snapshot(path: &std::path::Path) -> Result<Self, RegistryError> {
        let bytes = fs::read(path)?;
        let registry = postcard::from_bytes(&bytes)?;
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OperationDefinition;
    use skein_types::{FieldKind, OperationSchema};

    #[test]
    fn snapshot_round_trips_the_catalog() {
        let mut registry = OperationRegistry::default();
        registry
            .register(
                "chat",
                vec![OperationDefinition {
                    name: "post_message".into(),
                    summary: "Post a message".into(),
                    input_schema: OperationSchema::default().with_field("channel", FieldKind::String, true),
                    output_schema: OperationSchema::default().with_field("ts", FieldKind::String, false),
                    http: None,
                }],
            )
            .expect("register");

        let directory = tempfile::tempdir().expect("tempdir");
        let path = directory.path().join("catalog.bin");
        registry.save_snapshot(&path).expect("save snapshot");

        let restored = OperationRegistry::load_snapshot(&path).expect("load snapshot");
        assert_eq!(restored.len(), 1);
        assert!(restored.contains("chat_post_message"));
        let operation = restored.lookup("chat_post_message").expect("lookup restored operation");
        assert!(operation.input_schema.contains("channel"));
    }

    #[test]
    fn loading_a_missing_snapshot_errors() {
        let directory = tempfile::tempdir().expect("tempdir");
        let path = directory.path().join("absent.bin");
        assert!(OperationRegistry::load_snapshot(&path).is_err());
    }
}
