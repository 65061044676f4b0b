//! Persistent storage for the bosun environment state document.
//!
//! This crate provides the storage layer: `StateLayout` for the state
//! directory structure, `StateStore` for atomic, checksummed load/save of the
//! single `State` document, and the schema migration chain that upgrades older
//! documents on read.

pub mod layout;
pub mod migration;
pub mod state_store;

pub use layout::StateLayout;
pub use migration::{migrate_state_file, migrate_value, MigrationResult};
pub use state_store::{StateRepository, StateStore};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so a preceding `rename()` is durable on every filesystem.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no state file found in {0}, please make sure you are targeting the proper state dir")]
    NotFound(String),
    #[error("state integrity check failed: expected {expected}, got {actual}")]
    IntegrityFailure { expected: String, actual: String },
    #[error("state version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("malformed state document: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_the_directory() {
        let e = StoreError::NotFound("/srv/envs/prod".to_owned());
        let msg = e.to_string();
        assert!(msg.contains("/srv/envs/prod"));
        assert!(msg.contains("state dir"));
    }

    #[test]
    fn version_mismatch_display() {
        let e = StoreError::VersionMismatch {
            expected: 3,
            found: 9,
        };
        let msg = e.to_string();
        assert!(msg.contains('3'));
        assert!(msg.contains('9'));
    }

    #[test]
    fn integrity_failure_display() {
        let e = StoreError::IntegrityFailure {
            expected: "exp".to_owned(),
            actual: "act".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("exp"));
        assert!(msg.contains("act"));
    }
}
