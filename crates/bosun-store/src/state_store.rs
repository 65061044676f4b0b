use crate::layout::StateLayout;
use crate::migration::migrate_value;
use crate::{fsync_dir, StoreError};
use bosun_schema::State;
use std::fs;
use std::io::Write;
use tempfile::NamedTempFile;
use tracing::debug;

/// Persistence seam used by the orchestrators.
///
/// Every pipeline step ends with a `save`; tests substitute implementations
/// that record each checkpoint.
pub trait StateRepository: Send + Sync {
    fn exists(&self) -> bool;
    fn load(&self) -> Result<State, StoreError>;
    fn save(&self, state: &State) -> Result<(), StoreError>;
    fn remove(&self) -> Result<(), StoreError>;
    /// Human-readable location, used in error messages.
    fn location(&self) -> String;

    /// Load the document, or a fresh empty one when none exists yet.
    fn load_or_default(&self) -> Result<State, StoreError> {
        match self.load() {
            Ok(state) => Ok(state),
            Err(StoreError::NotFound(_)) => Ok(State::new()),
            Err(e) => Err(e),
        }
    }
}

/// File-backed state document in a state directory.
pub struct StateStore {
    layout: StateLayout,
}

impl StateStore {
    pub fn new(layout: StateLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }
}

/// Checksum over the document content, excluding the checksum field itself.
fn compute_checksum(state: &State) -> Result<String, StoreError> {
    let mut copy = state.clone();
    copy.checksum = None;
    let json = serde_json::to_string_pretty(&copy)?;
    Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
}

impl StateRepository for StateStore {
    fn exists(&self) -> bool {
        self.layout.state_file().exists()
    }

    fn load(&self) -> Result<State, StoreError> {
        let path = self.layout.state_file();
        if !path.exists() {
            return Err(StoreError::NotFound(self.location()));
        }
        let content = fs::read_to_string(&path)?;
        let raw: serde_json::Value = serde_json::from_str(&content)?;
        let (upgraded, found) = migrate_value(raw)?;
        let state: State = serde_json::from_value(upgraded)?;

        // Hand-written or migrated documents carry no checksum.
        if let Some(ref expected) = state.checksum {
            let actual = compute_checksum(&state)?;
            if actual != *expected {
                return Err(StoreError::IntegrityFailure {
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        debug!(
            "loaded state from {} (document v{found})",
            path.display()
        );
        Ok(state)
    }

    fn save(&self, state: &State) -> Result<(), StoreError> {
        let dir = self.layout.dir();
        self.layout.initialize()?;

        let mut with_checksum = state.clone();
        with_checksum.checksum = Some(compute_checksum(state)?);
        let content = serde_json::to_string_pretty(&with_checksum)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.layout.state_file())
            .map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(dir)?;

        debug!("saved state to {}", self.layout.state_file().display());
        Ok(())
    }

    fn remove(&self) -> Result<(), StoreError> {
        let path = self.layout.state_file();
        if path.exists() {
            fs::remove_file(&path)?;
            fsync_dir(self.layout.dir())?;
        }
        Ok(())
    }

    fn location(&self) -> String {
        self.layout.dir().display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bosun_schema::{EnvId, Iaas, STATE_VERSION};

    fn sample_state() -> State {
        let mut s = State::new();
        s.iaas = Some(Iaas::Gcp);
        s.env_id = EnvId::from("bosun-env-erie-2026-01-01t00-00z");
        s.gcp.project_id = "proj".to_owned();
        s.infra.state = r#"{"version": 4}"#.to_owned();
        s.infra
            .outputs
            .insert("external_ip".to_owned(), serde_json::json!("203.0.113.9"));
        s
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(StateLayout::new(dir.path()));
        let state = sample_state();
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.env_id, state.env_id);
        assert_eq!(loaded.version, STATE_VERSION);
        assert_eq!(loaded.infra.output_str("external_ip").as_deref(), Some("203.0.113.9"));
        assert!(loaded.checksum.is_some());
    }

    #[test]
    fn load_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(StateLayout::new(dir.path()));
        assert!(!store.exists());
        assert!(matches!(store.load(), Err(StoreError::NotFound(_))));
        let fresh = store.load_or_default().unwrap();
        assert!(fresh.env_id.is_empty());
    }

    #[test]
    fn tampered_document_fails_integrity() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(StateLayout::new(dir.path()));
        store.save(&sample_state()).unwrap();

        let path = store.layout().state_file();
        let content = fs::read_to_string(&path).unwrap();
        fs::write(&path, content.replace("203.0.113.9", "198.51.100.1")).unwrap();

        assert!(matches!(
            store.load(),
            Err(StoreError::IntegrityFailure { .. })
        ));
    }

    #[test]
    fn document_without_checksum_loads() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(StateLayout::new(dir.path()));
        fs::write(
            store.layout().state_file(),
            r#"{"version": 3, "iaas": "aws", "env_id": "handmade"}"#,
        )
        .unwrap();
        let s = store.load().unwrap();
        assert_eq!(s.env_id.as_str(), "handmade");
    }

    #[test]
    fn save_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(StateLayout::new(dir.path()));
        store.save(&sample_state()).unwrap();
        store.save(&sample_state()).unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn remove_deletes_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(StateLayout::new(dir.path()));
        store.save(&sample_state()).unwrap();
        store.remove().unwrap();
        assert!(!store.exists());
        store.remove().unwrap();
    }
}
