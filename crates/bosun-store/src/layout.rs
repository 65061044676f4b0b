use std::path::{Path, PathBuf};

pub const STATE_FILE: &str = "bosun-state.json";
const LOCK_FILE: &str = ".bosun.lock";
const JUMPBOX_KEY_FILE: &str = ".bosun-jumpbox.key";

/// Paths inside a state directory.
///
/// A state directory holds exactly one environment: the state document, its
/// lock file, and any backups written by schema migration.
#[derive(Debug, Clone)]
pub struct StateLayout {
    dir: PathBuf,
}

impl StateLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[inline]
    pub fn state_file(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    /// Private key written out for `BOSH_ALL_PROXY`.
    pub fn jumpbox_key_file(&self) -> PathBuf {
        self.dir.join(JUMPBOX_KEY_FILE)
    }

    pub fn backup_file(&self, timestamp: &str) -> PathBuf {
        self.dir.join(format!("{STATE_FILE}.backup.{timestamp}"))
    }

    pub fn initialize(&self) -> Result<(), std::io::Error> {
        std::fs::create_dir_all(&self.dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_correct() {
        let layout = StateLayout::new("/tmp/bosun-test");
        assert_eq!(
            layout.state_file(),
            PathBuf::from("/tmp/bosun-test/bosun-state.json")
        );
        assert_eq!(
            layout.lock_file(),
            PathBuf::from("/tmp/bosun-test/.bosun.lock")
        );
        assert_eq!(
            layout.jumpbox_key_file(),
            PathBuf::from("/tmp/bosun-test/.bosun-jumpbox.key")
        );
        assert_eq!(
            layout.backup_file("20260101T000000Z"),
            PathBuf::from("/tmp/bosun-test/bosun-state.json.backup.20260101T000000Z")
        );
    }

    #[test]
    fn initialize_creates_nested_dir() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path().join("a/b"));
        layout.initialize().unwrap();
        assert!(layout.dir().is_dir());
    }
}
