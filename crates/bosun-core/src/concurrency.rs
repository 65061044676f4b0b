use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

pub use bosun_infra::{install_signal_handler, shutdown_requested};

/// Exclusive advisory lock on a state directory. Released on drop.
pub struct StateLock {
    lock_file: File,
    path: PathBuf,
}

fn open_lock_file(lock_path: &Path) -> Result<File, CoreError> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)?)
}

impl StateLock {
    /// Take the lock if it is free, `None` when another process holds it.
    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, CoreError> {
        let file = open_lock_file(lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                lock_file: file,
                path: lock_path.to_path_buf(),
            })),
            Err(_) => Ok(None),
        }
    }

    /// Like `try_acquire`, but a held lock is an error.
    pub fn acquire_or_reject(lock_path: &Path) -> Result<Self, CoreError> {
        Self::try_acquire(lock_path)?
            .ok_or_else(|| CoreError::Locked(lock_path.display().to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join(".bosun.lock");
        {
            let lock = StateLock::acquire_or_reject(&lock_path).unwrap();
            assert!(lock_path.exists());
            assert_eq!(lock.path(), lock_path);
        }
        assert!(StateLock::try_acquire(&lock_path).unwrap().is_some());
    }

    #[test]
    fn second_holder_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join(".bosun.lock");
        let _held = StateLock::acquire_or_reject(&lock_path).unwrap();
        assert!(StateLock::try_acquire(&lock_path).unwrap().is_none());
        assert!(matches!(
            StateLock::acquire_or_reject(&lock_path),
            Err(CoreError::Locked(_))
        ));
    }

    #[test]
    fn lock_creates_missing_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("nested/env/.bosun.lock");
        let _lock = StateLock::acquire_or_reject(&lock_path).unwrap();
        assert!(lock_path.exists());
    }
}
