use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::utils::{CacheError, CacheResult};

/// Exclusive advisory lock on a sentinel file.
///
/// Blocks until the lock is granted. The lock is released when the guard is
/// dropped, so every exit path (including unwinding) gives it back.
#[derive(Debug)]
pub struct FileLockGuard {
    file: File,
    path: PathBuf,
}

impl FileLockGuard {
    pub fn acquire(path: &Path) -> CacheResult<Self> {
        let lock_failure = |source| CacheError::LockFailure {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(lock_failure)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(lock_failure)?;
        FileExt::lock_exclusive(&file).map_err(lock_failure)?;

        debug!("Locked {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        match FileExt::unlock(&self.file) {
            Ok(()) => debug!("Unlocked {}", self.path.display()),
            // Closing the handle releases the lock anyway
            Err(e) => warn!("Failed to unlock {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_creates_missing_directories() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a/b/index.lock");

        let guard = FileLockGuard::acquire(&path).unwrap();
        assert!(path.exists());
        assert_eq!(guard.path(), path.as_path());
    }

    #[test]
    fn test_second_handle_waits_for_release() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.lock");
        let released = Arc::new(AtomicBool::new(false));

        let guard = FileLockGuard::acquire(&path).unwrap();
        let waiter = {
            let path = path.clone();
            let released = Arc::clone(&released);
            thread::spawn(move || {
                let _guard = FileLockGuard::acquire(&path).unwrap();
                released.load(Ordering::SeqCst)
            })
        };

        thread::sleep(Duration::from_millis(100));
        released.store(true, Ordering::SeqCst);
        drop(guard);

        assert!(waiter.join().unwrap(), "second lock granted before release");
    }
}
