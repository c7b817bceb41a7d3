use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::index::CacheIndex;
use super::log_file::CacheLogFile;
use super::types::{CacheEntry, CacheKey};
use crate::constants::{DEFAULT_COMPACTION_MAX_LOG_RATIO, DEFAULT_COMPACTION_MIN_LOG_LINES};
use crate::utils::{CacheError, CacheResult};

/// When a read-write session rewrites the log instead of appending to it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactionPolicy {
    pub enabled: bool,
    /// Logs shorter than this are never compacted automatically
    pub min_log_lines: usize,
    /// Compact once the log has more than this many lines per live entry
    pub max_log_ratio: f64,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            min_log_lines: DEFAULT_COMPACTION_MIN_LOG_LINES,
            max_log_ratio: DEFAULT_COMPACTION_MAX_LOG_RATIO,
        }
    }
}

impl CompactionPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn should_compact(&self, log_lines: usize, live_entries: usize) -> bool {
        self.enabled
            && log_lines >= self.min_log_lines
            && log_lines as f64 > self.max_log_ratio * live_entries.max(1) as f64
    }
}

/// Shared, lock-protected access to one index file.
///
/// Every session takes the in-process mutex and the file lock, reloads the
/// file, runs the closure and releases both again. Several holders (in this
/// or other processes) may point at the same file.
pub struct CacheIndexHolder {
    path: PathBuf,
    log: ReentrantMutex<RefCell<CacheLogFile>>,
    policy: CompactionPolicy,
}

impl std::fmt::Debug for CacheIndexHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheIndexHolder")
            .field("path", &self.path)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl CacheIndexHolder {
    /// Open the index at `path`, creating an empty file if there is none
    pub fn open(path: impl Into<PathBuf>) -> CacheResult<Self> {
        let path = path.into();
        let log = CacheLogFile::new(&path);
        log.create_if_missing()?;
        Ok(Self {
            path,
            log: ReentrantMutex::new(RefCell::new(log)),
            policy: CompactionPolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: CompactionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read-write session. Changes are written when the closure succeeds.
    pub fn run_synchronized<R>(
        &self,
        f: impl FnOnce(&mut IndexSession<'_>) -> CacheResult<R>,
    ) -> CacheResult<R> {
        self.try_run_synchronized(f)
    }

    /// Read-write session with a caller-defined error type. If the closure
    /// returns `Err` (or panics) its changes are dropped, not written.
    pub fn try_run_synchronized<R, E>(
        &self,
        f: impl FnOnce(&mut IndexSession<'_>) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<CacheError>,
    {
        let guard = self.log.lock();
        let mut log = guard.try_borrow_mut().map_err(|_| nested_session())?;
        let mut locked = LockedLog::begin(&mut log)?;

        let mut session = IndexSession {
            log: &mut *locked.log,
            compaction_requested: false,
        };
        let value = f(&mut session)?;
        let compaction_requested = session.compaction_requested;

        locked.commit(&self.policy, compaction_requested)?;
        Ok(value)
    }

    /// Read-only session: the closure only gets an immutable view of the index
    pub fn get_synchronized<R>(&self, f: impl FnOnce(&CacheIndex) -> R) -> CacheResult<R> {
        let guard = self.log.lock();
        let mut log = guard.try_borrow_mut().map_err(|_| nested_session())?;
        let locked = LockedLog::begin(&mut log)?;
        let value = f(locked.log.index()?);
        Ok(value)
    }
}

fn nested_session() -> CacheError {
    CacheError::illegal_state("nested session on the same cache index")
}

/// The log while its file lock is held. Dropping it throws away whatever was
/// not committed and releases the lock.
struct LockedLog<'a> {
    log: &'a mut CacheLogFile,
}

impl<'a> LockedLog<'a> {
    fn begin(log: &'a mut CacheLogFile) -> CacheResult<Self> {
        log.lock()?;
        let mut locked = Self { log };
        locked.log.load()?;
        Ok(locked)
    }

    fn commit(&mut self, policy: &CompactionPolicy, compaction_requested: bool) -> CacheResult<()> {
        if !self.log.is_dirty() && !compaction_requested {
            return Ok(());
        }

        let log_lines = self.log.log_line_count() + self.log.pending_actions().len();
        let live_entries = self.log.index()?.len();
        if compaction_requested || policy.should_compact(log_lines, live_entries) {
            self.log.save_compacted_file()
        } else {
            self.log.persist_changes()
        }
    }
}

impl Drop for LockedLog<'_> {
    fn drop(&mut self) {
        if self.log.is_dirty() {
            warn!(
                "Dropping {} uncommitted change(s) to {}",
                self.log.pending_actions().len(),
                self.log.path().display()
            );
        }
        self.log.discard_changes();
        self.log.unlock();
    }
}

/// Mutable view of the index inside [`CacheIndexHolder::run_synchronized`]
#[derive(Debug)]
pub struct IndexSession<'a> {
    log: &'a mut CacheLogFile,
    compaction_requested: bool,
}

impl IndexSession<'_> {
    /// Record a new entry for `key` stored in bucket `id`, accessed at `now`
    pub fn create_entry(&mut self, key: CacheKey, id: &str, now: i64) -> CacheResult<CacheEntry> {
        let entry = CacheEntry::new(id, now, key)?;
        self.log.add_entry(entry.clone())?;
        Ok(entry)
    }

    pub fn find(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        Ok(self.log.index()?.find_by_key(key).cloned())
    }

    pub fn find_by_id(&self, id: &str) -> CacheResult<Option<CacheEntry>> {
        Ok(self.log.index()?.find_by_id(id).cloned())
    }

    /// Every version stored for a location, most recent first
    pub fn find_all(&self, location: &str) -> CacheResult<Vec<CacheEntry>> {
        Ok(self
            .log
            .index()?
            .find_all_by_location(location)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Remove the entry of this key, returns the removed entry
    pub fn remove_entry(&mut self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let Some(entry) = self.find(key)? else {
            return Ok(None);
        };
        self.log.remove_entry(entry.id())?;
        Ok(Some(entry))
    }

    pub fn remove_entry_by_id(&mut self, id: &str) -> CacheResult<bool> {
        self.log.remove_entry(id)
    }

    pub fn mark_accessed(&mut self, id: &str, timestamp: i64) -> CacheResult<bool> {
        self.log.mark_accessed(id, timestamp)
    }

    /// Remove all entries, returns how many were removed
    pub fn clear(&mut self) -> CacheResult<usize> {
        self.log.clear()
    }

    /// All entries, most recently used first
    pub fn all_entries(&self) -> CacheResult<Vec<CacheEntry>> {
        self.log.get_all_entries()
    }

    pub fn len(&self) -> CacheResult<usize> {
        Ok(self.log.index()?.len())
    }

    pub fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.log.index()?.is_empty())
    }

    pub fn is_dirty(&self) -> bool {
        self.log.is_dirty()
    }

    /// Lines read from the file when this session started
    pub fn log_line_count(&self) -> usize {
        self.log.log_line_count()
    }

    /// Rewrite the whole file at the end of this session
    pub fn request_compaction(&mut self) {
        self.compaction_requested = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs::{self, File};
    use std::panic::{self, AssertUnwindSafe};
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn key(location: &str, version: Option<&str>) -> CacheKey {
        CacheKey::parse(location, version).unwrap()
    }

    fn holder(temp_dir: &TempDir) -> CacheIndexHolder {
        CacheIndexHolder::open(temp_dir.path().join("cache").join("recently_used"))
            .unwrap()
            .with_policy(CompactionPolicy::disabled())
    }

    fn backdate(path: &Path) -> SystemTime {
        let past = SystemTime::now() - Duration::from_secs(60);
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(past)
            .unwrap();
        fs::metadata(path).unwrap().modified().unwrap()
    }

    #[test]
    fn test_open_creates_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let holder = holder(&temp_dir);
        assert!(holder.path().exists());
        assert_eq!(fs::read_to_string(holder.path()).unwrap(), "");
    }

    #[test]
    fn test_session_persists_changes() {
        let temp_dir = TempDir::new().unwrap();
        let holder = holder(&temp_dir);

        let entry = holder
            .run_synchronized(|idx| idx.create_entry(key("https://test.com", Some("1.1")), "1/11", 1234))
            .unwrap();
        assert_eq!(
            fs::read_to_string(holder.path()).unwrap(),
            "::i=1/11::l=https://test.com::v=1.1::a=1234::"
        );

        holder
            .run_synchronized(|idx| idx.mark_accessed(entry.id(), 3456))
            .unwrap();
        let found = holder
            .get_synchronized(|idx| idx.find_by_key(entry.key()).cloned())
            .unwrap();
        assert_eq!(found, Some(entry.with_last_accessed(3456)));
    }

    #[test]
    fn test_session_without_changes_leaves_file_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let holder = holder(&temp_dir);
        holder
            .run_synchronized(|idx| idx.create_entry(key("https://test.com", None), "1/11", 1234))
            .unwrap();
        let before = backdate(holder.path());

        holder
            .run_synchronized(|idx| {
                idx.find(&key("https://test.com", None))?;
                idx.remove_entry_by_id("9/99")?;
                idx.mark_accessed("9/99", 5)
            })
            .unwrap();
        holder.get_synchronized(|idx| idx.len()).unwrap();
        assert_eq!(fs::metadata(holder.path()).unwrap().modified().unwrap(), before);

        holder
            .run_synchronized(|idx| idx.mark_accessed("1/11", 5678))
            .unwrap();
        assert_ne!(fs::metadata(holder.path()).unwrap().modified().unwrap(), before);
    }

    #[test]
    fn test_failed_session_discards_changes() {
        let temp_dir = TempDir::new().unwrap();
        let holder = holder(&temp_dir);

        let result: anyhow::Result<()> = holder.try_run_synchronized(|idx| {
            idx.create_entry(key("https://test.com", None), "1/11", 1234)?;
            anyhow::bail!("download failed")
        });
        assert_eq!(result.unwrap_err().to_string(), "download failed");

        assert_eq!(fs::read_to_string(holder.path()).unwrap(), "");
        // the next session must be able to load again
        assert_eq!(holder.get_synchronized(|idx| idx.len()).unwrap(), 0);
    }

    #[test]
    fn test_panicking_session_releases_lock() {
        let temp_dir = TempDir::new().unwrap();
        let holder = holder(&temp_dir);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let _: CacheResult<()> = holder.run_synchronized(|idx| {
                idx.create_entry(key("https://test.com", None), "1/11", 1234)?;
                panic!("boom")
            });
        }));
        assert!(outcome.is_err());

        assert_eq!(holder.get_synchronized(|idx| idx.len()).unwrap(), 0);
        // another holder on the same path is not blocked either
        let other = CacheIndexHolder::open(holder.path()).unwrap();
        assert!(other.get_synchronized(|idx| idx.is_empty()).unwrap());
    }

    #[test]
    fn test_nested_session_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let holder = holder(&temp_dir);

        let nested = holder
            .run_synchronized(|_| Ok(holder.get_synchronized(|idx| idx.len())))
            .unwrap();
        assert!(matches!(nested, Err(CacheError::IllegalState(_))));
    }

    #[test]
    fn test_remove_and_clear() {
        let temp_dir = TempDir::new().unwrap();
        let holder = holder(&temp_dir);
        holder
            .run_synchronized(|idx| {
                idx.create_entry(key("https://test.com/a.jar", Some("1.0")), "1/11", 1)?;
                idx.create_entry(key("https://test.com/a.jar", Some("2.0")), "1/12", 2)?;
                idx.create_entry(key("https://foo.com/b.jar", None), "2/21", 3)?;
                Ok(())
            })
            .unwrap();

        let removed = holder
            .run_synchronized(|idx| idx.remove_entry(&key("https://test.com/a.jar", Some("1"))))
            .unwrap();
        assert_eq!(removed.map(|e| e.id().to_string()), Some("1/11".to_string()));

        let remaining = holder
            .run_synchronized(|idx| idx.find_all("https://test.com/a.jar"))
            .unwrap();
        assert_eq!(remaining.len(), 1);

        assert_eq!(holder.run_synchronized(|idx| idx.clear()).unwrap(), 2);
        assert!(holder.get_synchronized(|idx| idx.is_empty()).unwrap());
    }

    #[test]
    fn test_requested_compaction_rewrites_file() {
        let temp_dir = TempDir::new().unwrap();
        let holder = holder(&temp_dir);
        holder
            .run_synchronized(|idx| {
                idx.create_entry(key("https://test.com", Some("1.1")), "1/11", 1234)?;
                idx.create_entry(key("https://foo.com", None), "2/22", 2000)?;
                idx.mark_accessed("1/11", 5678)?;
                idx.remove_entry_by_id("2/22")
            })
            .unwrap();
        assert_eq!(fs::read_to_string(holder.path()).unwrap().lines().count(), 4);

        holder
            .run_synchronized(|idx| {
                idx.request_compaction();
                Ok(())
            })
            .unwrap();
        assert_eq!(
            fs::read_to_string(holder.path()).unwrap(),
            "::i=1/11::l=https://test.com::v=1.1::a=5678::"
        );
    }

    #[test]
    fn test_policy_compacts_long_logs() {
        let temp_dir = TempDir::new().unwrap();
        let holder = holder(&temp_dir).with_policy(CompactionPolicy {
            enabled: true,
            min_log_lines: 8,
            max_log_ratio: 2.0,
        });
        holder
            .run_synchronized(|idx| idx.create_entry(key("https://test.com", None), "1/11", 0))
            .unwrap();
        for now in 1..10 {
            holder
                .run_synchronized(|idx| idx.mark_accessed("1/11", now))
                .unwrap();
        }

        let lines = fs::read_to_string(holder.path()).unwrap().lines().count();
        assert!(lines < 8, "log was never compacted ({} lines)", lines);
        let entry = holder
            .get_synchronized(|idx| idx.find_by_id("1/11").cloned())
            .unwrap()
            .unwrap();
        assert_eq!(entry.last_accessed(), 9);
    }

    #[test]
    fn test_policy_thresholds() {
        let policy = CompactionPolicy {
            enabled: true,
            min_log_lines: 10,
            max_log_ratio: 2.0,
        };
        assert!(!policy.should_compact(9, 1));
        assert!(policy.should_compact(10, 1));
        assert!(!policy.should_compact(10, 5));
        assert!(policy.should_compact(11, 5));
        assert!(policy.should_compact(10, 0));
        assert!(!CompactionPolicy::disabled().should_compact(1000, 1));
    }
}
