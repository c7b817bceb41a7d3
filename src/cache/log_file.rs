use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

use super::action::Action;
use super::index::CacheIndex;
use super::lock::FileLockGuard;
use super::types::CacheEntry;
use crate::constants::{COMPACT_FILE_SUFFIX, LOCK_FILE_SUFFIX};
use crate::utils::{CacheError, CacheResult};

/// Size and modification time of the index file at the last load/write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileBaseline {
    pub len: u64,
    pub modified: Option<SystemTime>,
}

impl FileBaseline {
    fn of(path: &Path) -> CacheResult<Self> {
        let metadata = fs::metadata(path).map_err(|e| not_found_or_io(e, path))?;
        Ok(Self {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

/// The append-only action log backing the index.
///
/// Protocol: `lock()`, `load()`, mutate, then `persist_changes()` or
/// `save_compacted_file()`, and finally `unlock()`. Reading or mutating the
/// index requires the lock and a completed load.
#[derive(Debug)]
pub struct CacheLogFile {
    path: PathBuf,
    lock_path: PathBuf,
    lock: Option<FileLockGuard>,
    index: Option<CacheIndex>,
    pending: Vec<Action>,
    baseline: Option<FileBaseline>,
    log_lines: usize,
}

impl CacheLogFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = sibling(&path, LOCK_FILE_SUFFIX);
        Self {
            path,
            lock_path,
            lock: None,
            index: None,
            pending: Vec::new(),
            baseline: None,
            log_lines: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create an empty index file (and its directory) unless it exists
    pub fn create_if_missing(&self) -> CacheResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Opening for append leaves an existing file untouched
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        Ok(())
    }

    /// Acquire the cross-process lock, blocking until it is available.
    /// The index has to be loaded again afterwards.
    pub fn lock(&mut self) -> CacheResult<()> {
        if self.lock.is_some() {
            return Err(CacheError::illegal_state("index file is already locked"));
        }
        self.lock = Some(FileLockGuard::acquire(&self.lock_path)?);
        self.index = None;
        Ok(())
    }

    /// Release the lock and forget the loaded index. Pending changes are
    /// kept, not written, so a later `load()` is refused until they are
    /// discarded.
    pub fn unlock(&mut self) {
        self.lock = None;
        self.index = None;
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    pub fn is_loaded(&self) -> bool {
        self.index.is_some()
    }

    /// True while there are changes not yet written to the file
    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_actions(&self) -> &[Action] {
        &self.pending
    }

    /// Lines in the file after the last load/persist/compact
    pub fn log_line_count(&self) -> usize {
        self.log_lines
    }

    pub fn baseline(&self) -> Option<FileBaseline> {
        self.baseline
    }

    /// Whether the file differs in size or modification time from the baseline
    pub fn has_changed_on_disk(&self) -> CacheResult<bool> {
        match self.baseline {
            Some(baseline) => Ok(FileBaseline::of(&self.path)? != baseline),
            None => Ok(true),
        }
    }

    /// Rebuild the index by replaying every line of the file
    pub fn load(&mut self) -> CacheResult<()> {
        self.require_locked("load")?;
        if self.is_dirty() {
            return Err(CacheError::illegal_state(format!(
                "cannot load while {} changes are not persisted",
                self.pending.len()
            )));
        }

        let bytes = fs::read(&self.path).map_err(|e| not_found_or_io(e, &self.path))?;

        let mut index = CacheIndex::new();
        let mut lines = 0;
        let mut ignored = 0;
        for line in split_lines(&bytes) {
            lines += 1;
            // Invalid UTF-8 (e.g. a write torn inside a character) only voids its own line
            let action = std::str::from_utf8(line)
                .map(Action::decode)
                .unwrap_or(Action::Noop);
            if action == Action::Noop && !line.is_empty() {
                ignored += 1;
            }
            action.apply_to(&mut index);
        }
        if ignored > 0 {
            warn!(
                "Ignored {} invalid line(s) in {}",
                ignored,
                self.path.display()
            );
        }
        debug!(
            "Loaded {} entries from {} lines of {}",
            index.len(),
            lines,
            self.path.display()
        );

        self.index = Some(index);
        self.log_lines = lines;
        self.baseline = Some(FileBaseline::of(&self.path)?);
        Ok(())
    }

    /// Forget the loaded index and any pending changes
    pub fn discard_changes(&mut self) {
        if self.is_dirty() {
            debug!("Discarding {} pending change(s)", self.pending.len());
        }
        self.pending.clear();
        self.index = None;
    }

    /// The loaded index, read only
    pub fn index(&self) -> CacheResult<&CacheIndex> {
        self.require_locked("read entries")?;
        self.index
            .as_ref()
            .ok_or_else(|| CacheError::illegal_state("index file has not been loaded"))
    }

    pub fn get_all_entries(&self) -> CacheResult<Vec<CacheEntry>> {
        Ok(self.index()?.all_entries())
    }

    pub fn add_entry(&mut self, entry: CacheEntry) -> CacheResult<()> {
        self.record(Action::Add(entry)).map(|_| ())
    }

    /// Returns false (and stays clean) if no entry has this id
    pub fn remove_entry(&mut self, id: &str) -> CacheResult<bool> {
        self.record(Action::Remove(id.to_string()))
    }

    /// Returns false (and stays clean) if no entry has this id
    pub fn mark_accessed(&mut self, id: &str, timestamp: i64) -> CacheResult<bool> {
        self.record(Action::Access {
            id: id.to_string(),
            timestamp,
        })
    }

    /// Remove every entry, returns how many there were
    pub fn clear(&mut self) -> CacheResult<usize> {
        let ids: Vec<String> = self
            .index()?
            .iter()
            .map(|entry| entry.id().to_string())
            .collect();
        for id in &ids {
            self.remove_entry(id)?;
        }
        Ok(ids.len())
    }

    fn record(&mut self, action: Action) -> CacheResult<bool> {
        self.require_locked("modify entries")?;
        let index = self
            .index
            .as_mut()
            .ok_or_else(|| CacheError::illegal_state("index file has not been loaded"))?;

        let changed = action.apply_to(index);
        if changed {
            self.pending.push(action);
        }
        Ok(changed)
    }

    /// Append one line per pending action. Without pending actions the file
    /// is not touched at all.
    pub fn persist_changes(&mut self) -> CacheResult<()> {
        self.require_locked("persist changes")?;
        if self.index.is_none() {
            return Err(CacheError::illegal_state(
                "cannot persist changes made before the index file was loaded",
            ));
        }
        if self.pending.is_empty() {
            return Ok(());
        }
        if self.has_changed_on_disk()? {
            warn!(
                "{} was modified without holding the lock",
                self.path.display()
            );
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| not_found_or_io(e, &self.path))?;

        let mut buffer = String::new();
        if !ends_with_newline_or_empty(&mut file)? {
            // Keep a torn last line separate from the new ones
            buffer.push('\n');
        }
        let lines: Vec<String> = self.pending.iter().map(Action::encode).collect();
        buffer.push_str(&lines.join("\n"));
        file.write_all(buffer.as_bytes())?;
        file.sync_data()?;

        debug!(
            "Appended {} action(s) to {}",
            lines.len(),
            self.path.display()
        );
        self.log_lines += lines.len();
        self.pending.clear();
        self.baseline = Some(FileBaseline::of(&self.path)?);
        Ok(())
    }

    /// Rewrite the file as one add line per live entry
    pub fn save_compacted_file(&mut self) -> CacheResult<()> {
        let index = self.index()?;

        // Oldest first, so replaying restores the recency order including ties
        let lines: Vec<String> = index
            .iter()
            .rev()
            .map(|entry| Action::Add(entry.clone()).encode())
            .collect();

        let compact_path = sibling(&self.path, COMPACT_FILE_SUFFIX);
        {
            let mut file = File::create(&compact_path)?;
            file.write_all(lines.join("\n").as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&compact_path, &self.path)?;

        debug!(
            "Compacted {} from {} to {} lines",
            self.path.display(),
            self.log_lines + self.pending.len(),
            lines.len()
        );
        self.log_lines = lines.len();
        self.pending.clear();
        self.baseline = Some(FileBaseline::of(&self.path)?);
        Ok(())
    }

    fn require_locked(&self, operation: &str) -> CacheResult<()> {
        if self.lock.is_none() {
            return Err(CacheError::illegal_state(format!(
                "cannot {} without holding the lock on {}",
                operation,
                self.path.display()
            )));
        }
        Ok(())
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Lines of the file without their terminators; a final `\n` does not start
/// another line
fn split_lines(bytes: &[u8]) -> Vec<&[u8]> {
    if bytes.is_empty() {
        return Vec::new();
    }
    let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    body.split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .collect()
}

fn not_found_or_io(error: io::Error, path: &Path) -> CacheError {
    if error.kind() == io::ErrorKind::NotFound {
        CacheError::FileNotFound(path.to_path_buf())
    } else {
        CacheError::Io(error)
    }
}

fn ends_with_newline_or_empty(file: &mut File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}
