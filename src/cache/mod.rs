// Gateway module for the cache index - follows the Train Station Pattern
// All external access must go through this gateway

mod action;
mod holder;
mod index;
mod lock;
mod log_file;
mod types;
mod version;

pub use action::Action;
pub use holder::{CacheIndexHolder, CompactionPolicy, IndexSession};
pub use index::CacheIndex;
pub use lock::FileLockGuard;
pub use log_file::{CacheLogFile, FileBaseline};
pub use types::{CacheEntry, CacheId, CacheKey};
pub use version::VersionId;

use std::path::Path;

/// Open the index file at `path` with the given compaction policy
pub fn init(path: &Path, policy: CompactionPolicy) -> crate::utils::CacheResult<CacheIndexHolder> {
    Ok(CacheIndexHolder::open(path)?.with_policy(policy))
}
