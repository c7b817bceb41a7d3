pub mod app;
pub mod cache;
pub mod cli;
pub mod constants;
pub mod utils;

pub use app::{load_config, Config};
pub use cache::{
    Action, CacheEntry, CacheId, CacheIndex, CacheIndexHolder, CacheKey, CompactionPolicy,
    IndexSession, VersionId,
};
pub use utils::{CacheError, CacheResult};
