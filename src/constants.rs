/// Constants module to avoid magic numbers in the codebase

// Index file layout
pub const DEFAULT_INDEX_FILE_NAME: &str = "recently_used";
pub const LOCK_FILE_SUFFIX: &str = ".lock";
pub const COMPACT_FILE_SUFFIX: &str = ".compact";

// Log line grammar
pub const FIELD_DELIMITER: &str = "::";
pub const ESCAPED_FIELD_DELIMITER: &str = "::::";
pub const REMOVE_MARKER: char = '!';
pub const KEY_ID: &str = "i";
pub const KEY_LOCATION: &str = "l";
pub const KEY_VERSION: &str = "v";
pub const KEY_LAST_ACCESSED: &str = "a";

// Compaction defaults
pub const DEFAULT_COMPACTION_MIN_LOG_LINES: usize = 64;
pub const DEFAULT_COMPACTION_MAX_LOG_RATIO: f64 = 4.0;

// Config
pub const APP_NAME: &str = "cache-index";
pub const ENV_PREFIX: &str = "CACHE_INDEX_";
pub const LOCAL_CONFIG_PATH: &str = ".cache-index/config.toml";
pub const DEFAULT_LOG_LEVEL: &str = "warn";
