use serde::Serialize;
use std::fmt;

use super::version::VersionId;
use crate::utils::{CacheError, CacheResult};

/// Key identifying a cached resource: exact location text plus optional version
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize)]
pub struct CacheKey {
    location: String,
    version: Option<VersionId>,
}

impl CacheKey {
    /// Create a key for an absolute URL.
    ///
    /// The location is validated but stored exactly as given, two keys only
    /// match when their location strings are identical.
    pub fn new(location: impl Into<String>, version: Option<VersionId>) -> CacheResult<Self> {
        let location = location.into();
        validate_location(&location)?;
        Ok(Self { location, version })
    }

    /// Create a key from raw strings, parsing the version as well
    pub fn parse(location: &str, version: Option<&str>) -> CacheResult<Self> {
        let version = version.map(str::parse::<VersionId>).transpose()?;
        Self::new(location, version)
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn version(&self) -> Option<&VersionId> {
        self.version.as_ref()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{} ({})", self.location, version),
            None => f.write_str(&self.location),
        }
    }
}

fn validate_location(location: &str) -> CacheResult<()> {
    if location.is_empty() {
        return Err(CacheError::InvalidKey("location is empty".to_string()));
    }
    // url::Url silently strips line breaks, the index file cannot hold them
    if location.contains(['\n', '\r']) {
        return Err(CacheError::InvalidKey(format!(
            "location contains a line break: {:?}",
            location
        )));
    }
    url::Url::parse(location)
        .map(|_| ())
        .map_err(|e| CacheError::InvalidKey(format!("'{}' is not an absolute URL: {}", location, e)))
}

/// One record of the index: which bucket holds a resource and when it was last used
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    id: String,
    last_accessed: i64,
    key: CacheKey,
}

impl CacheEntry {
    /// Create an entry. `id` is the externally allocated bucket id (e.g. `1/11`).
    pub fn new(id: impl Into<String>, last_accessed: i64, key: CacheKey) -> CacheResult<Self> {
        let id = id.into();
        validate_entry_id(&id)?;
        Ok(Self {
            id,
            last_accessed,
            key,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Epoch milliseconds of the last access
    pub fn last_accessed(&self) -> i64 {
        self.last_accessed
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Copy of this entry with another access time
    pub fn with_last_accessed(&self, last_accessed: i64) -> Self {
        Self {
            last_accessed,
            ..self.clone()
        }
    }
}

/// Ids are written to the log unescaped, so they may not contain the delimiter character
pub(crate) fn validate_entry_id(id: &str) -> CacheResult<()> {
    if id.is_empty() {
        return Err(CacheError::InvalidEntryId("id is empty".to_string()));
    }
    if id.contains([':', '\n', '\r']) {
        return Err(CacheError::InvalidEntryId(format!(
            "id {:?} contains ':' or a line break",
            id
        )));
    }
    Ok(())
}

/// Groups entries for bulk operations, e.g. everything loaded by one JNLP file
/// or from one domain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "id")]
pub enum CacheId {
    JnlpPathId(Option<String>),
    DomainId(Option<String>),
}

impl CacheId {
    /// Domain group of a key, `DomainId(None)` if the location has no host
    pub fn domain_of(key: &CacheKey) -> Self {
        let host = url::Url::parse(key.location())
            .ok()
            .and_then(|url| url.host_str().map(str::to_string));
        CacheId::DomainId(host)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CacheId::JnlpPathId(_) => "JNLP-path",
            CacheId::DomainId(_) => "Domain",
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            CacheId::JnlpPathId(value) | CacheId::DomainId(value) => value.as_deref(),
        }
    }
}

impl fmt::Display for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.value().unwrap_or("-"))
    }
}
