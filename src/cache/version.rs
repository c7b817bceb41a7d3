use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::utils::CacheError;

// JNLP version-id: strings joined by '.', '-' or '_', optional trailing '*' or '+'
static VERSION_ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s&-._*+]+(?:[._-][^\s&-._*+]+)*[*+]?$").expect("Invalid version-id regex")
});

const ZERO_ELEMENT: &str = "0";

/// A version identifier of a cached resource.
///
/// The original text is kept verbatim so that it can be written back to the
/// index file unchanged. Equality works on the normalized tuple: `1.0`, `1`
/// and `1.00` are the same version.
#[derive(Debug, Clone)]
pub struct VersionId {
    raw: String,
    tuple: Vec<String>,
}

#[derive(Debug, PartialEq, Eq, Hash)]
enum Element<'a> {
    Numeric(i32),
    Text(&'a str),
}

impl<'a> Element<'a> {
    fn of(value: &'a str) -> Self {
        value
            .parse::<i32>()
            .map(Element::Numeric)
            .unwrap_or(Element::Text(value))
    }
}

impl VersionId {
    /// The version exactly as it was parsed
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn element(&self, index: usize) -> Element<'_> {
        Element::of(self.tuple.get(index).map_or(ZERO_ELEMENT, String::as_str))
    }

    /// Number of tuple elements left after dropping trailing zeros
    fn significant_len(&self) -> usize {
        let mut len = self.tuple.len();
        while len > 0 && self.element(len - 1) == Element::Numeric(0) {
            len -= 1;
        }
        len
    }
}

impl FromStr for VersionId {
    type Err = CacheError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if !VERSION_ID_PATTERN.is_match(value) {
            return Err(CacheError::InvalidVersion(format!(
                "'{}' is not a valid version id",
                value
            )));
        }

        let tuple = value
            .trim_end_matches(['*', '+'])
            .split(['.', '-', '_'])
            .map(str::to_string)
            .collect();

        Ok(Self {
            raw: value.to_string(),
            tuple,
        })
    }
}

impl PartialEq for VersionId {
    fn eq(&self, other: &Self) -> bool {
        let len = self.tuple.len().max(other.tuple.len());
        (0..len).all(|i| self.element(i) == other.element(i))
    }
}

impl Eq for VersionId {}

impl Hash for VersionId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Trailing zeros are padding, they must not influence the hash
        let len = self.significant_len();
        len.hash(state);
        for i in 0..len {
            self.element(i).hash(state);
        }
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for VersionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}
