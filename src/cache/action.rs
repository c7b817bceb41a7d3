use super::index::CacheIndex;
use super::types::{validate_entry_id, CacheEntry, CacheKey};
use super::version::VersionId;
use crate::constants::{
    ESCAPED_FIELD_DELIMITER, FIELD_DELIMITER, KEY_ID, KEY_LAST_ACCESSED, KEY_LOCATION,
    KEY_VERSION, REMOVE_MARKER,
};

/// One mutation of the index, as recorded in the index file.
///
/// Line grammar:
///
/// ```text
/// add:     ::i=<id>::l=<location>[::v=<version>]::a=<last accessed>::
/// access:  ::i=<id>::a=<last accessed>::
/// remove:  !<id>!
/// ```
///
/// Inside a field value every `::` is written as `::::`. Anything that does
/// not match the grammar decodes to [`Action::Noop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Add(CacheEntry),
    Remove(String),
    Access { id: String, timestamp: i64 },
    Noop,
}

impl Action {
    /// Encode as a single line without line terminator
    pub fn encode(&self) -> String {
        match self {
            Action::Add(entry) => {
                let mut line = String::from(FIELD_DELIMITER);
                push_field(&mut line, KEY_ID, entry.id());
                push_field(&mut line, KEY_LOCATION, entry.key().location());
                if let Some(version) = entry.key().version() {
                    push_field(&mut line, KEY_VERSION, version.as_str());
                }
                push_field(&mut line, KEY_LAST_ACCESSED, &entry.last_accessed().to_string());
                line
            }
            Action::Access { id, timestamp } => {
                let mut line = String::from(FIELD_DELIMITER);
                push_field(&mut line, KEY_ID, id);
                push_field(&mut line, KEY_LAST_ACCESSED, &timestamp.to_string());
                line
            }
            Action::Remove(id) => format!("{REMOVE_MARKER}{id}{REMOVE_MARKER}"),
            // Decodes back to Noop, never written by the log file
            Action::Noop => String::new(),
        }
    }

    /// Decode one line. Never fails: invalid input becomes `Noop`.
    pub fn decode(line: &str) -> Action {
        decode_remove(line)
            .or_else(|| decode_entry_line(line))
            .unwrap_or(Action::Noop)
    }

    /// Apply to an index, returns whether the index changed
    pub fn apply_to(&self, index: &mut CacheIndex) -> bool {
        match self {
            Action::Add(entry) => {
                index.add_entry(entry.clone());
                true
            }
            Action::Remove(id) => index.remove_entry(id),
            Action::Access { id, timestamp } => index.mark_accessed(id, *timestamp),
            Action::Noop => false,
        }
    }
}

fn push_field(line: &mut String, key: &str, value: &str) {
    line.push_str(key);
    line.push('=');
    line.push_str(&value.replace(FIELD_DELIMITER, ESCAPED_FIELD_DELIMITER));
    line.push_str(FIELD_DELIMITER);
}

fn decode_remove(line: &str) -> Option<Action> {
    let id = line
        .strip_prefix(REMOVE_MARKER)?
        .strip_suffix(REMOVE_MARKER)?;
    validate_entry_id(id).ok()?;
    Some(Action::Remove(id.to_string()))
}

fn decode_entry_line(line: &str) -> Option<Action> {
    let fields = parse_fields(line.strip_prefix(FIELD_DELIMITER)?)?;

    // Only these key sequences are valid
    let (id, location, version, last_accessed) = match fields.as_slice() {
        [(KEY_ID, id), (KEY_LAST_ACCESSED, at)] => (id, None, None, at),
        [(KEY_ID, id), (KEY_LOCATION, location), (KEY_LAST_ACCESSED, at)] => {
            (id, Some(location), None, at)
        }
        [(KEY_ID, id), (KEY_LOCATION, location), (KEY_VERSION, version), (KEY_LAST_ACCESSED, at)] => {
            (id, Some(location), Some(version), at)
        }
        _ => return None,
    };

    validate_entry_id(id).ok()?;
    let last_accessed: i64 = last_accessed.parse().ok()?;

    match location {
        Some(location) => {
            let version = version
                .map(|v| v.parse::<VersionId>())
                .transpose()
                .ok()?;
            let key = CacheKey::new(location.as_str(), version).ok()?;
            CacheEntry::new(id.as_str(), last_accessed, key)
                .ok()
                .map(Action::Add)
        }
        None => Some(Action::Access {
            id: id.clone(),
            timestamp: last_accessed,
        }),
    }
}

/// Split `k=value::k=value::` into its fields, in line order. Unterminated
/// values reject the whole line.
fn parse_fields(mut rest: &str) -> Option<Vec<(&str, String)>> {
    let mut fields = Vec::new();
    while !rest.is_empty() {
        let (key, after_key) = rest.split_once('=')?;
        let (value, remaining) = read_value(after_key)?;
        fields.push((key, value));
        rest = remaining;
    }
    Some(fields)
}

/// Read one escaped value up to its terminating `::`.
///
/// Colon runs are consumed four at a time as an escaped `::`; what is left of
/// the run decides the rest: one colon is a literal, two terminate the value,
/// three are a literal colon followed by the terminator.
fn read_value(input: &str) -> Option<(String, &str)> {
    let mut value = String::new();
    let mut pos = 0;
    loop {
        let start = pos + input[pos..].find(':')?;
        value.push_str(&input[pos..start]);

        let run = input[start..].bytes().take_while(|&b| b == b':').count();
        pos = start + run;
        for _ in 0..run / 4 {
            value.push_str(FIELD_DELIMITER);
        }
        match run % 4 {
            0 => {}
            1 => value.push(':'),
            2 => return Some((value, &input[pos..])),
            _ => {
                value.push(':');
                return Some((value, &input[pos..]));
            }
        }
    }
}
