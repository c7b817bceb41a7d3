use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use super::types::{CacheEntry, CacheKey};

/// Position in the recency order: newest access first, ties broken by the
/// most recent add/access call
type RecencyKey = (Reverse<i64>, Reverse<u64>);

#[derive(Debug, Clone)]
struct Slot {
    entry: CacheEntry,
    order: RecencyKey,
}

/// In-memory state of the index, kept sorted most-recently-used first
#[derive(Debug, Clone, Default)]
pub struct CacheIndex {
    entries: HashMap<String, Slot>,
    by_key: HashMap<CacheKey, Vec<String>>,
    recency: BTreeMap<RecencyKey, String>,
    next_seq: u64,
}

impl CacheIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, replacing any entry with the same id
    pub fn add_entry(&mut self, entry: CacheEntry) {
        self.remove_entry(entry.id());

        let order = self.next_order(entry.last_accessed());
        self.recency.insert(order, entry.id().to_string());
        self.by_key
            .entry(entry.key().clone())
            .or_default()
            .push(entry.id().to_string());
        self.entries
            .insert(entry.id().to_string(), Slot { entry, order });
    }

    /// Remove the entry with this id, returns false if there was none
    pub fn remove_entry(&mut self, id: &str) -> bool {
        let Some(slot) = self.entries.remove(id) else {
            return false;
        };

        self.recency.remove(&slot.order);
        if let Some(ids) = self.by_key.get_mut(slot.entry.key()) {
            ids.retain(|other| other != id);
            if ids.is_empty() {
                self.by_key.remove(slot.entry.key());
            }
        }
        true
    }

    /// Update the access time of an entry, returns false if there was none
    pub fn mark_accessed(&mut self, id: &str, timestamp: i64) -> bool {
        let Some(slot) = self.entries.get_mut(id) else {
            return false;
        };
        self.next_seq += 1;
        let order = (Reverse(timestamp), Reverse(self.next_seq));

        self.recency.remove(&slot.order);
        slot.entry = slot.entry.with_last_accessed(timestamp);
        slot.order = order;
        self.recency.insert(order, id.to_string());
        true
    }

    /// Most recently used entry stored under this key
    pub fn find_by_key(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.by_key
            .get(key)?
            .iter()
            .filter_map(|id| self.entries.get(id))
            .min_by_key(|slot| slot.order)
            .map(|slot| &slot.entry)
    }

    pub fn find_by_id(&self, id: &str) -> Option<&CacheEntry> {
        self.entries.get(id).map(|slot| &slot.entry)
    }

    /// All entries of one location regardless of version, most recent first
    pub fn find_all_by_location(&self, location: &str) -> Vec<&CacheEntry> {
        self.iter()
            .filter(|entry| entry.key().location() == location)
            .collect()
    }

    /// Entries ordered most recently used first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &CacheEntry> + '_ {
        self.recency
            .values()
            .filter_map(|id| self.entries.get(id))
            .map(|slot| &slot.entry)
    }

    /// Snapshot of all entries, most recently used first
    pub fn all_entries(&self) -> Vec<CacheEntry> {
        self.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_key.clear();
        self.recency.clear();
    }

    fn next_order(&mut self, last_accessed: i64) -> RecencyKey {
        self.next_seq += 1;
        (Reverse(last_accessed), Reverse(self.next_seq))
    }
}
