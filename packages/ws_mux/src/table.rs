use std::collections::HashMap;

use crate::request::{Handler, Request};

/// What the table keeps for a tag: the handler and whether it outlives dispatch.
#[derive(Debug, Clone)]
pub struct ActiveEntry {
    pub handler: Option<Handler>,
    pub persistent: bool,
}

impl From<&Request> for ActiveEntry {
    fn from(request: &Request) -> Self {
        Self {
            handler: request.handler.clone(),
            persistent: request.persistent,
        }
    }
}

/// Result of correlating an inbound tag against the table.
#[derive(Debug)]
pub struct Resolved {
    /// Key that matched: the message tag itself or the fallback tag.
    pub key: String,
    pub entry: ActiveEntry,
    /// True when a one-shot entry was detached, freeing `key`.
    pub freed: bool,
}

/// Mapping from response tag to the request owning it. At most one entry per tag.
#[derive(Debug, Default)]
pub struct ActiveTable {
    entries: HashMap<String, ActiveEntry>,
}

impl ActiveTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.contains_key(tag)
    }

    pub fn get(&self, tag: &str) -> Option<&ActiveEntry> {
        self.entries.get(tag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted list of occupied tags.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.entries.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Insert a persistent registration, replacing whatever held the tag.
    /// Returns the replaced entry.
    pub fn register(&mut self, request: &Request) -> Option<ActiveEntry> {
        self.entries
            .insert(request.tag.clone(), ActiveEntry::from(request))
    }

    /// Claim `request.tag` for an outbound request.
    ///
    /// Untagged requests always succeed without touching the table. Returns
    /// false, leaving the table unchanged, when the tag is already held.
    pub fn claim(&mut self, request: &Request) -> bool {
        if !request.is_tagged() {
            return true;
        }
        if self.entries.contains_key(&request.tag) {
            return false;
        }
        self.entries
            .insert(request.tag.clone(), ActiveEntry::from(request));
        true
    }

    /// Give back a tag claimed for `request` that was never sent. Persistent
    /// entries under the same tag are left alone.
    pub fn release(&mut self, request: &Request) {
        if !request.is_tagged() {
            return;
        }
        if self.entries.get(&request.tag).is_some_and(|e| !e.persistent) {
            self.entries.remove(&request.tag);
        }
    }

    /// Look up `tag`, falling back to `fallback`. One-shot matches are removed.
    pub fn resolve(&mut self, tag: &str, fallback: &str) -> Option<Resolved> {
        let key = if self.entries.contains_key(tag) {
            tag
        } else if self.entries.contains_key(fallback) {
            fallback
        } else {
            return None;
        };

        let persistent = self.entries.get(key)?.persistent;
        let entry = if persistent {
            self.entries.get(key)?.clone()
        } else {
            self.entries.remove(key)?
        };
        Some(Resolved {
            key: key.to_string(),
            entry,
            freed: !persistent,
        })
    }
}
