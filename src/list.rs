use crate::backend::{Identity, RecordStore};
use crate::entry::{Entry, sort_newest_first};
use crate::error::StoreError;
use std::collections::HashSet;

/// Entries whose label contains `term`, ignoring case
///
/// An empty term returns every entry. Order is preserved.
pub fn filter<'a>(entries: &'a [Entry], term: &str) -> Vec<&'a Entry> {
    entries.iter().filter(|entry| entry.matches(term)).collect()
}

/// The loaded entry list plus its view state
///
/// This is the single owner of the in-memory entries; other components
/// either ask it to refresh or mutate it after a confirmed server change.
#[derive(Debug, Default)]
pub struct EntryList {
    entries: Vec<Entry>,
    search: String,
    expanded: HashSet<String>,
}

impl EntryList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-fetch the identity's entries, newest first
    ///
    /// On failure the error is logged and the previously loaded entries stay.
    pub async fn refresh(
        &mut self,
        records: &dyn RecordStore,
        identity: &Identity,
    ) -> Result<&[Entry], StoreError> {
        match records.select(&identity.user_id).await {
            Ok(mut entries) => {
                sort_newest_first(&mut entries);
                log::debug!("Loaded {} entries", entries.len());
                self.expanded
                    .retain(|id| entries.iter().any(|entry| &entry.id == id));
                self.entries = entries;
                Ok(&self.entries)
            }
            Err(e) => {
                log::error!("Failed to fetch entries: {}", e);
                Err(e)
            }
        }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&Entry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn search_term(&self) -> &str {
        &self.search
    }

    pub fn set_search(&mut self, term: impl Into<String>) {
        self.search = term.into();
    }

    /// Entries matching the current search term
    pub fn visible(&self) -> Vec<&Entry> {
        filter(&self.entries, &self.search)
    }

    /// Whether the view should show its "no matches" message
    pub fn shows_no_matches(&self) -> bool {
        !self.search.is_empty() && self.visible().is_empty()
    }

    pub fn toggle_expanded(&mut self, id: &str) -> bool {
        if !self.expanded.remove(id) {
            self.expanded.insert(id.to_string());
            true
        } else {
            false
        }
    }

    pub fn is_expanded(&self, id: &str) -> bool {
        self.expanded.contains(id)
    }

    /// Drop everything after a confirmed bulk delete
    pub fn clear(&mut self) {
        self.entries.clear();
        self.expanded.clear();
    }

    /// Replace the list wholesale; used when the caller already has fresh rows
    pub fn replace(&mut self, mut entries: Vec<Entry>) {
        sort_newest_first(&mut entries);
        self.entries = entries;
    }
}
