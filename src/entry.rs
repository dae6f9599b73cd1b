use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A saved medicine entry
///
/// One row of the entries table: a free-form label plus the ordered list of
/// blob paths that were uploaded with it.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Entry {
    /// Opaque unique identifier assigned by the record store
    pub id: String,

    /// Identity that owns the entry (and every blob it references)
    pub user_id: String,

    /// Free-form label entered by the user
    pub medicine_name: String,

    /// Blob paths in upload order
    #[serde(default)]
    pub images: Vec<String>,

    /// Server-assigned creation time, used for newest-first ordering
    pub created_at: DateTime<Utc>,
}

impl Entry {
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Case-insensitive substring match against the label
    pub fn matches(&self, term: &str) -> bool {
        if term.is_empty() {
            return true;
        }
        self.medicine_name
            .to_lowercase()
            .contains(&term.to_lowercase())
    }
}

/// Fields supplied when inserting a new entry
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct NewEntry {
    pub user_id: String,
    pub medicine_name: String,
    pub images: Vec<String>,
}

/// Full-record update issued by the edit flow
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct EntryPatch {
    pub medicine_name: String,
    pub images: Vec<String>,
}

/// A file the user has picked but not yet uploaded
#[derive(Clone, Debug, PartialEq)]
pub struct PendingFile {
    /// Original file name, used only for its extension
    pub name: String,

    /// MIME type reported by the picker, if any
    pub content_type: Option<String>,

    pub bytes: Vec<u8>,
}

impl PendingFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        PendingFile {
            name: name.into(),
            content_type: None,
            bytes,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Sort entries newest first
pub fn sort_newest_first(entries: &mut [Entry]) {
    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}
