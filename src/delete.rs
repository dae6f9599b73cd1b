use crate::backend::{BlobStore, Identity, RecordStore};
use crate::entry::Entry;
use crate::error::{DeleteError, StoreError};

/// Interactive yes/no confirmation
pub trait Confirm {
    fn confirm(&mut self, prompt: &str) -> bool;
}

impl<F: FnMut(&str) -> bool> Confirm for F {
    fn confirm(&mut self, prompt: &str) -> bool {
        self(prompt)
    }
}

/// A confirmation that was already given (or refused) by the caller
#[derive(Clone, Copy, Debug)]
pub struct Answered(pub bool);

impl Confirm for Answered {
    fn confirm(&mut self, _prompt: &str) -> bool {
        self.0
    }
}

pub const DELETE_PROMPT: &str = "Are you sure you want to delete this entry?";
pub const CLEAR_PROMPT: &str = "Are you sure you want to delete all entries? This cannot be undone.";

#[derive(Debug, PartialEq)]
pub enum DeleteOutcome {
    /// The user declined; nothing was touched
    Cancelled,

    /// The record is gone; `blob_error` is set when blob removal failed first
    Deleted { blob_error: Option<String> },
}

/// Delete one entry: its blobs first, then the record
///
/// The record is looked up to find its image references. Blob removal is
/// best-effort; a failure is logged and the record delete still goes ahead.
/// Blobs are not restored if the record delete then fails.
///
/// # Errors
/// * `DeleteError::Record` if removing the record fails
pub async fn delete_entry(
    records: &dyn RecordStore,
    blobs: &dyn BlobStore,
    id: &str,
    confirm: &mut (dyn Confirm + Send),
) -> Result<DeleteOutcome, DeleteError> {
    if !confirm.confirm(DELETE_PROMPT) {
        return Ok(DeleteOutcome::Cancelled);
    }

    let images = match records.fetch(id).await {
        Ok(entry) => entry.images,
        Err(e) => {
            log::warn!("Could not look up images for entry {}: {}", id, e);
            Vec::new()
        }
    };

    let blob_error = remove_blobs(blobs, &images).await.err().map(|e| e.to_string());

    match records.delete_by_id(id).await {
        Ok(()) => {
            log::info!("Deleted entry {}", id);
            Ok(DeleteOutcome::Deleted { blob_error })
        }
        Err(e) => {
            log::error!("Failed to delete entry {}: {}", id, e);
            Err(DeleteError::Record(e))
        }
    }
}

/// Delete every loaded entry for the identity
///
/// All image references of `entries` go out in one bulk blob delete, then one
/// bulk record delete scoped to the owner. With no entries loaded nothing is
/// called and the operation counts as a success.
pub async fn clear_all(
    records: &dyn RecordStore,
    blobs: &dyn BlobStore,
    identity: &Identity,
    entries: &[Entry],
    confirm: &mut (dyn Confirm + Send),
) -> Result<DeleteOutcome, DeleteError> {
    if !confirm.confirm(CLEAR_PROMPT) {
        return Ok(DeleteOutcome::Cancelled);
    }
    if entries.is_empty() {
        return Ok(DeleteOutcome::Deleted { blob_error: None });
    }

    let images: Vec<String> = entries
        .iter()
        .flat_map(|entry| entry.images.iter().cloned())
        .collect();
    let blob_error = remove_blobs(blobs, &images).await.err().map(|e| e.to_string());

    match records.delete_by_owner(&identity.user_id).await {
        Ok(()) => {
            log::info!("Cleared {} entries", entries.len());
            Ok(DeleteOutcome::Deleted { blob_error })
        }
        Err(e) => {
            log::error!("Failed to clear entries: {}", e);
            Err(DeleteError::Record(e))
        }
    }
}

async fn remove_blobs(blobs: &dyn BlobStore, paths: &[String]) -> Result<(), StoreError> {
    if paths.is_empty() {
        return Ok(());
    }
    blobs.remove(paths).await.inspect_err(|e| {
        log::warn!("Failed to remove {} blobs: {}", paths.len(), e);
    })
}
