use crate::backend::{BlobStore, Identity, RecordStore};
use crate::batch::BatchResult;
use crate::entry::{Entry, NewEntry, PendingFile};
use crate::error::SubmitError;
use crate::transfer::upload_files;

/// What a submit call did
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Preconditions not met (blank label, no files, or no identity); nothing happened
    Ignored,

    /// The entry was saved with whichever uploads succeeded
    Saved {
        entry: Entry,
        uploads: BatchResult<String>,
    },
}

/// Upload the files, then insert one entry referencing the successful uploads
///
/// A blank label, an empty file list or a missing identity makes this a
/// no-op that touches no collaborator. Failed uploads are skipped, so the
/// entry may end up with fewer images than files (even none).
///
/// # Arguments
/// * `records` - Table the entry is inserted into
/// * `blobs` - Object store receiving the files
/// * `label` - Medicine name as typed
/// * `files` - Picked files, in order
/// * `identity` - Signed-in user, if any
/// * `concurrency` - Maximum simultaneous uploads
///
/// # Errors
/// * `SubmitError::Insert` if the record insert fails after uploading
pub async fn submit_entry(
    records: &dyn RecordStore,
    blobs: &dyn BlobStore,
    label: &str,
    files: &[PendingFile],
    identity: Option<&Identity>,
    concurrency: usize,
) -> Result<SubmitOutcome, SubmitError> {
    let Some(identity) = identity else {
        return Ok(SubmitOutcome::Ignored);
    };
    if label.trim().is_empty() || files.is_empty() {
        return Ok(SubmitOutcome::Ignored);
    }

    let uploads = upload_files(blobs, &identity.user_id, files, concurrency).await;
    if !uploads.is_complete() {
        log::warn!(
            "{} of {} uploads failed for '{}'",
            uploads.failed.len(),
            files.len(),
            label
        );
    }

    let new_entry = NewEntry {
        user_id: identity.user_id.clone(),
        medicine_name: label.to_string(),
        images: uploads.succeeded.clone(),
    };

    match records.insert(new_entry).await {
        Ok(entry) => {
            log::info!("Saved entry {} with {} images", entry.id, entry.images.len());
            Ok(SubmitOutcome::Saved { entry, uploads })
        }
        Err(e) => {
            log::error!("Failed to insert entry '{}': {}", label, e);
            Err(SubmitError::Insert(e))
        }
    }
}

/// Entry form: a label plus the files picked so far
#[derive(Debug, Default)]
pub struct EntryForm {
    pub label: String,
    files: Vec<PendingFile>,
}

impl EntryForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    pub fn add_files(&mut self, files: impl IntoIterator<Item = PendingFile>) {
        self.files.extend(files);
    }

    pub fn remove_file(&mut self, index: usize) -> Option<PendingFile> {
        (index < self.files.len()).then(|| self.files.remove(index))
    }

    pub fn files(&self) -> &[PendingFile] {
        &self.files
    }

    /// Drop the pending file selection
    pub fn cancel(&mut self) {
        self.files.clear();
    }

    /// Submit the form; on success the label and files are reset
    ///
    /// On insert failure the form is left untouched so the user can retry.
    pub async fn submit(
        &mut self,
        records: &dyn RecordStore,
        blobs: &dyn BlobStore,
        identity: Option<&Identity>,
        concurrency: usize,
    ) -> Result<SubmitOutcome, SubmitError> {
        let outcome =
            submit_entry(records, blobs, &self.label, &self.files, identity, concurrency).await?;

        if let SubmitOutcome::Saved { .. } = outcome {
            self.label.clear();
            self.files.clear();
        }
        Ok(outcome)
    }
}
