use crate::backend::{BlobStore, Identity, RecordStore};
use crate::batch::BatchResult;
use crate::entry::{Entry, EntryPatch, PendingFile};
use crate::error::EditError;
use crate::transfer::upload_files;

/// Working copy of one entry while it is being edited
#[derive(Clone, Debug, PartialEq)]
pub struct EditDraft {
    pub entry_id: String,
    pub label: String,

    /// Existing image references still attached
    pub images: Vec<String>,

    /// Newly picked files, uploaded only on save
    pub new_files: Vec<PendingFile>,
}

impl EditDraft {
    pub fn from_entry(entry: &Entry) -> Self {
        EditDraft {
            entry_id: entry.id.clone(),
            label: entry.medicine_name.clone(),
            images: entry.images.clone(),
            new_files: Vec::new(),
        }
    }

    /// Detach an existing image; its blob is left in storage
    pub fn remove_image(&mut self, index: usize) -> Option<String> {
        (index < self.images.len()).then(|| self.images.remove(index))
    }

    pub fn add_files(&mut self, files: impl IntoIterator<Item = PendingFile>) {
        self.new_files.extend(files);
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum EditState {
    #[default]
    Viewing,
    Editing(EditDraft),
}

/// Result of a successful save
#[derive(Debug)]
pub struct SavedEdit {
    pub entry_id: String,
    pub patch: EntryPatch,
    pub uploads: BatchResult<String>,
}

impl EditState {
    /// Start editing `entry`, discarding any draft in progress
    pub fn begin(&mut self, entry: &Entry) {
        *self = EditState::Editing(EditDraft::from_entry(entry));
    }

    pub fn draft(&self) -> Option<&EditDraft> {
        match self {
            EditState::Editing(draft) => Some(draft),
            EditState::Viewing => None,
        }
    }

    pub fn draft_mut(&mut self) -> Option<&mut EditDraft> {
        match self {
            EditState::Editing(draft) => Some(draft),
            EditState::Viewing => None,
        }
    }

    pub fn is_editing(&self) -> bool {
        matches!(self, EditState::Editing(_))
    }

    /// Throw the draft away; nothing is uploaded or deleted
    pub fn cancel(&mut self) {
        *self = EditState::Viewing;
    }

    /// Upload new files and write the full record
    ///
    /// The saved image list is the surviving old references followed by the
    /// newly uploaded ones. On success the state returns to `Viewing`; on
    /// failure it stays in `Editing` with the draft intact.
    ///
    /// # Errors
    /// * `EditError::NotEditing` when no draft exists
    /// * `EditError::Update` when the record update fails
    pub async fn save(
        &mut self,
        records: &dyn RecordStore,
        blobs: &dyn BlobStore,
        identity: &Identity,
        concurrency: usize,
    ) -> Result<SavedEdit, EditError> {
        let draft = self.draft().ok_or(EditError::NotEditing)?;

        let uploads = upload_files(blobs, &identity.user_id, &draft.new_files, concurrency).await;

        let mut images = draft.images.clone();
        images.extend(uploads.succeeded.iter().cloned());
        let patch = EntryPatch {
            medicine_name: draft.label.clone(),
            images,
        };
        let entry_id = draft.entry_id.clone();

        if let Err(e) = records.update(&entry_id, patch.clone()).await {
            log::error!("Failed to update entry {}: {}", entry_id, e);
            return Err(EditError::Update(e));
        }

        log::info!("Updated entry {}", entry_id);
        *self = EditState::Viewing;
        Ok(SavedEdit {
            entry_id,
            patch,
            uploads,
        })
    }
}
