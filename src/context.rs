use crate::backend::local;
use crate::backend::remote::RemoteBackend;
use crate::backend::{AuthProvider, BlobStore, Credentials, Identity, RecordStore};
use crate::config::{BackendConfig, Config};
use crate::delete::{self, Confirm, DeleteOutcome};
use crate::downloader::{self, ArchiveExport, Download, TableFormat};
use crate::edit::{EditState, SavedEdit};
use crate::error::{AuthError, DeleteError, EditError, ExportError, StoreError, SubmitError};
use crate::form::{EntryForm, SubmitOutcome};
use crate::list::EntryList;
use crate::notify::{Notice, Notifier};
use crate::session::SessionManager;
use std::sync::Arc;
use std::time::Instant;

/// The auth provider, record store and blob store an application runs against
#[derive(Clone)]
pub struct Backend {
    pub auth: Arc<dyn AuthProvider>,
    pub records: Arc<dyn RecordStore>,
    pub blobs: Arc<dyn BlobStore>,
}

impl Backend {
    /// Construct the collaborators named by the configuration
    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        match &config.backend {
            BackendConfig::Local { data_dir } => {
                let (auth, records, blobs) =
                    local::open_all(data_dir, &config.bucket, &config.table)?;
                log::info!("Using local backend at {}", data_dir.display());
                Ok(Backend {
                    auth: Arc::new(auth),
                    records: Arc::new(records),
                    blobs: Arc::new(blobs),
                })
            }
            BackendConfig::Remote { url, api_key } => {
                let client = Arc::new(RemoteBackend::new(
                    url,
                    api_key,
                    &config.bucket,
                    &config.table,
                )?);
                log::info!("Using remote backend at {}", url);
                Ok(Backend {
                    auth: client.clone(),
                    records: client.clone(),
                    blobs: client,
                })
            }
        }
    }

    /// Use one value for all three collaborators
    pub fn shared<T>(backend: Arc<T>) -> Self
    where
        T: AuthProvider + RecordStore + BlobStore + 'static,
    {
        Backend {
            auth: backend.clone(),
            records: backend.clone(),
            blobs: backend,
        }
    }
}

/// Application context
///
/// Owns the session mirror and every piece of UI-local state (entry list,
/// form, edit draft, notification). Handlers take `&mut self`, so there is
/// exactly one writer. Each handler deals with its own failures: it logs,
/// raises a notification and hands the typed error back to the caller.
pub struct AppContext {
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    session: SessionManager,
    list: EntryList,
    form: EntryForm,
    edit: EditState,
    notifier: Notifier,
    concurrency: usize,
}

impl AppContext {
    /// Start the session manager and load the signed-in user's entries, if any
    pub async fn new(backend: Backend, config: &Config) -> Self {
        let session = SessionManager::start(backend.auth).await;

        let mut context = AppContext {
            records: backend.records,
            blobs: backend.blobs,
            session,
            list: EntryList::new(),
            form: EntryForm::new(),
            edit: EditState::default(),
            notifier: Notifier::new(config.notice_ttl),
            concurrency: config.concurrency,
        };

        if context.session.is_signed_in() {
            let _ = context.refresh().await;
        }
        context
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.session.identity()
    }

    pub fn list(&self) -> &EntryList {
        &self.list
    }

    pub fn list_mut(&mut self) -> &mut EntryList {
        &mut self.list
    }

    pub fn form(&self) -> &EntryForm {
        &self.form
    }

    pub fn form_mut(&mut self) -> &mut EntryForm {
        &mut self.form
    }

    pub fn edit_state(&self) -> &EditState {
        &self.edit
    }

    pub fn edit_state_mut(&mut self) -> &mut EditState {
        &mut self.edit
    }

    /// Fetchable location of a stored image, for display
    pub fn resolve_image(&self, path: &str) -> String {
        self.blobs.resolve(path)
    }

    /// Notification to display right now, if any
    pub fn notice(&self) -> Option<&Notice> {
        self.notifier.visible(Instant::now())
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Apply pending session events and react to an identity change
    pub async fn sync_session(&mut self) {
        if self.session.sync() {
            self.on_identity_changed().await;
        }
    }

    async fn on_identity_changed(&mut self) {
        self.edit.cancel();
        self.form.cancel();
        self.list.clear();
        if self.session.is_signed_in() {
            let _ = self.refresh().await;
        }
    }

    pub async fn sign_up(&mut self, credentials: &Credentials) -> Result<Option<Identity>, AuthError> {
        match self.session.sign_up(credentials).await {
            Ok(identity) => {
                self.notifier.success("Account created");
                if identity.is_some() {
                    self.on_identity_changed().await;
                }
                Ok(identity)
            }
            Err(e) => {
                log::error!("Sign-up failed: {}", e);
                self.notifier.failure(format!("Sign-up failed: {}", e));
                Err(e)
            }
        }
    }

    pub async fn sign_in(&mut self, credentials: &Credentials) -> Result<Identity, AuthError> {
        match self.session.sign_in(credentials).await {
            Ok(identity) => {
                self.on_identity_changed().await;
                Ok(identity)
            }
            Err(e) => {
                log::error!("Sign-in failed: {}", e);
                self.notifier.failure(format!("Sign-in failed: {}", e));
                Err(e)
            }
        }
    }

    pub async fn sign_out(&mut self) -> Result<(), AuthError> {
        let outcome = self.session.sign_out().await;
        if let Err(e) = &outcome {
            log::error!("Sign-out failed: {}", e);
        }
        self.on_identity_changed().await;
        outcome
    }

    /// Re-fetch the entry list; without a session this does nothing
    pub async fn refresh(&mut self) -> Result<(), StoreError> {
        let Some(identity) = self.session.identity() else {
            return Ok(());
        };
        self.list.refresh(self.records.as_ref(), identity).await?;
        Ok(())
    }

    /// Submit the entry form
    pub async fn submit(&mut self) -> Result<SubmitOutcome, SubmitError> {
        let outcome = self
            .form
            .submit(
                self.records.as_ref(),
                self.blobs.as_ref(),
                self.session.identity(),
                self.concurrency,
            )
            .await;

        match &outcome {
            Ok(SubmitOutcome::Saved { .. }) => {
                self.notifier.success("Entry saved successfully!");
                let _ = self.refresh().await;
            }
            Ok(SubmitOutcome::Ignored) => {}
            Err(_) => self.notifier.failure("Failed to save entry. Please try again."),
        }
        outcome
    }

    /// Start editing a loaded entry
    pub fn begin_edit(&mut self, id: &str) -> Result<(), EditError> {
        let entry = self
            .list
            .get(id)
            .ok_or_else(|| EditError::UnknownEntry(id.to_string()))?;
        self.edit.begin(entry);
        Ok(())
    }

    pub fn cancel_edit(&mut self) {
        self.edit.cancel();
    }

    pub async fn save_edit(&mut self) -> Result<SavedEdit, EditError> {
        let Some(identity) = self.session.identity() else {
            return Err(EditError::SignedOut);
        };

        let outcome = self
            .edit
            .save(
                self.records.as_ref(),
                self.blobs.as_ref(),
                identity,
                self.concurrency,
            )
            .await;

        match &outcome {
            Ok(_) => {
                self.notifier.success("Entry updated successfully!");
                let _ = self.refresh().await;
            }
            Err(EditError::Update(_)) => {
                self.notifier.failure("Failed to update entry. Please try again.")
            }
            Err(_) => {}
        }
        outcome
    }

    /// Delete one entry after confirmation
    pub async fn delete_entry(
        &mut self,
        id: &str,
        confirm: &mut (dyn Confirm + Send),
    ) -> Result<DeleteOutcome, DeleteError> {
        if !self.session.is_signed_in() {
            return Ok(DeleteOutcome::Cancelled);
        }

        let outcome =
            delete::delete_entry(self.records.as_ref(), self.blobs.as_ref(), id, confirm).await;

        match &outcome {
            Ok(DeleteOutcome::Deleted { .. }) => {
                self.notifier.success("Entry deleted successfully!");
                let _ = self.refresh().await;
            }
            Ok(DeleteOutcome::Cancelled) => {}
            Err(_) => self.notifier.failure("Failed to delete entry. Please try again."),
        }
        outcome
    }

    /// Delete every loaded entry after confirmation
    pub async fn clear_all(
        &mut self,
        confirm: &mut (dyn Confirm + Send),
    ) -> Result<DeleteOutcome, DeleteError> {
        let Some(identity) = self.session.identity() else {
            return Ok(DeleteOutcome::Cancelled);
        };

        let outcome = delete::clear_all(
            self.records.as_ref(),
            self.blobs.as_ref(),
            identity,
            self.list.entries(),
            confirm,
        )
        .await;

        match &outcome {
            Ok(DeleteOutcome::Deleted { .. }) => {
                self.list.clear();
                self.notifier.success("All entries cleared successfully!");
            }
            Ok(DeleteOutcome::Cancelled) => {}
            Err(_) => self.notifier.failure("Failed to clear entries. Please try again."),
        }
        outcome
    }

    /// Table export of the loaded entries
    pub fn export_table(&self, format: TableFormat) -> Result<Download, ExportError> {
        downloader::export_table(self.list.entries(), format).inspect_err(|e| {
            log::error!("Table export failed: {}", e);
        })
    }

    /// Zip export of the loaded entries and their images
    pub async fn export_archive(&self) -> Result<ArchiveExport, ExportError> {
        downloader::export_archive(self.list.entries(), self.blobs.as_ref(), self.concurrency)
            .await
            .inspect_err(|e| {
                log::error!("Archive export failed: {}", e);
            })
    }
}
