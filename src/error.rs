use thiserror::Error;

/// Failures reported by the authentication collaborator
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Email address is already registered")]
    AlreadyRegistered,

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Auth backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by the record store or blob store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid blob path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Injected failure: {0}")]
    Injected(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Network(e.to_string())
    }
}

/// Submitting a new entry failed at the record insert step
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Failed to save entry: {0}")]
    Insert(#[source] StoreError),
}

#[derive(Debug, Error)]
pub enum EditError {
    #[error("No entry is being edited")]
    NotEditing,

    #[error("Not signed in")]
    SignedOut,

    #[error("Entry not loaded: {0}")]
    UnknownEntry(String),

    #[error("Failed to update entry: {0}")]
    Update(#[source] StoreError),
}

#[derive(Debug, Error)]
pub enum DeleteError {
    #[error("Failed to delete entry: {0}")]
    Record(#[source] StoreError),
}

/// Failures while encoding an export file
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("XLSX error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing configuration value: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}
