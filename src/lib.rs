/*!
# Medicine Log

A small data-entry application for recording medicines: each entry is a
medicine name plus one or more photos, owned by the signed-in user.

## Overview

Users sign up and sign in with email and password. While signed in they can
add entries (a label and a batch of images), browse and search their entries
newest first, edit the label or the image set, delete one entry or all of them,
and download everything as CSV, XLSX or a ZIP archive with the images grouped
per medicine.

## Architecture

### Collaborators
Three traits describe the outside world the application runs against:

- **AuthProvider** - Sign up, sign in, sign out and session change events
- **RecordStore** - Rows of `{id, user_id, medicine_name, images, created_at}`
- **BlobStore** - Image objects addressed by `{user_id}/{key}.{ext}` paths

Each has a local implementation (users file with argon2 hashes, gzip + bincode
table, files on disk), a remote implementation speaking a hosted REST API, and
an in-memory implementation that records calls and injects failures for tests.

### Application Layer
- **AppContext** - Owns the session mirror and all UI-local state
- **EntryForm / EntryList / EditState** - Form, list and edit-draft state
- **Notifier** - A single transient success or failure message

### Web Layer (feature `web`)
- axum router with a cookie-gated JSON API and static file serving

## Modules

- **entry**: Entry types and ordering
- **error**: Error enums for every operation
- **config**: Environment driven configuration
- **batch**: Best-effort per-item results
- **keys**: Unique object keys and blob paths
- **backend**: Collaborator traits and their implementations
- **session**: Session manager fed by auth events
- **notify**: Transient notifications
- **transfer**: Concurrent image uploads
- **form**: New entry form and submission
- **list**: Entry list, search and expansion
- **edit**: Editing an existing entry
- **delete**: Single and bulk deletion behind a confirmation
- **downloader**: CSV, XLSX and ZIP exports
- **context**: Application context wiring it all together
- **app**: Routing and middleware

## REST API Endpoints

- `/api/signup`, `/api/login`, `/api/logout`, `/api/session` - Authentication
- `/api/entries` - List (`?q=` search), create, clear all
- `/api/entries/{id}` - Save edit, delete
- `/api/entries/{id}/expand`, `/api/entries/{id}/edit` - Row state
- `/api/export/{csv|xlsx|zip}` - Downloads
- `/api/notice` - Current notification
*/

pub mod backend;
pub mod batch;
pub mod config;
pub mod context;
pub mod delete;
pub mod downloader;
pub mod edit;
pub mod entry;
pub mod error;
pub mod form;
pub mod keys;
pub mod list;
pub mod notify;
pub mod session;
pub mod transfer;

#[cfg(feature = "web")]
pub mod app;

/// Re-export the types most callers need
pub use backend::{AuthProvider, BlobStore, Credentials, Identity, RecordStore, SessionEvent};
pub use batch::{BatchResult, ItemFailure};
pub use config::Config;
pub use context::{AppContext, Backend};
pub use entry::{Entry, EntryPatch, NewEntry, PendingFile};
pub use error::*;
