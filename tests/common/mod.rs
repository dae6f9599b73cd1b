#![allow(dead_code)]

use medlog::backend::memory::MemoryBackend;
use medlog::config::Config;
use medlog::context::{AppContext, Backend};
use medlog::entry::PendingFile;
use medlog::notify::NoticeKind;
use std::sync::Arc;

pub const USER: &str = "u1";

/// A memory backend with `USER` already signed in
pub fn signed_in_backend() -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed_session(USER);
    backend
}

pub async fn context_for(backend: &Arc<MemoryBackend>) -> AppContext {
    AppContext::new(Backend::shared(backend.clone()), &Config::default()).await
}

pub fn file(name: &str, bytes: &[u8]) -> PendingFile {
    PendingFile::new(name, bytes.to_vec())
}

/// Last notice raised by the context, ignoring expiry
pub fn last_notice(context: &AppContext) -> Option<(NoticeKind, String)> {
    context
        .notifier()
        .last()
        .map(|notice| (notice.kind, notice.message.clone()))
}
