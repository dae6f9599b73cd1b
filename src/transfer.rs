use crate::backend::BlobStore;
use crate::batch::{BatchResult, ItemFailure};
use crate::entry::PendingFile;
use crate::keys::{generate_key, object_path};
use futures::FutureExt;
use futures::stream::{self, StreamExt};

/// Upload picked files under the identity's namespace, best-effort
///
/// Each file gets a fresh storage key. A failed upload is logged and recorded
/// in the batch's failure list; it never stops the remaining uploads. At most
/// `concurrency` uploads are in flight and successful paths keep input order.
///
/// # Arguments
/// * `blobs` - Object store to upload into
/// * `user_id` - Owner identity; the blob namespace prefix
/// * `files` - Files in the order the user picked them
/// * `concurrency` - Maximum simultaneous uploads (1 = one at a time)
///
/// # Returns
/// * `BatchResult<String>` - Stored blob paths plus per-file failures
pub async fn upload_files(
    blobs: &dyn BlobStore,
    user_id: &str,
    files: &[PendingFile],
    concurrency: usize,
) -> BatchResult<String> {
    let uploads: Vec<_> = files
        .iter()
        .map(|file| upload_one(blobs, user_id, file).boxed())
        .collect();
    stream::iter(uploads)
        .buffered(concurrency.max(1))
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect()
}

async fn upload_one(
    blobs: &dyn BlobStore,
    user_id: &str,
    file: &PendingFile,
) -> Result<String, ItemFailure> {
    let path = object_path(user_id, &generate_key(), &file.name);

    match blobs
        .upload(&path, file.bytes.clone(), file.content_type.as_deref())
        .await
    {
        Ok(()) => {
            log::debug!("Uploaded {} as {}", file.name, path);
            Ok(path)
        }
        Err(e) => {
            log::warn!("Upload failed for {}: {}", file.name, e);
            Err(ItemFailure {
                item: file.name.clone(),
                reason: e.to_string(),
            })
        }
    }
}
