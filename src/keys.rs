use rand::{Rng, SeedableRng, rngs::StdRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const SUFFIX_LEN: usize = 9;

static FALLBACK_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a globally unique storage key
///
/// Uses a random (v4) UUID drawn from the operating system's RNG. When the
/// OS RNG is unavailable the key falls back to `{millis}-{suffix}` where the
/// suffix is nine base-36 characters.
///
/// # Returns
/// * `String` - A key suitable for use as a blob file stem
pub fn generate_key() -> String {
    let mut bytes = [0u8; 16];
    match getrandom::getrandom(&mut bytes) {
        Ok(()) => uuid::Builder::from_random_bytes(bytes)
            .into_uuid()
            .to_string(),
        Err(e) => {
            log::warn!("OS randomness unavailable ({}), using timestamp key", e);
            fallback_key()
        }
    }
}

/// Timestamp plus pseudo-random suffix
pub fn fallback_key() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let counter = FALLBACK_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut rng = StdRng::seed_from_u64(now.as_nanos() as u64 ^ counter.rotate_left(32));

    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())] as char)
        .collect();

    format!("{}-{}", now.as_millis(), suffix)
}

/// Extension of an uploaded file name, without the dot
pub fn file_extension(file_name: &str) -> Option<&str> {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

/// Blob path for a new upload: `{user_id}/{key}.{extension}`
///
/// # Arguments
/// * `user_id` - Owner identity; forms the blob namespace
/// * `key` - Unique storage key from [`generate_key`]
/// * `file_name` - Original file name; only its extension is kept
///
/// # Examples
/// ```
/// use medlog::keys::object_path;
///
/// assert_eq!(object_path("u1", "abc", "photo.PNG"), "u1/abc.PNG");
/// assert_eq!(object_path("u1", "abc", "README"), "u1/abc");
/// ```
pub fn object_path(user_id: &str, key: &str, file_name: &str) -> String {
    match file_extension(file_name) {
        Some(ext) => format!("{}/{}.{}", user_id, key, ext),
        None => format!("{}/{}", user_id, key),
    }
}

/// Whether a blob path sits inside the given identity's namespace
pub fn in_namespace(user_id: &str, path: &str) -> bool {
    path.split_once('/')
        .map(|(owner, rest)| owner == user_id && !rest.is_empty())
        .unwrap_or(false)
}

pub fn is_uuid(key: &str) -> bool {
    Uuid::parse_str(key).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keys_are_uuids_and_distinct() {
        let keys: HashSet<String> = (0..64).map(|_| generate_key()).collect();
        assert_eq!(keys.len(), 64);
        assert!(keys.iter().all(|k| is_uuid(k)));
    }

    #[test]
    fn fallback_key_shape() {
        let key = fallback_key();
        let (millis, suffix) = key.split_once('-').unwrap();
        assert!(millis.parse::<u128>().is_ok());
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(suffix.bytes().all(|b| SUFFIX_CHARSET.contains(&b)));
        assert_ne!(fallback_key(), fallback_key());
    }

    #[test]
    fn object_path_keeps_last_extension() {
        assert_eq!(object_path("u1", "k", "scan.final.jpeg"), "u1/k.jpeg");
        assert_eq!(object_path("u1", "k", "trailing."), "u1/k");
        assert_eq!(object_path("u1", "k", "noext"), "u1/k");
    }

    #[test]
    fn namespace_check() {
        assert!(in_namespace("u1", "u1/a.png"));
        assert!(!in_namespace("u1", "u2/a.png"));
        assert!(!in_namespace("u1", "u1/"));
        assert!(!in_namespace("u1", "a.png"));
    }
}
