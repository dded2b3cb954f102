use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};

/// Derives `chat_id_hash`/`source_user_hash` as
/// `hex(sha256(salt || ":" || id))`. The salt is a process-wide secret and
/// is never itself logged or returned.
pub fn hash_identifier(salt: &str, id: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(id.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

pub fn chat_id_hash(salt: &str, chat_id: i64) -> String {
    hash_identifier(salt, chat_id)
}

pub fn source_user_hash(salt: &str, user_id: i64) -> String {
    hash_identifier(salt, user_id)
}

/// Guards the permission-notice store's invariant: both
/// identifiers are required, non-empty strings. Callers MUST check this
/// before touching the backing store.
pub fn require_non_empty_hash(label: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CoreError::InvalidArgument(format!(
            "{label} must not be empty"
        )));
    }
    Ok(())
}
