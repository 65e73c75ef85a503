use sha2::{Digest, Sha256};

use crate::error::{PlaygraphError, Result};
use crate::model::EntityKind;

// ASCII unit separator; never appears in normalized names
const SEPARATOR: &[u8] = b"\x1f";
const FALLBACK_KEY_LEN: usize = 32;

/// Keys derived from one raw record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityKey {
    pub natural_key: String,
    /// Name-derived key, computed even when the external id wins
    pub fallback_key: String,
    /// Trimmed external id, if the record carries one
    pub external_id: Option<String>,
}

/// Lowercase and collapse internal whitespace
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Derive the deduplication key for a raw record.
///
/// The external id is used verbatim when present; otherwise a hash of the
/// kind, normalized name and normalized context.
pub fn natural_key(
    kind: EntityKind,
    external_id: Option<&str>,
    name: &str,
    context: Option<&str>,
) -> Result<IdentityKey> {
    let normalized = normalize_name(name);
    if normalized.is_empty() {
        return Err(PlaygraphError::InvalidIdentity(format!(
            "{} record has a blank name",
            kind
        )));
    }

    let context = context.map(normalize_name).unwrap_or_default();
    let fallback_key = fallback_hash(kind, &normalized, &context);
    let external_id = external_id
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string);

    let natural_key = match &external_id {
        Some(ext) => ext.clone(),
        None => fallback_key.clone(),
    };

    Ok(IdentityKey {
        natural_key,
        fallback_key,
        external_id,
    })
}

fn fallback_hash(kind: EntityKind, name: &str, context: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(SEPARATOR);
    hasher.update(name.as_bytes());
    hasher.update(SEPARATOR);
    hasher.update(context.as_bytes());
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(FALLBACK_KEY_LEN);
    hex
}
