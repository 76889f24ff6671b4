//! Request duplicate detection.
//!
//! Each request id is bound to the SHA-256 of its canonical payload the first
//! time it is seen. A later request with the same id either replays the same
//! payload (same hash) or is a modified request (different hash).

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Which kind of request a stored hash belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DuplicateNamespace {
    TransferPrepare,
    TransferFulfil,
    TransferError,
    FxTransferPrepare,
    FxTransferFulfil,
    FxTransferError,
}

impl DuplicateNamespace {
    pub fn table(&self) -> &'static str {
        match self {
            DuplicateNamespace::TransferPrepare => "transfer_duplicate_check",
            DuplicateNamespace::TransferFulfil => "transfer_fulfilment_duplicate_check",
            DuplicateNamespace::TransferError => "transfer_error_duplicate_check",
            DuplicateNamespace::FxTransferPrepare => "fx_transfer_duplicate_check",
            DuplicateNamespace::FxTransferFulfil => "fx_transfer_fulfilment_duplicate_check",
            DuplicateNamespace::FxTransferError => "fx_transfer_error_duplicate_check",
        }
    }
}

/// Outcome of a duplicate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateCheck {
    pub has_duplicate_id: bool,
    pub has_duplicate_hash: bool,
}

impl DuplicateCheck {
    pub fn is_new(&self) -> bool {
        !self.has_duplicate_id
    }

    /// Same id, same payload.
    pub fn is_replay(&self) -> bool {
        self.has_duplicate_id && self.has_duplicate_hash
    }

    /// Same id, different payload.
    pub fn is_modified(&self) -> bool {
        self.has_duplicate_id && !self.has_duplicate_hash
    }
}

/// Storage for request hashes within one namespace.
#[async_trait]
pub trait DuplicateStore: Send + Sync {
    async fn get_duplicate(&self, id: &str) -> Result<Option<String>, sqlx::Error>;

    /// Insert the hash unless the id is already present. Returns whether a row was written.
    async fn save_duplicate_hash(&self, id: &str, hash: &str) -> Result<bool, sqlx::Error>;
}

/// Canonical SHA-256 hex digest of a payload.
///
/// Object keys are sorted at every level before hashing, so key order on the
/// wire does not change the result.
pub fn payload_hash<T: Serialize + ?Sized>(payload: &T) -> Result<String, serde_json::Error> {
    // serde_json's default map is a BTreeMap, which serializes keys in order
    let canonical = serde_json::to_value(payload)?;
    let bytes = serde_json::to_vec(&canonical)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Look up `id`, and record `hash` for it when it is new.
///
/// # Errors
/// Returns an error if the store fails.
pub async fn check_duplicate(
    store: &dyn DuplicateStore,
    id: &str,
    hash: &str,
) -> Result<DuplicateCheck, sqlx::Error> {
    if let Some(existing) = store.get_duplicate(id).await? {
        let check = DuplicateCheck {
            has_duplicate_id: true,
            has_duplicate_hash: existing == hash,
        };
        debug!(id, ?check, "duplicate id seen");
        return Ok(check);
    }

    if store.save_duplicate_hash(id, hash).await? {
        return Ok(DuplicateCheck {
            has_duplicate_id: false,
            has_duplicate_hash: false,
        });
    }

    // lost an insert race: the winner's hash decides
    let existing = store.get_duplicate(id).await?;
    Ok(DuplicateCheck {
        has_duplicate_id: true,
        has_duplicate_hash: existing.as_deref() == Some(hash),
    })
}
