//! Credential-derived pseudo-identity.
//!
//! The remote store has no accounts: every device holding the same API
//! credential derives the same identity hash and uses it to recognize
//! "its" document among whatever else the credential can see. That is the
//! whole pairing mechanism — no second factor, uniqueness is only as good
//! as the 64 bits of digest kept here.

use anyhow::Result;
use tracing::info;

use crate::store::PlannerStore;

const IDENTITY_PREFIX: &str = "u-";
const IDENTITY_HEX_CHARS: usize = 16;

/// One-way, deterministic identity for a credential: a fixed prefix plus
/// the first 16 hex chars of the credential's blake3 digest.
pub fn derive_identity(credential: &str) -> String {
    let digest = blake3::hash(credential.as_bytes());
    let hex = digest.to_hex();
    format!("{IDENTITY_PREFIX}{}", &hex.as_str()[..IDENTITY_HEX_CHARS])
}

/// Derive the identity for `credential` and reconcile it with what the
/// store last saw. A changed credential invalidates the cached remote
/// pointer and the last-seen timestamp: the next sync rediscovers the
/// document belonging to the new identity instead of writing over the old
/// one.
pub fn ensure_identity(store: &PlannerStore, credential: &str) -> Result<String> {
    let identity = derive_identity(credential);
    match store.identity()? {
        Some(existing) if existing == identity => {}
        Some(existing) => {
            info!("credential changed ({existing} -> {identity}), clearing cached remote pointer");
            store.set_remote_document_id(None)?;
            store.set_last_seen_updated(None)?;
            store.set_identity(&identity)?;
        }
        None => store.set_identity(&identity)?,
    }
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_identity_is_deterministic() {
        let a = derive_identity("my-api-key");
        let b = derive_identity("my-api-key");
        assert_eq!(a, b);
    }

    #[test]
    fn test_identity_shape() {
        let identity = derive_identity("my-api-key");
        assert!(identity.starts_with("u-"));
        assert_eq!(identity.len(), 2 + IDENTITY_HEX_CHARS);
        assert!(identity[2..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_different_credentials_differ() {
        assert_ne!(derive_identity("key-one"), derive_identity("key-two"));
        // Credentials are hashed as-is, whitespace included.
        assert_ne!(derive_identity("key"), derive_identity("key "));
    }

    #[test]
    fn test_ensure_identity_first_run_stores_hash() {
        let store = PlannerStore::open_temp().unwrap();
        let identity = ensure_identity(&store, "my-api-key").unwrap();
        assert_eq!(store.identity().unwrap(), Some(identity));
    }

    #[test]
    fn test_ensure_identity_same_credential_keeps_pointer() {
        let store = PlannerStore::open_temp().unwrap();
        ensure_identity(&store, "my-api-key").unwrap();
        store.set_remote_document_id(Some("bin-1")).unwrap();
        store.set_last_seen_updated(Some(Utc::now())).unwrap();

        ensure_identity(&store, "my-api-key").unwrap();

        assert_eq!(store.remote_document_id().unwrap().as_deref(), Some("bin-1"));
        assert!(store.last_seen_updated().unwrap().is_some());
    }

    #[test]
    fn test_ensure_identity_changed_credential_clears_pointer() {
        let store = PlannerStore::open_temp().unwrap();
        ensure_identity(&store, "old-key").unwrap();
        store.set_remote_document_id(Some("bin-1")).unwrap();
        store.set_last_seen_updated(Some(Utc::now())).unwrap();

        let identity = ensure_identity(&store, "new-key").unwrap();

        assert!(store.remote_document_id().unwrap().is_none());
        assert!(store.last_seen_updated().unwrap().is_none());
        assert_eq!(store.identity().unwrap(), Some(identity));
    }
}
