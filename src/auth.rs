//! API key validation for the ingestion endpoint (spec §3, §4.1).
//!
//! Keys are kept in a JSON file (`API_KEY_FILE`): an array of
//! `{key: bcrypt-hash, disabled}`. The store is read-only after startup
//! except for an explicit reload, matching the "API-key set: read-only
//! after startup; atomic reload permitted" rule in §5.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredKey {
    pub key: String,
    #[serde(default)]
    pub disabled: bool,
}

pub struct ApiKeyStore {
    path: PathBuf,
    keys: RwLock<Vec<StoredKey>>,
}

impl ApiKeyStore {
    /// Load the key file, creating it empty if it doesn't exist yet (first
    /// boot writes an empty array once, per spec §3 ApiKey lifecycle).
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tokio::fs::write(&path, b"[]").await?;
        }

        let store = Self {
            path,
            keys: RwLock::new(Vec::new()),
        };
        store.reload().await?;
        Ok(store)
    }

    pub async fn reload(&self) -> Result<()> {
        let bytes = tokio::fs::read(&self.path).await?;
        let keys: Vec<StoredKey> = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Configuration(format!("invalid API_KEY_FILE: {e}")))?;
        *self.keys.write().unwrap() = keys;
        Ok(())
    }

    /// Validate a presented key against every non-disabled stored hash.
    ///
    /// Deliberately does not short-circuit on the first match: every
    /// candidate is checked so the total time taken does not leak which
    /// position (if any) matched, per the spec's "constant-time" validation
    /// requirement.
    pub fn validate(&self, presented: &str) -> bool {
        let keys = self.keys.read().unwrap();
        let mut any_match = false;
        for stored in keys.iter() {
            let matches = bcrypt::verify(presented, &stored.key).unwrap_or(false);
            if matches && !stored.disabled {
                any_match = true;
            }
        }
        any_match
    }

    pub fn is_empty(&self) -> bool {
        self.keys.read().unwrap().is_empty()
    }
}

/// Hash a plaintext key for storage. Used by setup tooling, not the hot path.
pub fn hash_key(plaintext: &str) -> Result<String> {
    bcrypt::hash(plaintext, bcrypt::DEFAULT_COST)
        .map_err(|e| Error::Other(format!("failed to hash key: {e}")))
}
