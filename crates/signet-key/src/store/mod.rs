mod file;
mod memory;
mod pin;

use std::collections::HashMap;

pub use file::FileKeyStore;
pub use memory::MemoryKeyStore;
pub use pin::{derive_store_key, PinRecord, DEFAULT_PIN_ITERATIONS};
use serde::{Deserialize, Serialize};

use crate::{algorithm::KeyAlgorithm, error::Result};

/// Attribute holding the base64 SubjectPublicKeyInfo of a stored key
pub const ATTR_PUBLIC_KEY: &str = "public_key";

/// Key metadata stored alongside the key material
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyMetadata {
    pub key_id: String,
    pub algorithm: KeyAlgorithm,
    pub created_at: std::time::SystemTime,
    pub label: Option<String>,
    pub attributes: HashMap<String, String>,
}

impl KeyMetadata {
    pub fn new(key_id: impl Into<String>, algorithm: KeyAlgorithm, label: Option<String>) -> Self {
        Self {
            key_id: key_id.into(),
            algorithm,
            created_at: std::time::SystemTime::now(),
            label,
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    pub fn public_key(&self) -> Option<&str> {
        self.attributes.get(ATTR_PUBLIC_KEY).map(String::as_str)
    }
}

/// Trait for key storage backends (synchronous)
pub trait KeyStore: Send + Sync {
    /// Store a key with its metadata
    fn store_key(&self, metadata: KeyMetadata, key_material: Vec<u8>) -> Result<()>;

    /// Retrieve a key by its id
    fn get_key(&self, key_id: &str) -> Result<(KeyMetadata, Vec<u8>)>;

    /// Delete a key by its id
    fn delete_key(&self, key_id: &str) -> Result<()>;

    /// List all key ids, sorted
    fn list_keys(&self) -> Result<Vec<String>>;

    /// Check if a key exists
    fn exists(&self, key_id: &str) -> Result<bool>;

    /// Get metadata without the key material (for listing purposes)
    fn get_metadata(&self, key_id: &str) -> Result<KeyMetadata>;
}
