use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use super::{KeyMetadata, KeyStore};
use crate::error::{Error, Result};

/// Type alias for the key storage map
type KeyStorage = Arc<RwLock<HashMap<String, (KeyMetadata, Vec<u8>)>>>;

/// In-memory key store, used by emulated hardware tokens
#[derive(Clone)]
pub struct MemoryKeyStore {
    keys: KeyStorage,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self {
            keys: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStore for MemoryKeyStore {
    fn store_key(&self, metadata: KeyMetadata, pkcs8_der_bytes: Vec<u8>) -> Result<()> {
        let mut keys = self
            .keys
            .write()
            .map_err(|_| Error::lock_error("Failed to acquire write lock"))?;

        if keys.contains_key(&metadata.key_id) {
            return Err(Error::key_exists(&metadata.key_id));
        }

        keys.insert(metadata.key_id.clone(), (metadata, pkcs8_der_bytes));
        Ok(())
    }

    fn get_key(&self, key_id: &str) -> Result<(KeyMetadata, Vec<u8>)> {
        let keys = self
            .keys
            .read()
            .map_err(|_| Error::lock_error("Failed to acquire read lock"))?;

        keys.get(key_id)
            .cloned()
            .ok_or_else(|| Error::key_not_found(key_id))
    }

    fn delete_key(&self, key_id: &str) -> Result<()> {
        let mut keys = self
            .keys
            .write()
            .map_err(|_| Error::lock_error("Failed to acquire write lock"))?;

        keys.remove(key_id)
            .ok_or_else(|| Error::key_not_found(key_id))
            .map(|_| ())
    }

    fn list_keys(&self) -> Result<Vec<String>> {
        let keys = self
            .keys
            .read()
            .map_err(|_| Error::lock_error("Failed to acquire read lock"))?;

        let mut ids: Vec<String> = keys.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn exists(&self, key_id: &str) -> Result<bool> {
        let keys = self
            .keys
            .read()
            .map_err(|_| Error::lock_error("Failed to acquire read lock"))?;

        Ok(keys.contains_key(key_id))
    }

    fn get_metadata(&self, key_id: &str) -> Result<KeyMetadata> {
        let keys = self
            .keys
            .read()
            .map_err(|_| Error::lock_error("Failed to acquire read lock"))?;

        keys.get(key_id)
            .map(|(metadata, _)| metadata.clone())
            .ok_or_else(|| Error::key_not_found(key_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::KeyAlgorithm;

    #[test]
    fn test_memory_store_basic_operations() {
        let store = MemoryKeyStore::new();
        let metadata = KeyMetadata::new("K1", KeyAlgorithm::EcP256, Some("test-key".to_string()));
        let pkcs8_der_bytes = vec![42; 32];

        // Store key
        store
            .store_key(metadata.clone(), pkcs8_der_bytes.clone())
            .unwrap();

        // Check exists
        assert!(store.exists("K1").unwrap());

        // Get key
        let (retrieved_metadata, retrieved_material) = store.get_key("K1").unwrap();
        assert_eq!(retrieved_metadata.key_id, metadata.key_id);
        assert_eq!(retrieved_material, pkcs8_der_bytes);

        // Get metadata only
        let retrieved_metadata = store.get_metadata("K1").unwrap();
        assert_eq!(retrieved_metadata.label.as_deref(), Some("test-key"));

        // List keys
        assert_eq!(store.list_keys().unwrap(), vec!["K1".to_string()]);

        // Delete key
        store.delete_key("K1").unwrap();
        assert!(!store.exists("K1").unwrap());
        assert!(store.delete_key("K1").is_err());
    }

    #[test]
    fn test_memory_store_duplicate_key() {
        let store = MemoryKeyStore::new();
        let metadata = KeyMetadata::new("K1", KeyAlgorithm::Rsa2048, None);

        store.store_key(metadata.clone(), vec![1]).unwrap();
        assert!(store.store_key(metadata, vec![2]).is_err());
    }
}
