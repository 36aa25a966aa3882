use std::{
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    ChaCha20Poly1305, Nonce,
};

use super::{KeyMetadata, KeyStore};
use crate::error::{Error, Result};

const KEY_SUFFIX: &str = ".key";
const STAGED_SUFFIX: &str = ".key.staged";

/// File-based key store with optional encryption.
///
/// Every key is kept as `<id>.key` (nonce-prefixed ciphertext) next to a
/// plain `<id>.json` metadata file.
pub struct FileKeyStore {
    path: PathBuf,
    cipher: Option<ChaCha20Poly1305>,
    lock: Arc<RwLock<()>>,
}

impl FileKeyStore {
    pub fn new(path: PathBuf, encryption_key: Option<Vec<u8>>) -> Result<Self> {
        let cipher = if let Some(key) = encryption_key {
            if key.len() != 32 {
                return Err(Error::invalid_configuration(
                    "Encryption key must be 32 bytes for ChaCha20Poly1305",
                ));
            }
            let cipher =
                ChaCha20Poly1305::new_from_slice(&key).map_err(Error::invalid_configuration)?;
            Some(cipher)
        } else {
            None
        };

        Ok(Self {
            path,
            cipher,
            lock: Arc::new(RwLock::new(())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the key material file for `key_id`
    pub fn key_file(&self, key_id: &str) -> PathBuf {
        self.path.join(Self::key_filename(key_id))
    }

    /// Write replacement material for an existing key.
    ///
    /// The staged copy sits next to the current file until [`commit_staged`]
    /// renames it into place, so the current material stays readable until then.
    ///
    /// [`commit_staged`]: FileKeyStore::commit_staged
    pub fn stage_key(&self, key_id: &str, key_material: &[u8]) -> Result<()> {
        Self::validate_key_id(key_id)?;
        let _guard = self
            .lock
            .write()
            .map_err(|_| Error::lock_error("Failed to acquire write lock"))?;

        if !self.path.join(Self::key_filename(key_id)).exists() {
            return Err(Error::key_not_found(key_id));
        }
        let encrypted = self.encrypt(key_material)?;
        std::fs::write(self.path.join(Self::staged_filename(key_id)), encrypted)?;
        Ok(())
    }

    /// Ids of keys with staged material, sorted
    pub fn staged_keys(&self) -> Result<Vec<String>> {
        let _guard = self
            .lock
            .read()
            .map_err(|_| Error::lock_error("Failed to acquire read lock"))?;
        self.ids_with_suffix(STAGED_SUFFIX)
    }

    pub fn get_staged(&self, key_id: &str) -> Result<Vec<u8>> {
        Self::validate_key_id(key_id)?;
        let _guard = self
            .lock
            .read()
            .map_err(|_| Error::lock_error("Failed to acquire read lock"))?;
        let staged = std::fs::read(self.path.join(Self::staged_filename(key_id)))
            .map_err(|_| Error::key_not_found(key_id))?;
        self.decrypt(&staged)
    }

    /// Replace the key material of `key_id` with its staged copy
    pub fn commit_staged(&self, key_id: &str) -> Result<()> {
        Self::validate_key_id(key_id)?;
        let _guard = self
            .lock
            .write()
            .map_err(|_| Error::lock_error("Failed to acquire write lock"))?;
        std::fs::rename(
            self.path.join(Self::staged_filename(key_id)),
            self.path.join(Self::key_filename(key_id)),
        )?;
        Ok(())
    }

    pub fn discard_staged(&self, key_id: &str) -> Result<()> {
        Self::validate_key_id(key_id)?;
        let _guard = self
            .lock
            .write()
            .map_err(|_| Error::lock_error("Failed to acquire write lock"))?;
        let staged = self.path.join(Self::staged_filename(key_id));
        if staged.exists() {
            std::fs::remove_file(staged)?;
        }
        Ok(())
    }

    fn key_filename(key_id: &str) -> String {
        format!("{}{}", key_id, KEY_SUFFIX)
    }

    fn staged_filename(key_id: &str) -> String {
        format!("{}{}", key_id, STAGED_SUFFIX)
    }

    fn metadata_filename(key_id: &str) -> String {
        format!("{}.json", key_id)
    }

    /// Key ids become file names, so only a conservative alphabet is accepted
    fn validate_key_id(key_id: &str) -> Result<()> {
        let valid = !key_id.is_empty()
            && key_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(())
        } else {
            Err(Error::invalid_configuration(format!(
                "Key id '{}' is not usable as a file name",
                key_id
            )))
        }
    }

    /// Caller holds the lock
    fn ids_with_suffix(&self, suffix: &str) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            if let Some(filename) = entry.file_name().to_str() {
                if let Some(key_id) = filename.strip_suffix(suffix) {
                    ids.push(key_id.to_string());
                }
            }
        }

        ids.sort();
        Ok(ids)
    }

    /// Encrypt data using ChaCha20Poly1305
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if let Some(cipher) = &self.cipher {
            let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);

            let ciphertext = cipher
                .encrypt(&nonce, plaintext)
                .map_err(Error::encryption)?;

            // Prepend nonce to ciphertext
            let mut result = nonce.to_vec();
            result.extend_from_slice(&ciphertext);

            Ok(result)
        } else {
            Ok(plaintext.to_vec())
        }
    }

    /// Decrypt data using ChaCha20Poly1305
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if let Some(cipher) = &self.cipher {
            if ciphertext.len() < 12 {
                return Err(Error::decryption("Invalid ciphertext length"));
            }

            let (nonce_bytes, encrypted) = ciphertext.split_at(12);
            let nonce = Nonce::from_slice(nonce_bytes);

            cipher.decrypt(nonce, encrypted).map_err(Error::decryption)
        } else {
            Ok(ciphertext.to_vec())
        }
    }
}

impl KeyStore for FileKeyStore {
    fn store_key(&self, metadata: KeyMetadata, key_material: Vec<u8>) -> Result<()> {
        Self::validate_key_id(&metadata.key_id)?;

        if !self.path.exists() {
            std::fs::create_dir_all(&self.path)?;
        }

        let _guard = self
            .lock
            .write()
            .map_err(|_| Error::lock_error("Failed to acquire write lock"))?;

        let key_path = self.path.join(Self::key_filename(&metadata.key_id));
        if key_path.exists() {
            return Err(Error::key_exists(&metadata.key_id));
        }

        let encrypted_material = self.encrypt(&key_material)?;
        std::fs::write(&key_path, &encrypted_material)?;

        let metadata_path = self.path.join(Self::metadata_filename(&metadata.key_id));
        let metadata_json = serde_json::to_string_pretty(&metadata)?;
        std::fs::write(&metadata_path, metadata_json)?;

        Ok(())
    }

    fn get_key(&self, key_id: &str) -> Result<(KeyMetadata, Vec<u8>)> {
        Self::validate_key_id(key_id)?;
        let _guard = self
            .lock
            .read()
            .map_err(|_| Error::lock_error("Failed to acquire read lock"))?;

        let metadata_path = self.path.join(Self::metadata_filename(key_id));
        let metadata_json =
            std::fs::read_to_string(&metadata_path).map_err(|_| Error::key_not_found(key_id))?;
        let metadata: KeyMetadata = serde_json::from_str(&metadata_json)?;

        let key_path = self.path.join(Self::key_filename(key_id));
        let encrypted_material =
            std::fs::read(&key_path).map_err(|_| Error::key_not_found(key_id))?;
        let key_material = self.decrypt(&encrypted_material)?;

        Ok((metadata, key_material))
    }

    fn delete_key(&self, key_id: &str) -> Result<()> {
        Self::validate_key_id(key_id)?;
        let _guard = self
            .lock
            .write()
            .map_err(|_| Error::lock_error("Failed to acquire write lock"))?;

        let key_path = self.path.join(Self::key_filename(key_id));
        let metadata_path = self.path.join(Self::metadata_filename(key_id));

        if !key_path.exists() {
            return Err(Error::key_not_found(key_id));
        }

        std::fs::remove_file(&key_path)?;
        if metadata_path.exists() {
            std::fs::remove_file(&metadata_path)?;
        }

        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<String>> {
        let _guard = self
            .lock
            .read()
            .map_err(|_| Error::lock_error("Failed to acquire read lock"))?;

        self.ids_with_suffix(KEY_SUFFIX)
    }

    fn exists(&self, key_id: &str) -> Result<bool> {
        Self::validate_key_id(key_id)?;
        let _guard = self
            .lock
            .read()
            .map_err(|_| Error::lock_error("Failed to acquire read lock"))?;
        Ok(self.path.join(Self::key_filename(key_id)).exists())
    }

    fn get_metadata(&self, key_id: &str) -> Result<KeyMetadata> {
        Self::validate_key_id(key_id)?;
        let _guard = self
            .lock
            .read()
            .map_err(|_| Error::lock_error("Failed to acquire read lock"))?;

        let metadata_path = self.path.join(Self::metadata_filename(key_id));
        let metadata_json =
            std::fs::read_to_string(&metadata_path).map_err(|_| Error::key_not_found(key_id))?;

        Ok(serde_json::from_str(&metadata_json)?)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::algorithm::KeyAlgorithm;

    #[test]
    fn test_file_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileKeyStore::new(temp_dir.path().to_path_buf(), None).unwrap();

        let metadata = KeyMetadata::new("A1", KeyAlgorithm::EcP256, Some("test-key".to_string()));
        let key_material = vec![1, 2, 3, 4, 5];

        store.store_key(metadata.clone(), key_material.clone()).unwrap();

        // Check files were created
        assert!(temp_dir.path().join("A1.key").exists());
        assert!(temp_dir.path().join("A1.json").exists());

        let (retrieved_metadata, retrieved_material) = store.get_key("A1").unwrap();
        assert_eq!(retrieved_metadata.key_id, metadata.key_id);
        assert_eq!(retrieved_material, key_material);

        assert_eq!(store.list_keys().unwrap(), vec!["A1".to_string()]);

        store.delete_key("A1").unwrap();
        assert!(!temp_dir.path().join("A1.key").exists());
        assert!(!temp_dir.path().join("A1.json").exists());
    }

    #[test]
    fn test_file_store_with_encryption() {
        let temp_dir = TempDir::new().unwrap();
        let store =
            FileKeyStore::new(temp_dir.path().to_path_buf(), Some(vec![0u8; 32])).unwrap();

        let metadata = KeyMetadata::new("A1", KeyAlgorithm::EcP256, None);
        let key_material = vec![42; 32];

        store.store_key(metadata, key_material.clone()).unwrap();

        // Raw file is ciphertext
        let raw_key = std::fs::read(temp_dir.path().join("A1.key")).unwrap();
        assert_ne!(raw_key, key_material);

        let (_, retrieved_material) = store.get_key("A1").unwrap();
        assert_eq!(retrieved_material, key_material);
    }

    #[test]
    fn test_staged_key_replaces_on_commit() {
        let temp_dir = TempDir::new().unwrap();
        let store =
            FileKeyStore::new(temp_dir.path().to_path_buf(), Some(vec![1u8; 32])).unwrap();
        store
            .store_key(KeyMetadata::new("A1", KeyAlgorithm::EcP256, None), vec![7; 16])
            .unwrap();
        assert!(store.stage_key("B2", &[1]).is_err());

        store.stage_key("A1", &[8; 16]).unwrap();
        assert_eq!(store.staged_keys().unwrap(), vec!["A1".to_string()]);
        assert_eq!(store.list_keys().unwrap(), vec!["A1".to_string()]);
        assert_eq!(store.get_key("A1").unwrap().1, vec![7; 16]);
        assert_eq!(store.get_staged("A1").unwrap(), vec![8; 16]);

        store.commit_staged("A1").unwrap();
        assert_eq!(store.get_key("A1").unwrap().1, vec![8; 16]);
        assert!(store.staged_keys().unwrap().is_empty());
    }

    #[test]
    fn test_discard_staged_keeps_current() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileKeyStore::new(temp_dir.path().to_path_buf(), None).unwrap();
        store
            .store_key(KeyMetadata::new("A1", KeyAlgorithm::EcP256, None), vec![7; 16])
            .unwrap();
        store.stage_key("A1", &[8; 16]).unwrap();

        store.discard_staged("A1").unwrap();
        store.discard_staged("A1").unwrap();
        assert!(store.staged_keys().unwrap().is_empty());
        assert_eq!(store.get_key("A1").unwrap().1, vec![7; 16]);
    }

    #[test]
    fn test_rejects_path_like_key_ids() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileKeyStore::new(temp_dir.path().to_path_buf(), None).unwrap();
        let metadata = KeyMetadata::new("../escape", KeyAlgorithm::EcP256, None);
        assert!(store.store_key(metadata, vec![1]).is_err());
    }

    #[test]
    fn test_missing_directory_lists_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileKeyStore::new(temp_dir.path().join("absent"), None).unwrap();
        assert!(store.list_keys().unwrap().is_empty());
    }
}
