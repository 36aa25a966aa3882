use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use signet_key::{
    decrypt_pkcs8, decrypt_private_key, encrypt_private_key,
    store::{ATTR_PUBLIC_KEY, DEFAULT_PIN_ITERATIONS},
    FileKeyStore, KeyAlgorithm, KeyMetadata, KeyPair, KeySign, KeyStore, PinRecord,
    SignAlgorithm,
};
use tracing::{debug, info, warn};

use super::{BackendKey, TokenBackend, TokenDescriptor, SOFTWARE_TOKEN_ID};
use crate::{
    error::{codes, Result, SignerError},
    registry::random_id,
};

const PIN_FILE: &str = "token.json";
const KEYS_DIR: &str = "keys";

/// 软件令牌
///
/// Every key is a PIN-protected PKCS#8 file `<dir>/keys/<id>.key` with a
/// plain metadata file beside it. The PIN record in `<dir>/token.json` only
/// verifies the PIN; each key file carries its own salt.
pub struct SoftwareToken {
    descriptor: TokenDescriptor,
    dir: PathBuf,
    key_algorithm: KeyAlgorithm,
    pin_iterations: u32,
    session: Option<Session>,
    loaded: HashMap<String, KeyPair>,
}

struct Session {
    store: FileKeyStore,
    pin: String,
}

impl SoftwareToken {
    pub fn new(dir: impl Into<PathBuf>, key_algorithm: KeyAlgorithm) -> Self {
        Self {
            descriptor: TokenDescriptor::software(),
            dir: dir.into(),
            key_algorithm,
            pin_iterations: DEFAULT_PIN_ITERATIONS,
            session: None,
            loaded: HashMap::new(),
        }
    }

    pub fn with_pin_iterations(mut self, iterations: u32) -> Self {
        self.pin_iterations = iterations;
        self
    }

    /// Key file holding `key_id` in a software token rooted at `dir`.
    ///
    /// The file opens with [`signet_key::load_key_file`] and the token PIN.
    pub fn key_store_file(dir: &Path, key_id: &str) -> PathBuf {
        dir.join(KEYS_DIR).join(format!("{}.key", key_id))
    }

    fn pin_file(&self) -> PathBuf {
        self.dir.join(PIN_FILE)
    }

    fn keys_dir(&self) -> PathBuf {
        self.dir.join(KEYS_DIR)
    }

    fn open_store(&self) -> Result<FileKeyStore> {
        Ok(FileKeyStore::new(self.keys_dir(), None)?)
    }

    fn session(&self) -> Result<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| SignerError::token_not_active(SOFTWARE_TOKEN_ID))
    }

    fn pin_record(&self) -> Result<PinRecord> {
        if !self.pin_file().exists() {
            return Err(SignerError::token_not_initialized(SOFTWARE_TOKEN_ID));
        }
        Ok(PinRecord::load(&self.pin_file())?)
    }

    fn key_pair(&mut self, key_id: &str) -> Result<&KeyPair> {
        if !self.loaded.contains_key(key_id) {
            let session = self.session()?;
            if !session.store.exists(key_id)? {
                return Err(SignerError::key_not_found(key_id));
            }
            let (_, encrypted) = session.store.get_key(key_id)?;
            let pair = decrypt_private_key(&encrypted, &session.pin)?;
            self.loaded.insert(key_id.to_string(), pair);
        }
        self.loaded
            .get(key_id)
            .ok_or_else(|| SignerError::key_not_found(key_id))
    }

    /// Write every key re-encrypted under `new_pin` as a staged copy
    fn stage_rekey(&self, store: &FileKeyStore, old_pin: &str, new_pin: &str) -> Result<usize> {
        let key_ids = store.list_keys()?;
        for key_id in &key_ids {
            let (_, encrypted) = store.get_key(key_id)?;
            let pkcs8 = decrypt_pkcs8(&encrypted, old_pin)?;
            store.stage_key(key_id, &encrypt_private_key(&pkcs8, new_pin, self.pin_iterations)?)?;
        }
        Ok(key_ids.len())
    }

    /// Settle staged copies left by a PIN change.
    ///
    /// A copy that opens with the verified `pin` belongs to a PIN change whose
    /// record was saved and replaces the current file. Any other copy belongs
    /// to an aborted change and is dropped.
    fn settle_staged(store: &FileKeyStore, pin: &str) -> Result<()> {
        for key_id in store.staged_keys()? {
            let staged = store.get_staged(&key_id)?;
            if decrypt_pkcs8(&staged, pin).is_ok() {
                store.commit_staged(&key_id)?;
            } else {
                warn!("Dropping staged key file of '{}' from an unfinished PIN change", key_id);
                store.discard_staged(&key_id)?;
            }
        }
        Ok(())
    }

    fn discard_all_staged(store: &FileKeyStore) {
        let staged = match store.staged_keys() {
            Ok(staged) => staged,
            Err(e) => {
                warn!("Could not list staged key files: {}", e);
                return;
            }
        };
        for key_id in staged {
            if let Err(e) = store.discard_staged(&key_id) {
                warn!("Could not remove staged key file of '{}': {}", key_id, e);
            }
        }
    }
}

impl TokenBackend for SoftwareToken {
    fn descriptor(&self) -> &TokenDescriptor {
        &self.descriptor
    }

    fn is_initialized(&self) -> Result<bool> {
        Ok(self.pin_file().exists())
    }

    fn initialize(&mut self, pin: &str) -> Result<()> {
        if self.is_initialized()? {
            return Err(SignerError::conflict(
                codes::TOKEN_ALREADY_INITIALIZED,
                "Software token already initialized",
            ));
        }
        std::fs::create_dir_all(self.keys_dir())?;

        let (record, _) = PinRecord::create(pin, self.pin_iterations)?;
        record.save(&self.pin_file())?;
        info!("Initialized software token in {}", self.dir.display());
        Ok(())
    }

    fn login(&mut self, pin: &str) -> Result<()> {
        self.pin_record()?.unlock(pin)?;
        let store = self.open_store()?;
        Self::settle_staged(&store, pin)?;
        self.session = Some(Session {
            store,
            pin: pin.to_string(),
        });
        Ok(())
    }

    fn logout(&mut self) {
        self.session = None;
        self.loaded.clear();
    }

    fn is_logged_in(&self) -> bool {
        self.session.is_some()
    }

    /// Re-encrypts every key file under the new PIN.
    ///
    /// New files are staged first, then the PIN record is replaced, then the
    /// staged files are renamed into place. A failure before the record is
    /// saved leaves the token on the old PIN; an interruption after it is
    /// finished by the next login.
    fn change_pin(&mut self, old_pin: &str, new_pin: &str) -> Result<()> {
        self.pin_record()?.unlock(old_pin)?;
        let (record, _) = PinRecord::create(new_pin, self.pin_iterations)?;

        let store = self.open_store()?;
        let staged = self.stage_rekey(&store, old_pin, new_pin).and_then(|count| {
            record.save(&self.pin_file())?;
            Ok(count)
        });
        let count = match staged {
            Ok(count) => count,
            Err(e) => {
                Self::discard_all_staged(&store);
                return Err(e);
            }
        };
        Self::settle_staged(&store, new_pin)?;

        if let Some(session) = &mut self.session {
            session.pin = new_pin.to_string();
        }
        info!("Software token PIN changed, {} key files re-encrypted", count);
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<BackendKey>> {
        let store = &self.session()?.store;
        store
            .list_keys()?
            .into_iter()
            .map(|key_id| {
                let metadata = store.get_metadata(&key_id)?;
                Ok(BackendKey {
                    public_key: metadata.public_key().map(str::to_string),
                    id: key_id,
                    label: metadata.label,
                    algorithm: metadata.algorithm,
                    certs: Vec::new(),
                })
            })
            .collect()
    }

    fn generate_key(&mut self, label: Option<&str>) -> Result<BackendKey> {
        let key_id = random_id();
        let pair = KeyPair::generate(self.key_algorithm)?;
        let public_key = STANDARD.encode(pair.public_key_der()?);

        let session = self.session()?;
        let encrypted = encrypt_private_key(&pair.to_pkcs8_der()?, &session.pin, self.pin_iterations)?;
        let metadata = KeyMetadata::new(&key_id, self.key_algorithm, label.map(str::to_string))
            .with_attribute(ATTR_PUBLIC_KEY, public_key.clone());
        session.store.store_key(metadata, encrypted)?;
        self.loaded.insert(key_id.clone(), pair);

        debug!("Generated {} key {} on software token", self.key_algorithm, key_id);
        Ok(BackendKey {
            id: key_id,
            label: label.map(str::to_string),
            algorithm: self.key_algorithm,
            public_key: Some(public_key),
            certs: Vec::new(),
        })
    }

    fn delete_key(&mut self, key_id: &str) -> Result<()> {
        self.session()?.store.delete_key(key_id)?;
        self.loaded.remove(key_id);
        Ok(())
    }

    fn sign_digest(&mut self, key_id: &str, algorithm: SignAlgorithm, digest: &[u8]) -> Result<Vec<u8>> {
        let pair = self.key_pair(key_id)?;
        Ok(pair.sign_digest(algorithm, digest)?)
    }
}

#[cfg(test)]
mod tests {
    use signet_key::{verify_digest, DigestAlgorithm};
    use tempfile::TempDir;

    use super::*;
    use crate::error::ErrorKind;

    fn token(dir: &TempDir) -> SoftwareToken {
        SoftwareToken::new(dir.path(), KeyAlgorithm::EcP256).with_pin_iterations(1_000)
    }

    #[test]
    fn test_uninitialized_token() {
        let dir = TempDir::new().unwrap();
        let mut token = token(&dir);
        assert!(!token.is_initialized().unwrap());
        assert_eq!(token.login("1234").unwrap_err().code, codes::TOKEN_NOT_INITIALIZED);
        assert_eq!(token.list_keys().unwrap_err().code, codes::TOKEN_NOT_ACTIVE);
    }

    #[test]
    fn test_initialize_twice_fails() {
        let dir = TempDir::new().unwrap();
        let mut token = token(&dir);
        token.initialize("1234").unwrap();
        let err = token.initialize("1234").unwrap_err();
        assert_eq!(err.code, codes::TOKEN_ALREADY_INITIALIZED);
    }

    #[test]
    fn test_generate_sign_and_reload() {
        let dir = TempDir::new().unwrap();
        let mut token = token(&dir);
        token.initialize("1234").unwrap();
        assert_eq!(token.login("0000").unwrap_err().code, codes::PIN_INCORRECT);
        token.login("1234").unwrap();

        let key = token.generate_key(Some("sign")).unwrap();
        assert!(key.public_key.is_some());

        let algorithm = SignAlgorithm::Sha256WithEcdsa;
        let digest = DigestAlgorithm::Sha256.digest(b"payload");
        let signature = token.sign_digest(&key.id, algorithm, &digest).unwrap();

        // a fresh instance reads the key back from disk
        let mut reopened = SoftwareToken::new(dir.path(), KeyAlgorithm::EcP256);
        reopened.login("1234").unwrap();
        let listed = reopened.list_keys().unwrap();
        assert_eq!(listed, vec![key.clone()]);

        let spki = STANDARD.decode(key.public_key.unwrap()).unwrap();
        verify_digest(&spki, algorithm, &digest, &signature).unwrap();
        reopened.sign_digest(&key.id, algorithm, &digest).unwrap();
    }

    #[test]
    fn test_change_pin_rekeys_store() {
        let dir = TempDir::new().unwrap();
        let mut token = token(&dir);
        token.initialize("old").unwrap();
        token.login("old").unwrap();
        let key = token.generate_key(None).unwrap();

        assert_eq!(token.change_pin("wrong", "new").unwrap_err().code, codes::PIN_INCORRECT);
        token.change_pin("old", "new").unwrap();
        token.logout();
        assert!(!token.is_logged_in());

        assert_eq!(token.login("old").unwrap_err().kind, ErrorKind::Conflict);
        token.login("new").unwrap();
        let digest = DigestAlgorithm::Sha256.digest(b"x");
        token
            .sign_digest(&key.id, SignAlgorithm::Sha256WithEcdsa, &digest)
            .unwrap();
    }

    #[test]
    fn test_delete_key() {
        let dir = TempDir::new().unwrap();
        let mut token = token(&dir);
        token.initialize("1234").unwrap();
        token.login("1234").unwrap();
        let key = token.generate_key(None).unwrap();

        token.delete_key(&key.id).unwrap();
        assert!(token.list_keys().unwrap().is_empty());
        assert!(token
            .sign_digest(&key.id, SignAlgorithm::Sha256WithEcdsa, &[0; 32])
            .is_err());
    }

    fn staged(dir: &TempDir) -> Vec<String> {
        FileKeyStore::new(dir.path().join(KEYS_DIR), None)
            .unwrap()
            .staged_keys()
            .unwrap()
    }

    #[test]
    fn test_key_file_opens_with_pin() {
        let dir = TempDir::new().unwrap();
        let mut token = token(&dir);
        token.initialize("1234").unwrap();
        token.login("1234").unwrap();
        let key = token.generate_key(None).unwrap();

        let path = SoftwareToken::key_store_file(dir.path(), &key.id);
        let pair = signet_key::load_key_file(&path, "1234").unwrap();
        let spki = STANDARD.decode(key.public_key.unwrap()).unwrap();
        assert_eq!(pair.public_key_der().unwrap(), spki);
        assert!(signet_key::load_key_file(&path, "0000").is_err());
    }

    #[test]
    fn test_failed_pin_change_keeps_old_pin() {
        let dir = TempDir::new().unwrap();
        let mut token = token(&dir);
        token.initialize("old").unwrap();
        token.login("old").unwrap();
        let good = token.generate_key(None).unwrap();
        let broken = token.generate_key(None).unwrap();
        std::fs::write(SoftwareToken::key_store_file(dir.path(), &broken.id), b"garbage").unwrap();

        assert!(token.change_pin("old", "new").is_err());
        assert!(staged(&dir).is_empty());

        let mut reopened = SoftwareToken::new(dir.path(), KeyAlgorithm::EcP256);
        assert_eq!(reopened.login("new").unwrap_err().code, codes::PIN_INCORRECT);
        reopened.login("old").unwrap();
        let digest = DigestAlgorithm::Sha256.digest(b"x");
        reopened
            .sign_digest(&good.id, SignAlgorithm::Sha256WithEcdsa, &digest)
            .unwrap();
    }

    #[test]
    fn test_interrupted_pin_change_finished_on_login() {
        let dir = TempDir::new().unwrap();
        let mut token = token(&dir);
        token.initialize("old").unwrap();
        token.login("old").unwrap();
        let key = token.generate_key(None).unwrap();

        // staged files and new record written, renames never ran
        let store = token.open_store().unwrap();
        assert_eq!(token.stage_rekey(&store, "old", "new").unwrap(), 1);
        let (record, _) = PinRecord::create("new", 1_000).unwrap();
        record.save(&token.pin_file()).unwrap();
        drop(token);

        let mut reopened = SoftwareToken::new(dir.path(), KeyAlgorithm::EcP256);
        reopened.login("new").unwrap();
        assert!(staged(&dir).is_empty());
        let path = SoftwareToken::key_store_file(dir.path(), &key.id);
        signet_key::load_key_file(&path, "new").unwrap();
    }

    #[test]
    fn test_aborted_pin_change_dropped_on_login() {
        let dir = TempDir::new().unwrap();
        let mut token = token(&dir);
        token.initialize("old").unwrap();
        token.login("old").unwrap();
        let key = token.generate_key(None).unwrap();

        // staged files written, record never replaced
        let store = token.open_store().unwrap();
        token.stage_rekey(&store, "old", "new").unwrap();
        drop(token);

        let mut reopened = SoftwareToken::new(dir.path(), KeyAlgorithm::EcP256);
        reopened.login("old").unwrap();
        assert!(staged(&dir).is_empty());
        let path = SoftwareToken::key_store_file(dir.path(), &key.id);
        signet_key::load_key_file(&path, "old").unwrap();
    }
}
