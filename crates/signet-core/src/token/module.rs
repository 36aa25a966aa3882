use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use signet_key::{
    store::ATTR_PUBLIC_KEY, KeyAlgorithm, KeyMetadata, KeyPair, KeySign, KeyStore, MemoryKeyStore,
    SignAlgorithm,
};
use tracing::debug;

use super::{BackendKey, TokenBackend, TokenDescriptor};
use crate::{
    error::{Result, SignerError},
    registry::random_id,
};

/// In-memory emulation of a hardware security module slot.
///
/// The PIN is fixed by configuration. Some modules only reveal a public key
/// after first use; `with_hidden_public_keys` reproduces that. Certificates
/// can be stored on the module next to their key and are reported with it.
pub struct ModuleToken {
    descriptor: TokenDescriptor,
    pin: String,
    key_algorithm: KeyAlgorithm,
    store: MemoryKeyStore,
    certs: HashMap<String, Vec<Vec<u8>>>,
    logged_in: bool,
    hide_public_keys: bool,
}

impl ModuleToken {
    pub fn new(descriptor: TokenDescriptor, pin: &str, key_algorithm: KeyAlgorithm) -> Self {
        Self {
            descriptor,
            pin: pin.to_string(),
            key_algorithm,
            store: MemoryKeyStore::new(),
            certs: HashMap::new(),
            logged_in: false,
            hide_public_keys: false,
        }
    }

    pub fn with_hidden_public_keys(mut self) -> Self {
        self.hide_public_keys = true;
        self
    }

    /// 把证书写入模块，挂在 `key_id` 下；重复写入同一证书不生效
    pub fn put_certificate(&mut self, key_id: &str, certificate: Vec<u8>) -> Result<()> {
        if !self.store.exists(key_id)? {
            return Err(SignerError::key_not_found(key_id));
        }
        let certs = self.certs.entry(key_id.to_string()).or_default();
        if !certs.contains(&certificate) {
            certs.push(certificate);
        }
        Ok(())
    }

    fn token_id(&self) -> String {
        self.descriptor.token_id()
    }

    fn require_login(&self) -> Result<()> {
        if self.logged_in {
            Ok(())
        } else {
            Err(SignerError::token_not_active(&self.token_id()))
        }
    }

    fn require_writable(&self) -> Result<()> {
        if self.descriptor.read_only {
            Err(SignerError::unsupported(format!(
                "Token '{}' is read-only",
                self.token_id()
            )))
        } else {
            Ok(())
        }
    }
}

impl TokenBackend for ModuleToken {
    fn descriptor(&self) -> &TokenDescriptor {
        &self.descriptor
    }

    fn is_initialized(&self) -> Result<bool> {
        Ok(true)
    }

    fn initialize(&mut self, _pin: &str) -> Result<()> {
        Err(SignerError::unsupported(
            "Only the software token can be initialized",
        ))
    }

    fn login(&mut self, pin: &str) -> Result<()> {
        if pin != self.pin {
            return Err(SignerError::pin_incorrect());
        }
        self.logged_in = true;
        Ok(())
    }

    fn logout(&mut self) {
        self.logged_in = false;
    }

    fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    fn change_pin(&mut self, old_pin: &str, new_pin: &str) -> Result<()> {
        self.require_writable()?;
        if old_pin != self.pin {
            return Err(SignerError::pin_incorrect());
        }
        self.pin = new_pin.to_string();
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<BackendKey>> {
        self.require_login()?;
        self.store
            .list_keys()?
            .into_iter()
            .map(|key_id| {
                let metadata = self.store.get_metadata(&key_id)?;
                Ok(BackendKey {
                    public_key: if self.hide_public_keys {
                        None
                    } else {
                        metadata.public_key().map(str::to_string)
                    },
                    label: metadata.label,
                    algorithm: metadata.algorithm,
                    certs: self.certs.get(&key_id).cloned().unwrap_or_default(),
                    id: key_id,
                })
            })
            .collect()
    }

    fn generate_key(&mut self, label: Option<&str>) -> Result<BackendKey> {
        self.require_login()?;
        self.require_writable()?;

        let key_id = random_id();
        let pair = KeyPair::generate(self.key_algorithm)?;
        let public_key = STANDARD.encode(pair.public_key_der()?);
        let metadata = KeyMetadata::new(&key_id, self.key_algorithm, label.map(str::to_string))
            .with_attribute(ATTR_PUBLIC_KEY, public_key.clone());
        self.store.store_key(metadata, pair.to_pkcs8_der()?)?;

        debug!("Generated key {} on token {}", key_id, self.token_id());
        Ok(BackendKey {
            id: key_id,
            label: label.map(str::to_string),
            algorithm: self.key_algorithm,
            public_key: (!self.hide_public_keys).then_some(public_key),
            certs: Vec::new(),
        })
    }

    fn delete_key(&mut self, key_id: &str) -> Result<()> {
        self.require_login()?;
        self.require_writable()?;
        if !self.store.exists(key_id)? {
            return Err(SignerError::key_not_found(key_id));
        }
        self.store.delete_key(key_id)?;
        if let Some(certs) = self.certs.remove(key_id) {
            debug!("Destroyed {} certificate(s) of key {}", certs.len(), key_id);
        }
        Ok(())
    }

    fn delete_cert(&mut self, key_id: &str, certificate: &[u8]) -> Result<()> {
        self.require_login()?;
        self.require_writable()?;
        let Some(certs) = self.certs.get_mut(key_id) else {
            return Ok(());
        };
        if let Some(index) = certs.iter().position(|c| c == certificate) {
            certs.remove(index);
            debug!("Destroyed certificate of key {} on token {}", key_id, self.token_id());
        }
        Ok(())
    }

    fn sign_digest(&mut self, key_id: &str, algorithm: SignAlgorithm, digest: &[u8]) -> Result<Vec<u8>> {
        self.require_login()?;
        if !self.store.exists(key_id)? {
            return Err(SignerError::key_not_found(key_id));
        }
        let (metadata, der) = self.store.get_key(key_id)?;
        let pair = KeyPair::from_pkcs8_der(metadata.algorithm, &der)?;
        Ok(pair.sign_digest(algorithm, digest)?)
    }
}
