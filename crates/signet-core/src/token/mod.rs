//! Token backends and the per-token worker

mod module;
mod software;
mod worker;

use std::collections::BTreeMap;

pub use module::ModuleToken;
use serde::{Deserialize, Serialize};
use signet_key::{KeyAlgorithm, SignAlgorithm};
pub use software::SoftwareToken;
pub use worker::TokenWorker;

use crate::{error::Result, model::TokenInfo};

/// Id of the software token
pub const SOFTWARE_TOKEN_ID: &str = "0";

/// Module type of the software token
pub const SOFTWARE_MODULE_TYPE: &str = "softToken";

/// What a token is, independent of its state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDescriptor {
    pub module_type: String,
    pub serial_number: Option<String>,
    pub label: Option<String>,
    pub slot_index: Option<u32>,
    #[serde(default)]
    pub read_only: bool,
}

impl TokenDescriptor {
    pub fn software() -> Self {
        Self {
            module_type: SOFTWARE_MODULE_TYPE.to_string(),
            serial_number: None,
            label: None,
            slot_index: None,
            read_only: false,
        }
    }

    pub fn module(module_type: &str, serial_number: &str, label: Option<&str>, slot_index: u32) -> Self {
        Self {
            module_type: module_type.to_string(),
            serial_number: Some(serial_number.to_string()),
            label: label.map(str::to_string),
            slot_index: Some(slot_index),
            read_only: false,
        }
    }

    pub fn is_software(&self) -> bool {
        self.module_type == SOFTWARE_MODULE_TYPE
    }

    /// `0` for the software token, `<module_type>-<serial>-<slot>` otherwise
    pub fn token_id(&self) -> String {
        if self.is_software() {
            return SOFTWARE_TOKEN_ID.to_string();
        }
        let mut id = self.module_type.clone();
        if let Some(serial) = &self.serial_number {
            id.push('-');
            id.push_str(serial);
        }
        if let Some(slot) = self.slot_index {
            id.push('-');
            id.push_str(&slot.to_string());
        }
        id
    }

    /// Fresh registry entry for this token: inactive, no keys
    pub fn to_token_info(&self) -> TokenInfo {
        let mut info = TokenInfo::new(self.token_id(), self.module_type.clone());
        info.serial_number = self.serial_number.clone();
        info.label = self.label.clone();
        info.slot_index = self.slot_index;
        info.read_only = self.read_only;
        info.info = BTreeMap::from([("module_type".to_string(), self.module_type.clone())]);
        info
    }
}

/// A key as the token itself reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendKey {
    pub id: String,
    pub label: Option<String>,
    pub algorithm: KeyAlgorithm,
    /// Base64 SubjectPublicKeyInfo, when the token exposes it
    pub public_key: Option<String>,
    /// DER certificates stored on the token next to the key
    pub certs: Vec<Vec<u8>>,
}

/// Private-key side of a token. Only a [`TokenWorker`] calls into it, one
/// operation at a time, on a blocking thread.
pub trait TokenBackend: Send {
    fn descriptor(&self) -> &TokenDescriptor;

    fn is_initialized(&self) -> Result<bool>;

    /// Set the first PIN
    fn initialize(&mut self, pin: &str) -> Result<()>;

    fn login(&mut self, pin: &str) -> Result<()>;

    fn logout(&mut self);

    fn is_logged_in(&self) -> bool;

    fn change_pin(&mut self, old_pin: &str, new_pin: &str) -> Result<()>;

    fn list_keys(&self) -> Result<Vec<BackendKey>>;

    fn generate_key(&mut self, label: Option<&str>) -> Result<BackendKey>;

    fn delete_key(&mut self, key_id: &str) -> Result<()>;

    /// Remove a certificate stored on the token. Tokens that keep no
    /// certificates have nothing to do.
    fn delete_cert(&mut self, _key_id: &str, _certificate: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Sign a pre-computed digest
    fn sign_digest(&mut self, key_id: &str, algorithm: SignAlgorithm, digest: &[u8]) -> Result<Vec<u8>>;
}
