use std::path::Path;

use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    ChaCha20Poly1305, Nonce,
};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{Error, Result};

pub const DEFAULT_PIN_ITERATIONS: u32 = 100_000;

const SALT_LEN: usize = 16;
const CHECK_VALUE: &[u8] = b"signet token pin check";

/// Derive the 32-byte store encryption key from a PIN
pub fn derive_store_key(pin: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(pin.as_bytes(), salt, iterations, &mut key);
    key
}

/// PIN verification record of a software token.
///
/// Holds the PBKDF2 salt and a check value encrypted under the derived key,
/// so a wrong PIN is detected before any key file is touched.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PinRecord {
    pub salt: String,
    pub iterations: u32,
    pub check: String,
}

impl PinRecord {
    /// Create a record for `pin`, returning it with the derived store key
    pub fn create(pin: &str, iterations: u32) -> Result<(Self, [u8; 32])> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);

        let key = derive_store_key(pin, &salt, iterations);
        let cipher = ChaCha20Poly1305::new_from_slice(&key).map_err(Error::encryption)?;
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, CHECK_VALUE)
            .map_err(Error::encryption)?;

        let mut check = nonce.to_vec();
        check.extend_from_slice(&ciphertext);

        let record = Self {
            salt: hex::encode(salt),
            iterations,
            check: hex::encode(check),
        };
        Ok((record, key))
    }

    /// Verify `pin` and return the derived store key
    pub fn unlock(&self, pin: &str) -> Result<[u8; 32]> {
        let salt = hex::decode(&self.salt).map_err(Error::decryption)?;
        let check = hex::decode(&self.check).map_err(Error::decryption)?;
        if check.len() < 12 {
            return Err(Error::decryption("Invalid PIN check value"));
        }

        let key = derive_store_key(pin, &salt, self.iterations);
        let cipher = ChaCha20Poly1305::new_from_slice(&key).map_err(Error::decryption)?;
        let (nonce_bytes, encrypted) = check.split_at(12);
        match cipher.decrypt(Nonce::from_slice(nonce_bytes), encrypted) {
            Ok(plain) if plain == CHECK_VALUE => Ok(key),
            _ => Err(Error::PinIncorrect),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Write the record through a temporary file so a reader sees either the old or the new one
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
