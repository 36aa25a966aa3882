//! 口令保护的私钥文件
//!
//! A key file is a DER `EncryptedPrivateKeyInfo` (PBES2 with PBKDF2-SHA256 and
//! AES-256-CBC). Everything needed to open it besides the password, salt and
//! iteration count included, travels inside the file.

use std::path::Path;

use pkcs8::{pkcs5::pbes2, EncryptedPrivateKeyInfo, PrivateKeyInfo};
use rand::RngCore;

use super::KeyPair;
use crate::{
    algorithm::{oids, KeyAlgorithm},
    error::{Error, Result},
};

const SALT_LEN: usize = 16;
const IV_LEN: usize = 16;

/// Encrypt a PKCS#8 DER private key under `password`
pub fn encrypt_private_key(pkcs8_der: &[u8], password: &str, iterations: u32) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    let mut rng = rand::thread_rng();
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut iv);

    let params = pbes2::Parameters::pbkdf2_sha256_aes256cbc(iterations, &salt, &iv)
        .map_err(Error::encryption)?;
    let info = PrivateKeyInfo::try_from(pkcs8_der).map_err(Error::encryption)?;
    let document = info
        .encrypt_with_params(params, password.as_bytes())
        .map_err(Error::encryption)?;
    Ok(document.as_bytes().to_vec())
}

/// Decrypt an `EncryptedPrivateKeyInfo` back to PKCS#8 DER.
///
/// A password that does not open the file gives [`Error::PinIncorrect`].
pub fn decrypt_pkcs8(encrypted_der: &[u8], password: &str) -> Result<Vec<u8>> {
    let info = EncryptedPrivateKeyInfo::try_from(encrypted_der).map_err(Error::decryption)?;
    let document = info
        .decrypt(password.as_bytes())
        .map_err(|_| Error::PinIncorrect)?;
    // CBC padding can pass by chance under a wrong password
    PrivateKeyInfo::try_from(document.as_bytes()).map_err(|_| Error::PinIncorrect)?;
    Ok(document.as_bytes().to_vec())
}

/// Decrypt an `EncryptedPrivateKeyInfo` into a key pair
pub fn decrypt_private_key(encrypted_der: &[u8], password: &str) -> Result<KeyPair> {
    KeyPair::from_pkcs8(&decrypt_pkcs8(encrypted_der, password)?)
}

/// Load a key file given only its path and password
pub fn load_key_file(path: &Path, password: &str) -> Result<KeyPair> {
    let encrypted = std::fs::read(path)?;
    decrypt_private_key(&encrypted, password)
}

/// Algorithm named by the PKCS#8 `privateKeyAlgorithm` field
pub(crate) fn pkcs8_algorithm(der: &[u8]) -> Result<KeyAlgorithm> {
    let info = PrivateKeyInfo::try_from(der)
        .map_err(|e| Error::EncodingError(format!("PKCS8 DER: {}", e)))?;
    match info.algorithm.oid {
        oid if oid == oids::RSA_ENCRYPTION => Ok(KeyAlgorithm::Rsa2048),
        oid if oid == oids::EC_PUBLIC_KEY => Ok(KeyAlgorithm::EcP256),
        oid => Err(Error::UnsupportedAlgorithm(format!("private key algorithm {}", oid))),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{algorithm::SignAlgorithm, key::KeySign, signature::verify_signature};

    #[test]
    fn test_key_file_opens_with_password_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("A1.key");
        let key = KeyPair::generate(KeyAlgorithm::EcP256).unwrap();
        let encrypted = encrypt_private_key(&key.to_pkcs8_der().unwrap(), "1234", 1_000).unwrap();
        std::fs::write(&path, &encrypted).unwrap();

        let loaded = load_key_file(&path, "1234").unwrap();
        assert_eq!(loaded.algorithm(), KeyAlgorithm::EcP256);
        let spki = key.public_key_der().unwrap();
        assert_eq!(loaded.public_key_der().unwrap(), spki);

        let signature = loaded.sign(SignAlgorithm::Sha256WithEcdsa, b"data").unwrap();
        verify_signature(&spki, SignAlgorithm::Sha256WithEcdsa, b"data", &signature).unwrap();
    }

    #[test]
    fn test_wrong_password_is_pin_incorrect() {
        let key = KeyPair::generate(KeyAlgorithm::EcP256).unwrap();
        let encrypted = encrypt_private_key(&key.to_pkcs8_der().unwrap(), "1234", 1_000).unwrap();
        assert!(matches!(
            decrypt_private_key(&encrypted, "4321"),
            Err(Error::PinIncorrect)
        ));
        assert!(decrypt_private_key(b"not a key file", "1234").is_err());
    }

    #[test]
    fn test_rsa_key_file() {
        let key = KeyPair::generate(KeyAlgorithm::Rsa2048).unwrap();
        let encrypted = encrypt_private_key(&key.to_pkcs8_der().unwrap(), "pw", 1_000).unwrap();
        let loaded = decrypt_private_key(&encrypted, "pw").unwrap();
        assert_eq!(loaded.algorithm(), KeyAlgorithm::Rsa2048);
        assert_eq!(loaded.public_key_der().unwrap(), key.public_key_der().unwrap());
    }
}
