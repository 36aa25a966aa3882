mod encrypted;
mod p256;
mod rsa;

pub use self::encrypted::{decrypt_pkcs8, decrypt_private_key, encrypt_private_key, load_key_file};

pub(crate) use self::p256::verify_digest as p256_verify_digest;
pub use self::p256::P256Key;
pub(crate) use self::rsa::verify_digest as rsa_verify_digest;
pub use self::rsa::RsaKey;
use crate::{
    algorithm::{KeyAlgorithm, SignAlgorithm},
    error::{Error, Result},
};

// ============================================================================
// Signing trait
// ============================================================================

/// A private key able to sign pre-computed digests.
///
/// Tokens never hand the data itself to the key: the caller digests the
/// to-be-signed bytes with [`SignAlgorithm::digest`] and passes only the digest.
pub trait KeySign {
    /// Algorithm of this key pair
    fn algorithm(&self) -> KeyAlgorithm;

    /// Public key in SubjectPublicKeyInfo DER form
    fn public_key_der(&self) -> Result<Vec<u8>>;

    /// Private key in PKCS#8 DER form
    fn to_pkcs8_der(&self) -> Result<Vec<u8>>;

    /// Sign a digest produced by `algorithm`'s digest function
    fn sign_digest(&self, algorithm: SignAlgorithm, digest: &[u8]) -> Result<Vec<u8>>;

    /// Digest `data` and sign the result
    fn sign(&self, algorithm: SignAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
        self.sign_digest(algorithm, &algorithm.digest(data))
    }
}

pub(crate) fn check_digest(
    key: KeyAlgorithm,
    algorithm: SignAlgorithm,
    digest: &[u8],
) -> Result<()> {
    if algorithm.key_algorithm() != key {
        return Err(Error::algorithm_mismatch(algorithm.key_algorithm(), key));
    }
    let expected = algorithm.digest_algorithm().output_len();
    if digest.len() != expected {
        return Err(Error::SignatureError(format!(
            "digest length {} does not match {} ({} bytes)",
            digest.len(),
            algorithm,
            expected
        )));
    }
    Ok(())
}

// ============================================================================
// Key pair
// ============================================================================

/// Key pair of any supported algorithm
pub enum KeyPair {
    Rsa(RsaKey),
    P256(P256Key),
}

impl KeyPair {
    /// Generate a fresh key pair
    pub fn generate(algorithm: KeyAlgorithm) -> Result<Self> {
        match algorithm {
            KeyAlgorithm::Rsa2048 => Ok(KeyPair::Rsa(RsaKey::generate_2048()?)),
            KeyAlgorithm::EcP256 => Ok(KeyPair::P256(P256Key::generate()?)),
        }
    }

    /// Import a PKCS#8 DER private key of the given algorithm
    pub fn from_pkcs8_der(algorithm: KeyAlgorithm, der: &[u8]) -> Result<Self> {
        match algorithm {
            KeyAlgorithm::Rsa2048 => Ok(KeyPair::Rsa(RsaKey::from_pkcs8_der(der)?)),
            KeyAlgorithm::EcP256 => Ok(KeyPair::P256(P256Key::from_pkcs8_der(der)?)),
        }
    }

    /// Import a PKCS#8 DER private key, taking the algorithm from the encoding
    pub fn from_pkcs8(der: &[u8]) -> Result<Self> {
        Self::from_pkcs8_der(encrypted::pkcs8_algorithm(der)?, der)
    }

    fn inner(&self) -> &dyn KeySign {
        match self {
            KeyPair::Rsa(key) => key,
            KeyPair::P256(key) => key,
        }
    }
}

impl KeySign for KeyPair {
    fn algorithm(&self) -> KeyAlgorithm {
        self.inner().algorithm()
    }

    fn public_key_der(&self) -> Result<Vec<u8>> {
        self.inner().public_key_der()
    }

    fn to_pkcs8_der(&self) -> Result<Vec<u8>> {
        self.inner().to_pkcs8_der()
    }

    fn sign_digest(&self, algorithm: SignAlgorithm, digest: &[u8]) -> Result<Vec<u8>> {
        self.inner().sign_digest(algorithm, digest)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("algorithm", &self.algorithm())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::verify_signature;

    #[test]
    fn test_p256_sign_and_verify() {
        let key = KeyPair::generate(KeyAlgorithm::EcP256).unwrap();
        let spki = key.public_key_der().unwrap();
        let data = b"to be signed";

        for alg in [
            SignAlgorithm::Sha256WithEcdsa,
            SignAlgorithm::Sha384WithEcdsa,
            SignAlgorithm::Sha512WithEcdsa,
        ] {
            let signature = key.sign(alg, data).unwrap();
            verify_signature(&spki, alg, data, &signature).unwrap();
            assert!(verify_signature(&spki, alg, b"other data", &signature).is_err());
        }
    }

    #[test]
    fn test_rsa_sign_and_verify() {
        let key = KeyPair::generate(KeyAlgorithm::Rsa2048).unwrap();
        let spki = key.public_key_der().unwrap();
        let data = b"to be signed";

        let signature = key.sign(SignAlgorithm::Sha256WithRsa, data).unwrap();
        assert_eq!(signature.len(), 256);
        verify_signature(&spki, SignAlgorithm::Sha256WithRsa, data, &signature).unwrap();
    }

    #[test]
    fn test_algorithm_mismatch_rejected() {
        let key = KeyPair::generate(KeyAlgorithm::EcP256).unwrap();
        let digest = SignAlgorithm::Sha256WithRsa.digest(b"x");
        assert!(key.sign_digest(SignAlgorithm::Sha256WithRsa, &digest).is_err());
    }

    #[test]
    fn test_wrong_digest_length_rejected() {
        let key = KeyPair::generate(KeyAlgorithm::EcP256).unwrap();
        assert!(key
            .sign_digest(SignAlgorithm::Sha256WithEcdsa, &[0u8; 20])
            .is_err());
    }

    #[test]
    fn test_pkcs8_algorithm_detected() {
        let key = KeyPair::generate(KeyAlgorithm::EcP256).unwrap();
        let restored = KeyPair::from_pkcs8(&key.to_pkcs8_der().unwrap()).unwrap();
        assert_eq!(restored.algorithm(), KeyAlgorithm::EcP256);
        assert!(KeyPair::from_pkcs8(&[0x30, 0x00]).is_err());
    }

    #[test]
    fn test_pkcs8_roundtrip_keeps_public_key() {
        let key = KeyPair::generate(KeyAlgorithm::EcP256).unwrap();
        let der = key.to_pkcs8_der().unwrap();
        let restored = KeyPair::from_pkcs8_der(KeyAlgorithm::EcP256, &der).unwrap();
        assert_eq!(
            key.public_key_der().unwrap(),
            restored.public_key_der().unwrap()
        );
    }
}
