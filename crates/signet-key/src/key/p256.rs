use p256::{
    ecdsa::{
        signature::hazmat::{PrehashSigner, PrehashVerifier},
        Signature, SigningKey, VerifyingKey,
    },
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey},
    SecretKey,
};

use super::{check_digest, KeySign};
use crate::{
    algorithm::{KeyAlgorithm, SignAlgorithm},
    error::{Error, Result},
};

/// NIST P-256 key pair producing DER encoded ECDSA signatures
pub struct P256Key {
    secret: SecretKey,
}

impl From<SecretKey> for P256Key {
    fn from(value: SecretKey) -> Self {
        Self { secret: value }
    }
}

impl P256Key {
    /// Generate a new P-256 key pair
    pub fn generate() -> Result<Self> {
        let secret = SecretKey::random(&mut rand::rngs::OsRng);
        Ok(secret.into())
    }

    /// Import from PKCS8 DER format
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        let secret = SecretKey::from_pkcs8_der(der)
            .map_err(|e| Error::KeyError(format!("P-256 PKCS8 DER import failed: {}", e)))?;
        Ok(secret.into())
    }
}

impl KeySign for P256Key {
    fn algorithm(&self) -> KeyAlgorithm {
        KeyAlgorithm::EcP256
    }

    fn public_key_der(&self) -> Result<Vec<u8>> {
        let der = self
            .secret
            .public_key()
            .to_public_key_der()
            .map_err(|e| Error::EncodingError(format!("P-256 SPKI DER export failed: {}", e)))?;
        Ok(der.as_bytes().to_vec())
    }

    fn to_pkcs8_der(&self) -> Result<Vec<u8>> {
        let der = self
            .secret
            .to_pkcs8_der()
            .map_err(|e| Error::EncodingError(format!("P-256 PKCS8 DER export failed: {}", e)))?;
        Ok(der.as_bytes().to_vec())
    }

    fn sign_digest(&self, algorithm: SignAlgorithm, digest: &[u8]) -> Result<Vec<u8>> {
        check_digest(KeyAlgorithm::EcP256, algorithm, digest)?;
        let signing_key = SigningKey::from(&self.secret);
        let signature: Signature = signing_key
            .sign_prehash(digest)
            .map_err(|e| Error::SignatureError(format!("ECDSA signing failed: {}", e)))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }
}

/// Verify a DER encoded ECDSA signature over a digest
pub(crate) fn verify_digest(spki_der: &[u8], digest: &[u8], signature: &[u8]) -> Result<()> {
    let verifying_key = VerifyingKey::from_public_key_der(spki_der)
        .map_err(|e| Error::KeyError(format!("Invalid P-256 public key: {}", e)))?;
    let signature = Signature::from_der(signature).map_err(|_| Error::InvalidSignature)?;
    verifying_key
        .verify_prehash(digest, &signature)
        .map_err(|_| Error::InvalidSignature)
}
