use rsa::{
    pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey},
    Pkcs1v15Sign, RsaPrivateKey,
};
use sha2::{Sha256, Sha384, Sha512};

use super::{check_digest, KeySign};
use crate::{
    algorithm::{KeyAlgorithm, SignAlgorithm},
    error::{Error, Result},
    hash::DigestAlgorithm,
};

/// RSA key pair signing with PKCS#1 v1.5 padding
pub struct RsaKey {
    inner: RsaPrivateKey,
}

impl From<RsaPrivateKey> for RsaKey {
    fn from(value: RsaPrivateKey) -> Self {
        Self { inner: value }
    }
}

impl RsaKey {
    /// Generate a new RSA key pair with the given modulus size
    pub fn generate(bits: usize) -> Result<Self> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| Error::KeyError(format!("RSA-{} generation failed: {}", bits, e)))?;
        Ok(private_key.into())
    }

    /// Generate a new 2048-bit RSA key pair
    pub fn generate_2048() -> Result<Self> {
        Self::generate(2048)
    }

    /// Import from PKCS8 DER format
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| Error::KeyError(format!("RSA PKCS8 DER import failed: {}", e)))?;
        Ok(private_key.into())
    }

    fn padding(digest: DigestAlgorithm) -> Result<Pkcs1v15Sign> {
        match digest {
            DigestAlgorithm::Sha256 => Ok(Pkcs1v15Sign::new::<Sha256>()),
            DigestAlgorithm::Sha384 => Ok(Pkcs1v15Sign::new::<Sha384>()),
            DigestAlgorithm::Sha512 => Ok(Pkcs1v15Sign::new::<Sha512>()),
            DigestAlgorithm::Sha1 => Err(Error::UnsupportedAlgorithm(
                "SHA-1 is not accepted for RSA signatures".to_string(),
            )),
        }
    }
}

impl KeySign for RsaKey {
    fn algorithm(&self) -> KeyAlgorithm {
        KeyAlgorithm::Rsa2048
    }

    fn public_key_der(&self) -> Result<Vec<u8>> {
        let der = self
            .inner
            .to_public_key()
            .to_public_key_der()
            .map_err(|e| Error::EncodingError(format!("RSA SPKI DER export failed: {}", e)))?;
        Ok(der.as_bytes().to_vec())
    }

    fn to_pkcs8_der(&self) -> Result<Vec<u8>> {
        let der = self
            .inner
            .to_pkcs8_der()
            .map_err(|e| Error::EncodingError(format!("RSA PKCS8 DER export failed: {}", e)))?;
        Ok(der.as_bytes().to_vec())
    }

    fn sign_digest(&self, algorithm: SignAlgorithm, digest: &[u8]) -> Result<Vec<u8>> {
        check_digest(KeyAlgorithm::Rsa2048, algorithm, digest)?;
        let padding = Self::padding(algorithm.digest_algorithm())?;
        let mut rng = rand::thread_rng();
        self.inner
            .sign_with_rng(&mut rng, padding, digest)
            .map_err(|e| Error::SignatureError(format!("RSA signing failed: {}", e)))
    }
}

/// Verify a PKCS#1 v1.5 signature over a digest
pub(crate) fn verify_digest(
    spki_der: &[u8],
    digest_algorithm: DigestAlgorithm,
    digest: &[u8],
    signature: &[u8],
) -> Result<()> {
    use rsa::{pkcs8::DecodePublicKey, RsaPublicKey};

    let public_key = RsaPublicKey::from_public_key_der(spki_der)
        .map_err(|e| Error::KeyError(format!("Invalid RSA public key: {}", e)))?;
    let padding = RsaKey::padding(digest_algorithm)?;
    public_key
        .verify(padding, digest, signature)
        .map_err(|_| Error::InvalidSignature)
}
