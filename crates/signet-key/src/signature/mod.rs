use pkcs8::{der::Decode, spki::SubjectPublicKeyInfoRef};

use crate::{
    algorithm::{oids, KeyAlgorithm, SignAlgorithm},
    error::{Error, Result},
    key,
};

/// Verify `signature` over `data` with the public key in `spki_der`.
///
/// The signature algorithm must agree with the public key algorithm.
pub fn verify_signature(
    spki_der: &[u8],
    algorithm: SignAlgorithm,
    data: &[u8],
    signature: &[u8],
) -> Result<()> {
    verify_digest(spki_der, algorithm, &algorithm.digest(data), signature)
}

/// Verify `signature` over an already computed digest
pub fn verify_digest(
    spki_der: &[u8],
    algorithm: SignAlgorithm,
    digest: &[u8],
    signature: &[u8],
) -> Result<()> {
    let key_algorithm = public_key_algorithm(spki_der)?;
    if key_algorithm != algorithm.key_algorithm() {
        return Err(Error::algorithm_mismatch(algorithm.key_algorithm(), key_algorithm));
    }

    match key_algorithm {
        KeyAlgorithm::Rsa2048 => {
            key::rsa_verify_digest(spki_der, algorithm.digest_algorithm(), digest, signature)
        }
        KeyAlgorithm::EcP256 => key::p256_verify_digest(spki_der, digest, signature),
    }
}

/// Determine the key algorithm of a SubjectPublicKeyInfo
pub fn public_key_algorithm(spki_der: &[u8]) -> Result<KeyAlgorithm> {
    let spki = SubjectPublicKeyInfoRef::from_der(spki_der)
        .map_err(|e| Error::EncodingError(format!("Invalid SubjectPublicKeyInfo: {}", e)))?;
    match spki.algorithm.oid {
        oid if oid == oids::RSA_ENCRYPTION => Ok(KeyAlgorithm::Rsa2048),
        oid if oid == oids::EC_PUBLIC_KEY => Ok(KeyAlgorithm::EcP256),
        oid => Err(Error::UnsupportedAlgorithm(format!("public key algorithm {}", oid))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{KeyPair, KeySign};

    #[test]
    fn test_public_key_algorithm_detection() {
        let ec = KeyPair::generate(KeyAlgorithm::EcP256).unwrap();
        assert_eq!(
            public_key_algorithm(&ec.public_key_der().unwrap()).unwrap(),
            KeyAlgorithm::EcP256
        );
        assert!(public_key_algorithm(b"not a key").is_err());
    }

    #[test]
    fn test_verify_rejects_algorithm_mismatch() {
        let ec = KeyPair::generate(KeyAlgorithm::EcP256).unwrap();
        let spki = ec.public_key_der().unwrap();
        let signature = ec.sign(SignAlgorithm::Sha256WithEcdsa, b"data").unwrap();
        assert!(verify_signature(&spki, SignAlgorithm::Sha256WithRsa, b"data", &signature).is_err());
    }
}
