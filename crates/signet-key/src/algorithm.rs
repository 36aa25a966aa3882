use std::{fmt, str::FromStr};

use const_oid::ObjectIdentifier;
use der::asn1::{Any, AnyRef};
use pkcs8::spki::AlgorithmIdentifierOwned;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    hash::DigestAlgorithm,
};

/// Object identifiers for the supported key and signature algorithms
pub mod oids {
    use const_oid::ObjectIdentifier;

    pub const RSA_ENCRYPTION: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
    pub const SHA256_WITH_RSA: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
    pub const SHA384_WITH_RSA: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.12");
    pub const SHA512_WITH_RSA: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.13");
    pub const EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
    pub const ECDSA_WITH_SHA256: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
    pub const ECDSA_WITH_SHA384: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");
    pub const ECDSA_WITH_SHA512: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.4");
}

/// Key pair algorithm held by a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    Rsa2048,
    EcP256,
}

impl KeyAlgorithm {
    /// PKCS#11 style mechanism name reported for keys of this algorithm
    pub fn sign_mechanism(self) -> &'static str {
        match self {
            KeyAlgorithm::Rsa2048 => "CKM_RSA_PKCS",
            KeyAlgorithm::EcP256 => "CKM_ECDSA",
        }
    }

    /// SubjectPublicKeyInfo algorithm OID
    pub fn public_key_oid(self) -> ObjectIdentifier {
        match self {
            KeyAlgorithm::Rsa2048 => oids::RSA_ENCRYPTION,
            KeyAlgorithm::EcP256 => oids::EC_PUBLIC_KEY,
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAlgorithm::Rsa2048 => f.write_str("rsa2048"),
            KeyAlgorithm::EcP256 => f.write_str("ecp256"),
        }
    }
}

impl FromStr for KeyAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rsa" | "rsa2048" => Ok(KeyAlgorithm::Rsa2048),
            "ec" | "p256" | "ecp256" => Ok(KeyAlgorithm::EcP256),
            _ => Err(Error::UnsupportedAlgorithm(format!("key algorithm '{}'", s))),
        }
    }
}

/// Signature algorithm: a key algorithm combined with a digest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignAlgorithm {
    #[serde(rename = "SHA256withRSA")]
    Sha256WithRsa,
    #[serde(rename = "SHA384withRSA")]
    Sha384WithRsa,
    #[serde(rename = "SHA512withRSA")]
    Sha512WithRsa,
    #[serde(rename = "SHA256withECDSA")]
    Sha256WithEcdsa,
    #[serde(rename = "SHA384withECDSA")]
    Sha384WithEcdsa,
    #[serde(rename = "SHA512withECDSA")]
    Sha512WithEcdsa,
}

impl SignAlgorithm {
    pub const ALL: [SignAlgorithm; 6] = [
        SignAlgorithm::Sha256WithRsa,
        SignAlgorithm::Sha384WithRsa,
        SignAlgorithm::Sha512WithRsa,
        SignAlgorithm::Sha256WithEcdsa,
        SignAlgorithm::Sha384WithEcdsa,
        SignAlgorithm::Sha512WithEcdsa,
    ];

    /// Pick the signature algorithm for a key and digest combination
    pub fn for_key(key: KeyAlgorithm, digest: DigestAlgorithm) -> Result<Self> {
        match (key, digest) {
            (KeyAlgorithm::Rsa2048, DigestAlgorithm::Sha256) => Ok(SignAlgorithm::Sha256WithRsa),
            (KeyAlgorithm::Rsa2048, DigestAlgorithm::Sha384) => Ok(SignAlgorithm::Sha384WithRsa),
            (KeyAlgorithm::Rsa2048, DigestAlgorithm::Sha512) => Ok(SignAlgorithm::Sha512WithRsa),
            (KeyAlgorithm::EcP256, DigestAlgorithm::Sha256) => Ok(SignAlgorithm::Sha256WithEcdsa),
            (KeyAlgorithm::EcP256, DigestAlgorithm::Sha384) => Ok(SignAlgorithm::Sha384WithEcdsa),
            (KeyAlgorithm::EcP256, DigestAlgorithm::Sha512) => Ok(SignAlgorithm::Sha512WithEcdsa),
            (key, digest) => Err(Error::UnsupportedAlgorithm(format!(
                "no signature algorithm for {} key with {}",
                key, digest
            ))),
        }
    }

    pub fn from_oid(oid: &ObjectIdentifier) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|alg| alg.oid() == *oid)
            .ok_or_else(|| Error::UnsupportedAlgorithm(format!("signature algorithm {}", oid)))
    }

    pub fn oid(self) -> ObjectIdentifier {
        match self {
            SignAlgorithm::Sha256WithRsa => oids::SHA256_WITH_RSA,
            SignAlgorithm::Sha384WithRsa => oids::SHA384_WITH_RSA,
            SignAlgorithm::Sha512WithRsa => oids::SHA512_WITH_RSA,
            SignAlgorithm::Sha256WithEcdsa => oids::ECDSA_WITH_SHA256,
            SignAlgorithm::Sha384WithEcdsa => oids::ECDSA_WITH_SHA384,
            SignAlgorithm::Sha512WithEcdsa => oids::ECDSA_WITH_SHA512,
        }
    }

    pub fn digest_algorithm(self) -> DigestAlgorithm {
        match self {
            SignAlgorithm::Sha256WithRsa | SignAlgorithm::Sha256WithEcdsa => DigestAlgorithm::Sha256,
            SignAlgorithm::Sha384WithRsa | SignAlgorithm::Sha384WithEcdsa => DigestAlgorithm::Sha384,
            SignAlgorithm::Sha512WithRsa | SignAlgorithm::Sha512WithEcdsa => DigestAlgorithm::Sha512,
        }
    }

    pub fn key_algorithm(self) -> KeyAlgorithm {
        match self {
            SignAlgorithm::Sha256WithRsa
            | SignAlgorithm::Sha384WithRsa
            | SignAlgorithm::Sha512WithRsa => KeyAlgorithm::Rsa2048,
            _ => KeyAlgorithm::EcP256,
        }
    }

    /// AlgorithmIdentifier for certificates and requests.
    ///
    /// RSA signature identifiers carry explicit NULL parameters, ECDSA ones carry none.
    pub fn algorithm_identifier(self) -> AlgorithmIdentifierOwned {
        let parameters = match self.key_algorithm() {
            KeyAlgorithm::Rsa2048 => Some(Any::from(AnyRef::NULL)),
            KeyAlgorithm::EcP256 => None,
        };
        AlgorithmIdentifierOwned {
            oid: self.oid(),
            parameters,
        }
    }

    /// Digest the data with this algorithm's digest
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        self.digest_algorithm().digest(data)
    }

    pub fn name(self) -> &'static str {
        match self {
            SignAlgorithm::Sha256WithRsa => "SHA256withRSA",
            SignAlgorithm::Sha384WithRsa => "SHA384withRSA",
            SignAlgorithm::Sha512WithRsa => "SHA512withRSA",
            SignAlgorithm::Sha256WithEcdsa => "SHA256withECDSA",
            SignAlgorithm::Sha384WithEcdsa => "SHA384withECDSA",
            SignAlgorithm::Sha512WithEcdsa => "SHA512withECDSA",
        }
    }
}

impl fmt::Display for SignAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SignAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|alg| alg.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnsupportedAlgorithm(format!("signature algorithm '{}'", s)))
    }
}
