//! Certificate Signing Request (CSR) module
//!
//! Requests are built in two halves: [`build_unsigned`] produces the
//! `CertReqInfo` whose DER encoding the key holder signs, and
//! [`Csr::assemble`] attaches the signature.

use der::{asn1::BitString, Decode, Encode};
use pkcs8::spki::SubjectPublicKeyInfoOwned;
use signet_key::{KeySign, SignAlgorithm};
use x509_cert::{
    name::Name,
    request::{CertReq, CertReqInfo, Version},
};

use crate::{cert::builder, error::PkiError, Result};

/// PKCS#10 Certificate Signing Request
#[derive(Debug, Clone)]
pub struct Csr {
    inner: CertReq,
}

/// Build an unsigned CertReqInfo from subject and public key
pub fn build_unsigned(subject: &Name, spki_der: &[u8]) -> Result<CertReqInfo> {
    let public_key = SubjectPublicKeyInfoOwned::from_der(spki_der)
        .map_err(|e| PkiError::CsrError(format!("Failed to parse SPKI: {}", e)))?;

    Ok(CertReqInfo {
        version: Version::V1,
        subject: subject.clone(),
        public_key,
        attributes: Default::default(),
    })
}

/// DER encoding of `info`, the bytes to be signed
pub fn info_der(info: &CertReqInfo) -> Result<Vec<u8>> {
    info.to_der()
        .map_err(|e| PkiError::CsrError(format!("Failed to encode CertReqInfo: {}", e)))
}

/// Create a CSR with a locally held key (convenience function)
pub fn create_csr<K: KeySign + ?Sized>(
    key: &K,
    subject: &Name,
    algorithm: SignAlgorithm,
) -> Result<Csr> {
    let info = build_unsigned(subject, &key.public_key_der()?)?;
    let signature = key.sign(algorithm, &info_der(&info)?)?;
    Csr::assemble(info, algorithm, &signature)
}

/// Parse a subject name such as `CN=test, O=Org` into an X.500 name
pub fn parse_subject_name(subject: &str) -> Result<Name> {
    builder::parse_name(subject).map_err(|e| PkiError::CsrError(e.to_string()))
}

impl Csr {
    /// Assemble a complete CSR from CertReqInfo and signature
    pub fn assemble(info: CertReqInfo, algorithm: SignAlgorithm, signature: &[u8]) -> Result<Self> {
        let inner = CertReq {
            info,
            algorithm: algorithm.algorithm_identifier(),
            signature: BitString::from_bytes(signature)
                .map_err(|e| PkiError::CsrError(format!("Failed to create signature: {}", e)))?,
        };

        Ok(Self { inner })
    }

    /// Parse CSR from PEM format
    pub fn from_pem(pem: &str) -> Result<Self> {
        let der = pem::parse(pem)
            .map_err(|e| PkiError::CsrError(format!("Failed to parse PEM: {}", e)))?;

        if der.tag() != "CERTIFICATE REQUEST" && der.tag() != "NEW CERTIFICATE REQUEST" {
            return Err(PkiError::CsrError(
                "Invalid PEM tag, expected CERTIFICATE REQUEST or NEW CERTIFICATE REQUEST"
                    .to_string(),
            ));
        }

        Self::from_der(der.contents())
    }

    /// Parse CSR from DER format
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let inner = CertReq::from_der(der)
            .map_err(|e| PkiError::CsrError(format!("Failed to parse DER: {}", e)))?;

        Ok(Self { inner })
    }

    /// Export CSR to PEM format
    pub fn to_pem(&self) -> Result<String> {
        let der = self.to_der()?;
        Ok(pem::encode(&pem::Pem::new("CERTIFICATE REQUEST", der)))
    }

    /// Export CSR to DER format
    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.inner
            .to_der()
            .map_err(|e| PkiError::CsrError(format!("Failed to encode DER: {}", e)))
    }

    pub fn subject(&self) -> &Name {
        &self.inner.info.subject
    }

    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        self.inner
            .info
            .public_key
            .to_der()
            .map_err(|e| PkiError::CsrError(format!("Failed to encode public key: {}", e)))
    }

    pub fn signature_algorithm(&self) -> Result<SignAlgorithm> {
        Ok(SignAlgorithm::from_oid(&self.inner.algorithm.oid)?)
    }

    /// Verify the CSR signature against its own public key
    pub fn verify_signature(&self) -> Result<()> {
        let info_der = info_der(&self.inner.info)?;
        signet_key::verify_signature(
            &self.public_key_der()?,
            self.signature_algorithm()?,
            &info_der,
            self.inner.signature.raw_bytes(),
        )
        .map_err(|e| PkiError::CsrError(format!("Signature verification failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use signet_key::{KeyAlgorithm, KeyPair};

    use super::*;

    #[test]
    fn test_create_and_verify_rsa() {
        let key = KeyPair::generate(KeyAlgorithm::Rsa2048).unwrap();
        let subject = parse_subject_name("CN=test, O=Org, C=EE").unwrap();
        let csr = create_csr(&key, &subject, SignAlgorithm::Sha256WithRsa).unwrap();

        csr.verify_signature().unwrap();
        assert_eq!(csr.subject(), &subject);
        assert_eq!(csr.public_key_der().unwrap(), key.public_key_der().unwrap());
    }

    #[test]
    fn test_pem_round_trip_keeps_signature_valid() {
        let key = KeyPair::generate(KeyAlgorithm::EcP256).unwrap();
        let subject = parse_subject_name("CN=ec").unwrap();
        let csr = create_csr(&key, &subject, SignAlgorithm::Sha384WithEcdsa).unwrap();

        let pem = csr.to_pem().unwrap();
        assert!(pem.starts_with("-----BEGIN CERTIFICATE REQUEST-----"));
        let parsed = Csr::from_pem(&pem).unwrap();
        parsed.verify_signature().unwrap();
        assert_eq!(
            parsed.signature_algorithm().unwrap(),
            SignAlgorithm::Sha384WithEcdsa
        );
        assert_eq!(Csr::from_der(&csr.to_der().unwrap()).unwrap().subject(), &subject);
    }

    #[test]
    fn test_tampered_signature_fails() {
        let key = KeyPair::generate(KeyAlgorithm::EcP256).unwrap();
        let subject = parse_subject_name("CN=tamper").unwrap();
        let info = build_unsigned(&subject, &key.public_key_der().unwrap()).unwrap();
        let other = KeyPair::generate(KeyAlgorithm::EcP256).unwrap();
        let signature = other
            .sign(SignAlgorithm::Sha256WithEcdsa, &info_der(&info).unwrap())
            .unwrap();
        let csr = Csr::assemble(info, SignAlgorithm::Sha256WithEcdsa, &signature).unwrap();
        assert!(csr.verify_signature().is_err());
    }

    #[test]
    fn test_wrong_pem_tag_rejected() {
        let pem = pem::encode(&pem::Pem::new("CERTIFICATE", vec![1, 2, 3]));
        assert!(matches!(Csr::from_pem(&pem), Err(PkiError::CsrError(_))));
    }
}
