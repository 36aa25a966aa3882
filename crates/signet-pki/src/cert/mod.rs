pub mod builder;
mod usage;

use std::time::SystemTime;

use const_oid::ObjectIdentifier;
use der::{
    asn1::{Ia5StringRef, PrintableStringRef, Utf8StringRef},
    Any, Decode, Encode,
};
use signet_key::SignAlgorithm;
pub use usage::{classify_usage, CertUsage};
use x509_cert::{
    certificate::{Certificate, TbsCertificate},
    ext::{
        pkix::{BasicConstraints, ExtendedKeyUsage, KeyUsage},
        Extension,
    },
    name::Name,
};

use crate::{
    error::{PkiError, Result},
    oids,
};

/// Parsed X.509 certificate together with its original DER encoding.
///
/// The original bytes are kept so that hashes and byte comparisons refer to
/// exactly what was imported.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct X509Certificate {
    inner: Certificate,
    der: Vec<u8>,
}

impl X509Certificate {
    /// Parse certificate from DER format
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let inner = Certificate::from_der(der)
            .map_err(|e| PkiError::ParseError(format!("Failed to parse certificate DER: {}", e)))?;
        Ok(Self {
            inner,
            der: der.to_vec(),
        })
    }

    /// Parse certificate from PEM format
    pub fn from_pem(pem: &str) -> Result<Self> {
        let parsed = pem::parse(pem)
            .map_err(|e| PkiError::ParseError(format!("Failed to parse PEM: {}", e)))?;
        if parsed.tag() != "CERTIFICATE" {
            return Err(PkiError::ParseError(format!(
                "Invalid PEM tag '{}', expected CERTIFICATE",
                parsed.tag()
            )));
        }
        Self::from_der(parsed.contents())
    }

    /// Parse certificate bytes that are either PEM or DER
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let trimmed = bytes
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .map(|start| &bytes[start..])
            .unwrap_or(bytes);
        if trimmed.starts_with(b"-----BEGIN") {
            let text = std::str::from_utf8(trimmed)
                .map_err(|e| PkiError::ParseError(format!("PEM is not UTF-8: {}", e)))?;
            Self::from_pem(text)
        } else {
            Self::from_der(bytes)
        }
    }

    pub(crate) fn from_certificate(inner: Certificate) -> Result<Self> {
        let der = inner
            .to_der()
            .map_err(|e| PkiError::EncodingError(format!("Failed to encode certificate: {}", e)))?;
        Ok(Self { inner, der })
    }

    pub fn to_der(&self) -> &[u8] {
        &self.der
    }

    pub fn to_pem(&self) -> String {
        pem::encode(&pem::Pem::new("CERTIFICATE", self.der.clone()))
    }

    pub fn inner(&self) -> &Certificate {
        &self.inner
    }

    pub fn tbs(&self) -> &TbsCertificate {
        &self.inner.tbs_certificate
    }

    /// Hex SHA-1 of the DER encoding
    pub fn hash(&self) -> String {
        signet_key::hash::sha1_hex(&self.der)
    }

    /// SubjectPublicKeyInfo in DER form
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        self.tbs()
            .subject_public_key_info
            .to_der()
            .map_err(|e| PkiError::EncodingError(format!("Failed to encode public key: {}", e)))
    }

    pub fn serial_hex(&self) -> String {
        hex::encode(self.tbs().serial_number.as_bytes())
    }

    pub fn subject(&self) -> &Name {
        &self.tbs().subject
    }

    pub fn issuer(&self) -> &Name {
        &self.tbs().issuer
    }

    /// Subject in RFC 4514 form
    pub fn subject_string(&self) -> String {
        self.subject().to_string()
    }

    pub fn subject_attribute(&self, oid: ObjectIdentifier) -> Option<String> {
        name_attribute(self.subject(), oid)
    }

    pub fn subject_common_name(&self) -> Option<String> {
        self.subject_attribute(oids::COMMON_NAME)
    }

    pub fn not_before(&self) -> SystemTime {
        self.tbs().validity.not_before.to_system_time()
    }

    pub fn not_after(&self) -> SystemTime {
        self.tbs().validity.not_after.to_system_time()
    }

    /// Check `not_before <= at <= not_after`
    pub fn check_validity(&self, at: SystemTime) -> Result<()> {
        if at < self.not_before() {
            return Err(PkiError::CertificateNotYetValid);
        }
        if at > self.not_after() {
            return Err(PkiError::CertificateExpired);
        }
        Ok(())
    }

    pub fn extension(&self, oid: ObjectIdentifier) -> Option<&Extension> {
        self.tbs()
            .extensions
            .as_ref()
            .and_then(|exts| exts.iter().find(|ext| ext.extn_id == oid))
    }

    /// Decoded keyUsage extension, if present
    pub fn key_usage(&self) -> Result<Option<KeyUsage>> {
        self.decode_extension(oids::KEY_USAGE)
    }

    /// Extended key usage OIDs (empty when the extension is absent)
    pub fn extended_key_usage(&self) -> Result<Vec<ObjectIdentifier>> {
        Ok(self
            .decode_extension::<ExtendedKeyUsage>(oids::EXT_KEY_USAGE)?
            .map(|eku| eku.0)
            .unwrap_or_default())
    }

    pub fn is_ca(&self) -> bool {
        matches!(
            self.decode_extension::<BasicConstraints>(oids::BASIC_CONSTRAINTS),
            Ok(Some(BasicConstraints { ca: true, .. }))
        )
    }

    /// Issuer equals subject and the certificate verifies with its own key
    pub fn is_self_signed(&self) -> bool {
        self.subject() == self.issuer() && self.verify_signed_by(self).is_ok()
    }

    pub fn signature_algorithm(&self) -> Result<SignAlgorithm> {
        Ok(SignAlgorithm::from_oid(&self.inner.signature_algorithm.oid)?)
    }

    /// Verify this certificate's signature with `issuer`'s public key
    pub fn verify_signed_by(&self, issuer: &X509Certificate) -> Result<()> {
        let tbs_der = self
            .tbs()
            .to_der()
            .map_err(|e| PkiError::EncodingError(format!("Failed to encode TBS: {}", e)))?;
        let signature = self.inner.signature.raw_bytes();
        signet_key::verify_signature(
            &issuer.public_key_der()?,
            self.signature_algorithm()?,
            &tbs_der,
            signature,
        )
        .map_err(|e| {
            PkiError::SignatureError(format!(
                "Certificate '{}' is not signed by '{}': {}",
                self.subject_string(),
                issuer.subject_string(),
                e
            ))
        })
    }

    fn decode_extension<'a, T: Decode<'a>>(&'a self, oid: ObjectIdentifier) -> Result<Option<T>> {
        match self.extension(oid) {
            Some(ext) => T::from_der(ext.extn_value.as_bytes())
                .map(Some)
                .map_err(|e| PkiError::ParseError(format!("Invalid extension {}: {}", oid, e))),
            None => Ok(None),
        }
    }
}

/// First value of attribute `oid` in `name`, as a string
pub fn name_attribute(name: &Name, oid: ObjectIdentifier) -> Option<String> {
    name.0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .find(|attr| attr.oid == oid)
        .and_then(|attr| attribute_string(&attr.value))
}

fn attribute_string(value: &Any) -> Option<String> {
    if let Ok(s) = Utf8StringRef::try_from(value) {
        return Some(s.as_str().to_string());
    }
    if let Ok(s) = PrintableStringRef::try_from(value) {
        return Some(s.as_str().to_string());
    }
    if let Ok(s) = Ia5StringRef::try_from(value) {
        return Some(s.as_str().to_string());
    }
    None
}
