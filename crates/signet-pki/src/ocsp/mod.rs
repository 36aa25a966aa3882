//! OCSP (在线证书状态协议) 模块
//!
//! RFC 6960 response structures, the response verifier and a response
//! builder for in-process responders.

mod builder;
mod verifier;

pub use builder::OcspResponseBuilder;
use const_oid::ObjectIdentifier;
use der::{
    asn1::{BitString, GeneralizedTime, Null, OctetString},
    AnyRef, Choice, Decode, Encode, Enumerated, Sequence,
};
use pkcs8::spki::AlgorithmIdentifierOwned;
use signet_key::DigestAlgorithm;
pub use verifier::OcspVerifier;
use x509_cert::{
    certificate::Version, ext::Extensions, name::Name, serial_number::SerialNumber, Certificate,
};

use crate::{
    cert::X509Certificate,
    error::{PkiError, Result},
    oids,
};

/// OCSP响应状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Enumerated)]
#[repr(u32)]
pub enum OcspResponseStatus {
    Successful = 0,
    MalformedRequest = 1,
    InternalError = 2,
    TryLater = 3,
    SigRequired = 5,
    Unauthorized = 6,
}

/// ```text
/// OCSPResponse ::= SEQUENCE {
///    responseStatus         OCSPResponseStatus,
///    responseBytes          [0] EXPLICIT ResponseBytes OPTIONAL }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Sequence)]
pub struct OcspResponse {
    pub response_status: OcspResponseStatus,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub response_bytes: Option<ResponseBytes>,
}

#[derive(Clone, Debug, PartialEq, Eq, Sequence)]
pub struct ResponseBytes {
    pub response_type: ObjectIdentifier,
    pub response: OctetString,
}

/// ```text
/// BasicOCSPResponse ::= SEQUENCE {
///    tbsResponseData      ResponseData,
///    signatureAlgorithm   AlgorithmIdentifier,
///    signature            BIT STRING,
///    certs            [0] EXPLICIT SEQUENCE OF Certificate OPTIONAL }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Sequence)]
pub struct BasicOcspResponse {
    pub tbs_response_data: ResponseData,
    pub signature_algorithm: AlgorithmIdentifierOwned,
    pub signature: BitString,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub certs: Option<Vec<Certificate>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Sequence)]
pub struct ResponseData {
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", default = "Default::default")]
    pub version: Version,
    pub responder_id: ResponderId,
    pub produced_at: GeneralizedTime,
    pub responses: Vec<SingleResponse>,
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", optional = "true")]
    pub response_extensions: Option<Extensions>,
}

#[derive(Clone, Debug, PartialEq, Eq, Choice)]
pub enum ResponderId {
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", constructed = "true")]
    ByName(Name),
    /// SHA-1 of the responder's public key bits
    #[asn1(context_specific = "2", tag_mode = "EXPLICIT", constructed = "true")]
    ByKey(OctetString),
}

#[derive(Clone, Debug, PartialEq, Eq, Sequence)]
pub struct SingleResponse {
    pub cert_id: CertId,
    pub cert_status: CertStatus,
    pub this_update: GeneralizedTime,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub next_update: Option<GeneralizedTime>,
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", optional = "true")]
    pub single_extensions: Option<Extensions>,
}

#[derive(Clone, Debug, PartialEq, Eq, Sequence)]
pub struct CertId {
    pub hash_algorithm: AlgorithmIdentifierOwned,
    pub issuer_name_hash: OctetString,
    pub issuer_key_hash: OctetString,
    pub serial_number: SerialNumber,
}

#[derive(Clone, Debug, PartialEq, Eq, Choice)]
pub enum CertStatus {
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT")]
    Good(Null),
    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", constructed = "true")]
    Revoked(RevokedInfo),
    #[asn1(context_specific = "2", tag_mode = "IMPLICIT")]
    Unknown(Null),
}

#[derive(Clone, Debug, PartialEq, Eq, Sequence)]
pub struct RevokedInfo {
    pub revocation_time: GeneralizedTime,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub revocation_reason: Option<RevocationReason>,
}

/// CRLReason
#[derive(Clone, Copy, Debug, PartialEq, Eq, Enumerated)]
#[repr(u32)]
pub enum RevocationReason {
    Unspecified = 0,
    KeyCompromise = 1,
    CaCompromise = 2,
    AffiliationChanged = 3,
    Superseded = 4,
    CessationOfOperation = 5,
    CertificateHold = 6,
    RemoveFromCrl = 8,
    PrivilegeWithdrawn = 9,
    AaCompromise = 10,
}

impl CertStatus {
    pub fn good() -> Self {
        CertStatus::Good(Null)
    }

    pub fn unknown() -> Self {
        CertStatus::Unknown(Null)
    }

    pub fn name(&self) -> &'static str {
        match self {
            CertStatus::Good(_) => "good",
            CertStatus::Revoked(_) => "revoked",
            CertStatus::Unknown(_) => "unknown",
        }
    }
}

impl CertId {
    /// SHA-1 CertID of `subject` as issued by `issuer`
    pub fn for_certificate(subject: &X509Certificate, issuer: &X509Certificate) -> Result<Self> {
        let issuer_name = issuer
            .subject()
            .to_der()
            .map_err(|e| PkiError::EncodingError(format!("Failed to encode issuer name: {}", e)))?;

        Ok(Self {
            hash_algorithm: AlgorithmIdentifierOwned {
                oid: oids::SHA1,
                parameters: Some(AnyRef::NULL.into()),
            },
            issuer_name_hash: sha1_octets(&issuer_name)?,
            issuer_key_hash: sha1_octets(public_key_bits(issuer))?,
            serial_number: subject.tbs().serial_number.clone(),
        })
    }

    /// Same certificate, ignoring how the hash algorithm parameters are encoded
    pub fn matches(&self, other: &CertId) -> bool {
        self.hash_algorithm.oid == other.hash_algorithm.oid
            && self.issuer_name_hash == other.issuer_name_hash
            && self.issuer_key_hash == other.issuer_key_hash
            && self.serial_number == other.serial_number
    }
}

impl OcspResponse {
    pub fn from_der_bytes(der: &[u8]) -> Result<Self> {
        Self::from_der(der)
            .map_err(|e| PkiError::OcspError(format!("Failed to parse OCSP response: {}", e)))
    }

    /// Decode the basic response carried in `responseBytes`
    pub fn basic(&self) -> Result<BasicOcspResponse> {
        if self.response_status != OcspResponseStatus::Successful {
            return Err(PkiError::OcspError(format!(
                "OCSP response status is {:?}",
                self.response_status
            )));
        }
        let bytes = self
            .response_bytes
            .as_ref()
            .ok_or_else(|| PkiError::OcspError("OCSP response has no response bytes".to_string()))?;
        if bytes.response_type != oids::OCSP_BASIC {
            return Err(PkiError::OcspError(format!(
                "Unsupported OCSP response type {}",
                bytes.response_type
            )));
        }
        BasicOcspResponse::from_der(bytes.response.as_bytes())
            .map_err(|e| PkiError::OcspError(format!("Failed to parse basic OCSP response: {}", e)))
    }
}

/// Raw subjectPublicKey bits of a certificate
pub(crate) fn public_key_bits(cert: &X509Certificate) -> &[u8] {
    cert.tbs().subject_public_key_info.subject_public_key.raw_bytes()
}

pub(crate) fn sha1_octets(data: &[u8]) -> Result<OctetString> {
    OctetString::new(DigestAlgorithm::Sha1.digest(data))
        .map_err(|e| PkiError::EncodingError(format!("Failed to encode hash: {}", e)))
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use signet_key::{KeyAlgorithm, KeyPair, KeySign, SignAlgorithm};

    use super::*;
    use crate::cert::builder::{self, CertificateParams};

    #[test]
    fn test_cert_id_depends_on_issuer_and_serial() {
        let ca_key = KeyPair::generate(KeyAlgorithm::EcP256).unwrap();
        let now = SystemTime::now();
        let ca_params = builder::self_signed_params(
            "CA",
            &ca_key.public_key_der().unwrap(),
            now,
            now + Duration::from_secs(60),
            true,
        )
        .unwrap();
        let ca = builder::sign_with(&ca_params, &ca_key, SignAlgorithm::Sha256WithEcdsa).unwrap();

        let mut leaves = Vec::new();
        for serial in [[0x01u8], [0x02u8]] {
            let key = KeyPair::generate(KeyAlgorithm::EcP256).unwrap();
            let params = CertificateParams::new(
                builder::parse_name("CN=leaf").unwrap(),
                ca.subject().clone(),
                &key.public_key_der().unwrap(),
                now,
                now + Duration::from_secs(60),
            )
            .unwrap()
            .with_serial(&serial);
            leaves.push(builder::sign_with(&params, &ca_key, SignAlgorithm::Sha256WithEcdsa).unwrap());
        }

        let first = CertId::for_certificate(&leaves[0], &ca).unwrap();
        let again = CertId::for_certificate(&leaves[0], &ca).unwrap();
        let second = CertId::for_certificate(&leaves[1], &ca).unwrap();
        assert!(first.matches(&again));
        assert!(!first.matches(&second));
        assert_eq!(first.issuer_name_hash.as_bytes().len(), 20);
    }

    #[test]
    fn test_unsuccessful_response_has_no_basic() {
        let der = OcspResponseBuilder::unsuccessful(OcspResponseStatus::TryLater).unwrap();
        let response = OcspResponse::from_der_bytes(&der).unwrap();
        assert_eq!(response.response_status, OcspResponseStatus::TryLater);
        assert!(matches!(response.basic(), Err(PkiError::OcspError(_))));
    }
}
