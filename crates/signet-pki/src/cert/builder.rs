//! Certificate construction in the build / sign / assemble style.
//!
//! [`build_tbs`] produces the to-be-signed structure, the caller signs its DER
//! encoding wherever the private key lives, and [`assemble`] joins both.

use std::{str::FromStr, time::SystemTime};

use const_oid::ObjectIdentifier;
use der::{
    asn1::{BitString, GeneralizedTime, OctetString, SetOfVec, UtcTime, Utf8StringRef},
    Any, DateTime, Decode, Encode,
};
use pkcs8::spki::SubjectPublicKeyInfoOwned;
use rand::RngCore;
use signet_key::{KeySign, SignAlgorithm};
use x509_cert::{
    attr::AttributeTypeAndValue,
    certificate::{Certificate, TbsCertificate, Version},
    ext::{
        pkix::{BasicConstraints, ExtendedKeyUsage, KeyUsage, KeyUsages},
        Extension,
    },
    name::{Name, RdnSequence, RelativeDistinguishedName},
    serial_number::SerialNumber,
    time::{Time, Validity},
};

use super::X509Certificate;
use crate::{
    error::{PkiError, Result},
    oids,
};

/// Inputs of a certificate to be built
#[derive(Clone, Debug)]
pub struct CertificateParams {
    pub serial: Vec<u8>,
    pub subject: Name,
    pub issuer: Name,
    pub public_key: SubjectPublicKeyInfoOwned,
    pub not_before: SystemTime,
    pub not_after: SystemTime,
    pub extensions: Vec<Extension>,
}

impl CertificateParams {
    /// Parameters with a random positive 16-byte serial and no extensions
    pub fn new(
        subject: Name,
        issuer: Name,
        spki_der: &[u8],
        not_before: SystemTime,
        not_after: SystemTime,
    ) -> Result<Self> {
        let public_key = SubjectPublicKeyInfoOwned::from_der(spki_der)
            .map_err(|e| PkiError::CertError(format!("Failed to parse SPKI: {}", e)))?;
        if not_after < not_before {
            return Err(PkiError::CertError(
                "Validity ends before it begins".to_string(),
            ));
        }
        Ok(Self {
            serial: random_serial(),
            subject,
            issuer,
            public_key,
            not_before,
            not_after,
            extensions: Vec::new(),
        })
    }

    pub fn with_serial(mut self, serial: &[u8]) -> Self {
        self.serial = serial.to_vec();
        self
    }

    pub fn with_extension(mut self, extension: Extension) -> Self {
        self.extensions.push(extension);
        self
    }
}

/// Parameters of a self-signed certificate with subject = issuer = `CN=<common_name>`.
///
/// Signing keys get `nonRepudiation | keyCertSign` and a CA basic constraint,
/// any other key gets `digitalSignature` only.
pub fn self_signed_params(
    common_name: &str,
    spki_der: &[u8],
    not_before: SystemTime,
    not_after: SystemTime,
    signing_usage: bool,
) -> Result<CertificateParams> {
    let name = common_name_only(common_name)?;
    let params = CertificateParams::new(name.clone(), name, spki_der, not_before, not_after)?;

    if signing_usage {
        Ok(params
            .with_extension(key_usage_extension(KeyUsage(
                KeyUsages::NonRepudiation | KeyUsages::KeyCertSign,
            ))?)
            .with_extension(basic_constraints_extension(true)?))
    } else {
        Ok(params.with_extension(key_usage_extension(KeyUsage(
            KeyUsages::DigitalSignature.into(),
        ))?))
    }
}

/// Build the unsigned certificate body
pub fn build_tbs(params: &CertificateParams, algorithm: SignAlgorithm) -> Result<TbsCertificate> {
    let serial_number = SerialNumber::new(&params.serial)
        .map_err(|e| PkiError::CertError(format!("Invalid serial number: {}", e)))?;
    let extensions = if params.extensions.is_empty() {
        None
    } else {
        Some(params.extensions.clone())
    };

    Ok(TbsCertificate {
        version: Version::V3,
        serial_number,
        signature: algorithm.algorithm_identifier(),
        issuer: params.issuer.clone(),
        validity: Validity {
            not_before: to_x509_time(params.not_before)?,
            not_after: to_x509_time(params.not_after)?,
        },
        subject: params.subject.clone(),
        subject_public_key_info: params.public_key.clone(),
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions,
    })
}

/// DER bytes that the issuer's key must sign
pub fn tbs_der(tbs: &TbsCertificate) -> Result<Vec<u8>> {
    tbs.to_der()
        .map_err(|e| PkiError::EncodingError(format!("Failed to encode TBS certificate: {}", e)))
}

/// Join a TBS certificate and its signature
pub fn assemble(
    tbs: TbsCertificate,
    algorithm: SignAlgorithm,
    signature: &[u8],
) -> Result<X509Certificate> {
    let certificate = Certificate {
        tbs_certificate: tbs,
        signature_algorithm: algorithm.algorithm_identifier(),
        signature: BitString::from_bytes(signature)
            .map_err(|e| PkiError::CertError(format!("Failed to create signature: {}", e)))?,
    };
    X509Certificate::from_certificate(certificate)
}

/// Build and sign in one step with a locally held key
pub fn sign_with<K: KeySign + ?Sized>(
    params: &CertificateParams,
    issuer_key: &K,
    algorithm: SignAlgorithm,
) -> Result<X509Certificate> {
    let tbs = build_tbs(params, algorithm)?;
    let signature = issuer_key.sign(algorithm, &tbs_der(&tbs)?)?;
    assemble(tbs, algorithm, &signature)
}

/// Parse an RFC 4514 distinguished name such as `CN=test,O=Org,C=EE`
pub fn parse_name(name: &str) -> Result<Name> {
    let normalized = name
        .split(',')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(",");
    RdnSequence::from_str(&normalized)
        .map_err(|e| PkiError::ParseError(format!("Invalid distinguished name '{}': {}", name, e)))
}

/// Name consisting of a single UTF8 common name
pub fn common_name_only(common_name: &str) -> Result<Name> {
    if common_name.is_empty() {
        return Err(PkiError::CertError(
            "Common Name (CN) is required".to_string(),
        ));
    }
    let value = Utf8StringRef::new(common_name)
        .map_err(|e| PkiError::CertError(format!("Invalid CN value: {}", e)))?;
    let mut set = SetOfVec::new();
    set.insert(AttributeTypeAndValue {
        oid: oids::COMMON_NAME,
        value: Any::from(value),
    })
    .map_err(|e| PkiError::CertError(format!("Failed to add CN: {}", e)))?;
    Ok(RdnSequence::from(vec![RelativeDistinguishedName(set)]))
}

/// Critical keyUsage extension
pub fn key_usage_extension(usage: KeyUsage) -> Result<Extension> {
    encode_extension(oids::KEY_USAGE, true, &usage)
}

/// Critical basicConstraints extension
pub fn basic_constraints_extension(ca: bool) -> Result<Extension> {
    encode_extension(
        oids::BASIC_CONSTRAINTS,
        true,
        &BasicConstraints {
            ca,
            path_len_constraint: None,
        },
    )
}

pub fn extended_key_usage_extension(usages: Vec<ObjectIdentifier>) -> Result<Extension> {
    encode_extension(oids::EXT_KEY_USAGE, false, &ExtendedKeyUsage(usages))
}

fn encode_extension<T: Encode>(oid: ObjectIdentifier, critical: bool, value: &T) -> Result<Extension> {
    let der = value
        .to_der()
        .map_err(|e| PkiError::EncodingError(format!("Failed to encode extension {}: {}", oid, e)))?;
    Ok(Extension {
        extn_id: oid,
        critical,
        extn_value: OctetString::new(der)
            .map_err(|e| PkiError::EncodingError(format!("Invalid extension value: {}", e)))?,
    })
}

/// UTCTime before 2050, GeneralizedTime from 2050 on
pub(crate) fn to_x509_time(time: SystemTime) -> Result<Time> {
    let date_time = DateTime::from_system_time(time)
        .map_err(|e| PkiError::EncodingError(format!("Time out of range: {}", e)))?;
    if date_time.year() < 2050 {
        let utc = UtcTime::from_date_time(date_time)
            .map_err(|e| PkiError::EncodingError(format!("Invalid UTCTime: {}", e)))?;
        Ok(Time::UtcTime(utc))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_date_time(date_time)))
    }
}

fn random_serial() -> Vec<u8> {
    let mut serial = vec![0u8; 16];
    rand::thread_rng().fill_bytes(&mut serial);
    // positive and minimally encoded
    serial[0] = (serial[0] & 0x7f) | 0x01;
    serial
}
