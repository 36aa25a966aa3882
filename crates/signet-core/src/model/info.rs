use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use signet_key::hash::sha1_hex;
use signet_pki::X509Certificate;

use super::{base64_bytes, ClientId};
use crate::error::{Result, SignerError};

/// What a key is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyUsage {
    Signing,
    Authentication,
}

impl fmt::Display for KeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyUsage::Signing => f.write_str("SIGNING"),
            KeyUsage::Authentication => f.write_str("AUTHENTICATION"),
        }
    }
}

impl FromStr for KeyUsage {
    type Err = SignerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SIGNING" | "SIGN" => Ok(KeyUsage::Signing),
            "AUTHENTICATION" | "AUTH" => Ok(KeyUsage::Authentication),
            _ => Err(SignerError::invalid_request(format!("Unknown key usage '{}'", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenStatus {
    #[default]
    Ok,
    NotInitialized,
    UserPinIncorrect,
}

/// Certificate lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertStatus {
    #[serde(rename = "saved")]
    Saved,
    #[serde(rename = "registration in progress")]
    RegistrationInProgress,
    #[serde(rename = "registered")]
    Registered,
    #[serde(rename = "deletion in progress")]
    DeletionInProgress,
    #[serde(rename = "global error")]
    GlobalError,
}

impl CertStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CertStatus::Saved => "saved",
            CertStatus::RegistrationInProgress => "registration in progress",
            CertStatus::Registered => "registered",
            CertStatus::DeletionInProgress => "deletion in progress",
            CertStatus::GlobalError => "global error",
        }
    }

    pub fn is_registered(self) -> bool {
        self == CertStatus::Registered
    }
}

impl fmt::Display for CertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CertStatus {
    type Err = SignerError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "saved" => Ok(CertStatus::Saved),
            "registration in progress" => Ok(CertStatus::RegistrationInProgress),
            "registered" => Ok(CertStatus::Registered),
            "deletion in progress" => Ok(CertStatus::DeletionInProgress),
            "global error" => Ok(CertStatus::GlobalError),
            _ => Err(SignerError::invalid_request(format!(
                "Unknown certificate status '{}'",
                s
            ))),
        }
    }
}

/// A token and everything it holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub token_type: String,
    pub friendly_name: Option<String>,
    pub serial_number: Option<String>,
    pub label: Option<String>,
    pub slot_index: Option<u32>,
    pub read_only: bool,
    pub available: bool,
    pub active: bool,
    pub status: TokenStatus,
    #[serde(default)]
    pub keys: Vec<KeyInfo>,
    /// Free-form module information
    #[serde(default)]
    pub info: BTreeMap<String, String>,
}

impl TokenInfo {
    pub fn new(id: impl Into<String>, token_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            token_type: token_type.into(),
            friendly_name: None,
            serial_number: None,
            label: None,
            slot_index: None,
            read_only: false,
            available: false,
            active: false,
            status: TokenStatus::Ok,
            keys: Vec::new(),
            info: BTreeMap::new(),
        }
    }

    pub fn key(&self, key_id: &str) -> Option<&KeyInfo> {
        self.keys.iter().find(|k| k.id == key_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub id: String,
    pub label: Option<String>,
    pub friendly_name: Option<String>,
    pub usage: Option<KeyUsage>,
    /// Base64 encoded SubjectPublicKeyInfo
    pub public_key: Option<String>,
    pub sign_mechanism: String,
    pub available: bool,
    #[serde(default)]
    pub certs: Vec<CertificateInfo>,
    #[serde(default)]
    pub cert_requests: Vec<CertRequestInfo>,
}

impl KeyInfo {
    pub fn new(id: impl Into<String>, sign_mechanism: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: None,
            friendly_name: None,
            usage: None,
            public_key: None,
            sign_mechanism: sign_mechanism.into(),
            available: false,
            certs: Vec::new(),
            cert_requests: Vec::new(),
        }
    }

    /// DER bytes of the public key, when known
    pub fn public_key_der(&self) -> Result<Option<Vec<u8>>> {
        use base64::{engine::general_purpose::STANDARD, Engine as _};

        self.public_key
            .as_deref()
            .map(|b64| {
                STANDARD.decode(b64).map_err(|e| {
                    SignerError::internal(format!("Key '{}' has a malformed public key: {}", self.id, e))
                })
            })
            .transpose()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub id: String,
    pub member_id: Option<ClientId>,
    pub active: bool,
    pub saved_to_configuration: bool,
    pub status: CertStatus,
    #[serde(with = "base64_bytes")]
    pub certificate: Vec<u8>,
    #[serde(default, with = "base64_bytes::option")]
    pub ocsp_response: Option<Vec<u8>>,
}

impl CertificateInfo {
    /// SHA-1 hex of the certificate bytes
    pub fn hash(&self) -> String {
        sha1_hex(&self.certificate)
    }

    pub fn parse(&self) -> Result<X509Certificate> {
        Ok(X509Certificate::from_der(&self.certificate)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertRequestInfo {
    pub id: String,
    pub member_id: Option<ClientId>,
    pub subject_name: String,
    pub usage: KeyUsage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(
            serde_json::to_string(&CertStatus::RegistrationInProgress).unwrap(),
            "\"registration in progress\""
        );
        assert_eq!(
            "GLOBAL_ERROR".parse::<CertStatus>().unwrap(),
            CertStatus::GlobalError
        );
        assert!(CertStatus::Registered.is_registered());
        assert!(!CertStatus::Saved.is_registered());
        assert!("bogus".parse::<CertStatus>().is_err());
    }

    #[test]
    fn test_usage_and_token_status_names() {
        assert_eq!(serde_json::to_string(&KeyUsage::Authentication).unwrap(), "\"AUTHENTICATION\"");
        assert_eq!("sign".parse::<KeyUsage>().unwrap(), KeyUsage::Signing);
        assert_eq!(
            serde_json::to_string(&TokenStatus::UserPinIncorrect).unwrap(),
            "\"USER_PIN_INCORRECT\""
        );
    }

    #[test]
    fn test_certificate_bytes_as_base64() {
        let cert = CertificateInfo {
            id: "C1".into(),
            member_id: Some(ClientId::member("EE", "GOV", "1")),
            active: true,
            saved_to_configuration: true,
            status: CertStatus::Registered,
            certificate: vec![1, 2, 3],
            ocsp_response: None,
        };
        let json = serde_json::to_value(&cert).unwrap();
        assert_eq!(json["certificate"], "AQID");
        assert_eq!(json["member_id"], "EE/GOV/1");

        let back: CertificateInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back, cert);
        assert_eq!(cert.hash(), sha1_hex(&[1, 2, 3]));
    }
}
