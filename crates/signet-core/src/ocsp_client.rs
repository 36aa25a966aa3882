use std::{
    collections::HashSet,
    sync::{Arc, RwLock},
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use signet_key::{DigestAlgorithm, KeyPair, KeySign, SignAlgorithm};
use signet_pki::{OcspResponseBuilder, X509Certificate};
use tracing::{debug, info};

use crate::{
    error::{Result, SignerError},
    settings::OcspCfg,
};

/// Fetches OCSP responses for certificates issued by `issuer`
#[async_trait]
pub trait OcspClient: Send + Sync {
    async fn fetch(&self, subject: &X509Certificate, issuer: &X509Certificate) -> Result<Vec<u8>>;
}

/// Client used when no responder is reachable
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOcspClient;

#[async_trait]
impl OcspClient for NoOcspClient {
    async fn fetch(&self, subject: &X509Certificate, _issuer: &X509Certificate) -> Result<Vec<u8>> {
        Err(SignerError::internal(format!(
            "No OCSP responder configured for '{}'",
            subject.subject_string()
        )))
    }
}

/// OCSP client for the `[ocsp]` settings: the local responder when one is
/// configured, [`NoOcspClient`] otherwise
pub fn client_from_settings(cfg: &OcspCfg) -> Result<Arc<dyn OcspClient>> {
    Ok(match LocalOcspResponder::from_settings(cfg)? {
        Some(responder) => Arc::new(responder),
        None => Arc::new(NoOcspClient),
    })
}

/// In-process responder answering from a local revocation list
pub struct LocalOcspResponder {
    certificate: X509Certificate,
    key: KeyPair,
    algorithm: SignAlgorithm,
    validity: Option<Duration>,
    revoked: RwLock<HashSet<String>>,
}

impl LocalOcspResponder {
    pub fn new(certificate: X509Certificate, key: KeyPair) -> Result<Self> {
        let algorithm = SignAlgorithm::for_key(key.algorithm(), DigestAlgorithm::Sha256)?;
        Ok(Self {
            certificate,
            key,
            algorithm,
            validity: None,
            revoked: RwLock::new(HashSet::new()),
        })
    }

    /// Load the responder named by `cfg`. `None` when no certificate is set.
    pub fn from_settings(cfg: &OcspCfg) -> Result<Option<Self>> {
        let Some(cert_path) = &cfg.responder_cert else {
            return Ok(None);
        };
        let key_path = cfg
            .responder_key
            .as_ref()
            .ok_or_else(|| SignerError::invalid_request("OCSP responder key is not configured"))?;

        let certificate = X509Certificate::from_bytes(&std::fs::read(cert_path)?)?;
        let key = match &cfg.responder_key_password {
            Some(password) => signet_key::load_key_file(key_path, password)?,
            None => KeyPair::from_pkcs8(&std::fs::read(key_path)?)?,
        };

        let mut responder = Self::new(certificate, key)?;
        if let Some(secs) = cfg.validity_secs {
            responder = responder.with_validity(Duration::from_secs(secs));
        }
        for serial in &cfg.revoked_serials {
            responder.revoke_serial(serial)?;
        }
        info!(
            "Local OCSP responder {} loaded, {} revoked serial(s)",
            responder.certificate.subject_string(),
            cfg.revoked_serials.len()
        );
        Ok(Some(responder))
    }

    /// Add a nextUpdate this far after thisUpdate
    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = Some(validity);
        self
    }

    pub fn revoke(&self, cert: &X509Certificate) -> Result<()> {
        self.revoke_serial(&cert.serial_hex())
    }

    /// Serial numbers are compared as lower-case hex
    pub fn revoke_serial(&self, serial_hex: &str) -> Result<()> {
        self.revoked
            .write()
            .map_err(|e| SignerError::internal(format!("Revocation list lock poisoned: {}", e)))?
            .insert(serial_hex.to_ascii_lowercase());
        Ok(())
    }

    fn is_revoked(&self, cert: &X509Certificate) -> Result<bool> {
        Ok(self
            .revoked
            .read()
            .map_err(|e| SignerError::internal(format!("Revocation list lock poisoned: {}", e)))?
            .contains(&cert.serial_hex().to_ascii_lowercase()))
    }
}

#[async_trait]
impl OcspClient for LocalOcspResponder {
    async fn fetch(&self, subject: &X509Certificate, issuer: &X509Certificate) -> Result<Vec<u8>> {
        let now = SystemTime::now();
        let mut builder = OcspResponseBuilder::new(now);
        if let Some(validity) = self.validity {
            builder = builder.next_update(now + validity);
        }
        if self.is_revoked(subject)? {
            builder = builder.revoked(now, None);
        }

        debug!("Producing OCSP response for serial {}", subject.serial_hex());
        Ok(builder.build(subject, issuer, &self.certificate, &self.key, self.algorithm)?)
    }
}
