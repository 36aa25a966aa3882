//! Certificate import and lifecycle.
//!
//! Import validates against a registry snapshot, then re-checks and commits
//! under the registry write lock. A failed import leaves the registry as it was.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use signet_pki::{classify_usage, verify_chain, CertUsage, OcspVerifier, X509Certificate};
use tracing::{debug, info, warn};

use crate::{
    error::{codes, ErrorKind, Result, SignerError},
    globalconf::GlobalConf,
    model::{CertStatus, ClientId, KeyUsage},
    ocsp_client::OcspClient,
    registry::{random_id, RegistryState, TokenRegistry},
    token::SOFTWARE_MODULE_TYPE,
};

fn cert_exists(hash: &str) -> SignerError {
    SignerError::conflict(
        codes::CERT_EXISTS,
        format!("Certificate with hash '{}' already exists", hash),
    )
}

/// Usage a certificate may be imported with, judged from its extensions
pub fn certificate_usage(cert: &X509Certificate) -> Result<KeyUsage> {
    match classify_usage(cert)? {
        CertUsage::Signing => Ok(KeyUsage::Signing),
        CertUsage::Authentication => Ok(KeyUsage::Authentication),
        CertUsage::Both => Err(SignerError::wrong_usage(
            "Certificate cannot be used for both signing and authentication",
        )),
        CertUsage::None => Err(SignerError::wrong_usage(
            "Certificate can be used neither for signing nor for authentication",
        )),
    }
}

fn check_key_usage(key_usage: Option<KeyUsage>, cert_usage: KeyUsage) -> Result<()> {
    match (key_usage, cert_usage) {
        (Some(KeyUsage::Signing), KeyUsage::Authentication) => Err(SignerError::wrong_usage(
            "Cannot import auth cert to sign key",
        )),
        (Some(KeyUsage::Authentication), KeyUsage::Signing) => Err(SignerError::wrong_usage(
            "Cannot import sign cert to auth key",
        )),
        _ => Ok(()),
    }
}

/// Resolve the owning key, then classify and check usage.
///
/// 先找密钥、再查重，最后才判断证书用途。
fn validate_against(state: &RegistryState, cert: &X509Certificate) -> Result<(String, KeyUsage)> {
    let key = state.find_key_for_certificate(cert)?;
    let hash = cert.hash();
    if let Ok(existing) = state.find_cert_by_hash(&hash) {
        if existing.saved_to_configuration {
            return Err(cert_exists(&hash));
        }
    }

    let usage = certificate_usage(cert)?;
    check_key_usage(key.usage, usage)?;

    if usage == KeyUsage::Authentication {
        let (token, _) = state.find_token_and_key(&key.id)?;
        if token.token_type != SOFTWARE_MODULE_TYPE {
            return Err(SignerError::wrong_usage(
                "Authentication certificates can only be imported to software tokens",
            ));
        }
    }
    Ok((key.id.clone(), usage))
}

/// Validates, links and refreshes imported certificates
pub struct CertificateImporter {
    registry: Arc<TokenRegistry>,
    globalconf: Arc<dyn GlobalConf>,
    ocsp_client: Arc<dyn OcspClient>,
}

impl CertificateImporter {
    pub fn new(
        registry: Arc<TokenRegistry>,
        globalconf: Arc<dyn GlobalConf>,
        ocsp_client: Arc<dyn OcspClient>,
    ) -> Self {
        Self {
            registry,
            globalconf,
            ocsp_client,
        }
    }

    /// Import `bytes` (PEM or DER), returning the id of the owning key
    pub async fn import_certificate(
        &self,
        bytes: &[u8],
        status: CertStatus,
        member_id: Option<ClientId>,
    ) -> Result<String> {
        let cert = X509Certificate::from_bytes(bytes).map_err(|e| {
            SignerError::incorrect_certificate(format!("Failed to parse certificate: {}", e))
        })?;

        let snapshot = self.registry.snapshot()?;
        let (_, usage) = validate_against(&snapshot, &cert)?;
        drop(snapshot);

        if !cert.is_self_signed() {
            self.verify_chain(&cert)?;
        }

        // authentication certificates are not tied to a member
        let member_id = match usage {
            KeyUsage::Authentication => None,
            KeyUsage::Signing => member_id,
        };

        let cert_id = random_id();
        let hash = cert.hash();
        let key_id = self.registry.write(|state| {
            let (key_id, _) = validate_against(state, &cert)?;

            if let Ok(unsaved) = state.find_cert_by_hash(&hash) {
                let unsaved_id = unsaved.id.clone();
                debug!("Replacing unsaved certificate '{}'", unsaved_id);
                state.remove_certificate(&unsaved_id);
            }

            state.add_certificate(
                &key_id,
                member_id.clone(),
                true,
                true,
                status,
                &cert_id,
                cert.to_der().to_vec(),
            )?;
            state.set_key_usage(&key_id, usage)?;

            let superseded = state
                .cert_request_for(&key_id, member_id.as_ref())?
                .map(|csr| csr.id.clone());
            if let Some(csr_id) = superseded {
                state.remove_cert_request(&csr_id)?;
                debug!("Removed certificate request '{}' superseded by '{}'", csr_id, cert_id);
            }
            Ok(key_id)
        })?;

        info!(
            "Imported certificate '{}' ({}) to key '{}'",
            cert_id,
            cert.subject_string(),
            key_id
        );

        if let Err(e) = self.refresh_ocsp_response(&cert).await {
            warn!("Failed to refresh OCSP response for '{}': {}", cert_id, e);
        }
        Ok(key_id)
    }

    fn verify_chain(&self, cert: &X509Certificate) -> Result<()> {
        verify_chain(
            cert,
            &self.globalconf.trust_anchors(),
            &self.globalconf.intermediates(),
            SystemTime::now(),
        )
        .map(|_| ())
        .map_err(|e| {
            SignerError::new(
                ErrorKind::Internal,
                codes::CERT_IMPORT_FAILED,
                format!("Certificate import failed: {}", e),
            )
        })
    }

    fn ocsp_verifier(&self) -> OcspVerifier {
        OcspVerifier::new(
            Duration::from_secs(self.globalconf.ocsp_freshness_seconds()),
            self.globalconf.verify_ocsp_next_update(),
        )
    }

    /// Fetch, verify and store a fresh OCSP response for `cert`
    async fn refresh_ocsp_response(&self, cert: &X509Certificate) -> Result<()> {
        let issuer = self.globalconf.issuer_of(cert).ok_or_else(|| {
            SignerError::internal(format!("Issuer of '{}' not found", cert.subject_string()))
        })?;
        let response = self.ocsp_client.fetch(cert, &issuer).await?;

        self.ocsp_verifier().verify_validity(
            &response,
            cert,
            &issuer,
            &self.globalconf.ocsp_responder_certs(),
            SystemTime::now(),
        )?;

        self.registry
            .write(|state| state.set_ocsp_response(&cert.hash(), response))
    }

    /// Refresh every certificate whose issuer is known. Returns how many were refreshed.
    pub async fn refresh_ocsp_responses(&self) -> Result<usize> {
        let certs = self.registry.read(|state| {
            state
                .all_certs()
                .map(|(_, c)| c.certificate.clone())
                .collect::<Vec<_>>()
        })?;

        let mut refreshed = 0;
        for der in certs {
            let cert = match X509Certificate::from_der(&der) {
                Ok(cert) => cert,
                Err(e) => {
                    warn!("Skipping unparsable certificate: {}", e);
                    continue;
                }
            };
            if self.globalconf.issuer_of(&cert).is_none() {
                continue;
            }
            match self.refresh_ocsp_response(&cert).await {
                Ok(()) => refreshed += 1,
                Err(e) => warn!("OCSP refresh for {} failed: {}", cert.hash(), e),
            }
        }
        Ok(refreshed)
    }

    pub fn activate_cert(&self, cert_id: &str, active: bool) -> Result<()> {
        self.registry.write(|state| state.set_cert_active(cert_id, active))?;
        info!("Certificate '{}' active = {}", cert_id, active);
        Ok(())
    }

    pub fn set_cert_status(&self, cert_id: &str, status: CertStatus) -> Result<()> {
        self.registry.write(|state| state.set_cert_status(cert_id, status))
    }

    /// Store externally fetched OCSP responses, paired with certificate hashes
    pub fn set_ocsp_responses(&self, cert_hashes: &[String], responses: Vec<Vec<u8>>) -> Result<()> {
        if cert_hashes.len() != responses.len() {
            return Err(SignerError::invalid_request(format!(
                "Got {} certificate hashes but {} OCSP responses",
                cert_hashes.len(),
                responses.len()
            )));
        }
        self.registry.write(|state| {
            for (hash, response) in cert_hashes.iter().zip(responses) {
                state.set_ocsp_response(hash, response)?;
            }
            Ok(())
        })
    }
}
