//! 密钥选择：为安全服务器挑选认证密钥，为成员挑选签名密钥
//!
//! A candidate certificate has to be active, registered, inside its validity
//! window and backed by a good, fresh OCSP response. Failures on one
//! certificate are logged and skipped; the first certificate passing every
//! check wins.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use signet_pki::{OcspVerifier, X509Certificate};
use tracing::{debug, warn};

use crate::{
    error::{codes, Result, SignerError},
    globalconf::GlobalConf,
    model::{CertificateInfo, ClientId, KeyInfo, KeyUsage, SecurityServerId, TokenInfo},
    registry::{cert_belongs_to_member, TokenRegistry},
    token::SOFTWARE_MODULE_TYPE,
};

/// A key together with the certificate that qualified it
#[derive(Debug, Clone, PartialEq)]
pub struct Selected {
    pub token_id: String,
    pub key: KeyInfo,
    pub cert: CertificateInfo,
}

pub struct KeySelector {
    registry: Arc<TokenRegistry>,
    globalconf: Arc<dyn GlobalConf>,
}

impl KeySelector {
    pub fn new(registry: Arc<TokenRegistry>, globalconf: Arc<dyn GlobalConf>) -> Self {
        Self {
            registry,
            globalconf,
        }
    }

    fn verifier(&self) -> OcspVerifier {
        OcspVerifier::new(
            Duration::from_secs(self.globalconf.ocsp_freshness_seconds()),
            self.globalconf.verify_ocsp_next_update(),
        )
    }

    /// Status, validity window and OCSP checks shared by both selections
    fn check_cert(&self, info: &CertificateInfo, at: SystemTime) -> Result<X509Certificate> {
        if !info.active {
            return Err(SignerError::internal(format!("Certificate '{}' is not active", info.id)));
        }
        if !info.status.is_registered() {
            return Err(SignerError::internal(format!(
                "Certificate '{}' is not registered ({})",
                info.id, info.status
            )));
        }

        let cert = info.parse()?;
        cert.check_validity(at)?;

        let issuer = self.globalconf.issuer_of(&cert).ok_or_else(|| {
            SignerError::internal(format!("Issuer of '{}' not found", cert.subject_string()))
        })?;
        let response = info.ocsp_response.as_deref().ok_or_else(|| {
            SignerError::internal(format!("Certificate '{}' has no OCSP response", info.id))
        })?;
        self.verifier().verify(
            response,
            &cert,
            &issuer,
            &self.globalconf.ocsp_responder_certs(),
            at,
        )?;
        Ok(cert)
    }

    /// Authentication key of `server`. Only software tokens are searched.
    pub fn select_auth_key(&self, server: &SecurityServerId) -> Result<Selected> {
        let tokens = self.registry.list_tokens()?;
        let now = SystemTime::now();

        for token in tokens.iter().filter(|t| t.token_type == SOFTWARE_MODULE_TYPE) {
            for key in candidate_keys(token, KeyUsage::Authentication) {
                for info in &key.certs {
                    let result = self.check_cert(info, now).and_then(|cert| {
                        match self.globalconf.server_id_for_auth_cert(&cert) {
                            Some(owner) if owner == *server => Ok(()),
                            other => Err(SignerError::internal(format!(
                                "Authentication certificate belongs to {:?}",
                                other.map(|s| s.to_string())
                            ))),
                        }
                    });
                    match result {
                        Ok(()) => {
                            debug!("Selected auth key '{}' for {}", key.id, server);
                            return Ok(selected(token, key, info));
                        }
                        Err(e) => warn!("Ignoring authentication certificate '{}': {}", info.id, e),
                    }
                }
            }
        }

        Err(SignerError::not_found(
            codes::KEY_NOT_FOUND,
            format!(
                "Could not find active authentication key for security server '{}'",
                server
            ),
        ))
    }

    /// Signing key of `member`, searched across every token.
    ///
    /// Certificates on inactive tokens still count as known, so such a
    /// member gets "no suitable certificates" rather than "unknown member".
    pub fn select_signing_key(&self, member: &ClientId) -> Result<Selected> {
        let tokens = self.registry.list_tokens()?;
        let now = SystemTime::now();
        let mut has_certs = false;

        for token in &tokens {
            for key in &token.keys {
                let usable = token.active && key.available && key.usage == Some(KeyUsage::Signing);
                for info in key.certs.iter().filter(|c| cert_belongs_to_member(c, member)) {
                    has_certs = true;
                    if !usable {
                        debug!("Skipping certificate '{}' on unusable key '{}'", info.id, key.id);
                        continue;
                    }
                    match self.check_cert(info, now) {
                        Ok(_) => {
                            debug!("Selected signing key '{}' for {}", key.id, member);
                            return Ok(selected(token, key, info));
                        }
                        Err(e) => warn!("Ignoring signing certificate '{}': {}", info.id, e),
                    }
                }
            }
        }

        if has_certs {
            Err(SignerError::internal(format!(
                "Member '{}' has no suitable certificates",
                member
            )))
        } else {
            Err(SignerError::not_found(
                codes::UNKNOWN_MEMBER,
                format!("Unknown member '{}'", member),
            ))
        }
    }
}

fn candidate_keys(token: &TokenInfo, usage: KeyUsage) -> impl Iterator<Item = &KeyInfo> {
    token
        .keys
        .iter()
        .filter(move |k| k.available && k.usage == Some(usage))
}

fn selected(token: &TokenInfo, key: &KeyInfo, cert: &CertificateInfo) -> Selected {
    Selected {
        token_id: token.id.clone(),
        key: key.clone(),
        cert: cert.clone(),
    }
}
