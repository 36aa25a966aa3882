//! Global configuration seam: trust anchors, OCSP responders and the
//! mapping of authentication certificates to security servers

use std::{
    collections::HashMap,
    path::Path,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use signet_pki::X509Certificate;
use tracing::{debug, warn};

use crate::{
    error::{Result, SignerError},
    model::SecurityServerId,
    settings::GlobalConfCfg,
};

pub trait GlobalConf: Send + Sync {
    fn instance_identifier(&self) -> String;

    fn trust_anchors(&self) -> Vec<X509Certificate>;

    fn intermediates(&self) -> Vec<X509Certificate>;

    fn ocsp_responder_certs(&self) -> Vec<X509Certificate>;

    fn ocsp_freshness_seconds(&self) -> u64;

    fn verify_ocsp_next_update(&self) -> bool;

    /// Security server that registered this authentication certificate
    fn server_id_for_auth_cert(&self, cert: &X509Certificate) -> Option<SecurityServerId>;

    /// Issuer among the anchors and intermediates, checked by signature
    fn issuer_of(&self, cert: &X509Certificate) -> Option<X509Certificate> {
        self.trust_anchors()
            .into_iter()
            .chain(self.intermediates())
            .filter(|candidate| candidate.subject() == cert.issuer())
            .find(|candidate| cert.verify_signed_by(candidate).is_ok())
    }
}

#[derive(Debug, Default)]
struct Inner {
    instance_identifier: String,
    anchors: Vec<X509Certificate>,
    intermediates: Vec<X509Certificate>,
    responders: Vec<X509Certificate>,
    freshness_seconds: u64,
    verify_next_update: bool,
    auth_cert_servers: HashMap<String, SecurityServerId>,
}

/// In-process global configuration
#[derive(Debug, Default)]
pub struct MemoryGlobalConf {
    inner: RwLock<Inner>,
}

impl MemoryGlobalConf {
    pub fn new(instance_identifier: &str) -> Self {
        Self {
            inner: RwLock::new(Inner {
                instance_identifier: instance_identifier.to_string(),
                freshness_seconds: 3600,
                ..Inner::default()
            }),
        }
    }

    /// Build from settings, reading certificate directories when given
    pub fn from_settings(cfg: &GlobalConfCfg) -> Result<Self> {
        let conf = Self::new(&cfg.instance_identifier);
        conf.set_ocsp_freshness_seconds(cfg.ocsp_freshness_seconds);
        conf.set_verify_ocsp_next_update(cfg.verify_ocsp_next_update);

        if let Some(dir) = &cfg.anchors_dir {
            for cert in load_certificates(dir)? {
                if cert.is_self_signed() {
                    conf.add_trust_anchor(cert);
                } else {
                    conf.add_intermediate(cert);
                }
            }
        }
        if let Some(dir) = &cfg.ocsp_responders_dir {
            for cert in load_certificates(dir)? {
                conf.add_ocsp_responder(cert);
            }
        }
        for (hash, server) in &cfg.auth_cert_servers {
            conf.register_auth_cert(hash, server.parse()?);
        }
        Ok(conf)
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_trust_anchor(&self, cert: X509Certificate) {
        self.write().anchors.push(cert);
    }

    pub fn add_intermediate(&self, cert: X509Certificate) {
        self.write().intermediates.push(cert);
    }

    pub fn add_ocsp_responder(&self, cert: X509Certificate) {
        self.write().responders.push(cert);
    }

    pub fn set_ocsp_freshness_seconds(&self, seconds: u64) {
        self.write().freshness_seconds = seconds;
    }

    pub fn set_verify_ocsp_next_update(&self, verify: bool) {
        self.write().verify_next_update = verify;
    }

    /// Record that the certificate with `cert_hash` authenticates `server`
    pub fn register_auth_cert(&self, cert_hash: &str, server: SecurityServerId) {
        self.write()
            .auth_cert_servers
            .insert(cert_hash.to_ascii_lowercase(), server);
    }
}

impl GlobalConf for MemoryGlobalConf {
    fn instance_identifier(&self) -> String {
        self.read().instance_identifier.clone()
    }

    fn trust_anchors(&self) -> Vec<X509Certificate> {
        self.read().anchors.clone()
    }

    fn intermediates(&self) -> Vec<X509Certificate> {
        self.read().intermediates.clone()
    }

    fn ocsp_responder_certs(&self) -> Vec<X509Certificate> {
        self.read().responders.clone()
    }

    fn ocsp_freshness_seconds(&self) -> u64 {
        self.read().freshness_seconds
    }

    fn verify_ocsp_next_update(&self) -> bool {
        self.read().verify_next_update
    }

    fn server_id_for_auth_cert(&self, cert: &X509Certificate) -> Option<SecurityServerId> {
        self.read().auth_cert_servers.get(&cert.hash()).cloned()
    }
}

/// Every parsable certificate file in `dir`
fn load_certificates(dir: &Path) -> Result<Vec<X509Certificate>> {
    let mut certs = Vec::new();
    let mut entries = std::fs::read_dir(dir)
        .map_err(|e| SignerError::internal(format!("Cannot read {}: {}", dir.display(), e)))?
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        match X509Certificate::from_bytes(&std::fs::read(&path)?) {
            Ok(cert) => {
                debug!("Loaded certificate {} from {}", cert.subject_string(), path.display());
                certs.push(cert);
            }
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }
    Ok(certs)
}
