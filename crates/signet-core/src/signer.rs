//! Signer front-end: one method per protocol operation.
//!
//! Reads are answered from the [`TokenRegistry`]; anything touching private
//! keys is forwarded to the owning [`TokenWorker`]. The key configuration is
//! saved after every successful mutation.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, RwLock},
    time::{Duration, SystemTime},
};

use signet_key::{DigestAlgorithm, SignAlgorithm};
use tracing::{info, warn};

use crate::{
    certreq::{
        build_self_signed_certificate, build_signed_cert_request, encode_request,
        sign_algorithm_for, CertRequestFormat, ContentSigner,
    },
    error::{Result, SignerError},
    globalconf::GlobalConf,
    import::CertificateImporter,
    model::{
        CertStatus, CertificateInfo, ClientId, KeyInfo, KeyUsage, SecurityServerId, TokenInfo,
    },
    ocsp_client::OcspClient,
    password::PasswordStore,
    registry::{load_conf, save_conf, TokenRegistry},
    selection::KeySelector,
    settings::{Settings, SignerCfg},
    token::{ModuleToken, SoftwareToken, TokenBackend, TokenWorker, SOFTWARE_MODULE_TYPE, SOFTWARE_TOKEN_ID},
};

/// Authentication key of a security server, as handed to the TLS layer
#[derive(Debug, Clone, PartialEq)]
pub struct AuthKey {
    pub alias: String,
    /// Encrypted PKCS#8 key file, opened with [`signet_key::load_key_file`]
    /// and `password`
    pub key_store_path: PathBuf,
    pub password: String,
    pub certificate: CertificateInfo,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberSigningInfo {
    pub key_id: String,
    pub certificate: CertificateInfo,
    pub sign_mechanism: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedCertRequest {
    pub csr_id: String,
    pub request: Vec<u8>,
    pub format: CertRequestFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegeneratedCertRequest {
    pub csr_id: String,
    pub request: Vec<u8>,
    pub format: CertRequestFormat,
    pub usage: KeyUsage,
    pub member_id: Option<ClientId>,
}

/// 签名服务
pub struct Signer {
    registry: Arc<TokenRegistry>,
    workers: RwLock<HashMap<String, TokenWorker>>,
    passwords: PasswordStore,
    importer: CertificateImporter,
    selector: KeySelector,
    software_token_dir: PathBuf,
    conf_file: Option<PathBuf>,
    csr_digest: DigestAlgorithm,
    queue_size: usize,
    sign_timeout: Duration,
}

impl Signer {
    /// Front-end over `registry` without tokens. Nothing is persisted until
    /// [`Signer::persist_to`] names a file.
    pub fn new(
        cfg: &SignerCfg,
        registry: Arc<TokenRegistry>,
        globalconf: Arc<dyn GlobalConf>,
        ocsp_client: Arc<dyn OcspClient>,
    ) -> Self {
        Self {
            importer: CertificateImporter::new(registry.clone(), globalconf.clone(), ocsp_client),
            selector: KeySelector::new(registry.clone(), globalconf),
            registry,
            workers: RwLock::new(HashMap::new()),
            passwords: PasswordStore::new(),
            software_token_dir: cfg.software_token_dir.clone(),
            conf_file: None,
            csr_digest: cfg.csr_digest,
            queue_size: cfg.worker_queue_size,
            sign_timeout: cfg.sign_timeout(),
        }
    }

    pub fn persist_to(mut self, conf_file: PathBuf) -> Self {
        self.conf_file = Some(conf_file);
        self
    }

    /// Load the key configuration and bring up the software token plus every
    /// configured module. Modules are logged in with their configured PIN.
    pub async fn start(
        settings: &Settings,
        globalconf: Arc<dyn GlobalConf>,
        ocsp_client: Arc<dyn OcspClient>,
    ) -> Result<Self> {
        let cfg = &settings.signer;
        let registry = Arc::new(TokenRegistry::from_state(load_conf(&cfg.conf_file)?));
        let signer = Self::new(cfg, registry, globalconf, ocsp_client).persist_to(cfg.conf_file.clone());

        let software = SoftwareToken::new(cfg.software_token_dir.clone(), cfg.key_algorithm)
            .with_pin_iterations(cfg.pin_iterations);
        signer.register_token(Box::new(software)).await?;

        for module in &settings.modules {
            let backend = ModuleToken::new(module.descriptor(), &module.pin, cfg.key_algorithm);
            let worker = signer.register_token(Box::new(backend)).await?;
            if let Err(e) = signer.activate_token(worker.token_id(), &module.pin).await {
                warn!("Could not log in to token '{}': {}", worker.token_id(), e);
            }
        }
        Ok(signer)
    }

    pub fn registry(&self) -> &Arc<TokenRegistry> {
        &self.registry
    }

    /// Add a token to the registry and start its worker
    pub async fn register_token(&self, backend: Box<dyn TokenBackend>) -> Result<TokenWorker> {
        let token = backend.descriptor().to_token_info();
        self.registry.write(|s| Ok(s.add_token(token.clone()).id.clone()))?;

        let worker = TokenWorker::spawn(backend, self.registry.clone(), self.queue_size, self.sign_timeout);
        self.workers
            .write()
            .map_err(|e| SignerError::internal(format!("Worker table lock poisoned: {}", e)))?
            .insert(token.id.clone(), worker.clone());

        worker.refresh().await?;
        info!("Registered token '{}' ({})", token.id, token.token_type);
        Ok(worker)
    }

    fn worker(&self, token_id: &str) -> Result<TokenWorker> {
        self.workers
            .read()
            .map_err(|e| SignerError::internal(format!("Worker table lock poisoned: {}", e)))?
            .get(token_id)
            .cloned()
            .ok_or_else(|| SignerError::token_not_found(token_id))
    }

    fn save(&self) -> Result<()> {
        match &self.conf_file {
            Some(path) => self.registry.read(|s| save_conf(s, path))?,
            None => Ok(()),
        }
    }

    /// Token and key for `key_id`, requiring the key to be available
    fn available_key(&self, key_id: &str) -> Result<(TokenInfo, KeyInfo)> {
        let (token, key) = self.registry.find_token_and_key(key_id)?;
        if !key.available {
            return Err(SignerError::key_not_available(key_id));
        }
        Ok((token, key))
    }

    fn content_signer(&self, token: &TokenInfo, key: &KeyInfo) -> Result<ContentSigner> {
        let algorithm = sign_algorithm_for(key, self.csr_digest)?;
        Ok(ContentSigner::new(self.worker(&token.id)?, &key.id, algorithm))
    }

    // ---- tokens ----

    pub fn list_tokens(&self) -> Result<Vec<TokenInfo>> {
        self.registry.list_tokens()
    }

    pub fn get_token(&self, token_id: &str) -> Result<TokenInfo> {
        self.registry.find_token(token_id)
    }

    /// Set the first PIN of the software token and log in with it
    pub async fn init_software_token(&self, pin: &str) -> Result<()> {
        let worker = self.worker(SOFTWARE_TOKEN_ID)?;
        worker.initialize(pin).await?;
        self.passwords.set(SOFTWARE_TOKEN_ID, Some(pin))?;
        self.save()
    }

    pub async fn activate_token(&self, token_id: &str, pin: &str) -> Result<()> {
        self.worker(token_id)?.activate(pin).await?;
        self.passwords.set(token_id, Some(pin))?;
        self.save()
    }

    pub async fn deactivate_token(&self, token_id: &str) -> Result<()> {
        self.worker(token_id)?.deactivate().await?;
        self.passwords.set(token_id, None)
    }

    pub async fn update_token_pin(&self, token_id: &str, old_pin: &str, new_pin: &str) -> Result<()> {
        self.worker(token_id)?.change_pin(old_pin, new_pin).await?;
        if self.passwords.get(token_id)?.is_some() {
            self.passwords.set(token_id, Some(new_pin))?;
        }
        info!("PIN of token '{}' changed", token_id);
        Ok(())
    }

    pub fn set_token_friendly_name(&self, token_id: &str, name: &str) -> Result<()> {
        self.registry.write(|s| s.set_token_friendly_name(token_id, name))?;
        self.save()
    }

    // ---- keys ----

    pub async fn generate_key(&self, token_id: &str, label: &str) -> Result<KeyInfo> {
        self.registry.find_token(token_id)?;
        let key = self.worker(token_id)?.generate_key(Some(label)).await?;
        self.registry.write(|s| s.set_key_friendly_name(&key.id, label))?;
        self.save()?;
        self.registry.find_key(&key.id)
    }

    pub fn set_key_friendly_name(&self, key_id: &str, name: &str) -> Result<()> {
        self.registry.write(|s| s.set_key_friendly_name(key_id, name))?;
        self.save()
    }

    /// Remove a key from the configuration, and from the token itself when
    /// `from_device` is set
    pub async fn delete_key(&self, key_id: &str, from_device: bool) -> Result<()> {
        let (token, _) = self.registry.find_token_and_key(key_id)?;
        if from_device {
            self.worker(&token.id)?.delete_key(key_id).await?;
        } else {
            self.registry.write(|s| s.remove_key(key_id).map(|_| ()))?;
            info!("Removed key '{}' from configuration", key_id);
        }
        self.save()
    }

    /// Sign a pre-computed digest with `key_id`
    pub async fn sign(&self, key_id: &str, algorithm: SignAlgorithm, digest: Vec<u8>) -> Result<Vec<u8>> {
        let (token, _) = self.registry.find_token_and_key(key_id)?;
        self.worker(&token.id)?.sign(key_id, algorithm, digest).await
    }

    // ---- certificate requests ----

    pub async fn generate_cert_request(
        &self,
        key_id: &str,
        subject_name: &str,
        usage: KeyUsage,
        member_id: Option<ClientId>,
        format: CertRequestFormat,
    ) -> Result<GeneratedCertRequest> {
        let (token, key) = self.available_key(key_id)?;
        if usage == KeyUsage::Authentication && token.token_type != SOFTWARE_MODULE_TYPE {
            return Err(SignerError::wrong_usage(
                "Authentication cert requests can only be created under software tokens",
            ));
        }

        let signer = self.content_signer(&token, &key)?;
        let csr = build_signed_cert_request(&signer, &key, subject_name).await?;
        let request = encode_request(&csr, format)?;

        let csr_id = self
            .registry
            .write(|s| s.add_cert_request(key_id, member_id, subject_name, usage))?;
        self.save()?;

        info!("Generated certificate request '{}' for key '{}'", csr_id, key_id);
        Ok(GeneratedCertRequest {
            csr_id,
            request,
            format,
        })
    }

    /// Rebuild a pending request, reusing its subject and member
    pub async fn regenerate_cert_request(
        &self,
        csr_id: &str,
        format: CertRequestFormat,
    ) -> Result<RegeneratedCertRequest> {
        let (key_id, csr) = self
            .registry
            .read(|s| {
                s.find_key_for_cert_request(csr_id)
                    .map(|(k, c)| (k.id.clone(), c.clone()))
            })??;
        let (token, key) = self.available_key(&key_id)?;

        let signer = self.content_signer(&token, &key)?;
        let request = build_signed_cert_request(&signer, &key, &csr.subject_name).await?;

        Ok(RegeneratedCertRequest {
            csr_id: csr.id,
            request: encode_request(&request, format)?,
            format,
            usage: csr.usage,
            member_id: csr.member_id,
        })
    }

    pub fn delete_cert_request(&self, csr_id: &str) -> Result<()> {
        let key_id = self.registry.write(|s| s.remove_cert_request(csr_id))?;
        info!("Deleted certificate request '{}' of key '{}'", csr_id, key_id);
        self.save()
    }

    // ---- certificates ----

    pub async fn import_certificate(
        &self,
        certificate: &[u8],
        status: CertStatus,
        member_id: Option<ClientId>,
    ) -> Result<String> {
        let key_id = self
            .importer
            .import_certificate(certificate, status, member_id)
            .await?;
        self.save()?;
        Ok(key_id)
    }

    /// Unsaved certificates are deleted on the token side, saved ones from
    /// the configuration
    pub async fn delete_certificate(&self, cert_id: &str) -> Result<()> {
        let (token_id, saved) = self.registry.read(|s| {
            let cert = s.find_cert(cert_id)?;
            let key = s.find_key_for_cert(cert_id)?;
            let (token, _) = s.find_token_and_key(&key.id)?;
            Ok::<_, SignerError>((token.id.clone(), cert.saved_to_configuration))
        })??;

        if saved {
            if !self.registry.write(|s| Ok(s.remove_certificate(cert_id)))? {
                return Err(SignerError::cert_not_found(cert_id));
            }
        } else {
            self.worker(&token_id)?
                .delete_cert(cert_id)
                .await
                .map_err(|e| {
                    SignerError::internal(format!(
                        "Failed to delete certificate '{}' from token: {}",
                        cert_id, e.message
                    ))
                })?;
        }
        info!("Deleted certificate '{}'", cert_id);
        self.save()
    }

    /// Self-signed certificate over `key_id`, imported as registered.
    /// Returns the DER bytes.
    #[allow(clippy::too_many_arguments)]
    pub async fn generate_self_signed_certificate(
        &self,
        key_id: &str,
        common_name: &str,
        not_before: SystemTime,
        not_after: SystemTime,
        usage: KeyUsage,
        member_id: Option<ClientId>,
    ) -> Result<Vec<u8>> {
        let (token, key) = self.available_key(key_id)?;
        let signer = self.content_signer(&token, &key)?;
        let cert = build_self_signed_certificate(&signer, &key, common_name, not_before, not_after, usage)
            .await?;

        let der = cert.to_der().to_vec();
        self.import_certificate(&der, CertStatus::Registered, member_id)
            .await?;
        Ok(der)
    }

    pub fn activate_cert(&self, cert_id: &str, active: bool) -> Result<()> {
        self.importer.activate_cert(cert_id, active)?;
        self.save()
    }

    pub fn set_cert_status(&self, cert_id: &str, status: CertStatus) -> Result<()> {
        self.importer.set_cert_status(cert_id, status)?;
        self.save()
    }

    pub fn get_key_id_for_cert_hash(&self, cert_hash: &str) -> Result<String> {
        self.registry.read(|s| s.key_id_for_cert_hash(cert_hash))?
    }

    pub fn get_certificate_info_for_hash(&self, cert_hash: &str) -> Result<CertificateInfo> {
        self.registry.find_cert_by_hash(cert_hash)
    }

    pub fn get_member_certs(&self, member_id: &ClientId) -> Result<Vec<CertificateInfo>> {
        self.registry.read(|s| s.certs_for_member(member_id))
    }

    pub fn set_ocsp_responses(&self, cert_hashes: &[String], responses: Vec<Vec<u8>>) -> Result<()> {
        self.importer.set_ocsp_responses(cert_hashes, responses)?;
        self.save()
    }

    pub async fn refresh_ocsp_responses(&self) -> Result<usize> {
        let refreshed = self.importer.refresh_ocsp_responses().await?;
        self.save()?;
        Ok(refreshed)
    }

    // ---- selection ----

    pub fn get_auth_key(&self, server_id: &SecurityServerId) -> Result<AuthKey> {
        let selected = self.selector.select_auth_key(server_id)?;
        let password = self
            .passwords
            .get(&selected.token_id)?
            .ok_or_else(|| SignerError::token_not_active(&selected.token_id))?;

        Ok(AuthKey {
            key_store_path: SoftwareToken::key_store_file(&self.software_token_dir, &selected.key.id),
            alias: selected.key.id,
            password,
            certificate: selected.cert,
        })
    }

    pub fn get_member_signing_info(&self, member_id: &ClientId) -> Result<MemberSigningInfo> {
        let selected = self.selector.select_signing_key(member_id)?;
        Ok(MemberSigningInfo {
            key_id: selected.key.id,
            certificate: selected.cert,
            sign_mechanism: selected.key.sign_mechanism,
        })
    }
}
