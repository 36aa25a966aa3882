use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use serde::Deserialize;
use signet_key::{DigestAlgorithm, KeyAlgorithm};

use crate::{
    error::{Result, SignerError},
    token::TokenDescriptor,
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub signer: SignerCfg,
    pub globalconf: GlobalConfCfg,
    pub logging: LoggingCfg,
    pub ocsp: OcspCfg,
    pub modules: Vec<ModuleCfg>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignerCfg {
    /// Software token directory (PIN record and key files)
    pub software_token_dir: PathBuf,
    /// Key configuration JSON
    pub conf_file: PathBuf,
    pub sign_timeout_secs: u64,
    pub key_algorithm: KeyAlgorithm,
    pub csr_digest: DigestAlgorithm,
    pub worker_queue_size: usize,
    /// PBKDF2 rounds for new software token PINs
    pub pin_iterations: u32,
}

impl Default for SignerCfg {
    fn default() -> Self {
        Self {
            software_token_dir: PathBuf::from("./signet/softtoken"),
            conf_file: PathBuf::from("./signet/keyconf.json"),
            sign_timeout_secs: 10,
            key_algorithm: KeyAlgorithm::Rsa2048,
            csr_digest: DigestAlgorithm::Sha256,
            worker_queue_size: 64,
            pin_iterations: signet_key::store::DEFAULT_PIN_ITERATIONS,
        }
    }
}

impl SignerCfg {
    pub fn sign_timeout(&self) -> Duration {
        Duration::from_secs(self.sign_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlobalConfCfg {
    pub instance_identifier: String,
    /// Directory of trusted CA certificates (PEM or DER)
    pub anchors_dir: Option<PathBuf>,
    /// Directory of OCSP responder certificates
    pub ocsp_responders_dir: Option<PathBuf>,
    pub ocsp_freshness_seconds: u64,
    pub verify_ocsp_next_update: bool,
    /// Certificate hash to security server id
    pub auth_cert_servers: BTreeMap<String, String>,
}

impl Default for GlobalConfCfg {
    fn default() -> Self {
        Self {
            instance_identifier: "DEV".to_string(),
            anchors_dir: None,
            ocsp_responders_dir: None,
            ocsp_freshness_seconds: 3600,
            verify_ocsp_next_update: false,
            auth_cert_servers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingCfg {
    pub level: String,
}

impl Default for LoggingCfg {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// 本地 OCSP 应答器；未配置证书时不应答
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OcspCfg {
    pub responder_cert: Option<PathBuf>,
    /// PKCS#8 key, encrypted when `responder_key_password` is set
    pub responder_key: Option<PathBuf>,
    pub responder_key_password: Option<String>,
    /// Distance of nextUpdate from thisUpdate; unset omits nextUpdate
    pub validity_secs: Option<u64>,
    /// Hex serial numbers answered as revoked
    pub revoked_serials: Vec<String>,
}

/// 模拟硬件模块
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleCfg {
    pub module_type: String,
    pub serial_number: String,
    pub label: Option<String>,
    #[serde(default)]
    pub slot_index: u32,
    pub pin: String,
    #[serde(default)]
    pub read_only: bool,
}

impl ModuleCfg {
    pub fn descriptor(&self) -> TokenDescriptor {
        let mut descriptor = TokenDescriptor::module(
            &self.module_type,
            &self.serial_number,
            self.label.as_deref(),
            self.slot_index,
        );
        descriptor.read_only = self.read_only;
        descriptor
    }
}

impl Settings {
    /// Load from a TOML file; absent sections and fields take their defaults
    pub fn load(config_path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(config_path).map_err(|e| {
            SignerError::internal(format!("Failed to read config '{}': {}", config_path, e))
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text)
            .map_err(|e| SignerError::invalid_request(format!("Invalid configuration: {}", e)))
    }
}
