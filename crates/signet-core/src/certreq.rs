//! 证书请求管道：构建 PKCS#10，由令牌工作者签名，再编码为 PEM 或 DER

use std::{fmt, str::FromStr, time::SystemTime};

use serde::{Deserialize, Serialize};
use signet_key::{DigestAlgorithm, KeyAlgorithm, SignAlgorithm};
use signet_pki::{
    cert::builder,
    csr::{build_unsigned, info_der},
    parse_subject_name, Csr, X509Certificate,
};
use tracing::debug;

use crate::{
    error::{Result, SignerError},
    model::{KeyInfo, KeyUsage},
    token::TokenWorker,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CertRequestFormat {
    Pem,
    Der,
}

impl fmt::Display for CertRequestFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertRequestFormat::Pem => f.write_str("PEM"),
            CertRequestFormat::Der => f.write_str("DER"),
        }
    }
}

impl FromStr for CertRequestFormat {
    type Err = SignerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PEM" => Ok(CertRequestFormat::Pem),
            "DER" => Ok(CertRequestFormat::Der),
            _ => Err(SignerError::invalid_request(format!(
                "Unknown request format '{}'",
                s
            ))),
        }
    }
}

/// Signs to-be-signed bytes with a key held by a token worker
pub struct ContentSigner {
    worker: TokenWorker,
    key_id: String,
    algorithm: SignAlgorithm,
}

impl ContentSigner {
    pub fn new(worker: TokenWorker, key_id: &str, algorithm: SignAlgorithm) -> Self {
        Self {
            worker,
            key_id: key_id.to_string(),
            algorithm,
        }
    }

    pub fn algorithm(&self) -> SignAlgorithm {
        self.algorithm
    }

    /// Digest `data` and have the owning worker sign the digest
    pub async fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let digest = self.algorithm.digest(data);
        self.worker.sign(&self.key_id, self.algorithm, digest).await
    }
}

/// Key algorithm named by a PKCS#11 style sign mechanism
pub fn key_algorithm_for_mechanism(mechanism: &str) -> Result<KeyAlgorithm> {
    [KeyAlgorithm::Rsa2048, KeyAlgorithm::EcP256]
        .into_iter()
        .find(|alg| alg.sign_mechanism() == mechanism)
        .ok_or_else(|| SignerError::internal(format!("Unsupported sign mechanism '{}'", mechanism)))
}

/// Signature algorithm for `key` combined with `digest`
pub fn sign_algorithm_for(key: &KeyInfo, digest: DigestAlgorithm) -> Result<SignAlgorithm> {
    let key_algorithm = key_algorithm_for_mechanism(&key.sign_mechanism)?;
    Ok(SignAlgorithm::for_key(key_algorithm, digest)?)
}

fn require_public_key(key: &KeyInfo) -> Result<Vec<u8>> {
    key.public_key_der()?
        .ok_or_else(|| SignerError::internal(format!("Key '{}' has no public key", key.id)))
}

/// Build a PKCS#10 request for `key` and have `signer` sign it
pub async fn build_signed_cert_request(
    signer: &ContentSigner,
    key: &KeyInfo,
    subject_name: &str,
) -> Result<Csr> {
    let public_key = require_public_key(key)?;
    let subject = parse_subject_name(subject_name).map_err(|e| {
        SignerError::invalid_request(format!("Invalid subject name '{}': {}", subject_name, e))
    })?;

    let info = build_unsigned(&subject, &public_key)?;
    let signature = signer.sign(&info_der(&info)?).await?;
    let csr = Csr::assemble(info, signer.algorithm(), &signature)?;

    debug!("Built certificate request '{}' for key '{}'", subject_name, key.id);
    Ok(csr)
}

pub fn encode_request(csr: &Csr, format: CertRequestFormat) -> Result<Vec<u8>> {
    match format {
        CertRequestFormat::Pem => Ok(csr.to_pem()?.into_bytes()),
        CertRequestFormat::Der => Ok(csr.to_der()?),
    }
}

/// Self-signed certificate over `key`, subject = issuer = `CN=<common_name>`
pub async fn build_self_signed_certificate(
    signer: &ContentSigner,
    key: &KeyInfo,
    common_name: &str,
    not_before: SystemTime,
    not_after: SystemTime,
    usage: KeyUsage,
) -> Result<X509Certificate> {
    let public_key = require_public_key(key)?;
    let params = builder::self_signed_params(
        common_name,
        &public_key,
        not_before,
        not_after,
        usage == KeyUsage::Signing,
    )
    .map_err(|e| SignerError::invalid_request(e.to_string()))?;

    let tbs = builder::build_tbs(&params, signer.algorithm())?;
    let signature = signer.sign(&builder::tbs_der(&tbs)?).await?;
    Ok(builder::assemble(tbs, signer.algorithm(), &signature)?)
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use signet_pki::{classify_usage, CertUsage};
    use tempfile::TempDir;

    use super::*;
    use crate::{
        registry::TokenRegistry,
        token::{SoftwareToken, TokenBackend},
    };

    async fn software_key(dir: &TempDir) -> (TokenWorker, KeyInfo) {
        let backend = SoftwareToken::new(dir.path(), KeyAlgorithm::EcP256).with_pin_iterations(1_000);
        let registry = Arc::new(TokenRegistry::new());
        registry
            .write(|s| {
                s.add_token(backend.descriptor().to_token_info());
                Ok(())
            })
            .unwrap();
        let worker = TokenWorker::spawn(Box::new(backend), registry, 8, Duration::from_secs(10));
        worker.initialize("1234").await.unwrap();
        let key = worker.generate_key(None).await.unwrap();
        (worker, key)
    }

    #[test]
    fn test_format_and_mechanism() {
        assert_eq!("pem".parse::<CertRequestFormat>().unwrap(), CertRequestFormat::Pem);
        assert!("txt".parse::<CertRequestFormat>().is_err());
        assert_eq!(key_algorithm_for_mechanism("CKM_RSA_PKCS").unwrap(), KeyAlgorithm::Rsa2048);
        assert!(key_algorithm_for_mechanism("CKM_DSA").is_err());
    }

    #[tokio::test]
    async fn test_signed_request_verifies() {
        let dir = TempDir::new().unwrap();
        let (worker, key) = software_key(&dir).await;
        let algorithm = sign_algorithm_for(&key, DigestAlgorithm::Sha256).unwrap();
        let signer = ContentSigner::new(worker, &key.id, algorithm);

        let csr = build_signed_cert_request(&signer, &key, "C=EE, O=Org, CN=test").await.unwrap();
        let pem = encode_request(&csr, CertRequestFormat::Pem).unwrap();
        let parsed = Csr::from_pem(std::str::from_utf8(&pem).unwrap()).unwrap();

        parsed.verify_signature().unwrap();
        assert_eq!(parsed.subject(), &parse_subject_name("C=EE,O=Org,CN=test").unwrap());
        assert_eq!(parsed.public_key_der().unwrap(), key.public_key_der().unwrap().unwrap());

        let der = encode_request(&csr, CertRequestFormat::Der).unwrap();
        assert_eq!(Csr::from_der(&der).unwrap().to_der().unwrap(), der);
    }

    #[tokio::test]
    async fn test_missing_public_key_is_internal() {
        let dir = TempDir::new().unwrap();
        let (worker, mut key) = software_key(&dir).await;
        key.public_key = None;
        let signer = ContentSigner::new(worker, &key.id, SignAlgorithm::Sha256WithEcdsa);

        let err = build_signed_cert_request(&signer, &key, "CN=x").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Internal);
    }

    #[tokio::test]
    async fn test_self_signed_usage_bits() {
        let dir = TempDir::new().unwrap();
        let (worker, key) = software_key(&dir).await;
        let signer = ContentSigner::new(worker, &key.id, SignAlgorithm::Sha256WithEcdsa);
        let now = SystemTime::now();
        let later = now + Duration::from_secs(3600);

        let signing = build_self_signed_certificate(&signer, &key, "sign", now, later, KeyUsage::Signing)
            .await
            .unwrap();
        let ku = signing.key_usage().unwrap().unwrap();
        assert!(ku.non_repudiation() && ku.key_cert_sign());
        assert!(!ku.digital_signature());
        assert!(signing.is_ca());
        assert!(signing.is_self_signed());
        assert_eq!(classify_usage(&signing).unwrap(), CertUsage::Signing);

        let auth = build_self_signed_certificate(&signer, &key, "auth", now, later, KeyUsage::Authentication)
            .await
            .unwrap();
        let ku = auth.key_usage().unwrap().unwrap();
        assert!(ku.digital_signature());
        assert!(!ku.non_repudiation() && !ku.key_cert_sign());
        assert!(!auth.is_ca());
        auth.verify_signed_by(&auth).unwrap();
    }
}
