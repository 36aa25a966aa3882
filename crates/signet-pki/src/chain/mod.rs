use std::time::SystemTime;

use crate::{
    cert::X509Certificate,
    error::{PkiError, Result},
};

/// 证书链验证器
#[derive(Debug, Clone)]
pub struct ChainValidator {
    /// 信任的根证书列表
    trusted_roots: Vec<X509Certificate>,
    /// 可用于建链的中间证书
    intermediates: Vec<X509Certificate>,
    /// 最大证书链深度
    max_chain_depth: usize,
}

impl Default for ChainValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainValidator {
    /// 创建新的验证器
    pub fn new() -> Self {
        Self {
            trusted_roots: Vec::new(),
            intermediates: Vec::new(),
            max_chain_depth: 8,
        }
    }

    /// 添加信任的根证书
    pub fn add_trusted_root(&mut self, root: X509Certificate) {
        self.trusted_roots.push(root);
    }

    pub fn add_intermediate(&mut self, cert: X509Certificate) {
        self.intermediates.push(cert);
    }

    /// 设置最大证书链深度
    pub fn set_max_chain_depth(&mut self, depth: usize) {
        self.max_chain_depth = depth;
    }

    /// Build and verify the path from `cert` to a trusted root.
    ///
    /// Returns the path leaf first, root last.
    pub fn validate(&self, cert: &X509Certificate, at: SystemTime) -> Result<Vec<X509Certificate>> {
        let mut path = vec![cert.clone()];

        loop {
            let current = &path[path.len() - 1];
            current.check_validity(at).map_err(|e| {
                PkiError::ChainError(format!(
                    "Certificate '{}' is outside its validity period: {}",
                    current.subject_string(),
                    e
                ))
            })?;

            if let Some(root) = self.find_trusted_issuer(current) {
                root.check_validity(at).map_err(|e| {
                    PkiError::ChainError(format!(
                        "Trust anchor '{}' is outside its validity period: {}",
                        root.subject_string(),
                        e
                    ))
                })?;
                if root == current {
                    return Ok(path);
                }
                path.push(root.clone());
                return Ok(path);
            }

            if path.len() >= self.max_chain_depth {
                return Err(PkiError::ChainError(format!(
                    "Certificate chain depth exceeds maximum allowed depth {}",
                    self.max_chain_depth
                )));
            }

            let issuer = self
                .intermediates
                .iter()
                .filter(|candidate| candidate.subject() == current.issuer())
                .filter(|candidate| !path.iter().any(|p| p == *candidate))
                .find(|candidate| current.verify_signed_by(candidate).is_ok())
                .cloned()
                .ok_or_else(|| {
                    PkiError::ChainError(format!(
                        "No trusted issuer found for '{}' (issuer '{}')",
                        current.subject_string(),
                        current.issuer()
                    ))
                })?;
            path.push(issuer);
        }
    }

    fn find_trusted_issuer(&self, cert: &X509Certificate) -> Option<&X509Certificate> {
        self.trusted_roots
            .iter()
            .filter(|root| root.subject() == cert.issuer())
            .find(|root| cert.verify_signed_by(root).is_ok())
    }
}

/// Verify `cert` against `anchors`, building the path through `intermediates`
pub fn verify_chain(
    cert: &X509Certificate,
    anchors: &[X509Certificate],
    intermediates: &[X509Certificate],
    at: SystemTime,
) -> Result<Vec<X509Certificate>> {
    let mut validator = ChainValidator::new();
    for anchor in anchors {
        validator.add_trusted_root(anchor.clone());
    }
    for intermediate in intermediates {
        validator.add_intermediate(intermediate.clone());
    }
    validator.validate(cert, at)
}
