use thiserror::Error;

/// PKI模块的错误类型
#[derive(Error, Debug)]
pub enum PkiError {
    /// 证书相关错误
    #[error("Certificate error: {0}")]
    CertError(String),

    /// CSR相关错误
    #[error("CSR error: {0}")]
    CsrError(String),

    /// 证书链验证错误
    #[error("Chain validation error: {0}")]
    ChainError(String),

    /// OCSP 响应错误
    #[error("OCSP error: {0}")]
    OcspError(String),

    /// 证书已撤销
    #[error("Certificate revoked: {0}")]
    CertificateRevoked(String),

    /// 解析错误
    #[error("Parse error: {0}")]
    ParseError(String),

    /// 编码错误
    #[error("Encoding error: {0}")]
    EncodingError(String),

    /// 签名错误
    #[error("Signature error: {0}")]
    SignatureError(String),

    /// 证书已过期
    #[error("Certificate expired")]
    CertificateExpired,

    /// 证书尚未生效
    #[error("Certificate not yet valid")]
    CertificateNotYetValid,

    /// 密钥错误
    #[error("Key error: {0}")]
    KeyError(#[from] signet_key::Error),

    /// IO错误
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result类型别名
pub type Result<T> = std::result::Result<T, PkiError>;
