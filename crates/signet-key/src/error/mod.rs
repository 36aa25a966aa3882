mod store;

use thiserror::Error;

/// Key 模块的错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 密钥相关错误
    #[error("Key error: {0}")]
    KeyError(String),

    /// 签名相关错误
    #[error("Signature error: {0}")]
    SignatureError(String),

    /// 算法不匹配或不支持
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// 编码/解码错误
    #[error("Encoding error: {0}")]
    EncodingError(String),

    /// PIN 错误
    #[error("PIN incorrect")]
    PinIncorrect,

    /// 无效的签名
    #[error("Invalid signature")]
    InvalidSignature,

    /// IO错误
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// 其他错误
    #[error("Other error: {0}")]
    Other(String),
}

/// Result类型别名
pub type Result<T> = std::result::Result<T, Error>;
