use super::Error;

/// 存储相关的错误扩展
impl Error {
    /// 密钥未找到错误
    pub fn key_not_found(key_id: &str) -> Self {
        Error::KeyError(format!("Key not found: {}", key_id))
    }

    /// 密钥已存在错误
    pub fn key_exists(key_id: &str) -> Self {
        Error::KeyError(format!("Key already exists: {}", key_id))
    }

    /// 序列化错误
    pub fn serialization(err: impl std::fmt::Display) -> Self {
        Error::EncodingError(format!("Serialization error: {}", err))
    }

    /// 加密错误
    pub fn encryption(err: impl std::fmt::Display) -> Self {
        Error::KeyError(format!("Encryption error: {}", err))
    }

    /// 解密错误
    pub fn decryption(err: impl std::fmt::Display) -> Self {
        Error::KeyError(format!("Decryption error: {}", err))
    }

    /// 无效配置
    pub fn invalid_configuration(msg: impl std::fmt::Display) -> Self {
        Error::Other(format!("Invalid configuration: {}", msg))
    }

    /// 锁错误
    pub fn lock_error(msg: impl std::fmt::Display) -> Self {
        Error::Other(format!("Lock error: {}", msg))
    }

    /// 密钥与算法不匹配
    pub fn algorithm_mismatch(expected: impl std::fmt::Display, actual: impl std::fmt::Display) -> Self {
        Error::UnsupportedAlgorithm(format!("expected {} key, got {}", expected, actual))
    }
}

/// 为serde_json::Error实现From trait
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::serialization(err)
    }
}
