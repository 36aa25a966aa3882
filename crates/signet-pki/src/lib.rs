//! Signet PKI - 证书、证书请求、证书链与 OCSP
//!
//! Certificates are parsed and built with `x509-cert`; signatures always go
//! through `signet-key` so the same code path serves local keys and tokens.

pub mod cert;
pub mod chain;
pub mod csr;
pub mod error;
pub mod ocsp;
pub mod oids;

// 重新导出常用类型
pub use cert::{builder::CertificateParams, classify_usage, name_attribute, CertUsage, X509Certificate};
pub use chain::{verify_chain, ChainValidator};
pub use csr::{build_unsigned, create_csr, parse_subject_name, Csr};
pub use error::{PkiError, Result};
pub use ocsp::{CertId, CertStatus, OcspResponse, OcspResponseBuilder, OcspResponseStatus, OcspVerifier};
pub use x509_cert::{name::Name, request::CertReqInfo};

/// 预导入模块，包含最常用的类型和函数
pub mod prelude {
    pub use crate::{
        cert::{builder, classify_usage, CertUsage, X509Certificate},
        csr::Csr,
        error::{PkiError, Result},
        ocsp::{OcspResponseBuilder, OcspVerifier},
    };
}
