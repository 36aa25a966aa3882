//! Signet Core - 令牌注册表、令牌工作者与签名协议
//!
//! The [`signer::Signer`] front-end answers reads from the
//! [`registry::TokenRegistry`] and forwards private-key work to one
//! [`token::TokenWorker`] per token.

pub mod certreq;
pub mod error;
pub mod globalconf;
pub mod import;
pub mod logging;
pub mod model;
pub mod ocsp_client;
pub mod password;
pub mod registry;
pub mod selection;
pub mod settings;
pub mod signer;
pub mod token;

#[cfg(test)]
mod testutil;

pub use certreq::CertRequestFormat;
pub use error::{ErrorKind, Result, SignerError};
pub use globalconf::{GlobalConf, MemoryGlobalConf};
pub use model::{
    CertRequestInfo, CertStatus, CertificateInfo, ClientId, KeyInfo, KeyUsage, SecurityServerId,
    TokenInfo, TokenStatus,
};
pub use ocsp_client::{client_from_settings, LocalOcspResponder, NoOcspClient, OcspClient};
pub use registry::TokenRegistry;
pub use settings::Settings;
pub use signer::{AuthKey, MemberSigningInfo, Signer};
pub use token::{TokenBackend, TokenDescriptor, TokenWorker};
