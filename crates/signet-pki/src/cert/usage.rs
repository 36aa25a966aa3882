use super::X509Certificate;
use crate::{error::Result, oids};

/// What a certificate may be used for, judged from its extensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertUsage {
    Signing,
    Authentication,
    Both,
    None,
}

/// Classify a certificate.
///
/// Signing means keyUsage nonRepudiation. Authentication means EKU clientAuth
/// or one of keyUsage digitalSignature, keyEncipherment, dataEncipherment.
/// Without a keyUsage extension only clientAuth counts.
pub fn classify_usage(cert: &X509Certificate) -> Result<CertUsage> {
    let client_auth = cert
        .extended_key_usage()?
        .iter()
        .any(|oid| *oid == oids::KP_CLIENT_AUTH);

    let (signing, auth) = match cert.key_usage()? {
        Some(ku) => (
            ku.non_repudiation(),
            client_auth || ku.digital_signature() || ku.key_encipherment() || ku.data_encipherment(),
        ),
        None => (false, client_auth),
    };

    Ok(match (signing, auth) {
        (true, true) => CertUsage::Both,
        (true, false) => CertUsage::Signing,
        (false, true) => CertUsage::Authentication,
        (false, false) => CertUsage::None,
    })
}
