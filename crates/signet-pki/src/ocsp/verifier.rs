use std::time::{Duration, SystemTime};

use der::Encode;
use signet_key::SignAlgorithm;

use super::{public_key_bits, sha1_octets, BasicOcspResponse, CertId, CertStatus, OcspResponse, ResponderId, SingleResponse};
use crate::{
    cert::X509Certificate,
    error::{PkiError, Result},
    oids,
};

/// Checks a cached OCSP response against a certificate and its issuer.
#[derive(Debug, Clone, Copy)]
pub struct OcspVerifier {
    /// How old `thisUpdate` may be
    pub freshness: Duration,
    /// Also reject responses whose `nextUpdate` has passed
    pub verify_next_update: bool,
}

impl OcspVerifier {
    pub fn new(freshness: Duration, verify_next_update: bool) -> Self {
        Self {
            freshness,
            verify_next_update,
        }
    }

    /// Verify validity and status; only a good status passes
    pub fn verify(
        &self,
        response_der: &[u8],
        subject: &X509Certificate,
        issuer: &X509Certificate,
        trusted_responders: &[X509Certificate],
        at: SystemTime,
    ) -> Result<()> {
        let single = self.verify_validity(response_der, subject, issuer, trusted_responders, at)?;
        match single.cert_status {
            CertStatus::Good(_) => Ok(()),
            CertStatus::Revoked(_) => Err(PkiError::CertificateRevoked(subject.subject_string())),
            CertStatus::Unknown(_) => Err(PkiError::OcspError(
                "OCSP response indicates certificate status is unknown".to_string(),
            )),
        }
    }

    /// Verify everything except the certificate status, returning the single response
    pub fn verify_validity(
        &self,
        response_der: &[u8],
        subject: &X509Certificate,
        issuer: &X509Certificate,
        trusted_responders: &[X509Certificate],
        at: SystemTime,
    ) -> Result<SingleResponse> {
        let basic = OcspResponse::from_der_bytes(response_der)?.basic()?;
        let single = basic
            .tbs_response_data
            .responses
            .first()
            .cloned()
            .ok_or_else(|| PkiError::OcspError("OCSP response contains no responses".to_string()))?;

        let expected = CertId::for_certificate(subject, issuer)?;
        if !single.cert_id.matches(&expected) {
            return Err(PkiError::OcspError(format!(
                "OCSP response does not apply to certificate (sn = {})",
                subject.serial_hex()
            )));
        }

        let responder = find_responder(&basic, issuer, trusted_responders)?.ok_or_else(|| {
            PkiError::OcspError("Could not find OCSP certificate for responder ID".to_string())
        })?;

        verify_response_signature(&basic, &responder)?;

        if !is_authorized(&responder, issuer, trusted_responders) {
            return Err(PkiError::OcspError(
                "OCSP responder is not authorized for given CA".to_string(),
            ));
        }

        // a thisUpdate later than `at` counts as age zero
        let age = at
            .duration_since(single.this_update.to_system_time())
            .unwrap_or_default();
        if age > self.freshness {
            return Err(PkiError::OcspError(format!(
                "OCSP response is too old (thisUpdate: {})",
                single.this_update.to_date_time()
            )));
        }

        if self.verify_next_update {
            if let Some(next_update) = &single.next_update {
                if next_update.to_system_time() < at {
                    return Err(PkiError::OcspError(format!(
                        "OCSP nextUpdate is too old (nextUpdate: {})",
                        next_update.to_date_time()
                    )));
                }
            }
        }

        Ok(single)
    }
}

/// Responder certificate named by the responder ID, searched among the
/// embedded certificates, the trusted responders and the issuer
fn find_responder(
    basic: &BasicOcspResponse,
    issuer: &X509Certificate,
    trusted_responders: &[X509Certificate],
) -> Result<Option<X509Certificate>> {
    let mut known = Vec::new();
    for cert in basic.certs.iter().flatten() {
        known.push(X509Certificate::from_certificate(cert.clone())?);
    }
    known.extend(trusted_responders.iter().cloned());
    known.push(issuer.clone());

    let found = match &basic.tbs_response_data.responder_id {
        ResponderId::ByName(name) => known.into_iter().find(|cert| cert.subject() == name),
        ResponderId::ByKey(hash) => {
            let mut found = None;
            for cert in known {
                if sha1_octets(public_key_bits(&cert))? == *hash {
                    found = Some(cert);
                    break;
                }
            }
            found
        }
    };
    Ok(found)
}

fn verify_response_signature(basic: &BasicOcspResponse, responder: &X509Certificate) -> Result<()> {
    let tbs = basic
        .tbs_response_data
        .to_der()
        .map_err(|e| PkiError::EncodingError(format!("Failed to encode response data: {}", e)))?;
    let algorithm = SignAlgorithm::from_oid(&basic.signature_algorithm.oid)?;
    signet_key::verify_signature(
        &responder.public_key_der()?,
        algorithm,
        &tbs,
        basic.signature.raw_bytes(),
    )
    .map_err(|_| PkiError::OcspError("Signature on OCSP response is not valid".to_string()))
}

/// The issuer itself, an explicitly trusted responder, or a certificate
/// issued by the issuer for id-kp-OCSPSigning
fn is_authorized(
    responder: &X509Certificate,
    issuer: &X509Certificate,
    trusted_responders: &[X509Certificate],
) -> bool {
    if responder == issuer || trusted_responders.iter().any(|t| t == responder) {
        return true;
    }

    responder.issuer() == issuer.subject()
        && responder.verify_signed_by(issuer).is_ok()
        && responder
            .extended_key_usage()
            .map(|ekus| ekus.contains(&oids::KP_OCSP_SIGNING))
            .unwrap_or(false)
}
