use std::time::SystemTime;

use der::{
    asn1::{BitString, GeneralizedTime, OctetString},
    Encode,
};
use signet_key::{KeySign, SignAlgorithm};
use x509_cert::certificate::Version;

use super::{
    public_key_bits, sha1_octets, BasicOcspResponse, CertId, CertStatus, OcspResponse,
    OcspResponseStatus, ResponderId, ResponseBytes, ResponseData, RevocationReason, RevokedInfo,
    SingleResponse,
};
use crate::{
    cert::X509Certificate,
    error::{PkiError, Result},
    oids,
};

/// Produces signed basic OCSP responses for a single certificate
#[derive(Debug, Clone)]
pub struct OcspResponseBuilder {
    this_update: SystemTime,
    next_update: Option<SystemTime>,
    status: CertStatus,
    responder_by_key: bool,
    include_responder_cert: bool,
}

impl OcspResponseBuilder {
    /// Good status with `thisUpdate` and `producedAt` set to `this_update`
    pub fn new(this_update: SystemTime) -> Self {
        Self {
            this_update,
            next_update: None,
            status: CertStatus::good(),
            responder_by_key: false,
            include_responder_cert: true,
        }
    }

    pub fn status(mut self, status: CertStatus) -> Self {
        self.status = status;
        self
    }

    pub fn revoked(mut self, at: SystemTime, reason: Option<RevocationReason>) -> Self {
        // an unrepresentable time degrades to thisUpdate
        let revocation_time = generalized(at).or_else(|_| generalized(self.this_update));
        if let Ok(revocation_time) = revocation_time {
            self.status = CertStatus::Revoked(RevokedInfo {
                revocation_time,
                revocation_reason: reason,
            });
        }
        self
    }

    pub fn next_update(mut self, next_update: SystemTime) -> Self {
        self.next_update = Some(next_update);
        self
    }

    /// Identify the responder by key hash instead of by name
    pub fn responder_by_key(mut self) -> Self {
        self.responder_by_key = true;
        self
    }

    /// Leave the responder certificate out of the response
    pub fn without_certs(mut self) -> Self {
        self.include_responder_cert = false;
        self
    }

    /// DER-encoded OCSPResponse about `subject`, signed with `responder_key`
    pub fn build<K: KeySign + ?Sized>(
        &self,
        subject: &X509Certificate,
        issuer: &X509Certificate,
        responder: &X509Certificate,
        responder_key: &K,
        algorithm: SignAlgorithm,
    ) -> Result<Vec<u8>> {
        let responder_id = if self.responder_by_key {
            ResponderId::ByKey(sha1_octets(public_key_bits(responder))?)
        } else {
            ResponderId::ByName(responder.subject().clone())
        };

        let this_update = generalized(self.this_update)?;
        let tbs_response_data = ResponseData {
            version: Version::V1,
            responder_id,
            produced_at: this_update,
            responses: vec![SingleResponse {
                cert_id: CertId::for_certificate(subject, issuer)?,
                cert_status: self.status.clone(),
                this_update,
                next_update: self.next_update.map(generalized).transpose()?,
                single_extensions: None,
            }],
            response_extensions: None,
        };

        let tbs = tbs_response_data
            .to_der()
            .map_err(|e| PkiError::EncodingError(format!("Failed to encode response data: {}", e)))?;
        let signature = responder_key.sign(algorithm, &tbs)?;

        let basic = BasicOcspResponse {
            tbs_response_data,
            signature_algorithm: algorithm.algorithm_identifier(),
            signature: BitString::from_bytes(&signature)
                .map_err(|e| PkiError::EncodingError(format!("Failed to encode signature: {}", e)))?,
            certs: self
                .include_responder_cert
                .then(|| vec![responder.inner().clone()]),
        };
        let basic_der = basic
            .to_der()
            .map_err(|e| PkiError::EncodingError(format!("Failed to encode basic response: {}", e)))?;

        encode_response(OcspResponse {
            response_status: OcspResponseStatus::Successful,
            response_bytes: Some(ResponseBytes {
                response_type: oids::OCSP_BASIC,
                response: OctetString::new(basic_der)
                    .map_err(|e| PkiError::EncodingError(format!("Invalid response bytes: {}", e)))?,
            }),
        })
    }

    /// Response carrying only an error status
    pub fn unsuccessful(status: OcspResponseStatus) -> Result<Vec<u8>> {
        encode_response(OcspResponse {
            response_status: status,
            response_bytes: None,
        })
    }
}

fn encode_response(response: OcspResponse) -> Result<Vec<u8>> {
    response
        .to_der()
        .map_err(|e| PkiError::EncodingError(format!("Failed to encode OCSP response: {}", e)))
}

fn generalized(time: SystemTime) -> Result<GeneralizedTime> {
    GeneralizedTime::from_system_time(time)
        .map_err(|e| PkiError::EncodingError(format!("Time out of range: {}", e)))
}
