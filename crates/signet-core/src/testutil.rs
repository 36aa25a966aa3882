//! Shared fixtures: an in-process CA with a delegated OCSP responder

use std::time::{Duration, SystemTime};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use signet_key::{KeyAlgorithm, KeyPair, KeySign, SignAlgorithm};
use signet_pki::{
    cert::builder::{self, CertificateParams},
    oids, OcspResponseBuilder, X509Certificate,
};
use x509_cert::ext::pkix::{KeyUsage as X509KeyUsage, KeyUsages};

use crate::{model::KeyUsage, ocsp_client::LocalOcspResponder};

const DAY: Duration = Duration::from_secs(86_400);
const ALG: SignAlgorithm = SignAlgorithm::Sha256WithEcdsa;

pub struct TestPki {
    pub ca: X509Certificate,
    pub ca_key: KeyPair,
    pub responder: X509Certificate,
    pub responder_key: KeyPair,
}

impl TestPki {
    pub fn new() -> Self {
        let now = SystemTime::now();
        let ca_key = KeyPair::generate(KeyAlgorithm::EcP256).unwrap();
        let ca_name = builder::parse_name("CN=Test CA,O=Signet,C=EE").unwrap();
        let params = CertificateParams::new(
            ca_name.clone(),
            ca_name,
            &ca_key.public_key_der().unwrap(),
            now - DAY,
            now + 3650 * DAY,
        )
        .unwrap()
        .with_extension(
            builder::key_usage_extension(X509KeyUsage(
                KeyUsages::KeyCertSign | KeyUsages::CRLSign,
            ))
            .unwrap(),
        )
        .with_extension(builder::basic_constraints_extension(true).unwrap());
        let ca = builder::sign_with(&params, &ca_key, ALG).unwrap();

        let responder_key = KeyPair::generate(KeyAlgorithm::EcP256).unwrap();
        let params = CertificateParams::new(
            builder::parse_name("CN=Test OCSP").unwrap(),
            ca.subject().clone(),
            &responder_key.public_key_der().unwrap(),
            now - DAY,
            now + 365 * DAY,
        )
        .unwrap()
        .with_extension(builder::extended_key_usage_extension(vec![oids::KP_OCSP_SIGNING]).unwrap());
        let responder = builder::sign_with(&params, &ca_key, ALG).unwrap();

        Self {
            ca,
            ca_key,
            responder,
            responder_key,
        }
    }

    /// CA-issued certificate over `spki_der` with extensions matching `usage`
    pub fn issue(&self, subject: &str, spki_der: &[u8], usage: KeyUsage) -> X509Certificate {
        let now = SystemTime::now();
        self.issue_valid(subject, spki_der, usage, now - DAY, now + 365 * DAY)
    }

    pub fn issue_valid(
        &self,
        subject: &str,
        spki_der: &[u8],
        usage: KeyUsage,
        not_before: SystemTime,
        not_after: SystemTime,
    ) -> X509Certificate {
        let params = CertificateParams::new(
            builder::parse_name(subject).unwrap(),
            self.ca.subject().clone(),
            spki_der,
            not_before,
            not_after,
        )
        .unwrap();
        let params = match usage {
            KeyUsage::Signing => params.with_extension(
                builder::key_usage_extension(X509KeyUsage(KeyUsages::NonRepudiation.into())).unwrap(),
            ),
            KeyUsage::Authentication => params
                .with_extension(
                    builder::key_usage_extension(X509KeyUsage(
                        KeyUsages::DigitalSignature | KeyUsages::KeyEncipherment,
                    ))
                    .unwrap(),
                )
                .with_extension(builder::extended_key_usage_extension(vec![oids::KP_CLIENT_AUTH]).unwrap()),
        };
        builder::sign_with(&params, &self.ca_key, ALG).unwrap()
    }

    /// Certificate carrying both signing and authentication usage
    pub fn issue_dual_use(&self, subject: &str, spki_der: &[u8]) -> X509Certificate {
        let now = SystemTime::now();
        let params = CertificateParams::new(
            builder::parse_name(subject).unwrap(),
            self.ca.subject().clone(),
            spki_der,
            now - DAY,
            now + DAY,
        )
        .unwrap()
        .with_extension(
            builder::key_usage_extension(X509KeyUsage(
                KeyUsages::NonRepudiation | KeyUsages::DigitalSignature,
            ))
            .unwrap(),
        );
        builder::sign_with(&params, &self.ca_key, ALG).unwrap()
    }

    /// Signing certificate for a freshly generated key
    pub fn issue_signing_cert(&self, subject: &str) -> (X509Certificate, KeyPair) {
        let key = KeyPair::generate(KeyAlgorithm::EcP256).unwrap();
        let cert = self.issue(subject, &key.public_key_der().unwrap(), KeyUsage::Signing);
        (cert, key)
    }

    /// Good OCSP response produced at `this_update`
    pub fn ocsp_good(&self, cert: &X509Certificate, this_update: SystemTime) -> Vec<u8> {
        OcspResponseBuilder::new(this_update)
            .build(cert, &self.ca, &self.responder, &self.responder_key, ALG)
            .unwrap()
    }

    pub fn ocsp_revoked(&self, cert: &X509Certificate) -> Vec<u8> {
        let now = SystemTime::now();
        OcspResponseBuilder::new(now)
            .revoked(now - DAY, None)
            .build(cert, &self.ca, &self.responder, &self.responder_key, ALG)
            .unwrap()
    }

    /// Responder answering with this PKI's delegated OCSP certificate
    pub fn local_responder(&self) -> LocalOcspResponder {
        let key = KeyPair::from_pkcs8_der(
            KeyAlgorithm::EcP256,
            &self.responder_key.to_pkcs8_der().unwrap(),
        )
        .unwrap();
        LocalOcspResponder::new(self.responder.clone(), key).unwrap()
    }
}

pub fn spki_of(public_key_base64: &str) -> Vec<u8> {
    STANDARD.decode(public_key_base64).unwrap()
}
