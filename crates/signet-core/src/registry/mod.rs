//! TokenRegistry - 令牌、密钥、证书与证书请求的唯一权威状态
//!
//! All state lives in one [`RegistryState`] behind one lock. Multi-step
//! mutations go through [`TokenRegistry::write`], which restores the previous
//! state when the closure fails, so a failed operation never commits halfway.

mod conf;

use std::{
    collections::BTreeMap,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
pub use conf::{load_conf, save_conf};
use signet_pki::X509Certificate;
use tracing::{debug, info, trace, warn};

use crate::{
    error::{codes, Result, SignerError},
    model::{
        CertRequestInfo, CertStatus, CertificateInfo, ClientId, KeyInfo, KeyUsage, TokenInfo,
        TokenStatus,
    },
};

/// Random registry identifier (uppercase hex without dashes)
pub fn random_id() -> String {
    uuid::Uuid::new_v4().simple().to_string().to_uppercase()
}

/// Friendly name given to a token that has none: `module_type[-serial][-label][-slot]`
pub fn default_friendly_name(token: &TokenInfo) -> String {
    let mut name = token.token_type.clone();
    if let Some(serial) = &token.serial_number {
        name.push('-');
        name.push_str(serial);
    }
    if let Some(label) = &token.label {
        name.push('-');
        name.push_str(label);
    }
    if let Some(slot) = token.slot_index {
        name.push('-');
        name.push_str(&slot.to_string());
    }
    name
}

/// True when the certificate was issued to `member` or to the member owning `member`
pub fn cert_belongs_to_member(cert: &CertificateInfo, member: &ClientId) -> bool {
    cert.member_id
        .as_ref()
        .is_some_and(|owner| owner == member || member.subsystem_contains_member(owner))
}

/// The registry content. Queries borrow, mutations take `&mut self`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryState {
    tokens: Vec<TokenInfo>,
}

impl RegistryState {
    pub fn new(tokens: Vec<TokenInfo>) -> Self {
        Self { tokens }
    }

    pub fn tokens(&self) -> &[TokenInfo] {
        &self.tokens
    }

    // ---- tokens ----

    /// Register a token, or refresh the descriptor fields of a known one
    pub fn add_token(&mut self, token: TokenInfo) -> &TokenInfo {
        let index = match self.tokens.iter().position(|t| t.id == token.id) {
            Some(index) => {
                let existing = &mut self.tokens[index];
                existing.token_type = token.token_type;
                existing.serial_number = token.serial_number;
                existing.label = token.label;
                existing.slot_index = token.slot_index;
                existing.read_only = token.read_only;
                existing.info.extend(token.info);
                index
            }
            None => {
                let mut token = token;
                if token.friendly_name.is_none() {
                    token.friendly_name = Some(default_friendly_name(&token));
                }
                info!("Added token '{}'", token.id);
                self.tokens.push(token);
                self.tokens.len() - 1
            }
        };
        &self.tokens[index]
    }

    pub fn remove_token(&mut self, token_id: &str) -> Result<TokenInfo> {
        let index = self
            .tokens
            .iter()
            .position(|t| t.id == token_id)
            .ok_or_else(|| SignerError::token_not_found(token_id))?;
        Ok(self.tokens.remove(index))
    }

    pub fn find_token(&self, token_id: &str) -> Result<&TokenInfo> {
        self.tokens
            .iter()
            .find(|t| t.id == token_id)
            .ok_or_else(|| SignerError::token_not_found(token_id))
    }

    fn token_mut(&mut self, token_id: &str) -> Result<&mut TokenInfo> {
        self.tokens
            .iter_mut()
            .find(|t| t.id == token_id)
            .ok_or_else(|| SignerError::token_not_found(token_id))
    }

    pub fn is_token_active(&self, token_id: &str) -> bool {
        self.find_token(token_id).is_ok_and(|t| t.active)
    }

    pub fn set_token_active(&mut self, token_id: &str, active: bool) -> Result<()> {
        self.token_mut(token_id)?.active = active;
        Ok(())
    }

    pub fn set_token_available(&mut self, token_id: &str, available: bool) -> Result<()> {
        self.token_mut(token_id)?.available = available;
        Ok(())
    }

    pub fn set_token_status(&mut self, token_id: &str, status: TokenStatus) -> Result<()> {
        self.token_mut(token_id)?.status = status;
        Ok(())
    }

    pub fn set_token_friendly_name(&mut self, token_id: &str, name: &str) -> Result<()> {
        self.token_mut(token_id)?.friendly_name = Some(name.to_string());
        Ok(())
    }

    pub fn set_token_info(&mut self, token_id: &str, info: BTreeMap<String, String>) -> Result<()> {
        self.token_mut(token_id)?.info = info;
        Ok(())
    }

    // ---- keys ----

    pub fn find_key(&self, key_id: &str) -> Result<&KeyInfo> {
        self.find_token_and_key(key_id).map(|(_, key)| key)
    }

    /// The key together with the token that owns it
    pub fn find_token_and_key(&self, key_id: &str) -> Result<(&TokenInfo, &KeyInfo)> {
        self.tokens
            .iter()
            .find_map(|t| t.key(key_id).map(|k| (t, k)))
            .ok_or_else(|| SignerError::key_not_found(key_id))
    }

    fn key_mut(&mut self, key_id: &str) -> Result<&mut KeyInfo> {
        self.tokens
            .iter_mut()
            .flat_map(|t| t.keys.iter_mut())
            .find(|k| k.id == key_id)
            .ok_or_else(|| SignerError::key_not_found(key_id))
    }

    pub fn is_key_available(&self, key_id: &str) -> bool {
        self.find_key(key_id).is_ok_and(|k| k.available)
    }

    pub fn add_key(&mut self, token_id: &str, key: KeyInfo) -> Result<&KeyInfo> {
        if self.find_key(&key.id).is_ok() {
            return Err(SignerError::conflict(
                codes::INTERNAL_ERROR,
                format!("Key '{}' already exists", key.id),
            ));
        }
        let token = self.token_mut(token_id)?;
        debug!("Adding key '{}' to token '{}'", key.id, token_id);
        token.keys.push(key);
        token
            .keys
            .last()
            .ok_or_else(|| SignerError::internal("Key list empty after insert"))
    }

    pub fn remove_key(&mut self, key_id: &str) -> Result<KeyInfo> {
        for token in &mut self.tokens {
            if let Some(index) = token.keys.iter().position(|k| k.id == key_id) {
                return Ok(token.keys.remove(index));
            }
        }
        Err(SignerError::key_not_found(key_id))
    }

    pub fn set_key_available(&mut self, key_id: &str, available: bool) -> Result<()> {
        self.key_mut(key_id)?.available = available;
        Ok(())
    }

    pub fn set_token_keys_available(&mut self, token_id: &str, available: bool) -> Result<()> {
        for key in &mut self.token_mut(token_id)?.keys {
            key.available = available;
        }
        Ok(())
    }

    pub fn set_key_friendly_name(&mut self, key_id: &str, name: &str) -> Result<()> {
        self.key_mut(key_id)?.friendly_name = Some(name.to_string());
        Ok(())
    }

    pub fn set_key_label(&mut self, key_id: &str, label: Option<String>) -> Result<()> {
        self.key_mut(key_id)?.label = label;
        Ok(())
    }

    pub fn set_public_key(&mut self, key_id: &str, public_key_base64: &str) -> Result<()> {
        self.key_mut(key_id)?.public_key = Some(public_key_base64.to_string());
        Ok(())
    }

    pub fn set_key_usage(&mut self, key_id: &str, usage: KeyUsage) -> Result<()> {
        self.key_mut(key_id)?.usage = Some(usage);
        Ok(())
    }

    /// Key whose public key matches the certificate, or, for keys without a
    /// public key, the key already holding these exact certificate bytes
    pub fn find_key_for_certificate(&self, cert: &X509Certificate) -> Result<&KeyInfo> {
        let cert_public_key = STANDARD.encode(cert.public_key_der()?);

        self.tokens
            .iter()
            .flat_map(|t| t.keys.iter())
            .find(|key| match &key.public_key {
                Some(public_key) => *public_key == cert_public_key,
                None => key.certs.iter().any(|c| c.certificate == cert.to_der()),
            })
            .ok_or_else(|| {
                SignerError::not_found(
                    codes::KEY_NOT_FOUND,
                    format!(
                        "Could not find key that has public key that matches the public key of certificate '{}'",
                        cert.subject_string()
                    ),
                )
            })
    }

    // ---- certificates ----

    pub fn all_certs(&self) -> impl Iterator<Item = (&KeyInfo, &CertificateInfo)> {
        self.tokens
            .iter()
            .flat_map(|t| t.keys.iter())
            .flat_map(|k| k.certs.iter().map(move |c| (k, c)))
    }

    pub fn find_cert(&self, cert_id: &str) -> Result<&CertificateInfo> {
        self.all_certs()
            .find(|(_, c)| c.id == cert_id)
            .map(|(_, c)| c)
            .ok_or_else(|| SignerError::cert_not_found(cert_id))
    }

    /// Owning key of the certificate with id `cert_id`
    pub fn find_key_for_cert(&self, cert_id: &str) -> Result<&KeyInfo> {
        self.all_certs()
            .find(|(_, c)| c.id == cert_id)
            .map(|(k, _)| k)
            .ok_or_else(|| SignerError::cert_not_found(cert_id))
    }

    pub fn find_cert_by_hash(&self, hash: &str) -> Result<&CertificateInfo> {
        self.all_certs()
            .find(|(_, c)| c.hash().eq_ignore_ascii_case(hash))
            .map(|(_, c)| c)
            .ok_or_else(|| {
                SignerError::not_found(
                    codes::CERT_NOT_FOUND,
                    format!("Certificate with hash '{}' not found", hash),
                )
            })
    }

    pub fn key_id_for_cert_hash(&self, hash: &str) -> Result<String> {
        self.all_certs()
            .find(|(_, c)| c.hash().eq_ignore_ascii_case(hash))
            .map(|(k, _)| k.id.clone())
            .ok_or_else(|| {
                SignerError::not_found(
                    codes::CERT_NOT_FOUND,
                    format!("Certificate with hash '{}' not found", hash),
                )
            })
    }

    fn cert_mut(&mut self, cert_id: &str) -> Result<&mut CertificateInfo> {
        self.tokens
            .iter_mut()
            .flat_map(|t| t.keys.iter_mut())
            .flat_map(|k| k.certs.iter_mut())
            .find(|c| c.id == cert_id)
            .ok_or_else(|| SignerError::cert_not_found(cert_id))
    }

    /// Certificates issued to `member`, in registry order
    pub fn certs_for_member(&self, member: &ClientId) -> Vec<CertificateInfo> {
        self.all_certs()
            .filter(|(_, c)| cert_belongs_to_member(c, member))
            .map(|(_, c)| c.clone())
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_certificate(
        &mut self,
        key_id: &str,
        member_id: Option<ClientId>,
        active: bool,
        saved_to_configuration: bool,
        status: CertStatus,
        cert_id: &str,
        certificate: Vec<u8>,
    ) -> Result<()> {
        let hash = signet_key::hash::sha1_hex(&certificate);
        if self.find_cert_by_hash(&hash).is_ok() {
            return Err(SignerError::conflict(
                codes::CERT_EXISTS,
                format!("Certificate with hash '{}' already exists", hash),
            ));
        }

        let key = self.key_mut(key_id)?;
        key.certs.push(CertificateInfo {
            id: cert_id.to_string(),
            member_id,
            active,
            saved_to_configuration,
            status,
            certificate,
            ocsp_response: None,
        });
        debug!("Added certificate '{}' to key '{}'", cert_id, key_id);
        Ok(())
    }

    /// Returns false when no certificate had this id
    pub fn remove_certificate(&mut self, cert_id: &str) -> bool {
        for key in self.tokens.iter_mut().flat_map(|t| t.keys.iter_mut()) {
            if let Some(index) = key.certs.iter().position(|c| c.id == cert_id) {
                key.certs.remove(index);
                return true;
            }
        }
        warn!("Certificate with id {} not found", cert_id);
        false
    }

    pub fn set_cert_active(&mut self, cert_id: &str, active: bool) -> Result<()> {
        self.cert_mut(cert_id)?.active = active;
        Ok(())
    }

    pub fn set_cert_status(&mut self, cert_id: &str, status: CertStatus) -> Result<()> {
        self.cert_mut(cert_id)?.status = status;
        Ok(())
    }

    pub fn set_ocsp_response(&mut self, cert_hash: &str, response: Vec<u8>) -> Result<()> {
        let cert = self
            .tokens
            .iter_mut()
            .flat_map(|t| t.keys.iter_mut())
            .flat_map(|k| k.certs.iter_mut())
            .find(|c| c.hash().eq_ignore_ascii_case(cert_hash))
            .ok_or_else(|| {
                SignerError::not_found(
                    codes::CERT_NOT_FOUND,
                    format!("Certificate with hash '{}' not found", cert_hash),
                )
            })?;
        cert.ocsp_response = Some(response);
        Ok(())
    }

    // ---- certificate requests ----

    /// Add a CSR to the key, fixing the key usage if unset.
    ///
    /// Returns the id of an existing request with the same subject (and member,
    /// when one is given) instead of adding a duplicate.
    pub fn add_cert_request(
        &mut self,
        key_id: &str,
        member_id: Option<ClientId>,
        subject_name: &str,
        usage: KeyUsage,
    ) -> Result<String> {
        trace!("add_cert_request({}, {:?})", key_id, member_id);
        let key = self.key_mut(key_id)?;

        if let Some(existing) = key.usage {
            if existing != usage {
                return Err(SignerError::wrong_usage(format!(
                    "Cannot add {} certificate request to {} key",
                    usage, existing
                )));
            }
        }
        key.usage = Some(usage);

        let duplicate = key.cert_requests.iter().find(|csr| {
            let same_subject = csr.subject_name.eq_ignore_ascii_case(subject_name);
            match &member_id {
                None => same_subject,
                Some(member) => csr.member_id.as_ref() == Some(member) && same_subject,
            }
        });
        if let Some(duplicate) = duplicate {
            warn!(
                "Certificate request (memberId: {:?}, subjectName: {}) already exists",
                member_id, subject_name
            );
            return Ok(duplicate.id.clone());
        }

        let csr_id = random_id();
        info!(
            "Added new certificate request (memberId: {:?}, subjectName: {}) under key {}",
            member_id, subject_name, key_id
        );
        key.cert_requests.push(CertRequestInfo {
            id: csr_id.clone(),
            member_id,
            subject_name: subject_name.to_string(),
            usage,
        });
        Ok(csr_id)
    }

    /// Remove a CSR, returning the id of the key it belonged to
    pub fn remove_cert_request(&mut self, csr_id: &str) -> Result<String> {
        for key in self.tokens.iter_mut().flat_map(|t| t.keys.iter_mut()) {
            if let Some(index) = key.cert_requests.iter().position(|c| c.id == csr_id) {
                key.cert_requests.remove(index);
                return Ok(key.id.clone());
            }
        }
        Err(SignerError::csr_not_found(csr_id))
    }

    pub fn find_cert_request(&self, csr_id: &str) -> Result<&CertRequestInfo> {
        self.find_key_for_cert_request(csr_id).map(|(_, csr)| csr)
    }

    pub fn find_key_for_cert_request(&self, csr_id: &str) -> Result<(&KeyInfo, &CertRequestInfo)> {
        self.tokens
            .iter()
            .flat_map(|t| t.keys.iter())
            .find_map(|k| k.cert_requests.iter().find(|c| c.id == csr_id).map(|c| (k, c)))
            .ok_or_else(|| SignerError::csr_not_found(csr_id))
    }

    /// The pending CSR a certificate for (`key_id`, `member`) supersedes.
    ///
    /// Authentication keys have at most one owner, so any of their requests matches.
    pub fn cert_request_for(
        &self,
        key_id: &str,
        member: Option<&ClientId>,
    ) -> Result<Option<&CertRequestInfo>> {
        let key = self.find_key(key_id)?;
        Ok(key.cert_requests.iter().find(|csr| {
            key.usage == Some(KeyUsage::Authentication) || csr.member_id.as_ref() == member
        }))
    }
}

/// Lock-guarded [`RegistryState`] shared by every component
#[derive(Debug, Default)]
pub struct TokenRegistry {
    state: RwLock<RegistryState>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: RegistryState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    fn read_guard(&self) -> Result<RwLockReadGuard<'_, RegistryState>> {
        self.state
            .read()
            .map_err(|e| SignerError::internal(format!("Registry lock poisoned: {}", e)))
    }

    fn write_guard(&self) -> Result<RwLockWriteGuard<'_, RegistryState>> {
        self.state
            .write()
            .map_err(|e| SignerError::internal(format!("Registry lock poisoned: {}", e)))
    }

    /// Run a query under the read lock
    pub fn read<R>(&self, f: impl FnOnce(&RegistryState) -> R) -> Result<R> {
        Ok(f(&*self.read_guard()?))
    }

    /// Run a mutation under the write lock. An `Err` from `f` restores the
    /// state seen on entry.
    pub fn write<R>(&self, f: impl FnOnce(&mut RegistryState) -> Result<R>) -> Result<R> {
        let mut guard = self.write_guard()?;
        let backup = guard.clone();
        match f(&mut *guard) {
            Ok(value) => Ok(value),
            Err(err) => {
                *guard = backup;
                Err(err)
            }
        }
    }

    /// Copy of the whole state, for validation outside the lock
    pub fn snapshot(&self) -> Result<RegistryState> {
        self.read(Clone::clone)
    }

    pub fn list_tokens(&self) -> Result<Vec<TokenInfo>> {
        self.read(|s| s.tokens().to_vec())
    }

    pub fn find_token(&self, token_id: &str) -> Result<TokenInfo> {
        self.read(|s| s.find_token(token_id).cloned())?
    }

    pub fn find_key(&self, key_id: &str) -> Result<KeyInfo> {
        self.read(|s| s.find_key(key_id).cloned())?
    }

    pub fn find_token_and_key(&self, key_id: &str) -> Result<(TokenInfo, KeyInfo)> {
        self.read(|s| {
            s.find_token_and_key(key_id)
                .map(|(t, k)| (t.clone(), k.clone()))
        })?
    }

    pub fn find_cert(&self, cert_id: &str) -> Result<CertificateInfo> {
        self.read(|s| s.find_cert(cert_id).cloned())?
    }

    pub fn find_cert_by_hash(&self, hash: &str) -> Result<CertificateInfo> {
        self.read(|s| s.find_cert_by_hash(hash).cloned())?
    }

    pub fn find_cert_request(&self, csr_id: &str) -> Result<CertRequestInfo> {
        self.read(|s| s.find_cert_request(csr_id).cloned())?
    }

    pub fn is_key_available(&self, key_id: &str) -> Result<bool> {
        self.read(|s| s.is_key_available(key_id))
    }

    pub fn is_token_active(&self, token_id: &str) -> Result<bool> {
        self.read(|s| s.is_token_active(token_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn state_with_key(usage: Option<KeyUsage>) -> RegistryState {
        let mut state = RegistryState::default();
        state.add_token(TokenInfo::new("0", "softToken"));
        let mut key = KeyInfo::new("K1", "CKM_ECDSA");
        key.usage = usage;
        key.available = true;
        state.add_key("0", key).unwrap();
        state
    }

    fn member() -> ClientId {
        ClientId::member("EE", "GOV", "1234")
    }

    #[test]
    fn test_default_friendly_name() {
        let mut token = TokenInfo::new("hsm-1-0", "hsm");
        assert_eq!(default_friendly_name(&token), "hsm");

        token.serial_number = Some("1".into());
        token.label = Some("prod".into());
        token.slot_index = Some(0);
        assert_eq!(default_friendly_name(&token), "hsm-1-prod-0");

        let mut state = RegistryState::default();
        assert_eq!(state.add_token(token).friendly_name.as_deref(), Some("hsm-1-prod-0"));
    }

    #[test]
    fn test_add_token_is_upsert() {
        let mut state = state_with_key(None);
        state.set_token_active("0", true).unwrap();

        let mut again = TokenInfo::new("0", "softToken");
        again.read_only = true;
        state.add_token(again);

        assert_eq!(state.tokens().len(), 1);
        let token = state.find_token("0").unwrap();
        assert!(token.read_only);
        assert!(token.active);
        assert_eq!(token.keys.len(), 1);
    }

    #[test]
    fn test_lookups_fail_with_not_found() {
        let state = state_with_key(None);
        assert_eq!(state.find_token("x").unwrap_err().code, codes::TOKEN_NOT_FOUND);
        assert_eq!(state.find_key("x").unwrap_err().code, codes::KEY_NOT_FOUND);
        assert_eq!(state.find_cert("x").unwrap_err().code, codes::CERT_NOT_FOUND);
        assert_eq!(state.find_cert_request("x").unwrap_err().code, codes::CSR_NOT_FOUND);
        assert_eq!(state.find_token_and_key("K1").unwrap().0.id, "0");
    }

    #[test]
    fn test_cert_request_fixes_usage() {
        let mut state = state_with_key(None);
        let id = state
            .add_cert_request("K1", Some(member()), "CN=test", KeyUsage::Signing)
            .unwrap();
        assert_eq!(state.find_key("K1").unwrap().usage, Some(KeyUsage::Signing));
        assert_eq!(state.find_cert_request(&id).unwrap().subject_name, "CN=test");

        let err = state
            .add_cert_request("K1", None, "CN=other", KeyUsage::Authentication)
            .unwrap_err();
        assert_eq!(err.code, codes::WRONG_CERT_USAGE);
        assert_eq!(state.find_key("K1").unwrap().usage, Some(KeyUsage::Signing));
        assert_eq!(state.find_key("K1").unwrap().cert_requests.len(), 1);
    }

    #[test]
    fn test_cert_request_deduplication() {
        let mut state = state_with_key(None);
        let first = state
            .add_cert_request("K1", Some(member()), "CN=Test", KeyUsage::Signing)
            .unwrap();

        let same = state
            .add_cert_request("K1", Some(member()), "cn=test", KeyUsage::Signing)
            .unwrap();
        assert_eq!(first, same);

        // no member matches any request with the same subject
        let anonymous = state.add_cert_request("K1", None, "CN=TEST", KeyUsage::Signing).unwrap();
        assert_eq!(first, anonymous);

        let other_member = ClientId::member("EE", "GOV", "9999");
        let different = state
            .add_cert_request("K1", Some(other_member), "CN=Test", KeyUsage::Signing)
            .unwrap();
        assert_ne!(first, different);
        assert_eq!(state.find_key("K1").unwrap().cert_requests.len(), 2);
    }

    #[test]
    fn test_remove_cert_request_returns_key() {
        let mut state = state_with_key(None);
        let id = state.add_cert_request("K1", None, "CN=a", KeyUsage::Signing).unwrap();
        assert_eq!(state.remove_cert_request(&id).unwrap(), "K1");
        assert!(state.remove_cert_request(&id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_cert_request_for_member() {
        let mut state = state_with_key(None);
        let id = state
            .add_cert_request("K1", Some(member()), "CN=a", KeyUsage::Signing)
            .unwrap();
        assert_eq!(state.cert_request_for("K1", Some(&member())).unwrap().unwrap().id, id);
        assert!(state.cert_request_for("K1", None).unwrap().is_none());

        let mut auth = state_with_key(None);
        let id = auth
            .add_cert_request("K1", None, "CN=auth", KeyUsage::Authentication)
            .unwrap();
        assert_eq!(auth.cert_request_for("K1", Some(&member())).unwrap().unwrap().id, id);
    }

    #[test]
    fn test_certificates_unique_by_hash() {
        let mut state = state_with_key(Some(KeyUsage::Signing));
        state
            .add_certificate("K1", Some(member()), true, true, CertStatus::Saved, "C1", vec![1, 2, 3])
            .unwrap();
        let err = state
            .add_certificate("K1", None, true, true, CertStatus::Saved, "C2", vec![1, 2, 3])
            .unwrap_err();
        assert_eq!(err.code, codes::CERT_EXISTS);

        let hash = signet_key::hash::sha1_hex(&[1, 2, 3]);
        assert_eq!(state.key_id_for_cert_hash(&hash).unwrap(), "K1");
        assert_eq!(state.find_cert_by_hash(&hash.to_uppercase()).unwrap().id, "C1");

        state.set_ocsp_response(&hash, vec![9]).unwrap();
        state.set_cert_status("C1", CertStatus::Registered).unwrap();
        state.set_cert_active("C1", false).unwrap();
        let cert = state.find_cert("C1").unwrap();
        assert_eq!(cert.ocsp_response, Some(vec![9]));
        assert_eq!(cert.status, CertStatus::Registered);
        assert!(!cert.active);

        assert!(state.remove_certificate("C1"));
        assert!(!state.remove_certificate("C1"));
    }

    #[test]
    fn test_cert_belongs_to_member() {
        let mut cert = CertificateInfo {
            id: "C".into(),
            member_id: Some(member()),
            active: true,
            saved_to_configuration: true,
            status: CertStatus::Registered,
            certificate: vec![],
            ocsp_response: None,
        };
        let subsystem = ClientId::subsystem("EE", "GOV", "1234", "sub");

        assert!(cert_belongs_to_member(&cert, &member()));
        assert!(cert_belongs_to_member(&cert, &subsystem));
        assert!(!cert_belongs_to_member(&cert, &ClientId::member("EE", "GOV", "1")));

        cert.member_id = None;
        assert!(!cert_belongs_to_member(&cert, &member()));
    }

    #[test]
    fn test_write_rolls_back_on_error() {
        let registry = TokenRegistry::from_state(state_with_key(None));
        let before = registry.snapshot().unwrap();

        let result: Result<()> = registry.write(|s| {
            s.add_cert_request("K1", None, "CN=a", KeyUsage::Signing)?;
            s.set_token_active("0", true)?;
            Err(SignerError::internal("boom"))
        });

        assert_eq!(result.unwrap_err().kind, ErrorKind::Internal);
        assert_eq!(registry.snapshot().unwrap(), before);
    }

    #[test]
    fn test_token_keys_availability() {
        let registry = TokenRegistry::from_state(state_with_key(None));
        registry.write(|s| s.set_token_keys_available("0", false)).unwrap();
        assert!(!registry.is_key_available("K1").unwrap());
        registry.write(|s| s.set_key_available("K1", true)).unwrap();
        assert!(registry.is_key_available("K1").unwrap());
        assert!(!registry.is_token_active("0").unwrap());
    }
}
