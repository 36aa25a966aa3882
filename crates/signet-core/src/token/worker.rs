//! 令牌工作者：每个令牌一个任务，按到达顺序逐一处理请求

use std::{sync::Arc, time::Duration};

use signet_key::SignAlgorithm;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::{BackendKey, TokenBackend};
use crate::{
    error::{codes, Result, SignerError},
    model::{CertStatus, KeyInfo, TokenStatus},
    registry::{random_id, RegistryState, TokenRegistry},
};

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Initialize { pin: String, reply: Reply<()> },
    Activate { pin: String, reply: Reply<()> },
    Deactivate { reply: Reply<()> },
    ChangePin { old_pin: String, new_pin: String, reply: Reply<()> },
    GenerateKey { label: Option<String>, reply: Reply<KeyInfo> },
    Sign { key_id: String, algorithm: SignAlgorithm, digest: Vec<u8>, reply: Reply<Vec<u8>> },
    DeleteKey { key_id: String, reply: Reply<()> },
    DeleteCert { cert_id: String, reply: Reply<()> },
    Refresh { reply: Reply<()> },
}

/// Handle to the worker task owning one token.
///
/// Cloning the handle is cheap; every clone feeds the same mailbox, so
/// requests from all clones are processed one at a time in arrival order.
#[derive(Clone)]
pub struct TokenWorker {
    token_id: String,
    sender: mpsc::Sender<Command>,
    sign_timeout: Duration,
}

impl TokenWorker {
    /// Start the worker task. The token must already be in the registry.
    pub fn spawn(
        backend: Box<dyn TokenBackend>,
        registry: Arc<TokenRegistry>,
        queue_size: usize,
        sign_timeout: Duration,
    ) -> Self {
        let token_id = backend.descriptor().token_id();
        let (sender, receiver) = mpsc::channel(queue_size.max(1));

        let state = WorkerState {
            token_id: token_id.clone(),
            backend: Some(backend),
            registry,
        };
        tokio::spawn(state.run(receiver));

        Self {
            token_id,
            sender,
            sign_timeout,
        }
    }

    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(command(reply))
            .await
            .map_err(|_| SignerError::internal(format!("Token worker '{}' stopped", self.token_id)))?;
        response.await.map_err(|_| {
            SignerError::internal(format!("Token worker '{}' dropped the request", self.token_id))
        })?
    }

    pub async fn initialize(&self, pin: &str) -> Result<()> {
        let pin = pin.to_string();
        self.request(|reply| Command::Initialize { pin, reply }).await
    }

    pub async fn activate(&self, pin: &str) -> Result<()> {
        let pin = pin.to_string();
        self.request(|reply| Command::Activate { pin, reply }).await
    }

    pub async fn deactivate(&self) -> Result<()> {
        self.request(|reply| Command::Deactivate { reply }).await
    }

    pub async fn change_pin(&self, old_pin: &str, new_pin: &str) -> Result<()> {
        let (old_pin, new_pin) = (old_pin.to_string(), new_pin.to_string());
        self.request(|reply| Command::ChangePin { old_pin, new_pin, reply })
            .await
    }

    pub async fn generate_key(&self, label: Option<&str>) -> Result<KeyInfo> {
        let label = label.map(str::to_string);
        self.request(|reply| Command::GenerateKey { label, reply }).await
    }

    /// Sign a digest, waiting at most the configured sign timeout
    pub async fn sign(&self, key_id: &str, algorithm: SignAlgorithm, digest: Vec<u8>) -> Result<Vec<u8>> {
        let key_id = key_id.to_string();
        let request = self.request(|reply| Command::Sign {
            key_id,
            algorithm,
            digest,
            reply,
        });
        match tokio::time::timeout(self.sign_timeout, request).await {
            Ok(result) => result,
            Err(_) => {
                error!("Signature calculation on token '{}' timed out", self.token_id);
                Err(SignerError::internal("Signature calculation timed out"))
            }
        }
    }

    pub async fn delete_key(&self, key_id: &str) -> Result<()> {
        let key_id = key_id.to_string();
        self.request(|reply| Command::DeleteKey { key_id, reply }).await
    }

    pub async fn delete_cert(&self, cert_id: &str) -> Result<()> {
        let cert_id = cert_id.to_string();
        self.request(|reply| Command::DeleteCert { cert_id, reply }).await
    }

    /// Re-read availability, initialization and, when logged in, the key list
    pub async fn refresh(&self) -> Result<()> {
        self.request(|reply| Command::Refresh { reply }).await
    }
}

struct WorkerState {
    token_id: String,
    backend: Option<Box<dyn TokenBackend>>,
    registry: Arc<TokenRegistry>,
}

impl WorkerState {
    async fn run(mut self, mut receiver: mpsc::Receiver<Command>) {
        debug!("Token worker '{}' started", self.token_id);
        while let Some(command) = receiver.recv().await {
            self.handle(command).await;
        }
        debug!("Token worker '{}' stopped", self.token_id);
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Initialize { pin, reply } => {
                let result = self.initialize(pin).await;
                respond(reply, result);
            }
            Command::Activate { pin, reply } => {
                let result = self.activate(pin).await;
                respond(reply, result);
            }
            Command::Deactivate { reply } => {
                let result = self.deactivate().await;
                respond(reply, result);
            }
            Command::ChangePin { old_pin, new_pin, reply } => {
                let result = self.change_pin(old_pin, new_pin).await;
                respond(reply, result);
            }
            Command::GenerateKey { label, reply } => {
                let result = self.generate_key(label).await;
                respond(reply, result);
            }
            Command::Sign { key_id, algorithm, digest, reply } => {
                if reply.is_closed() {
                    warn!("Dropping sign request for key '{}', caller gave up", key_id);
                    return;
                }
                let result = self.sign(key_id, algorithm, digest).await;
                respond(reply, result);
            }
            Command::DeleteKey { key_id, reply } => {
                let result = self.delete_key(key_id).await;
                respond(reply, result);
            }
            Command::DeleteCert { cert_id, reply } => {
                let result = self.delete_cert(cert_id).await;
                respond(reply, result);
            }
            Command::Refresh { reply } => {
                let result = self.refresh().await;
                respond(reply, result);
            }
        }
    }

    /// Run `f` against the backend on a blocking thread
    async fn with_backend<T, F>(&mut self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn TokenBackend) -> Result<T> + Send + 'static,
    {
        let mut backend = self
            .backend
            .take()
            .ok_or_else(|| SignerError::internal(format!("Token '{}' backend lost", self.token_id)))?;

        let (backend, result) = tokio::task::spawn_blocking(move || {
            let result = f(backend.as_mut());
            (backend, result)
        })
        .await
        .map_err(|e| SignerError::internal(format!("Token operation failed: {}", e)))?;

        self.backend = Some(backend);
        result
    }

    fn require_active(&self) -> Result<()> {
        if self.registry.is_token_active(&self.token_id)? {
            Ok(())
        } else {
            Err(SignerError::token_not_active(&self.token_id))
        }
    }

    async fn initialize(&mut self, pin: String) -> Result<()> {
        self.with_backend({
            let pin = pin.clone();
            move |backend| backend.initialize(&pin)
        })
        .await?;
        info!("Token '{}' initialized", self.token_id);
        self.activate(pin).await
    }

    async fn activate(&mut self, pin: String) -> Result<()> {
        let initialized = self.with_backend(|backend| backend.is_initialized()).await?;
        if !initialized {
            self.registry
                .write(|s| s.set_token_status(&self.token_id, TokenStatus::NotInitialized))?;
            return Err(SignerError::token_not_initialized(&self.token_id));
        }

        let login = self
            .with_backend(move |backend| {
                backend.login(&pin)?;
                backend.list_keys()
            })
            .await;

        match login {
            Ok(keys) => {
                self.registry.write(|s| {
                    s.set_token_status(&self.token_id, TokenStatus::Ok)?;
                    s.set_token_available(&self.token_id, true)?;
                    s.set_token_active(&self.token_id, true)?;
                    sync_keys(s, &self.token_id, keys)
                })?;
                info!("Token '{}' activated", self.token_id);
                Ok(())
            }
            Err(err) => {
                if err.code == codes::PIN_INCORRECT {
                    warn!("Incorrect PIN for token '{}'", self.token_id);
                    self.registry.write(|s| {
                        s.set_token_status(&self.token_id, TokenStatus::UserPinIncorrect)?;
                        s.set_token_active(&self.token_id, false)
                    })?;
                }
                Err(err)
            }
        }
    }

    async fn deactivate(&mut self) -> Result<()> {
        self.with_backend(|backend| {
            backend.logout();
            Ok(())
        })
        .await?;
        self.registry.write(|s| {
            s.set_token_active(&self.token_id, false)?;
            s.set_token_keys_available(&self.token_id, false)
        })?;
        info!("Token '{}' deactivated", self.token_id);
        Ok(())
    }

    async fn change_pin(&mut self, old_pin: String, new_pin: String) -> Result<()> {
        let result = self
            .with_backend(move |backend| backend.change_pin(&old_pin, &new_pin))
            .await;
        if let Err(err) = &result {
            if err.code == codes::PIN_INCORRECT {
                self.registry
                    .write(|s| s.set_token_status(&self.token_id, TokenStatus::UserPinIncorrect))?;
            }
        }
        result
    }

    async fn generate_key(&mut self, label: Option<String>) -> Result<KeyInfo> {
        self.require_active()?;
        let generated = self
            .with_backend(move |backend| backend.generate_key(label.as_deref()))
            .await?;

        let key = key_info(generated);
        self.registry.write(|s| s.add_key(&self.token_id, key.clone()).map(|_| ()))?;
        info!("Generated key '{}' on token '{}'", key.id, self.token_id);
        Ok(key)
    }

    async fn sign(&mut self, key_id: String, algorithm: SignAlgorithm, digest: Vec<u8>) -> Result<Vec<u8>> {
        self.require_active()?;
        if !self.registry.is_key_available(&key_id)? {
            return Err(SignerError::key_not_available(&key_id));
        }
        debug!("Signing with key '{}' ({})", key_id, algorithm);
        self.with_backend(move |backend| backend.sign_digest(&key_id, algorithm, &digest))
            .await
    }

    async fn delete_key(&mut self, key_id: String) -> Result<()> {
        self.require_active()?;
        {
            let key_id = key_id.clone();
            self.with_backend(move |backend| backend.delete_key(&key_id)).await?;
        }
        self.registry.write(|s| s.remove_key(&key_id).map(|_| ()))?;
        info!("Deleted key '{}' from token '{}'", key_id, self.token_id);
        Ok(())
    }

    /// Remove the certificate from the token first, then from the registry
    async fn delete_cert(&mut self, cert_id: String) -> Result<()> {
        self.require_active()?;
        let (key_id, certificate) = self.registry.read(|s| {
            let key = s.find_key_for_cert(&cert_id)?;
            let cert = s.find_cert(&cert_id)?;
            Ok::<_, SignerError>((key.id.clone(), cert.certificate.clone()))
        })??;

        self.with_backend(move |backend| backend.delete_cert(&key_id, &certificate))
            .await?;

        if self.registry.write(|s| Ok(s.remove_certificate(&cert_id)))? {
            info!("Deleted certificate '{}' from token '{}'", cert_id, self.token_id);
            Ok(())
        } else {
            Err(SignerError::cert_not_found(&cert_id))
        }
    }

    async fn refresh(&mut self) -> Result<()> {
        let (initialized, keys) = self
            .with_backend(|backend| {
                let initialized = backend.is_initialized()?;
                let keys = if backend.is_logged_in() {
                    Some(backend.list_keys()?)
                } else {
                    None
                };
                Ok((initialized, keys))
            })
            .await?;

        self.registry.write(|s| {
            s.set_token_available(&self.token_id, true)?;
            if !initialized {
                s.set_token_status(&self.token_id, TokenStatus::NotInitialized)?;
            } else if s.find_token(&self.token_id)?.status == TokenStatus::NotInitialized {
                s.set_token_status(&self.token_id, TokenStatus::Ok)?;
            }
            match keys {
                Some(keys) => sync_keys(s, &self.token_id, keys),
                None => {
                    s.set_token_active(&self.token_id, false)?;
                    s.set_token_keys_available(&self.token_id, false)
                }
            }
        })
    }
}

fn respond<T>(reply: Reply<T>, result: Result<T>) {
    if let Err(err) = &result {
        debug!("Token request failed: {}", err);
    }
    // the caller may have timed out already
    let _ = reply.send(result);
}

fn key_info(key: BackendKey) -> KeyInfo {
    let mut info = KeyInfo::new(key.id, key.algorithm.sign_mechanism());
    info.label = key.label;
    info.public_key = key.public_key;
    info.available = true;
    info
}

/// Mirror the backend key list into the registry.
///
/// 令牌上发现的新证书以未保存、未激活的状态登记。
fn sync_keys(state: &mut RegistryState, token_id: &str, keys: Vec<BackendKey>) -> Result<()> {
    state.set_token_keys_available(token_id, false)?;
    for mut key in keys {
        let certs = std::mem::take(&mut key.certs);
        let key_id = key.id.clone();
        if state.find_token(token_id)?.key(&key.id).is_some() {
            state.set_key_available(&key.id, true)?;
            state.set_key_label(&key.id, key.label)?;
            if let Some(public_key) = &key.public_key {
                state.set_public_key(&key.id, public_key)?;
            }
        } else {
            debug!("Found new key '{}' on token '{}'", key.id, token_id);
            state.add_key(token_id, key_info(key))?;
        }

        for certificate in certs {
            let hash = signet_key::hash::sha1_hex(&certificate);
            if state.find_cert_by_hash(&hash).is_ok() {
                continue;
            }
            debug!("Found new certificate for key '{}'", key_id);
            state.add_certificate(&key_id, None, false, false, CertStatus::Saved, &random_id(), certificate)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use signet_key::{KeyAlgorithm, DigestAlgorithm};
    use tempfile::TempDir;

    use super::*;
    use crate::{
        error::ErrorKind,
        token::{ModuleToken, SoftwareToken, TokenDescriptor},
    };

    fn registry_for(descriptor: &TokenDescriptor) -> Arc<TokenRegistry> {
        let registry = Arc::new(TokenRegistry::new());
        registry
            .write(|s| {
                s.add_token(descriptor.to_token_info());
                Ok(())
            })
            .unwrap();
        registry
    }

    /// Backend that records digests and can stall before signing
    struct RecordingBackend {
        descriptor: TokenDescriptor,
        delay: Duration,
        signed: Arc<Mutex<Vec<Vec<u8>>>>,
        logged_in: bool,
    }

    impl TokenBackend for RecordingBackend {
        fn descriptor(&self) -> &TokenDescriptor {
            &self.descriptor
        }
        fn is_initialized(&self) -> Result<bool> {
            Ok(true)
        }
        fn initialize(&mut self, _pin: &str) -> Result<()> {
            Ok(())
        }
        fn login(&mut self, _pin: &str) -> Result<()> {
            self.logged_in = true;
            Ok(())
        }
        fn logout(&mut self) {
            self.logged_in = false;
        }
        fn is_logged_in(&self) -> bool {
            self.logged_in
        }
        fn change_pin(&mut self, _old: &str, _new: &str) -> Result<()> {
            Ok(())
        }
        fn list_keys(&self) -> Result<Vec<BackendKey>> {
            Ok(vec![BackendKey {
                id: "K".into(),
                label: None,
                algorithm: KeyAlgorithm::EcP256,
                public_key: None,
                certs: Vec::new(),
            }])
        }
        fn generate_key(&mut self, _label: Option<&str>) -> Result<BackendKey> {
            Err(SignerError::unsupported("no"))
        }
        fn delete_key(&mut self, _key_id: &str) -> Result<()> {
            Ok(())
        }
        fn sign_digest(&mut self, _key_id: &str, _alg: SignAlgorithm, digest: &[u8]) -> Result<Vec<u8>> {
            std::thread::sleep(self.delay);
            self.signed.lock().unwrap().push(digest.to_vec());
            Ok(digest.to_vec())
        }
    }

    fn recording(delay: Duration) -> (RecordingBackend, Arc<Mutex<Vec<Vec<u8>>>>) {
        let signed = Arc::new(Mutex::new(Vec::new()));
        let backend = RecordingBackend {
            descriptor: TokenDescriptor::module("rec", "1", None, 0),
            delay,
            signed: signed.clone(),
            logged_in: false,
        };
        (backend, signed)
    }

    #[tokio::test]
    async fn test_software_token_lifecycle() {
        let dir = TempDir::new().unwrap();
        let backend = SoftwareToken::new(dir.path(), KeyAlgorithm::EcP256).with_pin_iterations(1_000);
        let registry = registry_for(backend.descriptor());
        let worker = TokenWorker::spawn(Box::new(backend), registry.clone(), 8, Duration::from_secs(10));

        worker.refresh().await.unwrap();
        assert_eq!(registry.find_token("0").unwrap().status, TokenStatus::NotInitialized);

        let err = worker.activate("1234").await.unwrap_err();
        assert_eq!(err.code, codes::TOKEN_NOT_INITIALIZED);
        assert_eq!(
            worker.generate_key(None).await.unwrap_err().code,
            codes::TOKEN_NOT_ACTIVE
        );

        worker.initialize("1234").await.unwrap();
        let token = registry.find_token("0").unwrap();
        assert!(token.active);
        assert_eq!(token.status, TokenStatus::Ok);

        let key = worker.generate_key(Some("first")).await.unwrap();
        assert!(registry.is_key_available(&key.id).unwrap());
        assert_eq!(key.sign_mechanism, "CKM_ECDSA");

        worker.deactivate().await.unwrap();
        assert!(!registry.is_token_active("0").unwrap());
        assert!(!registry.is_key_available(&key.id).unwrap());

        let err = worker.activate("0000").await.unwrap_err();
        assert_eq!(err.code, codes::PIN_INCORRECT);
        assert_eq!(registry.find_token("0").unwrap().status, TokenStatus::UserPinIncorrect);

        worker.activate("1234").await.unwrap();
        assert!(registry.is_key_available(&key.id).unwrap());
        assert_eq!(registry.find_token("0").unwrap().status, TokenStatus::Ok);

        let digest = DigestAlgorithm::Sha256.digest(b"abc");
        let signature = worker
            .sign(&key.id, SignAlgorithm::Sha256WithEcdsa, digest)
            .await
            .unwrap();
        assert!(!signature.is_empty());

        worker.delete_key(&key.id).await.unwrap();
        assert!(registry.find_key(&key.id).unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_sign_requires_available_key() {
        let descriptor = TokenDescriptor::module("hsm", "5", None, 0);
        let registry = registry_for(&descriptor);
        let backend = ModuleToken::new(descriptor, "1", KeyAlgorithm::EcP256);
        let worker = TokenWorker::spawn(Box::new(backend), registry.clone(), 8, Duration::from_secs(10));

        let err = worker
            .sign("missing", SignAlgorithm::Sha256WithEcdsa, vec![0; 32])
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::TOKEN_NOT_ACTIVE);

        worker.activate("1").await.unwrap();
        let err = worker
            .sign("missing", SignAlgorithm::Sha256WithEcdsa, vec![0; 32])
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::KEY_NOT_AVAILABLE);
    }

    #[tokio::test]
    async fn test_sign_timeout() {
        let (backend, _) = recording(Duration::from_millis(500));
        let registry = registry_for(&backend.descriptor);
        let worker = TokenWorker::spawn(Box::new(backend), registry, 8, Duration::from_millis(50));
        worker.activate("any").await.unwrap();

        let err = worker
            .sign("K", SignAlgorithm::Sha256WithEcdsa, vec![1])
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(err.message, "Signature calculation timed out");
    }

    #[tokio::test]
    async fn test_requests_processed_in_order() {
        let (backend, signed) = recording(Duration::from_millis(5));
        let registry = registry_for(&backend.descriptor);
        let worker = TokenWorker::spawn(Box::new(backend), registry, 16, Duration::from_secs(10));
        worker.activate("any").await.unwrap();

        let alg = SignAlgorithm::Sha256WithEcdsa;
        let (a, b, c) = tokio::join!(
            worker.sign("K", alg, vec![1]),
            worker.sign("K", alg, vec![2]),
            worker.sign("K", alg, vec![3]),
        );
        assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (vec![1], vec![2], vec![3]));
        assert_eq!(*signed.lock().unwrap(), vec![vec![1], vec![2], vec![3]]);
    }

    #[tokio::test]
    async fn test_keys_without_public_key_are_synced() {
        let (backend, _) = recording(Duration::ZERO);
        let registry = registry_for(&backend.descriptor);
        let worker = TokenWorker::spawn(Box::new(backend), registry.clone(), 4, Duration::from_secs(1));

        worker.activate("any").await.unwrap();
        let key = registry.find_key("K").unwrap();
        assert!(key.available);
        assert!(key.public_key.is_none());
    }
}
