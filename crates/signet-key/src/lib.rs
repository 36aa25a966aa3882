//! Signet Key - key pairs, digest signing and key stores
//!
//! Private key material only leaves a [`store::KeyStore`] as a [`KeyPair`]
//! owned by the token that loaded it.

pub mod algorithm;
pub mod error;
pub mod hash;
pub mod key;
pub mod signature;
pub mod store;

// Re-export core functionality
pub use algorithm::{KeyAlgorithm, SignAlgorithm};
pub use error::{Error, Result};
pub use hash::DigestAlgorithm;
pub use key::{
    decrypt_pkcs8, decrypt_private_key, encrypt_private_key, load_key_file, KeyPair, KeySign,
    P256Key, RsaKey,
};
pub use signature::{public_key_algorithm, verify_digest, verify_signature};
pub use store::{FileKeyStore, KeyMetadata, KeyStore, MemoryKeyStore, PinRecord};
