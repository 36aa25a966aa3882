//! # Signet
//!
//! Token, key and certificate management core for a signing service.
//!
//! ## Crates
//!
//! - `signet_key` - key algorithms, signing and key stores
//! - `signet_pki` - X.509 certificates, PKCS#10 requests and OCSP
//! - `signet_core` - token registry, token workers and the signer protocol

// Re-export all sub-crates
pub use signet_core;
pub use signet_key;
pub use signet_pki;
