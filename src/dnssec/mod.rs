//! DNSSEC engine: key generation and storage, key-tag and DS derivation,
//! and the background RRset signing pipeline.

pub mod keys;
pub mod signer;

pub use keys::{KeyStore, StoredKey, SupportedAlgorithm};
pub use signer::SignWorker;
