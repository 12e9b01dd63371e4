//! # Provider
//!
//! Capabilities supplied by the caller.

use std::future::Future;

use anyhow::{Result, bail};
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::jose::PublicKeyJwk;

/// Resolves an issuer identifier (a DID or issuer URL) to the issuer's public
/// key.
///
/// Used for SD-JWT credentials that carry no `x5c` certificate chain. Any
/// caching or retry policy belongs to the implementer.
pub trait Resolver: Send + Sync {
    /// Resolve `identifier` to a public key.
    fn resolve(&self, identifier: &str) -> impl Future<Output = Result<PublicKeyJwk>> + Send;
}

/// Message digest capability.
pub trait Hasher: Send + Sync {
    /// Digest `data` using the named algorithm (for example, `SHA-256` or
    /// `sha-256`).
    fn digest(&self, algorithm: &str, data: &[u8]) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// [`Hasher`] backed by the SHA-2 family.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sha2Hasher;

impl Hasher for Sha2Hasher {
    async fn digest(&self, algorithm: &str, data: &[u8]) -> Result<Vec<u8>> {
        let digest = match algorithm.to_ascii_lowercase().as_str() {
            "sha-256" | "sha256" => Sha256::digest(data).to_vec(),
            "sha-384" | "sha384" => Sha384::digest(data).to_vec(),
            "sha-512" | "sha512" => Sha512::digest(data).to_vec(),
            _ => bail!("unsupported digest algorithm: {algorithm}"),
        };
        Ok(digest)
    }
}
