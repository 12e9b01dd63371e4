//! A fixed issuer public key resolver.

use std::collections::HashMap;

use anyhow::{Result, anyhow};
use credibil_verifier::{PublicKeyJwk, Resolver};

/// Resolves issuer identifiers from a fixed set of keys.
#[derive(Clone, Debug, Default)]
pub struct StaticResolver {
    keys: HashMap<String, PublicKeyJwk>,
}

impl StaticResolver {
    /// Create an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key for `identifier`.
    #[must_use]
    pub fn with_key(mut self, identifier: impl Into<String>, jwk: PublicKeyJwk) -> Self {
        self.keys.insert(identifier.into(), jwk);
        self
    }
}

impl Resolver for StaticResolver {
    async fn resolve(&self, identifier: &str) -> Result<PublicKeyJwk> {
        self.keys.get(identifier).cloned().ok_or_else(|| anyhow!("no key for {identifier}"))
    }
}
