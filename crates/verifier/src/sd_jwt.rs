//! # SD-JWT-based Verifiable Credentials (SD-JWT VC)
//!
//! This module provides verification of `dc+sd-jwt` credentials.
//!
//! An SD-JWT presentation has the form
//! `<Issuer-signed JWT>~<Disclosure 1>~...~<Disclosure N>~<optional KB-JWT>`.
//! Disclosures are hashed and referenced from the issuer-signed payload, so
//! a holder can reveal a subset of claims. The optional key binding JWT
//! (KB-JWT) proves possession of the holder key named in the `cnf` claim and
//! binds the presentation to a verifier-supplied nonce and audience.
//!
//! See <https://www.ietf.org/archive/id/draft-ietf-oauth-selective-disclosure-jwt-17.html>

mod verify;

use std::collections::HashMap;

use anyhow::{Result, anyhow, bail};
use base64ct::{Base64UrlUnpadded, Encoding};
use serde_json::{Map, Value};

pub use self::verify::{SdJwtOptions, SdJwtVerifier};
use crate::provider::Hasher;
use crate::trust::TrustContext;

/// Digest algorithm used when the payload has no `_sd_alg` claim.
pub const DEFAULT_SD_ALG: &str = "sha-256";

/// A compact SD-JWT split into its component parts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SdJwt<'a> {
    /// The issuer-signed JWT.
    pub issuer_jwt: &'a str,

    /// Encoded disclosures, in presentation order.
    pub disclosures: Vec<&'a str>,

    /// The key binding JWT, when present.
    pub kb_jwt: Option<&'a str>,

    prefix: &'a str,
}

impl<'a> SdJwt<'a> {
    /// Split a compact SD-JWT.
    ///
    /// A trailing `~` means the presentation has no key binding JWT.
    ///
    /// # Errors
    ///
    /// Returns an error if the input has no `~` separator or no issuer JWT.
    pub fn parse(compact: &'a str) -> Result<Self> {
        let Some(last) = compact.rfind('~') else {
            bail!("SD-JWT has no `~` separator");
        };
        let (prefix, kb_jwt) = (&compact[..=last], &compact[last + 1..]);

        let mut parts = compact[..last].split('~');
        let issuer_jwt = parts.next().unwrap_or_default();
        if issuer_jwt.is_empty() {
            bail!("SD-JWT is missing the issuer-signed JWT");
        }

        Ok(Self {
            issuer_jwt,
            disclosures: parts.filter(|d| !d.is_empty()).collect(),
            kb_jwt: (!kb_jwt.is_empty()).then_some(kb_jwt),
            prefix,
        })
    }

    /// The presentation without its key binding JWT, up to and including the
    /// final `~`. This is the input to the KB-JWT `sd_hash`.
    #[must_use]
    pub const fn prefix(&self) -> &'a str {
        self.prefix
    }
}

/// A decoded selective disclosure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Disclosure {
    /// The base64url encoded disclosure, as presented.
    pub encoded: String,

    /// Random salt.
    pub salt: String,

    /// Claim name. Absent for array element disclosures.
    pub name: Option<String>,

    /// Claim value.
    pub value: Value,
}

impl Disclosure {
    /// Decode a disclosure: `[salt, name, value]` for object properties or
    /// `[salt, value]` for array elements.
    ///
    /// # Errors
    ///
    /// Returns an error if the disclosure is not a base64url encoded JSON
    /// array of the expected shape.
    pub fn decode(encoded: &str) -> Result<Self> {
        let json = Base64UrlUnpadded::decode_vec(encoded)
            .map_err(|e| anyhow!("disclosure is not base64url: {e}"))?;
        let Value::Array(mut items) = serde_json::from_slice::<Value>(&json)? else {
            bail!("disclosure is not an array");
        };

        let (salt, name, value) = match items.len() {
            3 => {
                let value = items.remove(2);
                let Value::String(name) = items.remove(1) else {
                    bail!("disclosure claim name is not a string");
                };
                (items.remove(0), Some(name), value)
            }
            2 => {
                let value = items.remove(1);
                (items.remove(0), None, value)
            }
            n => bail!("disclosure has {n} elements"),
        };
        let Value::String(salt) = salt else {
            bail!("disclosure salt is not a string");
        };

        Ok(Self {
            encoded: encoded.to_string(),
            salt,
            name,
            value,
        })
    }
}

/// Compute `base64url(digest(alg, data))`, as used for disclosure digests and
/// the KB-JWT `sd_hash`.
///
/// # Errors
///
/// Returns an error if the digest algorithm is not supported.
pub async fn encoded_digest<H: Hasher>(
    trust: &TrustContext<H>, alg: &str, data: &str,
) -> Result<String> {
    let digest = trust.digest(alg, data.as_bytes()).await?;
    Ok(Base64UrlUnpadded::encode_string(&digest))
}

/// The `_sd_alg` of an issuer-signed payload.
pub(crate) fn sd_alg(claims: &Map<String, Value>) -> &str {
    claims.get("_sd_alg").and_then(Value::as_str).unwrap_or(DEFAULT_SD_ALG)
}

/// Reconstruct the disclosed claim set from the issuer-signed payload.
///
/// Each disclosure replaces the `_sd` (object property) or `{"...": digest}`
/// (array element) reference to it. Disclosures that cannot be decoded, or
/// are not referenced, are ignored.
pub(crate) async fn reconstruct<H: Hasher>(
    mut claims: Map<String, Value>, disclosures: &[&str], trust: &TrustContext<H>,
) -> Map<String, Value> {
    let alg = sd_alg(&claims).to_string();

    let mut by_digest = HashMap::new();
    for encoded in disclosures {
        let disclosure = match Disclosure::decode(encoded) {
            Ok(disclosure) => disclosure,
            Err(e) => {
                tracing::warn!("ignoring undecodable disclosure: {e:#}");
                continue;
            }
        };
        match encoded_digest(trust, &alg, encoded).await {
            Ok(digest) => {
                by_digest.insert(digest, disclosure);
            }
            Err(e) => tracing::warn!("cannot digest disclosure: {e:#}"),
        }
    }

    claims.remove("_sd_alg");
    let mut value = Value::Object(claims);
    expand(&mut value, &mut by_digest);

    for disclosure in by_digest.values() {
        tracing::warn!(name = ?disclosure.name, "ignoring unreferenced disclosure");
    }

    match value {
        Value::Object(claims) => claims,
        _ => Map::new(),
    }
}

fn expand(value: &mut Value, disclosures: &mut HashMap<String, Disclosure>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::Array(digests)) = map.remove("_sd") {
                for digest in digests.iter().filter_map(Value::as_str) {
                    let Some(disclosure) = disclosures.remove(digest) else {
                        continue;
                    };
                    match disclosure.name {
                        Some(name) if !map.contains_key(&name) => {
                            map.insert(name, disclosure.value);
                        }
                        _ => tracing::warn!("ignoring disclosure that conflicts with payload"),
                    }
                }
            }
            for value in map.values_mut() {
                expand(value, disclosures);
            }
        }
        Value::Array(items) => {
            let expanded = items
                .drain(..)
                .filter_map(|item| {
                    let Some(digest) = array_digest(&item) else {
                        return Some(item);
                    };
                    // undisclosed elements are removed
                    disclosures.remove(&digest).filter(|d| d.name.is_none()).map(|d| d.value)
                })
                .collect();
            *items = expanded;
            for item in items.iter_mut() {
                expand(item, disclosures);
            }
        }
        _ => {}
    }
}

// `{"...": "<digest>"}`
fn array_digest(item: &Value) -> Option<String> {
    let map = item.as_object()?;
    if map.len() != 1 {
        return None;
    }
    map.get("...").and_then(Value::as_str).map(ToString::to_string)
}
