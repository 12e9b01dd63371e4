//! # JOSE
//!
//! JSON Web Key and compact JSON Web Signature types used to verify SD-JWT
//! credentials and key binding JWTs.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow, bail};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::key::VerifyingKey;
use crate::provider::Hasher;
use crate::trust::TrustContext;

/// A public key in JSON Web Key format ([RFC7517]).
///
/// [RFC7517]: https://www.rfc-editor.org/rfc/rfc7517
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct PublicKeyJwk {
    /// Key identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Key type.
    pub kty: KeyType,

    /// Cryptographic curve type.
    pub crv: Curve,

    /// X coordinate (base64url encoded).
    pub x: String,

    /// Y coordinate (base64url encoded). Absent for `OKP` keys.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,

    /// Algorithm intended for use with the key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
}

/// Cryptographic key type.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum KeyType {
    /// Octet key pair (Edwards curve)
    #[default]
    #[serde(rename = "OKP")]
    Okp,

    /// Elliptic curve key pair
    #[serde(rename = "EC")]
    Ec,
}

/// Cryptographic curve type.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum Curve {
    /// Ed25519 signature (DSA) key pairs.
    #[default]
    Ed25519,

    /// NIST P-256 (secp256r1) curve.
    #[serde(rename = "P-256")]
    P256,

    /// NIST P-384 (secp384r1) curve.
    #[serde(rename = "P-384")]
    P384,
}

/// Supported JWS signing algorithms.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum Algorithm {
    /// ECDSA using P-256 and SHA-256.
    #[serde(rename = "ES256")]
    Es256,

    /// ECDSA using P-384 and SHA-384.
    #[serde(rename = "ES384")]
    Es384,

    /// `EdDSA` using Ed25519.
    #[serde(rename = "EdDSA")]
    EdDsa,
}

impl FromStr for Algorithm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ES256" => Ok(Self::Es256),
            "ES384" => Ok(Self::Es384),
            "EdDSA" | "Ed25519" => Ok(Self::EdDsa),
            _ => Err(anyhow!("unsupported algorithm: {s}")),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Es256 => write!(f, "ES256"),
            Self::Es384 => write!(f, "ES384"),
            Self::EdDsa => write!(f, "EdDSA"),
        }
    }
}

/// JOSE header of a JWS.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct JwsHeader {
    /// Signing algorithm, as declared. Unsupported algorithms are preserved
    /// so they can be rejected at key import.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// Token type. For example, `dc+sd-jwt` or `kb+jwt`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,

    /// Key identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// X.509 certificate chain: base64 (not base64url) encoded DER
    /// certificates, leaf first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x5c: Option<Vec<String>>,

    /// Public key used to sign the JWS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwk: Option<PublicKeyJwk>,
}

impl JwsHeader {
    /// The declared signing algorithm.
    ///
    /// # Errors
    ///
    /// Returns an error if the algorithm is missing or unsupported.
    pub fn algorithm(&self) -> Result<Algorithm> {
        self.alg.as_deref().ok_or_else(|| anyhow!("missing `alg` header"))?.parse()
    }
}

/// A decoded, but not yet verified, compact JWS.
#[derive(Clone, Debug)]
pub struct Jws {
    /// Protected header.
    pub header: JwsHeader,

    /// Payload claims.
    pub claims: Map<String, Value>,

    signing_input: String,
    signature: Vec<u8>,
}

impl FromStr for Jws {
    type Err = anyhow::Error;

    fn from_str(compact: &str) -> Result<Self> {
        let mut parts = compact.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            bail!("JWS must have three parts");
        };

        let header_json = Base64UrlUnpadded::decode_vec(header).context("decoding JWS header")?;
        let payload_json = Base64UrlUnpadded::decode_vec(payload).context("decoding JWS payload")?;

        Ok(Self {
            header: serde_json::from_slice(&header_json).context("parsing JWS header")?,
            claims: serde_json::from_slice(&payload_json).context("parsing JWS payload")?,
            signing_input: format!("{header}.{payload}"),
            signature: Base64UrlUnpadded::decode_vec(signature)
                .context("decoding JWS signature")?,
        })
    }
}

/// Reasons a JWT can fail verification.
#[derive(Error, Debug)]
pub(crate) enum JwtError {
    /// The `exp` claim, plus clock tolerance, is in the past.
    #[error("token has expired")]
    Expired,

    /// The `nbf` claim, less clock tolerance, is in the future.
    #[error("token is not yet valid")]
    NotYetValid,

    /// The token's signature or time claims are invalid.
    #[error("token is invalid: {0}")]
    Invalid(#[from] anyhow::Error),
}

impl Jws {
    /// A string claim from the payload.
    pub fn claim_str(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }

    /// Verify the signature and the `exp`/`nbf` time claims.
    pub(crate) fn verify<H: Hasher>(
        &self, key: &VerifyingKey, trust: &TrustContext<H>,
    ) -> Result<(), JwtError> {
        let algorithm = self.header.algorithm()?;
        if algorithm != key.algorithm() {
            return Err(anyhow!("`alg` {algorithm} does not match verifying key").into());
        }
        key.verify(self.signing_input.as_bytes(), &self.signature)?;

        if let Some(exp) = self.claims.get("exp") {
            let exp = numeric_date(exp).context("invalid `exp` claim")?;
            if trust.is_expired(exp) {
                return Err(JwtError::Expired);
            }
        }
        if let Some(nbf) = self.claims.get("nbf") {
            let nbf = numeric_date(nbf).context("invalid `nbf` claim")?;
            if trust.is_premature(nbf) {
                return Err(JwtError::NotYetValid);
            }
        }

        Ok(())
    }
}

// NumericDate: seconds since the epoch, possibly fractional.
#[allow(clippy::cast_possible_truncation)]
fn numeric_date(value: &Value) -> Result<DateTime<chrono::Utc>> {
    let secs = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.floor() as i64)),
        _ => None,
    };
    secs.and_then(|s| DateTime::from_timestamp(s, 0)).ok_or_else(|| anyhow!("not a NumericDate"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn encode(value: &Value) -> String {
        Base64UrlUnpadded::encode_string(&serde_json::to_vec(value).expect("should serialize"))
    }

    #[test]
    fn decode_compact() {
        let header = encode(&json!({"alg": "ES256", "typ": "kb+jwt"}));
        let payload = encode(&json!({"nonce": "n-0S6_WzA2Mj", "aud": "https://verifier.example"}));
        let compact = format!("{header}.{payload}.c2ln");

        let jws: Jws = compact.parse().expect("should decode");
        assert_eq!(jws.header.algorithm().expect("should parse"), Algorithm::Es256);
        assert_eq!(jws.header.typ.as_deref(), Some("kb+jwt"));
        assert_eq!(jws.claim_str("nonce"), Some("n-0S6_WzA2Mj"));
        assert_eq!(jws.signing_input, format!("{header}.{payload}"));
        assert_eq!(jws.signature, b"sig");
    }

    #[test]
    fn reject_malformed() {
        assert!("a.b".parse::<Jws>().is_err());
        assert!("a.b.c.d".parse::<Jws>().is_err());
        assert!("!!.e30.c2ln".parse::<Jws>().is_err());
    }

    #[test]
    fn unknown_algorithm() {
        let header = JwsHeader {
            alg: Some("RS256".to_string()),
            ..JwsHeader::default()
        };
        assert!(header.algorithm().is_err());
        assert!(JwsHeader::default().algorithm().is_err());
    }

    #[test]
    fn jwk_serde() {
        let jwk: PublicKeyJwk = serde_json::from_value(json!({
            "kty": "EC",
            "crv": "P-256",
            "x": "f83OJ3D2xF1Bg8vub9tLe1gHMzV76e8Tus9uPHvRVEU",
            "y": "x_FEzRu9m36HLN_tue659LNpXW6pCyStikYjKIWI5a0",
            "use": "sig"
        }))
        .expect("should deserialize");
        assert_eq!(jwk.kty, KeyType::Ec);
        assert_eq!(jwk.crv, Curve::P256);

        let unsupported = serde_json::from_value::<PublicKeyJwk>(json!({
            "kty": "EC", "crv": "secp256k1", "x": "AA", "y": "AA"
        }));
        assert!(unsupported.is_err());
    }

    #[test]
    fn numeric_dates() {
        assert_eq!(numeric_date(&json!(1_700_000_000)).expect("valid").timestamp(), 1_700_000_000);
        assert_eq!(numeric_date(&json!(1_700_000_000.9)).expect("valid").timestamp(), 1_700_000_000);
        assert!(numeric_date(&json!("1700000000")).is_err());
    }
}
