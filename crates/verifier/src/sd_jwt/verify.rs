//! # SD-JWT Verification

use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::instrument;

use crate::error::ErrorLog;
use crate::jose::{Jws, JwtError};
use crate::key::VerifyingKey;
use crate::provider::{Hasher, Resolver, Sha2Hasher};
use crate::sd_jwt::{SdJwt, encoded_digest, reconstruct, sd_alg};
use crate::trust::TrustContext;
use crate::{CredentialVerifier, Kind, PublicKeyJwk, VerificationError, VerificationResult, x509};

/// Options used to check an SD-JWT's key binding JWT. Absent values are not
/// checked.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SdJwtOptions {
    /// The verifier's client identifier, expected as the KB-JWT `aud`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_audience: Option<String>,

    /// The verifier's nonce, expected as the KB-JWT `nonce`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_nonce: Option<String>,
}

/// Verifies `dc+sd-jwt` credentials and presentations.
#[derive(Clone, Debug)]
pub struct SdJwtVerifier<'a, R, H = Sha2Hasher> {
    trust: &'a TrustContext<H>,
    resolver: &'a R,
}

impl<'a, R: Resolver, H: Hasher> SdJwtVerifier<'a, R, H> {
    /// Create a verifier using the provided trust context. `resolver` is used
    /// to find the issuer's public key when the credential does not carry an
    /// `x5c` certificate chain.
    #[must_use]
    pub const fn new(trust: &'a TrustContext<H>, resolver: &'a R) -> Self {
        Self { trust, resolver }
    }
}

impl<R: Resolver, H: Hasher> CredentialVerifier for SdJwtVerifier<'_, R, H> {
    type Options = SdJwtOptions;

    #[instrument(level = "debug", skip_all)]
    async fn verify(&self, credential: &Kind<Value>, options: &SdJwtOptions) -> VerificationResult {
        let mut log = ErrorLog::new();

        let Some(compact) = credential.as_str() else {
            log.push(VerificationError::InvalidDatatype);
            return log.into_result(None, None);
        };
        let sd_jwt = match SdJwt::parse(compact) {
            Ok(sd_jwt) => sd_jwt,
            Err(e) => {
                tracing::debug!("cannot split SD-JWT: {e:#}");
                log.push(VerificationError::InvalidFormat);
                return log.into_result(None, None);
            }
        };

        // issuer signature
        let Some(verified) = self.verify_issuer(&sd_jwt, &mut log).await else {
            return log.into_result(None, None);
        };

        // key binding
        if let Some(kb_jwt) = sd_jwt.kb_jwt {
            let binding = KeyBinding {
                kb_jwt,
                prefix: sd_jwt.prefix(),
                sd_alg: &verified.sd_alg,
                claims: &verified.claims,
            };
            if let Err(error) = self.verify_key_binding(&binding, options).await {
                log.push(error);
                return log.into_result(None, None);
            }
        }

        // holder key
        let holder_key = match holder_key(&verified.claims) {
            Ok((jwk, _)) => Some(jwk),
            Err(error) => {
                tracing::debug!(%error, "cannot extract holder key");
                log.push(VerificationError::CannotExtractHolderPublicKey);
                None
            }
        };

        let mut extra_claims = Map::new();
        extra_claims.insert("valid".to_string(), Value::Bool(true));
        log.into_result(holder_key, Some(extra_claims))
    }
}

// Issuer-verified payload, with disclosures applied.
struct Verified {
    claims: Map<String, Value>,
    sd_alg: String,
}

// Inputs to key binding verification.
struct KeyBinding<'a> {
    kb_jwt: &'a str,
    prefix: &'a str,
    sd_alg: &'a str,
    claims: &'a Map<String, Value>,
}

impl<R: Resolver, H: Hasher> SdJwtVerifier<'_, R, H> {
    async fn verify_issuer(&self, sd_jwt: &SdJwt<'_>, log: &mut ErrorLog) -> Option<Verified> {
        let jws: Jws = match sd_jwt.issuer_jwt.parse() {
            Ok(jws) => jws,
            Err(e) => {
                tracing::debug!("cannot decode issuer JWT: {e:#}");
                log.push(VerificationError::InvalidFormat);
                return None;
            }
        };

        let key = match self.issuer_key(&jws).await {
            Ok(key) => key,
            Err(error) => {
                log.push(error);
                return None;
            }
        };

        if let Err(e) = jws.verify(&key, self.trust) {
            tracing::debug!("issuer JWT failed verification: {e}");
            log.push(match e {
                JwtError::Expired => VerificationError::ExpiredCredential,
                JwtError::NotYetValid | JwtError::Invalid(_) => VerificationError::InvalidSignature,
            });
            return None;
        }

        let sd_alg = sd_alg(&jws.claims).to_string();
        let claims = reconstruct(jws.claims, &sd_jwt.disclosures, self.trust).await;
        Some(Verified { claims, sd_alg })
    }

    async fn issuer_key(&self, jws: &Jws) -> Result<VerifyingKey, VerificationError> {
        if let Some(x5c) = &jws.header.x5c {
            return self.x5c_key(jws, x5c);
        }

        let (Some(iss), Some(_)) = (jws.claim_str("iss"), &jws.header.alg) else {
            tracing::debug!("issuer JWT has neither `x5c` nor `iss` and `alg`");
            return Err(VerificationError::CannotResolveIssuerPublicKey);
        };
        let jwk = self.resolver.resolve(iss).await.map_err(|e| {
            tracing::debug!(iss, "cannot resolve issuer key: {e:#}");
            VerificationError::CannotResolveIssuerPublicKey
        })?;

        jws.header
            .algorithm()
            .and_then(|alg| VerifyingKey::import(&jwk, alg))
            .map_err(|e| {
                tracing::debug!("cannot import issuer key: {e:#}");
                VerificationError::CannotImportIssuerPublicKey
            })
    }

    // The chain is trusted when it validates against the trusted roots, or its
    // last certificate is itself a trusted root and every link verifies.
    fn x5c_key(&self, jws: &Jws, x5c: &[String]) -> Result<VerifyingKey, VerificationError> {
        let ders = x5c.iter().map(|cert| Base64::decode_vec(cert)).collect::<Result<Vec<_>, _>>();
        let chain = ders.as_ref().ok().and_then(|ders| x509::decode_chain(ders).ok());
        let (Ok(ders), Some(chain)) = (&ders, chain) else {
            tracing::debug!("cannot decode x5c");
            return Err(VerificationError::NotTrustedIssuer);
        };

        let validated = x509::validate_chain(&chain, self.trust.anchors(), self.trust.now())
            .inspect_err(|e| tracing::debug!("x5c does not validate: {e:#}"))
            .is_ok();
        let anchored = ders.last().is_some_and(|der| self.trust.is_trusted_root(der))
            && x509::verify_links(&chain)
                .inspect_err(|e| tracing::debug!("x5c links do not verify: {e:#}"))
                .is_ok();
        if !validated && !anchored {
            return Err(VerificationError::NotTrustedIssuer);
        }

        let Some(leaf) = chain.first() else {
            return Err(VerificationError::NotTrustedIssuer);
        };
        let key = VerifyingKey::from_certificate(leaf).map_err(|e| {
            tracing::debug!("cannot import x5c leaf key: {e:#}");
            VerificationError::CannotImportIssuerPublicKey
        })?;
        match jws.header.algorithm() {
            Ok(alg) if alg == key.algorithm() => Ok(key),
            _ => {
                tracing::debug!(alg = ?jws.header.alg, "`alg` does not match x5c leaf key");
                Err(VerificationError::CannotImportIssuerPublicKey)
            }
        }
    }

    async fn verify_key_binding(
        &self, binding: &KeyBinding<'_>, options: &SdJwtOptions,
    ) -> Result<(), VerificationError> {
        let (_, holder_key) = holder_key(binding.claims)?;

        let kb_jwt: Jws = binding.kb_jwt.parse().map_err(|e| {
            tracing::debug!("cannot decode KB-JWT: {e:#}");
            VerificationError::InvalidFormat
        })?;

        let (Some(sd_hash), Some(nonce), Some(aud)) =
            (kb_jwt.claim_str("sd_hash"), kb_jwt.claim_str("nonce"), audience(&kb_jwt.claims))
        else {
            return Err(VerificationError::KbJwtMissingParameters);
        };

        let expected = encoded_digest(self.trust, binding.sd_alg, binding.prefix).await;
        if expected.as_deref().ok() != Some(sd_hash) {
            return Err(VerificationError::KbJwtWrongSdHash);
        }
        if options.expected_audience.as_deref().is_some_and(|expected| expected != aud) {
            return Err(VerificationError::KbJwtUnexpectedAudience);
        }
        if options.expected_nonce.as_deref().is_some_and(|expected| expected != nonce) {
            return Err(VerificationError::KbJwtUnexpectedNonce);
        }

        kb_jwt.verify(&holder_key, self.trust).map_err(|e| {
            tracing::debug!("KB-JWT failed verification: {e}");
            VerificationError::KbJwtInvalidSignature
        })
    }
}

// `aud` is a single string, or an array holding exactly one.
fn audience(claims: &Map<String, Value>) -> Option<&str> {
    match claims.get("aud")? {
        Value::String(aud) => Some(aud.as_str()),
        Value::Array(auds) => match auds.as_slice() {
            [Value::String(aud)] => Some(aud.as_str()),
            _ => None,
        },
        _ => None,
    }
}

// The holder key is the `cnf.jwk` claim.
fn holder_key(
    claims: &Map<String, Value>,
) -> Result<(PublicKeyJwk, VerifyingKey), VerificationError> {
    let Some(jwk) = claims.get("cnf").and_then(|cnf| cnf.get("jwk")) else {
        return Err(VerificationError::CannotExtractHolderPublicKey);
    };
    let jwk: PublicKeyJwk = serde_json::from_value(jwk.clone()).map_err(|e| {
        tracing::debug!("cannot parse `cnf.jwk`: {e}");
        VerificationError::CannotImportHolderPublicKey
    })?;
    let key = VerifyingKey::from_jwk(&jwk).map_err(|e| {
        tracing::debug!("cannot import `cnf.jwk`: {e:#}");
        VerificationError::CannotImportHolderPublicKey
    })?;
    Ok((jwk, key))
}

#[cfg(test)]
mod tests {
    use anyhow::{Result, bail};
    use serde_json::json;

    use super::*;

    struct NoResolver;

    impl Resolver for NoResolver {
        async fn resolve(&self, identifier: &str) -> Result<PublicKeyJwk> {
            bail!("unknown issuer {identifier}")
        }
    }

    fn unsigned_jwt(header: &Value, payload: &Value) -> String {
        let encode = |v: &Value| {
            base64ct::Base64UrlUnpadded::encode_string(
                &serde_json::to_vec(v).expect("should serialize"),
            )
        };
        format!("{}.{}.c2ln", encode(header), encode(payload))
    }

    #[test]
    fn holder_key_errors() {
        let Value::Object(claims) = json!({"iss": "https://issuer.example.com"}) else {
            panic!("should be an object");
        };
        assert_eq!(holder_key(&claims).err(), Some(VerificationError::CannotExtractHolderPublicKey));

        let Value::Object(claims) = json!({"cnf": {"jwk": {"kty": "EC", "crv": "P-256", "x": "AA"}}})
        else {
            panic!("should be an object");
        };
        assert_eq!(holder_key(&claims).err(), Some(VerificationError::CannotImportHolderPublicKey));
    }

    #[test]
    fn audience_forms() {
        let claims = |aud: Value| {
            let Value::Object(claims) = json!({"aud": aud}) else {
                panic!("should be an object");
            };
            claims
        };
        let aud = "https://verifier.example";
        assert_eq!(audience(&claims(json!(aud))), Some(aud));
        assert_eq!(audience(&claims(json!([aud]))), Some(aud));
        assert_eq!(audience(&claims(json!(["a", "b"]))), None);
        assert_eq!(audience(&claims(json!([]))), None);
        assert_eq!(audience(&claims(json!(42))), None);
        assert_eq!(audience(&Map::new()), None);
    }

    #[tokio::test]
    async fn format_errors() {
        let trust = TrustContext::default();
        let verifier = SdJwtVerifier::new(&trust, &NoResolver);

        let result = verifier.verify(&Kind::Object(json!({})), &SdJwtOptions::default()).await;
        assert_eq!(result.error(), Some(VerificationError::InvalidDatatype));

        let result = verifier.verify_str("eyJhbGciOiJFUzI1NiJ9", &SdJwtOptions::default()).await;
        assert_eq!(result.error(), Some(VerificationError::InvalidFormat));

        let result = verifier.verify_str("not-a-jwt~", &SdJwtOptions::default()).await;
        assert_eq!(result.error(), Some(VerificationError::InvalidFormat));
    }

    #[tokio::test]
    async fn unresolvable_issuer() {
        let trust = TrustContext::default();
        let verifier = SdJwtVerifier::new(&trust, &NoResolver);

        // no `iss`
        let jwt = unsigned_jwt(&json!({"alg": "ES256"}), &json!({"vct": "urn:example"}));
        let result = verifier.verify_str(&format!("{jwt}~"), &SdJwtOptions::default()).await;
        assert_eq!(result.error(), Some(VerificationError::CannotResolveIssuerPublicKey));

        // resolver fails
        let jwt = unsigned_jwt(&json!({"alg": "ES256"}), &json!({"iss": "did:example:123"}));
        let result = verifier.verify_str(&format!("{jwt}~"), &SdJwtOptions::default()).await;
        assert_eq!(result.error(), Some(VerificationError::CannotResolveIssuerPublicKey));
    }

    #[tokio::test]
    async fn untrusted_x5c() {
        let trust = TrustContext::default();
        let verifier = SdJwtVerifier::new(&trust, &NoResolver);

        let jwt = unsigned_jwt(
            &json!({"alg": "ES256", "x5c": ["not base64 DER"]}),
            &json!({"iss": "https://issuer.example.com"}),
        );
        let result = verifier.verify_str(&format!("{jwt}~"), &SdJwtOptions::default()).await;
        assert_eq!(result.error(), Some(VerificationError::NotTrustedIssuer));
    }
}
