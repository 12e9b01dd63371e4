//! SD-JWT VC issuance and key binding.

use anyhow::Result;
use base64ct::{Base64, Base64UrlUnpadded, Encoding};
use chrono::Utc;
use credibil_verifier::PublicKeyJwk;
use credibil_verifier::jose::{Curve, KeyType};
use p256::ecdsa::signature::Signer as _;
use p256::ecdsa::{Signature, SigningKey};
use rand_core::{OsRng, RngCore};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

use crate::{CertificateAuthority, HolderKey};

/// An SD-JWT issuer signing with a P-256 key.
pub struct SdJwtIssuer {
    key: SigningKey,
    iss: String,
    x5c: Option<Vec<Vec<u8>>>,
}

impl SdJwtIssuer {
    /// An issuer identified by `iss`, whose key is found by resolution.
    #[must_use]
    pub fn new(iss: impl Into<String>) -> Self {
        Self {
            key: SigningKey::random(&mut OsRng),
            iss: iss.into(),
            x5c: None,
        }
    }

    /// An issuer whose JWT header carries an `x5c` chain issued by `ca`.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate cannot be issued.
    pub fn with_x5c(iss: impl Into<String>, ca: &mut CertificateAuthority) -> Result<Self> {
        let mut issuer = Self::new(iss);
        let leaf = ca.issue("sd-jwt issuer", issuer.key.verifying_key())?;
        issuer.x5c = Some(vec![leaf]);
        Ok(issuer)
    }

    /// Replace the `x5c` header value with DER certificates.
    #[must_use]
    pub fn set_x5c(mut self, chain: &[Vec<u8>]) -> Self {
        self.x5c = Some(chain.to_vec());
        self
    }

    /// The `x5c` chain as DER certificates, leaf first.
    #[must_use]
    pub fn x5c(&self) -> Option<&[Vec<u8>]> {
        self.x5c.as_deref()
    }

    /// The issuer identifier.
    #[must_use]
    pub fn iss(&self) -> &str {
        &self.iss
    }

    /// The issuer's public key as a JWK.
    #[must_use]
    pub fn jwk(&self) -> PublicKeyJwk {
        let point = self.key.verifying_key().to_encoded_point(false);
        PublicKeyJwk {
            kty: KeyType::Ec,
            crv: Curve::P256,
            x: point.x().map(|x| Base64UrlUnpadded::encode_string(x)).unwrap_or_default(),
            y: point.y().map(|y| Base64UrlUnpadded::encode_string(y)),
            ..PublicKeyJwk::default()
        }
    }
}

/// Builds an issued SD-JWT: `<Issuer-signed JWT>~<Disclosure 1>~...~`.
#[derive(Clone, Debug)]
pub struct SdJwtBuilder {
    claims: Map<String, Value>,
    disclosable: Vec<(String, Value)>,
    holder: Option<PublicKeyJwk>,
}

impl Default for SdJwtBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SdJwtBuilder {
    /// A credential of type `urn:eudi:pid:1`, valid for 30 days.
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now().timestamp();
        let mut claims = Map::new();
        claims.insert("vct".to_string(), json!("urn:eudi:pid:1"));
        claims.insert("iat".to_string(), json!(now));
        claims.insert("exp".to_string(), json!(now + 30 * 24 * 60 * 60));

        Self {
            claims,
            disclosable: vec![],
            holder: None,
        }
    }

    /// Add an always-visible claim, replacing any existing value.
    #[must_use]
    pub fn claim(mut self, name: impl Into<String>, value: Value) -> Self {
        self.claims.insert(name.into(), value);
        self
    }

    /// Remove a visible claim.
    #[must_use]
    pub fn without(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    /// Add a selectively disclosable claim.
    #[must_use]
    pub fn disclosable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.disclosable.push((name.into(), value));
        self
    }

    /// Bind the credential to the holder's key (`cnf.jwk`).
    #[must_use]
    pub fn holder(mut self, jwk: PublicKeyJwk) -> Self {
        self.holder = Some(jwk);
        self
    }

    /// Sign the credential.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential cannot be serialized.
    pub fn build(self, issuer: &SdJwtIssuer) -> Result<String> {
        let mut payload = self.claims;
        payload.insert("iss".to_string(), json!(issuer.iss));
        if let Some(jwk) = self.holder {
            payload.insert("cnf".to_string(), json!({"jwk": jwk}));
        }

        let mut disclosures = vec![];
        let mut digests = vec![];
        for (name, value) in self.disclosable {
            let mut salt = [0; 16];
            OsRng.fill_bytes(&mut salt);
            let disclosure = json!([Base64UrlUnpadded::encode_string(&salt), name, value]);
            let encoded = Base64UrlUnpadded::encode_string(&serde_json::to_vec(&disclosure)?);
            digests.push(json!(sd_hash(&encoded)));
            disclosures.push(encoded);
        }
        if !digests.is_empty() {
            payload.insert("_sd_alg".to_string(), json!("sha-256"));
            payload.insert("_sd".to_string(), Value::Array(digests));
        }

        let mut header = json!({"alg": "ES256", "typ": "dc+sd-jwt"});
        if let Some(x5c) = &issuer.x5c {
            let x5c: Vec<String> = x5c.iter().map(|der| Base64::encode_string(der)).collect();
            header["x5c"] = json!(x5c);
        }
        let jwt = sign(&header, &Value::Object(payload), |data| {
            let signature: Signature = issuer.key.sign(data);
            signature.to_bytes().to_vec()
        })?;

        let mut sd_jwt = jwt;
        for disclosure in disclosures {
            sd_jwt.push('~');
            sd_jwt.push_str(&disclosure);
        }
        sd_jwt.push('~');
        Ok(sd_jwt)
    }
}

/// Builds a key binding JWT for an SD-JWT presentation.
#[derive(Clone, Debug)]
pub struct KbJwtBuilder {
    aud: Option<String>,
    aud_array: bool,
    nonce: Option<String>,
    sd_hash: Option<String>,
    exp: Option<i64>,
}

impl KbJwtBuilder {
    /// A KB-JWT for audience `aud` with `nonce`.
    #[must_use]
    pub fn new(aud: impl Into<String>, nonce: impl Into<String>) -> Self {
        Self {
            aud: Some(aud.into()),
            aud_array: false,
            nonce: Some(nonce.into()),
            sd_hash: None,
            exp: None,
        }
    }

    /// Omit the `aud` claim.
    #[must_use]
    pub fn without_aud(mut self) -> Self {
        self.aud = None;
        self
    }

    /// Encode `aud` as a single-element array.
    #[must_use]
    pub const fn aud_array(mut self) -> Self {
        self.aud_array = true;
        self
    }

    /// Omit the `nonce` claim.
    #[must_use]
    pub fn without_nonce(mut self) -> Self {
        self.nonce = None;
        self
    }

    /// Use `sd_hash` rather than the hash of the presented prefix.
    #[must_use]
    pub fn sd_hash(mut self, sd_hash: impl Into<String>) -> Self {
        self.sd_hash = Some(sd_hash.into());
        self
    }

    /// Set an expiry (seconds since the epoch).
    #[must_use]
    pub const fn exp(mut self, exp: i64) -> Self {
        self.exp = Some(exp);
        self
    }

    /// Sign a KB-JWT over `prefix` and append it, returning the full
    /// presentation.
    ///
    /// # Errors
    ///
    /// Returns an error if the KB-JWT cannot be serialized.
    pub fn present(self, prefix: &str, holder: &HolderKey) -> Result<String> {
        let mut claims = Map::new();
        claims.insert("iat".to_string(), json!(Utc::now().timestamp()));
        if let Some(aud) = self.aud {
            let aud = if self.aud_array { json!([aud]) } else { json!(aud) };
            claims.insert("aud".to_string(), aud);
        }
        if let Some(nonce) = self.nonce {
            claims.insert("nonce".to_string(), json!(nonce));
        }
        if let Some(exp) = self.exp {
            claims.insert("exp".to_string(), json!(exp));
        }
        let sd_hash = self.sd_hash.unwrap_or_else(|| sd_hash(prefix));
        claims.insert("sd_hash".to_string(), json!(sd_hash));

        let header = json!({"alg": holder.alg(), "typ": "kb+jwt"});
        let kb_jwt = sign(&header, &Value::Object(claims), |data| holder.sign(data))?;
        Ok(format!("{prefix}{kb_jwt}"))
    }
}

/// `base64url(SHA-256(data))`.
#[must_use]
pub fn sd_hash(data: &str) -> String {
    Base64UrlUnpadded::encode_string(&Sha256::digest(data.as_bytes()))
}

fn sign(header: &Value, payload: &Value, signer: impl FnOnce(&[u8]) -> Vec<u8>) -> Result<String> {
    let header = Base64UrlUnpadded::encode_string(&serde_json::to_vec(header)?);
    let payload = Base64UrlUnpadded::encode_string(&serde_json::to_vec(payload)?);
    let signing_input = format!("{header}.{payload}");
    let signature = Base64UrlUnpadded::encode_string(&signer(signing_input.as_bytes()));
    Ok(format!("{signing_input}.{signature}"))
}
