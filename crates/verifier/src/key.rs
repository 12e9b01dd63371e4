//! # Verifying Keys
//!
//! Public key import (from JWK, COSE key, or X.509 certificate) and signature
//! verification for the supported curves.

use anyhow::{Context, Result, anyhow, bail, ensure};
use base64ct::{Base64UrlUnpadded, Encoding};
use ed25519_dalek::Verifier as _;
use p256::pkcs8::DecodePublicKey;
use x509_cert::Certificate;
use x509_cert::der::Encode;

use crate::jose::{Algorithm, Curve, KeyType, PublicKeyJwk};

/// A public key able to verify signatures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum VerifyingKey {
    P256(p256::ecdsa::VerifyingKey),
    P384(p384::ecdsa::VerifyingKey),
    Ed25519(ed25519_dalek::VerifyingKey),
}

impl VerifyingKey {
    /// Import a JWK.
    pub(crate) fn from_jwk(jwk: &PublicKeyJwk) -> Result<Self> {
        let x = Base64UrlUnpadded::decode_vec(&jwk.x).context("decoding `x`")?;

        match (jwk.kty, jwk.crv) {
            (KeyType::Okp, Curve::Ed25519) => {
                let bytes: [u8; 32] =
                    x.as_slice().try_into().map_err(|_| anyhow!("Ed25519 key must be 32 bytes"))?;
                Ok(Self::Ed25519(ed25519_dalek::VerifyingKey::from_bytes(&bytes)?))
            }
            (KeyType::Ec, Curve::P256) => {
                let sec1 = sec1_point(&x, jwk.y.as_deref(), 32)?;
                Ok(Self::P256(p256::ecdsa::VerifyingKey::from_sec1_bytes(&sec1)?))
            }
            (KeyType::Ec, Curve::P384) => {
                let sec1 = sec1_point(&x, jwk.y.as_deref(), 48)?;
                Ok(Self::P384(p384::ecdsa::VerifyingKey::from_sec1_bytes(&sec1)?))
            }
            (kty, crv) => bail!("key type {kty:?} does not support curve {crv:?}"),
        }
    }

    /// Import a JWK for use with the specified algorithm.
    pub(crate) fn import(jwk: &PublicKeyJwk, algorithm: Algorithm) -> Result<Self> {
        let key = Self::from_jwk(jwk)?;
        ensure!(key.algorithm() == algorithm, "key cannot be used with {algorithm}");
        Ok(key)
    }

    /// Import the subject public key of an X.509 certificate.
    pub(crate) fn from_certificate(certificate: &Certificate) -> Result<Self> {
        let spki = certificate.tbs_certificate.subject_public_key_info.to_der()?;

        if let Ok(key) = p256::ecdsa::VerifyingKey::from_public_key_der(&spki) {
            return Ok(Self::P256(key));
        }
        if let Ok(key) = p384::ecdsa::VerifyingKey::from_public_key_der(&spki) {
            return Ok(Self::P384(key));
        }
        if let Ok(key) = ed25519_dalek::VerifyingKey::from_public_key_der(&spki) {
            return Ok(Self::Ed25519(key));
        }
        bail!("unsupported certificate public key")
    }

    /// The signing algorithm this key verifies.
    pub(crate) const fn algorithm(&self) -> Algorithm {
        match self {
            Self::P256(_) => Algorithm::Es256,
            Self::P384(_) => Algorithm::Es384,
            Self::Ed25519(_) => Algorithm::EdDsa,
        }
    }

    /// Export as a JWK.
    pub(crate) fn to_jwk(&self) -> PublicKeyJwk {
        match self {
            Self::P256(key) => {
                let point = key.to_encoded_point(false);
                ec_jwk(Curve::P256, point.as_bytes(), 32)
            }
            Self::P384(key) => {
                let point = key.to_encoded_point(false);
                ec_jwk(Curve::P384, point.as_bytes(), 48)
            }
            Self::Ed25519(key) => PublicKeyJwk {
                kty: KeyType::Okp,
                crv: Curve::Ed25519,
                x: Base64UrlUnpadded::encode_string(key.as_bytes()),
                ..PublicKeyJwk::default()
            },
        }
    }

    /// Verify a fixed-size (`r || s` or Ed25519) signature over `msg`.
    pub(crate) fn verify(&self, msg: &[u8], signature: &[u8]) -> Result<()> {
        match self {
            Self::P256(key) => {
                let signature = p256::ecdsa::Signature::from_slice(signature)?;
                key.verify(msg, &signature)?;
            }
            Self::P384(key) => {
                let signature = p384::ecdsa::Signature::from_slice(signature)?;
                key.verify(msg, &signature)?;
            }
            Self::Ed25519(key) => {
                let signature = ed25519_dalek::Signature::from_slice(signature)?;
                key.verify_strict(msg, &signature)?;
            }
        }
        Ok(())
    }

    /// Verify an ASN.1 DER encoded ECDSA signature, as used in X.509.
    pub(crate) fn verify_der(&self, msg: &[u8], signature: &[u8]) -> Result<()> {
        match self {
            Self::P256(key) => {
                let signature = p256::ecdsa::DerSignature::try_from(signature)?;
                key.verify(msg, &signature)?;
            }
            Self::P384(key) => {
                let signature = p384::ecdsa::DerSignature::try_from(signature)?;
                key.verify(msg, &signature)?;
            }
            Self::Ed25519(_) => self.verify(msg, signature)?,
        }
        Ok(())
    }
}

// Uncompressed SEC1 encoding: 0x04 || x || y
fn sec1_point(x: &[u8], y: Option<&str>, size: usize) -> Result<Vec<u8>> {
    let y = Base64UrlUnpadded::decode_vec(y.ok_or_else(|| anyhow!("missing `y`"))?)
        .context("decoding `y`")?;
    ensure!(x.len() == size && y.len() == size, "coordinates must be {size} bytes");

    let mut sec1 = Vec::with_capacity(1 + 2 * size);
    sec1.push(0x04);
    sec1.extend_from_slice(x);
    sec1.extend_from_slice(&y);
    Ok(sec1)
}

fn ec_jwk(crv: Curve, sec1: &[u8], size: usize) -> PublicKeyJwk {
    let (x, y) = sec1[1..].split_at(size);
    PublicKeyJwk {
        kty: KeyType::Ec,
        crv,
        x: Base64UrlUnpadded::encode_string(x),
        y: Some(Base64UrlUnpadded::encode_string(y)),
        ..PublicKeyJwk::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7515, appendix A.3
    const P256_X: &str = "f83OJ3D2xF1Bg8vub9tLe1gHMzV76e8Tus9uPHvRVEU";
    const P256_Y: &str = "x_FEzRu9m36HLN_tue659LNpXW6pCyStikYjKIWI5a0";

    // RFC 8037, appendix A.2
    const ED25519_X: &str = "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo";

    fn p256_jwk() -> PublicKeyJwk {
        PublicKeyJwk {
            kty: KeyType::Ec,
            crv: Curve::P256,
            x: P256_X.to_string(),
            y: Some(P256_Y.to_string()),
            ..PublicKeyJwk::default()
        }
    }

    #[test]
    fn p256_round_trip() {
        let key = VerifyingKey::from_jwk(&p256_jwk()).expect("should import");
        assert_eq!(key.algorithm(), Algorithm::Es256);
        assert_eq!(key.to_jwk(), p256_jwk());
    }

    #[test]
    fn import_checks_algorithm() {
        assert!(VerifyingKey::import(&p256_jwk(), Algorithm::Es256).is_ok());
        assert!(VerifyingKey::import(&p256_jwk(), Algorithm::EdDsa).is_err());
    }

    #[test]
    fn ed25519_verify() {
        // RFC 8037, appendix A.4
        let jwk = PublicKeyJwk {
            kty: KeyType::Okp,
            crv: Curve::Ed25519,
            x: ED25519_X.to_string(),
            ..PublicKeyJwk::default()
        };
        let key = VerifyingKey::from_jwk(&jwk).expect("should import");
        let signature = Base64UrlUnpadded::decode_vec(
            "hgyY0il_MGCjP0JzlnLWG1PPOt7-09PGcvMg3AIbQR6dWbhijcNR4ki4iylGjg5BhVsPt9g7sVvpAr_MuM0KAg",
        )
        .expect("should decode");
        key.verify(b"eyJhbGciOiJFZERTQSJ9.RXhhbXBsZSBvZiBFZDI1NTE5IHNpZ25pbmc", &signature)
            .expect("should verify");
        assert!(key.verify(b"tampered", &signature).is_err());
    }

    #[test]
    fn reject_bad_coordinates() {
        let mut jwk = p256_jwk();
        jwk.y = None;
        assert!(VerifyingKey::from_jwk(&jwk).is_err());

        let mut jwk = p256_jwk();
        jwk.x = Base64UrlUnpadded::encode_string(&[1; 31]);
        assert!(VerifyingKey::from_jwk(&jwk).is_err());

        let mut jwk = p256_jwk();
        jwk.kty = KeyType::Okp;
        assert!(VerifyingKey::from_jwk(&jwk).is_err());
    }
}
