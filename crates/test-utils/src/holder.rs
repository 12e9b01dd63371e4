//! Holder (wallet) keys used for device and key binding signatures.

use base64ct::{Base64UrlUnpadded, Encoding};
use credibil_verifier::jose::{Curve, KeyType, PublicKeyJwk};
use credibil_verifier::mso_mdoc::{self, CoseKey};
use ed25519_dalek::Signer as _;
use rand_core::OsRng;

/// A holder's signing key.
#[derive(Clone, Debug)]
pub enum HolderKey {
    /// ECDSA P-256 (`ES256`).
    P256(p256::ecdsa::SigningKey),

    /// Ed25519 (`EdDSA`).
    Ed25519(ed25519_dalek::SigningKey),
}

impl HolderKey {
    /// Generate a P-256 holder key.
    #[must_use]
    pub fn p256() -> Self {
        Self::P256(p256::ecdsa::SigningKey::random(&mut OsRng))
    }

    /// Generate an Ed25519 holder key.
    #[must_use]
    pub fn ed25519() -> Self {
        Self::Ed25519(ed25519_dalek::SigningKey::generate(&mut OsRng))
    }

    /// JWS algorithm name.
    #[must_use]
    pub const fn alg(&self) -> &'static str {
        match self {
            Self::P256(_) => "ES256",
            Self::Ed25519(_) => "EdDSA",
        }
    }

    /// COSE algorithm.
    #[must_use]
    pub const fn cose_alg(&self) -> coset::iana::Algorithm {
        match self {
            Self::P256(_) => coset::iana::Algorithm::ES256,
            Self::Ed25519(_) => coset::iana::Algorithm::EdDSA,
        }
    }

    /// The public key as a JWK.
    #[must_use]
    pub fn jwk(&self) -> PublicKeyJwk {
        match self {
            Self::P256(key) => {
                let point = key.verifying_key().to_encoded_point(false);
                PublicKeyJwk {
                    kty: KeyType::Ec,
                    crv: Curve::P256,
                    x: point.x().map(|x| Base64UrlUnpadded::encode_string(x)).unwrap_or_default(),
                    y: point.y().map(|y| Base64UrlUnpadded::encode_string(y)),
                    ..PublicKeyJwk::default()
                }
            }
            Self::Ed25519(key) => PublicKeyJwk {
                kty: KeyType::Okp,
                crv: Curve::Ed25519,
                x: Base64UrlUnpadded::encode_string(key.verifying_key().as_bytes()),
                ..PublicKeyJwk::default()
            },
        }
    }

    /// The public key as a COSE key.
    #[must_use]
    pub fn cose_key(&self) -> CoseKey {
        match self {
            Self::P256(key) => {
                let point = key.verifying_key().to_encoded_point(false);
                CoseKey {
                    kty: mso_mdoc::KeyType::Ec,
                    crv: mso_mdoc::Curve::P256,
                    x: point.x().map(|x| x.to_vec()).unwrap_or_default(),
                    y: point.y().map(|y| y.to_vec()),
                }
            }
            Self::Ed25519(key) => CoseKey {
                kty: mso_mdoc::KeyType::Okp,
                crv: mso_mdoc::Curve::Ed25519,
                x: key.verifying_key().as_bytes().to_vec(),
                y: None,
            },
        }
    }

    /// Sign `msg`, returning a fixed-size signature (`r || s` for ECDSA).
    #[must_use]
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        match self {
            Self::P256(key) => {
                let signature: p256::ecdsa::Signature = key.sign(msg);
                signature.to_bytes().to_vec()
            }
            Self::Ed25519(key) => key.sign(msg).to_bytes().to_vec(),
        }
    }
}
