//! # COSE
//!
//! This module provides types for working with CBOR Object Signing and
//! Encryption (COSE) keys and signatures.

use std::collections::BTreeMap;

use anyhow::{Result, anyhow, bail};
use base64ct::{Base64UrlUnpadded, Encoding};
use ciborium::{Value, cbor};
use coset::{CoseSign1, Header, Label, RegisteredLabelWithPrivate, iana};
use serde::{Deserialize, Serialize, de, ser};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::jose::{self, PublicKeyJwk};
use crate::key::VerifyingKey;
use crate::mso_mdoc::X5CHAIN;

const KTY: i64 = 1;
const CRV: i64 = -1;
const X: i64 = -2;
const Y: i64 = -3;

/// Implements [`COSE_Key`] as defined in [RFC9052].
///
/// [RFC9052]: https://www.rfc-editor.org/rfc/rfc9052.html#name-key-objects
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoseKey {
    /// Key type
    pub kty: KeyType,

    /// Curve
    pub crv: Curve,

    /// Public key X
    pub x: Vec<u8>,

    /// Public key Y
    pub y: Option<Vec<u8>>,
}

impl CoseKey {
    /// Convert to the equivalent JWK.
    ///
    /// # Errors
    ///
    /// Returns an error if the key type or curve has no supported JWK
    /// equivalent.
    pub fn to_jwk(&self) -> Result<PublicKeyJwk> {
        let (kty, crv) = match (&self.kty, &self.crv) {
            (KeyType::Okp, Curve::Ed25519) => (jose::KeyType::Okp, jose::Curve::Ed25519),
            (KeyType::Ec, Curve::P256) => (jose::KeyType::Ec, jose::Curve::P256),
            (KeyType::Ec, Curve::P384) => (jose::KeyType::Ec, jose::Curve::P384),
            (kty, crv) => bail!("unsupported COSE key: {kty:?}/{crv:?}"),
        };
        Ok(PublicKeyJwk {
            kty,
            crv,
            x: Base64UrlUnpadded::encode_string(&self.x),
            y: self.y.as_ref().map(|y| Base64UrlUnpadded::encode_string(y)),
            ..PublicKeyJwk::default()
        })
    }

    /// Import as a verifying key, validating the point is on the curve.
    pub(crate) fn verifying_key(&self) -> Result<VerifyingKey> {
        VerifyingKey::from_jwk(&self.to_jwk()?)
    }
}

impl TryFrom<&PublicKeyJwk> for CoseKey {
    type Error = anyhow::Error;

    fn try_from(jwk: &PublicKeyJwk) -> Result<Self> {
        let (kty, crv) = match jwk.crv {
            jose::Curve::Ed25519 => (KeyType::Okp, Curve::Ed25519),
            jose::Curve::P256 => (KeyType::Ec, Curve::P256),
            jose::Curve::P384 => (KeyType::Ec, Curve::P384),
        };
        let x = Base64UrlUnpadded::decode_vec(&jwk.x).map_err(|e| anyhow!("invalid `x`: {e}"))?;
        let y = jwk
            .y
            .as_ref()
            .map(|y| Base64UrlUnpadded::decode_vec(y).map_err(|e| anyhow!("invalid `y`: {e}")))
            .transpose()?;
        Ok(Self { kty, crv, x, y })
    }
}

impl TryFrom<Value> for CoseKey {
    type Error = anyhow::Error;

    fn try_from(value: Value) -> Result<Self> {
        value.deserialized().map_err(|e| anyhow!("invalid COSE_Key: {e}"))
    }
}

impl From<CoseKey> for Value {
    fn from(key: CoseKey) -> Self {
        Self::serialized(&key).unwrap_or(Self::Null)
    }
}

impl Serialize for CoseKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut map = BTreeMap::<i64, Value>::new();
        map.insert(KTY, cbor!(self.kty).map_err(ser::Error::custom)?);
        map.insert(CRV, cbor!(self.crv).map_err(ser::Error::custom)?);
        map.insert(X, self.x.clone().into());
        if let Some(y) = &self.y {
            map.insert(Y, y.clone().into());
        }
        map.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CoseKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // required fields
        let map = BTreeMap::<i64, Value>::deserialize(deserializer)?;
        let kty = map.get(&KTY).ok_or_else(|| de::Error::missing_field("kty"))?;
        let crv = map.get(&CRV).ok_or_else(|| de::Error::missing_field("crv"))?;
        let x = map.get(&X).ok_or_else(|| de::Error::missing_field("x"))?;

        let mut cose_key = Self {
            kty: kty.deserialized().map_err(de::Error::custom)?,
            crv: crv.deserialized().map_err(de::Error::custom)?,
            x: x.as_bytes().cloned().ok_or_else(|| de::Error::custom("x is not bytes"))?,
            y: None,
        };

        // optional fields (a boolean `y` denotes a compressed point)
        if let Some(y) = map.get(&Y) {
            cose_key.y = y.as_bytes().cloned();
        }

        Ok(cose_key)
    }
}

/// Cryptographic key type.
#[derive(Clone, Debug, Default, Deserialize_repr, Serialize_repr, Eq, PartialEq)]
#[repr(i64)]
pub enum KeyType {
    /// Octet key pair (Edwards curve)
    #[default]
    Okp = 1,

    /// Elliptic curve key pair
    Ec = 2,
}

/// Cryptographic curve type.
#[derive(Clone, Debug, Default, Deserialize_repr, Serialize_repr, Eq, PartialEq)]
#[repr(i64)]
pub enum Curve {
    /// secp256r1 curve.
    P256 = 1,

    /// secp384r1 curve.
    P384 = 2,

    /// X25519 function (encryption) key pairs.
    X25519 = 4,

    /// Ed25519 signature (DSA) key pairs.
    #[default]
    Ed25519 = 6,

    /// secp256k1 curve.
    Es256K = 8,
}

/// The `x5chain` header parameter: DER certificates, leaf first.
///
/// The parameter is looked for in the unprotected header, then the protected
/// header. A single certificate may be encoded as a bare byte string.
pub(crate) fn x5chain(sign1: &CoseSign1) -> Option<Result<Vec<Vec<u8>>>> {
    let value = header_param(&sign1.unprotected, X5CHAIN)
        .or_else(|| header_param(&sign1.protected.header, X5CHAIN))?;

    let chain = match value {
        Value::Bytes(der) => Ok(vec![der.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_bytes().cloned().ok_or_else(|| anyhow!("x5chain entry is not bytes"))
            })
            .collect(),
        _ => Err(anyhow!("x5chain is neither bytes nor an array")),
    };
    Some(chain)
}

fn header_param(header: &Header, label: i64) -> Option<&Value> {
    header.rest.iter().find(|(l, _)| *l == Label::Int(label)).map(|(_, v)| v)
}

/// Verify a `COSE_Sign1` with an attached payload and empty external AAD.
pub(crate) fn verify_sign1(sign1: &CoseSign1, key: &VerifyingKey) -> Result<()> {
    check_algorithm(sign1, key)?;
    sign1.verify_signature(&[], |sig, data| key.verify(data, sig))
}

/// Verify a `COSE_Sign1` whose payload is transported separately.
pub(crate) fn verify_detached(sign1: &CoseSign1, payload: &[u8], key: &VerifyingKey) -> Result<()> {
    check_algorithm(sign1, key)?;
    sign1.verify_detached_signature(payload, &[], |sig, data| key.verify(data, sig))
}

// A declared algorithm must match the key.
fn check_algorithm(sign1: &CoseSign1, key: &VerifyingKey) -> Result<()> {
    let Some(alg) = &sign1.protected.header.alg else {
        return Ok(());
    };
    let expected = match key {
        VerifyingKey::P256(_) => iana::Algorithm::ES256,
        VerifyingKey::P384(_) => iana::Algorithm::ES384,
        VerifyingKey::Ed25519(_) => iana::Algorithm::EdDSA,
    };
    if *alg != RegisteredLabelWithPrivate::Assigned(expected) {
        bail!("COSE algorithm {alg:?} does not match key");
    }
    Ok(())
}
