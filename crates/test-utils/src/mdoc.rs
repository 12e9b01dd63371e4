//! `mso_mdoc` issuance and presentation.

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use ciborium::Value;
use coset::{CoseSign1Builder, HeaderBuilder, iana};
use credibil_verifier::Sha2Hasher;
use credibil_verifier::mso_mdoc::{
    CoseKey, DeviceAuth, DeviceKeyInfo, DeviceResponse, DeviceSigned, Document, Handover,
    IssuerAuth, IssuerNameSpaces, IssuerSigned, IssuerSignedItem, MobileSecurityObject,
    SessionTranscript, Tag24, ValidityInfo, X5CHAIN, device_authentication_bytes,
};
use p256::ecdsa::signature::Signer as _;
use p256::ecdsa::{Signature, SigningKey};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};

use crate::{CertificateAuthority, HolderKey, ca};

/// The mobile driving licence document type.
pub const MDL_DOCTYPE: &str = "org.iso.18013.5.1.mDL";

/// The mobile driving licence namespace.
pub const MDL_NAMESPACE: &str = "org.iso.18013.5.1";

/// An mdoc issuer signing with a P-256 key certified by a CA.
pub struct MdocIssuer {
    key: SigningKey,
    x5chain: Vec<Vec<u8>>,
}

impl MdocIssuer {
    /// Create an issuer with a leaf certificate issued by `ca`.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate cannot be issued.
    pub fn new(ca: &mut CertificateAuthority) -> Result<Self> {
        let key = SigningKey::random(&mut OsRng);
        let leaf = ca.issue("mdoc issuer", key.verifying_key())?;
        Ok(Self {
            key,
            x5chain: vec![leaf],
        })
    }

    /// Create an issuer certified by this issuer's own key, with an `x5chain`
    /// of the new certificate followed by this issuer's chain.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate cannot be issued.
    pub fn delegate(&self) -> Result<Self> {
        let Some(leaf) = self.x5chain.first() else {
            bail!("issuer has no certificate");
        };
        let key = SigningKey::random(&mut OsRng);
        let certificate =
            ca::issue_under(leaf, &self.key, "delegated issuer", key.verifying_key())?;

        let mut x5chain = vec![certificate];
        x5chain.extend(self.x5chain.iter().cloned());
        Ok(Self { key, x5chain })
    }

    /// The `x5chain` header value: DER certificates, leaf first.
    #[must_use]
    pub fn x5chain(&self) -> &[Vec<u8>] {
        &self.x5chain
    }

    /// Replace the `x5chain` header value.
    #[must_use]
    pub fn with_x5chain(mut self, x5chain: Vec<Vec<u8>>) -> Self {
        self.x5chain = x5chain;
        self
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        let signature: Signature = self.key.sign(data);
        signature.to_bytes().to_vec()
    }
}

/// Builds an issuer-signed mdoc.
#[derive(Clone, Debug)]
pub struct MdocBuilder {
    doc_type: String,
    claims: BTreeMap<String, Vec<(String, Value)>>,
    device_key: Option<Value>,
    valid_from: DateTime<Utc>,
    valid_until: DateTime<Utc>,
}

impl Default for MdocBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MdocBuilder {
    /// A mobile driving licence valid for 30 days.
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            doc_type: MDL_DOCTYPE.to_string(),
            claims: BTreeMap::new(),
            device_key: None,
            valid_from: now,
            valid_until: now + Duration::days(30),
        }
    }

    /// Set the document type.
    #[must_use]
    pub fn doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = doc_type.into();
        self
    }

    /// Add a data element.
    #[must_use]
    pub fn claim(
        mut self, name_space: impl Into<String>, name: impl Into<String>, value: impl Into<Value>,
    ) -> Self {
        self.claims.entry(name_space.into()).or_default().push((name.into(), value.into()));
        self
    }

    /// Set the holder's device key.
    #[must_use]
    pub fn device_key(mut self, device_key: CoseKey) -> Self {
        self.device_key = Some(device_key.into());
        self
    }

    /// Set a raw (possibly malformed) device key.
    #[must_use]
    pub fn raw_device_key(mut self, device_key: Value) -> Self {
        self.device_key = Some(device_key);
        self
    }

    /// Set the MSO validity period.
    #[must_use]
    pub const fn validity(mut self, valid_from: DateTime<Utc>, valid_until: DateTime<Utc>) -> Self {
        self.valid_from = valid_from;
        self.valid_until = valid_until;
        self
    }

    /// Digest each data element and sign the resulting MSO.
    ///
    /// # Errors
    ///
    /// Returns an error if the mdoc cannot be encoded.
    pub fn build(self, issuer: &MdocIssuer) -> Result<IssuerSigned> {
        let mut name_spaces = IssuerNameSpaces::new();
        let mut value_digests = BTreeMap::new();
        let mut digest_id = 0;

        for (name_space, elements) in self.claims {
            let mut items = vec![];
            let mut digests = BTreeMap::new();

            for (element_identifier, element_value) in elements {
                let mut random = vec![0; 16];
                OsRng.fill_bytes(&mut random);

                let item = Tag24::new(IssuerSignedItem {
                    digest_id,
                    random,
                    element_identifier,
                    element_value,
                })?;
                digests.insert(digest_id, Sha256::digest(item.to_tagged_vec()?).to_vec());
                items.push(item);
                digest_id += 1;
            }

            value_digests.insert(name_space.clone(), digests);
            name_spaces.insert(name_space, items);
        }

        let mso = MobileSecurityObject {
            version: "1.0".to_string(),
            digest_algorithm: "SHA-256".to_string(),
            value_digests,
            device_key_info: self.device_key.map(|device_key| DeviceKeyInfo {
                device_key: Some(device_key),
                ..DeviceKeyInfo::default()
            }),
            doc_type: self.doc_type,
            validity_info: ValidityInfo {
                signed: self.valid_from,
                valid_from: self.valid_from,
                valid_until: self.valid_until,
                expected_update: None,
            },
        };

        let x5chain = match issuer.x5chain.as_slice() {
            [leaf] => Value::Bytes(leaf.clone()),
            chain => Value::Array(chain.iter().cloned().map(Value::Bytes).collect()),
        };
        let issuer_auth = CoseSign1Builder::new()
            .protected(HeaderBuilder::new().algorithm(iana::Algorithm::ES256).build())
            .unprotected(HeaderBuilder::new().value(X5CHAIN, x5chain).build())
            .payload(Tag24::new(mso)?.to_tagged_vec()?)
            .create_signature(&[], |data| issuer.sign(data))
            .build();

        Ok(IssuerSigned {
            name_spaces,
            issuer_auth: IssuerAuth(issuer_auth),
        })
    }
}

/// The verifier interaction an mdoc is presented to.
#[derive(Clone, Debug)]
pub struct Presentation {
    /// Verifier client identifier.
    pub client_id: String,

    /// Verifier response endpoint.
    pub response_uri: String,

    /// Verifier nonce.
    pub nonce: String,

    /// Wallet-generated nonce.
    pub mdoc_nonce: String,
}

impl Default for Presentation {
    fn default() -> Self {
        Self {
            client_id: "x509_san_dns:verifier.example.com".to_string(),
            response_uri: "https://verifier.example.com/response".to_string(),
            nonce: "n-0S6_WzA2Mj".to_string(),
            mdoc_nonce: "mdoc-nonce-1234".to_string(),
        }
    }
}

impl Presentation {
    /// Present `issuer_signed` in a device response signed by `holder`.
    ///
    /// # Errors
    ///
    /// Returns an error if the device response cannot be encoded.
    pub async fn present(
        &self, issuer_signed: IssuerSigned, doc_type: &str, holder: &HolderKey,
    ) -> Result<DeviceResponse> {
        let handover = Handover::oid4vp(
            &Sha2Hasher,
            &self.client_id,
            &self.response_uri,
            &self.mdoc_nonce,
            &self.nonce,
        )
        .await?;

        let name_spaces = Tag24::new(Value::Map(vec![]))?;
        let payload = device_authentication_bytes(
            SessionTranscript { handover },
            doc_type,
            name_spaces.clone(),
        )?;
        let device_signature = CoseSign1Builder::new()
            .protected(HeaderBuilder::new().algorithm(holder.cose_alg()).build())
            .create_detached_signature(&payload, &[], |data| holder.sign(data))
            .build();

        Ok(DeviceResponse {
            version: "1.0".to_string(),
            documents: vec![Document {
                doc_type: doc_type.to_string(),
                issuer_signed,
                device_signed: Some(DeviceSigned {
                    name_spaces,
                    device_auth: DeviceAuth::Signature(device_signature),
                }),
                errors: None,
            }],
            document_errors: None,
            status: 0,
        })
    }
}

/// CBOR encode and base64url encode a credential.
///
/// # Errors
///
/// Returns an error if the value cannot be CBOR encoded.
pub fn encode(value: impl Into<Value>) -> Result<String> {
    let mut buf = Vec::new();
    ciborium::into_writer(&value.into(), &mut buf)?;
    Ok(Base64UrlUnpadded::encode_string(&buf))
}
