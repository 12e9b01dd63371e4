//! # ISO mDL-based Credential Format
//!
//! This module provides verification of ISO mDL (`mso_mdoc`) credentials.
//!
//! The Mobile Security Object (MSO) is signed by the issuer and binds the
//! issuer-signed data elements to the mdoc's device key. When presented, the
//! mdoc device signs the `DeviceAuthentication` structure, binding the
//! presentation to a specific verifier interaction via the session
//! transcript. Both are returned in the `DeviceResponse` structure.

mod cose;
mod transcript;
mod verify;

use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use ciborium::Value;
use coset::{AsCborValue, CoseSign1};

pub use self::cose::{CoseKey, Curve, KeyType};
pub use self::transcript::{Handover, SessionTranscript, device_authentication_bytes};
pub use self::verify::{DeviceBinding, MdocOptions, MdocVerifier};
use crate::serde_cbor::{self, Fields};

/// Label of the `x5chain` COSE header parameter ([RFC9360]).
///
/// [RFC9360]: https://www.rfc-editor.org/rfc/rfc9360.html
pub const X5CHAIN: i64 = 33;

// ----------------------------------------------------------------------------
/// # 8.3.1 Data model
// ----------------------------------------------------------------------------

/// Document type
pub type DocType = String;

/// Element namespace
pub type NameSpace = String;

/// Data element identifier
pub type DataElementIdentifier = String;

/// Data element value
pub type DataElementValue = Value;

/// `DigestID` is an unsigned integer (0 < 2^31) used to match the hashes in
/// the MSO to the data elements in the mdoc response.
pub type DigestId = i64;

/// Wraps a data item that is CBOR encoded and tagged with tag 24
/// (`#6.24(bstr .cbor T)`).
///
/// The encoded bytes are retained so digests and signatures can be computed
/// over the exact bytes received.
#[derive(Clone, Debug, PartialEq)]
pub struct Tag24<T> {
    /// The decoded data item.
    pub value: T,
    bytes: Vec<u8>,
}

impl<T> Tag24<T>
where
    T: Clone + Into<Value>,
{
    /// Encode `value` as a tag 24 data item.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be CBOR encoded.
    pub fn new(value: T) -> Result<Self> {
        let encoded: Value = value.clone().into();
        let bytes = serde_cbor::to_vec(&encoded)?;
        Ok(Self { value, bytes })
    }
}

impl<T> Tag24<T> {
    /// The embedded CBOR encoding of the data item.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// CBOR encoding of the complete tagged data item.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be CBOR encoded.
    pub fn to_tagged_vec(&self) -> Result<Vec<u8>> {
        serde_cbor::to_vec(&Value::Tag(24, Box::new(Value::Bytes(self.bytes.clone()))))
    }
}

impl<T> TryFrom<Value> for Tag24<T>
where
    T: TryFrom<Value>,
    T::Error: Into<anyhow::Error>,
{
    type Error = anyhow::Error;

    fn try_from(value: Value) -> Result<Self> {
        let bytes = match value {
            Value::Tag(24, inner) => serde_cbor::bytes(*inner, "tag 24 data item")?,
            _ => bail!("expected tag 24 data item"),
        };
        let decoded: Value = serde_cbor::from_slice(&bytes)?;
        let value = T::try_from(decoded).map_err(Into::<anyhow::Error>::into)?;
        Ok(Self { value, bytes })
    }
}

impl<T> From<Tag24<T>> for Value {
    fn from(tagged: Tag24<T>) -> Self {
        Self::Tag(24, Box::new(Self::Bytes(tagged.bytes)))
    }
}

// ----------------------------------------------------------------------------
/// # 8.3.2.1.2.2 Device retrieval mdoc response
// ----------------------------------------------------------------------------

/// Device retrieval mdoc response.
#[derive(Clone, Debug)]
pub struct DeviceResponse {
    /// Version of the `DeviceResponse` structure.
    pub version: String,

    /// Returned documents.
    pub documents: Vec<Document>,

    /// Error codes for unreturned documents.
    pub document_errors: Option<Value>,

    /// Status code.
    pub status: u64,
}

impl TryFrom<Value> for DeviceResponse {
    type Error = anyhow::Error;

    fn try_from(value: Value) -> Result<Self> {
        let mut fields = Fields::new(value, "DeviceResponse")?;

        let version = match fields.take("version") {
            Some(v) => serde_cbor::text(v, "version")?,
            None => "1.0".to_string(),
        };
        let documents = match fields.take("documents").map(serde_cbor::untag) {
            Some(Value::Array(docs)) => {
                docs.into_iter().map(Document::try_from).collect::<Result<Vec<_>>>()?
            }
            Some(_) => bail!("`documents` is not an array"),
            None => vec![],
        };
        let status = match fields.take("status") {
            Some(v) => u64::try_from(serde_cbor::integer(&v, "status")?)?,
            None => 0,
        };

        Ok(Self {
            version,
            documents,
            document_errors: fields.take("documentErrors"),
            status,
        })
    }
}

impl From<DeviceResponse> for Value {
    fn from(response: DeviceResponse) -> Self {
        let mut map = vec![
            (Self::Text("version".into()), Self::Text(response.version)),
            (
                Self::Text("documents".into()),
                Self::Array(response.documents.into_iter().map(Into::into).collect()),
            ),
        ];
        if let Some(errors) = response.document_errors {
            map.push((Self::Text("documentErrors".into()), errors));
        }
        map.push((Self::Text("status".into()), Self::Integer(response.status.into())));
        Self::Map(map)
    }
}

/// Document returned in a device response.
#[derive(Clone, Debug)]
pub struct Document {
    /// The document type. For example, `org.iso.18013.5.1.mDL`.
    pub doc_type: DocType,

    /// Returned data elements signed by the issuer.
    pub issuer_signed: IssuerSigned,

    /// Returned data elements signed by the mdoc device. Absent for
    /// credentials that have only been issued, not presented.
    pub device_signed: Option<DeviceSigned>,

    /// Error codes for each namespace.
    pub errors: Option<Value>,
}

impl TryFrom<Value> for Document {
    type Error = anyhow::Error;

    fn try_from(value: Value) -> Result<Self> {
        let mut fields = Fields::new(value, "Document")?;
        Ok(Self {
            doc_type: serde_cbor::text(fields.require("docType")?, "docType")?,
            issuer_signed: fields.require("issuerSigned")?.try_into()?,
            device_signed: fields.take("deviceSigned").map(DeviceSigned::try_from).transpose()?,
            errors: fields.take("errors"),
        })
    }
}

impl From<Document> for Value {
    fn from(document: Document) -> Self {
        let mut map = vec![
            (Self::Text("docType".into()), Self::Text(document.doc_type)),
            (Self::Text("issuerSigned".into()), document.issuer_signed.into()),
        ];
        if let Some(device_signed) = document.device_signed {
            map.push((Self::Text("deviceSigned".into()), device_signed.into()));
        }
        if let Some(errors) = document.errors {
            map.push((Self::Text("errors".into()), errors));
        }
        Self::Map(map)
    }
}

/// Data elements (claims) returned by the Issuer. Each data element is
/// hashed and signed by the Issuer in the MSO.
#[derive(Clone, Debug)]
pub struct IssuerSigned {
    /// Returned data elements for each namespace.
    pub name_spaces: IssuerNameSpaces,

    /// The mobile security object (MSO) for issuer data authentication.
    pub issuer_auth: IssuerAuth,
}

/// Returned data elements for each namespace.
pub type IssuerNameSpaces = BTreeMap<NameSpace, Vec<IssuerSignedItemBytes>>;

/// CBOR serialized, tagged `IssuerSignedItem`.
pub type IssuerSignedItemBytes = Tag24<IssuerSignedItem>;

impl IssuerSigned {
    /// The MSO carried as the `issuerAuth` payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is missing or cannot be decoded.
    pub fn mobile_security_object(&self) -> Result<MobileSecurityObject> {
        let payload =
            self.issuer_auth.0.payload.as_ref().ok_or_else(|| anyhow!("missing MSO payload"))?;
        let value: Value = serde_cbor::from_slice(payload)?;
        match value {
            tagged @ Value::Tag(24, _) => {
                Ok(Tag24::<MobileSecurityObject>::try_from(tagged)?.value)
            }
            // tolerate an untagged MSO
            untagged => MobileSecurityObject::try_from(untagged),
        }
    }
}

impl TryFrom<Value> for IssuerSigned {
    type Error = anyhow::Error;

    fn try_from(value: Value) -> Result<Self> {
        let mut fields = Fields::new(value, "IssuerSigned")?;

        let mut name_spaces = IssuerNameSpaces::new();
        if let Some(value) = fields.take("nameSpaces") {
            for (name_space, items) in Fields::new(value, "nameSpaces")?.0 {
                let name_space = serde_cbor::text(name_space, "namespace")?;
                let Value::Array(items) = serde_cbor::untag(items) else {
                    bail!("namespace items are not an array");
                };
                let items = items.into_iter().map(Tag24::try_from).collect::<Result<Vec<_>>>()?;
                name_spaces.insert(name_space, items);
            }
        }

        Ok(Self {
            name_spaces,
            issuer_auth: fields.require("issuerAuth")?.try_into()?,
        })
    }
}

impl From<IssuerSigned> for Value {
    fn from(issuer_signed: IssuerSigned) -> Self {
        let name_spaces = issuer_signed
            .name_spaces
            .into_iter()
            .map(|(ns, items)| {
                (Self::Text(ns), Self::Array(items.into_iter().map(Into::into).collect()))
            })
            .collect();
        Self::Map(vec![
            (Self::Text("nameSpaces".into()), Self::Map(name_spaces)),
            (Self::Text("issuerAuth".into()), issuer_signed.issuer_auth.into()),
        ])
    }
}

/// Issuer-signed data element
#[derive(Clone, Debug, PartialEq)]
pub struct IssuerSignedItem {
    /// Id of the digest as added to the MSO `value_digests` parameter.
    pub digest_id: DigestId,

    /// Random value for issuer data authentication (min. 16 bytes).
    pub random: Vec<u8>,

    /// Data element identifier. For example, "`family_name`"
    pub element_identifier: DataElementIdentifier,

    /// Data element value. For example, "`Smith`"
    pub element_value: DataElementValue,
}

impl TryFrom<Value> for IssuerSignedItem {
    type Error = anyhow::Error;

    fn try_from(value: Value) -> Result<Self> {
        let mut fields = Fields::new(value, "IssuerSignedItem")?;
        Ok(Self {
            digest_id: serde_cbor::integer(&fields.require("digestID")?, "digestID")?,
            random: serde_cbor::bytes(fields.require("random")?, "random")?,
            element_identifier: serde_cbor::text(
                fields.require("elementIdentifier")?,
                "elementIdentifier",
            )?,
            element_value: fields.require("elementValue")?,
        })
    }
}

impl From<IssuerSignedItem> for Value {
    fn from(item: IssuerSignedItem) -> Self {
        Self::Map(vec![
            (Self::Text("digestID".into()), Self::Integer(item.digest_id.into())),
            (Self::Text("random".into()), Self::Bytes(item.random)),
            (Self::Text("elementIdentifier".into()), Self::Text(item.element_identifier)),
            (Self::Text("elementValue".into()), item.element_value),
        ])
    }
}

/// Used by the mdoc device to sign the data elements in the `Document`.
#[derive(Clone, Debug)]
pub struct DeviceSigned {
    /// Returned data elements.
    pub name_spaces: DeviceNameSpacesBytes,

    /// Device authentication for mdoc authentication.
    pub device_auth: DeviceAuth,
}

/// CBOR serialized, tagged `DeviceNameSpaces`.
pub type DeviceNameSpacesBytes = Tag24<Value>;

impl TryFrom<Value> for DeviceSigned {
    type Error = anyhow::Error;

    fn try_from(value: Value) -> Result<Self> {
        let mut fields = Fields::new(value, "DeviceSigned")?;
        Ok(Self {
            name_spaces: fields.require("nameSpaces")?.try_into()?,
            device_auth: fields.require("deviceAuth")?.try_into()?,
        })
    }
}

impl From<DeviceSigned> for Value {
    fn from(device_signed: DeviceSigned) -> Self {
        Self::Map(vec![
            (Self::Text("nameSpaces".into()), device_signed.name_spaces.into()),
            (Self::Text("deviceAuth".into()), device_signed.device_auth.into()),
        ])
    }
}

/// Device authentication used to authenticate the mdoc response.
///
/// N.B. a single mdoc authentication key cannot be used to produce both
/// signature and MAC.
#[derive(Clone, Debug)]
pub enum DeviceAuth {
    /// `COSE_Sign1` over `DeviceAuthenticationBytes` (detached payload).
    Signature(CoseSign1),

    /// ECDH-agreed `COSE_Mac0`.
    Mac(Value),
}

impl TryFrom<Value> for DeviceAuth {
    type Error = anyhow::Error;

    fn try_from(value: Value) -> Result<Self> {
        let mut fields = Fields::new(value, "DeviceAuth")?;
        if let Some(signature) = fields.take("deviceSignature") {
            return Ok(Self::Signature(cose_sign1(signature)?));
        }
        fields
            .take("deviceMac")
            .map(Self::Mac)
            .ok_or_else(|| anyhow!("missing device authentication"))
    }
}

impl From<DeviceAuth> for Value {
    fn from(device_auth: DeviceAuth) -> Self {
        let (key, value) = match device_auth {
            DeviceAuth::Signature(signature) => {
                ("deviceSignature", signature.to_cbor_value().unwrap_or(Self::Null))
            }
            DeviceAuth::Mac(mac) => ("deviceMac", mac),
        };
        Self::Map(vec![(Self::Text(key.into()), value)])
    }
}

// ----------------------------------------------------------------------------
/// # 9.1.2.4 Signing method and structure for MSO
// ----------------------------------------------------------------------------

/// `IssuerAuth` is comprised of an MSO encapsulated and signed by an untagged
/// `COSE_Sign1` type (RFC 8152).
///
/// The `COSE_Sign1` payload is `MobileSecurityObjectBytes` with the
/// `Sig_structure.external_aad` set to a zero-length bytestring.
#[derive(Clone, Debug, Default)]
pub struct IssuerAuth(pub CoseSign1);

impl TryFrom<Value> for IssuerAuth {
    type Error = anyhow::Error;

    fn try_from(value: Value) -> Result<Self> {
        cose_sign1(value).map(Self)
    }
}

impl From<IssuerAuth> for Value {
    fn from(issuer_auth: IssuerAuth) -> Self {
        issuer_auth.0.to_cbor_value().unwrap_or(Self::Null)
    }
}

// A COSE_Sign1 may arrive tagged (18) or untagged.
fn cose_sign1(value: Value) -> Result<CoseSign1> {
    CoseSign1::from_cbor_value(serde_cbor::untag(value))
        .map_err(|e| anyhow!("invalid COSE_Sign1: {e:?}"))
}

/// An mdoc digital signature is generated over the mobile security object
/// (MSO).
///
/// The MSO is used to provide Issuer data authentication for the associated
/// `mdoc`. It contains a signed digest (e.g. SHA-256) of the `mdoc`, including
/// the digests in the MSO.
#[derive(Clone, Debug)]
pub struct MobileSecurityObject {
    /// Version of the `MobileSecurityObject`. Must be 1.0.
    pub version: String,

    /// Message digest algorithm used. For example, `SHA-256`.
    pub digest_algorithm: String,

    /// Value digests for each data element in each name space.
    pub value_digests: BTreeMap<NameSpace, BTreeMap<DigestId, Vec<u8>>>,

    /// Device key information.
    pub device_key_info: Option<DeviceKeyInfo>,

    /// The document type of the document being signed.
    pub doc_type: DocType,

    /// Validity information for the MSO.
    pub validity_info: ValidityInfo,
}

impl TryFrom<Value> for MobileSecurityObject {
    type Error = anyhow::Error;

    fn try_from(value: Value) -> Result<Self> {
        let mut fields = Fields::new(value, "MobileSecurityObject")?;

        let mut value_digests = BTreeMap::new();
        let digests_by_ns = Fields::new(fields.require("valueDigests")?, "valueDigests")?;
        for (name_space, digests) in digests_by_ns.0 {
            let mut by_id = BTreeMap::new();
            for (id, digest) in Fields::new(digests, "DigestIDs")?.0 {
                let id = serde_cbor::integer(&id, "digestID")?;
                by_id.insert(id, serde_cbor::bytes(digest, "digest")?);
            }
            value_digests.insert(serde_cbor::text(name_space, "namespace")?, by_id);
        }

        Ok(Self {
            version: serde_cbor::text(fields.require("version")?, "version")?,
            digest_algorithm: serde_cbor::text(
                fields.require("digestAlgorithm")?,
                "digestAlgorithm",
            )?,
            value_digests,
            device_key_info: fields.take("deviceKeyInfo").map(DeviceKeyInfo::try_from).transpose()?,
            doc_type: serde_cbor::text(fields.require("docType")?, "docType")?,
            validity_info: fields.require("validityInfo")?.try_into()?,
        })
    }
}

impl From<MobileSecurityObject> for Value {
    fn from(mso: MobileSecurityObject) -> Self {
        let value_digests = mso
            .value_digests
            .into_iter()
            .map(|(ns, digests)| {
                let digests = digests
                    .into_iter()
                    .map(|(id, digest)| (Self::Integer(id.into()), Self::Bytes(digest)))
                    .collect();
                (Self::Text(ns), Self::Map(digests))
            })
            .collect();

        let mut map = vec![
            (Self::Text("version".into()), Self::Text(mso.version)),
            (Self::Text("digestAlgorithm".into()), Self::Text(mso.digest_algorithm)),
            (Self::Text("valueDigests".into()), Self::Map(value_digests)),
        ];
        if let Some(device_key_info) = mso.device_key_info {
            map.push((Self::Text("deviceKeyInfo".into()), device_key_info.into()));
        }
        map.push((Self::Text("docType".into()), Self::Text(mso.doc_type)));
        map.push((Self::Text("validityInfo".into()), mso.validity_info.into()));
        Self::Map(map)
    }
}

/// Holds the mdoc authentication public key and information related to
/// this key.
#[derive(Clone, Debug, Default)]
pub struct DeviceKeyInfo {
    /// Device key, an untagged `COSE_Key`. Kept undecoded so a malformed key
    /// can be reported separately from a malformed MSO.
    pub device_key: Option<Value>,

    /// Key authorizations.
    pub key_authorizations: Option<Value>,

    /// Key info.
    pub key_info: Option<Value>,
}

impl TryFrom<Value> for DeviceKeyInfo {
    type Error = anyhow::Error;

    fn try_from(value: Value) -> Result<Self> {
        let mut fields = Fields::new(value, "DeviceKeyInfo")?;
        Ok(Self {
            device_key: fields.take("deviceKey"),
            key_authorizations: fields.take("keyAuthorizations"),
            key_info: fields.take("keyInfo"),
        })
    }
}

impl From<DeviceKeyInfo> for Value {
    fn from(info: DeviceKeyInfo) -> Self {
        let entries = [
            ("deviceKey", info.device_key),
            ("keyAuthorizations", info.key_authorizations),
            ("keyInfo", info.key_info),
        ];
        Self::Map(
            entries
                .into_iter()
                .filter_map(|(key, value)| value.map(|v| (Self::Text(key.into()), v)))
                .collect(),
        )
    }
}

/// Validity information for the MSO.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidityInfo {
    /// Time the MSO was signed.
    pub signed: DateTime<Utc>,

    /// The time before which the MSO is not yet valid.
    pub valid_from: DateTime<Utc>,

    /// The time after which the MSO is no longer valid.
    pub valid_until: DateTime<Utc>,

    /// The time at which the issuing authority expects to re-sign the MSO.
    pub expected_update: Option<DateTime<Utc>>,
}

impl TryFrom<Value> for ValidityInfo {
    type Error = anyhow::Error;

    fn try_from(value: Value) -> Result<Self> {
        let mut fields = Fields::new(value, "ValidityInfo")?;
        Ok(Self {
            signed: tdate(fields.require("signed")?).context("`signed`")?,
            valid_from: tdate(fields.require("validFrom")?).context("`validFrom`")?,
            valid_until: tdate(fields.require("validUntil")?).context("`validUntil`")?,
            expected_update: fields.take("expectedUpdate").map(tdate).transpose()?,
        })
    }
}

impl From<ValidityInfo> for Value {
    fn from(info: ValidityInfo) -> Self {
        let mut map = vec![
            (Self::Text("signed".into()), to_tdate(info.signed)),
            (Self::Text("validFrom".into()), to_tdate(info.valid_from)),
            (Self::Text("validUntil".into()), to_tdate(info.valid_until)),
        ];
        if let Some(expected_update) = info.expected_update {
            map.push((Self::Text("expectedUpdate".into()), to_tdate(expected_update)));
        }
        Self::Map(map)
    }
}

// tdate (tag 0, RFC 3339) is canonical; epoch seconds (tag 1) is tolerated.
fn tdate(value: Value) -> Result<DateTime<Utc>> {
    match serde_cbor::untag(value) {
        Value::Text(text) => Ok(DateTime::parse_from_rfc3339(&text)?.with_timezone(&Utc)),
        Value::Integer(secs) => {
            let secs = i64::try_from(secs)?;
            DateTime::from_timestamp(secs, 0).ok_or_else(|| anyhow!("timestamp out of range"))
        }
        _ => bail!("not a date"),
    }
}

fn to_tdate(date: DateTime<Utc>) -> Value {
    Value::Tag(0, Box::new(Value::Text(date.to_rfc3339_opts(SecondsFormat::Secs, true))))
}
