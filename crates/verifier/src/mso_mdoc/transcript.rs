//! # Session Transcript
//!
//! Binds a device signature to a single verifier interaction. The handover
//! is the `OpenID4VP` form used for redirect and `direct_post` presentations
//! ([OpenID4VP] appendix B.3.4.1).
//!
//! [OpenID4VP]: https://openid.net/specs/openid-4-verifiable-presentations-1_0.html

use anyhow::Result;
use ciborium::Value;

use crate::mso_mdoc::{DeviceNameSpacesBytes, Tag24};
use crate::provider::Hasher;
use crate::serde_cbor;

/// `OpenID4VP` handover: `[clientIdHash, responseUriHash, nonce]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handover {
    /// SHA-256 of `[client_id, mdoc_generated_nonce]`.
    pub client_id_hash: Vec<u8>,

    /// SHA-256 of `[response_uri, mdoc_generated_nonce]`.
    pub response_uri_hash: Vec<u8>,

    /// The verifier's nonce.
    pub nonce: String,
}

impl Handover {
    /// Build the handover for an `OpenID4VP` presentation.
    ///
    /// # Errors
    ///
    /// Returns an error if hashing fails.
    pub async fn oid4vp(
        hasher: &impl Hasher, client_id: &str, response_uri: &str, mdoc_nonce: &str, nonce: &str,
    ) -> Result<Self> {
        let client_id_info = cbor_pair(client_id, mdoc_nonce)?;
        let response_uri_info = cbor_pair(response_uri, mdoc_nonce)?;

        Ok(Self {
            client_id_hash: hasher.digest("sha-256", &client_id_info).await?,
            response_uri_hash: hasher.digest("sha-256", &response_uri_info).await?,
            nonce: nonce.to_string(),
        })
    }
}

fn cbor_pair(first: &str, second: &str) -> Result<Vec<u8>> {
    serde_cbor::to_vec(&Value::Array(vec![
        Value::Text(first.to_string()),
        Value::Text(second.to_string()),
    ]))
}

impl From<Handover> for Value {
    fn from(handover: Handover) -> Self {
        Self::Array(vec![
            Self::Bytes(handover.client_id_hash),
            Self::Bytes(handover.response_uri_hash),
            Self::Text(handover.nonce),
        ])
    }
}

/// `SessionTranscript = [DeviceEngagementBytes, EReaderKeyBytes, Handover]`.
///
/// Presentations over `OpenID4VP` have no device engagement or reader key,
/// so both are null.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionTranscript {
    /// Protocol-specific handover.
    pub handover: Handover,
}

impl From<SessionTranscript> for Value {
    fn from(transcript: SessionTranscript) -> Self {
        Self::Array(vec![Self::Null, Self::Null, transcript.handover.into()])
    }
}

/// `DeviceAuthenticationBytes`: the detached payload of the device signature.
///
/// ```cddl
/// DeviceAuthentication = [
///     "DeviceAuthentication",
///     SessionTranscript,
///     DocType,
///     DeviceNameSpacesBytes
/// ]
/// DeviceAuthenticationBytes = #6.24(bstr .cbor DeviceAuthentication)
/// ```
///
/// # Errors
///
/// Returns an error if the structure cannot be CBOR encoded.
pub fn device_authentication_bytes(
    transcript: SessionTranscript, doc_type: &str, name_spaces: DeviceNameSpacesBytes,
) -> Result<Vec<u8>> {
    let device_authentication = Value::Array(vec![
        Value::Text("DeviceAuthentication".to_string()),
        transcript.into(),
        Value::Text(doc_type.to_string()),
        name_spaces.into(),
    ]);
    Tag24::new(device_authentication)?.to_tagged_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Sha2Hasher;

    #[tokio::test]
    async fn handover() {
        let handover = Handover::oid4vp(
            &Sha2Hasher,
            "x509_san_dns:verifier.example",
            "https://verifier.example/response",
            "mdoc-nonce",
            "n-0S6_WzA2Mj",
        )
        .await
        .expect("should build");

        assert_eq!(handover.client_id_hash.len(), 32);
        assert_ne!(handover.client_id_hash, handover.response_uri_hash);

        let transcript: Value = SessionTranscript { handover }.into();
        let Value::Array(items) = transcript else {
            panic!("transcript should be an array");
        };
        assert_eq!(items[0], Value::Null);
        assert_eq!(items[1], Value::Null);
        assert!(matches!(&items[2], Value::Array(h) if h.len() == 3));
    }

    #[test]
    fn client_id_info() {
        // 0x82 = array(2), 0x61 = text(1)
        assert_eq!(cbor_pair("a", "b").expect("should encode"), vec![0x82, 0x61, b'a', 0x61, b'b']);
    }

    #[test]
    fn authentication_bytes() {
        let transcript = SessionTranscript {
            handover: Handover {
                client_id_hash: vec![1; 32],
                response_uri_hash: vec![2; 32],
                nonce: "nonce".to_string(),
            },
        };
        let name_spaces = Tag24::new(Value::Map(vec![])).expect("should encode");
        let bytes = device_authentication_bytes(transcript, "org.iso.18013.5.1.mDL", name_spaces)
            .expect("should encode");

        let decoded: Value = serde_cbor::from_slice(&bytes).expect("should decode");
        let Value::Tag(24, inner) = decoded else {
            panic!("should be tag 24");
        };
        let inner = inner.as_bytes().expect("should be bytes");
        let Value::Array(items) = serde_cbor::from_slice::<Value>(inner).expect("should decode") else {
            panic!("should be an array");
        };
        assert_eq!(items[0], Value::Text("DeviceAuthentication".into()));
        assert_eq!(items[2], Value::Text("org.iso.18013.5.1.mDL".into()));
    }
}
