//! # mdoc Verification

use anyhow::{Result, anyhow, bail};
use base64ct::{Base64UrlUnpadded, Encoding};
use ciborium::Value;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::ErrorLog;
use crate::key::VerifyingKey;
use crate::mso_mdoc::cose::{self, CoseKey};
use crate::mso_mdoc::{
    DeviceAuth, DeviceResponse, DeviceSigned, Document, Handover, IssuerAuth, IssuerSigned,
    MobileSecurityObject, SessionTranscript, device_authentication_bytes,
};
use crate::provider::{Hasher, Sha2Hasher};
use crate::serde_cbor::{self, Fields};
use crate::trust::TrustContext;
use crate::{CredentialVerifier, Kind, VerificationError, VerificationResult, x509};

/// Options used to check the device binding of a presented mdoc.
///
/// Binding is only checked when all four values are present.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MdocOptions {
    /// The verifier's client identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_audience: Option<String>,

    /// The verifier's response endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_uri: Option<String>,

    /// Nonce provided by the verifier in its request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_nonce: Option<String>,

    /// Nonce generated by the mdoc (wallet) for the presentation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder_nonce: Option<String>,
}

impl MdocOptions {
    // (client_id, response_uri, nonce, mdoc_nonce) when all are present
    fn binding(&self) -> Option<(&str, &str, &str, &str)> {
        Some((
            self.expected_audience.as_deref()?,
            self.response_uri.as_deref()?,
            self.expected_nonce.as_deref()?,
            self.holder_nonce.as_deref()?,
        ))
    }
}

/// How to treat device-signed documents when [`MdocOptions`] is incomplete.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DeviceBinding {
    /// Check the device signature only when all options are provided,
    /// otherwise return the holder key after issuer checks alone.
    #[default]
    WhenComplete,

    /// Reject device-signed documents unless the device signature can be
    /// checked.
    Required,
}

/// Verifies `mso_mdoc` credentials: a base64url encoded `DeviceResponse`,
/// `Document`, or bare `IssuerSigned` structure.
#[derive(Clone, Debug)]
pub struct MdocVerifier<'a, H = Sha2Hasher> {
    trust: &'a TrustContext<H>,
    binding: DeviceBinding,
}

impl<'a, H: Hasher> MdocVerifier<'a, H> {
    /// Create a verifier using the provided trust context.
    #[must_use]
    pub const fn new(trust: &'a TrustContext<H>) -> Self {
        Self {
            trust,
            binding: DeviceBinding::WhenComplete,
        }
    }

    /// Set the device binding policy.
    #[must_use]
    pub const fn binding(mut self, binding: DeviceBinding) -> Self {
        self.binding = binding;
        self
    }
}

impl<H: Hasher> CredentialVerifier for MdocVerifier<'_, H> {
    type Options = MdocOptions;

    #[instrument(level = "debug", skip_all)]
    async fn verify(
        &self, credential: &Kind<serde_json::Value>, options: &MdocOptions,
    ) -> VerificationResult {
        let mut log = ErrorLog::new();

        let Some(encoded) = credential.as_str() else {
            log.push(VerificationError::InvalidDatatype);
            return log.into_result(None, None);
        };

        let holder_key = match decode(encoded) {
            Ok(Credential::Document(Document {
                doc_type,
                issuer_signed,
                device_signed: Some(device_signed),
                ..
            })) => {
                self.verify_device_signed(
                    &doc_type,
                    &issuer_signed,
                    device_signed,
                    options,
                    &mut log,
                )
                .await
            }
            Ok(
                Credential::Document(Document { issuer_signed, .. })
                | Credential::IssuerSigned(issuer_signed),
            ) => self.verify_issuer_signed(&issuer_signed, &mut log).await,
            Err(e) => {
                tracing::debug!("cannot decode mdoc: {e:#}");
                log.push(VerificationError::InvalidFormat);
                None
            }
        };

        log.into_result(holder_key.map(|key| key.to_jwk()), None)
    }
}

// Accepted input shapes.
#[derive(Debug)]
enum Credential {
    Document(Document),
    IssuerSigned(IssuerSigned),
}

fn decode(encoded: &str) -> Result<Credential> {
    let bytes = Base64UrlUnpadded::decode_vec(encoded.trim_end_matches('='))
        .map_err(|e| anyhow!("invalid base64url: {e}"))?;
    let value: Value = serde_cbor::from_slice(&bytes)?;

    let fields = Fields::new(value.clone(), "mdoc")?;
    if fields.contains("documents") {
        let response = DeviceResponse::try_from(value)?;
        let document = response.documents.into_iter().next();
        return document.map(Credential::Document).ok_or_else(|| anyhow!("no documents"));
    }
    if fields.contains("issuerSigned") {
        return Ok(Credential::Document(Document::try_from(value)?));
    }
    if fields.contains("issuerAuth") {
        return Ok(Credential::IssuerSigned(IssuerSigned::try_from(value)?));
    }
    bail!("not a DeviceResponse, Document, or IssuerSigned structure")
}

impl<H: Hasher> MdocVerifier<'_, H> {
    async fn verify_issuer_signed(
        &self, issuer_signed: &IssuerSigned, log: &mut ErrorLog,
    ) -> Option<VerifyingKey> {
        let mso = mobile_security_object(issuer_signed, log)?;
        tracing::debug!(doc_type = %mso.doc_type, "issuer-signed mdoc");

        if self.trust.is_expired(mso.validity_info.valid_until) {
            log.push(VerificationError::ExpiredCredential);
            return None;
        }
        let undecodable = VerificationError::InvalidCertificateChain;
        if self.trust.has_trusted_roots()
            && !self.check_issuer(&issuer_signed.issuer_auth, undecodable, log)
        {
            return None;
        }
        if !self.check_digests(issuer_signed, &mso, log).await {
            return None;
        }

        device_key(&mso, log)
    }

    async fn verify_device_signed(
        &self, doc_type: &str, issuer_signed: &IssuerSigned, device_signed: DeviceSigned,
        options: &MdocOptions, log: &mut ErrorLog,
    ) -> Option<VerifyingKey> {
        let mso = mobile_security_object(issuer_signed, log)?;

        let undecodable = VerificationError::NotTrustedIssuer;
        if self.trust.has_trusted_roots()
            && !self.check_issuer(&issuer_signed.issuer_auth, undecodable, log)
        {
            return None;
        }
        if self.trust.is_expired(mso.validity_info.valid_until) {
            log.push(VerificationError::ExpiredCredential);
            return None;
        }
        if doc_type != mso.doc_type {
            tracing::debug!(doc_type, mso = %mso.doc_type, "document type does not match MSO");
            log.push(VerificationError::InvalidFormat);
            return None;
        }
        if !self.check_digests(issuer_signed, &mso, log).await {
            return None;
        }
        let key = device_key(&mso, log)?;

        let Some((client_id, response_uri, nonce, mdoc_nonce)) = options.binding() else {
            if self.binding == DeviceBinding::Required {
                tracing::debug!("device binding required but options are incomplete");
                log.push(VerificationError::InvalidSignature);
                return None;
            }
            tracing::debug!("options incomplete: skipping device binding");
            return Some(key);
        };

        let hasher = self.trust.hasher();
        let handover =
            match Handover::oid4vp(hasher, client_id, response_uri, mdoc_nonce, nonce).await {
                Ok(handover) => handover,
                Err(e) => {
                    tracing::debug!("cannot build session transcript: {e:#}");
                    log.push(VerificationError::InvalidSignature);
                    return None;
                }
            };
        let transcript = SessionTranscript { handover };
        if let Err(e) = verify_device_auth(doc_type, device_signed, transcript, &key) {
            tracing::debug!("device authentication failed: {e:#}");
            log.push(VerificationError::InvalidSignature);
            return None;
        }

        Some(key)
    }

    // Checks the issuer's `x5chain` against the trusted roots, then the
    // `issuerAuth` signature using the chain's leaf key. Returns `false` when
    // verification cannot continue.
    fn check_issuer(
        &self, issuer_auth: &IssuerAuth, undecodable: VerificationError, log: &mut ErrorLog,
    ) -> bool {
        let chain = match cose::x5chain(&issuer_auth.0) {
            None => {
                tracing::debug!("issuerAuth has no x5chain");
                log.push(VerificationError::NotTrustedIssuer);
                return true;
            }
            Some(ders) => match ders.and_then(|d| x509::decode_chain(&d).map_err(Into::into)) {
                Ok(chain) => chain,
                Err(e) => {
                    tracing::debug!("cannot decode x5chain: {e:#}");
                    log.push(undecodable);
                    return false;
                }
            },
        };

        if let Err(e) = x509::validate_chain(&chain, self.trust.anchors(), self.trust.now()) {
            tracing::debug!("issuer chain is not trusted: {e:#}");
            log.push(VerificationError::NotTrustedIssuer);
        }
        let Some(leaf) = chain.first() else {
            return true;
        };

        let key = match VerifyingKey::from_certificate(leaf) {
            Ok(key) => key,
            Err(e) => {
                tracing::debug!("cannot import issuer key: {e:#}");
                log.push(VerificationError::CannotImportIssuerPublicKey);
                return false;
            }
        };
        if let Err(e) = cose::verify_sign1(&issuer_auth.0, &key) {
            tracing::debug!("issuerAuth signature is invalid: {e:#}");
            log.push(VerificationError::InvalidSignature);
        }
        true
    }

    // Every returned data element must match its digest in the MSO.
    async fn check_digests(
        &self, issuer_signed: &IssuerSigned, mso: &MobileSecurityObject, log: &mut ErrorLog,
    ) -> bool {
        for (name_space, items) in &issuer_signed.name_spaces {
            for item in items {
                let expected = mso
                    .value_digests
                    .get(name_space)
                    .and_then(|digests| digests.get(&item.value.digest_id));

                let digest = match item.to_tagged_vec() {
                    Ok(tagged) => self.trust.digest(&mso.digest_algorithm, &tagged).await,
                    Err(e) => Err(e),
                };
                match digest {
                    Ok(digest) if Some(&digest) == expected => {}
                    Ok(_) => {
                        tracing::debug!(
                            %name_space,
                            element = %item.value.element_identifier,
                            "value digest mismatch"
                        );
                        log.push(VerificationError::InvalidSignature);
                        return false;
                    }
                    Err(e) => {
                        tracing::debug!("cannot digest issuer-signed item: {e:#}");
                        log.push(VerificationError::InvalidSignature);
                        return false;
                    }
                }
            }
        }
        true
    }
}

fn mobile_security_object(
    issuer_signed: &IssuerSigned, log: &mut ErrorLog,
) -> Option<MobileSecurityObject> {
    match issuer_signed.mobile_security_object() {
        Ok(mso) => Some(mso),
        Err(e) => {
            tracing::debug!("cannot decode MSO: {e:#}");
            log.push(VerificationError::InvalidFormat);
            None
        }
    }
}

// The holder's key is the MSO's device key.
fn device_key(mso: &MobileSecurityObject, log: &mut ErrorLog) -> Option<VerifyingKey> {
    let Some(device_key) = mso.device_key_info.as_ref().and_then(|info| info.device_key.clone())
    else {
        log.push(VerificationError::MsoMdocMissingDeviceKeyInfo);
        return None;
    };

    let cose_key = match CoseKey::try_from(device_key) {
        Ok(cose_key) => cose_key,
        Err(e) => {
            tracing::debug!("cannot decode device key: {e:#}");
            log.push(VerificationError::CannotExtractHolderPublicKey);
            return None;
        }
    };
    match cose_key.verifying_key() {
        Ok(key) => Some(key),
        Err(e) => {
            tracing::debug!("cannot import device key: {e:#}");
            log.push(VerificationError::CannotImportHolderPublicKey);
            None
        }
    }
}

fn verify_device_auth(
    doc_type: &str, device_signed: DeviceSigned, transcript: SessionTranscript, key: &VerifyingKey,
) -> Result<()> {
    let DeviceAuth::Signature(signature) = device_signed.device_auth else {
        bail!("deviceMac is not supported");
    };
    let payload = device_authentication_bytes(transcript, doc_type, device_signed.name_spaces)?;
    cose::verify_detached(&signature, &payload, key)
}

#[cfg(test)]
mod tests {
    use ciborium::cbor;
    use serde_json::json;

    use super::*;

    fn encode(value: &Value) -> String {
        Base64UrlUnpadded::encode_string(&serde_cbor::to_vec(value).expect("should encode"))
    }

    #[test]
    fn binding_requires_all_options() {
        let mut options = MdocOptions {
            expected_audience: Some("client".to_string()),
            response_uri: Some("https://verifier.example/response".to_string()),
            expected_nonce: Some("nonce".to_string()),
            holder_nonce: None,
        };
        assert!(options.binding().is_none());

        options.holder_nonce = Some("mdoc-nonce".to_string());
        assert_eq!(
            options.binding(),
            Some(("client", "https://verifier.example/response", "nonce", "mdoc-nonce"))
        );
    }

    #[test]
    fn options_serde() {
        let options: MdocOptions = serde_json::from_value(json!({
            "expectedAudience": "client",
            "holderNonce": "mdoc-nonce"
        }))
        .expect("should deserialize");
        assert_eq!(options.holder_nonce.as_deref(), Some("mdoc-nonce"));
        assert!(options.response_uri.is_none());
    }

    #[test]
    fn decode_rejects_unknown_shapes() {
        assert!(decode("not base64url!").is_err());
        assert!(decode(&encode(&cbor!({"status" => 0}).expect("valid"))).is_err());
        assert!(decode(&encode(&cbor!(["documents"]).expect("valid"))).is_err());
        assert!(decode(&encode(&cbor!({"documents" => []}).expect("valid"))).is_err());
    }

    #[tokio::test]
    async fn invalid_datatype() {
        let trust = TrustContext::default();
        let verifier = MdocVerifier::new(&trust);
        let credential = Kind::Object(json!({"issuerAuth": []}));

        let result = verifier.verify(&credential, &MdocOptions::default()).await;
        assert_eq!(result.error(), Some(VerificationError::InvalidDatatype));
    }

    #[tokio::test]
    async fn invalid_format() {
        let trust = TrustContext::default();
        let verifier = MdocVerifier::new(&trust);

        let result = verifier.verify_str("%%%", &MdocOptions::default()).await;
        assert_eq!(result.error(), Some(VerificationError::InvalidFormat));

        let issuer_auth = encode(&cbor!({"issuerAuth" => "not a COSE_Sign1"}).expect("valid"));
        let result = verifier.verify_str(&issuer_auth, &MdocOptions::default()).await;
        assert_eq!(result.error(), Some(VerificationError::InvalidFormat));
    }
}
