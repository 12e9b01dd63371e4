//! # X.509
//!
//! Certificate chain validation against the configured trust anchors.

use anyhow::{Result, anyhow, bail, ensure};
use chrono::{DateTime, Utc};
use x509_cert::Certificate;
use x509_cert::der::oid::{AssociatedOid, ObjectIdentifier};
use x509_cert::der::{self, Decode, Encode};
use x509_cert::ext::pkix::{BasicConstraints, KeyUsage};

use crate::key::VerifyingKey;

const ECDSA_WITH_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
const ECDSA_WITH_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");
const ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");

/// Decode a chain of DER encoded certificates.
pub(crate) fn decode_chain<T: AsRef<[u8]>>(chain: &[T]) -> der::Result<Vec<Certificate>> {
    chain.iter().map(|der| Certificate::from_der(der.as_ref())).collect()
}

/// Validate `chain` (leaf first) against `anchors` at time `now`.
///
/// Every certificate must be within its validity period and signed by the
/// next. The final certificate must either be a trust anchor or be signed
/// by one. Every issuing certificate, anchor included, must be a CA allowed
/// to sign certificates.
pub(crate) fn validate_chain<'a>(
    chain: &[Certificate], anchors: impl IntoIterator<Item = &'a Certificate>, now: DateTime<Utc>,
) -> Result<()> {
    let Some(last) = chain.last() else {
        bail!("certificate chain is empty");
    };

    for certificate in chain {
        check_validity(certificate, now)?;
    }
    verify_links(chain)?;

    let depth = chain.len() - 1;
    for anchor in anchors {
        if anchor == last {
            return Ok(());
        }
        if check_validity(anchor, now).is_ok()
            && check_ca(anchor, depth).is_ok()
            && verify_issued_by(last, anchor).is_ok()
        {
            return Ok(());
        }
    }

    Err(anyhow!("certificate chain does not end at a trusted root"))
}

/// Verify that each certificate in `chain` is signed by the next, and that
/// each issuing certificate is a CA. Validity periods are not checked.
pub(crate) fn verify_links(chain: &[Certificate]) -> Result<()> {
    for (depth, pair) in chain.windows(2).enumerate() {
        check_ca(&pair[1], depth)?;
        verify_issued_by(&pair[0], &pair[1])?;
    }
    Ok(())
}

fn check_validity(certificate: &Certificate, now: DateTime<Utc>) -> Result<()> {
    let validity = &certificate.tbs_certificate.validity;
    let not_before = validity.not_before.to_unix_duration().as_secs();
    let not_after = validity.not_after.to_unix_duration().as_secs();
    let now = u64::try_from(now.timestamp()).unwrap_or_default();

    ensure!(now >= not_before, "certificate is not yet valid");
    ensure!(now <= not_after, "certificate has expired");
    Ok(())
}

// `depth` is the number of intermediate CA certificates below `issuer`.
fn check_ca(issuer: &Certificate, depth: usize) -> Result<()> {
    let extensions = issuer.tbs_certificate.extensions.as_deref().unwrap_or_default();

    let Some(constraints) = extensions.iter().find(|e| e.extn_id == BasicConstraints::OID) else {
        bail!("issuing certificate has no basic constraints");
    };
    let constraints = BasicConstraints::from_der(constraints.extn_value.as_bytes())?;
    ensure!(constraints.ca, "issuing certificate is not a CA");
    if let Some(path_len) = constraints.path_len_constraint {
        ensure!(depth <= usize::from(path_len), "certificate path length exceeded");
    }

    if let Some(usage) = extensions.iter().find(|e| e.extn_id == KeyUsage::OID) {
        let usage = KeyUsage::from_der(usage.extn_value.as_bytes())?;
        ensure!(usage.key_cert_sign(), "issuing certificate may not sign certificates");
    }
    Ok(())
}

fn verify_issued_by(certificate: &Certificate, issuer: &Certificate) -> Result<()> {
    ensure!(
        certificate.tbs_certificate.issuer == issuer.tbs_certificate.subject,
        "certificate issuer does not match issuer subject"
    );

    let key = VerifyingKey::from_certificate(issuer)?;
    let algorithm = certificate.signature_algorithm.oid;
    let supported = match &key {
        VerifyingKey::P256(_) => algorithm == ECDSA_WITH_SHA256,
        VerifyingKey::P384(_) => algorithm == ECDSA_WITH_SHA384,
        VerifyingKey::Ed25519(_) => algorithm == ED25519,
    };
    ensure!(supported, "unsupported certificate signature algorithm {algorithm}");

    let tbs = certificate.tbs_certificate.to_der()?;
    key.verify_der(&tbs, certificate.signature.raw_bytes())
}
