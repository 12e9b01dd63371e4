//! Certificate authority issuing P-256 X.509 certificates.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Result, anyhow};
use p256::ecdsa::{DerSignature, SigningKey, VerifyingKey};
use rand_core::OsRng;
use x509_cert::Certificate;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::der::pem::LineEnding;
use x509_cert::der::{Decode, Encode, EncodePem};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::Validity;

const ONE_YEAR: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// A self-signed root able to issue leaf certificates.
pub struct CertificateAuthority {
    key: SigningKey,
    root: Certificate,
    issued: u32,
}

impl CertificateAuthority {
    /// Create a root certificate for `common_name`, valid from now for one
    /// year.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate cannot be built.
    pub fn new(common_name: &str) -> Result<Self> {
        let key = SigningKey::random(&mut OsRng);
        let subject = Name::from_str(&format!("CN={common_name},O=Credibil Test,C=NZ"))
            .map_err(|e| anyhow!("invalid name: {e}"))?;

        let root = build(Profile::Root, 1, subject, key.verifying_key(), &key)?;
        Ok(Self { key, root, issued: 1 })
    }

    /// The root certificate.
    #[must_use]
    pub const fn root(&self) -> &Certificate {
        &self.root
    }

    /// The root certificate, PEM encoded.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate cannot be encoded.
    pub fn root_pem(&self) -> Result<String> {
        self.root.to_pem(LineEnding::LF).map_err(|e| anyhow!("encoding PEM: {e}"))
    }

    /// The root certificate, DER encoded.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate cannot be encoded.
    pub fn root_der(&self) -> Result<Vec<u8>> {
        self.root.to_der().map_err(|e| anyhow!("encoding DER: {e}"))
    }

    /// Issue a DER encoded leaf certificate for `subject_key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate cannot be built.
    pub fn issue(&mut self, common_name: &str, subject_key: &VerifyingKey) -> Result<Vec<u8>> {
        self.issued += 1;
        let subject = Name::from_str(&format!("CN={common_name},O=Credibil Test,C=NZ"))
            .map_err(|e| anyhow!("invalid name: {e}"))?;
        let profile = Profile::Leaf {
            issuer: self.root.tbs_certificate.subject.clone(),
            enable_key_agreement: false,
            enable_key_encipherment: false,
        };

        let leaf = build(profile, self.issued, subject, subject_key, &self.key)?;
        leaf.to_der().map_err(|e| anyhow!("encoding DER: {e}"))
    }
}

/// Issue a DER encoded leaf certificate for `subject_key`, signed by the
/// holder of `issuer` whatever its basic constraints.
///
/// # Errors
///
/// Returns an error if `issuer` cannot be decoded or the certificate cannot
/// be built.
pub fn issue_under(
    issuer: &[u8], issuer_key: &SigningKey, common_name: &str, subject_key: &VerifyingKey,
) -> Result<Vec<u8>> {
    let issuer = Certificate::from_der(issuer).map_err(|e| anyhow!("decoding issuer: {e}"))?;
    let subject = Name::from_str(&format!("CN={common_name},O=Credibil Test,C=NZ"))
        .map_err(|e| anyhow!("invalid name: {e}"))?;
    let profile = Profile::Leaf {
        issuer: issuer.tbs_certificate.subject,
        enable_key_agreement: false,
        enable_key_encipherment: false,
    };

    let leaf = build(profile, 1, subject, subject_key, issuer_key)?;
    leaf.to_der().map_err(|e| anyhow!("encoding DER: {e}"))
}

fn build(
    profile: Profile, serial: u32, subject: Name, subject_key: &VerifyingKey, signer: &SigningKey,
) -> Result<Certificate> {
    let spki = SubjectPublicKeyInfoOwned::from_key(*subject_key)
        .map_err(|e| anyhow!("encoding public key: {e}"))?;
    let validity = Validity::from_now(ONE_YEAR).map_err(|e| anyhow!("validity: {e}"))?;

    // minimal big-endian encoding
    let bytes = serial.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    let serial_number =
        SerialNumber::new(&bytes[start..]).map_err(|e| anyhow!("serial number: {e}"))?;

    let builder = CertificateBuilder::new(
        profile,
        serial_number,
        validity,
        subject,
        spki,
        signer,
    )
    .map_err(|e| anyhow!("creating certificate builder: {e}"))?;
    builder.build::<DerSignature>().map_err(|e| anyhow!("signing certificate: {e}"))
}
