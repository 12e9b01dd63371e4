//! # Credential Verification
//!
//! Cryptographic verification of digital credentials held by, or presented
//! to, a wallet. Claims carried by a credential should only be trusted (or
//! displayed) once the credential has passed verification.
//!
//! Two credential formats are supported:
//!
//! * `mso_mdoc`: [ISO/IEC 18013-5] mobile documents, encoded as CBOR and
//!   secured with COSE. See [`mso_mdoc::MdocVerifier`].
//! * `dc+sd-jwt`: [SD-JWT-based Verifiable Credentials]. See
//!   [`sd_jwt::SdJwtVerifier`].
//!
//! Both verifiers implement [`CredentialVerifier`] and never return an error
//! or panic: every outcome is reported as a [`VerificationResult`]. When more
//! than one problem is found, the first one encountered is reported.
//!
//! [ISO/IEC 18013-5]: https://www.iso.org/standard/69084.html
//! [SD-JWT-based Verifiable Credentials]: https://datatracker.ietf.org/doc/draft-ietf-oauth-sd-jwt-vc

pub mod jose;
pub mod mso_mdoc;
pub mod sd_jwt;

mod error;
mod key;
mod provider;
mod serde_cbor;
mod trust;
mod x509;

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use crate::error::VerificationError;
pub use crate::jose::PublicKeyJwk;
pub use crate::mso_mdoc::{DeviceBinding, MdocOptions, MdocVerifier};
pub use crate::provider::{Hasher, Resolver, Sha2Hasher};
pub use crate::sd_jwt::{SdJwtOptions, SdJwtVerifier};
pub use crate::trust::{TrustConfig, TrustContext};

/// Verifies a raw credential of a single format.
///
/// Implementations decode the credential, check issuer trust and expiry,
/// check any holder-binding proof, and extract the holder's public key.
pub trait CredentialVerifier: Send + Sync {
    /// Format-specific verification options.
    type Options: Send + Sync;

    /// Verify `credential`, returning the holder's public key on success.
    ///
    /// Credentials are expected to be encoded as strings. Any other JSON
    /// value results in [`VerificationError::InvalidDatatype`].
    fn verify(
        &self, credential: &Kind<Value>, options: &Self::Options,
    ) -> impl Future<Output = VerificationResult> + Send;

    /// Verify a string-encoded credential.
    fn verify_str(
        &self, credential: &str, options: &Self::Options,
    ) -> impl Future<Output = VerificationResult> + Send {
        let credential = Kind::String(credential.to_owned());
        async move { self.verify(&credential, options).await }
    }
}

/// The outcome of verifying a credential.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum VerificationResult {
    /// The credential is valid.
    Success {
        /// The public key the credential is bound to.
        holder_public_key: PublicKeyJwk,

        /// Additional, format-specific, verification output.
        #[serde(skip_serializing_if = "Option::is_none")]
        extra_claims: Option<Map<String, Value>>,
    },

    /// The credential failed verification.
    Failure {
        /// The first problem found.
        error: VerificationError,
    },
}

impl VerificationResult {
    /// Returns `true` when verification succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The holder's public key, when verification succeeded.
    #[must_use]
    pub const fn holder_public_key(&self) -> Option<&PublicKeyJwk> {
        match self {
            Self::Success { holder_public_key, .. } => Some(holder_public_key),
            Self::Failure { .. } => None,
        }
    }

    /// The verification error, when verification failed.
    #[must_use]
    pub const fn error(&self) -> Option<VerificationError> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error } => Some(*error),
        }
    }
}

/// `Kind` allows serde to serialize/deserialize a string or an object.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Kind<T> {
    /// Simple string value
    String(String),

    /// Complex object value
    Object(T),
}

impl<T> Default for Kind<T> {
    fn default() -> Self {
        Self::String(String::new())
    }
}

impl<T> From<String> for Kind<T> {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl<T> From<&str> for Kind<T> {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl<T> Kind<T> {
    /// Returns the string value, if the `Kind` is a string.
    pub const fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            Self::Object(_) => None,
        }
    }

    /// Returns the object value, if the `Kind` is an object.
    pub const fn as_object(&self) -> Option<&T> {
        match self {
            Self::String(_) => None,
            Self::Object(o) => Some(o),
        }
    }
}
