//! # Verification Errors

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::VerificationResult;
use crate::jose::PublicKeyJwk;

/// Reasons a credential can fail verification.
///
/// The set is flat: each variant is a distinct, caller-visible failure
/// kind shared by all credential formats.
#[derive(Error, Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VerificationError {
    /// The credential was not provided as a string.
    #[error("credential is not a string")]
    InvalidDatatype,

    /// The credential could not be decoded.
    #[error("credential format is invalid")]
    InvalidFormat,

    /// The credential is no longer valid.
    #[error("credential has expired")]
    ExpiredCredential,

    /// The issuer's certificate chain does not lead to a trusted root.
    #[error("issuer is not trusted")]
    NotTrustedIssuer,

    /// The issuer's certificate chain could not be decoded.
    #[error("certificate chain is invalid")]
    InvalidCertificateChain,

    /// A signature or integrity digest did not verify.
    #[error("signature is invalid")]
    InvalidSignature,

    /// The mdoc's mobile security object has no device key.
    #[error("mso_mdoc is missing device key info")]
    MsoMdocMissingDeviceKeyInfo,

    /// The holder's public key could not be found in the credential.
    #[error("cannot extract holder public key")]
    CannotExtractHolderPublicKey,

    /// The holder's public key is malformed or unsupported.
    #[error("cannot import holder public key")]
    CannotImportHolderPublicKey,

    /// The issuer's public key could not be located.
    #[error("cannot resolve issuer public key")]
    CannotResolveIssuerPublicKey,

    /// The issuer's public key is malformed or unsupported.
    #[error("cannot import issuer public key")]
    CannotImportIssuerPublicKey,

    /// The key binding JWT is missing `sd_hash`, `nonce`, or `aud`.
    #[error("kb-jwt is missing required parameters")]
    KbJwtMissingParameters,

    /// The key binding JWT's `sd_hash` does not match the presentation.
    #[error("kb-jwt `sd_hash` does not match")]
    KbJwtWrongSdHash,

    /// The key binding JWT's `aud` is not the expected audience.
    #[error("kb-jwt audience is unexpected")]
    KbJwtUnexpectedAudience,

    /// The key binding JWT's `nonce` is not the expected nonce.
    #[error("kb-jwt nonce is unexpected")]
    KbJwtUnexpectedNonce,

    /// The key binding JWT's signature did not verify.
    #[error("kb-jwt signature is invalid")]
    KbJwtInvalidSignature,

    /// Verification failed for an unclassified reason.
    #[error("unknown problem")]
    UnknownProblem,
}

/// Errors logged during a single verification.
///
/// The log is append-only. Its first entry is the error reported to the
/// caller, later entries are diagnostic only.
#[derive(Debug, Default)]
pub(crate) struct ErrorLog {
    errors: Vec<VerificationError>,
}

impl ErrorLog {
    pub(crate) const fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub(crate) fn push(&mut self, error: VerificationError) {
        tracing::debug!(%error, position = self.errors.len(), "verification error");
        self.errors.push(error);
    }

    pub(crate) fn first(&self) -> Option<VerificationError> {
        self.errors.first().copied()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Resolve the log into a result. Success requires both an empty log and
    /// a holder key.
    pub(crate) fn into_result(
        self, holder_public_key: Option<PublicKeyJwk>, extra_claims: Option<Map<String, Value>>,
    ) -> VerificationResult {
        if let Some(error) = self.first() {
            return VerificationResult::Failure { error };
        }
        holder_public_key.map_or(
            VerificationResult::Failure {
                error: VerificationError::UnknownProblem,
            },
            |holder_public_key| VerificationResult::Success {
                holder_public_key,
                extra_claims,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_error_wins() {
        let mut log = ErrorLog::new();
        log.push(VerificationError::NotTrustedIssuer);
        log.push(VerificationError::InvalidSignature);

        let result = log.into_result(Some(PublicKeyJwk::default()), None);
        assert_eq!(result.error(), Some(VerificationError::NotTrustedIssuer));
    }

    #[test]
    fn empty_log_without_key() {
        let log = ErrorLog::new();
        assert!(log.is_empty());
        let result = log.into_result(None, None);
        assert_eq!(result.error(), Some(VerificationError::UnknownProblem));
    }

    #[test]
    fn empty_log_with_key() {
        let result = ErrorLog::new().into_result(Some(PublicKeyJwk::default()), None);
        assert!(result.is_success());
    }

    #[test]
    fn display() {
        assert_eq!(VerificationError::ExpiredCredential.to_string(), "credential has expired");
    }
}
