//! # Trust Context
//!
//! Caller-supplied trust settings shared, read-only, by every verification.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use x509_cert::Certificate;
use x509_cert::der::{Decode, DecodePem};

use crate::provider::{Hasher, Sha2Hasher};

/// Serializable trust settings.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct TrustConfig {
    /// Leeway, in seconds, applied to expiry and not-before checks.
    pub clock_tolerance: u64,

    /// Locale of the caller.
    pub locale: String,

    /// PEM-encoded root certificates trusted to anchor issuer certificate
    /// chains.
    pub trusted_root_certificates: Vec<String>,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            clock_tolerance: 0,
            locale: "en".to_string(),
            trusted_root_certificates: Vec::new(),
        }
    }
}

/// A trusted root certificate.
#[derive(Clone, Debug)]
struct TrustedRoot {
    pem: String,
    certificate: Option<Certificate>,
}

/// Immutable trust context used for verification.
///
/// Trusted roots are parsed once, on construction. Roots that cannot be
/// parsed are kept (for PEM comparison) but cannot anchor a chain.
#[derive(Clone, Debug)]
pub struct TrustContext<H = Sha2Hasher> {
    clock_tolerance: u64,
    locale: String,
    trusted_roots: Vec<TrustedRoot>,
    time: Option<DateTime<Utc>>,
    hasher: H,
}

impl TrustContext<Sha2Hasher> {
    /// Create a trust context using SHA-2 digests.
    #[must_use]
    pub fn new(config: TrustConfig) -> Self {
        Self::with_hasher(config, Sha2Hasher)
    }
}

impl Default for TrustContext<Sha2Hasher> {
    fn default() -> Self {
        Self::new(TrustConfig::default())
    }
}

impl<H: Hasher> TrustContext<H> {
    /// Create a trust context using the provided digest capability.
    pub fn with_hasher(config: TrustConfig, hasher: H) -> Self {
        let trusted_roots = config
            .trusted_root_certificates
            .into_iter()
            .map(|pem| {
                let certificate = Certificate::from_pem(pem.trim().as_bytes())
                    .inspect_err(|e| tracing::warn!("ignoring unreadable trusted root: {e}"))
                    .ok();
                TrustedRoot { pem, certificate }
            })
            .collect();

        Self {
            clock_tolerance: config.clock_tolerance,
            locale: config.locale,
            trusted_roots,
            time: None,
            hasher,
        }
    }

    /// Evaluate validity at a fixed instant rather than the system clock.
    #[must_use]
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    /// Clock tolerance, in seconds.
    pub const fn clock_tolerance(&self) -> u64 {
        self.clock_tolerance
    }

    /// The caller's locale.
    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// PEM-encoded trusted root certificates, as configured.
    pub fn trusted_root_certificates(&self) -> impl Iterator<Item = &str> {
        self.trusted_roots.iter().map(|root| root.pem.as_str())
    }

    /// Returns `true` if any trusted roots are configured.
    pub fn has_trusted_roots(&self) -> bool {
        !self.trusted_roots.is_empty()
    }

    /// The instant against which validity is evaluated.
    pub fn now(&self) -> DateTime<Utc> {
        self.time.unwrap_or_else(Utc::now)
    }

    /// Digest `data` with the named algorithm.
    ///
    /// # Errors
    ///
    /// Returns an error if the algorithm is unsupported.
    pub async fn digest(&self, algorithm: &str, data: &[u8]) -> Result<Vec<u8>> {
        self.hasher.digest(algorithm, data).await
    }

    /// The digest capability.
    pub const fn hasher(&self) -> &H {
        &self.hasher
    }

    /// Returns `true` when `valid_until`, extended by the clock tolerance, is
    /// in the past. Comparison is in whole seconds, so a credential is still
    /// valid at exactly `valid_until + clock_tolerance`.
    pub fn is_expired(&self, valid_until: DateTime<Utc>) -> bool {
        let tolerance = i64::try_from(self.clock_tolerance).unwrap_or(i64::MAX);
        valid_until.timestamp().saturating_add(tolerance) < self.now().timestamp()
    }

    /// Returns `true` when `not_before`, less the clock tolerance, is in the
    /// future.
    pub(crate) fn is_premature(&self, not_before: DateTime<Utc>) -> bool {
        let tolerance = i64::try_from(self.clock_tolerance).unwrap_or(i64::MAX);
        not_before.timestamp().saturating_sub(tolerance) > self.now().timestamp()
    }

    /// Parsed trust anchors.
    pub(crate) fn anchors(&self) -> impl Iterator<Item = &Certificate> {
        self.trusted_roots.iter().filter_map(|root| root.certificate.as_ref())
    }

    /// Returns `true` if `der` is, byte for byte, one of the trusted roots.
    pub(crate) fn is_trusted_root(&self, der: &[u8]) -> bool {
        let Ok(certificate) = Certificate::from_der(der) else {
            return false;
        };
        self.anchors().any(|anchor| *anchor == certificate)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    #[test]
    fn expiry_boundary() {
        let valid_until = DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp");
        let config = TrustConfig {
            clock_tolerance: 30,
            ..TrustConfig::default()
        };

        let at_boundary = valid_until + TimeDelta::seconds(30);
        let trust = TrustContext::new(config.clone()).with_time(at_boundary);
        assert!(!trust.is_expired(valid_until));

        // sub-second offsets are truncated
        let trust =
            TrustContext::new(config.clone()).with_time(at_boundary + TimeDelta::milliseconds(999));
        assert!(!trust.is_expired(valid_until));

        let trust = TrustContext::new(config).with_time(at_boundary + TimeDelta::seconds(1));
        assert!(trust.is_expired(valid_until));
    }

    #[test]
    fn premature() {
        let not_before = DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp");
        let config = TrustConfig {
            clock_tolerance: 10,
            ..TrustConfig::default()
        };
        let trust = TrustContext::new(config.clone()).with_time(not_before - TimeDelta::seconds(10));
        assert!(!trust.is_premature(not_before));
        let trust = TrustContext::new(config).with_time(not_before - TimeDelta::seconds(11));
        assert!(trust.is_premature(not_before));
    }

    #[test]
    fn unreadable_root() {
        let config = TrustConfig {
            trusted_root_certificates: vec!["not a certificate".to_string()],
            ..TrustConfig::default()
        };
        let trust = TrustContext::new(config);
        assert!(trust.has_trusted_roots());
        assert_eq!(trust.anchors().count(), 0);
        assert_eq!(trust.trusted_root_certificates().collect::<Vec<_>>(), vec!["not a certificate"]);
    }

    #[test]
    fn config_defaults() {
        let config: TrustConfig =
            serde_json::from_str(r#"{"clockTolerance": 5}"#).expect("should deserialize");
        assert_eq!(config.clock_tolerance, 5);
        assert_eq!(config.locale, "en");
        assert!(config.trusted_root_certificates.is_empty());
    }
}
