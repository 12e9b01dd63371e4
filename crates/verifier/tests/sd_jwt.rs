//! SD-JWT VC Verification Tests

use chrono::{DateTime, TimeDelta, Utc};
use credibil_verifier::{
    CredentialVerifier, SdJwtOptions, SdJwtVerifier, TrustConfig, TrustContext, VerificationError,
    VerificationResult,
};
use serde_json::json;
use test_utils::sd_jwt::sd_hash;
use test_utils::{
    CertificateAuthority, HolderKey, KbJwtBuilder, SdJwtBuilder, SdJwtIssuer, StaticResolver,
};

const ISSUER: &str = "https://issuer.example.com";
const AUDIENCE: &str = "x509_san_dns:verifier.example.com";
const NONCE: &str = "n-0S6_WzA2Mj";

struct Fixture {
    ca: CertificateAuthority,
    issuer: SdJwtIssuer,
    holder: HolderKey,
    resolver: StaticResolver,
}

impl Fixture {
    fn new() -> Self {
        test_utils::init_tracing();
        let mut ca = CertificateAuthority::new("sd-jwt root").expect("should create CA");
        let issuer = SdJwtIssuer::with_x5c(ISSUER, &mut ca).expect("should create issuer");
        Self {
            ca,
            issuer,
            holder: HolderKey::p256(),
            resolver: StaticResolver::new(),
        }
    }

    fn trust(&self) -> TrustContext {
        TrustContext::new(TrustConfig {
            trusted_root_certificates: vec![self.ca.root_pem().expect("should encode root")],
            ..TrustConfig::default()
        })
    }

    fn pid(&self) -> SdJwtBuilder {
        SdJwtBuilder::new()
            .disclosable("given_name", json!("John"))
            .disclosable("family_name", json!("Doe"))
            .disclosable("address", json!({"country": "NZ"}))
            .holder(self.holder.jwk())
    }

    fn issue(&self) -> String {
        self.pid().build(&self.issuer).expect("should issue")
    }

    async fn verify(&self, credential: &str, options: &SdJwtOptions) -> VerificationResult {
        let trust = self.trust();
        SdJwtVerifier::new(&trust, &self.resolver).verify_str(credential, options).await
    }
}

fn options() -> SdJwtOptions {
    SdJwtOptions {
        expected_audience: Some(AUDIENCE.to_string()),
        expected_nonce: Some(NONCE.to_string()),
    }
}

// --------------------------------------------------
// Issued credentials
// --------------------------------------------------

// Should verify a credential whose x5c chains to a trusted root.
#[tokio::test]
async fn trusted_x5c() {
    let fixture = Fixture::new();
    let credential = fixture.issue();

    let result = fixture.verify(&credential, &SdJwtOptions::default()).await;
    let VerificationResult::Success {
        holder_public_key,
        extra_claims,
    } = result
    else {
        panic!("should succeed: {result:?}");
    };
    assert_eq!(holder_public_key, fixture.holder.jwk());
    assert_eq!(extra_claims.and_then(|c| c.get("valid").cloned()), Some(json!(true)));
}

// Should trust an x5c chain that carries its trusted root.
#[tokio::test]
async fn x5c_ending_in_root() {
    let mut fixture = Fixture::new();
    let mut chain = fixture.issuer.x5c().expect("should have x5c").to_vec();
    chain.push(fixture.ca.root_der().expect("should encode root"));

    let issuer = std::mem::replace(&mut fixture.issuer, SdJwtIssuer::new(ISSUER)).set_x5c(&chain);
    let credential = fixture.pid().build(&issuer).expect("should issue");

    let result = fixture.verify(&credential, &SdJwtOptions::default()).await;
    assert!(result.is_success(), "{result:?}");
}

// Should not trust an x5c chain whose last certificate is a trusted root that
// did not issue the rest of the chain.
#[tokio::test]
async fn forged_x5c_ending_in_root() {
    let mut fixture = Fixture::new();
    let pinned = CertificateAuthority::new("pinned root").expect("should create CA");
    let mut chain = fixture.issuer.x5c().expect("should have x5c").to_vec();
    chain.push(pinned.root_der().expect("should encode root"));

    let issuer = std::mem::replace(&mut fixture.issuer, SdJwtIssuer::new(ISSUER)).set_x5c(&chain);
    let credential = fixture.pid().build(&issuer).expect("should issue");

    let trust = TrustContext::new(TrustConfig {
        trusted_root_certificates: vec![pinned.root_pem().expect("should encode root")],
        ..TrustConfig::default()
    });
    let verifier = SdJwtVerifier::new(&trust, &fixture.resolver);
    let result = verifier.verify_str(&credential, &SdJwtOptions::default()).await;
    assert_eq!(result.error(), Some(VerificationError::NotTrustedIssuer));
}

// Should reject a credential whose x5c chains to an unrelated root.
#[tokio::test]
async fn untrusted_x5c() {
    let fixture = Fixture::new();
    let mut other = CertificateAuthority::new("other root").expect("should create CA");
    let issuer = SdJwtIssuer::with_x5c(ISSUER, &mut other).expect("should create issuer");
    let credential = fixture.pid().build(&issuer).expect("should issue");

    let result = fixture.verify(&credential, &SdJwtOptions::default()).await;
    assert_eq!(result.error(), Some(VerificationError::NotTrustedIssuer));
}

// Should resolve the issuer key from `iss` when there is no x5c.
#[tokio::test]
async fn resolved_issuer() {
    let mut fixture = Fixture::new();
    let issuer = SdJwtIssuer::new("did:example:issuer");
    fixture.resolver = StaticResolver::new().with_key(issuer.iss(), issuer.jwk());
    let credential = fixture.pid().build(&issuer).expect("should issue");

    let result = fixture.verify(&credential, &SdJwtOptions::default()).await;
    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.holder_public_key(), Some(&fixture.holder.jwk()));
}

// Should report an issuer key that cannot be resolved.
#[tokio::test]
async fn unresolved_issuer() {
    let fixture = Fixture::new();
    let issuer = SdJwtIssuer::new("did:example:unknown");
    let credential = fixture.pid().build(&issuer).expect("should issue");

    let result = fixture.verify(&credential, &SdJwtOptions::default()).await;
    assert_eq!(result.error(), Some(VerificationError::CannotResolveIssuerPublicKey));
}

// Should reject a credential signed by a key other than the resolved key.
#[tokio::test]
async fn wrong_issuer_key() {
    let mut fixture = Fixture::new();
    let issuer = SdJwtIssuer::new("did:example:issuer");
    let impostor = SdJwtIssuer::new("did:example:issuer");
    fixture.resolver = StaticResolver::new().with_key(issuer.iss(), issuer.jwk());
    let credential = fixture.pid().build(&impostor).expect("should issue");

    let result = fixture.verify(&credential, &SdJwtOptions::default()).await;
    assert_eq!(result.error(), Some(VerificationError::InvalidSignature));
}

// Should report an expired credential.
#[tokio::test]
async fn expired() {
    let fixture = Fixture::new();
    let credential = fixture
        .pid()
        .claim("exp", json!(Utc::now().timestamp() - 3600))
        .build(&fixture.issuer)
        .expect("should issue");

    let result = fixture.verify(&credential, &SdJwtOptions::default()).await;
    assert_eq!(result.error(), Some(VerificationError::ExpiredCredential));
}

// Should treat a credential as valid up to, and including, `exp` plus the
// clock tolerance.
#[tokio::test]
async fn expiry_boundary() {
    let fixture = Fixture::new();
    let exp = Utc::now().timestamp() + 3600;
    let credential =
        fixture.pid().claim("exp", json!(exp)).build(&fixture.issuer).expect("should issue");
    let expires = DateTime::from_timestamp(exp, 0).expect("should be in range");

    let tolerant = TrustContext::new(TrustConfig {
        clock_tolerance: 60,
        trusted_root_certificates: vec![fixture.ca.root_pem().expect("should encode root")],
        ..TrustConfig::default()
    });

    let trust = tolerant.clone().with_time(expires + TimeDelta::seconds(60));
    let verifier = SdJwtVerifier::new(&trust, &fixture.resolver);
    let result = verifier.verify_str(&credential, &SdJwtOptions::default()).await;
    assert!(result.is_success(), "{result:?}");

    let trust = tolerant.with_time(expires + TimeDelta::seconds(61));
    let verifier = SdJwtVerifier::new(&trust, &fixture.resolver);
    let result = verifier.verify_str(&credential, &SdJwtOptions::default()).await;
    assert_eq!(result.error(), Some(VerificationError::ExpiredCredential));
}

// Should report a credential without a `cnf` claim.
#[tokio::test]
async fn missing_holder_key() {
    let fixture = Fixture::new();
    let credential = SdJwtBuilder::new()
        .disclosable("given_name", json!("John"))
        .build(&fixture.issuer)
        .expect("should issue");

    let result = fixture.verify(&credential, &SdJwtOptions::default()).await;
    assert_eq!(result.error(), Some(VerificationError::CannotExtractHolderPublicKey));
}

// Should report a malformed `cnf.jwk`.
#[tokio::test]
async fn malformed_holder_key() {
    let fixture = Fixture::new();
    let credential = SdJwtBuilder::new()
        .claim("cnf", json!({"jwk": {"kty": "EC", "crv": "P-256", "x": "AA", "y": "AA"}}))
        .build(&fixture.issuer)
        .expect("should issue");

    let result = fixture.verify(&credential, &SdJwtOptions::default()).await;
    assert_eq!(result.error(), Some(VerificationError::CannotExtractHolderPublicKey));
}

// --------------------------------------------------
// Key binding
// --------------------------------------------------

// Should verify a presentation with a valid key binding JWT.
#[tokio::test]
async fn key_binding() {
    let fixture = Fixture::new();
    let presentation = KbJwtBuilder::new(AUDIENCE, NONCE)
        .present(&fixture.issue(), &fixture.holder)
        .expect("should present");

    let result = fixture.verify(&presentation, &options()).await;
    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.holder_public_key(), Some(&fixture.holder.jwk()));
}

// Should verify key binding by an Ed25519 holder.
#[tokio::test]
async fn key_binding_ed25519() {
    let mut fixture = Fixture::new();
    fixture.holder = HolderKey::ed25519();
    let presentation = KbJwtBuilder::new(AUDIENCE, NONCE)
        .present(&fixture.issue(), &fixture.holder)
        .expect("should present");

    let result = fixture.verify(&presentation, &options()).await;
    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.holder_public_key(), Some(&fixture.holder.jwk()));
}

// Should accept a presentation disclosing a subset of claims.
#[tokio::test]
async fn partial_disclosure() {
    let fixture = Fixture::new();
    let credential = fixture.issue();
    let parts: Vec<&str> = credential.split('~').collect();
    let prefix = format!("{}~{}~", parts[0], parts[2]);

    let presentation = KbJwtBuilder::new(AUDIENCE, NONCE)
        .present(&prefix, &fixture.holder)
        .expect("should present");

    let result = fixture.verify(&presentation, &options()).await;
    assert!(result.is_success(), "{result:?}");
}

// Should reject a presentation whose disclosures differ from those the
// KB-JWT was signed over.
#[tokio::test]
async fn altered_disclosures() {
    let fixture = Fixture::new();
    let credential = fixture.issue();
    let presentation = KbJwtBuilder::new(AUDIENCE, NONCE)
        .present(&credential, &fixture.holder)
        .expect("should present");

    let disclosure = credential.split('~').nth(1).expect("should have a disclosure");
    let altered = presentation.replacen(&format!("~{disclosure}~"), "~", 1);

    let result = fixture.verify(&altered, &options()).await;
    assert_eq!(result.error(), Some(VerificationError::KbJwtWrongSdHash));
}

// Should reject a KB-JWT with the wrong `sd_hash`.
#[tokio::test]
async fn wrong_sd_hash() {
    let fixture = Fixture::new();
    let presentation = KbJwtBuilder::new(AUDIENCE, NONCE)
        .sd_hash(sd_hash("something else"))
        .present(&fixture.issue(), &fixture.holder)
        .expect("should present");

    let result = fixture.verify(&presentation, &options()).await;
    assert_eq!(result.error(), Some(VerificationError::KbJwtWrongSdHash));
}

// Should reject a KB-JWT for another verifier or another request.
#[tokio::test]
async fn unexpected_audience_and_nonce() {
    let fixture = Fixture::new();
    let credential = fixture.issue();

    let presentation = KbJwtBuilder::new("x509_san_dns:other.example.com", NONCE)
        .present(&credential, &fixture.holder)
        .expect("should present");
    let result = fixture.verify(&presentation, &options()).await;
    assert_eq!(result.error(), Some(VerificationError::KbJwtUnexpectedAudience));

    let presentation = KbJwtBuilder::new(AUDIENCE, "stale-nonce")
        .present(&credential, &fixture.holder)
        .expect("should present");
    let result = fixture.verify(&presentation, &options()).await;
    assert_eq!(result.error(), Some(VerificationError::KbJwtUnexpectedNonce));

    // unchecked when not expected
    let result = fixture.verify(&presentation, &SdJwtOptions::default()).await;
    assert!(result.is_success(), "{result:?}");
}

// Should reject a KB-JWT missing `aud` or `nonce`.
#[tokio::test]
async fn missing_parameters() {
    let fixture = Fixture::new();
    let credential = fixture.issue();

    let presentation = KbJwtBuilder::new(AUDIENCE, NONCE)
        .without_aud()
        .present(&credential, &fixture.holder)
        .expect("should present");
    let result = fixture.verify(&presentation, &options()).await;
    assert_eq!(result.error(), Some(VerificationError::KbJwtMissingParameters));

    let presentation = KbJwtBuilder::new(AUDIENCE, NONCE)
        .without_nonce()
        .present(&credential, &fixture.holder)
        .expect("should present");
    let result = fixture.verify(&presentation, &SdJwtOptions::default()).await;
    assert_eq!(result.error(), Some(VerificationError::KbJwtMissingParameters));
}

// Should accept a KB-JWT `aud` given as a single-element array.
#[tokio::test]
async fn audience_array() {
    let fixture = Fixture::new();
    let presentation = KbJwtBuilder::new(AUDIENCE, NONCE)
        .aud_array()
        .present(&fixture.issue(), &fixture.holder)
        .expect("should present");

    let result = fixture.verify(&presentation, &options()).await;
    assert!(result.is_success(), "{result:?}");
}

// Should reject a KB-JWT signed by a key other than `cnf.jwk`.
#[tokio::test]
async fn wrong_holder_signature() {
    let fixture = Fixture::new();
    let presentation = KbJwtBuilder::new(AUDIENCE, NONCE)
        .present(&fixture.issue(), &HolderKey::p256())
        .expect("should present");

    let result = fixture.verify(&presentation, &options()).await;
    assert_eq!(result.error(), Some(VerificationError::KbJwtInvalidSignature));
}

// Should reject an expired KB-JWT.
#[tokio::test]
async fn expired_key_binding() {
    let fixture = Fixture::new();
    let presentation = KbJwtBuilder::new(AUDIENCE, NONCE)
        .exp(Utc::now().timestamp() - 3600)
        .present(&fixture.issue(), &fixture.holder)
        .expect("should present");

    let result = fixture.verify(&presentation, &options()).await;
    assert_eq!(result.error(), Some(VerificationError::KbJwtInvalidSignature));
}

// Should require `cnf.jwk` to check key binding.
#[tokio::test]
async fn key_binding_without_holder_key() {
    let fixture = Fixture::new();
    let credential = SdJwtBuilder::new().build(&fixture.issuer).expect("should issue");
    let presentation = KbJwtBuilder::new(AUDIENCE, NONCE)
        .present(&credential, &fixture.holder)
        .expect("should present");

    let result = fixture.verify(&presentation, &options()).await;
    assert_eq!(result.error(), Some(VerificationError::CannotExtractHolderPublicKey));
}
