//! # Test Utilities
//!
//! Fixtures for exercising credential verification: a certificate authority,
//! holder keys, `mso_mdoc` and SD-JWT issuers, and a static public key
//! resolver.

pub mod ca;
pub mod holder;
pub mod mdoc;
pub mod resolver;
pub mod sd_jwt;

pub use ca::CertificateAuthority;
pub use holder::HolderKey;
pub use mdoc::{MdocBuilder, MdocIssuer, Presentation};
pub use resolver::StaticResolver;
pub use sd_jwt::{KbJwtBuilder, SdJwtBuilder, SdJwtIssuer};

/// Install a `tracing` subscriber for the test run, honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
