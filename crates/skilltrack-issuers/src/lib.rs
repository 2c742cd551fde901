//! skilltrack-issuers — Certificate issuer integrations.
//!
//! Implements the `CertificateIssuer` trait over HTTP and as a no-op, and
//! loads the `skilltrack.toml` configuration that selects between them.

pub mod config;
pub mod http;
pub mod noop;

pub use config::{create_issuer, load_config, load_config_from, IssuerConfig, SkilltrackConfig};
pub use http::HttpIssuer;
pub use noop::NoopIssuer;
