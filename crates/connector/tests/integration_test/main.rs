//! Integration tests for rdsauth-connector.
//!
//! These tests drive the opener through the registry with an in-memory dialer
//! and signer, so they need neither AWS credentials nor a database. The
//! handshake tests run the real dialer against a local TLS endpoint.
//! Tests marked with `#[ignore]` talk to a real RDS instance and must be run explicitly.

mod support;

mod dsn;
mod opener;
mod trust;
