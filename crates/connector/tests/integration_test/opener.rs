//! Tests for the opener: token substitution, retry bound, and failure isolation.

use std::collections::HashSet;
use std::sync::Arc;

use rdsauth_connector::*;

use crate::support::{iam_registry, static_credentials, RecordingDialer, ScriptedSigner, SignedFor};

const RDS_DSN: &str = "user:placeholder@tcp(db.example.com:3306)/mydb?tls=aws-rds";

#[tokio::test]
async fn test_token_replaces_password() {
    let dialer = RecordingDialer::new();
    let signer = ScriptedSigner::new(&[Ok("tok-123")]);
    let registry = iam_registry(dialer.clone(), signer.clone(), "us-east-1");

    let password = registry.open(DEFAULT_DRIVER_NAME, RDS_DSN).await.unwrap();

    assert_eq!(password, "tok-123");
    assert_eq!(signer.calls(), 1);
    assert_eq!(
        signer.requests(),
        vec![SignedFor {
            host: "db.example.com".into(),
            port: 3306,
            region: "us-east-1".into(),
            user: "user".into(),
        }]
    );

    let resolved = dialer.last().unwrap();
    assert_eq!(resolved.dsn.user, "user");
    assert_eq!(resolved.dsn.database, "mydb");
    assert_eq!(resolved.transport.as_ref().map(|p| p.name()), Some("aws-rds"));
}

#[tokio::test]
async fn test_second_attempt_token_is_used() {
    let dialer = RecordingDialer::new();
    let signer = ScriptedSigner::new(&[Err("throttled"), Ok("tok-retry")]);
    let registry = iam_registry(dialer.clone(), signer.clone(), "us-east-1");

    let password = registry.open(DEFAULT_DRIVER_NAME, RDS_DSN).await.unwrap();

    assert_eq!(password, "tok-retry");
    assert_eq!(signer.calls(), 2);
    assert_eq!(dialer.dials(), 1);
}

#[tokio::test]
async fn test_token_failure_never_dials() {
    let dialer = RecordingDialer::new();
    let signer = ScriptedSigner::new(&[Err("first"), Err("second"), Ok("too-late")]);
    let registry = iam_registry(dialer.clone(), signer.clone(), "us-east-1");

    let err = registry.open(DEFAULT_DRIVER_NAME, RDS_DSN).await.unwrap_err();

    assert!(matches!(
        err,
        OpenError::AuthToken(TokenError::AuthTokenFailure { attempts: 2, .. })
    ));
    assert!(err.to_string().contains("second"));
    assert_eq!(signer.calls(), MAX_AUTH_TOKEN_ATTEMPTS);
    assert_eq!(dialer.dials(), 0);
}

#[tokio::test]
async fn test_override_off_keeps_static_password() {
    let dialer = RecordingDialer::new();
    let signer = ScriptedSigner::sequential();
    let minter = TokenMinter::new(static_credentials(), signer.clone());
    let registry = Registry::builder()
        .driver(
            "mysql-static",
            DriverRegistration::new(dialer.clone())
                .with_iam("us-east-1", minter)
                .override_password(false),
        )
        .build()
        .unwrap();

    let password = registry
        .open("mysql-static", "app:s3cret@tcp(db.example.com:3306)/mydb")
        .await
        .unwrap();

    assert_eq!(password, "s3cret");
    assert_eq!(signer.calls(), 0);
    assert!(!registry.driver("mysql-static").unwrap().overrides_password());
}

#[tokio::test]
async fn test_unknown_tls_profile_fails_before_minting() {
    let dialer = RecordingDialer::new();
    let signer = ScriptedSigner::sequential();
    let registry = iam_registry(dialer.clone(), signer.clone(), "us-east-1");

    let err = registry
        .open(
            DEFAULT_DRIVER_NAME,
            "user:x@tcp(db.example.com:3306)/mydb?tls=corp-ca",
        )
        .await
        .unwrap_err();

    assert!(matches!(err, OpenError::UnknownTransportProfile(name) if name == "corp-ca"));
    assert_eq!(signer.calls(), 0);
    assert_eq!(dialer.dials(), 0);
}

#[tokio::test]
async fn test_malformed_dsn_fails_before_minting() {
    let dialer = RecordingDialer::new();
    let signer = ScriptedSigner::sequential();
    let registry = iam_registry(dialer.clone(), signer.clone(), "us-east-1");

    for bad in [
        "user:x@tcp(db.example.com:3306)",
        "user:x@tcp(db.example.com:3306/mydb",
        "user:x@tcp(db.example.com:notaport)/mydb",
        "user:x@tcp(db.example.com)/mydb?timeout=forever",
    ] {
        let err = registry.open(DEFAULT_DRIVER_NAME, bad).await.unwrap_err();
        assert!(matches!(err, OpenError::Parse(_)), "{bad}: {err}");
    }

    assert_eq!(signer.calls(), 0);
    assert_eq!(dialer.dials(), 0);
}

#[tokio::test]
async fn test_each_open_mints_a_fresh_token() {
    let dialer = RecordingDialer::new();
    let signer = ScriptedSigner::sequential();
    let registry = iam_registry(dialer.clone(), signer.clone(), "eu-west-1");

    let first = registry.open(DEFAULT_DRIVER_NAME, RDS_DSN).await.unwrap();
    let second = registry.open(DEFAULT_DRIVER_NAME, RDS_DSN).await.unwrap();

    assert_eq!(first, "tok-1");
    assert_eq!(second, "tok-2");
    assert_eq!(signer.calls(), 2);
    assert!(signer.requests().iter().all(|r| r.region == "eu-west-1"));
}

#[tokio::test]
async fn test_concurrent_opens_use_distinct_tokens() {
    let dialer = RecordingDialer::new();
    let signer = ScriptedSigner::sequential();
    let registry = Arc::new(iam_registry(dialer.clone(), signer.clone(), "us-east-1"));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            registry.open(DEFAULT_DRIVER_NAME, RDS_DSN).await
        }));
    }

    let mut tokens = HashSet::new();
    for handle in handles {
        tokens.insert(handle.await.unwrap().unwrap());
    }

    assert_eq!(tokens.len(), 8);
    assert_eq!(signer.calls(), 8);
    assert_eq!(dialer.dials(), 8);
}

#[tokio::test]
async fn test_handshake_error_is_not_retried() {
    let dialer = RecordingDialer::failing();
    let signer = ScriptedSigner::sequential();
    let registry = iam_registry(dialer.clone(), signer.clone(), "us-east-1");

    let err = registry.open(DEFAULT_DRIVER_NAME, RDS_DSN).await.unwrap_err();

    match err {
        OpenError::Handshake(HandshakeError::Timeout { addr, .. }) => {
            assert_eq!(addr, "db.example.com:3306")
        }
        other => panic!("expected handshake timeout, got {other:?}"),
    }
    assert_eq!(signer.calls(), 1);
    assert_eq!(dialer.dials(), 1);
}

#[tokio::test]
async fn test_plain_tls_needs_no_profile() {
    let dialer = RecordingDialer::new();
    let signer = ScriptedSigner::sequential();
    let registry = iam_registry(dialer.clone(), signer.clone(), "us-east-1");

    registry
        .open(DEFAULT_DRIVER_NAME, "user:x@tcp(localhost:3306)/mydb?tls=false")
        .await
        .unwrap();

    let resolved = dialer.last().unwrap();
    assert!(resolved.transport.is_none());
    assert_eq!(resolved.dsn.tls, TlsMode::Disabled);
}
