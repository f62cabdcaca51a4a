//! Tests for loading trust bundles from disk.

use std::io::Write;

use rdsauth_connector::*;

use crate::support::{BUNDLE, SINGLE};

#[test]
fn test_bundle_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(BUNDLE).unwrap();

    let bundle = TrustBundle::from_file(file.path()).unwrap();

    assert_eq!(bundle.len(), 2);
    assert_eq!(bundle.root_store().len(), 2);
}

#[test]
fn test_empty_file_is_rejected() {
    let file = tempfile::NamedTempFile::new().unwrap();

    let err = TrustBundle::from_file(file.path()).unwrap_err();

    assert!(err.to_string().contains("empty"));
}

#[test]
fn test_bundle_with_surrounding_text() {
    // The published RDS bundles carry no comments, but operators concatenate files.
    let mut pem = b"# rds root\n".to_vec();
    pem.extend_from_slice(SINGLE);
    pem.extend_from_slice(b"\n\n");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bundle.pem");
    std::fs::write(&path, &pem).unwrap();

    assert_eq!(TrustBundle::from_file(&path).unwrap().len(), 1);
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.pem");

    let err = TrustBundle::from_file(&path).unwrap_err();

    assert!(matches!(err, TrustStoreError::Io { .. }));
    assert!(err.to_string().contains("absent.pem"));
}
