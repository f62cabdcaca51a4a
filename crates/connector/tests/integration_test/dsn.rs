//! Tests for building connection strings from environment config.

use std::path::PathBuf;
use std::time::Duration;

use rdsauth_connector::*;
use rdsauth_core::config::DatabaseConfig;

fn database_config() -> DatabaseConfig {
    DatabaseConfig {
        host: "mydb.cluster-abc.us-east-1.rds.amazonaws.com".into(),
        port: 3306,
        name: "orders".into(),
        username: "app_iam".into(),
        password: None,
        iam_auth: true,
        tls_profile: "aws-rds".into(),
        ca_bundle: PathBuf::from("certs/rds-global-bundle.pem"),
        timeout_secs: 10,
        read_timeout_secs: 10,
        write_timeout_secs: 10,
    }
}

#[test]
fn test_iam_config_uses_placeholder_password() {
    let dsn = Dsn::from_config(&database_config());

    assert_eq!(dsn.password, OVERRIDE_PASSWORD_PLACEHOLDER);
    assert_eq!(dsn.tls, TlsMode::Profile("aws-rds".into()));
    assert!(dsn.allow_cleartext_passwords);
    assert_eq!(dsn.handshake_deadline(), Some(Duration::from_secs(30)));
}

#[test]
fn test_config_dsn_survives_format_and_parse() {
    let dsn = Dsn::from_config(&database_config());

    let reparsed = Dsn::parse(&dsn.format()).unwrap();

    assert_eq!(reparsed, dsn);
    assert_eq!(reparsed.addr(), "mydb.cluster-abc.us-east-1.rds.amazonaws.com:3306");
}

#[test]
fn test_static_password_config() {
    let mut cfg = database_config();
    cfg.iam_auth = false;
    cfg.password = Some("p@ss/word".into());
    cfg.timeout_secs = 0;

    let dsn = Dsn::from_config(&cfg);

    assert_eq!(dsn.password, "p@ss/word");
    assert_eq!(dsn.timeout, None);
    assert_eq!(Dsn::parse(&dsn.format()).unwrap().password, "p@ss/word");
}

#[test]
fn test_redacted_form_hides_the_password() {
    let mut cfg = database_config();
    cfg.iam_auth = false;
    cfg.password = Some("hunter2".into());

    let redacted = Dsn::from_config(&cfg).redacted();

    assert!(!redacted.contains("hunter2"));
    assert!(redacted.contains("app_iam"));
}
