//! rdsauth-probe: open one IAM-authenticated connection and ping it.
//!
//! Reads the database target from the environment (`DB_HOSTNAME`,
//! `DB_USERNAME`, `DB_NAME`, ...), registers the RDS trust bundle and the
//! driver, then opens a connection by driver name. AWS config and credentials
//! are loaded only when IAM auth is on; `--static-password` (or
//! `DB_IAM_AUTH=false`) connects with `DB_PASSWORD` and never touches AWS.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_types::region::Region;
use aws_types::SdkConfig;
use clap::Parser;
use mysql_async::prelude::Queryable;
use tracing::info;

use rdsauth_connector::{
    DriverRegistration, Dsn, MySqlDialer, RdsAuthTokenSigner, Registry, TokenMinter, TrustBundle,
    DEFAULT_DRIVER_NAME,
};
use rdsauth_core::config::{self, AwsConfig, Config};

// ── CLI ─────────────────────────────────────────────────────────────

/// Verify that IAM database authentication works end to end.
#[derive(Parser, Debug)]
#[command(name = "rdsauth-probe", version, about)]
struct Cli {
    /// PEM bundle with the trusted RDS root certificates.
    #[arg(long, env = "DB_CA_BUNDLE")]
    ca_bundle: Option<PathBuf>,

    /// Authenticate with DB_PASSWORD instead of an IAM token.
    #[arg(long)]
    static_password: bool,

    /// Print the redacted connection string and exit without connecting.
    #[arg(long)]
    print_dsn: bool,
}

// ── AWS ─────────────────────────────────────────────────────────────

/// Load the SDK config. Explicit keys from the environment profile win over
/// the default provider chain.
async fn load_sdk_config(aws: &AwsConfig) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());

    if let Some(region) = &aws.region {
        loader = loader.region(Region::new(region.clone()));
    }
    if let (Some(key_id), Some(secret)) = (&aws.access_key_id, &aws.secret_access_key) {
        loader = loader.credentials_provider(Credentials::new(
            key_id,
            secret,
            aws.session_token.clone(),
            None,
            "rdsauth-static",
        ));
    }

    loader.load().await
}

/// Driver registration for the configured auth mode. Only IAM auth needs a
/// region and credentials.
async fn driver_registration(config: &Config) -> anyhow::Result<DriverRegistration<MySqlDialer>> {
    if !config.database.iam_auth {
        info!("static password auth, skipping AWS config");
        return Ok(DriverRegistration::new(MySqlDialer));
    }

    let sdk_config = load_sdk_config(&config.aws).await;
    let region = sdk_config
        .region()
        .map(|r| r.to_string())
        .context("no AWS region configured (set AWS_REGION)")?;
    let credentials = sdk_config
        .credentials_provider()
        .context("no AWS credentials provider available")?;
    info!(region = %region, "AWS config loaded");

    let minter = TokenMinter::new(credentials, Arc::new(RdsAuthTokenSigner::new(&sdk_config)));
    Ok(DriverRegistration::new(MySqlDialer).with_iam(region, minter))
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    config::load_dotenv();
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(path) = cli.ca_bundle {
        config.database.ca_bundle = path;
    }
    if cli.static_password {
        config.database.iam_auth = false;
    }
    config.log_summary();
    config.database.validate().context("invalid database config")?;

    let dsn = Dsn::from_config(&config.database);
    info!(dsn = %dsn.redacted(), "connection string");
    if cli.print_dsn {
        println!("{}", dsn.redacted());
        return Ok(());
    }

    let bundle = TrustBundle::from_file(&config.database.ca_bundle).with_context(|| {
        format!(
            "load certificate bundle {}",
            config.database.ca_bundle.display()
        )
    })?;

    let registration = driver_registration(&config).await?;

    let registry = Registry::builder()
        .transport_profile(config.database.tls_profile.as_str(), bundle)
        .driver(DEFAULT_DRIVER_NAME, registration)
        .build()
        .context("build driver registry")?;

    let mut conn = registry
        .open(DEFAULT_DRIVER_NAME, &dsn.format())
        .await
        .context("open connection")?;

    conn.ping().await.context("ping")?;
    info!(host = %config.database.host, db = %config.database.name, "ping ok");

    conn.disconnect().await.context("close connection")?;
    Ok(())
}
