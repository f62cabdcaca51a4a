//! MySQL handshake over mysql_async.
//!
//! With a transport profile the profile's bundle is the only trust anchor set:
//! the driver's built-in roots are switched off, so a certificate issued by
//! any other CA fails the handshake.

use std::time::Duration;

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, OptsBuilder, SslOpts};
use thiserror::Error;
use tracing::debug;

use crate::dsn::{Dsn, TlsMode};
use crate::opener::{Dialer, ResolvedConnection};

/// The network or protocol handshake failed. Never retried by the opener.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("handshake with {addr} timed out after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    #[error("mysql handshake failed: {0}")]
    Driver(#[from] mysql_async::Error),

    #[error("failed to set session variable {name}: {source}")]
    SystemVariable {
        name: String,
        #[source]
        source: mysql_async::Error,
    },
}

/// Production dialer: a single mysql_async connection per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialer;

impl MySqlDialer {
    /// Translate a resolved connection into driver options.
    pub fn connect_options(resolved: &ResolvedConnection) -> Opts {
        let dsn = &resolved.dsn;

        let builder = OptsBuilder::default()
            .ip_or_hostname(dsn.host.clone())
            .tcp_port(dsn.port)
            .user(Some(dsn.user.clone()))
            .pass(Some(dsn.password.clone()))
            .db_name((!dsn.database.is_empty()).then(|| dsn.database.clone()))
            .prefer_socket(false)
            .enable_cleartext_plugin(dsn.allow_cleartext_passwords)
            .max_allowed_packet(Some(dsn.max_allowed_packet as usize))
            .ssl_opts(ssl_opts(resolved));

        Opts::from(builder)
    }
}

fn ssl_opts(resolved: &ResolvedConnection) -> Option<SslOpts> {
    match (&resolved.dsn.tls, &resolved.transport) {
        (TlsMode::Disabled, _) => None,
        // No opportunistic mode in the driver: encrypt, but do not verify.
        (TlsMode::Preferred, _) | (TlsMode::SkipVerify, _) => Some(
            SslOpts::default()
                .with_danger_accept_invalid_certs(true)
                .with_danger_skip_domain_validation(true),
        ),
        (TlsMode::SystemRoots, _) => Some(SslOpts::default()),
        (TlsMode::Profile(_), Some(profile)) => Some(
            SslOpts::default()
                .with_root_certs(vec![profile.bundle().pem().to_vec().into()])
                .with_disable_built_in_roots(true),
        ),
        // Unresolved profile: no anchors at all, so nothing verifies.
        (TlsMode::Profile(_), None) => {
            Some(SslOpts::default().with_disable_built_in_roots(true))
        }
    }
}

/// Statements run right after the handshake, as `(variable, statement)`.
fn session_statements(dsn: &Dsn) -> Vec<(String, String)> {
    let mut statements = Vec::new();

    let charset = dsn.charset.clone().or_else(|| {
        dsn.collation
            .as_deref()
            .and_then(|c| c.split('_').next())
            .map(str::to_string)
    });
    if let Some(charset) = charset {
        let statement = match &dsn.collation {
            Some(collation) => format!("SET NAMES {charset} COLLATE {collation}"),
            None => format!("SET NAMES {charset}"),
        };
        statements.push(("names".to_string(), statement));
    }

    if let Some(zone) = session_time_zone(&dsn.location) {
        let zone = zone.replace('\'', "''");
        statements.push(("time_zone".to_string(), format!("SET time_zone = '{zone}'")));
    }

    for (name, value) in &dsn.system_vars {
        statements.push((name.clone(), format!("SET {name}={value}")));
    }
    statements
}

#[async_trait]
impl Dialer for MySqlDialer {
    type Connection = Conn;

    async fn connect(&self, resolved: &ResolvedConnection) -> Result<Conn, HandshakeError> {
        // rustls 0.23 needs a process-wide provider; ignore "already installed".
        let _ = rustls::crypto::ring::default_provider().install_default();

        let dsn = &resolved.dsn;
        let options = Self::connect_options(resolved);
        let statements = session_statements(dsn);

        let handshake = async {
            let mut conn = Conn::new(options).await?;
            for (name, statement) in statements {
                conn.query_drop(statement)
                    .await
                    .map_err(|source| HandshakeError::SystemVariable { name, source })?;
            }
            Ok::<_, HandshakeError>(conn)
        };

        match dsn.handshake_deadline() {
            Some(deadline) => {
                debug!(addr = %dsn.addr(), deadline = ?deadline, "dialing with deadline");
                tokio::time::timeout(deadline, handshake)
                    .await
                    .map_err(|_| HandshakeError::Timeout {
                        addr: dsn.addr(),
                        timeout: deadline,
                    })?
            }
            None => handshake.await,
        }
    }
}

/// Session `time_zone` for a `loc` value. `Local` keeps the server default.
fn session_time_zone(location: &str) -> Option<String> {
    match location {
        "UTC" => Some("+00:00".to_string()),
        "Local" | "" => None,
        other => Some(other.to_string()),
    }
}
