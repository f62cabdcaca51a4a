//! MySQL connection strings.
//!
//! The accepted format is the one the Go MySQL driver popularised:
//!
//! ```text
//! [user[:password]@][tcp[(host[:port])]]/dbname[?param1=value1&...&paramN=valueN]
//! ```
//!
//! Recognised parameters map onto [`Dsn`] fields; anything else is kept as a
//! server system variable and applied with `SET` once the handshake is done.
//! [`Dsn::format`] renders a string that [`Dsn::parse`] reads back into an
//! equal value.

pub mod duration;


use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use rdsauth_core::config::DatabaseConfig;
use thiserror::Error;
use url::form_urlencoded;

pub use duration::DurationError;

/// Port used when the address omits one.
pub const DEFAULT_PORT: u16 = 3306;

/// Password written into connection strings whose real password is an IAM
/// token minted at open time. It is always replaced before use.
pub const OVERRIDE_PASSWORD_PLACEHOLDER: &str = "#OVERRIDE#";

/// Default `maxAllowedPacket` (64 MiB), matching the server default.
pub const DEFAULT_MAX_ALLOWED_PACKET: u32 = 64 << 20;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_LOCATION: &str = "UTC";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A connection string could not be parsed. Raised before any network I/O.
///
/// Messages never include the password.
#[derive(Debug, Error)]
pub enum DsnError {
    #[error("invalid DSN: missing the slash separating the database name")]
    MissingSlash,

    #[error("invalid DSN: network address not terminated (missing closing brace)")]
    UnterminatedAddress,

    #[error("invalid DSN: unsupported network {0:?}, only tcp is supported")]
    UnsupportedNetwork(String),

    #[error("invalid DSN: invalid port in address {0:?}")]
    InvalidPort(String),

    #[error("invalid DSN: parameter {0:?} has no value")]
    MalformedParam(String),

    #[error("invalid DSN: invalid value {value:?} for parameter {key}")]
    InvalidValue { key: String, value: String },

    #[error("invalid DSN: invalid duration for {key}: {source}")]
    InvalidDuration {
        key: String,
        #[source]
        source: DurationError,
    },

    #[error("invalid DSN: invalid system variable {0:?}")]
    InvalidSystemVariable(String),
}

// ---------------------------------------------------------------------------
// TLS mode
// ---------------------------------------------------------------------------

/// Value of the `tls` parameter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// Plain TCP (`tls=false`, or parameter absent).
    #[default]
    Disabled,
    /// Use TLS if the server offers it, without verification (`tls=preferred`).
    Preferred,
    /// Encrypt but skip certificate verification (`tls=skip-verify`).
    SkipVerify,
    /// Verify against the platform roots (`tls=true`).
    SystemRoots,
    /// Verify against a registered transport profile (`tls=<name>`).
    Profile(String),
}

impl TlsMode {
    fn parse(value: &str) -> Self {
        match value {
            "preferred" => TlsMode::Preferred,
            "skip-verify" => TlsMode::SkipVerify,
            other => match parse_go_bool(other) {
                Some(true) => TlsMode::SystemRoots,
                Some(false) => TlsMode::Disabled,
                None => TlsMode::Profile(other.to_string()),
            },
        }
    }

    fn as_param(&self) -> Option<&str> {
        match self {
            TlsMode::Disabled => None,
            TlsMode::Preferred => Some("preferred"),
            TlsMode::SkipVerify => Some("skip-verify"),
            TlsMode::SystemRoots => Some("true"),
            TlsMode::Profile(name) => Some(name),
        }
    }

    /// The transport profile this mode refers to, if any.
    pub fn profile_name(&self) -> Option<&str> {
        match self {
            TlsMode::Profile(name) => Some(name),
            _ => None,
        }
    }
}

/// Booleans as Go's `strconv.ParseBool` spells them.
fn parse_go_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Connection target
// ---------------------------------------------------------------------------

/// What to connect to and as whom. Fixed for the duration of one open attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub region: String,
}

impl ConnectionTarget {
    /// `host:port`, the endpoint an IAM token is signed for.
    pub fn endpoint(&self) -> String {
        join_host_port(&self.host, self.port)
    }
}

// ---------------------------------------------------------------------------
// Dsn
// ---------------------------------------------------------------------------

/// A parsed connection string.
#[derive(Clone, PartialEq, Eq)]
pub struct Dsn {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub charset: Option<String>,
    pub collation: Option<String>,
    /// Time zone name from `loc` (`UTC`, `Local`, or an IANA name).
    pub location: String,
    pub max_allowed_packet: u32,
    pub tls: TlsMode,
    /// Dial timeout.
    pub timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub allow_cleartext_passwords: bool,
    pub allow_native_passwords: bool,
    pub check_conn_liveness: bool,
    pub parse_time: bool,
    /// Unrecognised parameters, applied as `SET <name>=<value>` after connecting.
    pub system_vars: BTreeMap<String, String>,
}

impl Default for Dsn {
    fn default() -> Self {
        Self {
            user: String::new(),
            password: String::new(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database: String::new(),
            charset: None,
            collation: None,
            location: DEFAULT_LOCATION.to_string(),
            max_allowed_packet: DEFAULT_MAX_ALLOWED_PACKET,
            tls: TlsMode::Disabled,
            timeout: None,
            read_timeout: None,
            write_timeout: None,
            allow_cleartext_passwords: false,
            allow_native_passwords: true,
            check_conn_liveness: true,
            parse_time: false,
            system_vars: BTreeMap::new(),
        }
    }
}

impl Dsn {
    /// Parse a connection string.
    pub fn parse(input: &str) -> Result<Self, DsnError> {
        let mut dsn = Dsn::default();

        // The database name follows the last slash, so passwords may contain '/'.
        let slash = input.rfind('/').ok_or(DsnError::MissingSlash)?;
        let (left, right) = (&input[..slash], &input[slash + 1..]);

        let addr_part = match left.rfind('@') {
            Some(at) => {
                let userinfo = &left[..at];
                match userinfo.split_once(':') {
                    Some((user, password)) => {
                        dsn.user = user.to_string();
                        dsn.password = password.to_string();
                    }
                    None => dsn.user = userinfo.to_string(),
                }
                &left[at + 1..]
            }
            None => left,
        };

        let (net, addr) = match addr_part.find('(') {
            Some(open) => {
                if !addr_part.ends_with(')') {
                    return Err(DsnError::UnterminatedAddress);
                }
                (&addr_part[..open], &addr_part[open + 1..addr_part.len() - 1])
            }
            None => (addr_part, ""),
        };
        if !net.is_empty() && net != "tcp" {
            return Err(DsnError::UnsupportedNetwork(net.to_string()));
        }
        if !addr.is_empty() {
            let (host, port) = split_host_port(addr)?;
            dsn.host = host;
            dsn.port = port;
        }

        let (database, query) = match right.split_once('?') {
            Some((db, query)) => (db, Some(query)),
            None => (right, None),
        };
        dsn.database = database.to_string();

        if let Some(query) = query {
            dsn.apply_params(query)?;
        }

        Ok(dsn)
    }

    fn apply_params(&mut self, query: &str) -> Result<(), DsnError> {
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            if !pair.contains('=') {
                return Err(DsnError::MalformedParam(pair.to_string()));
            }
        }

        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            let key = key.into_owned();
            let value = value.into_owned();
            match key.as_str() {
                "charset" => self.charset = Some(value),
                "collation" => self.collation = Some(value),
                "loc" => self.location = value,
                "maxAllowedPacket" => {
                    self.max_allowed_packet = value.parse().map_err(|_| DsnError::InvalidValue {
                        key: key.clone(),
                        value: value.clone(),
                    })?
                }
                "tls" => self.tls = TlsMode::parse(&value),
                "timeout" => self.timeout = parse_timeout(&key, &value)?,
                "readTimeout" => self.read_timeout = parse_timeout(&key, &value)?,
                "writeTimeout" => self.write_timeout = parse_timeout(&key, &value)?,
                "allowCleartextPasswords" => {
                    self.allow_cleartext_passwords = parse_flag(&key, &value)?
                }
                "allowNativePasswords" => self.allow_native_passwords = parse_flag(&key, &value)?,
                "checkConnLiveness" => self.check_conn_liveness = parse_flag(&key, &value)?,
                "parseTime" => self.parse_time = parse_flag(&key, &value)?,
                _ => {
                    if !is_identifier(&key) || value.contains([';', '\n', '\r']) {
                        return Err(DsnError::InvalidSystemVariable(key));
                    }
                    self.system_vars.insert(key, value);
                }
            }
        }
        Ok(())
    }

    /// Render the connection string. Options equal to their defaults are omitted.
    pub fn format(&self) -> String {
        self.render(&self.password)
    }

    /// The connection string with the password masked, for logs.
    pub fn redacted(&self) -> String {
        if self.password.is_empty() {
            self.format()
        } else {
            self.render("***")
        }
    }

    fn render(&self, password: &str) -> String {
        let mut out = String::new();
        if !self.user.is_empty() || !password.is_empty() {
            out.push_str(&self.user);
            if !password.is_empty() {
                out.push(':');
                out.push_str(password);
            }
            out.push('@');
        }
        out.push_str("tcp(");
        out.push_str(&self.addr());
        out.push_str(")/");
        out.push_str(&self.database);

        let mut params: BTreeMap<&str, String> = BTreeMap::new();
        if self.allow_cleartext_passwords {
            params.insert("allowCleartextPasswords", "true".into());
        }
        if !self.allow_native_passwords {
            params.insert("allowNativePasswords", "false".into());
        }
        if !self.check_conn_liveness {
            params.insert("checkConnLiveness", "false".into());
        }
        if let Some(charset) = &self.charset {
            params.insert("charset", charset.clone());
        }
        if let Some(collation) = &self.collation {
            params.insert("collation", collation.clone());
        }
        if self.location != DEFAULT_LOCATION {
            params.insert("loc", self.location.clone());
        }
        if self.max_allowed_packet != DEFAULT_MAX_ALLOWED_PACKET {
            params.insert("maxAllowedPacket", self.max_allowed_packet.to_string());
        }
        if self.parse_time {
            params.insert("parseTime", "true".into());
        }
        if let Some(d) = self.read_timeout {
            params.insert("readTimeout", duration::format(d));
        }
        if let Some(d) = self.timeout {
            params.insert("timeout", duration::format(d));
        }
        if let Some(tls) = self.tls.as_param() {
            params.insert("tls", tls.to_string());
        }
        if let Some(d) = self.write_timeout {
            params.insert("writeTimeout", duration::format(d));
        }

        let mut query = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &params {
            query.append_pair(key, value);
        }
        for (key, value) in &self.system_vars {
            query.append_pair(key, value);
        }
        let query = query.finish();
        if !query.is_empty() {
            out.push('?');
            out.push_str(&query);
        }
        out
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn addr(&self) -> String {
        join_host_port(&self.host, self.port)
    }

    /// The target this connection string points at, signed for `region`.
    pub fn target(&self, region: &str) -> ConnectionTarget {
        ConnectionTarget {
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            user: self.user.clone(),
            region: region.to_string(),
        }
    }

    /// Upper bound for the whole handshake: the dial timeout plus one read and
    /// one write deadline. `None` when no timeout is configured.
    pub fn handshake_deadline(&self) -> Option<Duration> {
        let parts = [self.timeout, self.read_timeout, self.write_timeout];
        if parts.iter().all(Option::is_none) {
            return None;
        }
        Some(parts.iter().flatten().sum())
    }

    /// The connection string for a database configured through the environment.
    ///
    /// With IAM auth on, the password is [`OVERRIDE_PASSWORD_PLACEHOLDER`] and
    /// the driver replaces it with a fresh token for every connection.
    pub fn from_config(cfg: &DatabaseConfig) -> Self {
        let password = if cfg.iam_auth {
            OVERRIDE_PASSWORD_PLACEHOLDER.to_string()
        } else {
            cfg.password.clone().unwrap_or_default()
        };

        Self {
            user: cfg.username.clone(),
            password,
            host: cfg.host.clone(),
            port: cfg.port,
            database: cfg.name.clone(),
            collation: Some("utf8mb4_general_ci".to_string()),
            location: DEFAULT_LOCATION.to_string(),
            max_allowed_packet: 4 << 20,
            tls: TlsMode::Profile(cfg.tls_profile.clone()),
            timeout: non_zero_secs(cfg.timeout_secs),
            read_timeout: non_zero_secs(cfg.read_timeout_secs),
            write_timeout: non_zero_secs(cfg.write_timeout_secs),
            allow_cleartext_passwords: true,
            allow_native_passwords: true,
            check_conn_liveness: true,
            parse_time: true,
            ..Self::default()
        }
    }
}

impl fmt::Debug for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Dsn").field(&self.redacted()).finish()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_timeout(key: &str, value: &str) -> Result<Option<Duration>, DsnError> {
    let d = duration::parse(value).map_err(|source| DsnError::InvalidDuration {
        key: key.to_string(),
        source,
    })?;
    Ok((!d.is_zero()).then_some(d))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, DsnError> {
    parse_go_bool(value).ok_or_else(|| DsnError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split `host[:port]`, accepting `[v6]:port` and bare IPv6 literals.
fn split_host_port(addr: &str) -> Result<(String, u16), DsnError> {
    let parse_port = |p: &str| {
        p.parse::<u16>()
            .map_err(|_| DsnError::InvalidPort(addr.to_string()))
    };

    if let Some(bracketed) = addr.strip_prefix('[') {
        let (host, rest) = bracketed
            .split_once(']')
            .ok_or_else(|| DsnError::InvalidPort(addr.to_string()))?;
        let port = match rest {
            "" => DEFAULT_PORT,
            _ => parse_port(
                rest.strip_prefix(':')
                    .ok_or_else(|| DsnError::InvalidPort(addr.to_string()))?,
            )?,
        };
        return Ok((host.to_string(), port));
    }

    match addr.matches(':').count() {
        0 => Ok((addr.to_string(), DEFAULT_PORT)),
        1 => {
            let (host, port) = addr.split_once(':').unwrap_or((addr, ""));
            Ok((host.to_string(), parse_port(port)?))
        }
        // Bare IPv6 literal without a port.
        _ => Ok((addr.to_string(), DEFAULT_PORT)),
    }
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
