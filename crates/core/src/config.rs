use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Env var holding the active profile name.
pub const PROFILE_ENV: &str = "RDSAUTH_PROFILE";

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "true" | "1"),
        None => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub database: DatabaseConfig,
    pub aws: AwsConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `RDSAUTH_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or(PROFILE_ENV, "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            database: DatabaseConfig::from_env_profiled(p),
            aws: AwsConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() {
            "default"
        } else {
            &self.profile
        }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  database:    host={}, port={}, db={}, user={}",
            self.database.host,
            self.database.port,
            self.database.name,
            self.database.username
        );
        tracing::info!(
            "  auth:        iam={}, tls_profile={}, ca_bundle={}",
            self.database.iam_auth,
            self.database.tls_profile,
            self.database.ca_bundle.display()
        );
        tracing::info!(
            "  aws:         region={}, static_credentials={}",
            self.aws.region.as_deref().unwrap_or("(sdk default)"),
            self.aws.has_static_credentials()
        );
    }

    /// Return a redacted view safe for printing (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "database": {
                "host": self.database.host,
                "port": self.database.port,
                "name": self.database.name,
                "username": self.database.username,
                "iam_auth": self.database.iam_auth,
                "tls_profile": self.database.tls_profile,
                "static_password": self.database.password.is_some(),
            },
            "aws": {
                "region": self.aws.region,
                "static_credentials": self.aws.has_static_credentials(),
            },
        })
    }
}

// ── Database ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    /// Static password, used only when `iam_auth` is off.
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Replace the password with a freshly minted IAM token on every connection.
    pub iam_auth: bool,
    /// Name of the transport profile the connection string points at.
    pub tls_profile: String,
    /// PEM bundle with the trusted root certificates.
    pub ca_bundle: PathBuf,
    pub timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
}

impl DatabaseConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "DB_HOSTNAME", ""),
            port: profiled_env_u16(p, "DB_PORT", 3306),
            name: profiled_env_or(p, "DB_NAME", ""),
            username: profiled_env_or(p, "DB_USERNAME", ""),
            password: profiled_env_opt(p, "DB_PASSWORD"),
            iam_auth: profiled_env_bool(p, "DB_IAM_AUTH", true),
            tls_profile: profiled_env_or(p, "DB_TLS_PROFILE", "aws-rds"),
            ca_bundle: PathBuf::from(profiled_env_or(
                p,
                "DB_CA_BUNDLE",
                "certs/rds-global-bundle.pem",
            )),
            timeout_secs: profiled_env_u64(p, "DB_TIMEOUT_SECS", 10),
            read_timeout_secs: profiled_env_u64(p, "DB_READ_TIMEOUT_SECS", 10),
            write_timeout_secs: profiled_env_u64(p, "DB_WRITE_TIMEOUT_SECS", 10),
        }
    }

    /// Check that the fields needed to reach the database are present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Missing("DB_HOSTNAME".into()));
        }
        if self.username.is_empty() {
            return Err(ConfigError::Missing("DB_USERNAME".into()));
        }
        if self.name.is_empty() {
            return Err(ConfigError::Missing("DB_NAME".into()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid {
                key: "DB_PORT".into(),
                value: self.port.to_string(),
            });
        }
        if !self.iam_auth && self.password.is_none() {
            return Err(ConfigError::Missing("DB_PASSWORD".into()));
        }
        Ok(())
    }
}

// ── AWS ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    /// Explicit region; `None` defers to the SDK's provider chain.
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    #[serde(skip_serializing)]
    pub secret_access_key: Option<String>,
    #[serde(skip_serializing)]
    pub session_token: Option<String>,
}

impl AwsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            region: profiled_env_opt(p, "AWS_REGION"),
            access_key_id: profiled_env_opt(p, "AWS_ACCESS_KEY_ID"),
            secret_access_key: profiled_env_opt(p, "AWS_SECRET_ACCESS_KEY"),
            session_token: profiled_env_opt(p, "AWS_SESSION_TOKEN"),
        }
    }

    pub fn has_static_credentials(&self) -> bool {
        self.access_key_id.is_some() && self.secret_access_key.is_some()
    }
}

// ── Tests ─────────────────────────────────────────────────────
