//! IAM authentication tokens.
//!
//! A token is a presigned `rds-db:connect` request that MySQL accepts as the
//! password for an IAM-enabled user. [`TokenMinter`] produces one per
//! connection attempt: it fetches the current credentials from the provider,
//! signs for the exact endpoint and user, and retries a small fixed number of
//! times because it runs on the connection-establishment path.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use aws_sdk_rds::auth_token::{AuthTokenGenerator, Config as AuthTokenConfig};
use aws_types::region::Region;
use aws_types::SdkConfig;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::dsn::ConnectionTarget;
use crate::retry::retry;

/// Total signing attempts per mint (the first try plus one retry).
pub const MAX_AUTH_TOKEN_ATTEMPTS: u32 = 2;

/// Longest validity RDS accepts for an auth token.
pub const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(15 * 60);

const MIN_TOKEN_LIFETIME: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// A short-lived IAM auth token. Formatting never reveals the value.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for placing into the handshake.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub(crate) fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A single signing attempt failed.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("failed to load AWS credentials: {0}")]
    Credentials(#[from] CredentialsError),

    #[error("failed to sign auth token: {0}")]
    Signing(String),
}

/// Every allowed signing attempt failed.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to generate IAM auth token after {attempts} attempt(s): {source}")]
    AuthTokenFailure {
        attempts: u32,
        #[source]
        source: SignerError,
    },
}

// ---------------------------------------------------------------------------
// Signer
// ---------------------------------------------------------------------------

/// Everything one signature covers.
#[derive(Debug, Clone, Copy)]
pub struct SigningRequest<'a> {
    pub host: &'a str,
    pub port: u16,
    pub region: &'a str,
    pub user: &'a str,
    pub credentials: &'a Credentials,
    pub expires_in: Duration,
}

/// The identity provider's token-signing call.
#[async_trait]
pub trait AuthTokenSigner: Send + Sync {
    async fn build_auth_token(
        &self,
        request: SigningRequest<'_>,
    ) -> Result<AuthToken, SignerError>;
}

/// Signs tokens locally with SigV4 via the RDS SDK's token generator.
pub struct RdsAuthTokenSigner {
    sdk_config: SdkConfig,
}

impl RdsAuthTokenSigner {
    /// The SDK config supplies the time source; region and credentials come
    /// from each [`SigningRequest`].
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            sdk_config: sdk_config.clone(),
        }
    }
}

#[async_trait]
impl AuthTokenSigner for RdsAuthTokenSigner {
    async fn build_auth_token(
        &self,
        request: SigningRequest<'_>,
    ) -> Result<AuthToken, SignerError> {
        let config = AuthTokenConfig::builder()
            .hostname(request.host)
            .port(u64::from(request.port))
            .username(request.user)
            .region(Region::new(request.region.to_string()))
            .credentials(request.credentials.clone())
            .expires_in(request.expires_in.as_secs())
            .build()
            .map_err(|e| SignerError::Signing(e.to_string()))?;

        let token = AuthTokenGenerator::new(config)
            .auth_token(&self.sdk_config)
            .await
            .map_err(|e| SignerError::Signing(e.to_string()))?;

        Ok(AuthToken::new(token.as_str()))
    }
}

// ---------------------------------------------------------------------------
// Minter
// ---------------------------------------------------------------------------

/// Produces a fresh token for every connection attempt.
#[derive(Clone)]
pub struct TokenMinter {
    credentials: SharedCredentialsProvider,
    signer: Arc<dyn AuthTokenSigner>,
    max_attempts: u32,
}

impl TokenMinter {
    pub fn new(credentials: SharedCredentialsProvider, signer: Arc<dyn AuthTokenSigner>) -> Self {
        Self {
            credentials,
            signer,
            max_attempts: MAX_AUTH_TOKEN_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Mint a token for `target`, retrying failed attempts without delay.
    ///
    /// Failures are retried regardless of cause, so a permanent
    /// misconfiguration such as a bad region costs every attempt.
    pub async fn mint(&self, target: &ConnectionTarget) -> Result<AuthToken, TokenError> {
        let endpoint = target.endpoint();
        let endpoint = endpoint.as_str();
        let max_attempts = self.max_attempts;

        retry(max_attempts, |attempt| async move {
            let result = self.sign_once(target).await;
            if let Err(e) = &result {
                warn!(
                    attempt,
                    max_attempts,
                    endpoint,
                    user = %target.user,
                    region = %target.region,
                    error = %e,
                    "auth token generation failed"
                );
            }
            result
        })
        .await
        .map_err(|source| TokenError::AuthTokenFailure {
            attempts: max_attempts,
            source,
        })
    }

    async fn sign_once(&self, target: &ConnectionTarget) -> Result<AuthToken, SignerError> {
        // Never cached: the provider owns refresh, so ask it every time.
        let credentials = self.credentials.provide_credentials().await?;
        let expires_in = token_lifetime(credentials.expiry(), SystemTime::now());

        debug!(
            endpoint = %target.endpoint(),
            user = %target.user,
            credentials_expiry = ?credentials.expiry().map(DateTime::<Utc>::from),
            expires_in_secs = expires_in.as_secs(),
            "signing auth token"
        );

        self.signer
            .build_auth_token(SigningRequest {
                host: &target.host,
                port: target.port,
                region: &target.region,
                user: &target.user,
                credentials: &credentials,
                expires_in,
            })
            .await
    }
}

impl fmt::Debug for TokenMinter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenMinter")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

/// Token validity: the RDS maximum, cut short so it never outlives the
/// credentials that signed it.
pub fn token_lifetime(credentials_expiry: Option<SystemTime>, now: SystemTime) -> Duration {
    match credentials_expiry {
        None => MAX_TOKEN_LIFETIME,
        Some(expiry) => expiry
            .duration_since(now)
            .unwrap_or(Duration::ZERO)
            .clamp(MIN_TOKEN_LIFETIME, MAX_TOKEN_LIFETIME),
    }
}
