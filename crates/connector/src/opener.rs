//! The credential-refreshing connection opener.
//!
//! [`IamDriver::open`] turns a connection string into a live connection. With
//! password override on, every call mints a new IAM token and substitutes it
//! for the configured password; the token is never reused for a second
//! connection. Parsing, profile lookup, and minting all complete before the
//! dialer is touched, so a bad string or a failed mint never reaches the
//! network.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::dialer::HandshakeError;
use crate::dsn::{Dsn, DsnError, TlsMode};
use crate::registry::TransportProfiles;
use crate::token::{TokenError, TokenMinter};
use crate::trust::TransportProfile;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why an open call failed. Each failure leaves nothing behind, so callers
/// may simply try again.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error(transparent)]
    Parse(#[from] DsnError),

    #[error("unknown transport profile {0:?}")]
    UnknownTransportProfile(String),

    #[error(transparent)]
    AuthToken(#[from] TokenError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error("unknown driver {0:?}")]
    UnknownDriver(String),
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Progress of a single open attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStage {
    Unopened,
    ParametersResolved,
    CredentialResolved,
    HandshakeInFlight,
    Open,
    Failed,
}

impl OpenStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, OpenStage::Open | OpenStage::Failed)
    }

    /// Whether `next` directly follows `self`. Any live stage may fail.
    pub fn can_advance_to(self, next: OpenStage) -> bool {
        use OpenStage::*;
        match (self, next) {
            (Unopened, ParametersResolved)
            | (ParametersResolved, CredentialResolved)
            | (CredentialResolved, HandshakeInFlight)
            | (HandshakeInFlight, Open) => true,
            (current, Failed) => !current.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for OpenStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpenStage::Unopened => "unopened",
            OpenStage::ParametersResolved => "parameters_resolved",
            OpenStage::CredentialResolved => "credential_resolved",
            OpenStage::HandshakeInFlight => "handshake_in_flight",
            OpenStage::Open => "open",
            OpenStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks one attempt through [`OpenStage`]s, refusing to move backwards or
/// out of a terminal stage.
#[derive(Debug)]
pub struct OpenAttempt {
    stage: OpenStage,
}

impl OpenAttempt {
    pub fn new() -> Self {
        Self {
            stage: OpenStage::Unopened,
        }
    }

    pub fn stage(&self) -> OpenStage {
        self.stage
    }

    /// Move to `next`. Returns `false` and stays put if the transition is not allowed.
    pub fn advance(&mut self, next: OpenStage) -> bool {
        if !self.stage.can_advance_to(next) {
            warn!(from = %self.stage, to = %next, "rejected open stage transition");
            return false;
        }
        self.stage = next;
        true
    }
}

impl Default for OpenAttempt {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Dialer
// ---------------------------------------------------------------------------

/// Connection parameters with the credential settled and the TLS profile looked up.
#[derive(Debug, Clone)]
pub struct ResolvedConnection {
    pub dsn: Dsn,
    /// Set when the connection string names a registered transport profile.
    pub transport: Option<TransportProfile>,
}

/// Performs the network and TLS handshake for a resolved connection.
///
/// Failures are returned as-is; retry policy belongs to the caller.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    type Connection: Send;

    async fn connect(
        &self,
        resolved: &ResolvedConnection,
    ) -> Result<Self::Connection, HandshakeError>;
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// How a named driver authenticates: a dialer plus, for IAM auth, a region
/// and a token minter.
pub struct DriverRegistration<D> {
    pub(crate) dialer: D,
    pub(crate) override_password: bool,
    pub(crate) region: String,
    pub(crate) minter: Option<TokenMinter>,
}

impl<D: Dialer> DriverRegistration<D> {
    /// A driver that uses the connection string's password as-is.
    pub fn new(dialer: D) -> Self {
        Self {
            dialer,
            override_password: false,
            region: String::new(),
            minter: None,
        }
    }

    /// Replace the password with a freshly minted IAM token on every open.
    pub fn with_iam(mut self, region: impl Into<String>, minter: TokenMinter) -> Self {
        self.region = region.into();
        self.minter = Some(minter);
        self.override_password = true;
        self
    }

    /// Toggle override mode while keeping the minter configured.
    pub fn override_password(mut self, enabled: bool) -> Self {
        self.override_password = enabled;
        self
    }
}

/// A registered opener. Immutable once built; safe to share across tasks.
pub struct IamDriver<D: Dialer> {
    name: String,
    override_password: bool,
    region: String,
    minter: Option<TokenMinter>,
    profiles: Arc<TransportProfiles>,
    dialer: D,
}

impl<D: Dialer> IamDriver<D> {
    pub(crate) fn new(
        name: String,
        registration: DriverRegistration<D>,
        profiles: Arc<TransportProfiles>,
    ) -> Self {
        Self {
            name,
            override_password: registration.override_password,
            region: registration.region,
            minter: registration.minter,
            profiles,
            dialer: registration.dialer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn overrides_password(&self) -> bool {
        self.override_password
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Open a new physical connection.
    ///
    /// Blocks for the token attempts plus the handshake; callers wanting an
    /// overall bound should wrap the call in their own timeout.
    pub async fn open(&self, dsn: &str) -> Result<D::Connection, OpenError> {
        let mut attempt = OpenAttempt::new();
        let result = self.open_with(dsn, &mut attempt).await;
        if let Err(e) = &result {
            attempt.advance(OpenStage::Failed);
            warn!(driver = %self.name, stage = %attempt.stage(), error = %e, "open failed");
        }
        result
    }

    async fn open_with(
        &self,
        dsn: &str,
        attempt: &mut OpenAttempt,
    ) -> Result<D::Connection, OpenError> {
        let resolved = self.resolve(dsn, attempt).await?;

        attempt.advance(OpenStage::HandshakeInFlight);
        debug!(driver = %self.name, addr = %resolved.dsn.addr(), "handshake in flight");

        let conn = self.dialer.connect(&resolved).await?;

        attempt.advance(OpenStage::Open);
        info!(
            driver = %self.name,
            addr = %resolved.dsn.addr(),
            user = %resolved.dsn.user,
            iam = self.override_password,
            "connection opened"
        );
        Ok(conn)
    }

    /// Everything before the network: parse, look up TLS, settle the password.
    async fn resolve(
        &self,
        dsn: &str,
        attempt: &mut OpenAttempt,
    ) -> Result<ResolvedConnection, OpenError> {
        let mut dsn = Dsn::parse(dsn)?;
        let transport = self.transport_for(&dsn)?;
        attempt.advance(OpenStage::ParametersResolved);
        debug!(driver = %self.name, dsn = %dsn.redacted(), "parameters resolved");

        if self.override_password {
            // Registry::build refuses override mode without a minter.
            if let Some(minter) = &self.minter {
                let token = minter.mint(&dsn.target(&self.region)).await?;
                dsn.password = token.into_inner();
            }
        }
        attempt.advance(OpenStage::CredentialResolved);
        debug!(driver = %self.name, iam = self.override_password, "credential resolved");

        Ok(ResolvedConnection { dsn, transport })
    }

    fn transport_for(&self, dsn: &Dsn) -> Result<Option<TransportProfile>, OpenError> {
        match &dsn.tls {
            TlsMode::Profile(name) => self
                .profiles
                .get(name)
                .cloned()
                .map(Some)
                .ok_or_else(|| OpenError::UnknownTransportProfile(name.clone())),
            _ => Ok(None),
        }
    }
}

impl<D: Dialer> fmt::Debug for IamDriver<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IamDriver")
            .field("name", &self.name)
            .field("override_password", &self.override_password)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}
