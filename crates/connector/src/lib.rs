//! IAM-authenticated MySQL connections for Amazon RDS.
//!
//! Every physical connection gets a freshly signed auth token in place of a
//! static password, and TLS is verified against a pinned certificate bundle.

pub mod dialer;
pub mod dsn;
pub mod opener;
pub mod registry;
pub mod retry;
pub mod token;
pub mod trust;

pub use dialer::{HandshakeError, MySqlDialer};
pub use dsn::{ConnectionTarget, Dsn, DsnError, TlsMode, OVERRIDE_PASSWORD_PLACEHOLDER};
pub use opener::{
    Dialer, DriverRegistration, IamDriver, OpenAttempt, OpenError, OpenStage, ResolvedConnection,
};
pub use registry::{
    Registry, RegistryBuilder, RegistryError, TransportProfiles, DEFAULT_DRIVER_NAME,
    DEFAULT_TLS_PROFILE,
};
pub use retry::retry;
pub use token::{
    AuthToken, AuthTokenSigner, RdsAuthTokenSigner, SignerError, SigningRequest, TokenError,
    TokenMinter, MAX_AUTH_TOKEN_ATTEMPTS,
};
pub use trust::{TransportProfile, TrustBundle, TrustStoreError};
