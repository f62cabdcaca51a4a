//! Test doubles shared by the integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;

use rdsauth_connector::*;

pub const BUNDLE: &[u8] = include_bytes!("../fixtures/test-ca-bundle.pem");
pub const SINGLE: &[u8] = include_bytes!("../fixtures/test-ca.pem");

// ── Dialer ──────────────────────────────────────────────────────────

/// Records every resolved connection it is asked to dial and returns the
/// password it saw as the "connection".
#[derive(Clone, Default)]
pub struct RecordingDialer {
    seen: Arc<Mutex<Vec<ResolvedConnection>>>,
    fail: bool,
}

impl RecordingDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dialer whose handshake always times out.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn dials(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<ResolvedConnection> {
        self.seen.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Dialer for RecordingDialer {
    type Connection = String;

    async fn connect(&self, resolved: &ResolvedConnection) -> Result<String, HandshakeError> {
        self.seen.lock().unwrap().push(resolved.clone());
        if self.fail {
            return Err(HandshakeError::Timeout {
                addr: resolved.dsn.addr(),
                timeout: Duration::from_secs(1),
            });
        }
        Ok(resolved.dsn.password.clone())
    }
}

// ── Signer ──────────────────────────────────────────────────────────

/// Replays a fixed script of results. Once the script runs out, every call
/// succeeds with `tok-<call number>`.
pub struct ScriptedSigner {
    script: Mutex<VecDeque<Result<&'static str, &'static str>>>,
    calls: AtomicU32,
    requests: Mutex<Vec<SignedFor>>,
}

/// The endpoint and identity a token was signed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedFor {
    pub host: String,
    pub port: u16,
    pub region: String,
    pub user: String,
}

impl ScriptedSigner {
    pub fn new(script: &[Result<&'static str, &'static str>]) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.iter().copied().collect()),
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// A signer that always succeeds with a distinct token.
    pub fn sequential() -> Arc<Self> {
        Self::new(&[])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<SignedFor> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuthTokenSigner for ScriptedSigner {
    async fn build_auth_token(
        &self,
        request: SigningRequest<'_>,
    ) -> Result<AuthToken, SignerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(SignedFor {
            host: request.host.to_string(),
            port: request.port,
            region: request.region.to_string(),
            user: request.user.to_string(),
        });
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(token)) => Ok(AuthToken::new(token)),
            Some(Err(reason)) => Err(SignerError::Signing(reason.to_string())),
            None => Ok(AuthToken::new(format!("tok-{call}"))),
        }
    }
}

// ── Builders ────────────────────────────────────────────────────────

pub fn static_credentials() -> SharedCredentialsProvider {
    SharedCredentialsProvider::new(Credentials::new(
        "AKIDEXAMPLE",
        "wJalrXUtnFEMI/K7MDENG",
        None,
        None,
        "integration-test",
    ))
}

pub fn bundle() -> TrustBundle {
    TrustBundle::from_pem(BUNDLE).unwrap()
}

/// A registry with the `aws-rds` profile and one IAM driver under the default name.
pub fn iam_registry(
    dialer: RecordingDialer,
    signer: Arc<ScriptedSigner>,
    region: &str,
) -> Registry<RecordingDialer> {
    let minter = TokenMinter::new(static_credentials(), signer);
    Registry::builder()
        .transport_profile(DEFAULT_TLS_PROFILE, bundle())
        .driver(
            DEFAULT_DRIVER_NAME,
            DriverRegistration::new(dialer).with_iam(region, minter),
        )
        .build()
        .unwrap()
}
