//! Named drivers and transport profiles.
//!
//! A [`Registry`] is assembled once at startup and never changes afterwards.
//! Whatever builds the connection pool receives it explicitly and opens
//! connections by driver name.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::dialer::MySqlDialer;
use crate::opener::{Dialer, DriverRegistration, IamDriver, OpenError};
use crate::trust::{TransportProfile, TrustBundle};

/// Name the IAM-authenticating MySQL driver is registered under.
pub const DEFAULT_DRIVER_NAME: &str = "mysql-aws-iam";

/// Name of the transport profile holding the RDS certificate bundle.
pub const DEFAULT_TLS_PROFILE: &str = "aws-rds";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registration names must not be empty")]
    EmptyName,

    #[error("transport profile {0:?} registered twice")]
    DuplicateTransportProfile(String),

    #[error("driver {0:?} registered twice")]
    DuplicateDriver(String),

    #[error("driver {0:?} overrides the password but has no token minter")]
    MissingTokenMinter(String),
}

/// Read-only lookup of transport profiles by name.
#[derive(Debug, Default)]
pub struct TransportProfiles {
    profiles: HashMap<String, TransportProfile>,
}

impl TransportProfiles {
    pub fn get(&self, name: &str) -> Option<&TransportProfile> {
        self.profiles.get(name)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// Immutable table of drivers and transport profiles.
pub struct Registry<D: Dialer = MySqlDialer> {
    profiles: Arc<TransportProfiles>,
    drivers: HashMap<String, Arc<IamDriver<D>>>,
}

impl<D: Dialer> Registry<D> {
    pub fn builder() -> RegistryBuilder<D> {
        RegistryBuilder {
            profiles: Vec::new(),
            drivers: Vec::new(),
        }
    }

    pub fn driver(&self, name: &str) -> Option<Arc<IamDriver<D>>> {
        self.drivers.get(name).cloned()
    }

    pub fn transport_profile(&self, name: &str) -> Option<&TransportProfile> {
        self.profiles.get(name)
    }

    /// Open a connection through the driver registered as `driver`.
    pub async fn open(&self, driver: &str, dsn: &str) -> Result<D::Connection, OpenError> {
        let driver = self
            .drivers
            .get(driver)
            .ok_or_else(|| OpenError::UnknownDriver(driver.to_string()))?;
        driver.open(dsn).await
    }
}

/// Collects registrations; [`RegistryBuilder::build`] validates and freezes them.
pub struct RegistryBuilder<D: Dialer> {
    profiles: Vec<(String, TrustBundle)>,
    drivers: Vec<(String, DriverRegistration<D>)>,
}

impl<D: Dialer> RegistryBuilder<D> {
    /// Bind a trust bundle under `name`, referenced from connection strings as `tls=<name>`.
    pub fn transport_profile(mut self, name: impl Into<String>, bundle: TrustBundle) -> Self {
        self.profiles.push((name.into(), bundle));
        self
    }

    pub fn driver(mut self, name: impl Into<String>, registration: DriverRegistration<D>) -> Self {
        self.drivers.push((name.into(), registration));
        self
    }

    pub fn build(self) -> Result<Registry<D>, RegistryError> {
        let mut profiles = HashMap::new();
        for (name, bundle) in self.profiles {
            if name.is_empty() {
                return Err(RegistryError::EmptyName);
            }
            if profiles.contains_key(&name) {
                return Err(RegistryError::DuplicateTransportProfile(name));
            }
            info!(profile = %name, anchors = bundle.len(), "transport profile registered");
            profiles.insert(name.clone(), TransportProfile::new(name, bundle));
        }
        let profiles = Arc::new(TransportProfiles { profiles });

        let mut drivers = HashMap::new();
        for (name, registration) in self.drivers {
            if name.is_empty() {
                return Err(RegistryError::EmptyName);
            }
            if drivers.contains_key(&name) {
                return Err(RegistryError::DuplicateDriver(name));
            }
            if registration.override_password && registration.minter.is_none() {
                return Err(RegistryError::MissingTokenMinter(name));
            }
            info!(
                driver = %name,
                override_password = registration.override_password,
                region = %registration.region,
                "driver registered"
            );
            let driver = IamDriver::new(name.clone(), registration, Arc::clone(&profiles));
            drivers.insert(name, Arc::new(driver));
        }

        Ok(Registry { profiles, drivers })
    }
}
