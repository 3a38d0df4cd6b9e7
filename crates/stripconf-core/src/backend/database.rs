//! Relational configuration database backend
//!
//! The SQL session itself is behind [`DbClient`]; this backend owns credential
//! resolution, session state and partition versioning around it.

use std::ops::RangeInclusive;
use tracing::{debug, error, info, warn};

use super::{BackendError, ConfigBackend, ConnectError};
use crate::description::{
    DcuDetIdMap, DeviceDescription, DeviceDescriptions, FedConnection, FedConnections,
    FedDescription, FedDescriptions, PiaResetDescriptions,
};
use crate::params::{BackendMode, DbCredentials, Partition, PartitionVersion, CONFDB_ENV};

/// Timestamp window used when selecting DCU readouts
pub const DCU_TIMESTAMP_WINDOW: RangeInclusive<u32> = 0..=999_999;

/// SQL session against the configuration database
///
/// Partition versions of (0, 0) select the latest version.
pub trait DbClient {
    fn open(&mut self, user: &str, password: &str, path: &str) -> Result<(), BackendError>;

    fn close(&mut self) -> Result<(), BackendError>;

    fn select_devices(
        &mut self,
        partition: &str,
        version: PartitionVersion,
    ) -> Result<DeviceDescriptions, BackendError>;

    fn select_dcus(
        &mut self,
        partition: &str,
        timestamps: RangeInclusive<u32>,
    ) -> Result<DeviceDescriptions, BackendError>;

    fn select_fed_descriptions(
        &mut self,
        partition: &str,
        version: PartitionVersion,
    ) -> Result<FedDescriptions, BackendError>;

    fn select_fed_connections(
        &mut self,
        partition: &str,
        version: PartitionVersion,
    ) -> Result<FedConnections, BackendError>;

    fn select_pia_resets(&mut self, partition: &str) -> Result<PiaResetDescriptions, BackendError>;

    fn select_dcu_det_id_map(&mut self, partition: &str) -> Result<DcuDetIdMap, BackendError>;

    /// Insert devices as a new version, returning the version created
    fn insert_devices(
        &mut self,
        partition: &str,
        devices: &[&DeviceDescription],
        new_major_version: bool,
    ) -> Result<PartitionVersion, BackendError>;

    fn insert_dcus(&mut self, partition: &str, dcus: &[&DeviceDescription])
        -> Result<(), BackendError>;

    fn insert_fed_descriptions(
        &mut self,
        partition: &str,
        feds: &[FedDescription],
        new_major_version: bool,
    ) -> Result<PartitionVersion, BackendError>;

    fn insert_fed_connections(
        &mut self,
        partition: &str,
        connections: &[FedConnection],
    ) -> Result<(), BackendError>;

    fn insert_pia_resets(
        &mut self,
        partition: &str,
        resets: &[DeviceDescription],
    ) -> Result<(), BackendError>;

    fn insert_dcu_det_id_map(&mut self, partition: &str, map: &DcuDetIdMap)
        -> Result<(), BackendError>;
}

pub struct DatabaseBackend {
    credentials: DbCredentials,
    client: Box<dyn DbClient>,
    env_lookup: fn() -> Option<String>,
    connected: bool,
}

fn confdb_from_env() -> Option<String> {
    std::env::var(CONFDB_ENV).ok()
}

impl DatabaseBackend {
    pub fn new(credentials: DbCredentials, client: Box<dyn DbClient>) -> Self {
        Self {
            credentials,
            client,
            env_lookup: confdb_from_env,
            connected: false,
        }
    }

    /// Replace the source of fallback credentials
    pub fn with_env_lookup(mut self, lookup: fn() -> Option<String>) -> Self {
        self.env_lookup = lookup;
        self
    }

    /// Credentials in use; resolved ones once connected
    pub fn credentials(&self) -> &DbCredentials {
        &self.credentials
    }

    fn session(&mut self) -> Result<&mut dyn DbClient, BackendError> {
        if self.connected {
            Ok(self.client.as_mut())
        } else {
            Err(BackendError::Runtime(
                "database session is not open".to_string(),
            ))
        }
    }
}

impl ConfigBackend for DatabaseBackend {
    fn mode(&self) -> BackendMode {
        BackendMode::UsingDatabase
    }

    fn connect(&mut self) -> Result<(), ConnectError> {
        if !self.credentials.is_complete() {
            warn!(
                env = CONFDB_ENV,
                "Database connection parameters incomplete; trying environment"
            );
        }
        let resolved = match self.credentials.resolve_with(self.env_lookup) {
            Some(credentials) => credentials,
            None => {
                error!(env = CONFDB_ENV, "No usable database connection parameters");
                return Err(ConnectError::MissingCredentials);
            }
        };

        self.client
            .open(&resolved.user, &resolved.password, &resolved.path)?;
        info!(login = %resolved.login_target(), "Database session open");
        self.credentials = resolved;
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), BackendError> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        self.client.close()?;
        debug!(login = %self.credentials.login_target(), "Database session closed");
        Ok(())
    }

    fn fetch_device_descriptions(
        &mut self,
        partition: &Partition,
    ) -> Result<DeviceDescriptions, BackendError> {
        let version = partition.version();
        self.session()?.select_devices(&partition.name, version)
    }

    fn fetch_dcu_descriptions(
        &mut self,
        partition: &Partition,
    ) -> Result<DeviceDescriptions, BackendError> {
        self.session()?
            .select_dcus(&partition.name, DCU_TIMESTAMP_WINDOW)
    }

    fn fetch_fed_descriptions(
        &mut self,
        partition: &Partition,
    ) -> Result<FedDescriptions, BackendError> {
        let version = partition.version();
        self.session()?
            .select_fed_descriptions(&partition.name, version)
    }

    fn fetch_fed_connections(
        &mut self,
        partition: &Partition,
    ) -> Result<FedConnections, BackendError> {
        let version = partition.version();
        self.session()?
            .select_fed_connections(&partition.name, version)
    }

    fn fetch_pia_resets(
        &mut self,
        partition: &Partition,
    ) -> Result<PiaResetDescriptions, BackendError> {
        self.session()?.select_pia_resets(&partition.name)
    }

    fn fetch_dcu_det_id_map(&mut self, partition: &Partition) -> Result<DcuDetIdMap, BackendError> {
        self.session()?.select_dcu_det_id_map(&partition.name)
    }

    fn store_device_descriptions(
        &mut self,
        partition: &Partition,
        devices: &[&DeviceDescription],
        new_major_version: bool,
    ) -> Result<PartitionVersion, BackendError> {
        let version = self
            .session()?
            .insert_devices(&partition.name, devices, new_major_version)?;
        info!(
            partition = %partition.name,
            devices = devices.len(),
            version = %version,
            "Stored device descriptions"
        );
        Ok(version)
    }

    fn store_dcu_descriptions(
        &mut self,
        partition: &Partition,
        dcus: &[&DeviceDescription],
    ) -> Result<(), BackendError> {
        self.session()?.insert_dcus(&partition.name, dcus)
    }

    fn store_fed_descriptions(
        &mut self,
        partition: &Partition,
        feds: &[FedDescription],
        new_major_version: bool,
    ) -> Result<PartitionVersion, BackendError> {
        let version = self
            .session()?
            .insert_fed_descriptions(&partition.name, feds, new_major_version)?;
        info!(
            partition = %partition.name,
            feds = feds.len(),
            version = %version,
            "Stored FED descriptions"
        );
        Ok(version)
    }

    fn store_fed_connections(
        &mut self,
        partition: &Partition,
        connections: &[FedConnection],
    ) -> Result<(), BackendError> {
        self.session()?
            .insert_fed_connections(&partition.name, connections)
    }

    fn store_pia_resets(
        &mut self,
        partition: &Partition,
        resets: &[DeviceDescription],
    ) -> Result<(), BackendError> {
        self.session()?.insert_pia_resets(&partition.name, resets)
    }

    fn store_dcu_det_id_map(
        &mut self,
        partition: &Partition,
        map: &DcuDetIdMap,
    ) -> Result<(), BackendError> {
        self.session()?.insert_dcu_det_id_map(&partition.name, map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records the login used and refuses everything else
    #[derive(Default)]
    struct LoginRecorder {
        logins: Rc<RefCell<Vec<(String, String)>>>,
    }

    impl DbClient for LoginRecorder {
        fn open(&mut self, user: &str, _password: &str, path: &str) -> Result<(), BackendError> {
            self.logins
                .borrow_mut()
                .push((user.to_string(), path.to_string()));
            Ok(())
        }
        fn close(&mut self) -> Result<(), BackendError> {
            Ok(())
        }
        fn select_devices(&mut self, _: &str, _: PartitionVersion) -> Result<DeviceDescriptions, BackendError> {
            Ok(Vec::new())
        }
        fn select_dcus(&mut self, _: &str, _: RangeInclusive<u32>) -> Result<DeviceDescriptions, BackendError> {
            Ok(Vec::new())
        }
        fn select_fed_descriptions(&mut self, _: &str, _: PartitionVersion) -> Result<FedDescriptions, BackendError> {
            Ok(Vec::new())
        }
        fn select_fed_connections(&mut self, _: &str, _: PartitionVersion) -> Result<FedConnections, BackendError> {
            Ok(Vec::new())
        }
        fn select_pia_resets(&mut self, _: &str) -> Result<PiaResetDescriptions, BackendError> {
            Ok(Vec::new())
        }
        fn select_dcu_det_id_map(&mut self, _: &str) -> Result<DcuDetIdMap, BackendError> {
            Ok(DcuDetIdMap::new())
        }
        fn insert_devices(&mut self, _: &str, _: &[&DeviceDescription], _: bool) -> Result<PartitionVersion, BackendError> {
            Err(BackendError::Unknown)
        }
        fn insert_dcus(&mut self, _: &str, _: &[&DeviceDescription]) -> Result<(), BackendError> {
            Err(BackendError::Unknown)
        }
        fn insert_fed_descriptions(&mut self, _: &str, _: &[FedDescription], _: bool) -> Result<PartitionVersion, BackendError> {
            Err(BackendError::Unknown)
        }
        fn insert_fed_connections(&mut self, _: &str, _: &[FedConnection]) -> Result<(), BackendError> {
            Err(BackendError::Unknown)
        }
        fn insert_pia_resets(&mut self, _: &str, _: &[DeviceDescription]) -> Result<(), BackendError> {
            Err(BackendError::Unknown)
        }
        fn insert_dcu_det_id_map(&mut self, _: &str, _: &DcuDetIdMap) -> Result<(), BackendError> {
            Err(BackendError::Unknown)
        }
    }

    fn no_env() -> Option<String> {
        None
    }

    fn env_credentials() -> Option<String> {
        Some("env_user/env_pw@env_db".to_string())
    }

    #[test]
    fn test_explicit_credentials() {
        let client = LoginRecorder::default();
        let logins = client.logins.clone();
        let mut backend = DatabaseBackend::new(DbCredentials::new("u", "p", "db"), Box::new(client))
            .with_env_lookup(env_credentials);

        backend.connect().unwrap();
        assert_eq!(logins.borrow().as_slice(), &[("u".to_string(), "db".to_string())]);
    }

    #[test]
    fn test_env_fallback() {
        let client = LoginRecorder::default();
        let logins = client.logins.clone();
        let mut backend = DatabaseBackend::new(DbCredentials::default(), Box::new(client))
            .with_env_lookup(env_credentials);

        backend.connect().unwrap();
        assert_eq!(backend.credentials().user, "env_user");
        assert_eq!(logins.borrow()[0].1, "env_db");
    }

    #[test]
    fn test_missing_credentials() {
        let mut backend =
            DatabaseBackend::new(DbCredentials::new("u", "", ""), Box::new(LoginRecorder::default()))
                .with_env_lookup(no_env);
        assert!(matches!(backend.connect(), Err(ConnectError::MissingCredentials)));
    }

    #[test]
    fn test_queries_require_session() {
        let mut backend = DatabaseBackend::new(
            DbCredentials::new("u", "p", "db"),
            Box::new(LoginRecorder::default()),
        );
        let partition = Partition::new("P", 0, 0);
        assert!(backend.fetch_pia_resets(&partition).is_err());

        backend.connect().unwrap();
        assert!(backend.fetch_pia_resets(&partition).unwrap().is_empty());

        backend.disconnect().unwrap();
        backend.disconnect().unwrap();
        assert!(backend.fetch_pia_resets(&partition).is_err());
    }
}
