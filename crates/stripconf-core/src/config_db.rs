//! Configuration access with local caching
//!
//! `ConfigDb` owns one backend (database or XML files) and five cache slots:
//! device descriptions, FED descriptions, FED connections, PIA resets and the
//! DCU to detector id map. Getters fetch lazily and never fail: backend errors
//! are classified, logged and recorded in [`ConfigDb::last_failure`], and the
//! getter returns whatever the slot holds.

use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::address::HardwareAddress;
use crate::backend::{
    BackendError, ConfigBackend, ConnectError, DatabaseBackend, DbClient, FileBackend,
};
use crate::builder::{DescriptionBuilder, GeneratedDescriptions};
use crate::cabling::FecCabling;
use crate::cache::{CacheContents, CacheSlot};
use crate::classify::{handle_exception, ClassifiedFailure, FailureDomain};
use crate::description::{
    DcuDetIdMap, DeviceDescription, DeviceDescriptions, DeviceSummary, DeviceType,
    FedConnections, FedDescriptions, PiaResetDescriptions,
};
use crate::params::{
    BackendMode, ConfigDbParams, DbCredentials, ParamsError, Partition, PartitionVersion,
    XmlFileSet,
};

#[derive(Error, Debug)]
pub enum ConfigDbError {
    #[error("Configuration backend unavailable")]
    BackendUnavailable,
    #[error(transparent)]
    Connect(#[from] ConnectError),
}

impl ConfigDbError {
    /// The connection is open but some inputs could not be used
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Connect(err) if err.is_degraded())
    }
}

type Backend = Box<dyn ConfigBackend>;

/// Reporting identity of one cache category
struct Category {
    name: &'static str,
    method: &'static str,
    domain: FailureDomain,
}

const DEVICES: Category = Category {
    name: "device descriptions",
    method: "ConfigDb::device_descriptions",
    domain: FailureDomain::Fec,
};
const FEDS: Category = Category {
    name: "FED descriptions",
    method: "ConfigDb::fed_descriptions",
    domain: FailureDomain::Fed,
};
const CONNECTIONS: Category = Category {
    name: "FED connections",
    method: "ConfigDb::fed_connections",
    domain: FailureDomain::Fec,
};
const PIA_RESETS: Category = Category {
    name: "PIA reset descriptions",
    method: "ConfigDb::pia_reset_descriptions",
    domain: FailureDomain::Fec,
};
const DCU_MAP: Category = Category {
    name: "DCU-DetId map entries",
    method: "ConfigDb::dcu_det_id_map",
    domain: FailureDomain::Sql,
};

pub struct ConfigDb {
    mode: BackendMode,
    backend: Option<Backend>,
    connected: bool,
    partition: Partition,
    devices: CacheSlot<DeviceDescriptions>,
    feds: CacheSlot<FedDescriptions>,
    connections: CacheSlot<FedConnections>,
    pia_resets: CacheSlot<PiaResetDescriptions>,
    dcu_det_id_map: CacheSlot<DcuDetIdMap>,
    last_failure: Option<ClassifiedFailure>,
}

/// Backend usable for requests, if any
fn live(backend: &mut Option<Backend>, connected: bool) -> Option<&mut Backend> {
    if connected {
        backend.as_mut()
    } else {
        None
    }
}

/// Fill a stale slot from the backend; failures leave the slot untouched
fn load<T: CacheContents>(
    slot: &mut CacheSlot<T>,
    backend: Option<&mut Backend>,
    last_failure: &mut Option<ClassifiedFailure>,
    category: &Category,
    partition: &Partition,
    fetch: impl FnOnce(&mut dyn ConfigBackend) -> Result<T, BackendError>,
) {
    if !slot.is_stale() {
        return;
    }
    let Some(backend) = backend else {
        debug!(
            method = category.method,
            "Backend unavailable; returning cached {}", category.name
        );
        return;
    };

    match fetch(&mut **backend) {
        Ok(contents) => {
            let count = contents.entry_count();
            if count == 0 {
                warn!(
                    method = category.method,
                    partition = %partition,
                    "No {} found", category.name
                );
            } else {
                debug!(method = category.method, count, "Loaded {}", category.name);
            }
            slot.fill(contents);
        }
        Err(err) => {
            *last_failure = Some(handle_exception(category.domain, category.method, &err));
        }
    }
}

/// Store devices, routing DCUs through their own write path
///
/// The partition takes the new version as soon as the backend creates it,
/// even if the DCU store then fails.
fn store_devices(
    backend: &mut dyn ConfigBackend,
    mode: BackendMode,
    partition: &mut Partition,
    devices: &[DeviceDescription],
    pia_resets: &[DeviceDescription],
    new_major_version: bool,
) -> Result<PartitionVersion, BackendError> {
    if mode == BackendMode::UsingFiles {
        backend.store_pia_resets(partition, pia_resets)?;
    }
    let (dcus, others): (Vec<&DeviceDescription>, Vec<&DeviceDescription>) =
        devices.iter().partition(|d| d.is_dcu());
    let version = backend.store_device_descriptions(partition, &others, new_major_version)?;
    partition.set_version(version);
    backend.store_dcu_descriptions(partition, &dcus)?;
    Ok(version)
}

impl ConfigDb {
    fn with_backend_mode(mode: BackendMode, backend: Option<Backend>) -> Self {
        Self {
            mode,
            backend,
            connected: false,
            partition: Partition::default(),
            devices: CacheSlot::new(),
            feds: CacheSlot::new(),
            connections: CacheSlot::new(),
            pia_resets: CacheSlot::new(),
            dcu_det_id_map: CacheSlot::new(),
            last_failure: None,
        }
    }

    /// Database mode. Without a client the backend is unavailable and every
    /// getter returns empty contents.
    pub fn using_database(credentials: DbCredentials, client: Option<Box<dyn DbClient>>) -> Self {
        let backend: Option<Backend> = match client {
            Some(client) => Some(Box::new(DatabaseBackend::new(credentials, client))),
            None => {
                error!(
                    login = %credentials.login_target(),
                    "No database client available; configuration backend unavailable"
                );
                None
            }
        };
        Self::with_backend_mode(BackendMode::UsingDatabase, backend)
    }

    pub fn using_xml_files(files: XmlFileSet) -> Self {
        Self::with_backend_mode(
            BackendMode::UsingFiles,
            Some(Box::new(FileBackend::new(files))),
        )
    }

    /// Any other backend implementation
    pub fn with_backend(backend: Box<dyn ConfigBackend>) -> Self {
        let mode = backend.mode();
        Self::with_backend_mode(mode, Some(backend))
    }

    pub fn from_params(
        params: ConfigDbParams,
        client: Option<Box<dyn DbClient>>,
    ) -> Result<Self, ParamsError> {
        let mut db = match params.mode()? {
            BackendMode::UsingFiles => Self::using_xml_files(params.files.unwrap_or_default()),
            BackendMode::UsingDatabase => {
                Self::using_database(params.database.unwrap_or_default(), client)
            }
        };
        db.partition = params.partition;
        Ok(db)
    }

    pub fn mode(&self) -> BackendMode {
        self.mode
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Whether requests can reach a backend
    pub fn is_available(&self) -> bool {
        self.connected && self.backend.is_some()
    }

    /// Most recent classified backend failure
    pub fn last_failure(&self) -> Option<&ClassifiedFailure> {
        self.last_failure.as_ref()
    }

    /// Clear and return the most recent failure
    pub fn take_last_failure(&mut self) -> Option<ClassifiedFailure> {
        self.last_failure.take()
    }

    /// Switch partition; every cache becomes stale
    pub fn set_partition(&mut self, partition: Partition) {
        info!(partition = %partition, "Switching partition");
        self.partition = partition;
        self.reset_all();
    }

    pub fn open_connection(&mut self) -> Result<(), ConfigDbError> {
        const METHOD: &str = "ConfigDb::open_connection";

        let Some(backend) = self.backend.as_mut() else {
            error!(method = METHOD, "Configuration backend unavailable");
            return Err(ConfigDbError::BackendUnavailable);
        };
        if self.connected {
            debug!(method = METHOD, "Connection already open");
            return Ok(());
        }

        info!(
            method = METHOD,
            mode = %self.mode,
            partition = %self.partition,
            "Opening connection"
        );
        match backend.connect() {
            Ok(()) => {
                self.connected = true;
                info!(method = METHOD, "Connection open");
                Ok(())
            }
            Err(err) if err.is_degraded() => {
                self.connected = true;
                warn!(method = METHOD, error = %err, "Connection open with incomplete inputs");
                Err(err.into())
            }
            Err(err) => {
                match &err {
                    ConnectError::Backend(cause) => {
                        self.last_failure =
                            Some(handle_exception(FailureDomain::Sql, METHOD, cause));
                    }
                    other => error!(method = METHOD, error = %other, "Failed to open connection"),
                }
                self.backend = None;
                warn!(method = METHOD, "Configuration backend released");
                Err(err.into())
            }
        }
    }

    /// Release the backend session; safe to call any number of times
    pub fn close_connection(&mut self) {
        const METHOD: &str = "ConfigDb::close_connection";

        if !self.connected {
            debug!(method = METHOD, "No open connection");
            return;
        }
        self.connected = false;
        if let Some(backend) = self.backend.as_mut() {
            if let Err(err) = backend.disconnect() {
                self.last_failure = Some(handle_exception(FailureDomain::Sql, METHOD, &err));
            }
        }
        info!(method = METHOD, "Connection closed");
    }

    fn reset_all(&mut self) {
        self.reset_device_descriptions();
        self.reset_fed_descriptions();
        self.reset_fed_connections();
        self.reset_pia_reset_descriptions();
        self.reset_dcu_det_id_map();
    }

    /// Reset and reload every cache in dependency order
    pub fn update_local_caches(&mut self) {
        info!(partition = %self.partition, "Updating local caches");
        self.reset_all();
        self.device_descriptions();
        self.fed_descriptions();
        self.fed_connections();
        self.pia_reset_descriptions();
        self.dcu_det_id_map();
    }

    // ---- device descriptions ----

    /// All devices, DCUs included
    pub fn device_descriptions(&mut self) -> &DeviceDescriptions {
        if self.devices.is_stale() && self.mode == BackendMode::UsingFiles && self.is_available() {
            self.reset_pia_reset_descriptions();
            self.pia_reset_descriptions();
        }

        let partition = &self.partition;
        load(
            &mut self.devices,
            live(&mut self.backend, self.connected),
            &mut self.last_failure,
            &DEVICES,
            partition,
            |backend| {
                let mut devices = backend.fetch_device_descriptions(partition)?;
                devices.extend(backend.fetch_dcu_descriptions(partition)?);
                Ok(devices)
            },
        );
        self.devices.contents()
    }

    /// Cached devices of one type, or of every other type; never fetches
    pub fn device_descriptions_of_type(
        &self,
        device_type: DeviceType,
        all_except: bool,
    ) -> Vec<&DeviceDescription> {
        let selected: Vec<&DeviceDescription> = self
            .devices
            .contents()
            .iter()
            .filter(|d| (d.device_type() == device_type) != all_except)
            .collect();
        if selected.is_empty() {
            warn!(
                device_type = %device_type,
                all_except,
                "No cached device descriptions match"
            );
        }
        selected
    }

    pub fn reset_device_descriptions(&mut self) {
        debug!(method = "ConfigDb::reset_device_descriptions", "Resetting device descriptions");
        self.devices.reset();
    }

    /// Install devices, e.g. freshly built ones, without fetching
    pub fn replace_device_descriptions(&mut self, devices: DeviceDescriptions) {
        self.devices.fill(devices);
    }

    pub fn upload_device_descriptions(&mut self, new_major_version: bool) {
        const METHOD: &str = "ConfigDb::upload_device_descriptions";

        let Some(backend) = live(&mut self.backend, self.connected) else {
            warn!(method = METHOD, "Backend unavailable; nothing uploaded");
            return;
        };
        let result = store_devices(
            &mut **backend,
            self.mode,
            &mut self.partition,
            self.devices.contents(),
            self.pia_resets.contents(),
            new_major_version,
        );
        match result {
            Ok(version) => info!(
                method = METHOD,
                devices = self.devices.len(),
                version = %version,
                "Uploaded device descriptions"
            ),
            Err(err) => {
                self.last_failure = Some(handle_exception(FailureDomain::Fec, METHOD, &err));
            }
        }
    }

    /// Decoded address of a device; the crate is not recoverable from the key
    pub fn device_address(device: &DeviceDescription) -> HardwareAddress {
        device.address()
    }

    /// Per-type counts of the device descriptions
    pub fn device_summary(&mut self) -> DeviceSummary {
        let summary = DeviceSummary::from_devices(self.device_descriptions());
        for (device_type, count) in &summary.counts {
            debug!(device_type = %device_type, count, "Device summary");
        }
        summary
    }

    // ---- FED descriptions ----

    pub fn fed_descriptions(&mut self) -> &FedDescriptions {
        let partition = &self.partition;
        load(
            &mut self.feds,
            live(&mut self.backend, self.connected),
            &mut self.last_failure,
            &FEDS,
            partition,
            |backend| backend.fetch_fed_descriptions(partition),
        );
        self.feds.contents()
    }

    /// Distinct FED ids, ascending
    pub fn fed_ids(&mut self) -> Vec<u16> {
        let ids: BTreeSet<u16> = self.fed_descriptions().iter().map(|f| f.fed_id).collect();
        ids.into_iter().collect()
    }

    pub fn reset_fed_descriptions(&mut self) {
        debug!(method = "ConfigDb::reset_fed_descriptions", "Resetting FED descriptions");
        self.feds.reset();
    }

    pub fn replace_fed_descriptions(&mut self, feds: FedDescriptions) {
        self.feds.fill(feds);
    }

    pub fn upload_fed_descriptions(&mut self, new_major_version: bool) {
        const METHOD: &str = "ConfigDb::upload_fed_descriptions";

        let Some(backend) = live(&mut self.backend, self.connected) else {
            warn!(method = METHOD, "Backend unavailable; nothing uploaded");
            return;
        };
        match backend.store_fed_descriptions(
            &self.partition,
            self.feds.contents(),
            new_major_version,
        ) {
            Ok(version) => info!(
                method = METHOD,
                feds = self.feds.len(),
                version = %version,
                "Uploaded FED descriptions"
            ),
            Err(err) => {
                self.last_failure = Some(handle_exception(FailureDomain::Fec, METHOD, &err));
            }
        }
    }

    // ---- FED connections ----

    pub fn fed_connections(&mut self) -> &FedConnections {
        let partition = &self.partition;
        load(
            &mut self.connections,
            live(&mut self.backend, self.connected),
            &mut self.last_failure,
            &CONNECTIONS,
            partition,
            |backend| backend.fetch_fed_connections(partition),
        );
        self.connections.contents()
    }

    pub fn reset_fed_connections(&mut self) {
        debug!(method = "ConfigDb::reset_fed_connections", "Resetting FED connections");
        self.connections.reset();
    }

    pub fn replace_fed_connections(&mut self, connections: FedConnections) {
        self.connections.fill(connections);
    }

    pub fn upload_fed_connections(&mut self) {
        const METHOD: &str = "ConfigDb::upload_fed_connections";

        let Some(backend) = live(&mut self.backend, self.connected) else {
            warn!(method = METHOD, "Backend unavailable; nothing uploaded");
            return;
        };
        match backend.store_fed_connections(&self.partition, self.connections.contents()) {
            Ok(()) => info!(
                method = METHOD,
                connections = self.connections.len(),
                "Uploaded FED connections"
            ),
            Err(err) => {
                self.last_failure = Some(handle_exception(FailureDomain::Fec, METHOD, &err));
            }
        }
    }

    // ---- PIA resets ----

    pub fn pia_reset_descriptions(&mut self) -> &PiaResetDescriptions {
        let partition = &self.partition;
        load(
            &mut self.pia_resets,
            live(&mut self.backend, self.connected),
            &mut self.last_failure,
            &PIA_RESETS,
            partition,
            |backend| backend.fetch_pia_resets(partition),
        );
        self.pia_resets.contents()
    }

    pub fn reset_pia_reset_descriptions(&mut self) {
        debug!(
            method = "ConfigDb::reset_pia_reset_descriptions",
            "Resetting PIA reset descriptions"
        );
        self.pia_resets.reset();
    }

    pub fn replace_pia_reset_descriptions(&mut self, resets: PiaResetDescriptions) {
        self.pia_resets.fill(resets);
    }

    pub fn upload_pia_reset_descriptions(&mut self) {
        const METHOD: &str = "ConfigDb::upload_pia_reset_descriptions";

        let Some(backend) = live(&mut self.backend, self.connected) else {
            warn!(method = METHOD, "Backend unavailable; nothing uploaded");
            return;
        };
        match backend.store_pia_resets(&self.partition, self.pia_resets.contents()) {
            Ok(()) => info!(
                method = METHOD,
                resets = self.pia_resets.len(),
                "Uploaded PIA reset descriptions"
            ),
            Err(err) => {
                self.last_failure = Some(handle_exception(FailureDomain::Sql, METHOD, &err));
            }
        }
    }

    // ---- DCU-DetId map ----

    pub fn dcu_det_id_map(&mut self) -> &DcuDetIdMap {
        let partition = &self.partition;
        load(
            &mut self.dcu_det_id_map,
            live(&mut self.backend, self.connected),
            &mut self.last_failure,
            &DCU_MAP,
            partition,
            |backend| backend.fetch_dcu_det_id_map(partition),
        );
        self.dcu_det_id_map.contents()
    }

    pub fn reset_dcu_det_id_map(&mut self) {
        debug!(method = "ConfigDb::reset_dcu_det_id_map", "Resetting DCU-DetId map");
        self.dcu_det_id_map.reset();
    }

    pub fn replace_dcu_det_id_map(&mut self, map: DcuDetIdMap) {
        self.dcu_det_id_map.fill(map);
    }

    pub fn upload_dcu_det_id_map(&mut self) {
        const METHOD: &str = "ConfigDb::upload_dcu_det_id_map";

        let Some(backend) = live(&mut self.backend, self.connected) else {
            warn!(method = METHOD, "Backend unavailable; nothing uploaded");
            return;
        };
        match backend.store_dcu_det_id_map(&self.partition, self.dcu_det_id_map.contents()) {
            Ok(()) => info!(
                method = METHOD,
                entries = self.dcu_det_id_map.len(),
                "Uploaded DCU-DetId map"
            ),
            Err(err) => {
                self.last_failure = Some(handle_exception(FailureDomain::Sql, METHOD, &err));
            }
        }
    }

    // ---- seeding ----

    /// Build default descriptions for a cabling map; touches no cache
    pub fn create_descriptions(&self, cabling: &FecCabling) -> GeneratedDescriptions {
        DescriptionBuilder::new(self.partition.name.as_str()).build(cabling)
    }
}

impl Drop for ConfigDb {
    fn drop(&mut self) {
        self.close_connection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::FailureClass;
    use crate::description::{DcuReadout, DevicePayload, FedConnection, FedDescription, MuxSettings};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Counters {
        device_fetches: usize,
        fed_fetches: usize,
        fail_feds: bool,
        fail_dcus: bool,
        fail_links: bool,
        order: Vec<&'static str>,
    }

    /// In-memory backend counting its calls
    struct CountingBackend {
        counters: Rc<RefCell<Counters>>,
    }

    impl ConfigBackend for CountingBackend {
        fn mode(&self) -> BackendMode {
            BackendMode::UsingDatabase
        }
        fn connect(&mut self) -> Result<(), ConnectError> {
            Ok(())
        }
        fn disconnect(&mut self) -> Result<(), BackendError> {
            Ok(())
        }
        fn fetch_device_descriptions(&mut self, _: &Partition) -> Result<DeviceDescriptions, BackendError> {
            let mut c = self.counters.borrow_mut();
            c.device_fetches += 1;
            c.order.push("devices");
            Ok(vec![DeviceDescription::new(
                0x0811_1043,
                "P1",
                DevicePayload::Mux(MuxSettings::default()),
            )])
        }
        fn fetch_dcu_descriptions(&mut self, _: &Partition) -> Result<DeviceDescriptions, BackendError> {
            Ok(vec![DeviceDescription::new(
                0x0811_1000,
                "P1",
                DevicePayload::Dcu(DcuReadout::new(77)),
            )])
        }
        fn fetch_fed_descriptions(&mut self, _: &Partition) -> Result<FedDescriptions, BackendError> {
            let mut c = self.counters.borrow_mut();
            c.fed_fetches += 1;
            c.order.push("feds");
            if c.fail_feds {
                return Err(BackendError::FedError("crate offline".to_string()));
            }
            Ok(vec![
                FedDescription {
                    fed_id: 60,
                    ..Default::default()
                },
                FedDescription {
                    fed_id: 50,
                    ..Default::default()
                },
                FedDescription {
                    fed_id: 60,
                    ..Default::default()
                },
            ])
        }
        fn fetch_fed_connections(&mut self, _: &Partition) -> Result<FedConnections, BackendError> {
            let mut c = self.counters.borrow_mut();
            c.order.push("connections");
            if c.fail_links {
                return Err(BackendError::FecError {
                    code: Some(12),
                    message: "ring closed".to_string(),
                });
            }
            Ok(vec![FedConnection::default()])
        }
        fn fetch_pia_resets(&mut self, _: &Partition) -> Result<PiaResetDescriptions, BackendError> {
            self.counters.borrow_mut().order.push("pia");
            Ok(Vec::new())
        }
        fn fetch_dcu_det_id_map(&mut self, _: &Partition) -> Result<DcuDetIdMap, BackendError> {
            let mut c = self.counters.borrow_mut();
            c.order.push("dcumap");
            if c.fail_links {
                return Err(BackendError::SqlError {
                    code: 942,
                    message: "table or view does not exist".to_string(),
                });
            }
            Ok(DcuDetIdMap::new())
        }
        fn store_device_descriptions(&mut self, p: &Partition, _: &[&DeviceDescription], _: bool) -> Result<PartitionVersion, BackendError> {
            Ok(PartitionVersion::new(p.major + 1, 0))
        }
        fn store_dcu_descriptions(&mut self, _: &Partition, _: &[&DeviceDescription]) -> Result<(), BackendError> {
            if self.counters.borrow().fail_dcus {
                return Err(BackendError::FecError {
                    code: None,
                    message: "DCU table locked".to_string(),
                });
            }
            Ok(())
        }
        fn store_fed_descriptions(&mut self, p: &Partition, _: &[FedDescription], _: bool) -> Result<PartitionVersion, BackendError> {
            Ok(p.version())
        }
        fn store_fed_connections(&mut self, _: &Partition, _: &[FedConnection]) -> Result<(), BackendError> {
            Ok(())
        }
        fn store_pia_resets(&mut self, _: &Partition, _: &[DeviceDescription]) -> Result<(), BackendError> {
            Ok(())
        }
        fn store_dcu_det_id_map(&mut self, _: &Partition, _: &DcuDetIdMap) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn open_db() -> (ConfigDb, Rc<RefCell<Counters>>) {
        let counters = Rc::new(RefCell::new(Counters::default()));
        let mut db = ConfigDb::with_backend(Box::new(CountingBackend {
            counters: counters.clone(),
        }));
        db.open_connection().unwrap();
        (db, counters)
    }

    #[test]
    fn test_devices_include_dcus() {
        let (mut db, _) = open_db();
        let devices = db.device_descriptions();
        assert_eq!(devices.len(), 2);
        assert_eq!(db.device_descriptions_of_type(DeviceType::Dcu, false).len(), 1);
        assert_eq!(db.device_descriptions_of_type(DeviceType::Dcu, true).len(), 1);
        assert!(db.device_descriptions_of_type(DeviceType::Apv, false).is_empty());
    }

    #[test]
    fn test_failed_fetch_is_recorded_and_retried() {
        let (mut db, counters) = open_db();
        counters.borrow_mut().fail_feds = true;

        assert!(db.fed_descriptions().is_empty());
        let failure = db.last_failure().unwrap();
        assert_eq!(failure.method, "ConfigDb::fed_descriptions");
        assert_eq!(failure.message.as_deref(), Some("crate offline"));

        counters.borrow_mut().fail_feds = false;
        assert_eq!(db.fed_descriptions().len(), 3);
        assert_eq!(counters.borrow().fed_fetches, 2);
    }

    #[test]
    fn test_failure_domain_per_category() {
        let (mut db, counters) = open_db();
        counters.borrow_mut().fail_links = true;

        assert!(db.fed_connections().is_empty());
        let failure = db.take_last_failure().unwrap();
        assert_eq!(failure.domain, FailureDomain::Fec);
        assert_eq!(failure.class, FailureClass::DomainError);

        assert!(db.dcu_det_id_map().is_empty());
        let failure = db.take_last_failure().unwrap();
        assert_eq!(failure.method, "ConfigDb::dcu_det_id_map");
        assert_eq!(failure.domain, FailureDomain::Sql);
        assert_eq!(failure.class, FailureClass::DomainError);
    }

    #[test]
    fn test_fed_ids_are_distinct_and_sorted() {
        let (mut db, _) = open_db();
        assert_eq!(db.fed_ids(), vec![50, 60]);
    }

    #[test]
    fn test_update_local_caches_order() {
        let (mut db, counters) = open_db();
        db.update_local_caches();
        assert_eq!(
            counters.borrow().order,
            vec!["devices", "feds", "connections", "pia", "dcumap"]
        );
    }

    #[test]
    fn test_set_partition_invalidates() {
        let (mut db, counters) = open_db();
        db.device_descriptions();
        db.set_partition(Partition::new("OTHER", 1, 2));
        db.device_descriptions();
        assert_eq!(counters.borrow().device_fetches, 2);
        assert_eq!(db.partition().name, "OTHER");
    }

    #[test]
    fn test_upload_updates_partition_version() {
        let (mut db, _) = open_db();
        db.device_descriptions();
        db.upload_device_descriptions(true);
        assert_eq!(db.partition().version(), PartitionVersion::new(1, 0));
    }

    #[test]
    fn test_version_kept_when_dcu_store_fails() {
        let (mut db, counters) = open_db();
        counters.borrow_mut().fail_dcus = true;
        db.device_descriptions();
        db.upload_device_descriptions(true);

        assert_eq!(db.partition().version(), PartitionVersion::new(1, 0));
        let failure = db.last_failure().unwrap();
        assert_eq!(failure.method, "ConfigDb::upload_device_descriptions");
        assert_eq!(failure.message.as_deref(), Some("DCU table locked"));
    }

    #[test]
    fn test_replace_marks_fresh() {
        let (mut db, counters) = open_db();
        db.replace_device_descriptions(Vec::new());
        assert!(db.device_descriptions().is_empty());
        assert_eq!(counters.borrow().device_fetches, 0);
    }

    #[test]
    fn test_not_fetched_before_open() {
        let counters = Rc::new(RefCell::new(Counters::default()));
        let mut db = ConfigDb::with_backend(Box::new(CountingBackend {
            counters: counters.clone(),
        }));
        assert!(!db.is_available());
        assert!(db.device_descriptions().is_empty());
        assert_eq!(counters.borrow().device_fetches, 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut db, _) = open_db();
        db.close_connection();
        db.close_connection();
        assert!(!db.is_available());
        assert!(db.open_connection().is_ok());
        assert!(db.is_available());
    }
}
