//! Stripconf Core - hardware configuration access for a silicon-strip tracker
//!
//! This crate provides:
//! - FEC hardware address codec (access keys and control keys)
//! - Device, FED, connection and DCU description types
//! - A backend abstraction over a configuration database and XML files
//! - `ConfigDb`, a lazily-filled local cache in front of the backend
//! - A builder synthesizing default descriptions from a cabling map

pub mod address;
pub mod backend;
pub mod builder;
pub mod cabling;
pub mod cache;
pub mod classify;
pub mod config_db;
pub mod description;
pub mod params;

pub use address::{access_key, AddressError, AddressField, HardwareAddress, UNSET};
pub use backend::{
    BackendError, ConfigBackend, ConnectError, DatabaseBackend, DbClient, FileBackend,
    MissingInput, OutputFiles,
};
pub use builder::{DescriptionBuilder, GeneratedDescriptions};
pub use cabling::FecCabling;
pub use classify::{ClassifiedFailure, FailureClass, FailureDomain};
pub use config_db::{ConfigDb, ConfigDbError};
pub use description::{
    DcuDetIdMap, DeviceDescription, DevicePayload, DeviceSummary, DeviceType, FedConnection,
    FedDescription,
};
pub use params::{
    BackendMode, ConfigDbParams, DbCredentials, ParamsError, Partition, PartitionVersion,
    XmlFileSet,
};
