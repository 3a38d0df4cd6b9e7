//! Backend abstraction over the configuration database and XML files
//!
//! A [`ConfigBackend`] fetches and stores each category of description for a
//! given partition. Two implementations exist: [`database::DatabaseBackend`]
//! and [`file::FileBackend`]. The cache layer talks only to this trait and
//! only sees [`BackendError`], never backend-specific failure types.

pub mod database;
pub mod file;
mod xml;

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::address::AddressError;
use crate::description::{
    DcuDetIdMap, DeviceDescription, DeviceDescriptions, FedConnection, FedConnections,
    FedDescription, FedDescriptions, PiaResetDescriptions,
};
use crate::params::{BackendMode, Partition, PartitionVersion, CONFDB_ENV};

pub use database::{DatabaseBackend, DbClient};
pub use file::{FileBackend, OutputFiles};

/// Failure raised by a backend operation
#[derive(Error, Debug)]
pub enum BackendError {
    /// Hardware-access layer failure, optionally with its numeric error code
    #[error("FEC error{}: {message}", fmt_code(.code))]
    FecError { code: Option<u32>, message: String },
    #[error("FED error: {0}")]
    FedError(String),
    #[error("SQL error {code}: {message}")]
    SqlError { code: i32, message: String },
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("XML error: {0}")]
    XmlError(String),
    #[error("Address error: {0}")]
    AddressError(#[from] AddressError),
    #[error("{0}")]
    Runtime(String),
    #[error("unknown failure")]
    Unknown,
}

fn fmt_code(code: &Option<u32>) -> String {
    code.map(|c| format!(" {}", c)).unwrap_or_default()
}

impl BackendError {
    /// Human-readable message, absent for opaque failures
    pub fn message(&self) -> Option<String> {
        match self {
            Self::Unknown => None,
            Self::FecError { message, .. } | Self::SqlError { message, .. } => {
                Some(message.clone())
            }
            Self::FedError(message) | Self::XmlError(message) | Self::Runtime(message) => {
                Some(message.clone())
            }
            other => Some(other.to_string()),
        }
    }
}

/// Required input file category of the file backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Module,
    DcuInfo,
    Fec,
    Fed,
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Module => "module.xml",
            Self::DcuInfo => "dcuinfo.xml",
            Self::Fec => "fec.xml",
            Self::Fed => "fed.xml",
        };
        f.write_str(name)
    }
}

/// An input file that was not given or could not be opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingInput {
    pub kind: InputKind,
    /// Empty when the path was never given
    pub path: PathBuf,
}

impl fmt::Display for MissingInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.as_os_str().is_empty() {
            write!(f, "{} (no path given)", self.kind)
        } else {
            write!(f, "{} ({})", self.kind, self.path.display())
        }
    }
}

fn fmt_missing(missing: &[MissingInput]) -> String {
    missing
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failure to bring a backend up
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Database credentials incomplete and {} does not provide usable ones", CONFDB_ENV)]
    MissingCredentials,
    /// Some inputs are usable; the backend stays up in degraded mode
    #[error("Missing input files: {}", fmt_missing(.0))]
    MissingInputFile(Vec<MissingInput>),
    #[error("No usable input files: {}", fmt_missing(.0))]
    NoUsableInputs(Vec<MissingInput>),
    #[error("Backend failed to connect: {0}")]
    Backend(#[from] BackendError),
}

impl ConnectError {
    /// Whether the backend can still serve requests after this failure
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::MissingInputFile(_))
    }
}

/// Storage for device, FED, connection, PIA-reset and DCU-map descriptions
pub trait ConfigBackend {
    fn mode(&self) -> BackendMode;

    fn connect(&mut self) -> Result<(), ConnectError>;

    /// Release underlying resources; safe to call repeatedly
    fn disconnect(&mut self) -> Result<(), BackendError>;

    /// All devices except DCUs and PIA resets
    fn fetch_device_descriptions(
        &mut self,
        partition: &Partition,
    ) -> Result<DeviceDescriptions, BackendError>;

    fn fetch_dcu_descriptions(
        &mut self,
        partition: &Partition,
    ) -> Result<DeviceDescriptions, BackendError>;

    fn fetch_fed_descriptions(&mut self, partition: &Partition)
        -> Result<FedDescriptions, BackendError>;

    fn fetch_fed_connections(&mut self, partition: &Partition)
        -> Result<FedConnections, BackendError>;

    fn fetch_pia_resets(&mut self, partition: &Partition)
        -> Result<PiaResetDescriptions, BackendError>;

    fn fetch_dcu_det_id_map(&mut self, partition: &Partition) -> Result<DcuDetIdMap, BackendError>;

    /// Store non-DCU devices, returning the partition version now current
    fn store_device_descriptions(
        &mut self,
        partition: &Partition,
        devices: &[&DeviceDescription],
        new_major_version: bool,
    ) -> Result<PartitionVersion, BackendError>;

    fn store_dcu_descriptions(
        &mut self,
        partition: &Partition,
        dcus: &[&DeviceDescription],
    ) -> Result<(), BackendError>;

    fn store_fed_descriptions(
        &mut self,
        partition: &Partition,
        feds: &[FedDescription],
        new_major_version: bool,
    ) -> Result<PartitionVersion, BackendError>;

    fn store_fed_connections(
        &mut self,
        partition: &Partition,
        connections: &[FedConnection],
    ) -> Result<(), BackendError>;

    fn store_pia_resets(
        &mut self,
        partition: &Partition,
        resets: &[DeviceDescription],
    ) -> Result<(), BackendError>;

    fn store_dcu_det_id_map(
        &mut self,
        partition: &Partition,
        map: &DcuDetIdMap,
    ) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = BackendError::FecError {
            code: Some(42),
            message: "ring timeout".to_string(),
        };
        assert_eq!(err.to_string(), "FEC error 42: ring timeout");
        assert_eq!(err.message().as_deref(), Some("ring timeout"));

        let err = BackendError::FecError {
            code: None,
            message: "no ack".to_string(),
        };
        assert_eq!(err.to_string(), "FEC error: no ack");

        assert_eq!(BackendError::Unknown.message(), None);
    }

    #[test]
    fn test_missing_input_display() {
        let missing = vec![
            MissingInput {
                kind: InputKind::Module,
                path: PathBuf::new(),
            },
            MissingInput {
                kind: InputKind::Fed,
                path: PathBuf::from("/data/fed9.xml"),
            },
        ];
        let err = ConnectError::MissingInputFile(missing);
        assert_eq!(
            err.to_string(),
            "Missing input files: module.xml (no path given), fed.xml (/data/fed9.xml)"
        );
        assert!(err.is_degraded());
        assert!(!ConnectError::NoUsableInputs(Vec::new()).is_degraded());
    }
}
