//! Connection parameters and partition scope
//!
//! All types deserialize from the TOML configuration read by the command-line
//! front end; [`ConfigDbParams::mode`] validates the backend selection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Environment variable holding fallback database credentials as `user/password@path`
pub const CONFDB_ENV: &str = "CONFDB";

#[derive(Error, Debug)]
pub enum ParamsError {
    #[error("Both [database] and [files] sections are present; exactly one backend may be configured")]
    AmbiguousMode,
}

/// Which concrete backend services requests; fixed for the lifetime of a `ConfigDb`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    UsingDatabase,
    UsingFiles,
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UsingDatabase => f.write_str("database"),
            Self::UsingFiles => f.write_str("xml files"),
        }
    }
}

/// Major/minor version of a partition; (0, 0) means "latest"
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionVersion {
    pub major: u32,
    pub minor: u32,
}

impl PartitionVersion {
    pub const LATEST: PartitionVersion = PartitionVersion { major: 0, minor: 0 };

    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn is_latest(&self) -> bool {
        *self == Self::LATEST
    }
}

impl fmt::Display for PartitionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_latest() {
            f.write_str("latest")
        } else {
            write!(f, "{}.{}", self.major, self.minor)
        }
    }
}

/// Named, versioned configuration scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub name: String,
    #[serde(default)]
    pub major: u32,
    #[serde(default)]
    pub minor: u32,
}

impl Partition {
    pub fn new(name: impl Into<String>, major: u32, minor: u32) -> Self {
        Self {
            name: name.into(),
            major,
            minor,
        }
    }

    pub fn version(&self) -> PartitionVersion {
        PartitionVersion::new(self.major, self.minor)
    }

    pub fn set_version(&mut self, version: PartitionVersion) {
        self.major = version.major;
        self.minor = version.minor;
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.version())
    }
}

/// Database login triple
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbCredentials {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub path: String,
}

impl fmt::Debug for DbCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbCredentials")
            .field("user", &self.user)
            .field("password", &"********")
            .field("path", &self.path)
            .finish()
    }
}

impl DbCredentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            path: path.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.user.is_empty() && !self.password.is_empty() && !self.path.is_empty()
    }

    /// Parse the `user/password@path` form used by [`CONFDB_ENV`]
    pub fn from_env_value(value: &str) -> Option<Self> {
        let (login, path) = value.trim().rsplit_once('@')?;
        let (user, password) = login.split_once('/')?;
        let credentials = Self::new(user, password, path);
        credentials.is_complete().then_some(credentials)
    }

    /// Explicit credentials if complete, else the fallback value if it parses
    pub fn resolve_with(&self, fallback: impl FnOnce() -> Option<String>) -> Option<Self> {
        if self.is_complete() {
            return Some(self.clone());
        }
        fallback().and_then(|value| Self::from_env_value(&value))
    }

    /// `user@path`, safe to log
    pub fn login_target(&self) -> String {
        format!("{}@{}", self.user, self.path)
    }
}

/// Input and output XML files of the file backend
///
/// Empty paths mean "not given". Inputs are required, outputs fall back to
/// defaults in the temporary directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XmlFileSet {
    #[serde(default)]
    pub input_module: PathBuf,
    #[serde(default)]
    pub input_dcuinfo: PathBuf,
    #[serde(default)]
    pub input_fec: Vec<PathBuf>,
    #[serde(default)]
    pub input_fed: Vec<PathBuf>,
    #[serde(default)]
    pub output_module: PathBuf,
    #[serde(default)]
    pub output_dcuinfo: PathBuf,
    #[serde(default)]
    pub output_fec: Vec<PathBuf>,
    #[serde(default)]
    pub output_fed: Vec<PathBuf>,
}

/// Everything needed to construct a `ConfigDb`, as read from TOML
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDbParams {
    #[serde(default)]
    pub partition: Partition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DbCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<XmlFileSet>,
}

impl ConfigDbParams {
    /// Backend selected by these parameters. Without either section the
    /// database is used and credentials come from the environment.
    pub fn mode(&self) -> Result<BackendMode, ParamsError> {
        match (&self.database, &self.files) {
            (Some(_), Some(_)) => Err(ParamsError::AmbiguousMode),
            (None, Some(_)) => Ok(BackendMode::UsingFiles),
            _ => Ok(BackendMode::UsingDatabase),
        }
    }
}
