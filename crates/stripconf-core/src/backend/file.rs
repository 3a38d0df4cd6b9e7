//! XML file backend
//!
//! Reads descriptions from a fixed set of input files and writes uploads to a
//! set of output files. Inputs are required; outputs fall back to defaults in
//! [`DEFAULT_OUTPUT_DIR`] when blank or unwritable.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::xml::{
    read_document, write_document, DcuInfoDocument, FecDocument, FedDocument, FedElement,
    ModuleDocument,
};
use super::{BackendError, ConfigBackend, ConnectError, InputKind, MissingInput};
use crate::description::{
    DcuDetIdMap, DeviceDescription, DeviceDescriptions, FedConnection, FedConnections,
    FedDescription, FedDescriptions, PiaResetDescriptions,
};
use crate::params::{BackendMode, Partition, PartitionVersion, XmlFileSet};

pub const DEFAULT_OUTPUT_DIR: &str = "/tmp";

/// Resolved output destinations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFiles {
    pub module: PathBuf,
    pub dcuinfo: PathBuf,
    pub fec: Vec<PathBuf>,
    pub fed: Vec<PathBuf>,
}

impl OutputFiles {
    /// Apply the defaulting rules to configured output paths
    ///
    /// A blank path, or one whose directory does not exist, becomes
    /// `<DEFAULT_OUTPUT_DIR>/<name>.xml`. In a list with more than one entry
    /// the default for entry `i` is `<name><i>.xml`.
    pub fn resolve(files: &XmlFileSet) -> Self {
        Self {
            module: resolve_path(&files.output_module, "module"),
            dcuinfo: resolve_path(&files.output_dcuinfo, "dcuinfo"),
            fec: resolve_list(&files.output_fec, "fec"),
            fed: resolve_list(&files.output_fed, "fed"),
        }
    }
}

fn default_output(stem: &str) -> PathBuf {
    Path::new(DEFAULT_OUTPUT_DIR).join(format!("{}.xml", stem))
}

fn is_writable_location(path: &Path) -> bool {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.is_dir(),
        _ => true,
    }
}

fn resolve_path(path: &Path, stem: &str) -> PathBuf {
    if path.as_os_str().is_empty() {
        let fallback = default_output(stem);
        debug!(path = %fallback.display(), "No output file given; using default");
        fallback
    } else if !is_writable_location(path) {
        let fallback = default_output(stem);
        warn!(
            requested = %path.display(),
            path = %fallback.display(),
            "Output directory does not exist; using default"
        );
        fallback
    } else {
        path.to_path_buf()
    }
}

fn resolve_list(paths: &[PathBuf], stem: &str) -> Vec<PathBuf> {
    match paths {
        [] => vec![default_output(stem)],
        [single] => vec![resolve_path(single, stem)],
        many => many
            .iter()
            .enumerate()
            .map(|(i, path)| resolve_path(path, &format!("{}{}", stem, i)))
            .collect(),
    }
}

fn is_readable(path: &Path) -> bool {
    !path.as_os_str().is_empty() && File::open(path).is_ok()
}

/// Input files that passed validation
#[derive(Debug, Clone, Default)]
struct ActiveInputs {
    module: Option<PathBuf>,
    dcuinfo: Option<PathBuf>,
    fec: Vec<PathBuf>,
    fed: Vec<PathBuf>,
}

impl ActiveInputs {
    fn is_empty(&self) -> bool {
        self.module.is_none() && self.dcuinfo.is_none() && self.fec.is_empty() && self.fed.is_empty()
    }

    /// Validate every configured input, collecting the unusable ones
    fn validate(files: &XmlFileSet) -> (Self, Vec<MissingInput>) {
        let mut active = Self::default();
        let mut missing = Vec::new();

        let mut check = |kind: InputKind, path: &Path| -> bool {
            if is_readable(path) {
                info!(kind = %kind, path = %path.display(), "Added input file");
                true
            } else {
                warn!(kind = %kind, path = %path.display(), "Input file missing or unreadable");
                missing.push(MissingInput {
                    kind,
                    path: path.to_path_buf(),
                });
                false
            }
        };

        if check(InputKind::Module, &files.input_module) {
            active.module = Some(files.input_module.clone());
        }
        if check(InputKind::DcuInfo, &files.input_dcuinfo) {
            active.dcuinfo = Some(files.input_dcuinfo.clone());
        }
        if files.input_fec.is_empty() {
            check(InputKind::Fec, Path::new(""));
        }
        for path in &files.input_fec {
            if check(InputKind::Fec, path) {
                active.fec.push(path.clone());
            }
        }
        if files.input_fed.is_empty() {
            check(InputKind::Fed, Path::new(""));
        }
        for path in &files.input_fed {
            if check(InputKind::Fed, path) {
                active.fed.push(path.clone());
            }
        }

        (active, missing)
    }
}

/// Devices staged for the FEC output files
#[derive(Debug, Clone, Default)]
struct StagedDevices {
    devices: Vec<DeviceDescription>,
    dcus: Vec<DeviceDescription>,
    pia_resets: Vec<DeviceDescription>,
}

pub struct FileBackend {
    files: XmlFileSet,
    inputs: ActiveInputs,
    outputs: OutputFiles,
    staged: StagedDevices,
    connected: bool,
}

impl FileBackend {
    pub fn new(files: XmlFileSet) -> Self {
        let outputs = OutputFiles::resolve(&files);
        Self {
            files,
            inputs: ActiveInputs::default(),
            outputs,
            staged: StagedDevices::default(),
            connected: false,
        }
    }

    pub fn outputs(&self) -> &OutputFiles {
        &self.outputs
    }

    fn ensure_connected(&self) -> Result<(), BackendError> {
        if self.connected {
            Ok(())
        } else {
            Err(BackendError::Runtime("file backend is not connected".to_string()))
        }
    }

    fn read_fec_documents(&self) -> Result<Vec<FecDocument>, BackendError> {
        self.inputs.fec.iter().map(|path| read_document(path)).collect()
    }

    /// Rewrite every FEC output file from the staged devices
    ///
    /// Devices are grouped per FEC hardware id; group `k` goes to output
    /// file `k mod N`.
    fn write_fec_outputs(&self) -> Result<(), BackendError> {
        let mut groups: BTreeMap<&str, Vec<&DeviceDescription>> = BTreeMap::new();
        let staged = &self.staged;
        for device in staged.devices.iter().chain(&staged.dcus).chain(&staged.pia_resets) {
            groups
                .entry(device.fec_hardware_id.as_str())
                .or_default()
                .push(device);
        }

        let mut documents: Vec<FecDocument> =
            self.outputs.fec.iter().map(|_| FecDocument::new()).collect();
        let count = documents.len();
        for (k, (_, devices)) in groups.into_iter().enumerate() {
            let document = &mut documents[k % count];
            for device in devices {
                document.push(device);
            }
        }

        for (path, document) in self.outputs.fec.iter().zip(&documents) {
            write_document(path, document)?;
            info!(path = %path.display(), devices = document.len(), "Wrote FEC output file");
        }
        Ok(())
    }
}

impl ConfigBackend for FileBackend {
    fn mode(&self) -> BackendMode {
        BackendMode::UsingFiles
    }

    fn connect(&mut self) -> Result<(), ConnectError> {
        let (inputs, missing) = ActiveInputs::validate(&self.files);
        self.outputs = OutputFiles::resolve(&self.files);

        if inputs.is_empty() {
            self.connected = false;
            return Err(ConnectError::NoUsableInputs(missing));
        }

        self.inputs = inputs;
        self.connected = true;
        info!(
            fec = self.inputs.fec.len(),
            fed = self.inputs.fed.len(),
            "File backend ready"
        );

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConnectError::MissingInputFile(missing))
        }
    }

    fn disconnect(&mut self) -> Result<(), BackendError> {
        if self.connected {
            debug!("File backend released");
        }
        self.connected = false;
        self.inputs = ActiveInputs::default();
        Ok(())
    }

    fn fetch_device_descriptions(
        &mut self,
        _partition: &Partition,
    ) -> Result<DeviceDescriptions, BackendError> {
        self.ensure_connected()?;
        let mut devices = Vec::new();
        for document in self.read_fec_documents()? {
            devices.extend(document.front_end_devices()?);
        }
        Ok(devices)
    }

    fn fetch_dcu_descriptions(
        &mut self,
        _partition: &Partition,
    ) -> Result<DeviceDescriptions, BackendError> {
        self.ensure_connected()?;
        let mut dcus = Vec::new();
        for document in self.read_fec_documents()? {
            dcus.extend(document.dcus()?);
        }
        Ok(dcus)
    }

    fn fetch_fed_descriptions(
        &mut self,
        _partition: &Partition,
    ) -> Result<FedDescriptions, BackendError> {
        self.ensure_connected()?;
        let mut feds = Vec::new();
        for path in &self.inputs.fed {
            let document: FedDocument = read_document(path)?;
            feds.extend(document.fed.iter().map(FedDescription::from));
        }
        Ok(feds)
    }

    fn fetch_fed_connections(
        &mut self,
        _partition: &Partition,
    ) -> Result<FedConnections, BackendError> {
        self.ensure_connected()?;
        match &self.inputs.module {
            Some(path) => {
                let document: ModuleDocument = read_document(path)?;
                Ok(document.connections())
            }
            None => Ok(Vec::new()),
        }
    }

    fn fetch_pia_resets(
        &mut self,
        _partition: &Partition,
    ) -> Result<PiaResetDescriptions, BackendError> {
        self.ensure_connected()?;
        let mut resets = Vec::new();
        for document in self.read_fec_documents()? {
            resets.extend(document.pia_resets()?);
        }
        Ok(resets)
    }

    fn fetch_dcu_det_id_map(&mut self, _partition: &Partition) -> Result<DcuDetIdMap, BackendError> {
        self.ensure_connected()?;
        match &self.inputs.dcuinfo {
            Some(path) => {
                let document: DcuInfoDocument = read_document(path)?;
                document.det_id_map()
            }
            None => Ok(DcuDetIdMap::new()),
        }
    }

    fn store_device_descriptions(
        &mut self,
        partition: &Partition,
        devices: &[&DeviceDescription],
        _new_major_version: bool,
    ) -> Result<PartitionVersion, BackendError> {
        self.ensure_connected()?;
        self.staged.devices = devices.iter().map(|d| (*d).clone()).collect();
        self.write_fec_outputs()?;
        Ok(partition.version())
    }

    fn store_dcu_descriptions(
        &mut self,
        _partition: &Partition,
        dcus: &[&DeviceDescription],
    ) -> Result<(), BackendError> {
        self.ensure_connected()?;
        self.staged.dcus = dcus.iter().map(|d| (*d).clone()).collect();
        self.write_fec_outputs()
    }

    fn store_fed_descriptions(
        &mut self,
        partition: &Partition,
        feds: &[FedDescription],
        _new_major_version: bool,
    ) -> Result<PartitionVersion, BackendError> {
        self.ensure_connected()?;
        let mut groups: BTreeMap<u16, Vec<FedElement>> = BTreeMap::new();
        for fed in feds {
            groups.entry(fed.fed_id).or_default().push(FedElement::from(fed));
        }

        let mut documents: Vec<FedDocument> =
            self.outputs.fed.iter().map(|_| FedDocument::new()).collect();
        let count = documents.len();
        for (k, (_, elements)) in groups.into_iter().enumerate() {
            documents[k % count].fed.extend(elements);
        }

        for (path, document) in self.outputs.fed.iter().zip(&documents) {
            write_document(path, document)?;
            info!(path = %path.display(), feds = document.fed.len(), "Wrote FED output file");
        }
        Ok(partition.version())
    }

    fn store_fed_connections(
        &mut self,
        _partition: &Partition,
        connections: &[FedConnection],
    ) -> Result<(), BackendError> {
        self.ensure_connected()?;
        write_document(&self.outputs.module, &ModuleDocument::new(connections))?;
        info!(
            path = %self.outputs.module.display(),
            connections = connections.len(),
            "Wrote module output file"
        );
        Ok(())
    }

    fn store_pia_resets(
        &mut self,
        _partition: &Partition,
        resets: &[DeviceDescription],
    ) -> Result<(), BackendError> {
        self.ensure_connected()?;
        self.staged.pia_resets = resets.to_vec();
        self.write_fec_outputs()
    }

    fn store_dcu_det_id_map(
        &mut self,
        _partition: &Partition,
        map: &DcuDetIdMap,
    ) -> Result<(), BackendError> {
        self.ensure_connected()?;
        write_document(&self.outputs.dcuinfo, &DcuInfoDocument::new(map))?;
        info!(
            path = %self.outputs.dcuinfo.display(),
            entries = map.len(),
            "Wrote DCU info output file"
        );
        Ok(())
    }
}
