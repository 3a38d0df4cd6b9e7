//! XML documents read and written by the file backend
//!
//! - `FecDevices`: front-end devices and PIA resets, one element per device
//! - `FedDescriptions`: FED descriptions with free-form parameters
//! - `FedFecConnections`: the module/connection list
//! - `DcuInfo`: DCU hardware id to detector id map

use quick_xml::de::from_str;
use quick_xml::se::to_string;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::BackendError;
use crate::address::{access_key, AddressError};
use crate::description::{
    ApvSettings, DcuDetIdMap, DcuInfo, DcuReadout, DeviceDescription, DeviceDescriptions,
    DevicePayload, FedConnection, FedDescription, LaserDriverSettings, MuxSettings,
    PiaResetSettings, PllSettings,
};

/// Read and parse an XML document
pub(crate) fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T, BackendError> {
    let content = std::fs::read_to_string(path)?;
    from_str(&content).map_err(|e| BackendError::XmlError(format!("{}: {}", path.display(), e)))
}

/// Serialize and write an XML document, replacing the file
pub(crate) fn write_document<T: Serialize>(path: &Path, document: &T) -> Result<(), BackendError> {
    let xml = to_string(document)
        .map_err(|e| BackendError::XmlError(format!("{}: {}", path.display(), e)))?;
    std::fs::write(path, format!("<?xml version='1.0'?>\n{}", xml))?;
    Ok(())
}

fn generated_now() -> Option<String> {
    Some(chrono::Utc::now().to_rfc3339())
}

/// Device element: hardware id, address attributes and device registers
macro_rules! device_element {
    ($(#[$meta:meta])* $name:ident { $($field:ident: $ty:ty => $attr:literal),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            #[serde(rename = "@fecHardwareId", default)]
            pub fec_hardware_id: String,
            #[serde(rename = "@fecSlot")]
            pub fec_slot: u16,
            #[serde(rename = "@ring")]
            pub ring: u16,
            #[serde(rename = "@ccu")]
            pub ccu: u16,
            #[serde(rename = "@channel")]
            pub channel: u16,
            #[serde(rename = "@i2c")]
            pub i2c: u16,
            $(
                #[serde(rename = $attr)]
                pub $field: $ty,
            )*
        }

        impl $name {
            #[allow(clippy::too_many_arguments)]
            fn located(device: &DeviceDescription, $($field: $ty),*) -> Self {
                let addr = device.address();
                Self {
                    fec_hardware_id: device.fec_hardware_id.clone(),
                    fec_slot: addr.fec_slot,
                    ring: addr.fec_ring,
                    ccu: addr.ccu_addr,
                    channel: addr.ccu_chan,
                    i2c: addr.i2c_addr,
                    $($field,)*
                }
            }

            fn key(&self) -> Result<u32, AddressError> {
                access_key(self.fec_slot, self.ring, self.ccu, self.channel, self.i2c)
            }

            fn describe(&self, payload: DevicePayload) -> Result<DeviceDescription, AddressError> {
                Ok(DeviceDescription::new(self.key()?, self.fec_hardware_id.clone(), payload))
            }
        }
    };
}

device_element!(ApvElement {
    apv_mode: u8 => "@apvMode",
    latency: u8 => "@latency",
    mux_gain: u8 => "@muxGain",
    ipre: u8 => "@ipre",
    ipcasc: u8 => "@ipcasc",
    ipsf: u8 => "@ipsf",
    isha: u8 => "@isha",
    issf: u8 => "@issf",
    ipsp: u8 => "@ipsp",
    imuxin: u8 => "@imuxin",
    ical: u8 => "@ical",
    ispare: u8 => "@ispare",
    vfp: u8 => "@vfp",
    vfs: u8 => "@vfs",
    vpsp: u8 => "@vpsp",
    cdrv: u8 => "@cdrv",
    csel: u8 => "@csel",
    apv_error: u8 => "@apvError",
});

device_element!(DcuElement {
    dcu_hard_id: u32 => "@dcuHardId",
    timestamp: u32 => "@timestamp",
    adc0: u16 => "@adc0",
    adc1: u16 => "@adc1",
    adc2: u16 => "@adc2",
    adc3: u16 => "@adc3",
    adc4: u16 => "@adc4",
    adc5: u16 => "@adc5",
    adc6: u16 => "@adc6",
    adc7: u16 => "@adc7",
});

device_element!(PllElement {
    delay_fine: u8 => "@delayFine",
    delay_coarse: u8 => "@delayCoarse",
});

device_element!(LaserDriverElement {
    gain: u8 => "@gain",
    bias0: u8 => "@bias0",
    bias1: u8 => "@bias1",
    bias2: u8 => "@bias2",
});

device_element!(MuxElement {
    resistor: u16 => "@resistor",
});

device_element!(PiaResetElement {
    delay_active_reset: u32 => "@delayActiveReset",
    interval_delay_reset: u32 => "@intervalDelayReset",
    mask: u8 => "@mask",
});

/// Root of a FEC device file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename = "FecDevices")]
pub struct FecDocument {
    #[serde(rename = "@generated", default, skip_serializing_if = "Option::is_none")]
    pub generated: Option<String>,

    #[serde(default)]
    pub apv: Vec<ApvElement>,

    #[serde(default)]
    pub dcu: Vec<DcuElement>,

    #[serde(default)]
    pub pll: Vec<PllElement>,

    #[serde(default)]
    pub laserdriver: Vec<LaserDriverElement>,

    #[serde(default)]
    pub mux: Vec<MuxElement>,

    #[serde(default)]
    pub piareset: Vec<PiaResetElement>,
}

impl FecDocument {
    pub fn new() -> Self {
        Self {
            generated: generated_now(),
            ..Default::default()
        }
    }

    pub fn push(&mut self, device: &DeviceDescription) {
        match &device.payload {
            DevicePayload::Apv(apv) => self.apv.push(ApvElement::located(
                device,
                apv.apv_mode,
                apv.latency,
                apv.mux_gain,
                apv.ipre,
                apv.ipcasc,
                apv.ipsf,
                apv.isha,
                apv.issf,
                apv.ipsp,
                apv.imuxin,
                apv.ical,
                apv.ispare,
                apv.vfp,
                apv.vfs,
                apv.vpsp,
                apv.cdrv,
                apv.csel,
                apv.apv_error,
            )),
            DevicePayload::Dcu(dcu) => {
                let [adc0, adc1, adc2, adc3, adc4, adc5, adc6, adc7] = dcu.channels;
                self.dcu.push(DcuElement::located(
                    device,
                    dcu.dcu_hard_id,
                    dcu.timestamp,
                    adc0,
                    adc1,
                    adc2,
                    adc3,
                    adc4,
                    adc5,
                    adc6,
                    adc7,
                ))
            }
            DevicePayload::Pll(pll) => self.pll.push(PllElement::located(
                device,
                pll.delay_fine,
                pll.delay_coarse,
            )),
            DevicePayload::LaserDriver(laser) => {
                let [bias0, bias1, bias2] = laser.bias;
                self.laserdriver.push(LaserDriverElement::located(
                    device, laser.gain, bias0, bias1, bias2,
                ))
            }
            DevicePayload::Mux(mux) => self.mux.push(MuxElement::located(device, mux.resistor)),
            DevicePayload::PiaReset(pia) => self.piareset.push(PiaResetElement::located(
                device,
                pia.delay_active_reset,
                pia.interval_delay_reset,
                pia.mask,
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.apv.len()
            + self.dcu.len()
            + self.pll.len()
            + self.laserdriver.len()
            + self.mux.len()
            + self.piareset.len()
    }

    /// Devices other than DCUs and PIA resets
    pub fn front_end_devices(&self) -> Result<DeviceDescriptions, AddressError> {
        let mut devices = Vec::with_capacity(self.len());
        for apv in &self.apv {
            devices.push(apv.describe(DevicePayload::Apv(ApvSettings {
                apv_mode: apv.apv_mode,
                latency: apv.latency,
                mux_gain: apv.mux_gain,
                ipre: apv.ipre,
                ipcasc: apv.ipcasc,
                ipsf: apv.ipsf,
                isha: apv.isha,
                issf: apv.issf,
                ipsp: apv.ipsp,
                imuxin: apv.imuxin,
                ical: apv.ical,
                ispare: apv.ispare,
                vfp: apv.vfp,
                vfs: apv.vfs,
                vpsp: apv.vpsp,
                cdrv: apv.cdrv,
                csel: apv.csel,
                apv_error: apv.apv_error,
            }))?);
        }
        for pll in &self.pll {
            devices.push(pll.describe(DevicePayload::Pll(PllSettings {
                delay_fine: pll.delay_fine,
                delay_coarse: pll.delay_coarse,
            }))?);
        }
        for laser in &self.laserdriver {
            devices.push(laser.describe(DevicePayload::LaserDriver(LaserDriverSettings {
                gain: laser.gain,
                bias: [laser.bias0, laser.bias1, laser.bias2],
            }))?);
        }
        for mux in &self.mux {
            devices.push(mux.describe(DevicePayload::Mux(MuxSettings {
                resistor: mux.resistor,
            }))?);
        }
        Ok(devices)
    }

    pub fn dcus(&self) -> Result<DeviceDescriptions, AddressError> {
        self.dcu
            .iter()
            .map(|dcu| {
                dcu.describe(DevicePayload::Dcu(DcuReadout {
                    timestamp: dcu.timestamp,
                    dcu_hard_id: dcu.dcu_hard_id,
                    channels: [
                        dcu.adc0, dcu.adc1, dcu.adc2, dcu.adc3, dcu.adc4, dcu.adc5, dcu.adc6,
                        dcu.adc7,
                    ],
                }))
            })
            .collect()
    }

    pub fn pia_resets(&self) -> Result<DeviceDescriptions, AddressError> {
        self.piareset
            .iter()
            .map(|pia| {
                pia.describe(DevicePayload::PiaReset(PiaResetSettings {
                    delay_active_reset: pia.delay_active_reset,
                    interval_delay_reset: pia.interval_delay_reset,
                    mask: pia.mask,
                }))
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamElement {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@value", default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FedElement {
    #[serde(rename = "@id")]
    pub id: u16,
    #[serde(rename = "@crate", default)]
    pub crate_number: u16,
    #[serde(rename = "@slot", default)]
    pub slot: u16,
    #[serde(default)]
    pub param: Vec<ParamElement>,
}

impl From<&FedDescription> for FedElement {
    fn from(fed: &FedDescription) -> Self {
        Self {
            id: fed.fed_id,
            crate_number: fed.crate_number,
            slot: fed.slot,
            param: fed
                .parameters
                .iter()
                .map(|(name, value)| ParamElement {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect(),
        }
    }
}

impl From<&FedElement> for FedDescription {
    fn from(element: &FedElement) -> Self {
        Self {
            fed_id: element.id,
            crate_number: element.crate_number,
            slot: element.slot,
            parameters: element
                .param
                .iter()
                .map(|p| (p.name.clone(), p.value.clone()))
                .collect(),
        }
    }
}

/// Root of a FED description file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename = "FedDescriptions")]
pub struct FedDocument {
    #[serde(rename = "@generated", default, skip_serializing_if = "Option::is_none")]
    pub generated: Option<String>,

    #[serde(default)]
    pub fed: Vec<FedElement>,
}

impl FedDocument {
    pub fn new() -> Self {
        Self {
            generated: generated_now(),
            fed: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionElement {
    #[serde(rename = "@fecCrate")]
    pub fec_crate: u16,
    #[serde(rename = "@fecSlot")]
    pub fec_slot: u16,
    #[serde(rename = "@fecRing")]
    pub fec_ring: u16,
    #[serde(rename = "@ccuAddr")]
    pub ccu_addr: u16,
    #[serde(rename = "@ccuChan")]
    pub ccu_chan: u16,
    #[serde(rename = "@apv0", default)]
    pub apv0: u16,
    #[serde(rename = "@apv1", default)]
    pub apv1: u16,
    #[serde(rename = "@dcuId", default)]
    pub dcu_id: u32,
    #[serde(rename = "@detId", default)]
    pub det_id: u32,
    #[serde(rename = "@fedId", default)]
    pub fed_id: u16,
    #[serde(rename = "@fedCh", default)]
    pub fed_ch: u16,
    #[serde(rename = "@fibreLength", default)]
    pub fibre_length: u16,
    #[serde(rename = "@nApvPairs", default)]
    pub n_apv_pairs: u16,
}

impl From<&FedConnection> for ConnectionElement {
    fn from(c: &FedConnection) -> Self {
        Self {
            fec_crate: c.fec_crate,
            fec_slot: c.fec_slot,
            fec_ring: c.fec_ring,
            ccu_addr: c.ccu_addr,
            ccu_chan: c.ccu_chan,
            apv0: c.apv0,
            apv1: c.apv1,
            dcu_id: c.dcu_id,
            det_id: c.det_id,
            fed_id: c.fed_id,
            fed_ch: c.fed_ch,
            fibre_length: c.fibre_length,
            n_apv_pairs: c.n_apv_pairs,
        }
    }
}

impl From<&ConnectionElement> for FedConnection {
    fn from(c: &ConnectionElement) -> Self {
        Self {
            fec_crate: c.fec_crate,
            fec_slot: c.fec_slot,
            fec_ring: c.fec_ring,
            ccu_addr: c.ccu_addr,
            ccu_chan: c.ccu_chan,
            apv0: c.apv0,
            apv1: c.apv1,
            dcu_id: c.dcu_id,
            det_id: c.det_id,
            fed_id: c.fed_id,
            fed_ch: c.fed_ch,
            fibre_length: c.fibre_length,
            n_apv_pairs: c.n_apv_pairs,
        }
    }
}

/// Root of the module (connection) file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename = "FedFecConnections")]
pub struct ModuleDocument {
    #[serde(rename = "@generated", default, skip_serializing_if = "Option::is_none")]
    pub generated: Option<String>,

    #[serde(default)]
    pub connection: Vec<ConnectionElement>,
}

impl ModuleDocument {
    pub fn new(connections: &[FedConnection]) -> Self {
        Self {
            generated: generated_now(),
            connection: connections.iter().map(ConnectionElement::from).collect(),
        }
    }

    pub fn connections(&self) -> Vec<FedConnection> {
        self.connection.iter().map(FedConnection::from).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcuInfoElement {
    #[serde(rename = "@dcuHardId")]
    pub dcu_hard_id: u32,
    #[serde(rename = "@detId")]
    pub det_id: u32,
    #[serde(rename = "@fibreLength", default)]
    pub fibre_length: f32,
    #[serde(rename = "@apvNumber", default)]
    pub apv_number: u32,
}

/// Root of the DCU info file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename = "DcuInfo")]
pub struct DcuInfoDocument {
    #[serde(rename = "@generated", default, skip_serializing_if = "Option::is_none")]
    pub generated: Option<String>,

    #[serde(default)]
    pub dcu: Vec<DcuInfoElement>,
}

impl DcuInfoDocument {
    pub fn new(map: &DcuDetIdMap) -> Self {
        Self {
            generated: generated_now(),
            dcu: map
                .iter()
                .map(|(dcu_hard_id, info)| DcuInfoElement {
                    dcu_hard_id: *dcu_hard_id,
                    det_id: info.det_id,
                    fibre_length: info.fibre_length,
                    apv_number: u32::from(info.apv_pairs) * 2,
                })
                .collect(),
        }
    }

    /// Later entries for the same DCU replace earlier ones
    pub fn det_id_map(&self) -> Result<DcuDetIdMap, BackendError> {
        self.dcu
            .iter()
            .map(|e| {
                let apv_pairs = u16::try_from(e.apv_number / 2).map_err(|_| {
                    BackendError::XmlError(format!(
                        "DCU {:#x}: apvNumber {} out of range",
                        e.dcu_hard_id, e.apv_number
                    ))
                })?;
                Ok((
                    e.dcu_hard_id,
                    DcuInfo {
                        det_id: e.det_id,
                        fibre_length: e.fibre_length,
                        apv_pairs,
                    },
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEC_XML: &str = r#"<?xml version='1.0'?>
<FecDevices generated="2007-01-27T10:00:00Z">
  <apv fecHardwareId="TI_3" fecSlot="3" ring="1" ccu="1" channel="17" i2c="32"
       apvMode="43" latency="100" muxGain="4" ipre="115" ipcasc="60" ipsf="50" isha="50"
       issf="50" ipsp="80" imuxin="50" ical="80" ispare="0" vfp="67" vfs="67" vpsp="20"
       cdrv="251" csel="254" apvError="0"/>
  <dcu fecHardwareId="TI_3" fecSlot="3" ring="1" ccu="1" channel="17" i2c="0"
       dcuHardId="4660" timestamp="0" adc0="0" adc1="0" adc2="0" adc3="0" adc4="0"
       adc5="0" adc6="0" adc7="0"/>
  <mux fecHardwareId="TI_3" fecSlot="3" ring="1" ccu="1" channel="17" i2c="67" resistor="255"/>
  <piareset fecHardwareId="TI_3" fecSlot="3" ring="1" ccu="1" channel="48" i2c="0"
       delayActiveReset="10" intervalDelayReset="10000" mask="255"/>
</FecDevices>
"#;

    #[test]
    fn test_parse_fec_document() {
        let doc: FecDocument = from_str(FEC_XML).unwrap();
        assert_eq!(doc.len(), 4);

        let devices = doc.front_end_devices().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].key, access_key(3, 1, 1, 17, 32).unwrap());
        assert_eq!(devices[0].fec_hardware_id, "TI_3");
        assert!(matches!(&devices[0].payload, DevicePayload::Apv(apv) if apv.latency == 100));

        let dcus = doc.dcus().unwrap();
        assert_eq!(dcus[0].dcu_hard_id(), Some(4660));

        let resets = doc.pia_resets().unwrap();
        assert_eq!(resets[0].address().ccu_chan, 48);
    }

    #[test]
    fn test_out_of_range_address_is_rejected() {
        let xml = r#"<FecDevices>
  <mux fecHardwareId="x" fecSlot="40" ring="1" ccu="1" channel="17" i2c="67" resistor="255"/>
</FecDevices>"#;
        let doc: FecDocument = from_str(xml).unwrap();
        assert!(doc.front_end_devices().is_err());
    }

    #[test]
    fn test_fed_document() {
        let xml = r#"<FedDescriptions>
  <fed id="50" crate="1" slot="5">
    <param name="clockSource" value="TTC"/>
    <param name="mode" value="ZERO_SUPPRESSED"/>
  </fed>
  <fed id="51"/>
</FedDescriptions>"#;
        let doc: FedDocument = from_str(xml).unwrap();
        assert_eq!(doc.fed.len(), 2);
        let fed = FedDescription::from(&doc.fed[0]);
        assert_eq!(fed.fed_id, 50);
        assert_eq!(fed.parameters.get("mode").map(String::as_str), Some("ZERO_SUPPRESSED"));
        assert!(doc.fed[1].param.is_empty());
    }

    #[test]
    fn test_dcu_info_duplicate_ids() {
        let xml = r#"<DcuInfo>
  <dcu dcuHardId="7" detId="100" fibreLength="12.5" apvNumber="4"/>
  <dcu dcuHardId="7" detId="200" fibreLength="3" apvNumber="6"/>
</DcuInfo>"#;
        let doc: DcuInfoDocument = from_str(xml).unwrap();
        let map = doc.det_id_map().unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map[&7].det_id, 200);
        assert_eq!(map[&7].apv_pairs, 3);
    }

    #[test]
    fn test_dcu_info_large_apv_counts() {
        let map = DcuDetIdMap::from([(
            1,
            DcuInfo {
                det_id: 10,
                fibre_length: 1.0,
                apv_pairs: 40_000,
            },
        )]);
        let doc = DcuInfoDocument::new(&map);
        assert_eq!(doc.dcu[0].apv_number, 80_000);
        assert_eq!(doc.det_id_map().unwrap(), map);

        let xml = r#"<DcuInfo><dcu dcuHardId="2" detId="1" apvNumber="200000"/></DcuInfo>"#;
        let doc: DcuInfoDocument = from_str(xml).unwrap();
        assert!(matches!(doc.det_id_map(), Err(BackendError::XmlError(_))));
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("module.xml");
        let connections = vec![FedConnection {
            fec_crate: 1,
            fec_slot: 3,
            fec_ring: 1,
            ccu_addr: 2,
            ccu_chan: 0x11,
            apv0: 32,
            apv1: 33,
            dcu_id: 99,
            det_id: 1234,
            fed_id: 50,
            fed_ch: 7,
            fibre_length: 10,
            n_apv_pairs: 2,
        }];
        write_document(&path, &ModuleDocument::new(&connections)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("<?xml version='1.0'?>"));

        let doc: ModuleDocument = read_document(&path).unwrap();
        assert_eq!(doc.connections(), connections);
        assert!(doc.generated.is_some());
    }
}
