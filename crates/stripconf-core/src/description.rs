//! Hardware description types exchanged with the configuration backends

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::address::HardwareAddress;

/// Device-type tag carried by every device description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Apv,
    Dcu,
    Pll,
    LaserDriver,
    Mux,
    PiaReset,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apv => "APV25",
            Self::Dcu => "DCU",
            Self::Pll => "PLL",
            Self::LaserDriver => "LASERDRIVER",
            Self::Mux => "APVMUX",
            Self::PiaReset => "PIARESET",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// APV25 front-end amplifier registers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApvSettings {
    pub apv_mode: u8,
    pub latency: u8,
    pub mux_gain: u8,
    pub ipre: u8,
    pub ipcasc: u8,
    pub ipsf: u8,
    pub isha: u8,
    pub issf: u8,
    pub ipsp: u8,
    pub imuxin: u8,
    pub ical: u8,
    pub ispare: u8,
    pub vfp: u8,
    pub vfs: u8,
    pub vpsp: u8,
    pub cdrv: u8,
    pub csel: u8,
    pub apv_error: u8,
}

impl Default for ApvSettings {
    fn default() -> Self {
        Self {
            apv_mode: 0x2B,
            latency: 0x64,
            mux_gain: 0x04,
            ipre: 0x73,
            ipcasc: 0x3C,
            ipsf: 0x32,
            isha: 0x32,
            issf: 0x32,
            ipsp: 0x50,
            imuxin: 0x32,
            ical: 0x50,
            ispare: 0,
            vfp: 0x43,
            vfs: 0x43,
            vpsp: 0x14,
            cdrv: 0xFB,
            csel: 0xFE,
            apv_error: 0,
        }
    }
}

/// DCU readout; the hardware id identifies the chip tracker-wide
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DcuReadout {
    pub timestamp: u32,
    pub dcu_hard_id: u32,
    pub channels: [u16; 8],
}

impl DcuReadout {
    pub fn new(dcu_hard_id: u32) -> Self {
        Self {
            timestamp: 0,
            dcu_hard_id,
            channels: [0; 8],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PllSettings {
    pub delay_fine: u8,
    pub delay_coarse: u8,
}

impl Default for PllSettings {
    fn default() -> Self {
        Self {
            delay_fine: 6,
            delay_coarse: 1,
        }
    }
}

/// Laser driver (analogue or digital opto-hybrid)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaserDriverSettings {
    pub gain: u8,
    pub bias: [u8; 3],
}

impl LaserDriverSettings {
    /// Digital opto-hybrid defaults
    pub fn doh() -> Self {
        Self {
            gain: 2,
            bias: [24, 24, 24],
        }
    }

    /// Analogue opto-hybrid defaults
    pub fn aoh() -> Self {
        Self {
            gain: 2,
            bias: [23, 23, 23],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxSettings {
    pub resistor: u16,
}

impl Default for MuxSettings {
    fn default() -> Self {
        Self { resistor: 0xFF }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiaResetSettings {
    pub delay_active_reset: u32,
    pub interval_delay_reset: u32,
    pub mask: u8,
}

impl Default for PiaResetSettings {
    fn default() -> Self {
        Self {
            delay_active_reset: 10,
            interval_delay_reset: 10_000,
            mask: 0xFF,
        }
    }
}

/// Variant-specific part of a device description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DevicePayload {
    Apv(ApvSettings),
    Dcu(DcuReadout),
    Pll(PllSettings),
    LaserDriver(LaserDriverSettings),
    Mux(MuxSettings),
    PiaReset(PiaResetSettings),
}

impl DevicePayload {
    pub fn device_type(&self) -> DeviceType {
        match self {
            Self::Apv(_) => DeviceType::Apv,
            Self::Dcu(_) => DeviceType::Dcu,
            Self::Pll(_) => DeviceType::Pll,
            Self::LaserDriver(_) => DeviceType::LaserDriver,
            Self::Mux(_) => DeviceType::Mux,
            Self::PiaReset(_) => DeviceType::PiaReset,
        }
    }
}

/// A front-end device as stored in the configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescription {
    /// FEC access key (see [`crate::address`])
    pub key: u32,
    /// Identifier of the FEC hosting the device
    pub fec_hardware_id: String,
    pub payload: DevicePayload,
}

impl DeviceDescription {
    pub fn new(key: u32, fec_hardware_id: impl Into<String>, payload: DevicePayload) -> Self {
        Self {
            key,
            fec_hardware_id: fec_hardware_id.into(),
            payload,
        }
    }

    pub fn device_type(&self) -> DeviceType {
        self.payload.device_type()
    }

    pub fn is_dcu(&self) -> bool {
        self.device_type() == DeviceType::Dcu
    }

    pub fn address(&self) -> HardwareAddress {
        HardwareAddress::from_key(self.key)
    }

    /// DCU hardware id, if this is a DCU
    pub fn dcu_hard_id(&self) -> Option<u32> {
        match &self.payload {
            DevicePayload::Dcu(dcu) => Some(dcu.dcu_hard_id),
            _ => None,
        }
    }
}

pub type DeviceDescriptions = Vec<DeviceDescription>;
pub type PiaResetDescriptions = Vec<DeviceDescription>;

/// Front-end driver description; the payload is passed through untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FedDescription {
    pub fed_id: u16,
    pub crate_number: u16,
    pub slot: u16,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

pub type FedDescriptions = Vec<FedDescription>;

/// One FED channel and the front-end module feeding it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FedConnection {
    pub fec_crate: u16,
    pub fec_slot: u16,
    pub fec_ring: u16,
    pub ccu_addr: u16,
    pub ccu_chan: u16,
    /// I2C addresses of the APV pair read out on this channel
    pub apv0: u16,
    pub apv1: u16,
    pub dcu_id: u32,
    pub det_id: u32,
    pub fed_id: u16,
    pub fed_ch: u16,
    pub fibre_length: u16,
    pub n_apv_pairs: u16,
}

pub type FedConnections = Vec<FedConnection>;

/// Detector information attached to a DCU
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DcuInfo {
    pub det_id: u32,
    pub fibre_length: f32,
    pub apv_pairs: u16,
}

/// DCU hardware id -> detector info
pub type DcuDetIdMap = BTreeMap<u32, DcuInfo>;

/// DCU family, selects the conversion model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DcuType {
    /// DCU on a CCU or at ring level
    Dcuccu,
}

/// ADC/temperature conversion constants of one DCU
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcuConversionFactors {
    pub dcu_hard_id: u32,
    pub det_id: u32,
    pub sub_detector: String,
    pub dcu_type: DcuType,
    pub adc_gain0: f64,
    pub adc_offset0: f64,
    pub adc_cal0: bool,
    pub adc_inl0: f64,
    pub adc_inl0_ow: bool,
    pub i20: f64,
    pub i10: f64,
    pub i_cal: bool,
    pub k_div: f64,
    pub k_div_cal: bool,
    pub ts_gain: f64,
    pub ts_offset: f64,
    pub ts_cal: bool,
    pub r68: f64,
    pub r68_cal: bool,
    pub adc_gain2: f64,
    pub adc_offset2: f64,
    pub adc_cal2: bool,
    pub adc_gain3: f64,
    pub adc_cal3: bool,
}

impl DcuConversionFactors {
    /// Uncalibrated defaults for a CCU-level DCU
    pub fn ccu_default(sub_detector: &str) -> Self {
        Self {
            dcu_hard_id: 0,
            det_id: 0,
            sub_detector: sub_detector.to_string(),
            dcu_type: DcuType::Dcuccu,
            adc_gain0: 2.144,
            adc_offset0: 0.0,
            adc_cal0: false,
            adc_inl0: 0.0,
            adc_inl0_ow: true,
            i20: 0.02122,
            i10: 0.01061,
            i_cal: false,
            k_div: 0.56,
            k_div_cal: false,
            ts_gain: 8.9,
            ts_offset: 2432.0,
            ts_cal: false,
            r68: 0.0,
            r68_cal: false,
            adc_gain2: 0.0,
            adc_offset2: 0.0,
            adc_cal2: false,
            adc_gain3: 0.0,
            adc_cal3: false,
        }
    }
}

pub type DcuConversions = Vec<DcuConversionFactors>;

/// Per-type device counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub counts: BTreeMap<DeviceType, usize>,
    pub total: usize,
}

impl DeviceSummary {
    pub fn from_devices(devices: &[DeviceDescription]) -> Self {
        let mut summary = Self::default();
        for device in devices {
            *summary.counts.entry(device.device_type()).or_insert(0) += 1;
            summary.total += 1;
        }
        summary
    }

    pub fn count(&self, device_type: DeviceType) -> usize {
        self.counts.get(&device_type).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::access_key;

    #[test]
    fn test_device_type_from_payload() {
        let key = access_key(1, 1, 1, 0x10, 0x70).unwrap();
        let doh = DeviceDescription::new(
            key,
            "TI_1",
            DevicePayload::LaserDriver(LaserDriverSettings::doh()),
        );
        assert_eq!(doh.device_type(), DeviceType::LaserDriver);
        assert!(!doh.is_dcu());
        assert_eq!(doh.dcu_hard_id(), None);
        assert_eq!(doh.address().i2c_addr, 0x70);
    }

    #[test]
    fn test_dcu_description() {
        let dcu = DeviceDescription::new(0, "TI_1", DevicePayload::Dcu(DcuReadout::new(0xABCD)));
        assert!(dcu.is_dcu());
        assert_eq!(dcu.dcu_hard_id(), Some(0xABCD));
    }

    #[test]
    fn test_device_summary() {
        let devices = vec![
            DeviceDescription::new(1, "a", DevicePayload::Apv(ApvSettings::default())),
            DeviceDescription::new(2, "a", DevicePayload::Apv(ApvSettings::default())),
            DeviceDescription::new(3, "a", DevicePayload::Mux(MuxSettings::default())),
        ];
        let summary = DeviceSummary::from_devices(&devices);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.count(DeviceType::Apv), 2);
        assert_eq!(summary.count(DeviceType::Mux), 1);
        assert_eq!(summary.count(DeviceType::Pll), 0);
    }

    #[test]
    fn test_conversion_defaults() {
        let conv = DcuConversionFactors::ccu_default("TI");
        assert_eq!(conv.dcu_type, DcuType::Dcuccu);
        assert_eq!(conv.sub_detector, "TI");
        assert!((conv.adc_gain0 - 2.144).abs() < 1e-9);
        assert!((conv.ts_offset - 2432.0).abs() < 1e-9);
        assert!(conv.adc_inl0_ow);
    }
}
