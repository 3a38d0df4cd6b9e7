//! Generation of a default configuration from the cabling map
//!
//! Walks crate -> FEC -> ring -> CCU -> module and emits one description per
//! device expected at each level, with default register settings:
//!
//! - ring: one DCU on the dummy CCU 0x7F
//! - CCU: a DOH laser driver (CCUs 1 and 2 only), a DCU and a PIA reset
//! - module: one APV per active address, a DCU, an APV MUX and a PLL
//!
//! Every DCU that is not on a module also gets a conversion-factor record,
//! identified by its control key.

use tracing::{debug, warn};

use crate::address::{access_key, i2c_key, AddressError, HardwareAddress};
use crate::cabling::{CablingCcu, CablingModule, FecCabling};
use crate::description::{
    ApvSettings, DcuConversionFactors, DcuConversions, DcuReadout, DeviceDescription,
    DeviceDescriptions, DevicePayload, LaserDriverSettings, MuxSettings, PiaResetDescriptions,
    PiaResetSettings, PllSettings,
};

/// CCU address of the dummy CCU hosting the ring-level DCU
pub const RING_DCU_CCU: u16 = 0x7F;
pub const DCU_CHANNEL: u16 = 0x10;
pub const DCU_I2C: u16 = 0x00;
pub const PIA_CHANNEL: u16 = 0x30;
pub const DOH_I2C: u16 = 0x70;
pub const MUX_I2C: u16 = 0x43;
pub const PLL_I2C: u16 = 0x44;
/// CCUs that host a digital opto-hybrid
pub const DOH_CCUS: [u16; 2] = [1, 2];

/// Everything produced for one cabling map
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedDescriptions {
    pub devices: DeviceDescriptions,
    pub pia_resets: PiaResetDescriptions,
    pub dcu_conversions: DcuConversions,
    /// Nodes dropped because their address does not encode
    pub skipped: usize,
}

impl GeneratedDescriptions {
    pub fn total(&self) -> usize {
        self.devices.len() + self.pia_resets.len()
    }
}

pub struct DescriptionBuilder {
    partition_name: String,
    apv: ApvSettings,
    doh: LaserDriverSettings,
    mux: MuxSettings,
    pll: PllSettings,
    pia: PiaResetSettings,
}

/// Position of the FEC being walked
#[derive(Clone, Copy)]
struct FecPosition {
    fec_crate: u16,
    fec_slot: u16,
    fec_ring: u16,
}

impl DescriptionBuilder {
    pub fn new(partition_name: impl Into<String>) -> Self {
        Self {
            partition_name: partition_name.into(),
            apv: ApvSettings::default(),
            doh: LaserDriverSettings::doh(),
            mux: MuxSettings::default(),
            pll: PllSettings::default(),
            pia: PiaResetSettings::default(),
        }
    }

    /// Hardware id of the FEC in `fec_slot`
    pub fn fec_hardware_id(&self, fec_slot: u16) -> String {
        format!("{}{}", self.partition_name, fec_slot)
    }

    /// Build descriptions for the whole cabling map
    ///
    /// Never fails: nodes whose address components overflow the key layout are
    /// skipped, logged and counted in [`GeneratedDescriptions::skipped`].
    pub fn build(&self, cabling: &FecCabling) -> GeneratedDescriptions {
        let mut out = GeneratedDescriptions::default();

        for crate_node in &cabling.crates {
            for fec in &crate_node.fecs {
                let hardware_id = self.fec_hardware_id(fec.fec_slot);
                for ring in &fec.rings {
                    let pos = FecPosition {
                        fec_crate: crate_node.fec_crate,
                        fec_slot: fec.fec_slot,
                        fec_ring: ring.fec_ring,
                    };
                    self.add_control_dcu(&mut out, &hardware_id, pos, RING_DCU_CCU);
                    for ccu in &ring.ccus {
                        self.add_ccu(&mut out, &hardware_id, pos, ccu);
                    }
                }
            }
        }

        debug!(
            devices = out.devices.len(),
            pia_resets = out.pia_resets.len(),
            conversions = out.dcu_conversions.len(),
            skipped = out.skipped,
            "Built descriptions from cabling"
        );
        out
    }

    fn add_ccu(
        &self,
        out: &mut GeneratedDescriptions,
        hardware_id: &str,
        pos: FecPosition,
        ccu: &CablingCcu,
    ) {
        if DOH_CCUS.contains(&ccu.ccu_addr) {
            let key = access_key(pos.fec_slot, pos.fec_ring, ccu.ccu_addr, DCU_CHANNEL, DOH_I2C);
            push(
                &mut out.devices,
                &mut out.skipped,
                key,
                hardware_id,
                DevicePayload::LaserDriver(self.doh.clone()),
            );
        }

        self.add_control_dcu(out, hardware_id, pos, ccu.ccu_addr);

        let key = access_key(pos.fec_slot, pos.fec_ring, ccu.ccu_addr, PIA_CHANNEL, 0);
        push(
            &mut out.pia_resets,
            &mut out.skipped,
            key,
            hardware_id,
            DevicePayload::PiaReset(self.pia.clone()),
        );

        for module in &ccu.modules {
            self.add_module(out, hardware_id, pos, ccu.ccu_addr, module);
        }
    }

    /// DCU addressed by control key, with its conversion record
    fn add_control_dcu(
        &self,
        out: &mut GeneratedDescriptions,
        hardware_id: &str,
        pos: FecPosition,
        ccu_addr: u16,
    ) {
        let addr = HardwareAddress::new(
            pos.fec_crate,
            pos.fec_slot,
            pos.fec_ring,
            ccu_addr,
            DCU_CHANNEL,
            DCU_I2C,
        );
        let keys = addr
            .control_key()
            .and_then(|hard_id| addr.key().map(|key| (hard_id, key)));
        match keys {
            Ok((dcu_hard_id, key)) => {
                out.devices.push(DeviceDescription::new(
                    key,
                    hardware_id,
                    DevicePayload::Dcu(DcuReadout::new(dcu_hard_id)),
                ));
                let mut conversion = DcuConversionFactors::ccu_default(&self.partition_name);
                conversion.dcu_hard_id = dcu_hard_id;
                out.dcu_conversions.push(conversion);
            }
            Err(err) => skip(&mut out.skipped, &err),
        }
    }

    fn add_module(
        &self,
        out: &mut GeneratedDescriptions,
        hardware_id: &str,
        pos: FecPosition,
        ccu_addr: u16,
        module: &CablingModule,
    ) {
        let index = match access_key(pos.fec_slot, pos.fec_ring, ccu_addr, module.ccu_chan, 0) {
            Ok(index) => index,
            Err(err) => {
                skip(&mut out.skipped, &err);
                return;
            }
        };
        let at = |i2c: u16| i2c_key(i2c).map(|i2c| index | i2c);

        for &apv in &module.active_apvs {
            push(
                &mut out.devices,
                &mut out.skipped,
                at(apv),
                hardware_id,
                DevicePayload::Apv(self.apv.clone()),
            );
        }
        out.devices.push(DeviceDescription::new(
            index,
            hardware_id,
            DevicePayload::Dcu(DcuReadout::new(module.dcu_id)),
        ));
        push(
            &mut out.devices,
            &mut out.skipped,
            at(MUX_I2C),
            hardware_id,
            DevicePayload::Mux(self.mux.clone()),
        );
        push(
            &mut out.devices,
            &mut out.skipped,
            at(PLL_I2C),
            hardware_id,
            DevicePayload::Pll(self.pll.clone()),
        );
    }
}

fn push(
    target: &mut Vec<DeviceDescription>,
    skipped: &mut usize,
    key: Result<u32, AddressError>,
    hardware_id: &str,
    payload: DevicePayload,
) {
    match key {
        Ok(key) => target.push(DeviceDescription::new(key, hardware_id, payload)),
        Err(err) => skip(skipped, &err),
    }
}

fn skip(skipped: &mut usize, err: &AddressError) {
    warn!(error = %err, "Skipping device with unencodable address");
    *skipped += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cabling::CablingModule;
    use crate::description::DeviceType;

    fn module(ccu_chan: u16, apvs: &[u16], dcu_id: u32) -> CablingModule {
        CablingModule {
            ccu_chan,
            active_apvs: apvs.to_vec(),
            dcu_id,
            det_id: 0,
        }
    }

    #[test]
    fn test_ring_dcu_uses_control_key() {
        let mut cabling = FecCabling::new();
        cabling.add_module(1, 4, 2, 3, module(0x11, &[0x20], 0xAA));
        let out = DescriptionBuilder::new("TI_").build(&cabling);

        let ring_dcu = &out.devices[0];
        let expected_hard_id = HardwareAddress::new(1, 4, 2, RING_DCU_CCU, DCU_CHANNEL, 0)
            .control_key()
            .unwrap();
        assert_eq!(ring_dcu.dcu_hard_id(), Some(expected_hard_id));
        assert_eq!(ring_dcu.key, access_key(4, 2, RING_DCU_CCU, DCU_CHANNEL, 0).unwrap());
        assert_eq!(ring_dcu.fec_hardware_id, "TI_4");
        assert_eq!(out.dcu_conversions[0].dcu_hard_id, expected_hard_id);
    }

    #[test]
    fn test_doh_only_on_first_two_ccus() {
        let mut cabling = FecCabling::new();
        for ccu in 1..=3 {
            cabling.add_module(0, 1, 1, ccu, module(0x10, &[0x20, 0x21], u32::from(ccu)));
        }
        let out = DescriptionBuilder::new("P").build(&cabling);

        let dohs: Vec<_> = out
            .devices
            .iter()
            .filter(|d| d.device_type() == DeviceType::LaserDriver)
            .collect();
        assert_eq!(dohs.len(), 2);
        assert!(dohs.iter().all(|d| d.address().i2c_addr == DOH_I2C));
        assert_eq!(out.pia_resets.len(), 3);
        assert!(out.pia_resets.iter().all(|p| p.address().ccu_chan == PIA_CHANNEL));
    }

    #[test]
    fn test_module_devices() {
        let mut cabling = FecCabling::new();
        cabling.add_module(0, 2, 1, 5, module(0x1A, &[0x20, 0x21, 0x24, 0x25], 0x1234));
        let out = DescriptionBuilder::new("P").build(&cabling);

        let index = access_key(2, 1, 5, 0x1A, 0).unwrap();
        let module_devices: Vec<_> = out
            .devices
            .iter()
            .filter(|d| (d.key & !0xFF) == index)
            .collect();
        // 4 APVs, DCU, MUX, PLL
        assert_eq!(module_devices.len(), 7);
        let dcu = module_devices.iter().find(|d| d.is_dcu()).unwrap();
        assert_eq!(dcu.key, index);
        assert_eq!(dcu.dcu_hard_id(), Some(0x1234));
        assert!(module_devices.iter().any(|d| d.key == (index | 0x43)));
        assert!(module_devices.iter().any(|d| d.key == (index | 0x44)));
    }

    #[test]
    fn test_overflowing_ring_is_skipped() {
        let mut cabling = FecCabling::new();
        cabling.add_module(0, 1, 16, 1, module(0x10, &[0x20], 1));
        let out = DescriptionBuilder::new("P").build(&cabling);
        assert!(out.devices.is_empty());
        assert!(out.pia_resets.is_empty());
        assert!(out.skipped > 0);
    }

    #[test]
    fn test_empty_cabling() {
        let out = DescriptionBuilder::new("P").build(&FecCabling::new());
        assert_eq!(out.total(), 0);
        assert_eq!(out.skipped, 0);
    }
}
