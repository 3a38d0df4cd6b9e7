//! FEC hardware addressing
//!
//! Every front-end device is reached through a chain of
//! crate / FEC slot / FEC ring / CCU address / CCU channel / I2C address.
//! Two packed forms of that chain are used:
//! - the FEC access key, unique within one FEC crate (the crate is not part of it)
//! - the control key, unique within the whole tracker, used as DCU hardware id
//!
//! Encoding never truncates: a component that does not fit its bit field is
//! reported as [`AddressError::InvalidField`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Sentinel for an unknown/unassigned address component
pub const UNSET: u16 = 0xFFFF;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid {field} value {value:#x}: exceeds maximum {max:#x}")]
    InvalidField {
        field: AddressField,
        value: u16,
        max: u16,
    },
}

/// Component of a hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressField {
    Crate,
    Slot,
    Ring,
    CcuAddr,
    CcuChan,
    I2cAddr,
}

impl fmt::Display for AddressField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Crate => "FEC crate",
            Self::Slot => "FEC slot",
            Self::Ring => "FEC ring",
            Self::CcuAddr => "CCU address",
            Self::CcuChan => "CCU channel",
            Self::I2cAddr => "I2C address",
        };
        f.write_str(name)
    }
}

/// Position and width of one component inside a packed key
#[derive(Debug, Clone, Copy)]
struct BitField {
    field: AddressField,
    shift: u32,
    width: u32,
}

impl BitField {
    const fn new(field: AddressField, shift: u32, width: u32) -> Self {
        Self { field, shift, width }
    }

    const fn max(&self) -> u32 {
        (1 << self.width) - 1
    }

    fn pack(&self, value: u16) -> Result<u32, AddressError> {
        if u32::from(value) > self.max() {
            return Err(AddressError::InvalidField {
                field: self.field,
                value,
                max: self.max() as u16,
            });
        }
        Ok(u32::from(value) << self.shift)
    }

    fn unpack(&self, key: u32) -> u16 {
        ((key >> self.shift) & self.max()) as u16
    }
}

// FEC access key, low to high
const KEY_I2C: BitField = BitField::new(AddressField::I2cAddr, 0, 8);
const KEY_CHAN: BitField = BitField::new(AddressField::CcuChan, 8, 8);
const KEY_CCU: BitField = BitField::new(AddressField::CcuAddr, 16, 7);
const KEY_RING: BitField = BitField::new(AddressField::Ring, 23, 4);
const KEY_SLOT: BitField = BitField::new(AddressField::Slot, 27, 5);

// Control key, low to high
const CTRL_I2C: BitField = BitField::new(AddressField::I2cAddr, 0, 7);
const CTRL_CHAN: BitField = BitField::new(AddressField::CcuChan, 7, 6);
const CTRL_CCU: BitField = BitField::new(AddressField::CcuAddr, 13, 7);
const CTRL_RING: BitField = BitField::new(AddressField::Ring, 20, 4);
const CTRL_SLOT: BitField = BitField::new(AddressField::Slot, 24, 5);
const CTRL_CRATE: BitField = BitField::new(AddressField::Crate, 29, 3);

/// Full hardware address of a front-end device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HardwareAddress {
    pub fec_crate: u16,
    pub fec_slot: u16,
    pub fec_ring: u16,
    pub ccu_addr: u16,
    pub ccu_chan: u16,
    pub i2c_addr: u16,
}

impl Default for HardwareAddress {
    fn default() -> Self {
        Self {
            fec_crate: UNSET,
            fec_slot: UNSET,
            fec_ring: UNSET,
            ccu_addr: UNSET,
            ccu_chan: UNSET,
            i2c_addr: UNSET,
        }
    }
}

impl HardwareAddress {
    pub fn new(
        fec_crate: u16,
        fec_slot: u16,
        fec_ring: u16,
        ccu_addr: u16,
        ccu_chan: u16,
        i2c_addr: u16,
    ) -> Self {
        Self {
            fec_crate,
            fec_slot,
            fec_ring,
            ccu_addr,
            ccu_chan,
            i2c_addr,
        }
    }

    /// Decode a FEC access key. The crate cannot be recovered and is left unset.
    pub fn from_key(key: u32) -> Self {
        Self {
            fec_crate: UNSET,
            fec_slot: KEY_SLOT.unpack(key),
            fec_ring: KEY_RING.unpack(key),
            ccu_addr: KEY_CCU.unpack(key),
            ccu_chan: KEY_CHAN.unpack(key),
            i2c_addr: KEY_I2C.unpack(key),
        }
    }

    /// Same address with a different I2C address
    pub fn with_i2c(mut self, i2c_addr: u16) -> Self {
        self.i2c_addr = i2c_addr;
        self
    }

    /// Same address with a different CCU channel and I2C address
    pub fn with_channel(mut self, ccu_chan: u16, i2c_addr: u16) -> Self {
        self.ccu_chan = ccu_chan;
        self.i2c_addr = i2c_addr;
        self
    }

    /// Pack into a FEC access key (crate excluded)
    pub fn key(&self) -> Result<u32, AddressError> {
        access_key(
            self.fec_slot,
            self.fec_ring,
            self.ccu_addr,
            self.ccu_chan,
            self.i2c_addr,
        )
    }

    /// Pack into a tracker-wide control key (crate included)
    pub fn control_key(&self) -> Result<u32, AddressError> {
        Ok(CTRL_CRATE.pack(self.fec_crate)?
            | CTRL_SLOT.pack(self.fec_slot)?
            | CTRL_RING.pack(self.fec_ring)?
            | CTRL_CCU.pack(self.ccu_addr)?
            | CTRL_CHAN.pack(self.ccu_chan)?
            | CTRL_I2C.pack(self.i2c_addr)?)
    }
}

impl fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = [
            self.fec_crate,
            self.fec_slot,
            self.fec_ring,
            self.ccu_addr,
            self.ccu_chan,
            self.i2c_addr,
        ];
        for (i, value) in fields.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            if *value == UNSET {
                f.write_str("*")?;
            } else {
                write!(f, "{}", value)?;
            }
        }
        Ok(())
    }
}

/// Build a FEC access key from its five components
pub fn access_key(
    fec_slot: u16,
    fec_ring: u16,
    ccu_addr: u16,
    ccu_chan: u16,
    i2c_addr: u16,
) -> Result<u32, AddressError> {
    Ok(KEY_SLOT.pack(fec_slot)?
        | KEY_RING.pack(fec_ring)?
        | KEY_CCU.pack(ccu_addr)?
        | KEY_CHAN.pack(ccu_chan)?
        | KEY_I2C.pack(i2c_addr)?)
}

/// I2C address positioned within an access key, for OR-ing onto a channel key
pub fn i2c_key(i2c_addr: u16) -> Result<u32, AddressError> {
    KEY_I2C.pack(i2c_addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_key_layout() {
        let key = access_key(3, 1, 0x7F, 0x10, 0x00).unwrap();
        assert_eq!(key, 0x18FF_1000);

        let key = access_key(31, 15, 0x7F, 0xFF, 0xFF).unwrap();
        assert_eq!(key, 0xFFFF_FFFF);
    }

    #[test]
    fn test_decode_reproduces_components() {
        let samples = [
            (0, 0, 0, 0, 0),
            (1, 1, 1, 0x10, 0x20),
            (5, 7, 0x7F, 0x30, 0x70),
            (31, 15, 0x7F, 0xFF, 0xFF),
            (20, 8, 0x42, 0x1A, 0x44),
        ];
        for (slot, ring, ccu, chan, i2c) in samples {
            let key = access_key(slot, ring, ccu, chan, i2c).unwrap();
            let addr = HardwareAddress::from_key(key);
            assert_eq!(
                (addr.fec_slot, addr.fec_ring, addr.ccu_addr, addr.ccu_chan, addr.i2c_addr),
                (slot, ring, ccu, chan, i2c)
            );
            assert_eq!(addr.fec_crate, UNSET);
        }
    }

    #[test]
    fn test_crate_not_part_of_key() {
        let a = HardwareAddress::new(1, 4, 2, 0x11, 0x12, 0x20);
        let b = HardwareAddress::new(3, 4, 2, 0x11, 0x12, 0x20);
        assert_eq!(a.key().unwrap(), b.key().unwrap());
        assert_ne!(a.control_key().unwrap(), b.control_key().unwrap());
    }

    #[test]
    fn test_overflow_is_rejected() {
        let err = access_key(32, 0, 0, 0, 0).unwrap_err();
        assert_eq!(
            err,
            AddressError::InvalidField {
                field: AddressField::Slot,
                value: 32,
                max: 31
            }
        );

        assert!(access_key(0, 16, 0, 0, 0).is_err());
        assert!(access_key(0, 0, 0x80, 0, 0).is_err());
        assert!(access_key(0, 0, 0, 0x100, 0).is_err());
        assert!(i2c_key(0x100).is_err());
    }

    #[test]
    fn test_unset_address_is_not_encodable() {
        let addr = HardwareAddress::default();
        assert!(addr.key().is_err());
        assert!(addr.control_key().is_err());
    }

    #[test]
    fn test_control_key_limits() {
        let addr = HardwareAddress::new(7, 31, 15, 0x7F, 0x30, 0x70);
        assert!(addr.control_key().is_ok());

        let too_many_crates = HardwareAddress::new(8, 1, 1, 1, 0x10, 0);
        let err = too_many_crates.control_key().unwrap_err();
        assert!(matches!(
            err,
            AddressError::InvalidField {
                field: AddressField::Crate,
                ..
            }
        ));
    }

    #[test]
    fn test_keys_sort_by_hierarchy() {
        let lower = access_key(1, 15, 0x7F, 0xFF, 0xFF).unwrap();
        let higher = access_key(2, 0, 0, 0, 0).unwrap();
        assert!(lower < higher);
    }

    #[test]
    fn test_display() {
        let addr = HardwareAddress::from_key(access_key(2, 1, 0x7F, 0x10, 0).unwrap());
        assert_eq!(addr.to_string(), "*/2/1/127/16/0");
    }
}
