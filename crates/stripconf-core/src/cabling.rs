//! Logical cabling map of the control system
//!
//! The control system is a strict hierarchy:
//! crate -> FEC (slot) -> ring -> CCU -> module (CCU channel).
//! Each module knows the I2C addresses of its active APVs and its DCU id.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::description::FedConnection;

/// Front-end module hanging off one CCU channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CablingModule {
    pub ccu_chan: u16,
    /// I2C addresses of the active APVs
    #[serde(default)]
    pub active_apvs: Vec<u16>,
    pub dcu_id: u32,
    #[serde(default)]
    pub det_id: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CablingCcu {
    pub ccu_addr: u16,
    #[serde(default)]
    pub modules: Vec<CablingModule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CablingRing {
    pub fec_ring: u16,
    #[serde(default)]
    pub ccus: Vec<CablingCcu>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CablingFec {
    pub fec_slot: u16,
    #[serde(default)]
    pub rings: Vec<CablingRing>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CablingCrate {
    pub fec_crate: u16,
    #[serde(default)]
    pub fecs: Vec<CablingFec>,
}

/// The full control-system cabling
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FecCabling {
    #[serde(default)]
    pub crates: Vec<CablingCrate>,
}

type ModuleKey = (u16, u16, u16, u16, u16);

impl FecCabling {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the cabling from a FED connection list
    ///
    /// Connections sharing crate/slot/ring/CCU/channel belong to the same
    /// module; their APV pairs are merged. Nodes come out sorted by address.
    pub fn from_connections(connections: &[FedConnection]) -> Self {
        let mut modules: BTreeMap<ModuleKey, CablingModule> = BTreeMap::new();

        for conn in connections {
            let key = (
                conn.fec_crate,
                conn.fec_slot,
                conn.fec_ring,
                conn.ccu_addr,
                conn.ccu_chan,
            );
            let module = modules.entry(key).or_insert_with(|| CablingModule {
                ccu_chan: conn.ccu_chan,
                active_apvs: Vec::new(),
                dcu_id: conn.dcu_id,
                det_id: conn.det_id,
            });
            for apv in [conn.apv0, conn.apv1] {
                if apv != 0 && !module.active_apvs.contains(&apv) {
                    module.active_apvs.push(apv);
                }
            }
        }

        let mut cabling = Self::new();
        for ((fec_crate, fec_slot, fec_ring, ccu_addr, _), mut module) in modules {
            module.active_apvs.sort_unstable();
            cabling.add_module(fec_crate, fec_slot, fec_ring, ccu_addr, module);
        }
        cabling
    }

    /// Insert a module, creating the intermediate nodes as needed
    pub fn add_module(
        &mut self,
        fec_crate: u16,
        fec_slot: u16,
        fec_ring: u16,
        ccu_addr: u16,
        module: CablingModule,
    ) {
        let crate_node = find_or_push(&mut self.crates, |c| c.fec_crate == fec_crate, || {
            CablingCrate {
                fec_crate,
                fecs: Vec::new(),
            }
        });
        let fec = find_or_push(&mut crate_node.fecs, |f| f.fec_slot == fec_slot, || {
            CablingFec {
                fec_slot,
                rings: Vec::new(),
            }
        });
        let ring = find_or_push(&mut fec.rings, |r| r.fec_ring == fec_ring, || CablingRing {
            fec_ring,
            ccus: Vec::new(),
        });
        let ccu = find_or_push(&mut ring.ccus, |c| c.ccu_addr == ccu_addr, || CablingCcu {
            ccu_addr,
            modules: Vec::new(),
        });

        if let Some(existing) = ccu.modules.iter_mut().find(|m| m.ccu_chan == module.ccu_chan) {
            *existing = module;
        } else {
            ccu.modules.push(module);
        }
    }

    /// Number of modules across the whole map
    pub fn module_count(&self) -> usize {
        self.crates
            .iter()
            .flat_map(|c| &c.fecs)
            .flat_map(|f| &f.rings)
            .flat_map(|r| &r.ccus)
            .map(|c| c.modules.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.crates.is_empty()
    }
}

fn find_or_push<'a, T>(
    items: &'a mut Vec<T>,
    matches: impl Fn(&T) -> bool,
    create: impl FnOnce() -> T,
) -> &'a mut T {
    let index = match items.iter().position(matches) {
        Some(index) => index,
        None => {
            items.push(create());
            items.len() - 1
        }
    };
    &mut items[index]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(ccu_addr: u16, ccu_chan: u16, apv0: u16, apv1: u16) -> FedConnection {
        FedConnection {
            fec_crate: 1,
            fec_slot: 7,
            fec_ring: 2,
            ccu_addr,
            ccu_chan,
            apv0,
            apv1,
            dcu_id: 0x1000 + u32::from(ccu_chan),
            det_id: 0x2000 + u32::from(ccu_chan),
            ..Default::default()
        }
    }

    #[test]
    fn test_from_connections_groups_modules() {
        let connections = vec![
            connection(1, 0x11, 0x24, 0x25),
            connection(1, 0x11, 0x20, 0x21),
            connection(1, 0x12, 0x20, 0x21),
            connection(2, 0x10, 0x20, 0x21),
        ];
        let cabling = FecCabling::from_connections(&connections);

        assert_eq!(cabling.crates.len(), 1);
        let ring = &cabling.crates[0].fecs[0].rings[0];
        assert_eq!(ring.fec_ring, 2);
        assert_eq!(ring.ccus.len(), 2);
        assert_eq!(ring.ccus[0].ccu_addr, 1);
        assert_eq!(ring.ccus[0].modules.len(), 2);
        assert_eq!(ring.ccus[0].modules[0].active_apvs, vec![0x20, 0x21, 0x24, 0x25]);
        assert_eq!(ring.ccus[0].modules[0].dcu_id, 0x1011);
        assert_eq!(cabling.module_count(), 3);
    }

    #[test]
    fn test_add_module_replaces_same_channel() {
        let mut cabling = FecCabling::new();
        assert!(cabling.is_empty());
        cabling.add_module(
            0,
            3,
            1,
            5,
            CablingModule {
                ccu_chan: 0x10,
                active_apvs: vec![0x20],
                dcu_id: 1,
                det_id: 0,
            },
        );
        cabling.add_module(
            0,
            3,
            1,
            5,
            CablingModule {
                ccu_chan: 0x10,
                active_apvs: vec![0x20, 0x21],
                dcu_id: 2,
                det_id: 0,
            },
        );
        assert_eq!(cabling.module_count(), 1);
        let module = &cabling.crates[0].fecs[0].rings[0].ccus[0].modules[0];
        assert_eq!(module.dcu_id, 2);
        assert_eq!(module.active_apvs.len(), 2);
    }
}
