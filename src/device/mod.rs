//! DUT host facts, dual-ToR peer lookup, and mux port selection.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::io::CableType;

/// `asic_type` fact reported by the virtual (software) switch.
pub const VIRTUAL_ASIC: &str = "vs";

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("dual-ToR testbed needs two DUTs, found {found}")]
    IncompletePair { found: usize },

    #[error("cannot select {requested} {cable_type} mux ports, only {available} available")]
    NotEnoughMuxPorts {
        cable_type: CableType,
        requested: usize,
        available: usize,
    },
}

/// A device under test and the facts gathered from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DutHost {
    hostname: String,
    #[serde(default)]
    facts: HashMap<String, String>,
}

impl DutHost {
    pub fn new(hostname: impl Into<String>, asic_type: impl Into<String>) -> Self {
        let mut facts = HashMap::new();
        facts.insert("asic_type".to_string(), asic_type.into());
        Self {
            hostname: hostname.into(),
            facts,
        }
    }

    pub fn with_fact(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.facts.insert(key.into(), value.into());
        self
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn fact(&self, key: &str) -> Option<&str> {
        self.facts.get(key).map(String::as_str)
    }

    pub fn asic_type(&self) -> Option<&str> {
        self.fact("asic_type")
    }

    /// Software switch: no meaningful data-plane timing.
    pub fn is_virtual(&self) -> bool {
        self.asic_type() == Some(VIRTUAL_ASIC)
    }
}

/// The other ToR of the pair.
pub fn peer_of<'a>(duthosts: &'a [DutHost], active: &DutHost) -> Result<&'a DutHost, DeviceError> {
    match duthosts {
        [first, second, ..] => Ok(if first.hostname == active.hostname { second } else { first }),
        _ => Err(DeviceError::IncompletePair {
            found: duthosts.len(),
        }),
    }
}

/// Mux ports of the testbed grouped by cable type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxPortInventory {
    #[serde(default)]
    pub active_active: Vec<String>,
    #[serde(default)]
    pub active_standby: Vec<String>,
}

impl MuxPortInventory {
    pub fn ports(&self, cable_type: CableType) -> &[String] {
        match cable_type {
            CableType::ActiveActive => &self.active_active,
            CableType::ActiveStandby => &self.active_standby,
        }
    }

    /// Pick `count` distinct random ports cabled as `cable_type`.
    pub fn select<R: Rng + ?Sized>(
        &self,
        cable_type: CableType,
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<String>, DeviceError> {
        let ports = self.ports(cable_type);
        if count > ports.len() {
            return Err(DeviceError::NotEnoughMuxPorts {
                cable_type,
                requested: count,
                available: ports.len(),
            });
        }
        Ok(ports.choose_multiple(rng, count).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_peer_is_the_other_tor() {
        let pair = vec![DutHost::new("upper", "mellanox"), DutHost::new("lower", "mellanox")];
        assert_eq!(peer_of(&pair, &pair[0]).unwrap().hostname(), "lower");
        assert_eq!(peer_of(&pair, &pair[1]).unwrap().hostname(), "upper");
        assert!(matches!(
            peer_of(&pair[..1], &pair[0]),
            Err(DeviceError::IncompletePair { found: 1 })
        ));
    }

    #[test]
    fn test_virtual_dut_detection() {
        assert!(DutHost::new("vlab-01", "vs").is_virtual());
        assert!(!DutHost::new("str-7260", "broadcom").is_virtual());
        let host = DutHost::new("str-7260", "broadcom").with_fact("platform", "x86_64-arista_7260cx3_64");
        assert_eq!(host.fact("platform"), Some("x86_64-arista_7260cx3_64"));
    }

    #[test]
    fn test_mux_port_selection_by_cable_type() {
        let inventory = MuxPortInventory {
            active_active: vec!["Ethernet0".into(), "Ethernet4".into()],
            active_standby: vec!["Ethernet8".into(), "Ethernet12".into(), "Ethernet16".into()],
        };
        let mut rng = StdRng::seed_from_u64(7);

        let picked = inventory.select(CableType::ActiveStandby, 2, &mut rng).unwrap();
        assert_eq!(picked.len(), 2);
        assert_ne!(picked[0], picked[1]);
        assert!(picked.iter().all(|p| inventory.active_standby.contains(p)));

        let err = inventory.select(CableType::ActiveActive, 3, &mut rng).unwrap_err();
        assert!(matches!(err, DeviceError::NotEnoughMuxPorts { available: 2, .. }));
    }
}
