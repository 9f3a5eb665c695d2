use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::IntentError;

/// Declared administrative state of an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminState {
    Up,
    Down,
}

/// InterfaceIntent is one entry of the intent `interfaces` mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceIntent {
    pub description: String,
    /// "<addr> <mask>", e.g. "172.20.12.1 255.255.255.0"
    pub ipaddr: String,
    pub state: AdminState,
}

impl InterfaceIntent {
    /// Split `ipaddr` into its address and mask halves
    pub fn address_and_mask(&self) -> Option<(&str, &str)> {
        let mut parts = self.ipaddr.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(addr), Some(mask), None) => Some((addr, mask)),
            _ => None,
        }
    }

    pub fn is_up(&self) -> bool {
        self.state == AdminState::Up
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BgpNeighbor {
    pub ipaddr: String,
    pub remote_asn: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BgpNetwork {
    pub net: String,
    pub mask: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BgpIntent {
    pub asn: u32,
    pub rid: String,
    pub neighbors: Vec<BgpNeighbor>,
    pub networks: Vec<BgpNetwork>,
}

/// Intent is the declared state of a device, as stored in the source-of-truth.
/// Fetched once per device per run and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub bgp: BgpIntent,
    /// Keyed by interface name; ordered so rendering is deterministic
    pub interfaces: BTreeMap<String, InterfaceIntent>,
}

impl Intent {
    /// Decode an intent document. Missing fields and type mismatches are
    /// reported as malformed intent for `device`.
    pub fn from_document(device: &str, doc: serde_json::Value) -> Result<Self, IntentError> {
        if doc.is_null() {
            return Err(IntentError::NotFound(device.to_string()));
        }
        serde_json::from_value(doc).map_err(|e| IntentError::Malformed {
            device: device.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn up_interfaces(&self) -> impl Iterator<Item = (&String, &InterfaceIntent)> {
        self.interfaces.iter().filter(|(_, intf)| intf.is_up())
    }
}

#[cfg(test)]
pub(crate) fn sample_document() -> serde_json::Value {
    serde_json::json!({
        "bgp": {
            "asn": 65511,
            "neighbors": [
                { "ipaddr": "172.20.12.2", "remote_asn": 65512 },
                { "ipaddr": "172.20.13.3", "remote_asn": 65513 }
            ],
            "networks": [
                { "net": "1.1.1.1", "mask": "255.255.255.255" },
                { "net": "172.20.12.0", "mask": "255.255.255.0" },
                { "net": "172.20.13.0", "mask": "255.255.255.0" }
            ],
            "rid": "1.1.1.1"
        },
        "interfaces": {
            "GigabitEthernet1": {
                "description": "Uplink to CSR-2",
                "ipaddr": "172.20.12.1 255.255.255.0",
                "state": "up"
            },
            "GigabitEthernet2": {
                "description": "Uplink to CSR-3",
                "ipaddr": "172.20.13.1 255.255.255.0",
                "state": "up"
            },
            "Loopback0": {
                "description": "Router ID",
                "ipaddr": "1.1.1.1 255.255.255.255",
                "state": "up"
            }
        }
    })
}

#[cfg(test)]
pub(crate) fn sample_intent() -> Intent {
    Intent::from_document("csr-1", sample_document()).expect("sample intent decodes")
}
