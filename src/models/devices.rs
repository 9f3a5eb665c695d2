use serde::{Deserialize, Serialize};

/// Pipeline status values persisted back to the source-of-truth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Pending,
    L3Applied,
    L3Validated,
    BgpApplied,
    BgpValidated,
    Failed,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Pending => "pending",
            DeviceStatus::L3Applied => "l3_applied",
            DeviceStatus::L3Validated => "l3_validated",
            DeviceStatus::BgpApplied => "bgp_applied",
            DeviceStatus::BgpValidated => "bgp_validated",
            DeviceStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device represents one router loaded from the inventory for this run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Source-of-truth identifier
    pub id: i64,
    pub name: String,
    /// Management address used for the device session
    pub mgmt_address: String,
    /// Named credential set; `None` uses the default SSH credentials
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_ref: Option<String>,
}

impl Device {
    pub fn new(id: i64, name: impl Into<String>, mgmt_address: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            mgmt_address: mgmt_address.into(),
            credential_ref: None,
        }
    }
}

/// Interface as reported by the device itself after provisioning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedInterface {
    pub name: String,
    pub description: String,
    /// Colon-separated, upper case; `None` for interfaces without hardware
    pub mac_address: Option<String>,
    pub enabled: bool,
}
