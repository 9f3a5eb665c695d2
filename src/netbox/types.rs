use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// --- NetBox API types ---

#[derive(Debug, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub count: i32,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NbDeviceRole {
    pub id: i64,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NbDevice {
    pub id: i64,
    pub name: Option<String>,
    #[serde(default)]
    pub primary_ip4: Option<NbIPAddress>,
    /// Provisioning intent lives in the device's local config context
    #[serde(default)]
    pub local_context_data: Option<serde_json::Value>,
    #[serde(default)]
    pub custom_fields: Option<HashMap<String, serde_json::Value>>,
}

impl NbDevice {
    pub fn custom_str(&self, field: &str) -> Option<&str> {
        self.custom_fields
            .as_ref()?
            .get(field)?
            .as_str()
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NbInterface {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mac_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NbIPAddress {
    pub id: i64,
    pub address: String,
    #[serde(default)]
    pub display: Option<String>,
}

// --- Create/update request types ---

#[derive(Debug, Serialize)]
pub(crate) struct InterfaceCreate {
    pub device: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub iface_type: String,
    pub description: String,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct IpAddressCreate {
    pub address: String,
    pub assigned_object_type: String,
    pub assigned_object_id: i64,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct JournalEntryCreate {
    pub assigned_object_type: String,
    pub assigned_object_id: i64,
    pub kind: String,
    pub comments: String,
}

// --- Promotion result ---

#[derive(Debug, Clone, Default, Serialize)]
pub struct PromotionCounts {
    pub created: i32,
    pub updated: i32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}
