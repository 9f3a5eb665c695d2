use async_trait::async_trait;
use uuid::Uuid;

use super::client::NetBoxClient;
use super::sync::promote_device;
use super::types::NbDevice;
use crate::error::{IntentError, StoreError};
use crate::models::{Device, DeviceStatus, Intent, ObservedInterface, StageOutcome, StageResultRecord};
use crate::store::IntentStore;
use crate::utils::strip_prefix_len;

/// Custom field holding the pipeline status
pub const STATUS_FIELD: &str = "provision_status";
/// Optional custom field naming a credential set
pub const CREDENTIAL_FIELD: &str = "ssh_credential";

/// NetBoxStore reads intent from device config contexts and writes results
/// back as journal entries
pub struct NetBoxStore {
    client: NetBoxClient,
    device_role: String,
    production_role: Option<String>,
}

impl NetBoxStore {
    pub fn new(client: NetBoxClient, device_role: String, production_role: Option<String>) -> Self {
        Self { client, device_role, production_role }
    }
}

/// Inventory device from a NetBox device. Devices without a primary IPv4
/// keep an empty management address and fail when the session connects.
pub(crate) fn device_from_netbox(nb: &NbDevice) -> Option<Device> {
    let name = nb.name.clone().filter(|n| !n.is_empty())?;
    let mgmt = nb
        .primary_ip4
        .as_ref()
        .map(|ip| strip_prefix_len(&ip.address).to_string())
        .unwrap_or_default();
    let mut device = Device::new(nb.id, name, mgmt);
    device.credential_ref = nb.custom_str(CREDENTIAL_FIELD).map(str::to_string);
    Some(device)
}

pub(crate) fn journal_kind(outcome: StageOutcome) -> &'static str {
    match outcome {
        StageOutcome::Success => "success",
        StageOutcome::Failure => "danger",
        StageOutcome::Timeout => "warning",
    }
}

pub(crate) fn journal_comments(run_id: Uuid, record: &StageResultRecord) -> Result<String, StoreError> {
    let body = serde_json::to_string_pretty(record).map_err(|e| StoreError::Decode(e.to_string()))?;
    Ok(format!(
        "**wan-provision run {}**: {} stage {}\n\n```json\n{}\n```",
        run_id, record.stage, record.outcome, body
    ))
}

#[async_trait]
impl IntentStore for NetBoxStore {
    async fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
        let devices = self.client.list_devices_by_role(&self.device_role).await?;
        Ok(devices
            .iter()
            .filter_map(|nb| {
                let device = device_from_netbox(nb);
                if device.is_none() {
                    tracing::warn!("Skipping unnamed NetBox device {}", nb.id);
                } else if nb.primary_ip4.is_none() {
                    tracing::warn!("NetBox device {} has no primary IPv4 address", nb.id);
                }
                device
            })
            .collect())
    }

    async fn fetch_intent(&self, device: &Device) -> Result<Intent, IntentError> {
        let nb = self
            .client
            .get_device(device.id)
            .await
            .map_err(StoreError::from)?
            .ok_or_else(|| IntentError::NotFound(device.name.clone()))?;
        Intent::from_document(&device.name, nb.local_context_data.unwrap_or_default())
    }

    async fn write_result(&self, run_id: Uuid, device: &Device, record: &StageResultRecord) -> Result<(), StoreError> {
        let comments = journal_comments(run_id, record)?;
        self.client
            .create_journal_entry(device.id, journal_kind(record.outcome), &comments)
            .await?;
        Ok(())
    }

    async fn write_status(&self, device: &Device, status: DeviceStatus) -> Result<(), StoreError> {
        self.client
            .update_device(device.id, &serde_json::json!({ "custom_fields": { STATUS_FIELD: status } }))
            .await?;
        Ok(())
    }

    async fn promote(&self, device: &Device, intent: &Intent, observed: &[ObservedInterface]) -> Result<(), StoreError> {
        let Some(role) = &self.production_role else { return Ok(()) };
        let counts = promote_device(&self.client, device.id, &device.name, intent, observed, role).await?;
        tracing::info!(
            "{}: promotion created {}, updated {}",
            device.name, counts.created, counts.updated
        );
        for err in &counts.errors {
            tracing::warn!("{}: promotion: {}", device.name, err);
        }
        Ok(())
    }
}
