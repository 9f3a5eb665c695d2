//! The source-of-truth seam: where devices and intent come from and where
//! results go back to.

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{IntentError, StoreError};
use crate::models::{Device, DeviceStatus, Intent, ObservedInterface, StageResultRecord};

#[async_trait]
pub trait IntentStore: Send + Sync {
    /// Devices selected for provisioning in this run
    async fn list_devices(&self) -> Result<Vec<Device>, StoreError>;

    async fn fetch_intent(&self, device: &Device) -> Result<Intent, IntentError>;

    async fn write_result(&self, run_id: Uuid, device: &Device, record: &StageResultRecord) -> Result<(), StoreError>;

    async fn write_status(&self, device: &Device, status: DeviceStatus) -> Result<(), StoreError>;

    /// Hand a fully validated device over to production. `observed` holds the
    /// interfaces read back from the device and may be empty.
    async fn promote(&self, device: &Device, intent: &Intent, observed: &[ObservedInterface]) -> Result<(), StoreError>;
}
