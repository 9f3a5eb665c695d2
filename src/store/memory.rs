use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::IntentStore;
use crate::error::{IntentError, StoreError};
use crate::models::{Device, DeviceStatus, Intent, ObservedInterface, StageResultRecord};

/// In-memory store for orchestrator tests
#[derive(Default)]
pub struct MemoryStore {
    devices: Vec<Device>,
    documents: HashMap<String, serde_json::Value>,
    pub fail_listing: bool,
    pub fail_writes: bool,
    results: Mutex<Vec<(Uuid, StageResultRecord)>>,
    statuses: Mutex<HashMap<String, DeviceStatus>>,
    promoted: Mutex<Vec<(String, Vec<ObservedInterface>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: Device, document: serde_json::Value) -> Self {
        self.documents.insert(device.name.clone(), document);
        self.devices.push(device);
        self
    }

    pub fn results_for(&self, name: &str) -> Vec<StageResultRecord> {
        self.results
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, r)| r.device_id == name)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn status_of(&self, name: &str) -> Option<DeviceStatus> {
        self.statuses.lock().unwrap().get(name).copied()
    }

    pub fn promoted(&self) -> Vec<String> {
        self.promoted.lock().unwrap().iter().map(|(name, _)| name.clone()).collect()
    }

    /// Interfaces handed over with the device's promotion
    pub fn observed_for(&self, name: &str) -> Vec<ObservedInterface> {
        self.promoted
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, observed)| observed.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl IntentStore for MemoryStore {
    async fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
        if self.fail_listing {
            return Err(StoreError::Request("connection refused".to_string()));
        }
        Ok(self.devices.clone())
    }

    async fn fetch_intent(&self, device: &Device) -> Result<Intent, IntentError> {
        let doc = self.documents.get(&device.name).cloned().unwrap_or_default();
        Intent::from_document(&device.name, doc)
    }

    async fn write_result(&self, run_id: Uuid, _device: &Device, record: &StageResultRecord) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Api { status: 503, body: "unavailable".to_string() });
        }
        self.results.lock().unwrap().push((run_id, record.clone()));
        Ok(())
    }

    async fn write_status(&self, device: &Device, status: DeviceStatus) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Api { status: 503, body: "unavailable".to_string() });
        }
        self.statuses.lock().unwrap().insert(device.name.clone(), status);
        Ok(())
    }

    async fn promote(&self, device: &Device, _intent: &Intent, observed: &[ObservedInterface]) -> Result<(), StoreError> {
        self.promoted.lock().unwrap().push((device.name.clone(), observed.to_vec()));
        Ok(())
    }
}
