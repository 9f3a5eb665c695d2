use anyhow::Result;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;

use super::types::*;
use crate::error::StoreError;

const PAGE_LIMIT: usize = 1000;

/// NetBox API client
pub struct NetBoxClient {
    base_url: String,
    token: String,
    client: Client,
}

impl NetBoxClient {
    pub fn new(url: String, token: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            base_url: url.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.token)
    }

    async fn get(&self, url: &str) -> Result<Response> {
        Ok(self
            .client
            .get(url)
            .header("Authorization", self.auth_header())
            .header("Accept", "application/json")
            .send()
            .await?)
    }

    /// Turn a non-2xx response into a StoreError::Api
    async fn check(resp: Response) -> Result<Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(StoreError::Api { status, body }.into())
    }

    async fn decode<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T> {
        resp.json::<T>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()).into())
    }

    /// Helper to perform a GET list request, following `next` links
    async fn list_paginated<T: serde::de::DeserializeOwned>(&self, endpoint: &str) -> Result<Vec<T>> {
        let separator = if endpoint.contains('?') { '&' } else { '?' };
        let mut url = Some(self.api_url(&format!("{}{}limit={}", endpoint, separator, PAGE_LIMIT)));
        let mut results = Vec::new();

        while let Some(next) = url {
            let resp = Self::check(self.get(&next).await?).await?;
            let page: PaginatedResponse<T> = Self::decode(resp).await?;
            results.extend(page.results);
            url = page.next;
        }
        Ok(results)
    }

    /// Helper to GET a single object; 404 means absent
    async fn get_one<T: serde::de::DeserializeOwned>(&self, endpoint: &str) -> Result<Option<T>> {
        let resp = self.get(&self.api_url(endpoint)).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = Self::check(resp).await?;
        Ok(Some(Self::decode(resp).await?))
    }

    /// Helper to look up a single item by slug
    async fn get_by_slug<T: serde::de::DeserializeOwned>(&self, endpoint: &str, slug: &str) -> Result<Option<T>> {
        let resp = self.get(&self.api_url(&format!("{}?slug={}", endpoint, slug))).await?;
        let paginated: PaginatedResponse<T> = Self::decode(Self::check(resp).await?).await?;
        Ok(paginated.results.into_iter().next())
    }

    /// Helper to create a resource via POST
    async fn create_resource<T, B>(&self, endpoint: &str, body: &B) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize,
    {
        let resp = self
            .client
            .post(self.api_url(endpoint))
            .header("Authorization", self.auth_header())
            .json(body)
            .send()
            .await?;

        Self::decode(Self::check(resp).await?).await
    }

    /// Helper to partially update a resource via PATCH
    async fn patch_resource<B: serde::Serialize>(&self, endpoint: &str, body: &B) -> Result<()> {
        let resp = self
            .client
            .patch(self.api_url(endpoint))
            .header("Authorization", self.auth_header())
            .json(body)
            .send()
            .await?;

        Self::check(resp).await?;
        Ok(())
    }

    /// Test connectivity to NetBox
    pub async fn test_connection(&self) -> bool {
        match self.get(&self.api_url("/status/")).await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    // --- Devices ---

    pub async fn list_devices_by_role(&self, role_slug: &str) -> Result<Vec<NbDevice>> {
        self.list_paginated(&format!("/dcim/devices/?role={}", role_slug)).await
    }

    pub async fn get_device(&self, id: i64) -> Result<Option<NbDevice>> {
        self.get_one(&format!("/dcim/devices/{}/", id)).await
    }

    pub async fn update_device(&self, id: i64, fields: &serde_json::Value) -> Result<()> {
        self.patch_resource(&format!("/dcim/devices/{}/", id), fields).await
    }

    // --- Device Roles ---

    pub async fn get_role_by_slug(&self, slug: &str) -> Result<Option<NbDeviceRole>> {
        self.get_by_slug("/dcim/device-roles/", slug).await
    }

    // --- Interfaces ---

    pub async fn list_interfaces_by_device(&self, device_id: i64) -> Result<Vec<NbInterface>> {
        self.list_paginated(&format!("/dcim/interfaces/?device_id={}", device_id)).await
    }

    pub async fn create_interface(
        &self,
        device_id: i64,
        name: &str,
        description: &str,
        enabled: bool,
        mac_address: Option<&str>,
    ) -> Result<NbInterface> {
        let iface_type = if name.to_lowercase().starts_with("loopback") { "virtual" } else { "1000base-t" };
        self.create_resource("/dcim/interfaces/", &InterfaceCreate {
            device: device_id,
            name: name.to_string(),
            iface_type: iface_type.to_string(),
            description: description.to_string(),
            enabled,
            mac_address: mac_address.map(str::to_string),
        }).await
    }

    pub async fn update_interface(&self, id: i64, description: &str, enabled: bool, mac_address: Option<&str>) -> Result<()> {
        let mut fields = serde_json::json!({ "description": description, "enabled": enabled });
        if let Some(mac) = mac_address {
            fields["mac_address"] = serde_json::Value::from(mac);
        }
        self.patch_resource(&format!("/dcim/interfaces/{}/", id), &fields).await
    }

    // --- IP Addresses ---

    pub async fn find_ip_address(&self, cidr: &str) -> Result<Option<NbIPAddress>> {
        let found: Vec<NbIPAddress> = self.list_paginated(&format!("/ipam/ip-addresses/?address={}", cidr)).await?;
        Ok(found.into_iter().next())
    }

    pub async fn create_ip_address(&self, cidr: &str, interface_id: i64) -> Result<NbIPAddress> {
        self.create_resource("/ipam/ip-addresses/", &IpAddressCreate {
            address: cidr.to_string(),
            assigned_object_type: "dcim.interface".to_string(),
            assigned_object_id: interface_id,
            status: "active".to_string(),
        }).await
    }

    // --- Journal ---

    pub async fn create_journal_entry(&self, device_id: i64, kind: &str, comments: &str) -> Result<()> {
        let _: serde_json::Value = self.create_resource("/extras/journal-entries/", &JournalEntryCreate {
            assigned_object_type: "dcim.device".to_string(),
            assigned_object_id: device_id,
            kind: kind.to_string(),
            comments: comments.to_string(),
        }).await?;
        Ok(())
    }
}
