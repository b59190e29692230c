// Copyright 2026 Gardens Foundation
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Content-addressed blob persistence. Caches and snapshots are pinned as
//! JSON documents; rediscovery on cold start goes through the store's
//! listing API filtered by logical name and campaign version.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid store configuration: {0}")]
    Config(String),
}

/// Pinning/listing/read access to the content store.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Pin a JSON document under a logical name with searchable key-values;
    /// returns the content identifier.
    async fn pin_json(
        &self,
        name: &str,
        keyvalues: &BTreeMap<String, String>,
        payload: &serde_json::Value,
    ) -> Result<String, StoreError>;

    /// Most recently pinned CID for `name`, optionally restricted to a
    /// matching `campaignVersion` tag.
    async fn find_latest(
        &self,
        name: &str,
        campaign_version: Option<&str>,
    ) -> Result<Option<String>, StoreError>;

    /// Read a pinned document back through the gateway. `None` when the
    /// gateway cannot serve the CID.
    async fn fetch_json(&self, cid: &str) -> Result<Option<serde_json::Value>, StoreError>;
}

/// Pinata-style pinning service.
#[derive(Clone)]
pub struct PinataStore {
    client: reqwest::Client,
    api_base: Url,
    gateway: Url,
    jwt: String,
    group_id: Option<String>,
}

#[derive(Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

#[derive(Deserialize)]
struct PinListResponse {
    rows: Option<Vec<PinListRow>>,
}

#[derive(Deserialize)]
struct PinListRow {
    ipfs_pin_hash: String,
}

impl PinataStore {
    pub fn new(
        api_base: Url,
        gateway: Url,
        jwt: String,
        group_id: Option<String>,
    ) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| StoreError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self { client, api_base, gateway, jwt, group_id })
    }

    fn endpoint(&self, path: &str) -> Result<Url, StoreError> {
        self.api_base
            .join(path)
            .map_err(|e| StoreError::Config(format!("invalid store url: {e}")))
    }
}

#[async_trait]
impl ContentStore for PinataStore {
    async fn pin_json(
        &self,
        name: &str,
        keyvalues: &BTreeMap<String, String>,
        payload: &serde_json::Value,
    ) -> Result<String, StoreError> {
        let url = self.endpoint("pinning/pinJSONToIPFS")?;
        let mut body = json!({
            "pinataContent": payload,
            "pinataMetadata": { "name": name, "keyvalues": keyvalues },
        });
        if let Some(group_id) = &self.group_id {
            body["pinataOptions"] = json!({ "groupId": group_id });
        }

        let response =
            self.client.post(url).bearer_auth(&self.jwt).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::Api { status: status.as_u16(), message });
        }
        let pinned: PinResponse = response.json().await?;
        Ok(pinned.ipfs_hash)
    }

    async fn find_latest(
        &self,
        name: &str,
        campaign_version: Option<&str>,
    ) -> Result<Option<String>, StoreError> {
        let mut url = self.endpoint("data/pinList")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("status", "pinned");
            query.append_pair("metadata[name]", name);
            query.append_pair("pageLimit", "1");
            query.append_pair("pageOffset", "0");
            if let Some(version) = campaign_version {
                query.append_pair(
                    "metadata[keyvalues]",
                    &json!({ "campaignVersion": { "value": version, "op": "eq" } }).to_string(),
                );
            }
        }

        let response = self.client.get(url).bearer_auth(&self.jwt).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::Api { status: status.as_u16(), message });
        }
        let listing: PinListResponse = response.json().await?;
        Ok(listing.rows.unwrap_or_default().into_iter().next().map(|row| row.ipfs_pin_hash))
    }

    async fn fetch_json(&self, cid: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let url = self
            .gateway
            .join(&format!("ipfs/{cid}"))
            .map_err(|e| StoreError::Config(format!("invalid gateway url: {e}")))?;
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            tracing::warn!(cid, status = %response.status(), "content store fetch failed");
            return Ok(None);
        }
        Ok(Some(response.json().await?))
    }
}

/// In-memory store used by tests; assigns sequential CIDs.
#[derive(Default)]
pub struct MemoryStore {
    inner: std::sync::Mutex<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    next_id: u64,
    pins: Vec<MemoryPin>,
}

struct MemoryPin {
    cid: String,
    name: String,
    keyvalues: BTreeMap<String, String>,
    payload: serde_json::Value,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pinned_names(&self) -> Vec<String> {
        self.inner.lock().unwrap().pins.iter().map(|pin| pin.name.clone()).collect()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn pin_json(
        &self,
        name: &str,
        keyvalues: &BTreeMap<String, String>,
        payload: &serde_json::Value,
    ) -> Result<String, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let cid = format!("bafy-test-{}", inner.next_id);
        inner.pins.push(MemoryPin {
            cid: cid.clone(),
            name: name.to_string(),
            keyvalues: keyvalues.clone(),
            payload: payload.clone(),
        });
        Ok(cid)
    }

    async fn find_latest(
        &self,
        name: &str,
        campaign_version: Option<&str>,
    ) -> Result<Option<String>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .pins
            .iter()
            .rev()
            .find(|pin| {
                pin.name == name
                    && campaign_version
                        .is_none_or(|v| pin.keyvalues.get("campaignVersion").map(String::as_str) == Some(v))
            })
            .map(|pin| pin.cid.clone()))
    }

    async fn fetch_json(&self, cid: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.pins.iter().find(|pin| pin.cid == cid).map(|pin| pin.payload.clone()))
    }
}
