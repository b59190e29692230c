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

//! Mirrors wallet point rows into a Notion database. Writes are
//! checksum-skipped for idempotence, batched with an adaptive inter-batch
//! delay, and rows for wallets that left the target set are archived, not
//! deleted. Sync failures are counted and reported, never fatal.

use std::collections::HashMap;
use std::sync::Mutex;

use alloy::primitives::Address;
use gardens_accrual::{addr_key, PointTargets};
use serde::Serialize;
use serde_json::{json, Value};
use url::Url;

const NOTION_VERSION: &str = "2025-09-03";
const BATCH_SIZE: usize = 50;
const INITIAL_DELAY_MS: u64 = 350;
const MIN_DELAY_MS: u64 = 200;
const MAX_DELAY_MS: u64 = 10_000;

/// One row to mirror.
#[derive(Debug, Clone)]
pub struct WalletRow {
    pub address: Address,
    pub targets: PointTargets,
}

impl WalletRow {
    pub fn checksum(&self) -> String {
        self.targets.checksum(&self.address)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotionSyncSummary {
    pub attempted: bool,
    pub success: bool,
    pub processed: usize,
    pub failed: usize,
    pub archived: usize,
}

#[derive(Debug, Clone)]
struct ExistingPage {
    page_id: String,
    checksum: Option<String>,
    archived: bool,
}

#[derive(Default)]
struct NotionState {
    data_source_id: Option<String>,
    checksum_ensured: bool,
    disabled: bool,
}

/// Grow the inter-batch delay on failure, decay it on sustained success.
fn next_delay(current_ms: u64, success: bool) -> u64 {
    if success {
        ((current_ms as f64 * 0.85) as u64).max(MIN_DELAY_MS)
    } else {
        (current_ms * 2).min(MAX_DELAY_MS)
    }
}

pub struct NotionClient {
    client: reqwest::Client,
    api_url: Url,
    token: String,
    database_id: String,
    state: Mutex<NotionState>,
}

impl NotionClient {
    pub fn new(token: String, database_id: String, data_source_id: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        let state =
            NotionState { data_source_id, checksum_ensured: false, disabled: false };
        Self {
            client,
            api_url: Url::parse("https://api.notion.com").unwrap(),
            token,
            database_id: normalize_database_id(&database_id),
            state: Mutex::new(state),
        }
    }

    pub fn with_api_url(mut self, url: Url) -> Self {
        self.api_url = url;
        self
    }

    pub fn disabled(&self) -> bool {
        self.state.lock().unwrap().disabled
    }

    fn request(&self, method: reqwest::Method, path: &str) -> Option<reqwest::RequestBuilder> {
        let url = self.api_url.join(path).ok()?;
        Some(
            self.client
                .request(method, url)
                .bearer_auth(&self.token)
                .header("Notion-Version", NOTION_VERSION),
        )
    }

    fn note_error(&self, body: &Value) {
        let code = body.get("code").and_then(|c| c.as_str()).unwrap_or("");
        let message = body.get("message").and_then(|m| m.as_str()).unwrap_or("");
        if code == "invalid_request_url" || message.to_lowercase().contains("could not find database")
        {
            tracing::error!(code, message, "notion unreachable, disabling sync for this run");
            self.state.lock().unwrap().disabled = true;
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Option<Value> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(%error, "notion request error");
                return None;
            }
        };
        let status = response.status();
        let body: Value = response.json().await.ok()?;
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), body = %body, "notion api error");
            self.note_error(&body);
            return None;
        }
        Some(body)
    }

    async fn ensure_data_source_id(&self) -> Option<String> {
        if let Some(id) = self.state.lock().unwrap().data_source_id.clone() {
            return Some(id);
        }
        let request =
            self.request(reqwest::Method::GET, &format!("v1/databases/{}", self.database_id))?;
        let body = self.send(request).await?;
        let id = body
            .get("data_sources")
            .and_then(|sources| sources.as_array())
            .and_then(|sources| sources.first())
            .and_then(|source| source.get("id"))
            .and_then(|id| id.as_str())
            .map(String::from)?;
        self.state.lock().unwrap().data_source_id = Some(id.clone());
        Some(id)
    }

    /// The checksum column is this pipeline's idempotence marker; create it
    /// when the database predates it.
    async fn ensure_checksum_property(&self) -> bool {
        if self.state.lock().unwrap().checksum_ensured {
            return true;
        }
        let Some(request) =
            self.request(reqwest::Method::GET, &format!("v1/databases/{}", self.database_id))
        else {
            return false;
        };
        let Some(body) = self.send(request).await else { return false };
        let has_checksum = body
            .pointer("/properties/Checksum/type")
            .and_then(|t| t.as_str())
            .is_some_and(|t| t == "rich_text");
        if !has_checksum {
            let Some(request) = self
                .request(reqwest::Method::PATCH, &format!("v1/databases/{}", self.database_id))
            else {
                return false;
            };
            if self
                .send(request.json(&json!({ "properties": { "Checksum": { "rich_text": {} } } })))
                .await
                .is_none()
            {
                return false;
            }
            tracing::info!(database = %self.database_id, "added checksum property to notion database");
        }
        self.state.lock().unwrap().checksum_ensured = true;
        true
    }

    async fn query(&self, body: Value) -> Option<Value> {
        if self.disabled() {
            return None;
        }
        let data_source_id = self.ensure_data_source_id().await?;
        let request = self
            .request(reqwest::Method::POST, &format!("v1/data_sources/{data_source_id}/query"))?;
        self.send(request.json(&body)).await
    }

    async fn load_existing_pages(&self) -> HashMap<String, ExistingPage> {
        let mut pages = HashMap::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut body = json!({ "page_size": 50 });
            if let Some(cursor) = &cursor {
                body["start_cursor"] = json!(cursor);
            }
            let Some(response) = self.query(body).await else { break };
            for page in response.get("results").and_then(|r| r.as_array()).unwrap_or(&vec![]) {
                let Some(page_id) = page.get("id").and_then(|id| id.as_str()) else { continue };
                let Some(wallet) = page
                    .pointer("/properties/Wallet/title/0/plain_text")
                    .and_then(|w| w.as_str())
                else {
                    continue;
                };
                let checksum = page
                    .pointer("/properties/Checksum/rich_text/0/plain_text")
                    .and_then(|c| c.as_str())
                    .map(String::from);
                let archived =
                    page.get("archived").and_then(|a| a.as_bool()).unwrap_or(false);
                pages.insert(
                    wallet.to_lowercase(),
                    ExistingPage { page_id: page_id.to_string(), checksum, archived },
                );
            }
            cursor = response
                .get("next_cursor")
                .and_then(|c| c.as_str())
                .map(String::from);
            if cursor.is_none() {
                break;
            }
        }
        tracing::info!(count = pages.len(), "notion existing pages fetched");
        pages
    }

    fn row_properties(row: &WalletRow) -> Value {
        json!({
            "Wallet": { "title": [{ "text": { "content": addr_key(&row.address) } }] },
            "Add Funds": { "number": row.targets.fund },
            "Stream Funds": { "number": row.targets.stream },
            "Governance Stake": { "number": row.targets.governance },
            "Farcaster": { "number": row.targets.farcaster },
            "Total Pts": { "number": row.targets.total() },
            "Checksum": { "rich_text": [{ "text": { "content": row.checksum() } }] },
        })
    }

    /// Create or update one wallet row; unchanged checksums skip the write.
    async fn upsert_wallet(&self, row: &WalletRow, existing: Option<&ExistingPage>) -> bool {
        if self.disabled() {
            return false;
        }
        match existing {
            Some(page) => {
                if page.checksum.as_deref() == Some(row.checksum().as_str()) {
                    return true;
                }
                if page.archived {
                    let Some(request) = self
                        .request(reqwest::Method::PATCH, &format!("v1/pages/{}", page.page_id))
                    else {
                        return false;
                    };
                    if self.send(request.json(&json!({ "archived": false }))).await.is_none() {
                        tracing::warn!(page = %page.page_id, "failed to unarchive notion page");
                    }
                }
                let Some(request) =
                    self.request(reqwest::Method::PATCH, &format!("v1/pages/{}", page.page_id))
                else {
                    return false;
                };
                self.send(request.json(&json!({ "properties": Self::row_properties(row) })))
                    .await
                    .is_some()
            }
            None => {
                let Some(data_source_id) = self.ensure_data_source_id().await else {
                    return false;
                };
                let Some(request) = self.request(reqwest::Method::POST, "v1/pages") else {
                    return false;
                };
                self.send(request.json(&json!({
                    "parent": { "type": "data_source_id", "data_source_id": data_source_id },
                    "properties": Self::row_properties(row),
                })))
                .await
                .is_some()
            }
        }
    }

    async fn archive_page(&self, page_id: &str) -> bool {
        let Some(request) = self.request(reqwest::Method::PATCH, &format!("v1/pages/{page_id}"))
        else {
            return false;
        };
        self.send(request.json(&json!({ "archived": true }))).await.is_some()
    }

    /// Mirror the full row set: upsert current wallets in batches, then
    /// archive rows whose wallet vanished from the target set.
    pub async fn sync(&self, rows: &[WalletRow]) -> NotionSyncSummary {
        let mut summary = NotionSyncSummary { attempted: true, ..Default::default() };
        if self.disabled() {
            return summary;
        }
        if !self.ensure_checksum_property().await {
            tracing::warn!("checksum column missing and could not be created, skipping notion sync");
            summary.failed = rows.len();
            return summary;
        }

        let existing = self.load_existing_pages().await;
        let mut seen: Vec<String> = Vec::with_capacity(rows.len());
        let mut delay_ms = INITIAL_DELAY_MS;

        tracing::info!(count = rows.len(), "syncing wallet points to notion");
        for batch in rows.chunks(BATCH_SIZE) {
            let results = futures_util::future::join_all(batch.iter().map(|row| {
                let key = addr_key(&row.address);
                seen.push(key.clone());
                self.upsert_wallet(row, existing.get(&key))
            }))
            .await;

            let batch_failed = results.iter().filter(|ok| !**ok).count();
            summary.processed += results.len();
            summary.failed += batch_failed;
            delay_ms = next_delay(delay_ms, batch_failed == 0);
            tracing::debug!(
                processed = summary.processed,
                failed = summary.failed,
                delay_ms,
                "notion batch complete"
            );
            if summary.processed < rows.len() {
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            }
        }

        for (wallet, page) in &existing {
            if !seen.contains(wallet) && !page.archived && self.archive_page(&page.page_id).await
            {
                summary.archived += 1;
            }
        }
        if summary.archived > 0 {
            tracing::info!(archived = summary.archived, "notion archived removed rows");
        }

        summary.success = summary.failed == 0;
        summary
    }
}

fn normalize_database_id(raw: &str) -> String {
    let trimmed = raw.trim();
    let compact: String = trimmed.chars().filter(|c| *c != '-').collect();
    if compact.len() == 32 && compact.chars().all(|c| c.is_ascii_hexdigit()) {
        compact.to_lowercase()
    } else {
        trimmed.to_string()
    }
}
