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

//! Client for the external points-ledger API: a paginated sweep over all
//! historical events and batched delta pushes.

use gardens_accrual::{addr_key, DeltaEvent};
use serde::Deserialize;
use serde_json::json;
use url::Url;

/// Events are pushed in chunks of this size, awaited batch-by-batch to
/// respect the ledger's rate limits.
pub const PUSH_BATCH_SIZE: usize = 250;
const PAGE_LIMIT: u64 = 100;

#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ledger api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("missing ledger configuration: {0}")]
    Config(String),
}

/// One historical point event as recorded by the ledger. The API has used
/// both `event`/`eventName` and `account`/`address` field pairs over time;
/// both spellings are accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerEvent {
    #[serde(default)]
    event: Option<String>,
    #[serde(default, rename = "eventName")]
    event_name: Option<String>,
    #[serde(default)]
    account: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    pub points: f64,
}

impl LedgerEvent {
    pub fn name(&self) -> &str {
        self.event.as_deref().or(self.event_name.as_deref()).unwrap_or("")
    }

    pub fn account(&self) -> &str {
        self.account.as_deref().or(self.address.as_deref()).unwrap_or("")
    }
}

#[derive(Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<LedgerEvent>,
    pagination: Option<Pagination>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    #[serde(default)]
    has_next_page: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub message: String,
    #[serde(default)]
    pub event_count: u64,
}

#[derive(Clone)]
pub struct LedgerClient {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
    campaign_id: u64,
}

impl LedgerClient {
    pub fn new(base_url: Url, api_key: String, campaign_id: u64) -> Result<Self, LedgerError> {
        if api_key.is_empty() {
            return Err(LedgerError::Config("api key is required".into()));
        }
        if campaign_id == 0 {
            return Err(LedgerError::Config("campaign id is required".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| LedgerError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self { client, base_url, api_key, campaign_id })
    }

    /// Sweep the full event history, page by page.
    pub async fn all_events(&self) -> Result<Vec<LedgerEvent>, LedgerError> {
        let mut events = Vec::new();
        let mut page = 1u64;
        loop {
            let mut url = self
                .base_url
                .join("points/events")
                .map_err(|e| LedgerError::Config(format!("invalid ledger url: {e}")))?;
            url.query_pairs_mut()
                .append_pair("campaignId", &self.campaign_id.to_string())
                .append_pair("limit", &PAGE_LIMIT.to_string())
                .append_pair("page", &page.to_string());

            tracing::debug!(page, "ledger event sweep request");
            let response = self.client.get(url).send().await?;
            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(LedgerError::Api { status: status.as_u16(), message });
            }
            let body: EventsResponse = response.json().await?;
            let count = body.events.len();
            events.extend(body.events);
            tracing::debug!(page, count, total = events.len(), "ledger event sweep page");

            let has_next = body.pagination.is_some_and(|p| p.has_next_page);
            if !has_next || count == 0 {
                break;
            }
            page += 1;
        }
        Ok(events)
    }

    /// Push delta events in batches. Metadata carries the target/existing
    /// pair per category so ledger history is auditable on its own.
    pub async fn send_deltas(&self, deltas: &[DeltaEvent]) -> Result<Vec<PushResponse>, LedgerError> {
        let mut responses = Vec::new();
        for (index, batch) in deltas.chunks(PUSH_BATCH_SIZE).enumerate() {
            tracing::debug!(batch = index, size = batch.len(), "ledger push batch");
            let events: Vec<serde_json::Value> = batch
                .iter()
                .map(|delta| {
                    json!({
                        "eventName": delta.category,
                        "account": addr_key(&delta.account),
                        "points": delta.points,
                        "metadata": {
                            "category": delta.category,
                            "target": delta.target,
                            "existing": delta.existing,
                        },
                    })
                })
                .collect();

            let url = self
                .base_url
                .join("points/push")
                .map_err(|e| LedgerError::Config(format!("invalid ledger url: {e}")))?;
            let response = self
                .client
                .post(url)
                .header("X-API-Key", &self.api_key)
                .json(&json!({ "campaignId": self.campaign_id, "events": events }))
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(LedgerError::Api { status: status.as_u16(), message });
            }
            let parsed: PushResponse = response.json().await?;
            tracing::debug!(batch = index, response = %parsed.message, "ledger push response");
            responses.push(parsed);
        }
        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;
    use httpmock::prelude::*;

    fn client(server: &MockServer) -> LedgerClient {
        LedgerClient::new(server.base_url().parse().unwrap(), "key".into(), 9).unwrap()
    }

    #[test]
    fn construction_fails_fast_without_credentials() {
        let url: Url = "https://ledger.example".parse().unwrap();
        assert!(matches!(
            LedgerClient::new(url.clone(), String::new(), 9),
            Err(LedgerError::Config(_))
        ));
        assert!(matches!(
            LedgerClient::new(url, "key".into(), 0),
            Err(LedgerError::Config(_))
        ));
    }

    #[tokio::test]
    async fn sweep_follows_pagination() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/points/events").query_param("page", "1");
            then.status(200).json_body(serde_json::json!({
                "events": [
                    { "event": "fundPoints", "account": "0x00000000000000000000000000000000000000aa", "points": 5.0 }
                ],
                "pagination": { "hasNextPage": true }
            }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/points/events").query_param("page", "2");
            then.status(200).json_body(serde_json::json!({
                "events": [
                    { "eventName": "streamPoints", "address": "0x00000000000000000000000000000000000000aa", "points": 2.0 }
                ],
                "pagination": { "hasNextPage": false }
            }));
        });

        let events = client(&server).all_events().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name(), "fundPoints");
        assert_eq!(events[1].name(), "streamPoints");
        assert_eq!(events[1].account(), "0x00000000000000000000000000000000000000aa");
    }

    #[tokio::test]
    async fn push_sends_api_key_and_metadata() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/points/push")
                .header("x-api-key", "key")
                .json_body_partial(
                    r#"{"campaignId":9,"events":[{"eventName":"fundPoints","points":10,"metadata":{"target":60,"existing":50}}]}"#,
                );
            then.status(200).json_body(serde_json::json!({
                "message": "accepted", "pushRequestId": 1, "eventCount": 1
            }));
        });

        let deltas = vec![DeltaEvent {
            account: Address::repeat_byte(0xaa),
            category: "fundPoints".into(),
            points: 10,
            target: 60,
            existing: 50,
        }];
        let responses = client(&server).send_deltas(&deltas).await.unwrap();
        mock.assert();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].event_count, 1);
    }

    #[tokio::test]
    async fn push_failure_surfaces_status_and_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/points/push");
            then.status(429).body("slow down");
        });

        let deltas = vec![DeltaEvent {
            account: Address::repeat_byte(0xaa),
            category: "fundPoints".into(),
            points: 1,
            target: 1,
            existing: 0,
        }];
        let result = client(&server).send_deltas(&deltas).await;
        assert!(
            matches!(result, Err(LedgerError::Api { status: 429, message }) if message == "slow down")
        );
    }
}
