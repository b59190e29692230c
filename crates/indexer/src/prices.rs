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

//! USD price lookups for pool tokens, cached for 24 hours per
//! `{chain_id}-{token}`. Only the multi-chain campaign prices tokens; the
//! GoodDollar campaign treats its token as fixed-value.

use std::collections::HashMap;

use alloy::primitives::Address;
use gardens_accrual::addr_key;
use serde::Deserialize;
use url::Url;

use crate::{
    cache::{CacheService, PriceEntry},
    unix_now_ms,
};

#[derive(thiserror::Error, Debug)]
pub enum PriceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("no usd price for token {0} on chain {1}")]
    NotFound(String, u64),

    #[error("unsupported chain {0}")]
    UnsupportedChain(u64),
}

#[derive(Deserialize)]
struct TokenPriceData {
    usd: Option<f64>,
}

/// CoinGecko-style token price source.
#[derive(Clone)]
pub struct PriceClient {
    client: reqwest::Client,
    api_url: Url,
    api_key: Option<String>,
}

fn platform_for_chain(chain_id: u64) -> Option<&'static str> {
    match chain_id {
        1 => Some("ethereum"),
        10 => Some("optimistic-ethereum"),
        100 => Some("xdai"),
        137 => Some("polygon-pos"),
        8453 => Some("base"),
        42161 => Some("arbitrum-one"),
        42220 => Some("celo"),
        _ => None,
    }
}

impl PriceClient {
    pub fn new(api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            // The free API rejects requests without a browser user-agent.
            .user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36")
            .build()
            .unwrap_or_default();
        Self { client, api_url: Url::parse("https://api.coingecko.com").unwrap(), api_key }
    }

    /// Point the client at a mock server in tests.
    pub fn with_api_url(mut self, url: Url) -> Self {
        self.api_url = url;
        self
    }

    pub async fn token_usd_price(
        &self,
        chain_id: u64,
        token: Address,
        symbol: &str,
    ) -> Result<f64, PriceError> {
        let platform =
            platform_for_chain(chain_id).ok_or(PriceError::UnsupportedChain(chain_id))?;
        let token_key = addr_key(&token);

        let mut url = self.api_url.clone();
        url.set_path(&format!("api/v3/simple/token_price/{platform}"));
        url.query_pairs_mut()
            .append_pair("contract_addresses", &token_key)
            .append_pair("vs_currencies", "usd");

        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.header("x-cg-demo-api-key", key);
        }
        let response = request.send().await?.error_for_status()?;
        let data: HashMap<String, TokenPriceData> = response.json().await?;

        data.get(&token_key)
            .and_then(|entry| entry.usd)
            .filter(|price| *price > 0.0)
            .ok_or_else(|| PriceError::NotFound(symbol.to_string(), chain_id))
    }
}

/// Cache-backed price lookup; a successful fetch marks the price cache
/// dirty for the end-of-run flush.
pub async fn cached_token_price(
    client: &PriceClient,
    caches: &CacheService,
    chain_id: u64,
    token: Address,
    symbol: &str,
) -> Result<f64, PriceError> {
    let key = format!("{chain_id}-{}", addr_key(&token));
    let now = unix_now_ms();
    if let Some(price) = caches.fresh_price(&key, now) {
        return Ok(price);
    }
    let price = client.token_usd_price(chain_id, token, symbol).await?;
    caches.set_price(key, PriceEntry { price, fetched_at: now, symbol: symbol.to_string() });
    Ok(price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_cache_service;
    use httpmock::prelude::*;

    const TOKEN: Address = Address::repeat_byte(0xbb);

    fn client(server: &MockServer) -> PriceClient {
        PriceClient::new(None).with_api_url(server.base_url().parse().unwrap())
    }

    #[tokio::test]
    async fn fetches_price_by_platform_and_contract() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v3/simple/token_price/polygon-pos")
                .query_param("contract_addresses", &addr_key(&TOKEN))
                .query_param("vs_currencies", "usd");
            then.status(200).json_body(serde_json::json!({
                addr_key(&TOKEN): { "usd": 1.25 }
            }));
        });

        let price = client(&server).token_usd_price(137, TOKEN, "HNY").await.unwrap();
        mock.assert();
        assert_eq!(price, 1.25);
    }

    #[tokio::test]
    async fn missing_price_is_not_found() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path_contains("/api/v3/simple/token_price/");
            then.status(200).json_body(serde_json::json!({}));
        });

        let result = client(&server).token_usd_price(137, TOKEN, "HNY").await;
        assert!(matches!(result, Err(PriceError::NotFound(symbol, 137)) if symbol == "HNY"));
    }

    #[tokio::test]
    async fn cached_price_skips_second_fetch() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path_contains("/api/v3/simple/token_price/");
            then.status(200).json_body(serde_json::json!({
                addr_key(&TOKEN): { "usd": 2.0 }
            }));
        });

        let caches = test_cache_service();
        let client = client(&server);
        let first = cached_token_price(&client, &caches, 137, TOKEN, "HNY").await.unwrap();
        let second = cached_token_price(&client, &caches, 137, TOKEN, "HNY").await.unwrap();
        assert_eq!(first, 2.0);
        assert_eq!(second, 2.0);
        mock.assert_hits(1);
    }

    #[test]
    fn unknown_chain_has_no_platform() {
        assert!(platform_for_chain(5).is_none());
        assert_eq!(platform_for_chain(8453), Some("base"));
    }
}
