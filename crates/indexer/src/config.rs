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

//! Environment-driven configuration. The two campaign variants differ in
//! chains, thresholds, divisors, and the pipeline stage their bonus
//! multiplier applies at; those differences are literal per-variant
//! constants here, never derived from one another.

use std::collections::HashSet;
use std::str::FromStr;

use alloy::primitives::{address, Address};
use gardens_accrual::{CampaignWindow, PointsFormula};
use url::Url;

use crate::{
    cache::CacheNames,
    ledger::{LedgerClient, LedgerError},
    ServiceError,
};

/// 2039-01-01, the open-ended campaign end.
pub const MAX_CAMPAIGN_END: u64 = 2_177_452_800;

const BONUS_COMMUNITY: Address = address!("ec83d957f8aa4e9601bc74608ebcbc862eca52ab");

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_flag(key: &str) -> bool {
    env(key).is_some_and(|v| v.to_lowercase() == "true")
}

fn env_wallets(key: &str) -> HashSet<Address> {
    env(key)
        .map(|raw| {
            raw.split(',')
                .filter_map(|candidate| Address::from_str(candidate.trim()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// How pool amounts become USD.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PriceMode {
    /// Look prices up through the oracle cache.
    Oracle,
    /// The campaign token has a fixed unit value; no oracle involved.
    Fixed(f64),
}

/// Ledger credentials, validated when the run constructs its client.
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub base_url: Url,
    pub api_key: String,
    pub campaign_id: u64,
}

impl LedgerSettings {
    fn from_env(api_key_var: &str, campaign_id_var: &str) -> Self {
        let base_url = env("SUPERFLUID_POINT_API_BASE_URL")
            .and_then(|raw| Url::parse(&raw).ok())
            .unwrap_or_else(|| Url::parse("https://cms.superfluid.pro").unwrap());
        Self {
            base_url,
            api_key: env(api_key_var).unwrap_or_default(),
            campaign_id: env(campaign_id_var).and_then(|raw| raw.parse().ok()).unwrap_or(0),
        }
    }

    pub fn client(&self) -> Result<LedgerClient, LedgerError> {
        LedgerClient::new(self.base_url.clone(), self.api_key.clone(), self.campaign_id)
    }
}

/// Everything that differs between the two campaign routes.
#[derive(Debug, Clone)]
pub struct CampaignSpec {
    /// Route suffix and log prefix.
    pub name: &'static str,
    pub target_chains: Vec<u64>,
    pub bonus_community: Address,
    /// The bonus applies only on this chain (all target chains when unset).
    pub bonus_chain: Option<u64>,
    /// Multiplier on fund and stream contributions of bonus-community pools.
    pub bonus_multiplier: f64,
    /// Per-transfer and per-sender floor below which contributions are
    /// uncounted (USD campaign only).
    pub contribution_min: f64,
    pub price_mode: PriceMode,
    pub formula: PointsFormula,
    /// Whether the pool token must resolve to a Superfluid super token; the
    /// GoodDollar token is its own super token.
    pub require_super_token: bool,
    /// GoodDollar folds the bonus into community totals at the pool stage
    /// and feeds them from counted stream totals; the USD campaign feeds
    /// grand totals and multiplies at distribution instead.
    pub community_bonus_at_pool: bool,
    pub distribution_divisor: f64,
    pub distribution_bonus_multiplier: f64,
    /// Adopt category names observed in ledger history.
    pub adopt_ledger_categories: bool,
    /// Also resolve Farcaster usernames per address (verification lookup),
    /// not only through the follower sweep.
    pub resolve_usernames_by_address: bool,
    pub excluded_wallets: HashSet<Address>,
    pub dry_run: bool,
    pub skip_identity_resolution: bool,
    pub pin_run_logs: bool,
    pub allow_cache_writes: bool,
    pub cache_names: CacheNames,
    pub creation_cache_cid: Option<String>,
    pub transfer_cache_cid: Option<String>,
    pub snapshot_cid: Option<String>,
    pub farcaster_account: String,
    pub ledger: LedgerSettings,
}

impl CampaignSpec {
    /// Multi-chain USD campaign behind `/api/superfluid-points`.
    pub fn usd_campaign() -> Self {
        Self {
            name: "superfluid-points",
            target_chains: vec![137, 42220, 8453, 100, 42161, 10],
            bonus_community: BONUS_COMMUNITY,
            bonus_chain: Some(8453),
            bonus_multiplier: env("SUPERFLUID_BONUS_MULTIPLIER")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(3.0),
            contribution_min: 10.0,
            price_mode: PriceMode::Oracle,
            formula: PointsFormula::usd_campaign(),
            require_super_token: true,
            community_bonus_at_pool: false,
            distribution_divisor: 1.0,
            distribution_bonus_multiplier: env("SUPERFLUID_BONUS_MULTIPLIER")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(3.0),
            adopt_ledger_categories: true,
            resolve_usernames_by_address: false,
            excluded_wallets: env_wallets("SUPERFLUID_EXCLUDE_WALLETS"),
            dry_run: env_flag("STACK_DRY_RUN"),
            skip_identity_resolution: env_flag("SUPERFLUID_SKIP_IDENTITY_RESOLUTION"),
            pin_run_logs: env_flag("SUPERFLUID_PIN_RUN_LOGS"),
            allow_cache_writes: true,
            cache_names: CacheNames {
                creation_blocks: env("SUPERFLUID_BLOCK_CACHE_NAME")
                    .unwrap_or_else(|| "superfluid-creation-blocks".into()),
                transfer_logs: env("SUPERFLUID_TRANSFER_CACHE_NAME")
                    .unwrap_or_else(|| "superfluid-transfer-logs".into()),
                prices: env("SUPERFLUID_PRICE_CACHE_NAME")
                    .unwrap_or_else(|| "superfluid-token-prices".into()),
                snapshot: "superfluid-activity-points".into(),
                run_log: "superfluid-points-run-logs".into(),
            },
            creation_cache_cid: env("SUPERFLUID_BLOCK_CACHE_CID"),
            transfer_cache_cid: env("SUPERFLUID_TRANSFER_CACHE_CID"),
            snapshot_cid: env("SUPERFLUID_POINTS_SNAPSHOT_CID"),
            farcaster_account: env("FARCASTER_GARDENS_USERNAME")
                .unwrap_or_else(|| "gardens".into()),
            ledger: LedgerSettings::from_env(
                "SUPERFLUID_POINT_API_KEY",
                "SUPERFLUID_POINT_SYSTEM_ID",
            ),
        }
    }

    /// Celo GoodDollar campaign behind `/api/superfluid-points-gd`. The G$
    /// token is fixed-value and points divide by 1000; this route reuses
    /// the shared chain caches read-only.
    pub fn gooddollar_campaign() -> Self {
        Self {
            name: "superfluid-points-gd",
            target_chains: vec![42220],
            bonus_community: env("SUPERFLUID_GD_BONUS_COMMUNITY")
                .and_then(|raw| Address::from_str(&raw).ok())
                .unwrap_or(BONUS_COMMUNITY),
            bonus_chain: None,
            bonus_multiplier: 2.0,
            contribution_min: 0.0,
            price_mode: PriceMode::Fixed(1.0),
            formula: PointsFormula::gooddollar_campaign(),
            require_super_token: false,
            community_bonus_at_pool: true,
            distribution_divisor: 1000.0,
            distribution_bonus_multiplier: 2.0,
            adopt_ledger_categories: false,
            resolve_usernames_by_address: true,
            excluded_wallets: env_wallets("SUPERFLUID_EXCLUDE_WALLETS_GD"),
            dry_run: env_flag("SUPERFLUID_POINT_GD_DRY_RUN") || env_flag("STACK_DRY_RUN"),
            skip_identity_resolution: env_flag("SUPERFLUID_SKIP_IDENTITY_RESOLUTION"),
            pin_run_logs: env_flag("SUPERFLUID_PIN_RUN_LOGS"),
            allow_cache_writes: false,
            cache_names: CacheNames {
                creation_blocks: env("SUPERFLUID_BLOCK_CACHE_NAME")
                    .unwrap_or_else(|| "superfluid-creation-blocks".into()),
                transfer_logs: env("SUPERFLUID_TRANSFER_CACHE_NAME")
                    .unwrap_or_else(|| "superfluid-transfer-logs".into()),
                prices: env("SUPERFLUID_PRICE_CACHE_NAME")
                    .unwrap_or_else(|| "superfluid-token-prices".into()),
                snapshot: "superfluid-activity-points-gd".into(),
                run_log: "superfluid-points-run-logs-gd".into(),
            },
            creation_cache_cid: env("SUPERFLUID_BLOCK_CACHE_CID"),
            transfer_cache_cid: env("SUPERFLUID_TRANSFER_CACHE_CID"),
            snapshot_cid: env("SUPERFLUID_GD_POINTS_SNAPSHOT_CID")
                .or_else(|| env("SUPERFLUID_POINTS_SNAPSHOT_CID")),
            farcaster_account: env("FARCASTER_GOODDOLLAR_USERNAME")
                .unwrap_or_else(|| "gooddollar".into()),
            ledger: LedgerSettings::from_env(
                "SUPERFLUID_POINT_GD_API_KEY",
                "SUPERFLUID_POINT_GD_SYSTEM_ID",
            ),
        }
    }

    pub fn bonus_applies_on(&self, chain_id: u64) -> bool {
        self.bonus_chain.is_none_or(|bonus_chain| bonus_chain == chain_id)
    }
}

fn chain_slug(chain_id: u64) -> Option<&'static str> {
    match chain_id {
        1 => Some("MAINNET"),
        10 => Some("OPTIMISM"),
        100 => Some("GNOSIS"),
        137 => Some("POLYGON"),
        8453 => Some("BASE"),
        42161 => Some("ARBITRUM"),
        42220 => Some("CELO"),
        _ => None,
    }
}

/// Per-chain endpoints: RPC plus the governance subgraph (with optional
/// fallback) and the Superfluid protocol subgraph.
#[derive(Debug, Clone)]
pub struct ChainTarget {
    pub chain_id: u64,
    pub rpc_url: Url,
    pub subgraph_url: Url,
    pub fallback_subgraph_url: Option<Url>,
    pub superfluid_subgraph_url: Url,
}

impl ChainTarget {
    pub fn from_env(chain_id: u64) -> Result<Self, ServiceError> {
        let slug = chain_slug(chain_id)
            .ok_or_else(|| ServiceError::Config(format!("unknown chain {chain_id}")))?;
        let required = |key: String| -> Result<Url, ServiceError> {
            let raw = env(&key)
                .ok_or_else(|| ServiceError::Config(format!("missing {key} for chain {chain_id}")))?;
            Url::parse(&raw)
                .map_err(|e| ServiceError::Config(format!("invalid {key}: {e}")))
        };

        Ok(Self {
            chain_id,
            rpc_url: required(format!("RPC_URL_{slug}"))?,
            subgraph_url: required(format!("SUBGRAPH_URL_{slug}"))?,
            fallback_subgraph_url: env(&format!("SUBGRAPH_FALLBACK_URL_{slug}"))
                .and_then(|raw| Url::parse(&raw).ok()),
            superfluid_subgraph_url: required(format!("SUPERFLUID_SUBGRAPH_URL_{slug}"))?,
        })
    }
}

/// Shared process configuration read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub cron_secret: String,
    pub window: CampaignWindow,
    pub pinata_api_url: Url,
    pub pinata_jwt: Option<String>,
    pub ipfs_gateway: Option<Url>,
    pub pinata_group_id: Option<String>,
    pub farcaster_api_key: Option<String>,
    pub coingecko_api_key: Option<String>,
    pub notion_token: Option<String>,
    pub notion_db_id: Option<String>,
    pub notion_gd_db_id: Option<String>,
    pub notion_data_source_id: Option<String>,
    pub mainnet_rpc_url: Option<Url>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ServiceError> {
        let cron_secret = env("CRON_SECRET")
            .ok_or_else(|| ServiceError::Config("CRON_SECRET is required".into()))?;

        let start = env("SUPERFLUID_CAMPAIGN_START_TIMESTAMP")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0);
        let end = env("SUPERFLUID_CAMPAIGN_END_TIMESTAMP")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(MAX_CAMPAIGN_END);

        Ok(Self {
            cron_secret,
            window: CampaignWindow::new(start, end),
            pinata_api_url: env("PINATA_API_URL")
                .and_then(|raw| Url::parse(&raw).ok())
                .unwrap_or_else(|| Url::parse("https://api.pinata.cloud").unwrap()),
            pinata_jwt: env("PINATA_JWT"),
            ipfs_gateway: env("IPFS_GATEWAY")
                .and_then(|host| Url::parse(&format!("https://{host}")).ok()),
            pinata_group_id: env("PINATA_GROUP_ID"),
            farcaster_api_key: env("FARCASTER_API_KEY"),
            coingecko_api_key: env("COINGECKO_API_KEY"),
            notion_token: env("NOTION_TOKEN"),
            notion_db_id: env("NOTION_DB_ID"),
            notion_gd_db_id: env("NOTION_GD_DB_ID"),
            notion_data_source_id: env("NOTION_DATA_SOURCE_ID"),
            mainnet_rpc_url: env("RPC_URL_MAINNET").and_then(|raw| Url::parse(&raw).ok()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_keep_their_own_constants() {
        let usd = CampaignSpec::usd_campaign();
        assert_eq!(usd.target_chains.len(), 6);
        assert_eq!(usd.contribution_min, 10.0);
        assert_eq!(usd.distribution_divisor, 1.0);
        assert!(usd.adopt_ledger_categories);
        assert!(usd.allow_cache_writes);

        let gd = CampaignSpec::gooddollar_campaign();
        assert_eq!(gd.target_chains, vec![42220]);
        assert_eq!(gd.contribution_min, 0.0);
        assert_eq!(gd.distribution_divisor, 1000.0);
        assert_eq!(gd.bonus_multiplier, 2.0);
        assert!(!gd.adopt_ledger_categories);
        assert!(!gd.allow_cache_writes);
        assert_eq!(gd.price_mode, PriceMode::Fixed(1.0));
    }

    #[test]
    fn bonus_chain_gates_the_multiplier() {
        let usd = CampaignSpec::usd_campaign();
        assert!(usd.bonus_applies_on(8453));
        assert!(!usd.bonus_applies_on(137));

        let gd = CampaignSpec::gooddollar_campaign();
        assert!(gd.bonus_applies_on(42220));
    }

    #[test]
    fn unknown_chain_target_is_a_config_error() {
        assert!(ChainTarget::from_env(555).is_err());
    }
}
