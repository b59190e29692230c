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

//! Per-chain accrual: resolves the campaign window to blocks, walks every
//! qualifying pool for direct transfers and stream totals, folds pool
//! amounts into community totals, and distributes governance-stake points
//! to members by stake share.
//!
//! Failures of a chain's foundational queries (block bounds, pools,
//! communities) fail the chain; failures scoped to one pool (missing
//! price, unresolved super token, log-fetch errors) skip that pool and are
//! recorded, never fatal.

use std::collections::{HashMap, HashSet};

use alloy::primitives::{
    utils::{format_units, ParseUnits},
    Address, U256,
};
use gardens_accrual::{
    accrue_streams, addr_key, ActivityKind, CampaignWindow, WalletActivity, WalletTotals,
};
use serde::Serialize;
use std::str::FromStr;

use crate::{
    blocks,
    cache::CacheService,
    chain::ChainClient,
    config::{CampaignSpec, PriceMode},
    prices::{cached_token_price, PriceClient},
    subgraph::{Community, SubgraphClient, SuperToken},
    transfer_logs::{self, DEFAULT_MAX_RANGE},
    ServiceError,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingPrice {
    pub address: Address,
    pub symbol: String,
    pub chain_id: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NativePool {
    pub pool_address: Address,
    pub token: Address,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedPrice {
    pub token: Address,
    pub symbol: String,
    pub price_usd: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedPool {
    pub pool_address: String,
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superfluid_token: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedCommunity {
    pub community_id: String,
    pub community_name: Option<String>,
    pub fund_amount: f64,
    pub stream_amount: f64,
    pub pools: Vec<ProcessedPool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityBreakdown {
    pub community_id: String,
    pub community_name: Option<String>,
    pub fund_amount: f64,
    pub stream_amount: f64,
    pub pools: usize,
    pub members: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainDebug {
    pub chain_id: u64,
    pub pools_processed: usize,
    pub flow_update_count: usize,
    pub governance_stake_count: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockBounds {
    pub start_block: u64,
    pub end_block: u64,
}

/// Everything one chain contributes to the cross-chain merge.
pub struct ChainOutcome {
    pub totals: HashMap<Address, WalletTotals>,
    pub governance_points: HashMap<Address, f64>,
    pub activities: HashMap<Address, Vec<WalletActivity>>,
    pub bonus_members: HashSet<Address>,
    pub missing_prices: Vec<MissingPrice>,
    pub fetched_prices: Vec<FetchedPrice>,
    pub native_pools: Vec<NativePool>,
    pub processed_communities: Vec<ProcessedCommunity>,
    pub community_breakdown: Vec<CommunityBreakdown>,
    pub stream_totals_by_pool: HashMap<String, f64>,
    pub block_bounds: BlockBounds,
    pub debug: ChainDebug,
}

struct CommunityAccrual {
    fund: f64,
    stream: f64,
    community_index: usize,
    is_bonus: bool,
}

pub struct ChainProcessor<'a> {
    pub spec: &'a CampaignSpec,
    pub window: CampaignWindow,
    pub now: u64,
    pub chain: &'a dyn ChainClient,
    pub subgraph: &'a SubgraphClient,
    pub superfluid: &'a SubgraphClient,
    pub caches: &'a CacheService,
    pub prices: Option<&'a PriceClient>,
}

fn units_to_f64(value: U256, decimals: u8) -> f64 {
    format_units(ParseUnits::U256(value), decimals)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn stake_share(staked: U256, total: U256) -> f64 {
    let staked: f64 = staked.to_string().parse().unwrap_or(0.0);
    let total: f64 = total.to_string().parse().unwrap_or(0.0);
    if total > 0.0 {
        staked / total
    } else {
        0.0
    }
}

impl<'a> ChainProcessor<'a> {
    pub async fn process(&self) -> Result<ChainOutcome, ServiceError> {
        let chain_id = self.chain.chain_id();

        let (mut start_block, mut end_block) = tokio::try_join!(
            blocks::find_block_at_or_after(self.chain, self.window.start),
            blocks::find_block_at_or_before(self.chain, self.window.end),
        )?;
        let latest = self.chain.latest_block().await?;
        start_block = start_block.min(latest);
        end_block = end_block.min(latest);

        tracing::info!(chain_id, start_block, end_block, "fetching pools");
        let pools = self.subgraph.fetch_pools().await?;
        tracing::info!(chain_id, pools = pools.len(), "fetching communities");
        let communities = self.subgraph.fetch_communities().await?;

        let bonus_on_chain = self.spec.bonus_applies_on(chain_id);
        let mut outcome = ChainOutcome {
            totals: HashMap::new(),
            governance_points: HashMap::new(),
            activities: HashMap::new(),
            bonus_members: HashSet::new(),
            missing_prices: Vec::new(),
            fetched_prices: Vec::new(),
            native_pools: Vec::new(),
            processed_communities: Vec::new(),
            community_breakdown: Vec::new(),
            stream_totals_by_pool: HashMap::new(),
            block_bounds: BlockBounds { start_block, end_block },
            debug: ChainDebug {
                chain_id,
                pools_processed: 0,
                flow_update_count: 0,
                governance_stake_count: 0,
            },
        };

        let mut community_by_pool: HashMap<Address, usize> = HashMap::new();
        for (index, community) in communities.iter().enumerate() {
            if bonus_on_chain && self.is_bonus_community(community) {
                for member in &community.members {
                    outcome.bonus_members.insert(member.member_address);
                }
            }
            for pool in &community.strategies {
                community_by_pool.insert(pool.id, index);
            }
        }

        let mut super_token_cache: HashMap<Address, SuperToken> = HashMap::new();
        let mut decimals_cache: HashMap<Address, u8> = HashMap::new();
        let mut community_totals: HashMap<String, CommunityAccrual> = HashMap::new();
        let mut processed: HashMap<String, ProcessedCommunity> = HashMap::new();

        for pool in &pools {
            outcome.debug.pools_processed += 1;
            let pool_address = pool.id;
            let token = pool.token;
            if pool.is_signaling() {
                tracing::warn!(
                    chain_id,
                    pool = %addr_key(&pool_address),
                    "skipping signaling pool"
                );
                continue;
            }

            // Price and super-token resolution; each miss skips the pool.
            let (price, same_as_underlying, superfluid_token) = match self.spec.price_mode {
                PriceMode::Oracle => {
                    let symbol = match self.chain.token_symbol(token).await {
                        Ok(symbol) => symbol,
                        Err(error) => {
                            tracing::warn!(token = %addr_key(&token), %error, "symbol lookup failed, using address");
                            addr_key(&token)
                        }
                    };
                    let Some(price_client) = self.prices else {
                        outcome.missing_prices.push(MissingPrice {
                            address: token,
                            symbol,
                            chain_id,
                        });
                        continue;
                    };
                    let price = match cached_token_price(
                        price_client,
                        self.caches,
                        chain_id,
                        token,
                        &symbol,
                    )
                    .await
                    {
                        Ok(price) => price,
                        Err(error) => {
                            tracing::warn!(token = %addr_key(&token), %error, "price lookup failed");
                            outcome.missing_prices.push(MissingPrice {
                                address: token,
                                symbol,
                                chain_id,
                            });
                            continue;
                        }
                    };
                    outcome.fetched_prices.push(FetchedPrice {
                        token,
                        symbol,
                        price_usd: price,
                    });

                    let super_token = match super_token_cache.get(&token) {
                        Some(cached) => Some(cached.clone()),
                        None => match self.superfluid.resolve_super_token(token).await {
                            Ok(Some(resolved)) => {
                                super_token_cache.insert(token, resolved.clone());
                                Some(resolved)
                            }
                            Ok(None) => None,
                            Err(error) => {
                                tracing::warn!(token = %addr_key(&token), %error, "super token resolution failed");
                                None
                            }
                        },
                    };
                    let Some(super_token) = super_token else {
                        tracing::warn!(
                            chain_id,
                            token = %addr_key(&token),
                            "super token not found, skipping pool"
                        );
                        continue;
                    };
                    if super_token.same_as_underlying {
                        outcome
                            .native_pools
                            .push(NativePool { pool_address, token });
                    }
                    let has_configured = pool.config.superfluid_token.is_some();
                    if !has_configured && !super_token.same_as_underlying {
                        tracing::warn!(
                            chain_id,
                            pool = %addr_key(&pool_address),
                            "no superfluid token configured and token is not a native super token, skipping"
                        );
                        continue;
                    }
                    let superfluid_token =
                        pool.config.superfluid_token.unwrap_or(super_token.id);
                    (price, super_token.same_as_underlying, superfluid_token)
                }
                PriceMode::Fixed(unit_value) => {
                    // The campaign token is its own super token.
                    outcome
                        .native_pools
                        .push(NativePool { pool_address, token });
                    (unit_value, true, token)
                }
            };

            let super_decimals =
                self.cached_decimals(&mut decimals_cache, superfluid_token).await;
            let token_decimals = if same_as_underlying {
                self.cached_decimals(&mut decimals_cache, token).await
            } else {
                super_decimals
            };

            let creation_block = match self.cached_creation_block(pool_address, start_block).await
            {
                Ok(creation_block) => creation_block,
                Err(error) => {
                    tracing::warn!(pool = %addr_key(&pool_address), %error, "creation block search failed, skipping pool");
                    continue;
                }
            };
            let pool_start = creation_block
                .filter(|block| *block > start_block)
                .unwrap_or(start_block);
            if pool_start > end_block {
                tracing::warn!(
                    chain_id,
                    pool = %addr_key(&pool_address),
                    creation_block = ?creation_block,
                    window_end = end_block,
                    "skipping pool created after window"
                );
                continue;
            }

            let community_index = community_by_pool.get(&pool_address).copied();
            let community = community_index.map(|index| &communities[index]);
            let is_bonus = bonus_on_chain
                && community.is_some_and(|community| self.is_bonus_community(community));
            let bonus_multiplier = if is_bonus { self.spec.bonus_multiplier } else { 1.0 };

            // Direct transfers into the pool.
            let mut pool_fund_total = 0.0;
            if same_as_underlying {
                let logs = match transfer_logs::fetch_transfer_logs(
                    self.chain,
                    self.caches,
                    token,
                    pool_address,
                    pool_start,
                    end_block,
                    DEFAULT_MAX_RANGE,
                )
                .await
                {
                    Ok(logs) => logs,
                    Err(error) => {
                        tracing::warn!(
                            pool = %addr_key(&pool_address),
                            token = %addr_key(&token),
                            %error,
                            "transfer log fetch failed, skipping pool"
                        );
                        continue;
                    }
                };
                for log in &logs {
                    let amount = units_to_f64(log.value, token_decimals) * price;
                    if amount < self.spec.contribution_min {
                        continue;
                    }
                    pool_fund_total += amount;
                    let delta = amount * bonus_multiplier;
                    outcome.totals.entry(log.from).or_default().fund += delta;
                    outcome.activities.entry(log.from).or_default().push(WalletActivity {
                        kind: ActivityKind::Fund,
                        amount: delta,
                        pool_address: Some(addr_key(&pool_address)),
                        pool_name: pool.title().map(String::from),
                        community_id: community.map(|c| c.id.to_lowercase()),
                        community_name: community.and_then(|c| c.community_name.clone()),
                        share_percent: None,
                        token: addr_key(&token),
                        chain_id,
                        bonus_applied: bonus_multiplier > 1.0,
                    });
                }
            }

            // Streamed contributions.
            let flow_updates =
                self.superfluid.fetch_flow_updates(pool_address, superfluid_token).await?;
            outcome.debug.flow_update_count += flow_updates.len();
            if flow_updates.is_empty() {
                tracing::debug!(
                    chain_id,
                    pool = %addr_key(&pool_address),
                    "no flow updates for pool"
                );
            }
            let accrual = accrue_streams(
                &flow_updates,
                super_decimals,
                price,
                self.window,
                self.now,
                self.spec.contribution_min,
            );
            let stream_total_all = accrual.grand_total * bonus_multiplier;
            for (sender, amount) in &accrual.per_sender {
                let delta = amount * bonus_multiplier;
                outcome.totals.entry(*sender).or_default().stream += delta;
                outcome.activities.entry(*sender).or_default().push(WalletActivity {
                    kind: ActivityKind::Stream,
                    amount: delta,
                    pool_address: Some(addr_key(&pool_address)),
                    pool_name: pool.title().map(String::from),
                    community_id: community.map(|c| c.id.to_lowercase()),
                    community_name: community.and_then(|c| c.community_name.clone()),
                    share_percent: None,
                    token: addr_key(&token),
                    chain_id,
                    bonus_applied: bonus_multiplier > 1.0,
                });
            }
            if stream_total_all > 0.0 {
                *outcome
                    .stream_totals_by_pool
                    .entry(addr_key(&pool_address))
                    .or_insert(0.0) += stream_total_all;
                tracing::info!(
                    chain_id,
                    pool = %addr_key(&pool_address),
                    stream_total = stream_total_all,
                    "stream total recorded for pool"
                );
            }

            // Fold into the owning community.
            if let (Some(index), Some(community)) = (community_index, community) {
                let entry = community_totals.entry(community.id.clone()).or_insert(
                    CommunityAccrual {
                        fund: 0.0,
                        stream: 0.0,
                        community_index: index,
                        is_bonus: false,
                    },
                );
                if self.spec.community_bonus_at_pool {
                    entry.fund += pool_fund_total * bonus_multiplier;
                    entry.stream += accrual.counted_total * bonus_multiplier;
                } else {
                    entry.fund += pool_fund_total;
                    entry.stream += stream_total_all;
                }
                entry.is_bonus = entry.is_bonus || is_bonus;

                let processed_entry =
                    processed.entry(community.id.clone()).or_insert(ProcessedCommunity {
                        community_id: community.id.to_lowercase(),
                        community_name: community.community_name.clone(),
                        fund_amount: 0.0,
                        stream_amount: 0.0,
                        pools: Vec::new(),
                    });
                processed_entry.fund_amount += pool_fund_total;
                processed_entry.stream_amount += stream_total_all;
                processed_entry.pools.push(ProcessedPool {
                    pool_address: addr_key(&pool_address),
                    token: addr_key(&token),
                    superfluid_token: Some(addr_key(&superfluid_token)),
                    title: pool.title().map(String::from),
                });
            }
        }

        self.distribute_governance_stake(
            &communities,
            &community_totals,
            &processed,
            &mut outcome,
        );

        outcome.debug.governance_stake_count = community_totals.len();
        outcome.processed_communities = processed.into_values().collect();
        outcome.community_breakdown = community_totals
            .iter()
            .map(|(community_id, entry)| {
                let community = &communities[entry.community_index];
                CommunityBreakdown {
                    community_id: community_id.to_lowercase(),
                    community_name: community.community_name.clone(),
                    fund_amount: entry.fund,
                    stream_amount: entry.stream,
                    pools: outcome
                        .processed_communities
                        .iter()
                        .find(|p| p.community_id == community_id.to_lowercase())
                        .map(|p| p.pools.len())
                        .unwrap_or(0),
                    members: community.members.len(),
                }
            })
            .collect();
        if !outcome.community_breakdown.is_empty() {
            tracing::info!(
                chain_id,
                communities = outcome.community_breakdown.len(),
                "community breakdown recorded"
            );
        }

        Ok(outcome)
    }

    fn is_bonus_community(&self, community: &Community) -> bool {
        Address::from_str(&community.id)
            .map(|id| id == self.spec.bonus_community)
            .unwrap_or(false)
    }

    async fn cached_decimals(&self, cache: &mut HashMap<Address, u8>, token: Address) -> u8 {
        if let Some(decimals) = cache.get(&token) {
            return *decimals;
        }
        let decimals = match self.chain.token_decimals(token).await {
            Ok(decimals) => decimals,
            Err(error) => {
                tracing::warn!(token = %addr_key(&token), %error, "decimals lookup failed, defaulting to 18");
                18
            }
        };
        cache.insert(token, decimals);
        decimals
    }

    /// Creation blocks never change; a cached hit inside the search range is
    /// final. Cached `None` (undeployed at last probe) is re-checked since
    /// the contract may have been deployed since.
    async fn cached_creation_block(
        &self,
        address: Address,
        search_start: u64,
    ) -> Result<Option<u64>, crate::chain::ChainError> {
        if let Some(Some(block)) = self.caches.creation_block(&address) {
            if block >= search_start {
                return Ok(Some(block));
            }
        }
        let found =
            blocks::find_contract_creation_block(self.chain, address, search_start, None).await?;
        self.caches.set_creation_block(address, found);
        Ok(found)
    }

    /// Governance-stake points: each community's accrued value is split
    /// across members proportionally to stake, only when the community
    /// accrued anything.
    fn distribute_governance_stake(
        &self,
        communities: &[Community],
        community_totals: &HashMap<String, CommunityAccrual>,
        processed: &HashMap<String, ProcessedCommunity>,
        outcome: &mut ChainOutcome,
    ) {
        let chain_id = self.chain.chain_id();
        for (community_id, entry) in community_totals {
            let accrued = entry.fund + entry.stream;
            if accrued <= 0.0 {
                continue;
            }
            let community = &communities[entry.community_index];
            let total_stake = community
                .members
                .iter()
                .fold(U256::ZERO, |acc, member| acc + member.staked_tokens);
            if total_stake == U256::ZERO {
                continue;
            }

            let bonus = if entry.is_bonus { self.spec.distribution_bonus_multiplier } else { 1.0 };
            let total_points = accrued / self.spec.distribution_divisor * bonus;

            let processed_entry = processed.get(community_id);
            let first_pool = processed_entry.and_then(|p| p.pools.first());
            for member in &community.members {
                let share = stake_share(member.staked_tokens, total_stake);
                let points = total_points * share;
                if points <= 0.0 {
                    continue;
                }
                *outcome.governance_points.entry(member.member_address).or_insert(0.0) +=
                    points;
                let activity_amount = if self.spec.distribution_divisor == 1.0 {
                    points
                } else {
                    accrued * share
                };
                outcome
                    .activities
                    .entry(member.member_address)
                    .or_default()
                    .push(WalletActivity {
                        kind: ActivityKind::Governance,
                        amount: activity_amount,
                        pool_address: first_pool.map(|pool| pool.pool_address.clone()),
                        pool_name: first_pool.and_then(|pool| pool.title.clone()),
                        community_id: Some(community_id.to_lowercase()),
                        community_name: community.community_name.clone(),
                        share_percent: Some(share * 100.0),
                        token: "aggregate".into(),
                        chain_id,
                        bonus_applied: entry.is_bonus,
                    });
            }
        }
    }
}
