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

//! One campaign route's full pipeline: cache hydration, the Farcaster
//! sweep, per-chain accrual (sequential, to bound RPC load), the
//! cross-chain reconciler, ledger and Notion sync, and cache/snapshot
//! persistence. Any mid-run failure still best-effort flushes dirty caches
//! so partial progress is never lost.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use alloy::primitives::Address;
use gardens_accrual::{
    addr_key, build_wallet_csv, compute_deltas, sum_existing_totals, CampaignWindow, DeltaEvent,
    PointTargets, WalletActivity, WalletTotals,
};
use serde::Serialize;

use crate::{
    cache::{CacheCids, CacheService},
    chain::{self, ChainClient},
    config::{AppConfig, CampaignSpec, ChainTarget, PriceMode},
    identity::{ens::EnsService, farcaster::FarcasterClient},
    notion::{NotionClient, NotionSyncSummary, WalletRow},
    prices::PriceClient,
    processor::{
        BlockBounds, ChainDebug, ChainProcessor, CommunityBreakdown, FetchedPrice, MissingPrice,
        NativePool, ProcessedCommunity,
    },
    runlog::RunLogBuffer,
    store::{ContentStore, PinataStore},
    subgraph::SubgraphClient,
    unix_now, ServiceError,
};

/// Connected clients for one target chain.
pub struct ChainRuntime {
    pub chain_id: u64,
    pub client: Arc<dyn ChainClient>,
    pub subgraph: SubgraphClient,
    pub superfluid: SubgraphClient,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEntry {
    pub address: String,
    pub added: i64,
    pub total: i64,
    pub existing: i64,
    pub target: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletBreakdownEntry {
    pub address: String,
    pub fund_amount: f64,
    pub stream_amount: f64,
    #[serde(flatten)]
    pub points: PointTargets,
    pub total_points: i64,
    pub farcaster_username: Option<String>,
    pub ens_name: Option<String>,
    pub ens_avatar: Option<String>,
    pub native_super_token: Option<String>,
    pub native_token: Option<String>,
    pub activities: Vec<WalletActivity>,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletTotalsOut {
    pub fund_amount: f64,
    pub stream_amount: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualBounds {
    #[serde(flatten)]
    pub by_chain: BTreeMap<String, BlockBounds>,
    pub start_timestamp: u64,
    pub end_timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignWindowOut {
    pub start: u64,
    pub end: u64,
    pub start_iso: String,
    pub end_iso: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedChain {
    pub chain_id: u64,
    pub error: String,
}

/// The JSON body of a successful run.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub csv: String,
    pub message: String,
    pub updated: Vec<UpdateEntry>,
    pub totals: BTreeMap<String, WalletTotalsOut>,
    pub missing_prices: Vec<MissingPrice>,
    pub override_template: BTreeMap<String, String>,
    pub manual_bounds: ManualBounds,
    pub native_pools_by_chain: BTreeMap<String, Vec<NativePool>>,
    pub communities_by_chain: BTreeMap<String, Vec<ProcessedCommunity>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub community_breakdown_by_chain: BTreeMap<String, Vec<CommunityBreakdown>>,
    pub wallet_breakdown: Vec<WalletBreakdownEntry>,
    pub notion_sync: NotionSyncSummary,
    pub farcaster_follower_wallets: Vec<String>,
    pub farcaster_discarded_wallets: Vec<String>,
    pub fetched_prices_by_chain: BTreeMap<String, Vec<FetchedPrice>>,
    pub stream_totals_by_chain: BTreeMap<String, BTreeMap<String, f64>>,
    #[serde(flatten)]
    pub cache_cids: CacheCids,
    pub points_snapshot_cid: Option<String>,
    pub run_logs_cid: Option<String>,
    pub campaign_window: CampaignWindowOut,
    pub dry_run: bool,
    pub debug: Vec<ChainDebug>,
    pub failed_chains: Vec<FailedChain>,
}

/// A failed run still reports whatever cache CIDs were salvaged.
pub struct RunFailure {
    pub error: ServiceError,
    pub cids: CacheCids,
    pub run_logs_cid: Option<String>,
}

pub struct PointsService {
    pub spec: CampaignSpec,
    pub window: CampaignWindow,
    pub caches: Arc<CacheService>,
    pub store: Option<Arc<dyn ContentStore>>,
    pub chains: Vec<ChainRuntime>,
    pub unconfigured_chains: Vec<(u64, String)>,
    pub ens: Option<EnsService>,
    pub farcaster: FarcasterClient,
    pub prices: Option<PriceClient>,
    pub notion: Option<NotionClient>,
    pub run_log: RunLogBuffer,
}

impl PointsService {
    /// Wire a service from process configuration. Chains without endpoint
    /// configuration are kept aside and reported as failed each run.
    pub fn from_config(
        config: &AppConfig,
        spec: CampaignSpec,
        notion_db_id: Option<String>,
        run_log: RunLogBuffer,
    ) -> Self {
        let store: Option<Arc<dyn ContentStore>> = match (&config.pinata_jwt, &config.ipfs_gateway)
        {
            (Some(jwt), Some(gateway)) => PinataStore::new(
                config.pinata_api_url.clone(),
                gateway.clone(),
                jwt.clone(),
                config.pinata_group_id.clone(),
            )
            .map(|s| Arc::new(s) as Arc<dyn ContentStore>)
            .ok(),
            _ => {
                tracing::info!(campaign = spec.name, "content store not configured, caches are process-local");
                None
            }
        };

        let caches = Arc::new(CacheService::new(
            config.window.version(),
            spec.cache_names.clone(),
            spec.allow_cache_writes,
            spec.creation_cache_cid.clone(),
            spec.transfer_cache_cid.clone(),
            spec.snapshot_cid.clone(),
        ));

        let mut chains = Vec::new();
        let mut unconfigured_chains = Vec::new();
        for &chain_id in &spec.target_chains {
            match ChainTarget::from_env(chain_id) {
                Ok(target) => chains.push(ChainRuntime {
                    chain_id,
                    client: chain::connect(chain_id, target.rpc_url),
                    subgraph: SubgraphClient::new(
                        target.subgraph_url,
                        target.fallback_subgraph_url,
                    ),
                    superfluid: SubgraphClient::new(target.superfluid_subgraph_url, None),
                }),
                Err(error) => {
                    tracing::warn!(chain_id, %error, "chain not configured");
                    unconfigured_chains.push((chain_id, error.to_string()));
                }
            }
        }

        let ens = config
            .mainnet_rpc_url
            .clone()
            .map(|rpc_url| EnsService::new(chain::connect(1, rpc_url)));
        let farcaster =
            FarcasterClient::new(config.farcaster_api_key.clone(), spec.farcaster_account.clone());
        let prices = matches!(spec.price_mode, PriceMode::Oracle)
            .then(|| PriceClient::new(config.coingecko_api_key.clone()));
        let notion = match (&config.notion_token, notion_db_id) {
            (Some(token), Some(db_id)) => Some(NotionClient::new(
                token.clone(),
                db_id,
                config.notion_data_source_id.clone(),
            )),
            _ => None,
        };

        Self {
            spec,
            window: config.window,
            caches,
            store,
            chains,
            unconfigured_chains,
            ens,
            farcaster,
            prices,
            notion,
            run_log,
        }
    }

    fn store_ref(&self) -> Option<&dyn ContentStore> {
        self.store.as_deref()
    }

    /// Run the full pipeline; on failure, flush whatever was mutated and
    /// surface the salvaged cache CIDs alongside the error.
    pub async fn run(&self) -> Result<RunReport, RunFailure> {
        match self.execute().await {
            Ok(report) => Ok(report),
            Err(error) => {
                let cids = self.caches.flush(self.store_ref()).await;
                let run_logs_cid = if self.spec.pin_run_logs {
                    self.caches.pin_run_log(self.store_ref(), &self.run_log.drain()).await
                } else {
                    None
                };
                Err(RunFailure { error, cids, run_logs_cid })
            }
        }
    }

    async fn execute(&self) -> Result<RunReport, ServiceError> {
        // A misconfigured ledger fails fast, before any accrual work.
        let ledger = self.spec.ledger.client()?;
        let now = unix_now();

        if let Some(store) = self.store_ref() {
            self.caches.hydrate(store).await;
            self.caches.hydrate_snapshot(store).await;
        }

        // Farcaster follower sweep.
        let mut follower_wallets: HashSet<Address> = HashSet::new();
        let mut discarded_wallets: HashSet<Address> = HashSet::new();
        let mut usernames: HashMap<Address, String> = HashMap::new();
        if !self.farcaster.disabled() {
            match self.farcaster.account_fid().await {
                Some(fid) => {
                    let fids = self.farcaster.follower_fids(fid).await;
                    let wallets = self.farcaster.primary_wallets(&fids).await;
                    follower_wallets = wallets.primary;
                    discarded_wallets = wallets.discarded;
                    usernames = wallets.usernames;
                }
                None => {
                    tracing::info!(
                        account = %self.spec.farcaster_account,
                        "skipping follower scan, account fid could not be resolved"
                    );
                }
            }
        }
        for address in &follower_wallets {
            if !usernames.contains_key(address) {
                if let Some(username) = self.caches.farcaster_username(address) {
                    usernames.insert(*address, username);
                }
            }
        }

        // Sequential per-chain accrual.
        let mut totals: HashMap<Address, WalletTotals> = HashMap::new();
        let mut governance: HashMap<Address, f64> = HashMap::new();
        let mut activities: HashMap<Address, Vec<WalletActivity>> = HashMap::new();
        let mut bonus_members: HashSet<Address> = HashSet::new();
        let mut missing_prices: Vec<MissingPrice> = Vec::new();
        let mut debug: Vec<ChainDebug> = Vec::new();
        let mut failed_chains: Vec<FailedChain> = Vec::new();
        let mut manual_bounds: BTreeMap<String, BlockBounds> = BTreeMap::new();
        let mut native_pools_by_chain: BTreeMap<String, Vec<NativePool>> = BTreeMap::new();
        let mut communities_by_chain: BTreeMap<String, Vec<ProcessedCommunity>> = BTreeMap::new();
        let mut community_breakdown_by_chain: BTreeMap<String, Vec<CommunityBreakdown>> =
            BTreeMap::new();
        let mut fetched_prices_by_chain: BTreeMap<String, Vec<FetchedPrice>> = BTreeMap::new();
        let mut stream_totals_by_chain: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();

        for runtime in &self.chains {
            let processor = ChainProcessor {
                spec: &self.spec,
                window: self.window,
                now,
                chain: runtime.client.as_ref(),
                subgraph: &runtime.subgraph,
                superfluid: &runtime.superfluid,
                caches: &self.caches,
                prices: self.prices.as_ref(),
            };
            let outcome = match processor.process().await {
                Ok(outcome) => outcome,
                Err(error) => {
                    tracing::error!(chain_id = runtime.chain_id, %error, "chain processing failed");
                    failed_chains
                        .push(FailedChain { chain_id: runtime.chain_id, error: error.to_string() });
                    continue;
                }
            };

            let chain_key = runtime.chain_id.to_string();
            for (address, wallet_totals) in outcome.totals {
                totals.entry(address).or_default().add(&wallet_totals);
            }
            for (address, points) in outcome.governance_points {
                *governance.entry(address).or_insert(0.0) += points;
            }
            for (address, mut wallet_activities) in outcome.activities {
                activities.entry(address).or_default().append(&mut wallet_activities);
            }
            bonus_members.extend(outcome.bonus_members);
            missing_prices.extend(outcome.missing_prices);
            for native in &outcome.native_pools {
                self.caches.set_native_tokens(native.pool_address, native.token);
            }
            manual_bounds.insert(chain_key.clone(), outcome.block_bounds);
            native_pools_by_chain.insert(chain_key.clone(), outcome.native_pools);
            communities_by_chain.insert(chain_key.clone(), outcome.processed_communities);
            if !outcome.community_breakdown.is_empty() {
                community_breakdown_by_chain
                    .insert(chain_key.clone(), outcome.community_breakdown);
            }
            fetched_prices_by_chain.insert(chain_key.clone(), outcome.fetched_prices);
            stream_totals_by_chain
                .insert(chain_key.clone(), outcome.stream_totals_by_pool.into_iter().collect());
            debug.push(outcome.debug);
        }
        for (chain_id, error) in &self.unconfigured_chains {
            failed_chains.push(FailedChain { chain_id: *chain_id, error: error.clone() });
        }

        // Every address the run touched.
        let mut all_addresses: BTreeSet<Address> = BTreeSet::new();
        all_addresses.extend(totals.keys());
        all_addresses.extend(governance.keys());
        all_addresses.extend(follower_wallets.iter());
        all_addresses.extend(discarded_wallets.iter());
        all_addresses.extend(bonus_members.iter());
        all_addresses.extend(activities.keys());

        // Identity resolution, strictly best-effort.
        let mut ens_names: HashMap<Address, String> = HashMap::new();
        let mut ens_avatars: HashMap<Address, String> = HashMap::new();
        for (address, entry) in self.caches.ens_entries() {
            if let Some(name) = entry.name {
                ens_names.insert(address, name);
            }
            if let Some(avatar) = entry.avatar {
                ens_avatars.insert(address, avatar);
            }
        }
        if !self.spec.skip_identity_resolution {
            if let Some(ens) = &self.ens {
                for address in &all_addresses {
                    if ens_names.contains_key(address) && ens_avatars.contains_key(address) {
                        continue;
                    }
                    let identity = ens.resolve(&self.caches, *address).await;
                    if let Some(name) = identity.name {
                        ens_names.insert(*address, name);
                    }
                    if let Some(avatar) = identity.avatar {
                        ens_avatars.insert(*address, avatar);
                    }
                }
            }
        }
        if self.spec.resolve_usernames_by_address && !self.farcaster.disabled() {
            for address in &all_addresses {
                if usernames.contains_key(address) {
                    continue;
                }
                if let Some(username) = self.farcaster.username_by_address(*address).await {
                    usernames.insert(*address, username);
                }
            }
        }
        for (address, username) in &usernames {
            self.caches.set_farcaster_username(*address, username.clone());
        }

        // Point targets per wallet.
        let mut targets: BTreeMap<Address, PointTargets> = BTreeMap::new();
        for address in &all_addresses {
            if self.spec.excluded_wallets.contains(address) {
                continue;
            }
            let wallet_totals = totals.get(address).copied().unwrap_or_default();
            let computed = self.spec.formula.compute(
                &wallet_totals,
                governance.get(address).copied().unwrap_or(0.0),
                follower_wallets.contains(address),
                bonus_members.contains(address),
            );
            if computed.total() <= 0 {
                continue;
            }
            targets.insert(*address, computed);
        }

        // Reconcile against ledger history and push the deltas.
        let events = ledger.all_events().await?;
        let (existing, categories) = sum_existing_totals(
            events.iter().map(|event| (event.name(), event.account(), event.points as i64)),
            self.spec.adopt_ledger_categories,
        );
        let deltas = compute_deltas(&targets, &existing, &categories);

        if !deltas.is_empty() && !self.spec.dry_run {
            tracing::info!(count = deltas.len(), "pushing ledger deltas");
            ledger.send_deltas(&deltas).await?;
        } else if self.spec.dry_run {
            tracing::info!(count = deltas.len(), "dry run, skipping ledger delta push");
        }

        let mut deltas_by_wallet: HashMap<Address, Vec<&DeltaEvent>> = HashMap::new();
        for delta in &deltas {
            deltas_by_wallet.entry(delta.account).or_default().push(delta);
        }

        let mut updated: Vec<UpdateEntry> = Vec::new();
        let mut breakdown: Vec<WalletBreakdownEntry> = Vec::new();
        for (address, computed) in &targets {
            let existing_total: i64 =
                existing.get(address).map(|r| r.values().sum()).unwrap_or(0);
            let added: i64 = deltas_by_wallet
                .get(address)
                .map(|wallet_deltas| {
                    wallet_deltas.iter().map(|d| d.points.max(0)).sum::<i64>()
                })
                .unwrap_or(0);
            updated.push(UpdateEntry {
                address: addr_key(address),
                added,
                total: computed.total(),
                existing: existing_total,
                target: computed.total(),
            });

            let wallet_totals = totals.get(address).copied().unwrap_or_default();
            breakdown.push(WalletBreakdownEntry {
                address: addr_key(address),
                fund_amount: wallet_totals.fund,
                stream_amount: wallet_totals.stream,
                points: *computed,
                total_points: computed.total(),
                farcaster_username: usernames.get(address).cloned(),
                ens_name: ens_names.get(address).cloned(),
                ens_avatar: ens_avatars.get(address).cloned(),
                native_super_token: self
                    .caches
                    .native_super_token(address)
                    .map(|token| addr_key(&token)),
                native_token: self.caches.native_token(address).map(|token| addr_key(&token)),
                activities: activities.get(address).cloned().unwrap_or_default(),
                checksum: computed.checksum(address),
            });
        }
        // Retracted wallets appear in the update list with a zero target.
        for (address, recorded) in &existing {
            if targets.contains_key(address) {
                continue;
            }
            updated.push(UpdateEntry {
                address: addr_key(address),
                added: 0,
                total: 0,
                existing: recorded.values().sum(),
                target: 0,
            });
        }

        let csv = build_wallet_csv(
            &targets.iter().map(|(address, computed)| (*address, *computed)).collect::<Vec<_>>(),
        );

        // Notion mirror.
        let notion_sync = match &self.notion {
            Some(notion) if !notion.disabled() => {
                let rows: Vec<WalletRow> = targets
                    .iter()
                    .map(|(address, computed)| WalletRow { address: *address, targets: *computed })
                    .collect();
                notion.sync(&rows).await
            }
            _ => {
                tracing::info!("skipping notion sync, not configured");
                NotionSyncSummary::default()
            }
        };

        // Persist snapshot, caches and the captured run log.
        let snapshot_value = serde_json::to_value(&breakdown).unwrap_or_default();
        let points_snapshot_cid =
            self.caches.pin_snapshot(self.store_ref(), &snapshot_value).await;
        let cache_cids = self.caches.flush(self.store_ref()).await;
        let run_logs_cid = if self.spec.pin_run_logs {
            self.caches.pin_run_log(self.store_ref(), &self.run_log.drain()).await
        } else {
            None
        };
        tracing::info!(
            creation = ?cache_cids.creation_block_cache_cid,
            transfer = ?cache_cids.transfer_log_cache_cid,
            price = ?cache_cids.price_cache_cid,
            snapshot = ?points_snapshot_cid,
            run_logs = ?run_logs_cid,
            "pinned artifacts"
        );

        let override_template: BTreeMap<String, String> = missing_prices
            .iter()
            .map(|missing| (missing.symbol.clone(), String::new()))
            .collect();

        Ok(RunReport {
            csv,
            message: "Superfluid points sync completed".into(),
            updated,
            totals: totals
                .iter()
                .map(|(address, wallet_totals)| {
                    (
                        addr_key(address),
                        WalletTotalsOut {
                            fund_amount: wallet_totals.fund,
                            stream_amount: wallet_totals.stream,
                        },
                    )
                })
                .collect(),
            missing_prices,
            override_template,
            manual_bounds: ManualBounds {
                by_chain: manual_bounds,
                start_timestamp: self.window.start,
                end_timestamp: self.window.end,
            },
            native_pools_by_chain,
            communities_by_chain,
            community_breakdown_by_chain,
            wallet_breakdown: breakdown,
            notion_sync,
            farcaster_follower_wallets: follower_wallets.iter().map(addr_key).collect(),
            farcaster_discarded_wallets: discarded_wallets.iter().map(addr_key).collect(),
            fetched_prices_by_chain,
            stream_totals_by_chain,
            cache_cids,
            points_snapshot_cid,
            run_logs_cid,
            campaign_window: CampaignWindowOut {
                start: self.window.start,
                end: self.window.end,
                start_iso: iso_from_unix(self.window.start),
                end_iso: iso_from_unix(self.window.end),
            },
            dry_run: self.spec.dry_run,
            debug,
            failed_chains,
        })
    }
}

fn iso_from_unix(timestamp: u64) -> String {
    chrono::DateTime::from_timestamp(timestamp as i64, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}
