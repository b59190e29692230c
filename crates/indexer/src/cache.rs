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

//! Per-process mutable caches shared across handler invocations on a warm
//! instance: contract creation blocks, transfer logs, token prices, and
//! resolved identities. Hydrated from the content store at cold start and
//! flushed back when dirty.
//!
//! Construct one `CacheService` per campaign route and pass it by
//! reference. Concurrent invocations racing on the same instance can at
//! worst repeat work or merge a transiently stale view; the accrual is
//! derived data recomputed every run, so source-of-truth corruption is not
//! possible. No cross-invocation lock is taken on purpose.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use alloy::primitives::Address;
use gardens_accrual::addr_key;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;

use crate::{
    store::ContentStore,
    transfer_logs::TransferLogCacheEntry,
};

pub const PRICE_CACHE_TTL_MS: u64 = 24 * 60 * 60 * 1000;
pub const ENS_CACHE_TTL_MS: u64 = 24 * 60 * 60 * 1000;
const ENS_CACHE_PRUNE_INTERVAL_MS: u64 = 60 * 60 * 1000;

/// Logical blob names under which each cache is pinned.
#[derive(Debug, Clone)]
pub struct CacheNames {
    pub creation_blocks: String,
    pub transfer_logs: String,
    pub prices: String,
    pub snapshot: String,
    pub run_log: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceEntry {
    pub price: f64,
    pub fetched_at: u64,
    pub symbol: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EnsCacheEntry {
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub fetched_at: u64,
}

/// CIDs of the caches pinned during a run (or carried over when clean).
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheCids {
    pub creation_block_cache_cid: Option<String>,
    pub transfer_log_cache_cid: Option<String>,
    pub price_cache_cid: Option<String>,
}

#[derive(Default)]
struct CreationState {
    entries: HashMap<Address, Option<u64>>,
    dirty: bool,
    latest_cid: Option<String>,
    hydrated: bool,
}

#[derive(Default)]
struct TransferState {
    entries: HashMap<String, TransferLogCacheEntry>,
    dirty: bool,
    latest_cid: Option<String>,
    hydrated: bool,
}

#[derive(Default)]
struct PriceState {
    entries: HashMap<String, PriceEntry>,
    dirty: bool,
    latest_cid: Option<String>,
    hydrated: bool,
}

#[derive(Default)]
struct IdentityState {
    ens: HashMap<Address, EnsCacheEntry>,
    farcaster_usernames: HashMap<Address, String>,
    native_super_tokens: HashMap<Address, Address>,
    native_tokens: HashMap<Address, Address>,
    last_prune_ms: u64,
    snapshot_cid: Option<String>,
    hydrated: bool,
}

pub struct CacheService {
    campaign_version: String,
    names: CacheNames,
    /// The GoodDollar route hydrates shared caches but never writes them.
    allow_writes: bool,
    creation: Mutex<CreationState>,
    transfers: Mutex<TransferState>,
    prices: Mutex<PriceState>,
    identity: Mutex<IdentityState>,
}

// Persisted blob layouts. Block numbers travel as strings, mirroring the
// wire format of the caches this service replaces.

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreationBlockPayload {
    updated_at: String,
    campaign_version: String,
    entries: BTreeMap<String, Option<String>>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferLogPayload {
    updated_at: String,
    campaign_version: String,
    entries: HashMap<String, TransferLogCacheEntry>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PricePayload {
    updated_at: String,
    ttl_ms: u64,
    entries: HashMap<String, PriceEntry>,
}

impl CacheService {
    pub fn new(
        campaign_version: String,
        names: CacheNames,
        allow_writes: bool,
        creation_cid: Option<String>,
        transfer_cid: Option<String>,
        snapshot_cid: Option<String>,
    ) -> Self {
        let service = Self {
            campaign_version,
            names,
            allow_writes,
            creation: Mutex::new(CreationState::default()),
            transfers: Mutex::new(TransferState::default()),
            prices: Mutex::new(PriceState::default()),
            identity: Mutex::new(IdentityState::default()),
        };
        service.creation.lock().unwrap().latest_cid = creation_cid;
        service.transfers.lock().unwrap().latest_cid = transfer_cid;
        service.identity.lock().unwrap().snapshot_cid = snapshot_cid;
        service
    }

    pub fn campaign_version(&self) -> &str {
        &self.campaign_version
    }

    pub fn run_log_name(&self) -> &str {
        &self.names.run_log
    }

    pub fn snapshot_name(&self) -> &str {
        &self.names.snapshot
    }

    // --- hydration -------------------------------------------------------

    /// Load caches from the content store. Idempotent; later calls on a warm
    /// instance are no-ops. A creation-block blob from a different campaign
    /// window is discarded; a transfer-log blob is kept and extended.
    pub async fn hydrate(&self, store: &dyn ContentStore) {
        self.hydrate_creation(store).await;
        self.hydrate_transfers(store).await;
        self.hydrate_prices(store).await;
    }

    async fn resolve_cid(
        &self,
        store: &dyn ContentStore,
        known: Option<String>,
        name: &str,
        version: Option<&str>,
        fallback_any_version: bool,
    ) -> Option<String> {
        if known.is_some() {
            return known;
        }
        match store.find_latest(name, version).await {
            Ok(Some(cid)) => Some(cid),
            Ok(None) if fallback_any_version && version.is_some() => {
                match store.find_latest(name, None).await {
                    Ok(found) => found,
                    Err(error) => {
                        tracing::warn!(name, %error, "content store listing failed");
                        None
                    }
                }
            }
            Ok(None) => None,
            Err(error) => {
                tracing::warn!(name, %error, "content store listing failed");
                None
            }
        }
    }

    async fn hydrate_creation(&self, store: &dyn ContentStore) {
        let (hydrated, known_cid) = {
            let state = self.creation.lock().unwrap();
            (state.hydrated, state.latest_cid.clone())
        };
        if hydrated {
            return;
        }
        let cid = self
            .resolve_cid(
                store,
                known_cid,
                &self.names.creation_blocks.clone(),
                Some(&self.campaign_version),
                false,
            )
            .await;
        let cid = {
            let mut state = self.creation.lock().unwrap();
            state.hydrated = true;
            let Some(cid) = cid else { return };
            state.latest_cid = Some(cid.clone());
            cid
        };

        let Ok(Some(raw)) = store.fetch_json(&cid).await else { return };
        let Ok(payload) = serde_json::from_value::<CreationBlockPayload>(raw) else { return };
        if payload.campaign_version != self.campaign_version {
            // Stale window; creation blocks are only valid per campaign.
            let mut state = self.creation.lock().unwrap();
            state.latest_cid = None;
            return;
        }
        let mut state = self.creation.lock().unwrap();
        tracing::info!(cid, entries = payload.entries.len(), "hydrated creation block cache");
        for (addr, block) in payload.entries {
            let Ok(address) = Address::from_str(&addr) else { continue };
            let parsed = match block {
                None => None,
                Some(value) => match value.parse::<u64>() {
                    Ok(number) => Some(number),
                    Err(_) => continue,
                },
            };
            state.entries.insert(address, parsed);
        }
    }

    async fn hydrate_transfers(&self, store: &dyn ContentStore) {
        let (hydrated, known_cid) = {
            let state = self.transfers.lock().unwrap();
            (state.hydrated, state.latest_cid.clone())
        };
        if hydrated {
            return;
        }
        let cid = self
            .resolve_cid(
                store,
                known_cid,
                &self.names.transfer_logs.clone(),
                Some(&self.campaign_version),
                true,
            )
            .await;
        let cid = {
            let mut state = self.transfers.lock().unwrap();
            state.hydrated = true;
            let Some(cid) = cid else { return };
            state.latest_cid = Some(cid.clone());
            cid
        };

        let Ok(Some(raw)) = store.fetch_json(&cid).await else { return };
        let Ok(payload) = serde_json::from_value::<TransferLogPayload>(raw) else { return };
        let mut state = self.transfers.lock().unwrap();
        tracing::info!(cid, entries = payload.entries.len(), "hydrated transfer log cache");
        // A mismatched campaign version keeps the logs: the covered interval
        // silently extends to the new window instead of being refetched.
        state.entries.extend(payload.entries);
    }

    async fn hydrate_prices(&self, store: &dyn ContentStore) {
        let (hydrated, known_cid) = {
            let state = self.prices.lock().unwrap();
            (state.hydrated, state.latest_cid.clone())
        };
        if hydrated {
            return;
        }
        let cid =
            self.resolve_cid(store, known_cid, &self.names.prices.clone(), None, false).await;
        let cid = {
            let mut state = self.prices.lock().unwrap();
            state.hydrated = true;
            let Some(cid) = cid else { return };
            state.latest_cid = Some(cid.clone());
            cid
        };

        let Ok(Some(raw)) = store.fetch_json(&cid).await else { return };
        let Ok(payload) = serde_json::from_value::<PricePayload>(raw) else { return };
        let now = crate::unix_now_ms();
        let mut state = self.prices.lock().unwrap();
        let mut kept = 0usize;
        for (key, entry) in payload.entries {
            if now.saturating_sub(entry.fetched_at) >= PRICE_CACHE_TTL_MS {
                continue;
            }
            state.entries.insert(key, entry);
            kept += 1;
        }
        if kept > 0 {
            tracing::info!(cid, entries = kept, "hydrated token price cache");
        }
    }

    /// Warm identity caches from the previous run's snapshot.
    pub async fn hydrate_snapshot(&self, store: &dyn ContentStore) {
        let (hydrated, known_cid) = {
            let state = self.identity.lock().unwrap();
            (state.hydrated, state.snapshot_cid.clone())
        };
        if hydrated {
            return;
        }
        let cid =
            self.resolve_cid(store, known_cid, &self.names.snapshot.clone(), None, false).await;
        let cid = {
            let mut state = self.identity.lock().unwrap();
            state.hydrated = true;
            let Some(cid) = cid else { return };
            state.snapshot_cid = Some(cid.clone());
            cid
        };

        let Ok(Some(raw)) = store.fetch_json(&cid).await else { return };
        let now = crate::unix_now_ms();
        let mut state = self.identity.lock().unwrap();
        if let Some(entries) = raw.get("ensCache").and_then(|v| v.as_array()) {
            for entry in entries {
                let Some(address) = entry
                    .get("address")
                    .and_then(|v| v.as_str())
                    .and_then(|s| Address::from_str(s).ok())
                else {
                    continue;
                };
                state.ens.insert(
                    address,
                    EnsCacheEntry {
                        name: entry.get("name").and_then(|v| v.as_str()).map(String::from),
                        avatar: entry.get("avatar").and_then(|v| v.as_str()).map(String::from),
                        fetched_at: entry.get("fetchedAt").and_then(|v| v.as_u64()).unwrap_or(now),
                    },
                );
            }
        }
        let Some(wallets) = raw.get("wallets").and_then(|v| v.as_array()) else { return };
        tracing::info!(cid, wallets = wallets.len(), "hydrated points snapshot caches");
        for wallet in wallets {
            let Some(address) = wallet
                .get("address")
                .and_then(|v| v.as_str())
                .and_then(|s| Address::from_str(s).ok())
            else {
                continue;
            };
            if let Some(username) = wallet.get("farcasterUsername").and_then(|v| v.as_str()) {
                state.farcaster_usernames.insert(address, username.to_string());
            }
            if !state.ens.contains_key(&address) {
                let name = wallet.get("ensName").and_then(|v| v.as_str()).map(String::from);
                let avatar = wallet.get("ensAvatar").and_then(|v| v.as_str()).map(String::from);
                if name.is_some() || avatar.is_some() {
                    state
                        .ens
                        .insert(address, EnsCacheEntry { name, avatar, fetched_at: now });
                }
            }
            if let Some(token) = wallet
                .get("nativeSuperToken")
                .and_then(|v| v.as_str())
                .and_then(|s| Address::from_str(s).ok())
            {
                state.native_super_tokens.insert(address, token);
            }
            if let Some(token) = wallet
                .get("nativeToken")
                .and_then(|v| v.as_str())
                .and_then(|s| Address::from_str(s).ok())
            {
                state.native_tokens.insert(address, token);
            }
        }
    }

    // --- creation blocks -------------------------------------------------

    /// `Some(Some(block))`: known creation block. `Some(None)`: known to be
    /// undeployed at the last probe. `None`: never probed.
    pub fn creation_block(&self, address: &Address) -> Option<Option<u64>> {
        self.creation.lock().unwrap().entries.get(address).copied()
    }

    pub fn set_creation_block(&self, address: Address, block: Option<u64>) {
        let mut state = self.creation.lock().unwrap();
        state.entries.insert(address, block);
        state.dirty = true;
    }

    // --- transfer logs ---------------------------------------------------

    pub fn transfer_entry(&self, key: &str) -> Option<TransferLogCacheEntry> {
        self.transfers.lock().unwrap().entries.get(key).cloned()
    }

    pub fn put_transfer_entry(&self, key: String, entry: TransferLogCacheEntry) {
        let mut state = self.transfers.lock().unwrap();
        state.entries.insert(key, entry);
        state.dirty = true;
    }

    pub fn transfer_cache_dirty(&self) -> bool {
        self.transfers.lock().unwrap().dirty
    }

    #[cfg(test)]
    pub fn clear_transfer_dirty_for_test(&self) {
        self.transfers.lock().unwrap().dirty = false;
    }

    // --- prices ----------------------------------------------------------

    pub fn fresh_price(&self, key: &str, now_ms: u64) -> Option<f64> {
        let state = self.prices.lock().unwrap();
        state
            .entries
            .get(key)
            .filter(|entry| now_ms.saturating_sub(entry.fetched_at) < PRICE_CACHE_TTL_MS)
            .map(|entry| entry.price)
    }

    pub fn set_price(&self, key: String, entry: PriceEntry) {
        let mut state = self.prices.lock().unwrap();
        state.entries.insert(key, entry);
        state.dirty = true;
    }

    // --- identities ------------------------------------------------------

    /// Hourly prune pass evicting ENS entries past their TTL.
    pub fn prune_ens(&self, now_ms: u64) {
        let mut state = self.identity.lock().unwrap();
        if now_ms.saturating_sub(state.last_prune_ms) < ENS_CACHE_PRUNE_INTERVAL_MS {
            return;
        }
        state.last_prune_ms = now_ms;
        state.ens.retain(|_, entry| now_ms.saturating_sub(entry.fetched_at) < ENS_CACHE_TTL_MS);
    }

    pub fn ens_entry(&self, address: &Address) -> Option<EnsCacheEntry> {
        self.identity.lock().unwrap().ens.get(address).cloned()
    }

    pub fn set_ens_entry(&self, address: Address, entry: EnsCacheEntry) {
        self.identity.lock().unwrap().ens.insert(address, entry);
    }

    pub fn ens_entries(&self) -> Vec<(Address, EnsCacheEntry)> {
        self.identity
            .lock()
            .unwrap()
            .ens
            .iter()
            .map(|(address, entry)| (*address, entry.clone()))
            .collect()
    }

    pub fn farcaster_username(&self, address: &Address) -> Option<String> {
        self.identity.lock().unwrap().farcaster_usernames.get(address).cloned()
    }

    pub fn set_farcaster_username(&self, address: Address, username: String) {
        self.identity.lock().unwrap().farcaster_usernames.insert(address, username);
    }

    pub fn set_native_tokens(&self, pool: Address, token: Address) {
        let mut state = self.identity.lock().unwrap();
        state.native_super_tokens.insert(pool, token);
        state.native_tokens.insert(pool, token);
    }

    pub fn native_super_token(&self, address: &Address) -> Option<Address> {
        self.identity.lock().unwrap().native_super_tokens.get(address).copied()
    }

    pub fn native_token(&self, address: &Address) -> Option<Address> {
        self.identity.lock().unwrap().native_tokens.get(address).copied()
    }

    // --- persistence -----------------------------------------------------

    fn version_keyvalues(&self, updated_at: &str) -> BTreeMap<String, String> {
        let mut keyvalues = BTreeMap::new();
        keyvalues.insert("updatedAt".to_string(), updated_at.to_string());
        keyvalues.insert("campaignVersion".to_string(), self.campaign_version.clone());
        keyvalues
    }

    /// Pin every dirty cache; clean caches keep their previous CID. Pin
    /// failures are logged and surfaced as a carried-over CID so a failed
    /// flush never fails the run.
    pub async fn flush(&self, store: Option<&dyn ContentStore>) -> CacheCids {
        let updated_at = chrono::Utc::now().to_rfc3339();

        let creation_cid = self.flush_creation(store, &updated_at).await;
        let transfer_cid = self.flush_transfers(store, &updated_at).await;
        let price_cid = self.flush_prices(store, &updated_at).await;

        CacheCids {
            creation_block_cache_cid: creation_cid,
            transfer_log_cache_cid: transfer_cid,
            price_cache_cid: price_cid,
        }
    }

    async fn flush_creation(
        &self,
        store: Option<&dyn ContentStore>,
        updated_at: &str,
    ) -> Option<String> {
        let (dirty, latest, payload) = {
            let state = self.creation.lock().unwrap();
            let entries = state
                .entries
                .iter()
                .map(|(addr, block)| (addr_key(addr), block.map(|b| b.to_string())))
                .collect();
            (
                state.dirty,
                state.latest_cid.clone(),
                CreationBlockPayload {
                    updated_at: updated_at.to_string(),
                    campaign_version: self.campaign_version.clone(),
                    entries,
                },
            )
        };
        let Some(store) = store else { return latest };
        if !dirty || !self.allow_writes {
            return latest;
        }
        let value = serde_json::to_value(&payload).unwrap_or_else(|_| json!({}));
        match store
            .pin_json(&self.names.creation_blocks, &self.version_keyvalues(updated_at), &value)
            .await
        {
            Ok(cid) => {
                tracing::info!(cid, "pinned creation block cache");
                let mut state = self.creation.lock().unwrap();
                state.latest_cid = Some(cid.clone());
                state.dirty = false;
                Some(cid)
            }
            Err(error) => {
                tracing::warn!(%error, "failed to pin creation block cache");
                self.creation.lock().unwrap().dirty = false;
                latest
            }
        }
    }

    async fn flush_transfers(
        &self,
        store: Option<&dyn ContentStore>,
        updated_at: &str,
    ) -> Option<String> {
        let (dirty, latest, payload) = {
            let state = self.transfers.lock().unwrap();
            (
                state.dirty,
                state.latest_cid.clone(),
                TransferLogPayload {
                    updated_at: updated_at.to_string(),
                    campaign_version: self.campaign_version.clone(),
                    entries: state.entries.clone(),
                },
            )
        };
        let Some(store) = store else { return latest };
        if !dirty || !self.allow_writes {
            return latest;
        }
        let value = serde_json::to_value(&payload).unwrap_or_else(|_| json!({}));
        match store
            .pin_json(&self.names.transfer_logs, &self.version_keyvalues(updated_at), &value)
            .await
        {
            Ok(cid) => {
                tracing::info!(cid, "pinned transfer log cache");
                let mut state = self.transfers.lock().unwrap();
                state.latest_cid = Some(cid.clone());
                state.dirty = false;
                Some(cid)
            }
            Err(error) => {
                tracing::warn!(%error, "failed to pin transfer log cache");
                self.transfers.lock().unwrap().dirty = false;
                latest
            }
        }
    }

    async fn flush_prices(
        &self,
        store: Option<&dyn ContentStore>,
        updated_at: &str,
    ) -> Option<String> {
        let (dirty, latest, payload) = {
            let state = self.prices.lock().unwrap();
            (
                state.dirty,
                state.latest_cid.clone(),
                PricePayload {
                    updated_at: updated_at.to_string(),
                    ttl_ms: PRICE_CACHE_TTL_MS,
                    entries: state.entries.clone(),
                },
            )
        };
        let Some(store) = store else { return latest };
        if !dirty || !self.allow_writes || payload.entries.is_empty() {
            return latest;
        }
        let mut keyvalues = BTreeMap::new();
        keyvalues.insert("updatedAt".to_string(), updated_at.to_string());
        let value = serde_json::to_value(&payload).unwrap_or_else(|_| json!({}));
        match store.pin_json(&self.names.prices, &keyvalues, &value).await {
            Ok(cid) => {
                tracing::info!(cid, "pinned token price cache");
                let mut state = self.prices.lock().unwrap();
                state.latest_cid = Some(cid.clone());
                state.dirty = false;
                Some(cid)
            }
            Err(error) => {
                tracing::warn!(%error, "failed to pin token price cache");
                self.prices.lock().unwrap().dirty = false;
                latest
            }
        }
    }

    /// Pin the full wallet-breakdown snapshot (with the current ENS cache
    /// appended as the next run's warm source).
    pub async fn pin_snapshot(
        &self,
        store: Option<&dyn ContentStore>,
        wallets: &serde_json::Value,
    ) -> Option<String> {
        let store = store?;
        if wallets.as_array().is_none_or(|w| w.is_empty()) {
            return None;
        }
        let updated_at = chrono::Utc::now().to_rfc3339();
        let ens_cache: Vec<serde_json::Value> = self
            .ens_entries()
            .into_iter()
            .map(|(address, entry)| {
                json!({
                    "address": addr_key(&address),
                    "name": entry.name,
                    "avatar": entry.avatar,
                    "fetchedAt": entry.fetched_at,
                })
            })
            .collect();
        let payload = json!({
            "updatedAt": updated_at,
            "wallets": wallets,
            "ensCache": ens_cache,
        });
        let mut keyvalues = BTreeMap::new();
        keyvalues.insert("updatedAt".to_string(), updated_at);
        match store.pin_json(&self.names.snapshot, &keyvalues, &payload).await {
            Ok(cid) => {
                tracing::info!(cid, "pinned points snapshot");
                self.identity.lock().unwrap().snapshot_cid = Some(cid.clone());
                Some(cid)
            }
            Err(error) => {
                tracing::warn!(%error, "failed to pin points snapshot");
                None
            }
        }
    }

    /// Pin the captured run log for postmortem debugging.
    pub async fn pin_run_log(
        &self,
        store: Option<&dyn ContentStore>,
        lines: &[String],
    ) -> Option<String> {
        let store = store?;
        if lines.is_empty() {
            return None;
        }
        let updated_at = chrono::Utc::now().to_rfc3339();
        let payload = json!({
            "updatedAt": updated_at,
            "campaignVersion": self.campaign_version,
            "lines": lines,
        });
        match store.pin_json(&self.names.run_log, &self.version_keyvalues(&updated_at), &payload).await
        {
            Ok(cid) => {
                tracing::info!(cid, lines = lines.len(), "pinned run logs");
                Some(cid)
            }
            Err(error) => {
                tracing::warn!(%error, "failed to pin run logs");
                None
            }
        }
    }
}
