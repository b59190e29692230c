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

//! ENS reverse resolution with a TTL cache. Name misses are cached as
//! `None` so unset reverse records do not revert on every run; a known name
//! with no avatar retries the avatar on its own TTL.

use alloy::primitives::{keccak256, Address, B256};
use std::sync::Arc;
use url::Url;

use crate::{
    cache::{CacheService, EnsCacheEntry, ENS_CACHE_TTL_MS},
    chain::ChainClient,
    unix_now_ms,
};

const ENS_AVATAR_RETRY_MS: u64 = ENS_CACHE_TTL_MS;

/// EIP-137 namehash.
pub fn namehash(name: &str) -> B256 {
    let mut node = B256::ZERO;
    if name.is_empty() {
        return node;
    }
    for label in name.rsplit('.') {
        let label_hash = keccak256(label.as_bytes());
        let mut packed = [0u8; 64];
        packed[..32].copy_from_slice(node.as_slice());
        packed[32..].copy_from_slice(label_hash.as_slice());
        node = keccak256(packed);
    }
    node
}

/// Node of `<hex-address>.addr.reverse`, the reverse-registrar entry for an
/// address.
pub fn reverse_node(address: &Address) -> B256 {
    let hex_addr = hex::encode(address.as_slice());
    namehash(&format!("{hex_addr}.addr.reverse"))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnsIdentity {
    pub name: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refresh {
    None,
    AvatarOnly,
    Full,
}

fn needs_refresh(entry: Option<&EnsCacheEntry>, now_ms: u64) -> Refresh {
    let Some(entry) = entry else { return Refresh::Full };
    if now_ms.saturating_sub(entry.fetched_at) >= ENS_CACHE_TTL_MS {
        return Refresh::Full;
    }
    if entry.avatar.is_none()
        && entry.name.is_some()
        && now_ms.saturating_sub(entry.fetched_at) >= ENS_AVATAR_RETRY_MS
    {
        return Refresh::AvatarOnly;
    }
    Refresh::None
}

/// Mainnet ENS resolution with the public metadata service as the avatar
/// fallback when the on-chain text record is empty.
pub struct EnsService {
    mainnet: Arc<dyn ChainClient>,
    http: reqwest::Client,
    metadata_base: Url,
}

impl EnsService {
    pub fn new(mainnet: Arc<dyn ChainClient>) -> Self {
        Self {
            mainnet,
            http: reqwest::Client::new(),
            metadata_base: Url::parse("https://metadata.ens.domains/mainnet/avatar/").unwrap(),
        }
    }

    pub fn with_metadata_base(mut self, base: Url) -> Self {
        self.metadata_base = base;
        self
    }

    fn metadata_avatar_url(&self, name: &str) -> Option<Url> {
        self.metadata_base.join(&name.to_lowercase()).ok()
    }

    async fn avatar_with_fallback(&self, name: &str) -> Option<String> {
        match self.mainnet.ens_avatar(name).await {
            Ok(Some(avatar)) => return Some(avatar),
            Ok(None) => {}
            Err(_) => {
                // Resolver reverts are routine for names without records.
            }
        }
        let url = self.metadata_avatar_url(name)?;
        match self.http.head(url.clone()).send().await {
            Ok(response) if response.status().is_success() => Some(url.to_string()),
            _ => None,
        }
    }

    /// Resolve through the cache; results (including misses) are written
    /// back with a fresh timestamp.
    pub async fn resolve(&self, caches: &CacheService, address: Address) -> EnsIdentity {
        let now = unix_now_ms();
        caches.prune_ens(now);

        let cached = caches.ens_entry(&address);
        match needs_refresh(cached.as_ref(), now) {
            Refresh::None => {
                let entry = cached.unwrap_or_default();
                return EnsIdentity { name: entry.name, avatar: entry.avatar };
            }
            Refresh::AvatarOnly => {
                let entry = cached.unwrap_or_default();
                let name = entry.name.clone().unwrap_or_default();
                let avatar = self.avatar_with_fallback(&name).await;
                if avatar.is_none() {
                    tracing::debug!(ens = %name, "ens avatar not found for name");
                }
                caches.set_ens_entry(
                    address,
                    EnsCacheEntry { name: entry.name.clone(), avatar: avatar.clone(), fetched_at: now },
                );
                return EnsIdentity { name: entry.name, avatar };
            }
            Refresh::Full => {}
        }

        let name = match self.mainnet.ens_name(address).await {
            Ok(name) => name,
            Err(error) => {
                // Reverse resolvers revert when unset; cache the miss either
                // way so the address is not re-probed every run.
                tracing::debug!(address = %gardens_accrual::addr_key(&address), %error, "ens lookup failed");
                caches.set_ens_entry(
                    address,
                    EnsCacheEntry { name: None, avatar: None, fetched_at: now },
                );
                return EnsIdentity::default();
            }
        };

        let avatar = match &name {
            Some(name) => self.avatar_with_fallback(name).await,
            None => None,
        };
        caches.set_ens_entry(
            address,
            EnsCacheEntry { name: name.clone(), avatar: avatar.clone(), fetched_at: now },
        );
        EnsIdentity { name, avatar }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_cache_service, FakeChain};
    use std::str::FromStr;

    #[test]
    fn namehash_matches_known_vectors() {
        // Reference vectors from EIP-137.
        assert_eq!(namehash(""), B256::ZERO);
        assert_eq!(
            namehash("eth"),
            B256::from_str("0x93cdeb708b7545dc668eb9280176169d1c33cfd8ed6f04690a0bcc88a93fc4ae")
                .unwrap()
        );
        assert_eq!(
            namehash("foo.eth"),
            B256::from_str("0xde9b09fd7c5f901e23a3f19fecc54828e9c848539801e86591bd9801b019f84f")
                .unwrap()
        );
    }

    #[test]
    fn reverse_node_uses_lowercase_hex_label() {
        let address =
            Address::from_str("0x00000000000000000000000000000000000000AA").unwrap();
        assert_eq!(
            reverse_node(&address),
            namehash("00000000000000000000000000000000000000aa.addr.reverse")
        );
    }

    #[test]
    fn refresh_decisions_follow_ttls() {
        let now = 10 * ENS_CACHE_TTL_MS;
        assert_eq!(needs_refresh(None, now), Refresh::Full);

        let fresh = EnsCacheEntry {
            name: Some("x.eth".into()),
            avatar: Some("ipfs://a".into()),
            fetched_at: now - 100,
        };
        assert_eq!(needs_refresh(Some(&fresh), now), Refresh::None);

        let expired = EnsCacheEntry { fetched_at: now - ENS_CACHE_TTL_MS, ..fresh.clone() };
        assert_eq!(needs_refresh(Some(&expired), now), Refresh::Full);

        // A cached miss never retries the avatar alone.
        let miss = EnsCacheEntry { name: None, avatar: None, fetched_at: now - 100 };
        assert_eq!(needs_refresh(Some(&miss), now), Refresh::None);
    }

    #[tokio::test]
    async fn resolved_names_are_cached() {
        let mut chain = FakeChain::new(1, vec![0]);
        let wallet = Address::repeat_byte(0x0a);
        chain.set_ens_name(wallet, "gardener.eth");
        let chain: Arc<dyn ChainClient> = Arc::new(chain);
        let caches = test_cache_service();

        let service = EnsService::new(chain)
            .with_metadata_base(Url::parse("http://127.0.0.1:9/avatar/").unwrap());
        let identity = service.resolve(&caches, wallet).await;
        assert_eq!(identity.name.as_deref(), Some("gardener.eth"));

        let cached = caches.ens_entry(&wallet).unwrap();
        assert_eq!(cached.name.as_deref(), Some("gardener.eth"));
    }

    #[tokio::test]
    async fn misses_are_cached_as_none() {
        let chain: Arc<dyn ChainClient> = Arc::new(FakeChain::new(1, vec![0]));
        let caches = test_cache_service();
        let wallet = Address::repeat_byte(0x0b);

        let service = EnsService::new(chain)
            .with_metadata_base(Url::parse("http://127.0.0.1:9/avatar/").unwrap());
        let identity = service.resolve(&caches, wallet).await;
        assert_eq!(identity, EnsIdentity::default());
        let cached = caches.ens_entry(&wallet).unwrap();
        assert!(cached.name.is_none());
    }
}
