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

//! Fetches ERC-20 `Transfer` logs into funding pools with a merge-on-overlap
//! cache and adaptive range-shrinking retry against flaky providers.

use std::collections::HashMap;

use alloy::primitives::Address;
use gardens_accrual::addr_key;
use serde::{Deserialize, Serialize};

use crate::{
    cache::CacheService,
    chain::{ChainClient, ChainError, TransferLog},
};

/// Default pagination ceiling for one `eth_getLogs` call.
pub const DEFAULT_MAX_RANGE: u64 = 10_000;
/// Shrinking stops here; a chunk that still fails at this size is skipped.
pub const MIN_RANGE: u64 = 200;

/// One contiguous covered interval of cached logs per `(token, recipient)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferLogCacheEntry {
    pub start_block: u64,
    pub end_block: u64,
    pub logs: Vec<TransferLog>,
}

pub fn cache_key(token: &Address, recipient: &Address) -> String {
    format!("{}_{}", addr_key(token), addr_key(recipient))
}

/// Deduplicated union of two log sets, keyed by `(transaction_hash,
/// log_index)` and ordered by `(block_number, log_index)`.
pub fn merge_logs(existing: &[TransferLog], incoming: &[TransferLog]) -> Vec<TransferLog> {
    let mut by_key = HashMap::new();
    for log in existing.iter().chain(incoming) {
        by_key.insert((log.transaction_hash, log.log_index), log.clone());
    }
    let mut merged: Vec<TransferLog> = by_key.into_values().collect();
    merged.sort_by_key(|log| (log.block_number, log.log_index));
    merged
}

/// Cached transfer-log lookup. Uncovered sub-ranges (a gap before the cached
/// start, a tail after the cached end) are fetched from the chain and merged
/// so the entry stays one contiguous interval.
pub async fn fetch_transfer_logs(
    chain: &dyn ChainClient,
    caches: &CacheService,
    token: Address,
    recipient: Address,
    from_block: u64,
    to_block: u64,
    max_range: u64,
) -> Result<Vec<TransferLog>, ChainError> {
    if from_block > to_block {
        return Ok(Vec::new());
    }
    let key = cache_key(&token, &recipient);
    let latest = chain.latest_block().await?;
    if from_block > latest {
        tracing::warn!(
            cache_key = %key,
            start = from_block,
            latest,
            "transfer log fetch start beyond chain head, skipping"
        );
        return Ok(Vec::new());
    }
    let effective_to = to_block.min(latest);

    let Some(cached) = caches.transfer_entry(&key) else {
        let logs =
            fetch_from_chain(chain, token, recipient, from_block, effective_to, max_range).await?;
        let merged = merge_logs(&[], &logs);
        tracing::debug!(cache_key = %key, count = merged.len(), "transfer log fetch completed");
        caches.put_transfer_entry(
            key,
            TransferLogCacheEntry {
                start_block: from_block,
                end_block: effective_to,
                logs: merged.clone(),
            },
        );
        return Ok(merged);
    };

    let mut fetched = Vec::new();
    if from_block < cached.start_block {
        let gap = fetch_from_chain(
            chain,
            token,
            recipient,
            from_block,
            cached.start_block - 1,
            max_range,
        )
        .await?;
        fetched.extend(gap);
    }
    if effective_to > cached.end_block {
        let tail = fetch_from_chain(
            chain,
            token,
            recipient,
            cached.end_block + 1,
            effective_to,
            max_range,
        )
        .await?;
        fetched.extend(tail);
    }

    if fetched.is_empty() && from_block >= cached.start_block && effective_to <= cached.end_block {
        // Fully covered: serve from cache.
        return Ok(slice_range(&cached.logs, from_block, effective_to));
    }

    let merged = merge_logs(&cached.logs, &fetched);
    let entry = TransferLogCacheEntry {
        start_block: cached.start_block.min(from_block),
        end_block: cached.end_block.max(effective_to),
        logs: merged.clone(),
    };
    caches.put_transfer_entry(key, entry);
    Ok(slice_range(&merged, from_block, effective_to))
}

fn slice_range(logs: &[TransferLog], from: u64, to: u64) -> Vec<TransferLog> {
    logs.iter().filter(|log| log.block_number >= from && log.block_number <= to).cloned().collect()
}

/// Paginated chain fetch. A shrinkable provider error halves the chunk size
/// down to [`MIN_RANGE`]; a chunk that still fails there is skipped so one
/// pathological range cannot stall the whole accrual.
pub async fn fetch_from_chain(
    chain: &dyn ChainClient,
    token: Address,
    recipient: Address,
    from_block: u64,
    to_block: u64,
    max_range: u64,
) -> Result<Vec<TransferLog>, ChainError> {
    let mut logs = Vec::new();
    let mut end_block = to_block;
    let total_range = end_block.saturating_sub(from_block) + 1;
    let mut range = max_range.max(MIN_RANGE);
    let mut start = from_block;

    while start <= end_block {
        let latest = chain.latest_block().await?;
        if start > latest {
            break;
        }
        let chunk_end = (start + range).min(end_block).min(latest);
        if chunk_end < start {
            break;
        }
        match chain.transfer_logs(token, recipient, start, chunk_end).await {
            Ok(chunk) => {
                logs.extend(chunk);
                let processed = chunk_end - from_block + 1;
                tracing::debug!(
                    token = %addr_key(&token),
                    recipient = %addr_key(&recipient),
                    from = start,
                    to = chunk_end,
                    total = logs.len(),
                    percent = processed * 100 / total_range,
                    "transfer log page"
                );
                if chunk_end == to_block {
                    break;
                }
                start = chunk_end + 1;
            }
            Err(error) if error.is_shrinkable() && range > MIN_RANGE => {
                range = (range / 2).max(MIN_RANGE);
                tracing::warn!(
                    token = %addr_key(&token),
                    range,
                    %error,
                    "reducing transfer log range after provider error"
                );
                let refreshed = chain.latest_block().await?;
                if refreshed < end_block {
                    end_block = refreshed;
                    if start > refreshed {
                        break;
                    }
                }
            }
            Err(error) if error.is_shrinkable() => {
                tracing::warn!(
                    skipped_from = start,
                    skipped_to = chunk_end,
                    %error,
                    "transfer log chunk failing at minimum range, skipping"
                );
                start = chunk_end + 1;
            }
            Err(error) => return Err(error),
        }
    }

    Ok(logs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_cache_service, transfer, FakeChain};
    use proptest::prelude::*;

    const TOKEN: Address = Address::repeat_byte(0x11);
    const POOL: Address = Address::repeat_byte(0x22);

    #[tokio::test]
    async fn uncached_fetch_populates_cache() {
        let mut chain = FakeChain::new(1, (0..=1_000u64).map(|n| n * 2).collect());
        chain.add_transfer(TOKEN, POOL, transfer(0xa1, 100, 500, 0));
        let caches = test_cache_service();

        let logs =
            fetch_transfer_logs(&chain, &caches, TOKEN, POOL, 0, 900, DEFAULT_MAX_RANGE)
                .await
                .unwrap();
        assert_eq!(logs.len(), 1);

        let entry = caches.transfer_entry(&cache_key(&TOKEN, &POOL)).unwrap();
        assert_eq!((entry.start_block, entry.end_block), (0, 900));
        assert!(caches.transfer_cache_dirty());
    }

    #[tokio::test]
    async fn covered_range_served_from_cache_without_rpc() {
        let mut chain = FakeChain::new(1, (0..=1_000u64).map(|n| n * 2).collect());
        chain.add_transfer(TOKEN, POOL, transfer(0xa1, 100, 300, 0));
        let caches = test_cache_service();
        caches.put_transfer_entry(
            cache_key(&TOKEN, &POOL),
            TransferLogCacheEntry {
                start_block: 0,
                end_block: 900,
                logs: vec![transfer(0xa1, 100, 300, 0)],
            },
        );
        caches.clear_transfer_dirty_for_test();

        let logs =
            fetch_transfer_logs(&chain, &caches, TOKEN, POOL, 200, 400, DEFAULT_MAX_RANGE)
                .await
                .unwrap();
        assert_eq!(logs.len(), 1);
        assert!(!caches.transfer_cache_dirty());
    }

    #[tokio::test]
    async fn gap_and_tail_extend_cache_to_union_interval() {
        let mut chain = FakeChain::new(1, (0..=1_000u64).map(|n| n * 2).collect());
        chain.add_transfer(TOKEN, POOL, transfer(0xa1, 50, 60, 0));
        chain.add_transfer(TOKEN, POOL, transfer(0xa2, 75, 150, 0));
        chain.add_transfer(TOKEN, POOL, transfer(0xa3, 99, 250, 0));
        let caches = test_cache_service();
        caches.put_transfer_entry(
            cache_key(&TOKEN, &POOL),
            TransferLogCacheEntry {
                start_block: 100,
                end_block: 200,
                logs: vec![transfer(0xa2, 75, 150, 0)],
            },
        );

        let logs =
            fetch_transfer_logs(&chain, &caches, TOKEN, POOL, 40, 300, DEFAULT_MAX_RANGE)
                .await
                .unwrap();
        assert_eq!(logs.len(), 3);

        let entry = caches.transfer_entry(&cache_key(&TOKEN, &POOL)).unwrap();
        assert_eq!((entry.start_block, entry.end_block), (40, 300));
        assert_eq!(entry.logs.len(), 3);
    }

    #[tokio::test]
    async fn requested_range_clamps_to_chain_head() {
        let mut chain = FakeChain::new(1, (0..=100u64).map(|n| n * 2).collect());
        chain.add_transfer(TOKEN, POOL, transfer(0xa1, 10, 90, 0));
        let caches = test_cache_service();

        let logs =
            fetch_transfer_logs(&chain, &caches, TOKEN, POOL, 0, 10_000, DEFAULT_MAX_RANGE)
                .await
                .unwrap();
        assert_eq!(logs.len(), 1);
        let entry = caches.transfer_entry(&cache_key(&TOKEN, &POOL)).unwrap();
        assert_eq!(entry.end_block, 100);
    }

    #[tokio::test]
    async fn provider_range_limit_triggers_shrinking() {
        let mut chain = FakeChain::new(1, (0..=5_000u64).map(|n| n * 2).collect());
        chain.max_logs_range = Some(300);
        for block in [100u64, 2_500, 4_900] {
            chain.add_transfer(TOKEN, POOL, transfer(0xa1, 10, block, 0));
        }

        let logs = fetch_from_chain(&chain, TOKEN, POOL, 0, 5_000, DEFAULT_MAX_RANGE)
            .await
            .unwrap();
        assert_eq!(logs.len(), 3);
    }

    #[tokio::test]
    async fn chunk_failing_at_floor_is_skipped_not_fatal() {
        let mut chain = FakeChain::new(1, (0..=5_000u64).map(|n| n * 2).collect());
        // Tighter than the shrink floor: every chunk keeps failing.
        chain.max_logs_range = Some(50);
        chain.add_transfer(TOKEN, POOL, transfer(0xa1, 10, 100, 0));

        let logs = fetch_from_chain(&chain, TOKEN, POOL, 0, 5_000, DEFAULT_MAX_RANGE)
            .await
            .unwrap();
        assert!(logs.is_empty());
    }

    proptest! {
        #[test]
        fn merge_is_deduplicated_union_in_order(
            left in proptest::collection::vec((0u64..50, 0u64..4, 0u8..8), 0..24),
            right in proptest::collection::vec((0u64..50, 0u64..4, 0u8..8), 0..24),
        ) {
            let to_logs = |spec: &[(u64, u64, u8)]| {
                spec.iter()
                    .map(|(block, idx, tx)| transfer(*tx, 1, *block, *idx))
                    .collect::<Vec<_>>()
            };
            let a = to_logs(&left);
            let b = to_logs(&right);
            let merged = merge_logs(&a, &b);

            // Sorted by (block, log index).
            for pair in merged.windows(2) {
                prop_assert!(
                    (pair[0].block_number, pair[0].log_index)
                        <= (pair[1].block_number, pair[1].log_index)
                );
            }
            // No duplicate (tx, log index) keys.
            let mut keys: Vec<_> =
                merged.iter().map(|l| (l.transaction_hash, l.log_index)).collect();
            keys.sort();
            keys.dedup();
            prop_assert_eq!(keys.len(), merged.len());
            // Every input key survives.
            for log in a.iter().chain(b.iter()) {
                prop_assert!(merged
                    .iter()
                    .any(|m| m.transaction_hash == log.transaction_hash
                        && m.log_index == log.log_index));
            }
        }
    }
}
