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

//! Maps a campaign's timestamp window onto block numbers and locates
//! contract creation blocks, all by binary search over block timestamps.

use alloy::primitives::Address;

use crate::chain::{ChainClient, ChainError};

/// Smallest block whose timestamp is `>= target`. Returns the latest block
/// when the target lies beyond every mined timestamp.
pub async fn find_block_at_or_after(
    chain: &dyn ChainClient,
    target: u64,
) -> Result<u64, ChainError> {
    let latest = chain.latest_block().await?;
    let mut low = 0u64;
    let mut high = latest;
    while low < high {
        let mid = low + (high - low) / 2;
        if chain.block_timestamp(mid).await? >= target {
            high = mid;
        } else {
            low = mid + 1;
        }
    }
    Ok(high)
}

/// Largest block whose timestamp is `<= target`.
pub async fn find_block_at_or_before(
    chain: &dyn ChainClient,
    target: u64,
) -> Result<u64, ChainError> {
    let latest = chain.latest_block().await?;
    let mut low = 0u64;
    let mut high = latest;
    while low < high {
        let mid = low + (high - low + 1) / 2;
        if chain.block_timestamp(mid).await? <= target {
            low = mid;
        } else {
            high = mid - 1;
        }
    }
    Ok(low)
}

/// First block at which `address` has bytecode, searched within
/// `[search_start, search_end.unwrap_or(latest)]`. `None` means the
/// contract has no code at the upper bound, i.e. it was not deployed in
/// the searched range. Probe failures are logged and treated as "no code
/// at this block" so the search always makes progress.
pub async fn find_contract_creation_block(
    chain: &dyn ChainClient,
    address: Address,
    search_start: u64,
    search_end: Option<u64>,
) -> Result<Option<u64>, ChainError> {
    let latest = chain.latest_block().await?;
    let upper = match search_end {
        Some(end) if end > 0 && end < latest => end,
        _ => latest,
    };

    let has_code = match chain.code_exists_at(address, upper).await {
        Ok(has_code) => has_code,
        Err(error) => {
            tracing::warn!(
                %address,
                upper_bound = upper,
                %error,
                "creation block upper bound probe failed"
            );
            false
        }
    };
    if !has_code {
        return Ok(None);
    }

    let mut low = search_start;
    let mut high = upper;
    let mut found = None;

    while low <= high {
        let mid = low + (high - low) / 2;
        match chain.code_exists_at(address, mid).await {
            Ok(true) => {
                found = Some(mid);
                if mid == 0 {
                    break;
                }
                high = mid - 1;
            }
            Ok(false) => low = mid + 1,
            Err(error) => {
                tracing::warn!(%address, block = mid, %error, "creation block probe failed, advancing");
                low = mid + 1;
            }
        }
    }

    Ok(Some(found.unwrap_or(low)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeChain;

    fn chain_with_spacing(blocks: u64, spacing: u64) -> FakeChain {
        // Block n mined at n * spacing.
        FakeChain::new(1, (0..=blocks).map(|n| n * spacing).collect())
    }

    #[tokio::test]
    async fn at_or_after_returns_smallest_matching_block() {
        let chain = chain_with_spacing(100, 10);
        assert_eq!(find_block_at_or_after(&chain, 0).await.unwrap(), 0);
        assert_eq!(find_block_at_or_after(&chain, 10).await.unwrap(), 1);
        assert_eq!(find_block_at_or_after(&chain, 11).await.unwrap(), 2);
        assert_eq!(find_block_at_or_after(&chain, 999).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn at_or_after_saturates_at_latest_block() {
        let chain = chain_with_spacing(100, 10);
        assert_eq!(find_block_at_or_after(&chain, 5_000).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn at_or_before_returns_largest_matching_block() {
        let chain = chain_with_spacing(100, 10);
        assert_eq!(find_block_at_or_before(&chain, 999).await.unwrap(), 99);
        assert_eq!(find_block_at_or_before(&chain, 1_000).await.unwrap(), 100);
        assert_eq!(find_block_at_or_before(&chain, 15).await.unwrap(), 1);
        assert_eq!(find_block_at_or_before(&chain, 0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn window_bounds_are_consistent() {
        let chain = chain_with_spacing(1_000, 12);
        let start = find_block_at_or_after(&chain, 600).await.unwrap();
        let end = find_block_at_or_before(&chain, 6_000).await.unwrap();
        assert_eq!(start, 50);
        assert_eq!(end, 500);
        assert!(chain.block_timestamp(start).await.unwrap() >= 600);
        assert!(chain.block_timestamp(end).await.unwrap() <= 6_000);
    }

    #[tokio::test]
    async fn creation_block_found_by_bisection() {
        let mut chain = chain_with_spacing(100, 10);
        let pool = Address::repeat_byte(0xaa);
        chain.deploy(pool, 37);

        let found =
            find_contract_creation_block(&chain, pool, 0, None).await.unwrap();
        assert_eq!(found, Some(37));
    }

    #[tokio::test]
    async fn undeployed_contract_resolves_to_none() {
        let chain = chain_with_spacing(100, 10);
        let pool = Address::repeat_byte(0xaa);
        let found =
            find_contract_creation_block(&chain, pool, 0, None).await.unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn creation_search_respects_lower_bound() {
        let mut chain = chain_with_spacing(100, 10);
        let pool = Address::repeat_byte(0xaa);
        chain.deploy(pool, 10);

        // The pool predates the search window; the search never probes below
        // the lower bound and lands on it.
        let found =
            find_contract_creation_block(&chain, pool, 40, None).await.unwrap();
        assert_eq!(found, Some(40));
    }
}
