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

//! Accrual math and reconciliation for the Gardens campaign points pipeline.
//!
//! This crate is pure computation: stream-flow accrual over a campaign
//! window, point-target formulas per campaign variant, and the delta
//! reconciler that diffs freshly computed targets against totals previously
//! recorded by the external points ledger. All chain and network I/O lives
//! in `gardens-indexer`.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

pub mod points;
pub mod reconcile;
pub mod streaming;

pub use points::{build_wallet_csv, PointTargets, PointsFormula};
pub use reconcile::{compute_deltas, sum_existing_totals, CategoryTotals, DeltaEvent};
pub use streaming::{accrue_streams, FlowUpdate, StreamAccrual};

/// The `[start, end]` UNIX-second interval over which accrual is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignWindow {
    pub start: u64,
    pub end: u64,
}

impl CampaignWindow {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Version string tagging every persisted cache. A changed window
    /// invalidates creation-block caches and un-tags (but never drops)
    /// transfer-log caches.
    pub fn version(&self) -> String {
        format!("{}-{}", self.start as u128 * 1000, self.end as u128 * 1000)
    }

    /// Accrual never runs past the present.
    pub fn effective_end(&self, now: u64) -> u64 {
        self.end.min(now)
    }

    pub fn ended_at(&self, now: u64) -> bool {
        now > self.end
    }
}

/// Per-wallet accumulator, in USD for the multi-chain campaign and in raw
/// token units for the GoodDollar campaign.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WalletTotals {
    pub fund: f64,
    pub stream: f64,
}

impl WalletTotals {
    pub fn add(&mut self, other: &WalletTotals) {
        self.fund += other.fund;
        self.stream += other.stream;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Fund,
    Stream,
    Governance,
}

/// One audit-trail entry per contributing event. Purely additive, exported
/// with the snapshot for downstream consumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletActivity {
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub amount: f64,
    pub pool_address: Option<String>,
    pub pool_name: Option<String>,
    pub community_id: Option<String>,
    pub community_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_percent: Option<f64>,
    pub token: String,
    pub chain_id: u64,
    pub bonus_applied: bool,
}

/// Canonical lowercase `0x…` form used for cache keys, checksums and
/// response payloads.
pub fn addr_key(address: &Address) -> String {
    format!("{address:#x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn campaign_version_is_millisecond_range() {
        let window = CampaignWindow::new(1_700_000_000, 1_705_000_000);
        assert_eq!(window.version(), "1700000000000-1705000000000");
    }

    #[test]
    fn effective_end_clamps_to_now() {
        let window = CampaignWindow::new(100, 200);
        assert_eq!(window.effective_end(150), 150);
        assert_eq!(window.effective_end(300), 200);
        assert!(!window.ended_at(200));
        assert!(window.ended_at(201));
    }

    #[test]
    fn addr_key_is_lowercase_prefixed() {
        let addr = Address::from_str("0xEC83D957F8AA4E9601BC74608EBCBC862ECA52AB").unwrap();
        assert_eq!(addr_key(&addr), "0xec83d957f8aa4e9601bc74608ebcbc862eca52ab");
    }
}
