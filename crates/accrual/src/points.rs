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

//! Point-target formulas. The two campaign variants use deliberately
//! different constants and floors; each constructor is literal
//! configuration, never derived from the other.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::{addr_key, WalletTotals};

/// How a wallet's accumulated fund/stream amounts become integer points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointsFormula {
    /// Per-wallet minimum (in the campaign's unit) below which a category
    /// yields zero points.
    pub contribution_min: f64,
    pub fund_divisor: f64,
    pub stream_divisor: f64,
    /// Bonus-community members with any positive governance accrual are
    /// floored to at least one governance point.
    pub governance_bonus_floor: bool,
}

impl PointsFormula {
    /// Multi-chain USD campaign: $10 floor, one point per whole dollar.
    pub fn usd_campaign() -> Self {
        Self {
            contribution_min: 10.0,
            fund_divisor: 1.0,
            stream_divisor: 1.0,
            governance_bonus_floor: true,
        }
    }

    /// GoodDollar campaign: no floor, one point per 1000 G$.
    pub fn gooddollar_campaign() -> Self {
        Self {
            contribution_min: 0.0,
            fund_divisor: 1000.0,
            stream_divisor: 1000.0,
            governance_bonus_floor: false,
        }
    }

    pub fn compute(
        &self,
        totals: &WalletTotals,
        governance_raw: f64,
        is_follower: bool,
        is_bonus_member: bool,
    ) -> PointTargets {
        let fund = if totals.fund >= self.contribution_min && totals.fund > 0.0 {
            (totals.fund / self.fund_divisor).floor() as i64
        } else {
            0
        };
        let stream = if totals.stream >= self.contribution_min && totals.stream > 0.0 {
            (totals.stream / self.stream_divisor).floor() as i64
        } else {
            0
        };
        let governance = if governance_raw > 0.0 {
            let floored = governance_raw.floor() as i64;
            if self.governance_bonus_floor && is_bonus_member {
                floored.max(1)
            } else {
                floored
            }
        } else {
            0
        };
        let farcaster = i64::from(is_follower);

        PointTargets { fund, stream, governance, farcaster }
    }
}

/// Integer point counts per fixed category. The reconciler widens these
/// into a category map when the ledger knows additional category names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointTargets {
    #[serde(rename = "fundPoints")]
    pub fund: i64,
    #[serde(rename = "streamPoints")]
    pub stream: i64,
    #[serde(rename = "governanceStakePoints")]
    pub governance: i64,
    #[serde(rename = "farcasterPoints")]
    pub farcaster: i64,
}

impl PointTargets {
    pub fn total(&self) -> i64 {
        self.fund + self.stream + self.governance + self.farcaster
    }

    pub fn category(&self, name: &str) -> i64 {
        match name {
            "fundPoints" => self.fund,
            "streamPoints" => self.stream,
            "governanceStakePoints" => self.governance,
            "farcasterPoints" => self.farcaster,
            _ => 0,
        }
    }

    /// `addr|fund|stream|governance|farcaster|total`, the idempotence key
    /// stored alongside each synced database row.
    pub fn checksum(&self, address: &Address) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            addr_key(address),
            self.fund,
            self.stream,
            self.governance,
            self.farcaster,
            self.total()
        )
    }
}

/// CSV fallback export of the wallet breakdown.
pub fn build_wallet_csv(entries: &[(Address, PointTargets)]) -> String {
    let mut out = String::from(
        "Wallet,Total Pts,Fund Pts,Stream Pts,Superfluid Activity Pts,Governance Stake Pts,Farcaster Pts",
    );
    for (address, targets) in entries {
        out.push('\n');
        out.push_str(&format!(
            "{},{},{},{},{},{}",
            addr_key(address),
            targets.total(),
            targets.fund,
            targets.stream,
            targets.governance,
            targets.farcaster,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn usd_fund_threshold_boundary() {
        let formula = PointsFormula::usd_campaign();
        let below = formula.compute(
            &WalletTotals { fund: 9.99, stream: 0.0 },
            0.0,
            false,
            false,
        );
        assert_eq!(below.fund, 0);

        let exact = formula.compute(
            &WalletTotals { fund: 1000.0, stream: 0.0 },
            0.0,
            false,
            false,
        );
        assert_eq!(exact.fund, 1000);
    }

    #[test]
    fn gooddollar_divides_by_thousand() {
        let formula = PointsFormula::gooddollar_campaign();
        let targets = formula.compute(
            &WalletTotals { fund: 1000.0, stream: 2500.0 },
            0.0,
            false,
            false,
        );
        assert_eq!(targets.fund, 1);
        assert_eq!(targets.stream, 2);
    }

    #[test]
    fn gooddollar_has_no_contribution_floor() {
        let formula = PointsFormula::gooddollar_campaign();
        let targets = formula.compute(
            &WalletTotals { fund: 4500.0, stream: 0.0 },
            0.0,
            false,
            false,
        );
        assert_eq!(targets.fund, 4);
    }

    #[test]
    fn governance_bonus_floor_applies_only_with_positive_accrual() {
        let formula = PointsFormula::usd_campaign();
        let member = formula.compute(&WalletTotals::default(), 0.4, false, true);
        assert_eq!(member.governance, 1);

        let non_member = formula.compute(&WalletTotals::default(), 0.4, false, false);
        assert_eq!(non_member.governance, 0);

        let idle_member = formula.compute(&WalletTotals::default(), 0.0, false, true);
        assert_eq!(idle_member.governance, 0);
    }

    #[test]
    fn farcaster_follower_earns_one_point() {
        let formula = PointsFormula::usd_campaign();
        let targets = formula.compute(&WalletTotals::default(), 0.0, true, false);
        assert_eq!(targets.farcaster, 1);
        assert_eq!(targets.total(), 1);
    }

    #[test]
    fn checksum_matches_row_format() {
        let address =
            Address::from_str("0x00000000000000000000000000000000000000aa").unwrap();
        let targets = PointTargets { fund: 50, stream: 0, governance: 0, farcaster: 0 };
        assert_eq!(
            targets.checksum(&address),
            "0x00000000000000000000000000000000000000aa|50|0|0|0|50"
        );
    }

    #[test]
    fn csv_has_header_and_one_row_per_wallet() {
        let address =
            Address::from_str("0x00000000000000000000000000000000000000aa").unwrap();
        let csv = build_wallet_csv(&[(
            address,
            PointTargets { fund: 2, stream: 3, governance: 1, farcaster: 1 },
        )]);
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("Wallet,Total Pts"));
        assert_eq!(
            lines.next().unwrap(),
            "0x00000000000000000000000000000000000000aa,7,2,3,1,1"
        );
    }
}
