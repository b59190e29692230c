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

//! Diffs freshly computed point targets against totals already recorded by
//! the external ledger, emitting minimal signed delta events.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::str::FromStr;

use alloy::primitives::Address;

use crate::points::PointTargets;

/// The categories the pipeline itself produces. The multi-chain campaign
/// additionally adopts any category name observed in ledger history so
/// unknown categories round-trip untouched.
pub const BASE_CATEGORIES: [&str; 4] =
    ["fundPoints", "streamPoints", "governanceStakePoints", "farcasterPoints"];

pub type CategoryTotals = BTreeMap<String, i64>;

/// One signed correction to push to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaEvent {
    pub account: Address,
    pub category: String,
    pub points: i64,
    pub target: i64,
    pub existing: i64,
}

/// Sum a full-history event sweep into per-wallet, per-category totals.
///
/// With `adopt_unknown_categories`, every event name seen extends the
/// category set; otherwise events outside [`BASE_CATEGORIES`] are ignored.
/// Events without a parseable `0x…` account are skipped.
pub fn sum_existing_totals<'a>(
    events: impl IntoIterator<Item = (&'a str, &'a str, i64)>,
    adopt_unknown_categories: bool,
) -> (HashMap<Address, CategoryTotals>, BTreeSet<String>) {
    let mut categories: BTreeSet<String> =
        BASE_CATEGORIES.iter().map(|s| s.to_string()).collect();
    let mut totals: HashMap<Address, CategoryTotals> = HashMap::new();

    for (name, account, points) in events {
        if name.is_empty() {
            continue;
        }
        if !categories.contains(name) {
            if !adopt_unknown_categories {
                continue;
            }
            categories.insert(name.to_string());
        }
        let Ok(address) = Address::from_str(account) else {
            continue;
        };
        *totals.entry(address).or_default().entry(name.to_string()).or_insert(0) += points;
    }

    (totals, categories)
}

/// Compute the delta events for the current target set, including zeroing
/// retractions for every address present in ledger history but absent from
/// the targets. Re-running with unchanged inputs yields no events.
pub fn compute_deltas(
    targets: &BTreeMap<Address, PointTargets>,
    existing: &HashMap<Address, CategoryTotals>,
    categories: &BTreeSet<String>,
) -> Vec<DeltaEvent> {
    let mut deltas = Vec::new();

    for (address, target) in targets {
        let recorded = existing.get(address);
        for name in categories {
            let target_points = target.category(name);
            let existing_points = recorded.and_then(|r| r.get(name)).copied().unwrap_or(0);
            let delta = target_points - existing_points;
            if delta != 0 {
                deltas.push(DeltaEvent {
                    account: *address,
                    category: name.clone(),
                    points: delta,
                    target: target_points,
                    existing: existing_points,
                });
            }
        }
    }

    // Retract every wallet the ledger knows that the current run does not.
    for (address, recorded) in existing {
        if targets.contains_key(address) {
            continue;
        }
        for name in categories {
            let existing_points = recorded.get(name).copied().unwrap_or(0);
            if existing_points != 0 {
                deltas.push(DeltaEvent {
                    account: *address,
                    category: name.clone(),
                    points: -existing_points,
                    target: 0,
                    existing: existing_points,
                });
            }
        }
    }

    deltas
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn addr_str(byte: u8) -> String {
        format!("{:#x}", addr(byte))
    }

    #[test]
    fn sweep_sums_events_by_category() {
        let a = addr_str(1);
        let events = vec![
            ("fundPoints", a.as_str(), 10),
            ("fundPoints", a.as_str(), 5),
            ("streamPoints", a.as_str(), 3),
            ("fundPoints", "not-an-address", 99),
        ];
        let (totals, categories) = sum_existing_totals(events, false);
        let recorded = &totals[&addr(1)];
        assert_eq!(recorded["fundPoints"], 15);
        assert_eq!(recorded["streamPoints"], 3);
        assert_eq!(categories.len(), BASE_CATEGORIES.len());
    }

    #[test]
    fn unknown_categories_adopted_only_when_requested() {
        let a = addr_str(1);
        let events = vec![("referralPoints", a.as_str(), 7)];

        let (totals, categories) = sum_existing_totals(events.clone(), true);
        assert!(categories.contains("referralPoints"));
        assert_eq!(totals[&addr(1)]["referralPoints"], 7);

        let (totals, categories) = sum_existing_totals(events, false);
        assert!(!categories.contains("referralPoints"));
        assert!(totals.is_empty());
    }

    #[test]
    fn second_run_with_unchanged_inputs_is_a_no_op() {
        let mut targets = BTreeMap::new();
        targets.insert(
            addr(1),
            PointTargets { fund: 50, stream: 2, governance: 0, farcaster: 1 },
        );

        let a = addr_str(1);
        let events = vec![
            ("fundPoints", a.as_str(), 50),
            ("streamPoints", a.as_str(), 2),
            ("farcasterPoints", a.as_str(), 1),
        ];
        let (existing, categories) = sum_existing_totals(events, true);
        let deltas = compute_deltas(&targets, &existing, &categories);
        assert!(deltas.is_empty());
    }

    #[test]
    fn emits_only_changed_categories() {
        let mut targets = BTreeMap::new();
        targets.insert(
            addr(1),
            PointTargets { fund: 60, stream: 2, governance: 0, farcaster: 0 },
        );

        let a = addr_str(1);
        let events = vec![("fundPoints", a.as_str(), 50), ("streamPoints", a.as_str(), 2)];
        let (existing, categories) = sum_existing_totals(events, true);
        let deltas = compute_deltas(&targets, &existing, &categories);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].category, "fundPoints");
        assert_eq!(deltas[0].points, 10);
        assert_eq!(deltas[0].target, 60);
        assert_eq!(deltas[0].existing, 50);
    }

    #[test]
    fn vanished_wallet_is_retracted_to_zero() {
        let targets = BTreeMap::new();
        let a = addr_str(7);
        let events = vec![("fundPoints", a.as_str(), 5), ("farcasterPoints", a.as_str(), 1)];
        let (existing, categories) = sum_existing_totals(events, true);

        let mut deltas = compute_deltas(&targets, &existing, &categories);
        deltas.sort_by(|x, y| x.category.cmp(&y.category));
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].category, "farcasterPoints");
        assert_eq!(deltas[0].points, -1);
        assert_eq!(deltas[1].category, "fundPoints");
        assert_eq!(deltas[1].points, -5);
        assert!(deltas.iter().all(|d| d.target == 0));
    }

    #[test]
    fn adopted_category_zeroed_for_current_wallets() {
        // A wallet in the current target set with an adopted legacy category
        // gets that category zeroed (target is always 0 for unknown names).
        let mut targets = BTreeMap::new();
        targets.insert(
            addr(1),
            PointTargets { fund: 10, stream: 0, governance: 0, farcaster: 0 },
        );
        let a = addr_str(1);
        let events = vec![("fundPoints", a.as_str(), 10), ("legacyPoints", a.as_str(), 4)];
        let (existing, categories) = sum_existing_totals(events, true);

        let deltas = compute_deltas(&targets, &existing, &categories);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].category, "legacyPoints");
        assert_eq!(deltas[0].points, -4);
    }
}
