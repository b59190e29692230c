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

//! Converts a sequence of Superfluid flow-rate-change events into accrued
//! amounts per sender over a campaign window.

use std::collections::HashMap;

use alloy::primitives::{
    utils::{format_units, ParseUnits},
    Address, U256,
};

use crate::CampaignWindow;

/// A single flow-rate change observed on the Superfluid subgraph: the
/// sender's token-per-second rate to the pool changed to `flow_rate` at
/// `timestamp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowUpdate {
    pub sender: Address,
    pub flow_rate: U256,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Default)]
pub struct StreamAccrual {
    /// Senders whose total met the counting threshold, with their accrued
    /// amount (USD or token units depending on the campaign).
    pub per_sender: HashMap<Address, f64>,
    /// Sum over counted senders only.
    pub counted_total: f64,
    /// Sum over every sender, used for pool-level reporting.
    pub grand_total: f64,
}

/// Accrue streamed amounts per sender over `[window.start, min(now, window.end)]`.
///
/// Events are grouped by sender and walked in timestamp order with
/// `(last_ts, last_rate)` starting at `(window.start, 0)`. An event at or
/// before the window start establishes the pre-window rate without accruing
/// anything; each later event closes the previous segment at
/// `min(ts, effective_end)`, and a final open-ended segment runs from the
/// last event to the effective end. Senders whose total falls below
/// `sender_min` still contribute to the grand total but not to the counted
/// total or the per-sender map.
pub fn accrue_streams(
    updates: &[FlowUpdate],
    token_decimals: u8,
    unit_price: f64,
    window: CampaignWindow,
    now: u64,
    sender_min: f64,
) -> StreamAccrual {
    let effective_end = window.effective_end(now);

    let mut by_sender: HashMap<Address, Vec<(u64, U256)>> = HashMap::new();
    for update in updates {
        by_sender.entry(update.sender).or_default().push((update.timestamp, update.flow_rate));
    }

    let mut accrual = StreamAccrual::default();
    for (sender, mut events) in by_sender {
        events.sort_by_key(|(ts, _)| *ts);

        let mut last_ts = window.start;
        let mut last_rate = U256::ZERO;
        let mut total = 0.0;

        for (ts, rate) in events {
            if ts <= window.start {
                // Establishes the rate already flowing when the window opens.
                last_rate = rate;
                last_ts = window.start;
                continue;
            }

            let seg_end = ts.min(effective_end);
            if last_ts < seg_end && last_rate > U256::ZERO {
                total += segment_amount(last_rate, seg_end - last_ts, token_decimals) * unit_price;
            }
            last_ts = ts;
            last_rate = rate;
            if last_ts >= effective_end {
                break;
            }
        }

        if last_ts < effective_end && last_rate > U256::ZERO {
            total += segment_amount(last_rate, effective_end - last_ts, token_decimals) * unit_price;
        }

        if total > 0.0 {
            accrual.grand_total += total;
            if total >= sender_min {
                accrual.counted_total += total;
                accrual.per_sender.insert(sender, total);
            }
        }
    }

    accrual
}

fn segment_amount(rate: U256, duration_secs: u64, decimals: u8) -> f64 {
    let streamed = rate.saturating_mul(U256::from(duration_secs));
    format_units(ParseUnits::U256(streamed), decimals)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DECIMALS: u8 = 18;

    fn sender(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn rate_per_sec(tokens: u64) -> U256 {
        U256::from(tokens) * U256::from(10u64).pow(U256::from(DECIMALS))
    }

    #[test]
    fn two_rate_changes_inside_window() {
        // r0 from t0..t1, then r1 from t1..window end (window end < now).
        let window = CampaignWindow::new(1_000, 2_000);
        let updates = [
            FlowUpdate { sender: sender(1), flow_rate: rate_per_sec(2), timestamp: 1_100 },
            FlowUpdate { sender: sender(1), flow_rate: rate_per_sec(5), timestamp: 1_500 },
        ];

        let accrual = accrue_streams(&updates, DECIMALS, 1.0, window, 3_000, 0.0);
        // 2 tok/s * (1500-1100) + 5 tok/s * (2000-1500)
        let expected = 2.0 * 400.0 + 5.0 * 500.0;
        assert_eq!(accrual.per_sender[&sender(1)], expected);
        assert_eq!(accrual.counted_total, expected);
        assert_eq!(accrual.grand_total, expected);
    }

    #[test]
    fn pre_window_event_sets_rate_without_accruing() {
        let window = CampaignWindow::new(1_000, 2_000);
        let updates = [FlowUpdate {
            sender: sender(1),
            flow_rate: rate_per_sec(1),
            timestamp: 500,
        }];

        let accrual = accrue_streams(&updates, DECIMALS, 1.0, window, 3_000, 0.0);
        // The stream was already open: it accrues from window start, not t=500.
        assert_eq!(accrual.per_sender[&sender(1)], 1_000.0);
    }

    #[test]
    fn open_ended_stream_clamps_to_now() {
        let window = CampaignWindow::new(1_000, 10_000);
        let updates = [FlowUpdate {
            sender: sender(1),
            flow_rate: rate_per_sec(3),
            timestamp: 1_200,
        }];

        let accrual = accrue_streams(&updates, DECIMALS, 1.0, window, 2_000, 0.0);
        assert_eq!(accrual.per_sender[&sender(1)], 3.0 * 800.0);
    }

    #[test]
    fn stream_closed_mid_window_stops_accruing() {
        let window = CampaignWindow::new(0, 1_000);
        let updates = [
            FlowUpdate { sender: sender(1), flow_rate: rate_per_sec(4), timestamp: 100 },
            FlowUpdate { sender: sender(1), flow_rate: U256::ZERO, timestamp: 300 },
        ];

        let accrual = accrue_streams(&updates, DECIMALS, 1.0, window, 5_000, 0.0);
        assert_eq!(accrual.per_sender[&sender(1)], 4.0 * 200.0);
    }

    #[test]
    fn below_threshold_senders_feed_grand_total_only() {
        let window = CampaignWindow::new(0, 100);
        let updates = [
            // 100 tokens total at $1: below a $150 floor.
            FlowUpdate { sender: sender(1), flow_rate: rate_per_sec(1), timestamp: 0 },
            // 500 tokens: counted.
            FlowUpdate { sender: sender(2), flow_rate: rate_per_sec(5), timestamp: 0 },
        ];

        let accrual = accrue_streams(&updates, DECIMALS, 1.0, window, 1_000, 150.0);
        assert!(!accrual.per_sender.contains_key(&sender(1)));
        assert_eq!(accrual.per_sender[&sender(2)], 500.0);
        assert_eq!(accrual.counted_total, 500.0);
        assert_eq!(accrual.grand_total, 600.0);
    }

    #[test]
    fn unit_price_scales_usd_totals() {
        let window = CampaignWindow::new(0, 100);
        let updates =
            [FlowUpdate { sender: sender(1), flow_rate: rate_per_sec(1), timestamp: 0 }];

        let accrual = accrue_streams(&updates, DECIMALS, 2.5, window, 1_000, 0.0);
        assert_eq!(accrual.per_sender[&sender(1)], 250.0);
    }

    proptest::proptest! {
        #[test]
        fn totals_are_consistent_for_arbitrary_event_sets(
            events in proptest::collection::vec(
                (0u8..4, 0u64..2_000, 0u64..10), 0..32
            ),
        ) {
            let updates: Vec<FlowUpdate> = events
                .iter()
                .map(|(s, ts, rate)| FlowUpdate {
                    sender: sender(*s),
                    flow_rate: rate_per_sec(*rate),
                    timestamp: *ts,
                })
                .collect();
            let window = CampaignWindow::new(500, 1_500);
            let accrual = accrue_streams(&updates, DECIMALS, 1.0, window, 1_200, 100.0);

            let map_sum: f64 = accrual.per_sender.values().sum();
            proptest::prop_assert!((accrual.counted_total - map_sum).abs() < 1e-6);
            proptest::prop_assert!(accrual.grand_total + 1e-9 >= accrual.counted_total);
            proptest::prop_assert!(accrual.per_sender.values().all(|v| *v >= 100.0));
        }
    }

    #[test]
    fn unordered_events_are_sorted_before_walking() {
        let window = CampaignWindow::new(0, 1_000);
        let updates = [
            FlowUpdate { sender: sender(1), flow_rate: rate_per_sec(2), timestamp: 500 },
            FlowUpdate { sender: sender(1), flow_rate: rate_per_sec(1), timestamp: 100 },
        ];

        let accrual = accrue_streams(&updates, DECIMALS, 1.0, window, 5_000, 0.0);
        // 1 tok/s for 100..500, then 2 tok/s for 500..1000.
        assert_eq!(accrual.per_sender[&sender(1)], 400.0 + 1_000.0);
    }
}
