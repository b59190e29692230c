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

//! Cron-driven point-accrual pipeline for Gardens funding campaigns.
//!
//! The pipeline reconciles on-chain activity (ERC-20 transfers into funding
//! pools, Superfluid streams, governance stakes) and the Farcaster social
//! graph into per-wallet point totals, pushes signed deltas to an external
//! points ledger, mirrors rows into a Notion database, and persists its
//! mutable caches to a content-addressed store between runs.

use thiserror::Error;

pub mod api;
pub mod blocks;
pub mod cache;
pub mod chain;
pub mod config;
pub mod identity;
pub mod ledger;
pub mod notion;
pub mod prices;
pub mod processor;
pub mod runlog;
pub mod service;
pub mod store;
pub mod subgraph;
pub mod test_utils;
pub mod transfer_logs;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("chain error: {0}")]
    Chain(#[from] chain::ChainError),

    #[error("subgraph error: {0}")]
    Subgraph(#[from] subgraph::SubgraphError),

    #[error("content store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("points ledger error: {0}")]
    Ledger(#[from] ledger::LedgerError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Current UNIX time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Current UNIX time in milliseconds, the resolution identity and price
/// cache timestamps are stored at.
pub fn unix_now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
