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

//! Test doubles shared by unit and integration tests: a scripted chain and
//! cache-service helpers.

use std::collections::HashMap;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;

use crate::{
    cache::{CacheNames, CacheService},
    chain::{ChainClient, ChainError, TransferLog},
};

/// Deterministic in-memory chain: block `n` exists with the scripted
/// timestamp, contracts have code from their deploy block onward, and
/// transfer logs are served per `(token, recipient)` pair.
pub struct FakeChain {
    pub chain_id: u64,
    /// Timestamp of block `n` at index `n`; the chain head is the last index.
    pub timestamps: Vec<u64>,
    pub deployed: HashMap<Address, u64>,
    pub transfers: HashMap<(Address, Address), Vec<TransferLog>>,
    pub decimals: HashMap<Address, u8>,
    pub symbols: HashMap<Address, String>,
    pub ens_names: HashMap<Address, String>,
    /// When set, `transfer_logs` refuses spans wider than this, mimicking a
    /// provider range cap.
    pub max_logs_range: Option<u64>,
}

impl FakeChain {
    pub fn new(chain_id: u64, timestamps: Vec<u64>) -> Self {
        Self {
            chain_id,
            timestamps,
            deployed: HashMap::new(),
            transfers: HashMap::new(),
            decimals: HashMap::new(),
            symbols: HashMap::new(),
            ens_names: HashMap::new(),
            max_logs_range: None,
        }
    }

    pub fn deploy(&mut self, address: Address, block: u64) {
        self.deployed.insert(address, block);
    }

    pub fn add_transfer(&mut self, token: Address, recipient: Address, log: TransferLog) {
        self.transfers.entry((token, recipient)).or_default().push(log);
    }

    pub fn set_decimals(&mut self, token: Address, decimals: u8) {
        self.decimals.insert(token, decimals);
    }

    pub fn set_symbol(&mut self, token: Address, symbol: &str) {
        self.symbols.insert(token, symbol.to_string());
    }

    pub fn set_ens_name(&mut self, address: Address, name: &str) {
        self.ens_names.insert(address, name.to_string());
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn latest_block(&self) -> Result<u64, ChainError> {
        Ok(self.timestamps.len().saturating_sub(1) as u64)
    }

    async fn block_timestamp(&self, number: u64) -> Result<u64, ChainError> {
        self.timestamps
            .get(number as usize)
            .copied()
            .ok_or_else(|| ChainError::Other(anyhow::anyhow!("block {number} not found")))
    }

    async fn code_exists_at(&self, address: Address, block: u64) -> Result<bool, ChainError> {
        Ok(self.deployed.get(&address).is_some_and(|deployed| block >= *deployed))
    }

    async fn transfer_logs(
        &self,
        token: Address,
        recipient: Address,
        from: u64,
        to: u64,
    ) -> Result<Vec<TransferLog>, ChainError> {
        if let Some(max) = self.max_logs_range {
            if to.saturating_sub(from) > max {
                return Err(ChainError::RangeTooLarge);
            }
        }
        Ok(self
            .transfers
            .get(&(token, recipient))
            .map(|logs| {
                logs.iter()
                    .filter(|log| log.block_number >= from && log.block_number <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn token_decimals(&self, token: Address) -> Result<u8, ChainError> {
        self.decimals
            .get(&token)
            .copied()
            .ok_or_else(|| ChainError::Other(anyhow::anyhow!("no decimals scripted")))
    }

    async fn token_symbol(&self, token: Address) -> Result<String, ChainError> {
        self.symbols
            .get(&token)
            .cloned()
            .ok_or_else(|| ChainError::Other(anyhow::anyhow!("no symbol scripted")))
    }

    async fn ens_name(&self, address: Address) -> Result<Option<String>, ChainError> {
        Ok(self.ens_names.get(&address).cloned())
    }

    async fn ens_avatar(&self, _name: &str) -> Result<Option<String>, ChainError> {
        Ok(None)
    }
}

/// A transfer log with a transaction hash derived from `(tx_byte, block,
/// log_index)` so scripted logs never collide accidentally. `value_whole`
/// is scaled by 18 decimals.
pub fn transfer(tx_byte: u8, value_whole: u64, block: u64, log_index: u64) -> TransferLog {
    let mut hash = [0u8; 32];
    hash[0] = tx_byte;
    hash[1..9].copy_from_slice(&block.to_be_bytes());
    hash[9..17].copy_from_slice(&log_index.to_be_bytes());
    TransferLog {
        from: Address::repeat_byte(tx_byte),
        value: U256::from(value_whole) * U256::from(10u64).pow(U256::from(18u64)),
        block_number: block,
        log_index,
        transaction_hash: B256::from(hash),
    }
}

pub fn test_cache_names() -> CacheNames {
    CacheNames {
        creation_blocks: "test-creation-blocks".into(),
        transfer_logs: "test-transfer-logs".into(),
        prices: "test-token-prices".into(),
        snapshot: "test-snapshot".into(),
        run_log: "test-run-logs".into(),
    }
}

pub fn test_cache_service() -> CacheService {
    CacheService::new("0-1".into(), test_cache_names(), true, None, None, None)
}
