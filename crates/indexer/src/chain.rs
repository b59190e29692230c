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

//! Read-only chain access behind a trait so accrual logic is testable
//! against a scripted chain. The production implementation wraps an alloy
//! HTTP provider.

use alloy::{
    eips::{BlockId, BlockNumberOrTag},
    primitives::{Address, B256, U256},
    providers::{Provider, ProviderBuilder},
    rpc::types::Filter,
    sol,
    sol_types::SolEvent,
    transports::{RpcError, TransportErrorKind},
};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

use crate::identity::ens;

sol! {
    #[sol(rpc)]
    interface IERC20 {
        event Transfer(address indexed from, address indexed to, uint256 value);
        function decimals() external view returns (uint8);
        function symbol() external view returns (string);
    }

    #[sol(rpc)]
    interface IEnsRegistry {
        function resolver(bytes32 node) external view returns (address);
    }

    #[sol(rpc)]
    interface IEnsResolver {
        function name(bytes32 node) external view returns (string);
        function text(bytes32 node, string key) external view returns (string);
    }
}

/// Mainnet ENS registry.
pub const ENS_REGISTRY: Address =
    alloy::primitives::address!("00000000000C2E074eC69A0dFb2997BA6C7d2e1e");

#[derive(thiserror::Error, Debug)]
pub enum ChainError {
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError<TransportErrorKind>),

    #[error("contract error: {0}")]
    Contract(#[from] alloy::contract::Error),

    #[error("log range too large")]
    RangeTooLarge,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl ChainError {
    /// Whether shrinking the requested block range and retrying is worth it.
    /// Transport-level failures (timeouts, dropped connections) and provider
    /// error responses about range limits or missing blocks qualify;
    /// semantic JSON-RPC errors do not.
    pub fn is_shrinkable(&self) -> bool {
        match self {
            ChainError::RangeTooLarge => true,
            ChainError::Rpc(RpcError::Transport(_)) => true,
            ChainError::Rpc(RpcError::ErrorResp(payload)) => {
                // -32005 is the conventional "limit exceeded" code.
                if payload.code == -32005 {
                    return true;
                }
                let message = payload.message.to_lowercase();
                message.contains("range")
                    || message.contains("timed out")
                    || message.contains("timeout")
                    || message.contains("block at number")
                    || message.contains("block not found")
            }
            _ => false,
        }
    }
}

/// An ERC-20 `Transfer` event into a pool, in the reduced form the cache
/// persists: enough to dedupe, order, and attribute the funding amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferLog {
    pub from: Address,
    pub value: U256,
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: B256,
}

/// Read-only chain operations the pipeline needs. One instance per target
/// chain plus one for mainnet ENS resolution.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> u64;

    async fn latest_block(&self) -> Result<u64, ChainError>;

    async fn block_timestamp(&self, number: u64) -> Result<u64, ChainError>;

    async fn code_exists_at(&self, address: Address, block: u64) -> Result<bool, ChainError>;

    /// `Transfer(*, recipient, *)` logs on `token` over `[from, to]`, in a
    /// single provider query. Chunking and retry live in the fetcher.
    async fn transfer_logs(
        &self,
        token: Address,
        recipient: Address,
        from: u64,
        to: u64,
    ) -> Result<Vec<TransferLog>, ChainError>;

    async fn token_decimals(&self, token: Address) -> Result<u8, ChainError>;

    async fn token_symbol(&self, token: Address) -> Result<String, ChainError>;

    /// Reverse-resolve an ENS name (mainnet client only).
    async fn ens_name(&self, address: Address) -> Result<Option<String>, ChainError>;

    /// Resolve the `avatar` text record of a name via its on-chain resolver.
    async fn ens_avatar(&self, name: &str) -> Result<Option<String>, ChainError>;
}

/// Alloy-backed [`ChainClient`].
#[derive(Clone)]
pub struct RpcChainClient<P> {
    chain_id: u64,
    provider: P,
}

impl<P> RpcChainClient<P>
where
    P: Provider + Clone,
{
    pub fn new(chain_id: u64, provider: P) -> Self {
        Self { chain_id, provider }
    }
}

/// Connect an HTTP provider and box it behind the trait.
pub fn connect(chain_id: u64, rpc_url: Url) -> Arc<dyn ChainClient> {
    let provider = ProviderBuilder::new().connect_http(rpc_url);
    Arc::new(RpcChainClient::new(chain_id, provider))
}

#[async_trait]
impl<P> ChainClient for RpcChainClient<P>
where
    P: Provider + Clone + 'static,
{
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn latest_block(&self) -> Result<u64, ChainError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn block_timestamp(&self, number: u64) -> Result<u64, ChainError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .await?
            .context(anyhow!("block {} not found", number))?;
        Ok(block.header.timestamp)
    }

    async fn code_exists_at(&self, address: Address, block: u64) -> Result<bool, ChainError> {
        let code = self
            .provider
            .get_code_at(address)
            .block_id(BlockId::Number(BlockNumberOrTag::Number(block)))
            .await?;
        Ok(!code.is_empty())
    }

    async fn transfer_logs(
        &self,
        token: Address,
        recipient: Address,
        from: u64,
        to: u64,
    ) -> Result<Vec<TransferLog>, ChainError> {
        let filter = Filter::new()
            .address(token)
            .event_signature(IERC20::Transfer::SIGNATURE_HASH)
            .topic2(recipient.into_word())
            .from_block(from)
            .to_block(to);

        let logs = self.provider.get_logs(&filter).await?;
        let mut transfers = Vec::with_capacity(logs.len());
        for log in logs {
            let Ok(decoded) = log.log_decode::<IERC20::Transfer>() else {
                continue;
            };
            let (Some(block_number), Some(log_index), Some(tx_hash)) =
                (log.block_number, log.log_index, log.transaction_hash)
            else {
                continue;
            };
            transfers.push(TransferLog {
                from: decoded.inner.data.from,
                value: decoded.inner.data.value,
                block_number,
                log_index,
                transaction_hash: tx_hash,
            });
        }
        Ok(transfers)
    }

    async fn token_decimals(&self, token: Address) -> Result<u8, ChainError> {
        let erc20 = IERC20::new(token, &self.provider);
        Ok(erc20.decimals().call().await?)
    }

    async fn token_symbol(&self, token: Address) -> Result<String, ChainError> {
        let erc20 = IERC20::new(token, &self.provider);
        Ok(erc20.symbol().call().await?)
    }

    async fn ens_name(&self, address: Address) -> Result<Option<String>, ChainError> {
        let registry = IEnsRegistry::new(ENS_REGISTRY, &self.provider);
        let node = ens::reverse_node(&address);
        let resolver_addr = registry.resolver(node).call().await?;
        if resolver_addr == Address::ZERO {
            return Ok(None);
        }
        let resolver = IEnsResolver::new(resolver_addr, &self.provider);
        let name = resolver.name(node).call().await?;
        Ok((!name.is_empty()).then_some(name))
    }

    async fn ens_avatar(&self, name: &str) -> Result<Option<String>, ChainError> {
        let registry = IEnsRegistry::new(ENS_REGISTRY, &self.provider);
        let node = ens::namehash(name);
        let resolver_addr = registry.resolver(node).call().await?;
        if resolver_addr == Address::ZERO {
            return Ok(None);
        }
        let resolver = IEnsResolver::new(resolver_addr, &self.provider);
        let avatar = resolver.text(node, "avatar".to_string()).call().await?;
        Ok((!avatar.is_empty()).then_some(avatar))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_too_large_is_shrinkable() {
        assert!(ChainError::RangeTooLarge.is_shrinkable());
    }

    #[test]
    fn error_response_classification_by_code_and_message() {
        let payload = alloy::rpc::json_rpc::ErrorPayload {
            code: -32005,
            message: "query limit exceeded".into(),
            data: None,
        };
        assert!(ChainError::Rpc(RpcError::ErrorResp(payload)).is_shrinkable());

        let payload = alloy::rpc::json_rpc::ErrorPayload {
            code: -32000,
            message: "requested range is too large".into(),
            data: None,
        };
        assert!(ChainError::Rpc(RpcError::ErrorResp(payload)).is_shrinkable());

        let payload = alloy::rpc::json_rpc::ErrorPayload {
            code: -32602,
            message: "invalid params".into(),
            data: None,
        };
        assert!(!ChainError::Rpc(RpcError::ErrorResp(payload)).is_shrinkable());
    }

    #[test]
    fn contract_errors_are_not_shrinkable() {
        let err = ChainError::Other(anyhow::anyhow!("decode failure"));
        assert!(!err.is_shrinkable());
    }
}
