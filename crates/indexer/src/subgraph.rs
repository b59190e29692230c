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

//! GraphQL clients for the Gardens governance subgraph (pools, communities)
//! and the Superfluid protocol subgraph (super tokens, flow updates), with a
//! one-shot fallback URL retried when the primary endpoint errors.

use alloy::primitives::{Address, U256};
use gardens_accrual::FlowUpdate;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use std::str::FromStr;
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum SubgraphError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("graphql error: {0}")]
    Query(String),

    #[error("missing data in subgraph response")]
    MissingData,
}

const POOLS_QUERY: &str = r#"
query superfluidPools {
  cvstrategies(where: { isEnabled: true, archived: false }, first: 1000) {
    id
    poolId
    token
    metadata { title }
    config { superfluidToken proposalType }
  }
}"#;

const COMMUNITIES_QUERY: &str = r#"
query communities {
  registryCommunities(where: { archived: false }, first: 1000) {
    id
    communityName
    members(first: 1000) { memberAddress stakedTokens }
    strategies(where: { archived: false, isEnabled: true }, first: 1000) {
      id
      token
      metadata { title }
      config { superfluidToken proposalType }
    }
  }
}"#;

const SUPER_TOKEN_QUERY: &str = r#"
query superToken($token: String!) {
  tokens(
    where: { and: [{ isSuperToken: true }, { or: [{ underlyingToken: $token }, { id: $token }] }] }
    orderBy: isListed
    orderDirection: desc
    first: 1000
  ) {
    id
    name
    symbol
    isListed
  }
}"#;

const FLOW_UPDATES_QUERY: &str = r#"
query flowUpdates($receiver: String!, $token: String!) {
  flowUpdatedEvents(
    first: 1000
    where: { receiver: $receiver, token: $token }
    orderBy: timestamp
    orderDirection: asc
  ) {
    sender { id }
    flowRate
    timestamp
  }
}"#;

/// A conviction-voting pool as tracked by the governance subgraph.
#[derive(Debug, Clone, Deserialize)]
pub struct Pool {
    pub id: Address,
    #[serde(default)]
    pub metadata: Option<PoolMetadata>,
    pub token: Address,
    #[serde(default)]
    pub config: PoolConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolMetadata {
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    pub superfluid_token: Option<Address>,
    pub proposal_type: Option<String>,
}

impl Pool {
    /// Signaling pools collect votes, not funds; they never accrue.
    pub fn is_signaling(&self) -> bool {
        self.config.proposal_type.as_deref() == Some("0")
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.title.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Community {
    pub id: String,
    pub community_name: Option<String>,
    #[serde(default)]
    pub members: Vec<CommunityMember>,
    #[serde(default)]
    pub strategies: Vec<Pool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityMember {
    pub member_address: Address,
    #[serde(deserialize_with = "deserialize_u256_string")]
    pub staked_tokens: U256,
}

#[derive(Debug, Clone)]
pub struct SuperToken {
    pub id: Address,
    pub same_as_underlying: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct SuperTokenRow {
    id: Address,
}

#[derive(Debug, Clone, Deserialize)]
struct FlowUpdateRow {
    sender: SenderRef,
    #[serde(rename = "flowRate")]
    flow_rate: String,
    timestamp: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SenderRef {
    Nested { id: Address },
    Flat(Address),
}

impl SenderRef {
    fn address(&self) -> Address {
        match self {
            SenderRef::Nested { id } => *id,
            SenderRef::Flat(address) => *address,
        }
    }
}

fn deserialize_u256_string<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    U256::from_str(&raw).map_err(serde::de::Error::custom)
}

#[derive(Deserialize)]
struct GraphQlEnvelope<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

/// One subgraph endpoint pair. Queries hit the primary URL and retry the
/// fallback once when the primary returns an error.
#[derive(Clone)]
pub struct SubgraphClient {
    client: reqwest::Client,
    primary: Url,
    fallback: Option<Url>,
}

impl SubgraphClient {
    pub fn new(primary: Url, fallback: Option<Url>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client, primary, fallback }
    }

    async fn query_endpoint<T: DeserializeOwned>(
        &self,
        url: &Url,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, SubgraphError> {
        let body = json!({ "query": query, "variables": variables });
        let response = self.client.post(url.clone()).json(&body).send().await?;
        let envelope: GraphQlEnvelope<T> = response.error_for_status()?.json().await?;
        if let Some(errors) = envelope.errors {
            let message =
                errors.into_iter().map(|e| e.message).collect::<Vec<_>>().join("; ");
            return Err(SubgraphError::Query(message));
        }
        envelope.data.ok_or(SubgraphError::MissingData)
    }

    pub async fn query<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, SubgraphError> {
        match self.query_endpoint(&self.primary, query, variables.clone()).await {
            Ok(data) => Ok(data),
            Err(error) => {
                let Some(fallback) = &self.fallback else { return Err(error) };
                tracing::warn!(
                    primary = %self.primary,
                    fallback = %fallback,
                    %error,
                    "primary subgraph failed, retrying fallback"
                );
                self.query_endpoint(fallback, query, variables).await
            }
        }
    }

    /// Enabled, non-archived pools.
    pub async fn fetch_pools(&self) -> Result<Vec<Pool>, SubgraphError> {
        #[derive(Deserialize)]
        struct Data {
            cvstrategies: Vec<Pool>,
        }
        let data: Data = self.query(POOLS_QUERY, json!({})).await?;
        Ok(data.cvstrategies)
    }

    /// Non-archived communities with members and their pools.
    pub async fn fetch_communities(&self) -> Result<Vec<Community>, SubgraphError> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "registryCommunities")]
            communities: Vec<Community>,
        }
        let data: Data = self.query(COMMUNITIES_QUERY, json!({})).await?;
        Ok(data.communities)
    }

    /// Resolve the super token wrapping `token` (or `token` itself when it
    /// is already a super token). `None` when the protocol does not know
    /// the token.
    pub async fn resolve_super_token(
        &self,
        token: Address,
    ) -> Result<Option<SuperToken>, SubgraphError> {
        #[derive(Deserialize)]
        struct Data {
            tokens: Vec<SuperTokenRow>,
        }
        let token_key = gardens_accrual::addr_key(&token);
        let data: Data = self.query(SUPER_TOKEN_QUERY, json!({ "token": token_key })).await?;
        if data.tokens.is_empty() {
            return Ok(None);
        }
        let found = data
            .tokens
            .iter()
            .find(|row| row.id == token)
            .unwrap_or(&data.tokens[0]);
        Ok(Some(SuperToken { id: found.id, same_as_underlying: found.id == token }))
    }

    /// Flow-rate-change events for a pool. Query errors are demoted to an
    /// empty set: one pool's missing stream history must not fail the chain.
    pub async fn fetch_flow_updates(
        &self,
        receiver: Address,
        token: Address,
    ) -> Result<Vec<FlowUpdate>, SubgraphError> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "flowUpdatedEvents")]
            events: Vec<FlowUpdateRow>,
        }
        let variables = json!({
            "receiver": gardens_accrual::addr_key(&receiver),
            "token": gardens_accrual::addr_key(&token),
        });
        let data: Data = match self.query(FLOW_UPDATES_QUERY, variables).await {
            Ok(data) => data,
            Err(error) => {
                tracing::error!(
                    receiver = %gardens_accrual::addr_key(&receiver),
                    token = %gardens_accrual::addr_key(&token),
                    %error,
                    "failed to fetch flow updates"
                );
                return Ok(Vec::new());
            }
        };

        Ok(data
            .events
            .into_iter()
            .filter_map(|row| {
                let timestamp = row.timestamp.parse::<u64>().ok()?;
                let flow_rate = U256::from_str(&row.flow_rate).ok()?;
                Some(FlowUpdate { sender: row.sender.address(), flow_rate, timestamp })
            })
            .collect())
    }
}
