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

//! Resolves the campaign account's Farcaster follower set to one primary
//! wallet per human. Every other address a FID exposes is "discarded":
//! recorded for the response payload but never credited, so one person's
//! many wallets cannot double-earn.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use alloy::primitives::Address;
use serde::Deserialize;
use url::Url;

/// Primary-wallet resolution result for a follower set.
#[derive(Debug, Default)]
pub struct FollowerWallets {
    pub primary: HashSet<Address>,
    pub discarded: HashSet<Address>,
    pub usernames: HashMap<Address, String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UserPayload {
    fid: Option<u64>,
    username: Option<String>,
    custody_address: Option<String>,
    #[serde(default)]
    verified_addresses: Vec<String>,
    #[serde(default)]
    verifications: Vec<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UserExtras {
    #[serde(default)]
    eth_wallets: Vec<String>,
    #[serde(default)]
    wallet_labels: Vec<WalletLabel>,
}

#[derive(Deserialize)]
struct WalletLabel {
    address: Option<String>,
    label: Option<String>,
}

#[derive(Deserialize)]
struct UserResult {
    user: Option<UserPayload>,
    extras: Option<UserExtras>,
}

#[derive(Deserialize)]
struct UserEnvelope {
    result: Option<UserResult>,
}

#[derive(Deserialize)]
struct FollowersEnvelope {
    result: Option<FollowersResult>,
}

#[derive(Deserialize)]
struct FollowersResult {
    #[serde(default)]
    users: Vec<UserPayload>,
    next: Option<FollowersCursor>,
}

#[derive(Deserialize)]
struct FollowersCursor {
    cursor: Option<String>,
}

fn parse_addresses(raw: &[String]) -> Vec<Address> {
    raw.iter().filter_map(|candidate| Address::from_str(candidate).ok()).collect()
}

/// Fixed priority: labeled-primary > verified > eth-wallets[0] > custody >
/// verifications. The head of the merged list is the wallet that earns; the
/// rest are discarded.
pub fn select_primary_wallet(
    labeled_primary: &[Address],
    verified: &[Address],
    eth_wallets: &[Address],
    custody: Option<Address>,
    verifications: &[Address],
) -> Option<(Address, Vec<Address>)> {
    let mut ordered: Vec<Address> = Vec::new();
    ordered.extend_from_slice(labeled_primary);
    ordered.extend_from_slice(verified);
    ordered.extend_from_slice(eth_wallets);
    ordered.extend(custody);
    ordered.extend_from_slice(verifications);

    let chosen = *ordered.first()?;
    let discarded = ordered.into_iter().skip(1).filter(|a| *a != chosen).collect();
    Some((chosen, discarded))
}

/// Client for the Farcaster social-graph API. A missing auth token disables
/// the whole resolver; every lookup then short-circuits to empty.
#[derive(Clone)]
pub struct FarcasterClient {
    client: reqwest::Client,
    api_url: Url,
    auth_token: Option<String>,
    account_username: String,
}

impl FarcasterClient {
    pub fn new(auth_token: Option<String>, account_username: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .build()
            .unwrap_or_default();
        if auth_token.is_none() {
            tracing::info!("skipping farcaster resolution, no api key configured");
        }
        Self {
            client,
            api_url: Url::parse("https://api.farcaster.xyz").unwrap(),
            auth_token,
            account_username,
        }
    }

    pub fn with_api_url(mut self, url: Url) -> Self {
        self.api_url = url;
        self
    }

    pub fn disabled(&self) -> bool {
        self.auth_token.is_none()
    }

    fn get(&self, path: &str) -> Option<reqwest::RequestBuilder> {
        let token = self.auth_token.as_ref()?;
        let url = self.api_url.join(path).ok()?;
        Some(self.client.get(url).bearer_auth(token))
    }

    /// FID of the configured campaign account.
    pub async fn account_fid(&self) -> Option<u64> {
        let request = self.get(&format!(
            "v2/user-by-username?username={}",
            self.account_username
        ))?;
        let response = match request.send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::warn!(status = %response.status(), "farcaster user fetch failed");
                return None;
            }
            Err(error) => {
                tracing::warn!(%error, "farcaster user fetch error");
                return None;
            }
        };
        let envelope: UserEnvelope = response.json().await.ok()?;
        envelope.result?.user?.fid
    }

    /// Cursor-paginated follower FIDs of `fid`.
    pub async fn follower_fids(&self, fid: u64) -> Vec<u64> {
        if self.disabled() {
            return Vec::new();
        }
        let mut fids = HashSet::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut path = format!("v2/followers?fid={fid}&limit=50");
            if let Some(cursor) = &cursor {
                path.push_str(&format!("&cursor={cursor}"));
            }
            let Some(request) = self.get(&path) else { break };
            let envelope: FollowersEnvelope = match request.send().await {
                Ok(response) if response.status().is_success() => {
                    match response.json().await {
                        Ok(envelope) => envelope,
                        Err(error) => {
                            tracing::warn!(%error, "farcaster followers decode failed");
                            break;
                        }
                    }
                }
                Ok(response) => {
                    tracing::warn!(status = %response.status(), "farcaster followers fetch failed");
                    break;
                }
                Err(error) => {
                    tracing::warn!(%error, "farcaster followers fetch error");
                    break;
                }
            };
            let Some(result) = envelope.result else { break };
            for user in &result.users {
                if let Some(fid) = user.fid {
                    fids.insert(fid);
                }
            }
            cursor = result.next.and_then(|next| next.cursor);
            if cursor.is_none() {
                break;
            }
        }
        fids.into_iter().collect()
    }

    /// Resolve each FID to its primary wallet. Per-FID failures are logged
    /// and skipped; the sweep keeps going.
    pub async fn primary_wallets(&self, fids: &[u64]) -> FollowerWallets {
        let mut wallets = FollowerWallets::default();
        if self.disabled() || fids.is_empty() {
            return wallets;
        }

        for &fid in fids {
            let Some(request) = self.get(&format!("v2/user-by-fid?fid={fid}")) else {
                break;
            };
            let envelope: UserEnvelope = match request.send().await {
                Ok(response) if response.status().is_success() => {
                    match response.json().await {
                        Ok(envelope) => envelope,
                        Err(error) => {
                            tracing::warn!(fid, %error, "farcaster user decode failed");
                            continue;
                        }
                    }
                }
                Ok(response) => {
                    tracing::warn!(fid, status = %response.status(), "farcaster user lookup failed");
                    continue;
                }
                Err(error) => {
                    tracing::warn!(fid, %error, "farcaster user lookup error");
                    continue;
                }
            };
            let Some(result) = envelope.result else { continue };
            let Some(user) = result.user else { continue };
            let extras = result.extras.unwrap_or_default();

            let labeled: Vec<Address> = extras
                .wallet_labels
                .iter()
                .filter(|label| {
                    label
                        .label
                        .as_deref()
                        .is_some_and(|l| l.to_lowercase().contains("primary"))
                })
                .filter_map(|label| label.address.as_deref().and_then(|a| Address::from_str(a).ok()))
                .collect();
            let verified = parse_addresses(&user.verified_addresses);
            let eth_wallets = parse_addresses(&extras.eth_wallets);
            let custody =
                user.custody_address.as_deref().and_then(|a| Address::from_str(a).ok());
            let verifications = parse_addresses(&user.verifications);

            let Some((chosen, others)) = select_primary_wallet(
                &labeled,
                &verified,
                &eth_wallets,
                custody,
                &verifications,
            ) else {
                tracing::warn!(fid, username = ?user.username, "farcaster user has no addresses");
                continue;
            };

            wallets.primary.insert(chosen);
            if let Some(username) = user.username {
                wallets.usernames.insert(chosen, username);
            }
            wallets.discarded.extend(others);
        }
        wallets
    }

    /// Username owning a verified address, for snapshot enrichment.
    pub async fn username_by_address(&self, address: Address) -> Option<String> {
        let request = self.get(&format!(
            "v2/user-by-verification?address={}",
            gardens_accrual::addr_key(&address)
        ))?;
        let response = request.send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let envelope: UserEnvelope = response.json().await.ok()?;
        envelope.result?.user?.username
    }
}
