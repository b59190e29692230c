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

//! Whole-pipeline tests: a scripted chain, mocked subgraph/price/ledger
//! endpoints, and an in-memory content store.

use std::sync::Arc;

use alloy::primitives::Address;
use gardens_accrual::{addr_key, CampaignWindow};
use gardens_indexer::{
    cache::CacheService,
    config::{CampaignSpec, LedgerSettings},
    identity::farcaster::FarcasterClient,
    prices::PriceClient,
    runlog::RunLogBuffer,
    service::{ChainRuntime, PointsService},
    store::MemoryStore,
    subgraph::SubgraphClient,
    test_utils::{test_cache_names, transfer, FakeChain},
};
use httpmock::prelude::*;
use serde_json::json;

const TOKEN: Address = Address::repeat_byte(0x1c);
const POOL: Address = Address::repeat_byte(0x2c);
const FUNDER_BYTE: u8 = 0xf7;

fn mock_chain_endpoints(server: &MockServer) {
    server.mock(|when, then| {
        when.method(POST).path("/").body_contains("superfluidPools");
        then.status(200).json_body(json!({
            "data": { "cvstrategies": [{
                "id": addr_key(&POOL),
                "poolId": "1",
                "token": addr_key(&TOKEN),
                "metadata": { "title": "Community well" },
                "config": { "superfluidToken": null, "proposalType": "1" }
            }]}
        }));
    });
    server.mock(|when, then| {
        when.method(POST).path("/").body_contains("communities");
        then.status(200).json_body(json!({ "data": { "registryCommunities": [] } }));
    });
    server.mock(|when, then| {
        when.method(POST).path("/").body_contains("superToken");
        then.status(200).json_body(json!({
            "data": { "tokens": [
                { "id": addr_key(&TOKEN), "name": "Honey", "symbol": "HNY", "isListed": true }
            ]}
        }));
    });
    server.mock(|when, then| {
        when.method(POST).path("/").body_contains("flowUpdates");
        then.status(200).json_body(json!({ "data": { "flowUpdatedEvents": [] } }));
    });
    server.mock(|when, then| {
        when.method(GET).path_contains("/api/v3/simple/token_price/");
        then.status(200).json_body(json!({ addr_key(&TOKEN): { "usd": 1.0 } }));
    });
}

fn mock_ledger_history(server: &MockServer, events: serde_json::Value) {
    server.mock(|when, then| {
        when.method(GET).path("/points/events");
        then.status(200).json_body(json!({
            "events": events,
            "pagination": { "hasNextPage": false }
        }));
    });
}

fn service_against(server: &MockServer) -> PointsService {
    let mut chain = FakeChain::new(137, (0..=1_000u64).map(|n| n * 2).collect());
    chain.set_decimals(TOKEN, 18);
    chain.set_symbol(TOKEN, "HNY");
    chain.deploy(POOL, 10);
    chain.add_transfer(TOKEN, POOL, transfer(FUNDER_BYTE, 50, 500, 0));

    let mut spec = CampaignSpec::usd_campaign();
    spec.skip_identity_resolution = true;
    spec.pin_run_logs = false;
    spec.dry_run = false;
    spec.excluded_wallets.clear();
    spec.ledger = LedgerSettings {
        base_url: server.base_url().parse().unwrap(),
        api_key: "test-key".into(),
        campaign_id: 7,
    };

    let window = CampaignWindow::new(100, 1_800);
    PointsService {
        spec,
        window,
        caches: Arc::new(CacheService::new(
            window.version(),
            test_cache_names(),
            true,
            None,
            None,
            None,
        )),
        store: Some(Arc::new(MemoryStore::new())),
        chains: vec![ChainRuntime {
            chain_id: 137,
            client: Arc::new(chain),
            subgraph: SubgraphClient::new(server.base_url().parse().unwrap(), None),
            superfluid: SubgraphClient::new(server.base_url().parse().unwrap(), None),
        }],
        unconfigured_chains: Vec::new(),
        ens: None,
        farcaster: FarcasterClient::new(None, "gardens".into()),
        prices: Some(PriceClient::new(None).with_api_url(server.base_url().parse().unwrap())),
        notion: None,
        run_log: RunLogBuffer::new(),
    }
}

#[tokio::test]
async fn single_transfer_yields_fifty_fund_points() {
    let server = MockServer::start();
    mock_chain_endpoints(&server);
    mock_ledger_history(&server, json!([]));
    let push = server.mock(|when, then| {
        when.method(POST)
            .path("/points/push")
            .header("x-api-key", "test-key")
            .json_body_partial(r#"{"campaignId":7,"events":[{"eventName":"fundPoints","points":50}]}"#);
        then.status(200).json_body(json!({
            "message": "accepted", "pushRequestId": 1, "eventCount": 1
        }));
    });

    let service = service_against(&server);
    let report = service.run().await.map_err(|f| f.error.to_string()).unwrap();

    let funder = Address::repeat_byte(FUNDER_BYTE);
    assert_eq!(report.wallet_breakdown.len(), 1);
    let entry = &report.wallet_breakdown[0];
    assert_eq!(entry.address, addr_key(&funder));
    assert_eq!(entry.points.fund, 50);
    assert_eq!(entry.points.stream, 0);
    assert_eq!(entry.points.governance, 0);
    assert_eq!(entry.points.farcaster, 0);
    assert_eq!(entry.total_points, 50);
    assert_eq!(entry.checksum, format!("{}|50|0|0|0|50", addr_key(&funder)));
    assert!(report.csv.contains(&format!("{},50,50,0,0,0", addr_key(&funder))));

    assert_eq!(report.updated.len(), 1);
    assert_eq!(report.updated[0].added, 50);
    assert_eq!(report.updated[0].existing, 0);
    push.assert();

    // The mutated caches were pinned to the store.
    assert!(report.cache_cids.creation_block_cache_cid.is_some());
    assert!(report.cache_cids.transfer_log_cache_cid.is_some());
    assert!(report.points_snapshot_cid.is_some());
    assert!(!report.dry_run);
}

#[tokio::test]
async fn unchanged_inputs_push_nothing_on_the_second_run() {
    let server = MockServer::start();
    mock_chain_endpoints(&server);
    let funder = Address::repeat_byte(FUNDER_BYTE);
    mock_ledger_history(
        &server,
        json!([{ "event": "fundPoints", "account": addr_key(&funder), "points": 50.0 }]),
    );
    let push = server.mock(|when, then| {
        when.method(POST).path("/points/push");
        then.status(200).json_body(json!({
            "message": "accepted", "pushRequestId": 1, "eventCount": 0
        }));
    });

    let service = service_against(&server);
    let report = service.run().await.map_err(|f| f.error.to_string()).unwrap();

    assert_eq!(report.updated.len(), 1);
    assert_eq!(report.updated[0].added, 0);
    assert_eq!(report.updated[0].existing, 50);
    push.assert_hits(0);
}

#[tokio::test]
async fn vanished_wallet_is_retracted_to_zero() {
    let server = MockServer::start();
    mock_chain_endpoints(&server);
    let funder = Address::repeat_byte(FUNDER_BYTE);
    let ghost = Address::repeat_byte(0xdd);
    mock_ledger_history(
        &server,
        json!([
            { "event": "fundPoints", "account": addr_key(&funder), "points": 50.0 },
            { "event": "fundPoints", "account": addr_key(&ghost), "points": 7.0 }
        ]),
    );
    let push = server.mock(|when, then| {
        when.method(POST)
            .path("/points/push")
            .json_body_partial(r#"{"events":[{"eventName":"fundPoints","points":-7}]}"#);
        then.status(200).json_body(json!({
            "message": "accepted", "pushRequestId": 2, "eventCount": 1
        }));
    });

    let service = service_against(&server);
    let report = service.run().await.map_err(|f| f.error.to_string()).unwrap();

    push.assert();
    let retraction = report
        .updated
        .iter()
        .find(|entry| entry.address == addr_key(&ghost))
        .expect("retracted wallet reported");
    assert_eq!(retraction.target, 0);
    assert_eq!(retraction.existing, 7);
    // The ghost never re-enters the breakdown.
    assert!(report.wallet_breakdown.iter().all(|entry| entry.address != addr_key(&ghost)));
}

#[tokio::test]
async fn dry_run_reports_deltas_without_pushing() {
    let server = MockServer::start();
    mock_chain_endpoints(&server);
    mock_ledger_history(&server, json!([]));
    let push = server.mock(|when, then| {
        when.method(POST).path("/points/push");
        then.status(200).json_body(json!({ "message": "accepted", "eventCount": 0 }));
    });

    let mut service = service_against(&server);
    service.spec.dry_run = true;
    let report = service.run().await.map_err(|f| f.error.to_string()).unwrap();

    assert!(report.dry_run);
    assert_eq!(report.updated.len(), 1);
    assert_eq!(report.updated[0].added, 50);
    push.assert_hits(0);
}
