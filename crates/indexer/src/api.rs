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

//! Cron-facing HTTP surface: one GET route per campaign variant, guarded by
//! a bearer secret. A finished campaign short-circuits to 200; a failed run
//! returns 500 with whatever cache CIDs were salvaged.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;

use crate::{
    ledger::LedgerError,
    service::{PointsService, RunFailure},
    unix_now, ServiceError,
};

#[derive(Clone)]
pub struct AppState {
    pub cron_secret: String,
    pub usd: Arc<PointsService>,
    pub gooddollar: Arc<PointsService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/superfluid-points", get(usd_route))
        .route("/api/superfluid-points-gd", get(gooddollar_route))
        .with_state(state)
}

pub fn authorized(headers: &HeaderMap, secret: &str) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == secret)
}

async fn usd_route(State(state): State<AppState>, headers: HeaderMap) -> Response {
    run_route(&state.usd, &state.cron_secret, &headers).await
}

async fn gooddollar_route(State(state): State<AppState>, headers: HeaderMap) -> Response {
    run_route(&state.gooddollar, &state.cron_secret, &headers).await
}

async fn run_route(service: &PointsService, secret: &str, headers: &HeaderMap) -> Response {
    if !authorized(headers, secret) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" })))
            .into_response();
    }
    if service.window.ended_at(unix_now()) {
        return (
            StatusCode::OK,
            Json(json!({ "message": "Campaign ended; sync not executed." })),
        )
            .into_response();
    }

    match service.run().await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(failure) => failure_response(failure),
    }
}

fn failure_response(failure: RunFailure) -> Response {
    tracing::error!(error = %failure.error, "points sync run failed");
    if let ServiceError::Ledger(LedgerError::Config(_)) = &failure.error {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Points ledger client not configured" })),
        )
            .into_response();
    }
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": failure.error.to_string(),
            "creationBlockCacheCid": failure.cids.creation_block_cache_cid,
            "transferLogCacheCid": failure.cids.transfer_log_cache_cid,
            "runLogsCid": failure.run_logs_cid,
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::CacheService,
        config::CampaignSpec,
        identity::farcaster::FarcasterClient,
        runlog::RunLogBuffer,
        test_utils::test_cache_names,
    };
    use axum::{
        body::{to_bytes, Body},
        http::{HeaderValue, Request},
    };
    use gardens_accrual::CampaignWindow;
    use tower::ServiceExt;

    #[test]
    fn bearer_token_must_match_exactly() {
        let mut headers = HeaderMap::new();
        assert!(!authorized(&headers, "secret"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        assert!(authorized(&headers, "secret"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer wrong"));
        assert!(!authorized(&headers, "secret"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("secret"));
        assert!(!authorized(&headers, "secret"));
    }

    fn idle_service(window: CampaignWindow) -> Arc<PointsService> {
        let spec = CampaignSpec::usd_campaign();
        Arc::new(PointsService {
            caches: Arc::new(CacheService::new(
                window.version(),
                test_cache_names(),
                true,
                None,
                None,
                None,
            )),
            window,
            store: None,
            chains: Vec::new(),
            unconfigured_chains: Vec::new(),
            ens: None,
            farcaster: FarcasterClient::new(None, spec.farcaster_account.clone()),
            prices: None,
            notion: None,
            run_log: RunLogBuffer::new(),
            spec,
        })
    }

    fn test_router(window: CampaignWindow) -> Router {
        router(AppState {
            cron_secret: "secret".into(),
            usd: idle_service(window),
            gooddollar: idle_service(window),
        })
    }

    #[tokio::test]
    async fn missing_bearer_is_unauthorized() {
        let app = test_router(CampaignWindow::new(0, u64::MAX));
        let response = app
            .oneshot(Request::get("/api/superfluid-points").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn finished_campaign_short_circuits_with_200() {
        let app = test_router(CampaignWindow::new(0, 1));
        let response = app
            .oneshot(
                Request::get("/api/superfluid-points-gd")
                    .header("authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], "Campaign ended; sync not executed.");
    }

    #[tokio::test]
    async fn unconfigured_ledger_is_a_500() {
        // Active window, no ledger credentials in the spec.
        let app = test_router(CampaignWindow::new(0, u64::MAX));
        let response = app
            .oneshot(
                Request::get("/api/superfluid-points")
                    .header("authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Points ledger client not configured");
    }
}
