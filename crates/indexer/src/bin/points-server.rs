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

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use gardens_indexer::{
    api::{self, AppState},
    config::{AppConfig, CampaignSpec},
    runlog::{RunLogBuffer, RunLogLayer},
    service::PointsService,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Arguments of the points server.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct MainArgs {
    /// Address to bind the HTTP listener to.
    #[clap(long, env, default_value = "0.0.0.0:3000")]
    bind_addr: SocketAddr,
    /// Whether to log in JSON format.
    #[clap(long, env, default_value_t = false)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = MainArgs::parse();

    let run_log = RunLogBuffer::new();
    let registry = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(RunLogLayer::new(run_log.clone()));
    if args.log_json {
        registry.with(tracing_subscriber::fmt::layer().json().with_ansi(false)).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let config = AppConfig::from_env()?;
    let usd = PointsService::from_config(
        &config,
        CampaignSpec::usd_campaign(),
        config.notion_db_id.clone(),
        run_log.clone(),
    );
    let gooddollar = PointsService::from_config(
        &config,
        CampaignSpec::gooddollar_campaign(),
        config.notion_gd_db_id.clone(),
        run_log.clone(),
    );

    let state = AppState {
        cron_secret: config.cron_secret.clone(),
        usd: Arc::new(usd),
        gooddollar: Arc::new(gooddollar),
    };

    let listener = tokio::net::TcpListener::bind(args.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", args.bind_addr))?;
    tracing::info!(addr = %args.bind_addr, "points server listening");
    axum::serve(listener, api::router(state)).await.context("server error")?;

    Ok(())
}
