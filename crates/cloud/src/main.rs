// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use clap::Parser;
use tracing::{error, warn};

use glasshub::config::CloudConfig;
use glasshub::services::{DevTokens, Services};

#[derive(Parser)]
#[command(name = "glasshub", about = "Smart-glasses cloud connection core")]
struct Cli {
    #[command(flatten)]
    config: CloudConfig,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut services = Services::noop();
    if cli.config.insecure_dev_auth {
        warn!("insecure dev auth enabled; glasses tokens are treated as user ids");
        services.tokens = Arc::new(DevTokens);
    }

    if let Err(e) = glasshub::run(cli.config, services).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
