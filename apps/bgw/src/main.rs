use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use bgw_core::config::GatewayConfig;
use bgw_core::engine::ChatEngine;
use bgw_storage::{DynamoKeyStore, KeyStore, TableNames};
use bgw_upstream::{BedrockConfig, BedrockConverse};

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = cli::Cli::parse();
    let mut config = GatewayConfig::from_env();
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let store = build_store(&config).await;
    let upstream = Arc::new(
        BedrockConverse::connect(BedrockConfig {
            region: config.aws_region.clone(),
            endpoint_url: config.bedrock_endpoint_url.clone(),
            operation_timeout: config.bedrock_timeout,
        })
        .await,
    );

    let engine = Arc::new(ChatEngine::new(config.clone(), store, upstream)?);
    engine.spawn_background_tasks();

    let app = bgw_router::gateway_router(engine);
    let bind = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn build_store(config: &GatewayConfig) -> Arc<dyn KeyStore> {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(region) = &config.aws_region {
        loader = loader.region(aws_config::Region::new(region.clone()));
    }
    let shared = loader.load().await;

    let mut builder = aws_sdk_dynamodb::config::Builder::from(&shared);
    if let Some(endpoint_url) = &config.dynamodb_endpoint_url {
        builder = builder.endpoint_url(endpoint_url);
    }
    let client = aws_sdk_dynamodb::Client::from_conf(builder.build());

    Arc::new(DynamoKeyStore::new(
        client,
        TableNames {
            api_keys: config.api_keys_table.clone(),
            usage: config.usage_table.clone(),
            model_mapping: config.model_mapping_table.clone(),
        },
    ))
}

fn init_tracing() {
    let default_level = std::env::var("LOG_LEVEL")
        .map(|level| level.to_ascii_lowercase())
        .unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
