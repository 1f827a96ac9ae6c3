//! `llm-gatewayd`: process entry point.
//!
//! Explicit constructor wiring (§9): every component is built here, in order, from
//! [`GatewayEnv`] and handed to [`build_router`] once. There is no dependency-injection
//! container and no runtime tool/model registration after this function returns.

use llm_gateway::gateway::blob_store::blob_store_from_path;
use llm_gateway::gateway::clients::http_pool::get_http_client;
use llm_gateway::gateway::completion_manager::CompletionManager;
use llm_gateway::gateway::config_store::{source_from_path, ConfigStore};
use llm_gateway::gateway::env::GatewayEnv;
use llm_gateway::gateway::http::{build_router, AppState};
use llm_gateway::gateway::image_generation::{ImageGenerationClient, OpenAiImageClient};
use llm_gateway::gateway::proxy::ProxyProvider;
use llm_gateway::gateway::tools::builtin_registry;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let env = GatewayEnv::from_process_env();
    log::info!("starting llm-gatewayd on port {}", env.port);

    let s3_client = if env.config_path.starts_with("s3://") || env.image_generation_path.starts_with("s3://") {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Some(aws_sdk_s3::Client::new(&config))
    } else {
        None
    };

    let http_client = get_http_client("default");

    let config_source = source_from_path(
        &env.config_path,
        env.github_token.clone(),
        s3_client.clone(),
        http_client.clone(),
    )?;
    let config_store = Arc::new(ConfigStore::new(config_source, env.config_cache_timeout));

    let blob_store = blob_store_from_path(
        &env.image_generation_path,
        &env.image_generation_url,
        s3_client,
    )?;

    let proxy = Arc::new(ProxyProvider::new(
        http_client.clone(),
        env.default_upstream_url.clone(),
    ));

    let tool_registry = Arc::new(builtin_registry());

    let completion_manager = Arc::new(CompletionManager::new(
        config_store,
        tool_registry,
        proxy,
        blob_store,
    ));

    let image_generator: Arc<dyn ImageGenerationClient> = Arc::new(OpenAiImageClient::new(
        http_client,
        env.default_upstream_url.clone(),
        env.open_ai_secret.clone(),
    ));

    let state = Arc::new(AppState {
        completion_manager,
        image_generator,
    });

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", env.port)).await?;
    log::info!("listening on 0.0.0.0:{}", env.port);
    axum::serve(listener, router).await?;

    Ok(())
}
