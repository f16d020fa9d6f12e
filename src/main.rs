mod auth;
mod billing;
mod capability;
mod config;
mod error;
mod http;
mod normalize;
mod providers;
mod sdk;
mod storage;
mod task;

use std::sync::Arc;

use billing::{ParamRatioConfig, ParamRatioEngine};
use config::Config;
use http::state::AppState;
use providers::registry::AdaptorRegistry;
use sdk::http_client::HttpClients;
use sdk::retry::RetryPolicy;
use storage::StorageManager;
use task::poller::TaskPoller;
use task::relay::TaskRelay;
use task::store::InMemoryTaskStore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut config = Config::from_env();
    let retry_policy = RetryPolicy::new(
        config.upstream_max_retries,
        config.upstream_retry_base_delay_ms,
    );

    let clients = HttpClients::new(config.request_timeout()).expect("failed to build http client");
    let channels = std::mem::take(&mut config.channels);
    for channel in &channels {
        info!(
            channel_id = channel.id,
            vendor = channel.channel_type.id(),
            base_url = %channel.base_url,
            proxied = channel.proxy.is_some(),
            "video channel configured"
        );
    }
    if channels.is_empty() {
        warn!("no video channel configured; set DOUBAO_API_KEY, HAILUO_API_KEY or OPENAI_API_KEY");
    }
    let registry =
        AdaptorRegistry::new(channels, &clients).expect("failed to build channel clients");

    let ratios = Arc::new(ParamRatioEngine::new(ParamRatioConfig::example()));
    if let Some(raw) = config.param_ratio_config.as_deref() {
        if let Err(error) = ratios.update_from_json(raw) {
            warn!(%error, "ignoring invalid PARAM_RATIO_CONFIG");
        }
    }

    let storage = StorageManager::from_config(
        &config.storage,
        clients.client(None).expect("failed to build http client"),
        retry_policy,
    )
    .unwrap_or_else(|error| {
        warn!(%error, "object storage disabled");
        None
    })
    .map(Arc::new);

    let relay = TaskRelay::new(
        registry,
        Arc::new(InMemoryTaskStore::new()),
        ratios.clone(),
        storage,
    );

    let shutdown = CancellationToken::new();
    let poller = TaskPoller::new(
        relay.clone(),
        config.poll_interval(),
        config.poll_timeout(),
        config.poll_concurrency,
    )
    .spawn(shutdown.clone());

    let state = AppState::new(
        relay,
        ratios,
        config.gateway_api_keys.clone(),
        retry_policy,
        shutdown.clone(),
    );
    let app = http::router(state);

    let addr = config.bind_addr();
    info!(%addr, "gateway listening");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind tcp listener");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .expect("server failed");

    shutdown.cancel();
    if let Err(error) = poller.await {
        warn!(%error, "task poller ended abnormally");
    }
    info!("gateway stopped");
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("shutdown requested"),
            Err(error) => {
                warn!(%error, "failed to listen for ctrl-c");
                shutdown.cancelled().await;
            }
        },
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}
