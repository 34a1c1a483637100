//! Config → gateway filter → router → `axum::serve`.
use std::{panic, process};

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api;
use crate::api::v1::handlers::health::health;
use crate::config::Config;
use crate::middleware::auth::access::{self, AccessSettings};
use crate::middleware::http::{self, HttpSettings};
use crate::services::auth::{build_gateway, spawn_key_refresh};
use crate::state::AppState;

pub fn init_tracing() {
    // Prefer RUST_LOG if set, e.g.
    // RUST_LOG=info,token_check_gateway=debug,tower_http=debug cargo run
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn init_panic_hook(abort_on_panic: bool) {
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        // stderr can be hidden depending on how the process is launched
        tracing::error!(?info, "panic");

        if abort_on_panic {
            process::abort();
        } else {
            default_hook(info);
        }
    }))
}

pub async fn run() -> Result<()> {
    init_tracing();
    let config = Config::from_env().context("loading configuration")?;

    init_panic_hook(!config.app_env.is_production());

    tracing::info!(
        "starting gateway in {:?} mode on {}",
        config.app_env,
        config.addr
    );

    let gateway = build_gateway(&config)
        .await
        .context("building gateway filter")?;

    let refresh = gateway.refreshable.then(|| {
        spawn_key_refresh(
            gateway.filter.clone(),
            gateway.key_provider.clone(),
            config.key_refresh_interval,
            config.key_grace,
        )
    });

    let access = AccessSettings::from_config(&config)?;
    let state = AppState::new(gateway.filter, access);
    let app = build_router(state, HttpSettings::from(&config));

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("binding {}", config.addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = refresh {
        handle.abort();
    }
    tracing::info!("gateway stopped");
    Ok(())
}

pub fn build_router(state: AppState, settings: HttpSettings) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api::v1::routes());

    let router = access::apply(router, state.clone()).with_state(state);
    http::apply(router, settings)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}
