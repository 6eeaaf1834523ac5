use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::http::HeaderValue;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use storefront_api as api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to database")?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events
    let (event_sender, event_rx) = api::events::channel(api::events::DEFAULT_EVENT_CHANNEL_CAPACITY);
    tokio::spawn(api::events::process_events(event_rx));

    let gateway = api::payments::stripe::StripePaymentGateway::new(
        api::payments::stripe::StripeConfig::from(&cfg),
    )
    .context("failed to build payment gateway")?;
    info!(provider = %cfg.payment_provider, "payment gateway configured");

    let cors_layer = cors_layer(&cfg)?;
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid listen address")?;

    let state = Arc::new(api::AppState::new(
        db_arc.clone(),
        cfg,
        Arc::new(gateway),
        event_sender,
    ));
    let app = api::app_router(state).layer(cors_layer);

    info!("storefront-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped, closing database pool");
    match Arc::try_unwrap(db_arc) {
        Ok(pool) => api::db::close_pool(pool).await?,
        Err(_) => warn!("database pool still shared at shutdown; leaving it to drop"),
    }

    Ok(())
}

fn cors_layer(cfg: &api::config::AppConfig) -> anyhow::Result<CorsLayer> {
    let origins = cfg
        .cors_origins()
        .iter()
        .map(|origin| HeaderValue::from_str(origin))
        .collect::<Result<Vec<_>, _>>()
        .context("invalid CORS origin")?;

    if !origins.is_empty() {
        Ok(CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any))
    } else if cfg.is_development() {
        info!("Using permissive CORS because explicit origins were not configured (development environment)");
        Ok(CorsLayer::permissive())
    } else {
        anyhow::bail!("Missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS")
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
