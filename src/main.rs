use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use http::HeaderValue;
use tokio::{signal, sync::mpsc};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};
use tracing::{error, info, warn};

use storefront_api as api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }

    // Init events
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    let gateway: Arc<dyn api::payments::CheckoutGateway> = Arc::new(
        api::payments::StripeGateway::new(&cfg.stripe).context("failed to build Stripe client")?,
    );
    if cfg.stripe.secret_key.trim().is_empty() {
        warn!("Stripe secret key not configured; checkout sessions will be rejected upstream");
    }

    let app_state = api::AppState::new(db_pool.clone(), cfg.clone(), event_sender, gateway);

    if let Some(interval) = cfg.reconciliation_interval() {
        info!(
            interval_secs = interval.as_secs(),
            "Payment reconciliation enabled"
        );
        app_state
            .services
            .reconciliation
            .clone()
            .spawn(db_pool, interval);
    } else {
        info!("Payment reconciliation disabled");
    }

    api::handlers::health::init_start_time();

    let cors = build_cors(&cfg)?;
    let app = api::app_router(app_state)
        .layer(TimeoutLayer::new(cfg.request_timeout()))
        .layer(cors);

    // Bind and serve
    let ip = cfg
        .host
        .parse()
        .with_context(|| format!("invalid host address {}", cfg.host))?;
    let addr = SocketAddr::new(ip, cfg.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("storefront-api listening on http://{}", addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("storefront-api stopped");
    Ok(())
}

fn build_cors(cfg: &api::config::AppConfig) -> anyhow::Result<CorsLayer> {
    if cfg.has_cors_allowed_origins() {
        let origins = cfg
            .cors_allowed_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(|origin| {
                HeaderValue::from_str(origin)
                    .with_context(|| format!("invalid CORS origin {}", origin))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        info!("CORS restricted to {} origin(s)", origins.len());
        return Ok(CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any));
    }

    if cfg.should_allow_permissive_cors() {
        warn!("CORS is permissive; do not run this configuration in production");
        return Ok(CorsLayer::permissive());
    }

    anyhow::bail!("CORS is not configured: set APP__CORS_ALLOWED_ORIGINS")
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
    info!("shutdown signal received");
}
