use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use esign_api::{router, AppState, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("esign_api=info,esign_core=info,tower_http=debug")
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Initializing eSign API...");
    let state = Arc::new(AppState::from_config(&config).await?);
    let _sweeper = state.spawn_cache_sweeper();

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(config.rate_limit_replenish_secs.max(1))
            .burst_size(config.rate_limit_burst.max(1))
            .finish()
            .context("invalid rate limiter configuration")?,
    );

    let app = router(Arc::clone(&state), &config.static_dir, config.max_upload_bytes).layer(
        GovernorLayer {
            config: governor_conf,
        },
    );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Starting eSign API on http://{}", addr);
    info!(
        "Rate limit: burst {} per IP, one request back every {}s",
        config.rate_limit_burst, config.rate_limit_replenish_secs
    );
    info!("Placement policy: {}", config.placement_policy);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
