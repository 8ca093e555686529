use axum::{routing::get, Router};
use std::sync::Arc;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rust_claims_ai::config::Config;
use rust_claims_ai::db::Database;
use rust_claims_ai::db_storage::PgRecordStore;
use rust_claims_ai::handlers::{self, AppState};
use rust_claims_ai::llm_client::OpenAiClient;
use rust_claims_ai::orchestrator::Orchestrator;

/// Main entry point for the application.
///
/// Initializes logging, configuration, the database pool and schema, the LLM
/// orchestrator, and the HTTP routes with their middleware, then starts the
/// Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_claims_ai=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");
    db.migrate().await?;

    // The API key is read here, once, and handed to the client.
    let orchestrator = Orchestrator::from_settings(&config.llm_settings())?;
    tracing::info!(
        "✓ LLM client initialized (model: {}, cache TTL: {}s)",
        orchestrator.llm().model(),
        config.llm_cache_ttl_secs
    );

    let app_state = Arc::new(AppState {
        store: PgRecordStore::new(db.pool.clone()),
        orchestrator,
        config: config.clone(),
    });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    let protected_routes =
        handlers::limited_api_routes::<PgRecordStore, OpenAiClient>(&config).layer(GovernorLayer {
            config: governor_conf,
        });

    // Health check bypasses rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
