mod config;
mod db;
mod engine;
mod errors;
mod llm_client;
mod models;
mod routes;
mod state;
mod taxonomy;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::engine::config::EngineConfig;
use crate::engine::{CareerEngine, ExtractorKind};
use crate::llm_client::LlmClient;
use crate::routes::build_router;
use crate::state::AppState;
use crate::taxonomy::embedding::EmbeddingClient;
use crate::taxonomy::{PgVectorIndex, StaticIndex, TaxonomyIndex};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (panics on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Gapwise API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    // Taxonomy index: pgvector in production, empty in-memory when offline
    let index: Arc<dyn TaxonomyIndex> = if config.offline_index {
        info!("Taxonomy index: offline (in-memory, empty)");
        Arc::new(StaticIndex::new())
    } else {
        let embeddings = EmbeddingClient::new(
            config.embeddings_url.clone(),
            config.embeddings_api_key.clone(),
            config.embeddings_model.clone(),
        );
        info!("Taxonomy index: pgvector (embeddings: {})", embeddings.model());
        Arc::new(PgVectorIndex::new(db.clone(), embeddings))
    };

    // Extractor backend: a deliberate construction-time selection
    let extractor_kind = if config.test_extractor {
        info!("Extractor: deterministic keyword matcher (test mode)");
        ExtractorKind::Keyword
    } else {
        info!("Extractor: LLM client initialized");
        ExtractorKind::Llm(LlmClient::new(config.anthropic_api_key.clone()))
    };

    // Build the engine with the process-wide base configuration
    let engine = CareerEngine::new(
        db.clone(),
        extractor_kind,
        index,
        EngineConfig::default(),
        config.embeddings_model.clone(),
        config.taxonomy_snapshot.clone(),
    );

    // Build app state
    let state = AppState { db, engine };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
