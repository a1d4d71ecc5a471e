use sqlx::PgPool;

use crate::engine::CareerEngine;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub engine: CareerEngine,
}
