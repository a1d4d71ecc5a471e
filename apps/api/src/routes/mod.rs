pub mod gap;
pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // ── Gap analysis API ───────────────────────────────────────────────
        .route("/api/v1/gap/run", post(gap::handle_run_gap))
        .route(
            "/api/v1/gap/by-job/:job_id",
            get(gap::handle_get_gap).delete(gap::handle_delete_gap),
        )
        .with_state(state)
}
