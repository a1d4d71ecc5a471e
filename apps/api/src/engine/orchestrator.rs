//! Gap orchestrator: a three-step state machine sequencing resume
//! resolution, job resolution, and the engine run.
//!
//! The only control-flow primitive is the error short-circuit: a state that
//! observes `error` on entry does no work and passes the state through, and
//! error messages are preserved verbatim for logging.

use serde_json::Value;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::schemas::GapAnalysisResult;
use crate::engine::CareerEngine;
use crate::errors::EngineError;
use crate::models::store;

/// Shared state threaded through the orchestrator's states.
#[derive(Debug, Default)]
pub struct GapState {
    pub user_id: Uuid,
    pub job_id: Uuid,
    pub resume_id: Option<Uuid>,
    pub result: Option<GapAnalysisResult>,
    pub error: Option<String>,
}

impl GapState {
    pub fn new(user_id: Uuid, job_id: Uuid) -> Self {
        Self {
            user_id,
            job_id,
            ..Self::default()
        }
    }

    fn fail(mut self, error: String) -> Self {
        warn!(user_id = %self.user_id, job_id = %self.job_id, %error, "Gap state failed");
        self.error = Some(error);
        self
    }
}

/// ResolveResume: look up the user's default resume.
async fn resolve_resume(pool: &PgPool, state: GapState) -> GapState {
    if state.error.is_some() {
        return state;
    }
    match store::get_default_resume(pool, state.user_id).await {
        Ok(Some(resume)) => {
            info!(user_id = %state.user_id, resume_id = %resume.id, "Resolved default resume");
            GapState {
                resume_id: Some(resume.id),
                ..state
            }
        }
        Ok(None) => {
            let err = EngineError::NoDefaultResume.to_string();
            state.fail(err)
        }
        Err(e) => state.fail(EngineError::from(e).to_string()),
    }
}

/// ResolveJob: validate the target job exists.
async fn resolve_job(pool: &PgPool, state: GapState) -> GapState {
    if state.error.is_some() {
        return state;
    }
    match store::get_job(pool, state.job_id).await {
        Ok(Some(job)) => {
            info!(job_id = %job.id, title = %job.title, "Resolved job listing");
            state
        }
        Ok(None) => {
            let err = EngineError::JobNotFound.to_string();
            state.fail(err)
        }
        Err(e) => state.fail(EngineError::from(e).to_string()),
    }
}

/// RunAnalysis: invoke the engine and attach the result.
async fn run_analysis(
    engine: &CareerEngine,
    state: GapState,
    overrides: Option<&Value>,
) -> GapState {
    if state.error.is_some() {
        info!(
            error = state.error.as_deref().unwrap_or_default(),
            "run_analysis: skipping due to prior error"
        );
        return state;
    }
    let Some(resume_id) = state.resume_id else {
        let err = EngineError::NoDefaultResume.to_string();
        return state.fail(err);
    };

    match engine.analyze(resume_id, state.job_id, overrides).await {
        Ok(result) => GapState {
            result: Some(result),
            ..state
        },
        Err(e) => {
            let err = e.to_string();
            state.fail(err)
        }
    }
}

/// Runs the full orchestration: ResolveResume → ResolveJob → RunAnalysis.
pub async fn run_gap_agent(
    pool: &PgPool,
    engine: &CareerEngine,
    user_id: Uuid,
    job_id: Uuid,
    overrides: Option<&Value>,
) -> GapState {
    info!(%user_id, %job_id, "run_gap_agent: start");
    let state = GapState::new(user_id, job_id);
    let state = resolve_resume(pool, state).await;
    let state = resolve_job(pool, state).await;
    let state = run_analysis(engine, state, overrides).await;

    match (&state.error, &state.result) {
        (Some(error), _) => warn!(%user_id, %job_id, %error, "run_gap_agent: completed with error"),
        (None, Some(result)) => info!(
            %user_id,
            %job_id,
            score = result.metrics.overall_score,
            "run_gap_agent: success"
        ),
        (None, None) => warn!(%user_id, %job_id, "run_gap_agent: finished without result or error"),
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::EngineConfig;
    use crate::engine::ExtractorKind;
    use crate::taxonomy::StaticIndex;
    use std::sync::Arc;

    fn lazy_engine() -> (PgPool, CareerEngine) {
        // connect_lazy never touches the network; any state that actually
        // queries the database would surface a connection error.
        let pool = PgPool::connect_lazy("postgres://localhost/gapwise_test")
            .expect("lazy pool construction is infallible");
        let engine = CareerEngine::new(
            pool.clone(),
            ExtractorKind::Keyword,
            Arc::new(StaticIndex::new()),
            EngineConfig::default(),
            "text-embedding-3-large".to_string(),
            "onet-28.2".to_string(),
        );
        (pool, engine)
    }

    #[tokio::test]
    async fn test_errored_state_passes_through_every_stage() {
        let (pool, engine) = lazy_engine();
        let mut state = GapState::new(Uuid::new_v4(), Uuid::new_v4());
        state.error = Some("No default resume".to_string());

        // No stage may do work once `error` is set; a database touch would
        // fail the lazy pool and change the message.
        let state = resolve_job(&pool, state).await;
        let state = run_analysis(&engine, state, None).await;

        assert_eq!(state.error.as_deref(), Some("No default resume"));
        assert!(state.result.is_none());
    }

    #[tokio::test]
    async fn test_run_analysis_requires_resume_id() {
        let (_pool, engine) = lazy_engine();
        let state = GapState::new(Uuid::new_v4(), Uuid::new_v4());
        assert!(state.resume_id.is_none());

        let state = run_analysis(&engine, state, None).await;
        assert_eq!(state.error.as_deref(), Some("No default resume"));
    }

    #[test]
    fn test_state_fail_preserves_message_verbatim() {
        let state = GapState::new(Uuid::new_v4(), Uuid::new_v4());
        let state = state.fail(EngineError::JobNotFound.to_string());
        assert_eq!(state.error.as_deref(), Some("Job not found"));
    }
}
