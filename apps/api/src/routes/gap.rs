//! Gap analysis endpoints: submit a run, fetch the latest report, delete.
//!
//! Submission is asynchronous: the handler validates overrides, marks the
//! (user, job) status `generating`, and runs the orchestrator on a background
//! task. The engine flips the status to `ready` after the report commits;
//! a failed run clears it so the client can retry.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

use crate::engine::orchestrator::run_gap_agent;
use crate::engine::schemas::load_analysis_from_storage;
use crate::errors::{AppError, EngineError};
use crate::models::store;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RunGapRequest {
    pub user_id: Uuid,
    pub job_id: Uuid,
    pub policy_overrides: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct GapQuery {
    pub user_id: Uuid,
}

/// POST /api/v1/gap/run — kick off an analysis for the user's default resume.
pub async fn handle_run_gap(
    State(state): State<AppState>,
    Json(request): Json<RunGapRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    // Reject malformed overrides before accepting the job; the background
    // task applies the same overrides to its request-scoped config.
    if let Some(overrides) = &request.policy_overrides {
        state.engine.base_config().with_overrides(overrides)?;
    }

    // The submitter must have a default resume; without one the background
    // run could only fail.
    if store::get_default_resume(&state.db, request.user_id)
        .await?
        .is_none()
    {
        return Err(EngineError::NoDefaultResume.into());
    }
    if store::get_job(&state.db, request.job_id).await?.is_none() {
        return Err(EngineError::JobNotFound.into());
    }

    store::upsert_gap_status(&state.db, request.user_id, request.job_id, "generating").await?;
    info!(user_id = %request.user_id, job_id = %request.job_id, "Gap analysis queued");

    let RunGapRequest {
        user_id,
        job_id,
        policy_overrides,
    } = request;
    tokio::spawn(async move {
        let out = run_gap_agent(
            &state.db,
            &state.engine,
            user_id,
            job_id,
            policy_overrides.as_ref(),
        )
        .await;

        if let Some(err) = out.error {
            error!(%user_id, %job_id, error = %err, "Background gap analysis failed");
            if let Err(e) = store::clear_gap_status(&state.db, user_id, job_id).await {
                error!(%user_id, %job_id, "Failed to clear gap status: {e}");
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "generating", "job_id": job_id })),
    ))
}

/// GET /api/v1/gap/by-job/:job_id — latest report for the user's default resume.
pub async fn handle_get_gap(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Query(query): Query<GapQuery>,
) -> Result<Json<Value>, AppError> {
    let resume = store::get_default_resume(&state.db, query.user_id)
        .await?
        .ok_or(EngineError::NoDefaultResume)?;

    let Some(rec) = store::latest_gap_report(&state.db, resume.id, job_id).await? else {
        let status = store::get_gap_status(&state.db, query.user_id, job_id).await?;
        return Ok(Json(match status {
            Some(row) => json!({ "exists": false, "status": row.status }),
            None => json!({ "exists": false }),
        }));
    };

    // Prefer the canonical payload; fall back to the legacy columns for
    // reports persisted before the versioned schema.
    let analysis = load_analysis_from_storage(
        rec.analysis_json.as_ref().map(|j| &j.0),
        rec.analysis_version.as_deref(),
    );
    let payload = match analysis {
        Some(analysis) => serde_json::to_value(&analysis)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("analysis serialization: {e}")))?,
        None => json!({
            "score": rec.score,
            "matched_skills": rec.matched_skills_json.0,
            "missing_skills": rec.missing_skills_json.0,
            "resume_skills": rec.resume_skills_json.as_ref().map(|j| j.0.clone()),
        }),
    };

    // Surface which models produced this report alongside the payload.
    let run = store::get_processing_run(&state.db, rec.processing_run_id).await?;

    info!(report_id = %rec.id, %job_id, "Returning gap report");
    Ok(Json(json!({
        "exists": true,
        "id": rec.id,
        "analysis": payload,
        "report_md": rec.report_md,
        "processing_run": run.map(|r| json!({
            "llm_model": r.llm_model,
            "embed_model": r.embed_model,
            "taxonomy_snapshot": r.taxonomy_snapshot,
        })),
    })))
}

/// DELETE /api/v1/gap/by-job/:job_id — drop reports and status for the pair.
pub async fn handle_delete_gap(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Query(query): Query<GapQuery>,
) -> Result<Json<Value>, AppError> {
    let resume = store::get_default_resume(&state.db, query.user_id)
        .await?
        .ok_or(EngineError::NoDefaultResume)?;

    let deleted = store::delete_gap_reports(&state.db, resume.id, job_id).await?;
    store::clear_gap_status(&state.db, query.user_id, job_id).await?;

    info!(%job_id, deleted, "Deleted gap reports");
    Ok(Json(json!({ "deleted": deleted })))
}
