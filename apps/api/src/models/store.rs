//! Store functions for the pipeline's persistence needs.
//!
//! Everything is plain `sqlx::query_as` / `query` with explicit binds; the
//! engine calls these through narrow, collaborator-shaped entry points
//! (resume store, job store, run store, report store, status store).

use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::models::rows::{GapReportRow, GapStatusRow, JobRow, ProcessingRunRow, ResumeRow};

// ── Resume store ────────────────────────────────────────────────────────────

/// Returns the user's default resume, if one exists.
pub async fn get_default_resume(pool: &PgPool, user_id: Uuid) -> sqlx::Result<Option<ResumeRow>> {
    sqlx::query_as::<_, ResumeRow>(
        "SELECT id, user_id, raw_text, processing_run_id, is_default, created_at
         FROM resumes WHERE user_id = $1 AND is_default = TRUE",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

pub async fn get_resume(pool: &PgPool, resume_id: Uuid) -> sqlx::Result<Option<ResumeRow>> {
    sqlx::query_as::<_, ResumeRow>(
        "SELECT id, user_id, raw_text, processing_run_id, is_default, created_at
         FROM resumes WHERE id = $1",
    )
    .bind(resume_id)
    .fetch_optional(pool)
    .await
}

// ── Job store ───────────────────────────────────────────────────────────────

pub async fn get_job(pool: &PgPool, job_id: Uuid) -> sqlx::Result<Option<JobRow>> {
    sqlx::query_as::<_, JobRow>(
        "SELECT id, title, company, location, job_type, description, requirements,
                required_skills, preferred_skills, external_url
         FROM job_listings WHERE id = $1",
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await
}

// ── Processing runs ─────────────────────────────────────────────────────────

/// Opens a processing run for one analysis execution. The effective
/// configuration is attached later via [`update_run_params`]; after the
/// report commits the row is immutable.
pub async fn insert_processing_run(
    pool: &PgPool,
    llm_model: &str,
    embed_model: &str,
    code_version_hash: &str,
    taxonomy_snapshot: &str,
) -> sqlx::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO processing_runs (id, llm_model, embed_model, code_version_hash, taxonomy_snapshot)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(id)
    .bind(llm_model)
    .bind(embed_model)
    .bind(code_version_hash)
    .bind(taxonomy_snapshot)
    .execute(pool)
    .await?;
    Ok(id)
}

/// Records the effective configuration on an open run. Executes inside the
/// caller's transaction so the run and its report commit together.
pub async fn update_run_params(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    run_id: Uuid,
    params: &Value,
) -> sqlx::Result<()> {
    sqlx::query("UPDATE processing_runs SET params_json = $2 WHERE id = $1")
        .bind(run_id)
        .bind(Json(params))
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn get_processing_run(
    pool: &PgPool,
    run_id: Uuid,
) -> sqlx::Result<Option<ProcessingRunRow>> {
    sqlx::query_as::<_, ProcessingRunRow>(
        "SELECT id, llm_model, embed_model, code_version_hash, taxonomy_snapshot,
                params_json, created_at
         FROM processing_runs WHERE id = $1",
    )
    .bind(run_id)
    .fetch_optional(pool)
    .await
}

/// Parameters for persisting one gap report row (dual format).
pub struct NewGapReport<'a> {
    pub user_id: Uuid,
    pub resume_id: Uuid,
    pub job_id: Uuid,
    pub matched_skills_json: &'a Value,
    pub missing_skills_json: &'a Value,
    pub weak_skills_json: &'a Value,
    pub resume_skills_json: &'a Value,
    pub score: f64,
    pub analysis_version: &'a str,
    pub analysis_json: &'a Value,
    pub report_md: &'a str,
    pub processing_run_id: Uuid,
}

// ── Gap reports ─────────────────────────────────────────────────────────────

/// Inserts a report row inside the caller's transaction. Report rows are
/// write-once.
pub async fn insert_gap_report(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    report: NewGapReport<'_>,
) -> sqlx::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO gap_reports
            (id, user_id, resume_id, job_id,
             matched_skills_json, missing_skills_json, weak_skills_json, resume_skills_json,
             score, analysis_version, analysis_json, report_md, processing_run_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(id)
    .bind(report.user_id)
    .bind(report.resume_id)
    .bind(report.job_id)
    .bind(Json(report.matched_skills_json))
    .bind(Json(report.missing_skills_json))
    .bind(Json(report.weak_skills_json))
    .bind(Json(report.resume_skills_json))
    .bind(report.score)
    .bind(report.analysis_version)
    .bind(Json(report.analysis_json))
    .bind(report.report_md)
    .bind(report.processing_run_id)
    .execute(&mut **tx)
    .await?;

    info!(report_id = %id, score = report.score, "Persisted gap report");
    Ok(id)
}

/// Most recent report for a resume/job pair.
pub async fn latest_gap_report(
    pool: &PgPool,
    resume_id: Uuid,
    job_id: Uuid,
) -> sqlx::Result<Option<GapReportRow>> {
    sqlx::query_as::<_, GapReportRow>(
        "SELECT id, user_id, resume_id, job_id,
                matched_skills_json, missing_skills_json, weak_skills_json, resume_skills_json,
                score, analysis_version, analysis_json, report_md, processing_run_id, created_at
         FROM gap_reports
         WHERE resume_id = $1 AND job_id = $2
         ORDER BY created_at DESC
         LIMIT 1",
    )
    .bind(resume_id)
    .bind(job_id)
    .fetch_optional(pool)
    .await
}

pub async fn delete_gap_reports(
    pool: &PgPool,
    resume_id: Uuid,
    job_id: Uuid,
) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM gap_reports WHERE resume_id = $1 AND job_id = $2")
        .bind(resume_id)
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

// ── Report status ───────────────────────────────────────────────────────────

/// Marks a (user, job) pair as `generating` or `ready`. The `ready`
/// transition must happen only after the report row has committed; readers
/// that observe `ready` are guaranteed to find the row.
pub async fn upsert_gap_status(
    pool: &PgPool,
    user_id: Uuid,
    job_id: Uuid,
    status: &str,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO gap_statuses (user_id, job_id, status, updated_at)
        VALUES ($1, $2, $3, now())
        ON CONFLICT (user_id, job_id)
        DO UPDATE SET status = EXCLUDED.status, updated_at = now()
        "#,
    )
    .bind(user_id)
    .bind(job_id)
    .bind(status)
    .execute(pool)
    .await?;
    Ok(())
}

/// Clears the status row after a failed run so the client can retry.
pub async fn clear_gap_status(pool: &PgPool, user_id: Uuid, job_id: Uuid) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM gap_statuses WHERE user_id = $1 AND job_id = $2")
        .bind(user_id)
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_gap_status(
    pool: &PgPool,
    user_id: Uuid,
    job_id: Uuid,
) -> sqlx::Result<Option<GapStatusRow>> {
    sqlx::query_as::<_, GapStatusRow>(
        "SELECT user_id, job_id, status, updated_at
         FROM gap_statuses WHERE user_id = $1 AND job_id = $2",
    )
    .bind(user_id)
    .bind(job_id)
    .fetch_optional(pool)
    .await
}
