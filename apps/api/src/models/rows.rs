#![allow(dead_code)]

//! Persisted row shapes read and written by the analysis pipeline.
//!
//! Column layouts mirror `migrations/`; only the fields the engine touches
//! are mapped here.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use uuid::Uuid;

/// A parsed resume. `raw_text` is produced by the (external) document
/// parsing pipeline; this service never sees the original file.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResumeRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub raw_text: Option<String>,
    pub processing_run_id: Option<Uuid>,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

/// A stored job listing. `required_skills` / `preferred_skills` are
/// structured lists captured at import time and folded into the job text
/// during analysis.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub job_type: Option<String>,
    pub description: Option<String>,
    pub requirements: Option<String>,
    pub required_skills: Option<Json<Vec<String>>>,
    pub preferred_skills: Option<Json<Vec<String>>>,
    pub external_url: Option<String>,
}

/// One row per analysis execution. Created at analysis start, enriched with
/// the effective configuration after mapping, then never touched again.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProcessingRunRow {
    pub id: Uuid,
    pub llm_model: String,
    pub embed_model: String,
    pub code_version_hash: String,
    pub taxonomy_snapshot: String,
    pub params_json: Option<Json<Value>>,
    pub created_at: DateTime<Utc>,
}

/// Dual-format gap report row: legacy list columns kept for older readers,
/// canonical payload in `analysis_json` keyed by `analysis_version`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GapReportRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub resume_id: Uuid,
    pub job_id: Uuid,
    pub matched_skills_json: Json<Value>,
    pub missing_skills_json: Json<Value>,
    pub weak_skills_json: Option<Json<Value>>,
    pub resume_skills_json: Option<Json<Value>>,
    pub score: f64,
    pub analysis_version: Option<String>,
    pub analysis_json: Option<Json<Value>>,
    pub report_md: Option<String>,
    pub processing_run_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Per (user, job) report generation status: `generating` or `ready`.
/// Rows are deleted, not flipped, when a run fails so clients can retry.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GapStatusRow {
    pub user_id: Uuid,
    pub job_id: Uuid,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}
