//! Canonical, versioned gap-analysis payload.
//!
//! These types cross the engine, the persistence layer, and the API surface.
//! `GapAnalysisResult` is persisted verbatim into `analysis_json`; the legacy
//! list columns are derived from the same structures so older readers keep
//! working. Consumers must check `version` before interpreting the shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::engine::levels::LevelSnapshot;
use crate::engine::mapper::MappingDiagnostics;
use crate::taxonomy::{SkillNode, SkillType};

pub const ANALYSIS_SCHEMA_VERSION: &str = "1.0.0";

/// Lightweight descriptor for an ontology skill, preserved in results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillDescriptor {
    pub skill_id: String,
    pub name: String,
    pub skill_type: SkillType,
    pub framework: String,
    pub external_id: Option<String>,
    pub hot_tech: bool,
    pub in_demand: bool,
    pub occupation_title: Option<String>,
    pub commodity_title: Option<String>,
}

impl From<&SkillNode> for SkillDescriptor {
    fn from(node: &SkillNode) -> Self {
        Self {
            skill_id: node.skill_id.clone(),
            name: node.name.clone(),
            skill_type: node.skill_type,
            framework: node.framework.clone(),
            external_id: node.external_id.clone(),
            hot_tech: node.hot_tech,
            in_demand: node.in_demand,
            occupation_title: node.occupation_title.clone(),
            commodity_title: node.commodity_title.clone(),
        }
    }
}

/// Where a mapped entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappedOrigin {
    Resume,
    Job,
    Task,
}

/// The mapper's product: a taxonomy hit tied back to its surface token, with
/// the extractor's level attached on the appropriate side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedSkill {
    pub descriptor: SkillDescriptor,
    pub token: String,
    pub score: f32,
    pub origin: MappedOrigin,
    pub candidate_level: Option<LevelSnapshot>,
    pub required_level: Option<LevelSnapshot>,
    /// Job side only: false for nice-to-have skills.
    pub is_required: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    MeetsOrExceeds,
    Underqualified,
}

/// Single-variant discriminators so every persisted skill record carries an
/// explicit `status` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingStatus {
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeOnlyStatus {
    ResumeOnly,
}

/// A required skill present on both sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedSkill {
    pub descriptor: SkillDescriptor,
    pub token: String,
    pub status: MatchStatus,
    pub job_score: f32,
    pub resume_score: f32,
    pub candidate_level: Option<LevelSnapshot>,
    pub required_level: Option<LevelSnapshot>,
    /// max(0, required.score - candidate.score)
    pub level_delta: f32,
    pub is_required: Option<bool>,
}

/// A required job skill with no resume counterpart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingSkill {
    pub descriptor: SkillDescriptor,
    pub token: String,
    pub status: MissingStatus,
    pub job_score: f32,
    pub is_required: Option<bool>,
}

/// A resume-detected skill (superset list).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeSkill {
    pub descriptor: SkillDescriptor,
    pub token: String,
    pub status: ResumeOnlyStatus,
    pub resume_score: f32,
    pub candidate_level: Option<LevelSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GapMetrics {
    /// Coverage score in [0, 10], rounded to two decimals.
    pub overall_score: f64,
    pub overall_percent: f64,
    pub matched_skill_count: usize,
    pub missing_skill_count: usize,
    pub underqualified_skill_count: usize,
    pub resume_skill_count: usize,
}

/// Request context captured alongside the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisContext {
    pub resume_id: Uuid,
    pub job_id: Uuid,
    pub processing_run_id: Option<Uuid>,
    pub job_title: Option<String>,
    pub company: Option<String>,
    pub extractor_mode: String,
    pub extractor_version: String,
    /// Effective configuration snapshot for this request.
    pub config: Value,
    pub taxonomy_snapshot: Option<String>,
    pub generated_at: DateTime<Utc>,
}

/// Per-request diagnostics: comparison counts, mapper gate activity, stage
/// timings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    pub resume_items: usize,
    pub job_items: usize,
    pub matched_count: usize,
    pub missing_count: usize,
    pub mapping: MappingDiagnostics,
    pub timings_ms: BTreeMap<String, u64>,
}

/// Canonical, versioned representation of one gap analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapAnalysisResult {
    pub version: String,
    pub analysis_id: Option<Uuid>,
    pub context: AnalysisContext,
    pub metrics: GapMetrics,
    pub matched_skills: Vec<MatchedSkill>,
    pub missing_skills: Vec<MissingSkill>,
    pub resume_skills: Vec<ResumeSkill>,
    pub report_markdown: Option<String>,
    pub diagnostics: Diagnostics,
    pub extras: Value,
}

impl GapAnalysisResult {
    /// The underqualified subset of matched skills, persisted to the legacy
    /// `weak_skills_json` column.
    pub fn underqualified(&self) -> Vec<&MatchedSkill> {
        self.matched_skills
            .iter()
            .filter(|m| m.status == MatchStatus::Underqualified)
            .collect()
    }
}

/// Hydrates a stored result, dispatching on `analysis_version`.
///
/// Unknown or missing versions return `None`; the caller decides whether to
/// fall back to the legacy columns.
pub fn load_analysis_from_storage(
    analysis_json: Option<&Value>,
    analysis_version: Option<&str>,
) -> Option<GapAnalysisResult> {
    if analysis_version? != ANALYSIS_SCHEMA_VERSION {
        return None;
    }
    serde_json::from_value(analysis_json?.clone()).ok()
}
