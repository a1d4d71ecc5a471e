//! CareerEngine — the resume-to-job analysis pipeline.
//!
//! Flow: load resume → build enriched job text → derive effective config →
//! extract (cached) → map to taxonomy → compare → render → persist.
//!
//! Any stage failure fails the whole analysis; the processing-run row
//! survives, and the orchestration layer clears the report status so the
//! client can retry.

pub mod analyzer;
pub mod cache;
pub mod config;
pub mod extractor;
pub mod levels;
pub mod mapper;
pub mod orchestrator;
pub mod prompts;
pub mod renderer;
pub mod retry;
pub mod schemas;

use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::analyzer::GapAnalyzer;
use crate::engine::cache::{CacheKey, DocType, ExtractionCache};
use crate::engine::config::EngineConfig;
use crate::engine::extractor::{
    ExtractionOutput, KeywordExtractor, LlmExtractor, SkillExtractor,
};
use crate::engine::mapper::{SkillTokenInput, SourceType, TaxonomyMapper};
use crate::engine::renderer::ReportRenderer;
use crate::engine::schemas::{AnalysisContext, GapAnalysisResult};
use crate::errors::EngineError;
use crate::llm_client::LlmClient;
use crate::models::rows::JobRow;
use crate::models::store;
use crate::taxonomy::TaxonomyIndex;

/// Which extractor backend the engine was built with. The keyword variant is
/// a deliberate construction-time selection for tests and offline runs.
#[derive(Clone)]
pub enum ExtractorKind {
    Llm(LlmClient),
    Keyword,
}

#[derive(Clone)]
pub struct CareerEngine {
    pool: PgPool,
    extractor_kind: ExtractorKind,
    index: Arc<dyn TaxonomyIndex>,
    cache: ExtractionCache,
    base_config: EngineConfig,
    embed_model: String,
    taxonomy_snapshot: String,
}

impl CareerEngine {
    pub fn new(
        pool: PgPool,
        extractor_kind: ExtractorKind,
        index: Arc<dyn TaxonomyIndex>,
        base_config: EngineConfig,
        embed_model: String,
        taxonomy_snapshot: String,
    ) -> Self {
        let cache = ExtractionCache::new(pool.clone());
        Self {
            pool,
            extractor_kind,
            index,
            cache,
            base_config,
            embed_model,
            taxonomy_snapshot,
        }
    }

    /// The process-wide base configuration. Request handlers use this to
    /// validate overrides before accepting a job.
    pub fn base_config(&self) -> &EngineConfig {
        &self.base_config
    }

    /// Runs the full analysis for one resume/job pair.
    pub async fn analyze(
        &self,
        resume_id: Uuid,
        job_id: Uuid,
        policy_overrides: Option<&Value>,
    ) -> Result<GapAnalysisResult, EngineError> {
        let started = Instant::now();
        info!(%resume_id, %job_id, "CareerEngine.analyze: start");

        // 1. Resume text.
        let resume = store::get_resume(&self.pool, resume_id)
            .await?
            .ok_or(EngineError::ResumeMissing(resume_id))?;
        let resume_text = resume.raw_text.clone().unwrap_or_default();

        // 2. Job text, enriched with the structured listing fields. The
        // enrichment block is part of the contract: mapping quality depends
        // on the skill lists being visible to the extractor.
        let job = store::get_job(&self.pool, job_id)
            .await?
            .ok_or(EngineError::JobNotFound)?;
        let job_text = build_job_text(&job);

        // 3. Effective configuration (request-scoped copy) + processing run.
        let config = self
            .base_config
            .with_overrides(policy_overrides.unwrap_or(&Value::Null))?;
        let run_id = store::insert_processing_run(
            &self.pool,
            &config.extraction.extractor_model,
            &self.embed_model,
            option_env!("GAPWISE_BUILD_HASH").unwrap_or(env!("CARGO_PKG_VERSION")),
            &self.taxonomy_snapshot,
        )
        .await?;

        let extractor = self.build_extractor(&config);
        let mut timings: BTreeMap<String, u64> = BTreeMap::new();

        // 4. Extraction, memoised by content hash.
        let stage = Instant::now();
        let resume_struct = self
            .cached_extract(extractor.clone(), DocType::Resume, &resume_text)
            .await?;
        let job_struct = self
            .cached_extract(extractor.clone(), DocType::Jd, &job_text)
            .await?;
        timings.insert("extract_ms".to_string(), stage.elapsed().as_millis() as u64);
        info!(
            resume_skills = resume_struct.skills.len(),
            job_skills = job_struct.skills.len(),
            "Extraction complete for both sides"
        );

        // 5. Taxonomy mapping for skills and responsibilities.
        let stage = Instant::now();
        let mut mapper = TaxonomyMapper::new(
            self.index.clone(),
            config.match_strategy.clone(),
            config.crag.clone(),
        );

        let resume_inputs = token_inputs(&resume_struct, false);
        let mut resume_map = mapper
            .map_tokens(&resume_inputs, SourceType::Resume, &resume_text)
            .await?;
        resume_map.extend(
            mapper
                .map_tasks(&resume_struct.responsibilities, &resume_text)
                .await?,
        );

        let job_inputs = token_inputs(&job_struct, true);
        let mut job_map = mapper
            .map_tokens(&job_inputs, SourceType::Jd, &job_text)
            .await?;
        job_map.extend(
            mapper
                .map_tasks(&job_struct.responsibilities, &job_text)
                .await?,
        );

        let mapping_diag = mapper.take_diagnostics();
        timings.insert("map_ms".to_string(), stage.elapsed().as_millis() as u64);
        info!(
            resume_mapped = resume_map.len(),
            job_mapped = job_map.len(),
            accepted = mapping_diag.gate_summary.total_mapped,
            unmapped = mapping_diag.gate_summary.total_unmapped,
            "Taxonomy mapping complete"
        );

        // 6. Compare.
        let stage = Instant::now();
        let context = AnalysisContext {
            resume_id,
            job_id,
            processing_run_id: Some(run_id),
            job_title: Some(job.title.clone()),
            company: job.company.clone(),
            extractor_mode: config.extraction.mode.as_str().to_string(),
            extractor_version: extractor.version().to_string(),
            config: config.to_json(),
            taxonomy_snapshot: Some(self.taxonomy_snapshot.clone()),
            generated_at: Utc::now(),
        };
        let analyzer = GapAnalyzer::new(config.score_weights.clone());
        let mut analysis = analyzer.compare(&resume_map, &job_map, context, mapping_diag, timings);
        analysis
            .diagnostics
            .timings_ms
            .insert("compare_ms".to_string(), stage.elapsed().as_millis() as u64);

        // 7. Render.
        analysis.report_markdown = Some(ReportRenderer.render(&analysis));
        analysis
            .diagnostics
            .timings_ms
            .insert("total_ms".to_string(), started.elapsed().as_millis() as u64);

        // 8. Persist report + run params in one transaction; flip the report
        // status to ready only after the commit.
        let report_id = self
            .persist(resume.user_id, resume_id, job_id, run_id, &config, &analysis)
            .await?;
        analysis.analysis_id = Some(report_id);

        store::upsert_gap_status(&self.pool, resume.user_id, job_id, "ready").await?;

        info!(
            %resume_id,
            %job_id,
            report_id = %report_id,
            score = analysis.metrics.overall_score,
            "CareerEngine.analyze: end"
        );
        Ok(analysis)
    }

    fn build_extractor(&self, config: &EngineConfig) -> Arc<dyn SkillExtractor> {
        match &self.extractor_kind {
            ExtractorKind::Llm(client) => Arc::new(LlmExtractor::new(
                client.clone(),
                config.extraction.clone(),
            )),
            ExtractorKind::Keyword => Arc::new(KeywordExtractor),
        }
    }

    async fn cached_extract(
        &self,
        extractor: Arc<dyn SkillExtractor>,
        doc_type: DocType,
        text: &str,
    ) -> Result<ExtractionOutput, EngineError> {
        let key = CacheKey::for_text(doc_type, text, extractor.as_ref());
        let is_jd = doc_type == DocType::Jd;
        let owned = text.to_string();
        self.cache
            .get_or_compute(&key, move || async move {
                extractor.extract(&owned, is_jd).await
            })
            .await
    }

    /// Transactional persistence with a single deadlock retry.
    async fn persist(
        &self,
        user_id: Uuid,
        resume_id: Uuid,
        job_id: Uuid,
        run_id: Uuid,
        config: &EngineConfig,
        analysis: &GapAnalysisResult,
    ) -> Result<Uuid, EngineError> {
        let matched = serde_json::to_value(&analysis.matched_skills)
            .map_err(|e| EngineError::PersistenceFailed(e.to_string()))?;
        let missing = serde_json::to_value(&analysis.missing_skills)
            .map_err(|e| EngineError::PersistenceFailed(e.to_string()))?;
        let weak = serde_json::to_value(analysis.underqualified())
            .map_err(|e| EngineError::PersistenceFailed(e.to_string()))?;
        let resume_skills = serde_json::to_value(&analysis.resume_skills)
            .map_err(|e| EngineError::PersistenceFailed(e.to_string()))?;
        let canonical = serde_json::to_value(analysis)
            .map_err(|e| EngineError::PersistenceFailed(e.to_string()))?;
        let params = config.to_json();
        let report_md = analysis.report_markdown.as_deref().unwrap_or_default();

        let mut retried = false;
        loop {
            let result = self
                .try_persist(
                    user_id,
                    resume_id,
                    job_id,
                    run_id,
                    &params,
                    &matched,
                    &missing,
                    &weak,
                    &resume_skills,
                    &canonical,
                    report_md,
                    analysis,
                )
                .await;
            match result {
                Ok(id) => return Ok(id),
                Err(e) if retry::is_serialization_failure(&e) && !retried => {
                    warn!("Report persistence hit a serialization failure, retrying once");
                    retried = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn try_persist(
        &self,
        user_id: Uuid,
        resume_id: Uuid,
        job_id: Uuid,
        run_id: Uuid,
        params: &Value,
        matched: &Value,
        missing: &Value,
        weak: &Value,
        resume_skills: &Value,
        canonical: &Value,
        report_md: &str,
        analysis: &GapAnalysisResult,
    ) -> Result<Uuid, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        store::update_run_params(&mut tx, run_id, params).await?;
        let report_id = store::insert_gap_report(
            &mut tx,
            store::NewGapReport {
                user_id,
                resume_id,
                job_id,
                matched_skills_json: matched,
                missing_skills_json: missing,
                weak_skills_json: weak,
                resume_skills_json: resume_skills,
                score: analysis.metrics.overall_score,
                analysis_version: &analysis.version,
                analysis_json: canonical,
                report_md,
                processing_run_id: run_id,
            },
        )
        .await?;
        tx.commit().await?;
        Ok(report_id)
    }
}

/// Builds skill-token inputs for the mapper from extractor output. On the
/// job side, nice-to-have skills are marked not-required.
fn token_inputs(output: &ExtractionOutput, is_job_description: bool) -> Vec<SkillTokenInput> {
    output
        .skills
        .iter()
        .map(|s| SkillTokenInput {
            token: s.name.clone(),
            level: s.level.clone(),
            is_required: if is_job_description {
                Some(!s.nice_to_have)
            } else {
                None
            },
        })
        .collect()
}

/// Concatenates description, requirements, and an enrichment block (listing
/// metadata plus the structured skill lists) into the job text the extractor
/// and mapper operate on.
fn build_job_text(job: &JobRow) -> String {
    let mut sections: Vec<String> = Vec::new();

    let base: Vec<&str> = [job.description.as_deref(), job.requirements.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if !base.is_empty() {
        sections.push(base.join("\n\n"));
    }

    let mut metadata: Vec<String> = Vec::new();
    if !job.title.trim().is_empty() {
        metadata.push(format!("Job Title: {}", job.title.trim()));
    }
    if let Some(company) = job.company.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        metadata.push(format!("Company: {company}"));
    }
    if let Some(location) = job.location.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        metadata.push(format!("Location: {location}"));
    }
    if let Some(job_type) = job.job_type.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        metadata.push(format!("Employment Type: {job_type}"));
    }
    if !metadata.is_empty() {
        sections.push(metadata.join("\n"));
    }

    if let Some(section) = bullet_section("Required skills", job.required_skills.as_deref()) {
        sections.push(section);
    }
    if let Some(section) = bullet_section("Preferred skills", job.preferred_skills.as_deref()) {
        sections.push(section);
    }

    if let Some(url) = job.external_url.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        sections.push(format!("Job posting: {url}"));
    }

    sections.join("\n\n")
}

fn bullet_section(title: &str, items: Option<&Vec<String>>) -> Option<String> {
    let items: Vec<&str> = items?
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        return None;
    }
    let bullets = items
        .iter()
        .map(|i| format!("- {i}"))
        .collect::<Vec<_>>()
        .join("\n");
    Some(format!("{title}:\n{bullets}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::extractor::ExtractedSkill;
    use crate::engine::levels::LevelSnapshot;
    use chrono::Utc;
    use sqlx::types::Json;

    fn job_row() -> JobRow {
        JobRow {
            id: Uuid::new_v4(),
            title: "Senior Backend Engineer".to_string(),
            company: Some("Initech".to_string()),
            location: Some("Remote".to_string()),
            job_type: Some("Full-time".to_string()),
            description: Some("Build and operate our core services.".to_string()),
            requirements: Some("5+ years Python. Kubernetes required.".to_string()),
            required_skills: Some(Json(vec!["Python".to_string(), "Kubernetes".to_string()])),
            preferred_skills: Some(Json(vec!["Kafka".to_string()])),
            external_url: Some("https://jobs.example.com/123".to_string()),
        }
    }

    #[test]
    fn test_build_job_text_includes_all_enrichment_sections() {
        let text = build_job_text(&job_row());
        assert!(text.starts_with("Build and operate our core services."));
        assert!(text.contains("5+ years Python. Kubernetes required."));
        assert!(text.contains("Job Title: Senior Backend Engineer"));
        assert!(text.contains("Company: Initech"));
        assert!(text.contains("Location: Remote"));
        assert!(text.contains("Employment Type: Full-time"));
        assert!(text.contains("Required skills:\n- Python\n- Kubernetes"));
        assert!(text.contains("Preferred skills:\n- Kafka"));
        assert!(text.contains("Job posting: https://jobs.example.com/123"));
    }

    #[test]
    fn test_build_job_text_omits_absent_fields() {
        let mut job = job_row();
        job.company = None;
        job.requirements = None;
        job.required_skills = None;
        job.preferred_skills = Some(Json(vec!["  ".to_string()]));
        job.external_url = None;

        let text = build_job_text(&job);
        assert!(!text.contains("Company:"));
        assert!(!text.contains("Required skills:"));
        assert!(!text.contains("Preferred skills:"));
        assert!(!text.contains("Job posting:"));
        assert!(text.contains("Job Title: Senior Backend Engineer"));
    }

    #[test]
    fn test_token_inputs_mark_nice_to_have_as_optional() {
        let output = ExtractionOutput {
            skills: vec![
                ExtractedSkill {
                    name: "Python".to_string(),
                    nice_to_have: false,
                    evidence_spans: vec![],
                    evidence_texts: vec![],
                    level: LevelSnapshot::working_default(),
                },
                ExtractedSkill {
                    name: "Kafka".to_string(),
                    nice_to_have: true,
                    evidence_spans: vec![],
                    evidence_texts: vec![],
                    level: LevelSnapshot::working_default(),
                },
            ],
            responsibilities: vec![],
        };

        let jd = token_inputs(&output, true);
        assert_eq!(jd[0].is_required, Some(true));
        assert_eq!(jd[1].is_required, Some(false));

        let resume = token_inputs(&output, false);
        assert!(resume.iter().all(|i| i.is_required.is_none()));
    }

    #[test]
    fn test_analysis_context_carries_config_snapshot() {
        let config = EngineConfig::default();
        let context = AnalysisContext {
            resume_id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            processing_run_id: None,
            job_title: None,
            company: None,
            extractor_mode: config.extraction.mode.as_str().to_string(),
            extractor_version: "aio-2".to_string(),
            config: config.to_json(),
            taxonomy_snapshot: None,
            generated_at: Utc::now(),
        };
        assert_eq!(context.extractor_mode, "all_in_one");
        assert_eq!(
            context.config["match_strategy"]["strategy"],
            serde_json::json!("quantile")
        );
    }
}
