//! Gap analysis: compares the mapped resume and job skill sets and produces
//! the canonical result.
//!
//! Tasks are excluded from coverage but preserved in diagnostics. The
//! contract score is coverage-only; the weighted penalty terms are computed
//! into `extras.score_components` and intentionally not folded into
//! `metrics.overall_score`.

use serde_json::json;
use std::collections::BTreeMap;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::engine::config::ScoreWeights;
use crate::engine::levels::level_delta;
use crate::engine::mapper::MappingDiagnostics;
use crate::engine::schemas::{
    AnalysisContext, Diagnostics, GapAnalysisResult, GapMetrics, MappedSkill, MatchStatus,
    MatchedSkill, MissingSkill, MissingStatus, ResumeOnlyStatus, ResumeSkill,
    ANALYSIS_SCHEMA_VERSION,
};
use crate::taxonomy::SkillType;

pub struct GapAnalyzer {
    weights: ScoreWeights,
}

impl GapAnalyzer {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    /// Builds the full analysis result from two mapped skill lists.
    ///
    /// Never faults on domain data: empty inputs produce an all-missing or
    /// all-resume-only result.
    pub fn compare(
        &self,
        resume_mapped: &[MappedSkill],
        job_mapped: &[MappedSkill],
        context: AnalysisContext,
        mapping: MappingDiagnostics,
        timings_ms: BTreeMap<String, u64>,
    ) -> GapAnalysisResult {
        info!(
            resume_items = resume_mapped.len(),
            job_items = job_mapped.len(),
            "Comparing mapped skill sets"
        );

        // Tasks are out of coverage; only real skills count.
        let resume_skills_only: Vec<&MappedSkill> = resume_mapped
            .iter()
            .filter(|m| m.descriptor.skill_type == SkillType::Skill)
            .collect();
        let job_skills_only: Vec<&MappedSkill> = job_mapped
            .iter()
            .filter(|m| m.descriptor.skill_type == SkillType::Skill)
            .collect();

        let resume_by_id: HashMap<&str, &MappedSkill> = resume_skills_only
            .iter()
            .map(|m| (m.descriptor.skill_id.as_str(), *m))
            .collect();

        let mut matched: Vec<MatchedSkill> = Vec::new();
        let mut missing: Vec<MissingSkill> = Vec::new();

        for jm in &job_skills_only {
            let id = jm.descriptor.skill_id.as_str();
            if let Some(rm) = resume_by_id.get(id) {
                let delta = level_delta(
                    rm.candidate_level.as_ref(),
                    jm.required_level.as_ref(),
                );
                let status = if f64::from(delta) > self.weights.level_grace {
                    MatchStatus::Underqualified
                } else {
                    MatchStatus::MeetsOrExceeds
                };
                debug!(
                    skill = %jm.descriptor.name,
                    delta,
                    ?status,
                    "Matched job skill against resume"
                );
                matched.push(MatchedSkill {
                    descriptor: jm.descriptor.clone(),
                    token: jm.token.clone(),
                    status,
                    job_score: jm.score,
                    resume_score: rm.score,
                    candidate_level: rm.candidate_level.clone(),
                    required_level: jm.required_level.clone(),
                    level_delta: delta,
                    is_required: jm.is_required,
                });
            } else {
                debug!(skill = %jm.descriptor.name, "Job skill missing from resume");
                missing.push(MissingSkill {
                    descriptor: jm.descriptor.clone(),
                    token: jm.token.clone(),
                    status: MissingStatus::Missing,
                    job_score: jm.score,
                    is_required: jm.is_required,
                });
            }
        }

        let score = self.coverage_score(matched.len(), missing.len());
        let score_components = self.score_components(&matched, &missing, score);

        let resume_skills: Vec<ResumeSkill> = resume_skills_only
            .iter()
            .map(|m| ResumeSkill {
                descriptor: m.descriptor.clone(),
                token: m.token.clone(),
                status: ResumeOnlyStatus::ResumeOnly,
                resume_score: m.score,
                candidate_level: m.candidate_level.clone(),
            })
            .collect();

        sort_matched(&mut matched);
        sort_missing(&mut missing);

        let underqualified_count = matched
            .iter()
            .filter(|m| m.status == MatchStatus::Underqualified)
            .count();

        info!(
            matched = matched.len(),
            missing = missing.len(),
            underqualified = underqualified_count,
            score,
            "Gap comparison complete"
        );

        let metrics = GapMetrics {
            overall_score: score,
            overall_percent: score / 10.0,
            matched_skill_count: matched.len(),
            missing_skill_count: missing.len(),
            underqualified_skill_count: underqualified_count,
            resume_skill_count: resume_skills.len(),
        };

        let diagnostics = Diagnostics {
            resume_items: resume_mapped.len(),
            job_items: job_mapped.len(),
            matched_count: matched.len(),
            missing_count: missing.len(),
            mapping,
            timings_ms,
        };

        GapAnalysisResult {
            version: ANALYSIS_SCHEMA_VERSION.to_string(),
            analysis_id: None,
            context,
            metrics,
            matched_skills: matched,
            missing_skills: missing,
            resume_skills,
            report_markdown: None,
            diagnostics,
            extras: json!({ "score_components": score_components }),
        }
    }

    /// Coverage score in [0, 10], rounded to two decimals.
    fn coverage_score(&self, matched: usize, missing: usize) -> f64 {
        let total = (matched + missing).max(1);
        let coverage = (matched as f64 / total as f64) * 10.0;
        (coverage.clamp(0.0, 10.0) * 100.0).round() / 100.0
    }

    /// Weighted penalty terms, kept out of the contract score while tuning
    /// is unsettled.
    fn score_components(
        &self,
        matched: &[MatchedSkill],
        missing: &[MissingSkill],
        coverage: f64,
    ) -> serde_json::Value {
        let hot_missing = missing.iter().filter(|m| m.descriptor.hot_tech).count();
        let ind_missing = missing.iter().filter(|m| m.descriptor.in_demand).count();
        let missing_penalty = self.weights.miss * missing.len() as f64
            + self.weights.hot * hot_missing as f64
            + self.weights.ind * ind_missing as f64;

        let mut level_penalty = 0.0;
        for m in matched {
            let delta = f64::from(m.level_delta);
            if delta <= self.weights.level_grace {
                continue;
            }
            let weight = self.weights.level
                * if m.descriptor.hot_tech { 1.5 } else { 1.0 }
                * if m.descriptor.in_demand { 1.25 } else { 1.0 };
            level_penalty += weight * delta;
        }

        json!({
            "coverage": coverage,
            "missing_penalty": missing_penalty,
            "level_penalty": level_penalty,
            "hot_missing": hot_missing,
            "in_demand_missing": ind_missing,
        })
    }
}

/// Matched ordering: underqualified first, larger gaps first, then
/// hot-tech / in-demand, then name.
fn sort_matched(matched: &mut [MatchedSkill]) {
    matched.sort_by(|a, b| {
        let a_under = a.status == MatchStatus::Underqualified;
        let b_under = b.status == MatchStatus::Underqualified;
        b_under
            .cmp(&a_under)
            .then(
                b.level_delta
                    .partial_cmp(&a.level_delta)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(b.descriptor.hot_tech.cmp(&a.descriptor.hot_tech))
            .then(b.descriptor.in_demand.cmp(&a.descriptor.in_demand))
            .then(a.descriptor.name.cmp(&b.descriptor.name))
    });
}

/// Missing ordering: hot-tech first, then in-demand, then name.
fn sort_missing(missing: &mut [MissingSkill]) {
    missing.sort_by(|a, b| {
        b.descriptor
            .hot_tech
            .cmp(&a.descriptor.hot_tech)
            .then(b.descriptor.in_demand.cmp(&a.descriptor.in_demand))
            .then(a.descriptor.name.cmp(&b.descriptor.name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::EngineConfig;
    use crate::engine::levels::LevelSnapshot;
    use crate::engine::schemas::{MappedOrigin, SkillDescriptor};
    use crate::taxonomy::skill_node;
    use chrono::Utc;
    use uuid::Uuid;

    fn context() -> AnalysisContext {
        AnalysisContext {
            resume_id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            processing_run_id: None,
            job_title: Some("Engineer".to_string()),
            company: None,
            extractor_mode: "all_in_one".to_string(),
            extractor_version: "aio-2".to_string(),
            config: json!({}),
            taxonomy_snapshot: None,
            generated_at: Utc::now(),
        }
    }

    fn analyzer() -> GapAnalyzer {
        GapAnalyzer::new(EngineConfig::default().score_weights)
    }

    fn level(score: f32) -> LevelSnapshot {
        LevelSnapshot::normalized(None, Some(score), None, Some(0.8), vec![])
    }

    fn resume_skill(id: &str, name: &str, score: f32, candidate: f32) -> MappedSkill {
        MappedSkill {
            descriptor: SkillDescriptor::from(&skill_node(id, name, SkillType::Skill)),
            token: name.to_string(),
            score,
            origin: MappedOrigin::Resume,
            candidate_level: Some(level(candidate)),
            required_level: None,
            is_required: None,
        }
    }

    fn job_skill(id: &str, name: &str, score: f32, required: f32) -> MappedSkill {
        MappedSkill {
            descriptor: SkillDescriptor::from(&skill_node(id, name, SkillType::Skill)),
            token: name.to_string(),
            score,
            origin: MappedOrigin::Job,
            candidate_level: None,
            required_level: Some(level(required)),
            is_required: Some(true),
        }
    }

    fn compare(resume: &[MappedSkill], job: &[MappedSkill]) -> GapAnalysisResult {
        analyzer().compare(resume, job, context(), MappingDiagnostics::default(), BTreeMap::new())
    }

    #[test]
    fn test_exact_match_scores_ten() {
        // Resume covers everything the job asks for.
        let resume = vec![
            resume_skill("onet.python", "Python", 0.9, 3.0),
            resume_skill("onet.react", "React.js", 0.85, 2.0),
        ];
        let job = vec![
            job_skill("onet.python", "Python", 0.92, 2.0),
            job_skill("onet.react", "React.js", 0.88, 2.0),
        ];

        let result = compare(&resume, &job);
        assert_eq!(result.metrics.overall_score, 10.0);
        assert_eq!(result.matched_skills.len(), 2);
        assert!(result.missing_skills.is_empty());
        assert!(result
            .matched_skills
            .iter()
            .all(|m| m.status == MatchStatus::MeetsOrExceeds));
    }

    #[test]
    fn test_missing_hot_tech_lowers_coverage() {
        let resume = vec![
            resume_skill("onet.python", "Python", 0.9, 2.0),
            resume_skill("onet.sql", "SQL", 0.9, 2.0),
        ];
        let mut k8s = job_skill("onet.k8s", "Kubernetes", 0.8, 2.0);
        k8s.descriptor.hot_tech = true;
        let job = vec![
            job_skill("onet.python", "Python", 0.92, 2.0),
            job_skill("onet.sql", "SQL", 0.9, 2.0),
            k8s,
        ];

        let result = compare(&resume, &job);
        assert_eq!(result.metrics.overall_score, 6.67);
        assert_eq!(result.missing_skills.len(), 1);
        assert_eq!(result.missing_skills[0].descriptor.name, "Kubernetes");
        assert!(result.missing_skills[0].descriptor.hot_tech);
    }

    #[test]
    fn test_underqualified_when_delta_exceeds_grace() {
        // Candidate dabbles in Python; the job wants a senior.
        let resume = vec![resume_skill("onet.python", "Python", 0.9, 1.0)];
        let job = vec![job_skill("onet.python", "Python", 0.92, 3.5)];

        let result = compare(&resume, &job);
        assert_eq!(result.metrics.overall_score, 10.0);
        assert!(result.missing_skills.is_empty());

        let m = &result.matched_skills[0];
        assert_eq!(m.status, MatchStatus::Underqualified);
        assert!((m.level_delta - 2.5).abs() < 1e-6);
        assert_eq!(result.metrics.underqualified_skill_count, 1);
    }

    #[test]
    fn test_delta_within_grace_meets_requirement() {
        let resume = vec![resume_skill("onet.python", "Python", 0.9, 2.8)];
        let job = vec![job_skill("onet.python", "Python", 0.92, 3.0)];

        let result = compare(&resume, &job);
        let m = &result.matched_skills[0];
        assert!((m.level_delta - 0.2).abs() < 1e-6);
        assert_eq!(m.status, MatchStatus::MeetsOrExceeds);
    }

    #[test]
    fn test_candidate_exceeding_requirement_has_zero_delta() {
        let resume = vec![resume_skill("onet.python", "Python", 0.9, 4.0)];
        let job = vec![job_skill("onet.python", "Python", 0.92, 2.0)];

        let result = compare(&resume, &job);
        let m = &result.matched_skills[0];
        assert_eq!(m.level_delta, 0.0);
        assert_eq!(m.status, MatchStatus::MeetsOrExceeds);
    }

    #[test]
    fn test_matched_and_missing_are_disjoint() {
        let resume = vec![
            resume_skill("onet.a", "A", 0.9, 2.0),
            resume_skill("onet.b", "B", 0.9, 2.0),
        ];
        let job = vec![
            job_skill("onet.a", "A", 0.9, 2.0),
            job_skill("onet.c", "C", 0.9, 2.0),
        ];

        let result = compare(&resume, &job);
        let matched_ids: Vec<&str> = result
            .matched_skills
            .iter()
            .map(|m| m.descriptor.skill_id.as_str())
            .collect();
        let missing_ids: Vec<&str> = result
            .missing_skills
            .iter()
            .map(|m| m.descriptor.skill_id.as_str())
            .collect();

        assert!(matched_ids.iter().all(|id| !missing_ids.contains(id)));
        assert_eq!(matched_ids.len() + missing_ids.len(), 2);
    }

    #[test]
    fn test_empty_resume_is_all_missing_with_zero_score() {
        let job = vec![
            job_skill("onet.a", "A", 0.9, 2.0),
            job_skill("onet.b", "B", 0.9, 2.0),
        ];
        let result = compare(&[], &job);
        assert_eq!(result.metrics.overall_score, 0.0);
        assert_eq!(result.missing_skills.len(), 2);
        assert!(result.matched_skills.is_empty());
        assert!(result.resume_skills.is_empty());
    }

    #[test]
    fn test_empty_job_scores_zero_with_resume_superset() {
        let resume = vec![resume_skill("onet.a", "A", 0.9, 2.0)];
        let result = compare(&resume, &[]);
        assert_eq!(result.metrics.overall_score, 0.0);
        assert!(result.matched_skills.is_empty());
        assert!(result.missing_skills.is_empty());
        assert_eq!(result.resume_skills.len(), 1);
    }

    #[test]
    fn test_tasks_excluded_from_coverage() {
        let mut resume_task = resume_skill("onet.task.x", "Build pipelines", 0.8, 2.0);
        resume_task.descriptor.skill_type = SkillType::Task;
        resume_task.origin = MappedOrigin::Task;
        let mut job_task = job_skill("onet.task.y", "Ship features", 0.8, 2.0);
        job_task.descriptor.skill_type = SkillType::Task;
        job_task.origin = MappedOrigin::Task;

        let resume = vec![resume_skill("onet.a", "A", 0.9, 2.0), resume_task];
        let job = vec![job_skill("onet.a", "A", 0.9, 2.0), job_task];

        let result = compare(&resume, &job);
        assert_eq!(result.metrics.overall_score, 10.0);
        assert_eq!(result.matched_skills.len(), 1);
        assert!(result.missing_skills.is_empty());
        // Tasks stay visible in diagnostics counts.
        assert_eq!(result.diagnostics.resume_items, 2);
        assert_eq!(result.diagnostics.job_items, 2);
        // The resume superset is skills-only.
        assert_eq!(result.resume_skills.len(), 1);
    }

    #[test]
    fn test_score_bounds_hold() {
        // Score is 10 iff nothing missing and something matched; 0 iff
        // nothing matched.
        let resume = vec![resume_skill("onet.a", "A", 0.9, 2.0)];
        let job_all = vec![job_skill("onet.a", "A", 0.9, 2.0)];
        let job_none = vec![job_skill("onet.b", "B", 0.9, 2.0)];

        assert_eq!(compare(&resume, &job_all).metrics.overall_score, 10.0);
        assert_eq!(compare(&resume, &job_none).metrics.overall_score, 0.0);

        let mixed = vec![
            job_skill("onet.a", "A", 0.9, 2.0),
            job_skill("onet.b", "B", 0.9, 2.0),
            job_skill("onet.c", "C", 0.9, 2.0),
        ];
        let score = compare(&resume, &mixed).metrics.overall_score;
        assert!(score > 0.0 && score < 10.0);
        assert_eq!(score, 3.33);
    }

    #[test]
    fn test_matched_ordering() {
        let resume = vec![
            resume_skill("onet.a", "Alpha", 0.9, 2.0),
            resume_skill("onet.b", "Beta", 0.9, 0.5),
            resume_skill("onet.c", "Gamma", 0.9, 1.0),
        ];
        let mut hot = job_skill("onet.a", "Alpha", 0.9, 2.0);
        hot.descriptor.hot_tech = true;
        let job = vec![
            hot,
            job_skill("onet.b", "Beta", 0.9, 3.5), // delta 3.0
            job_skill("onet.c", "Gamma", 0.9, 2.0), // delta 1.0
        ];

        let result = compare(&resume, &job);
        let names: Vec<&str> = result
            .matched_skills
            .iter()
            .map(|m| m.descriptor.name.as_str())
            .collect();
        // Underqualified first, larger delta first, then the hot meets-level skill.
        assert_eq!(names, vec!["Beta", "Gamma", "Alpha"]);
    }

    #[test]
    fn test_missing_ordering_prioritises_hot_then_in_demand() {
        let mut hot = job_skill("onet.h", "Zed", 0.9, 2.0);
        hot.descriptor.hot_tech = true;
        let mut ind = job_skill("onet.i", "Mid", 0.9, 2.0);
        ind.descriptor.in_demand = true;
        let plain = job_skill("onet.p", "Alpha", 0.9, 2.0);

        let result = compare(&[], &[plain, ind, hot]);
        let names: Vec<&str> = result
            .missing_skills
            .iter()
            .map(|m| m.descriptor.name.as_str())
            .collect();
        assert_eq!(names, vec!["Zed", "Mid", "Alpha"]);
    }

    #[test]
    fn test_score_components_live_in_extras_not_score() {
        let resume = vec![resume_skill("onet.a", "A", 0.9, 0.5)];
        let mut hot = job_skill("onet.b", "B", 0.9, 2.0);
        hot.descriptor.hot_tech = true;
        let job = vec![job_skill("onet.a", "A", 0.9, 3.5), hot];

        let result = compare(&resume, &job);
        // Coverage-only score: 1 matched of 2 total.
        assert_eq!(result.metrics.overall_score, 5.0);

        let components = &result.extras["score_components"];
        assert!(components["missing_penalty"].as_f64().unwrap() > 0.0);
        assert!(components["level_penalty"].as_f64().unwrap() > 0.0);
        assert_eq!(components["hot_missing"], json!(1));
    }

    #[test]
    fn test_version_stamped() {
        let result = compare(&[], &[]);
        assert_eq!(result.version, ANALYSIS_SCHEMA_VERSION);
    }
}
