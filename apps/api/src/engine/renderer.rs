//! Markdown report rendering. Pure — no I/O; the output is recorded on the
//! persisted report row for display.

use crate::engine::levels::LevelSnapshot;
use crate::engine::schemas::{
    GapAnalysisResult, MatchStatus, MatchedSkill, MissingSkill, ResumeSkill, SkillDescriptor,
};
use std::collections::HashSet;

/// Level gaps above this many points get a warning line in the report.
const GAP_CALLOUT_THRESHOLD: f32 = 0.25;

pub struct ReportRenderer;

impl ReportRenderer {
    /// Renders the stable markdown report. Sections appear in a fixed order;
    /// empty sections are omitted.
    pub fn render(&self, analysis: &GapAnalysisResult) -> String {
        let mut lines: Vec<String> = Vec::new();
        lines.push("# Career Gap Analysis".to_string());
        lines.push(String::new());
        lines.push(format!(
            "Overall Match: {:.2}",
            analysis.metrics.overall_percent
        ));
        lines.push(String::new());

        let (required_missing, nice_missing): (Vec<&MissingSkill>, Vec<&MissingSkill>) = analysis
            .missing_skills
            .iter()
            .partition(|s| s.is_required != Some(false));
        let (required_matched, nice_matched): (Vec<&MatchedSkill>, Vec<&MatchedSkill>) = analysis
            .matched_skills
            .iter()
            .partition(|s| s.is_required != Some(false));

        if !required_missing.is_empty() {
            push_section(&mut lines, "Missing Skills (Required)");
            for s in &required_missing {
                lines.push(skill_line(&s.descriptor));
            }
            lines.push(String::new());
        }

        let underqualified: Vec<&&MatchedSkill> = required_matched
            .iter()
            .filter(|s| s.status == MatchStatus::Underqualified)
            .collect();
        if !underqualified.is_empty() {
            push_section(&mut lines, "Underqualified Skills (Present but Below Required Level)");
            for s in &underqualified {
                push_matched(&mut lines, s);
            }
            lines.push(String::new());
        }

        let meets: Vec<&&MatchedSkill> = required_matched
            .iter()
            .filter(|s| s.status == MatchStatus::MeetsOrExceeds)
            .collect();
        if !meets.is_empty() {
            push_section(&mut lines, "Skills Meeting Requirements");
            for s in &meets {
                push_matched(&mut lines, s);
            }
            lines.push(String::new());
        }

        if !nice_missing.is_empty() {
            push_section(&mut lines, "Nice to Have - Missing Skills");
            for s in &nice_missing {
                lines.push(skill_line(&s.descriptor));
            }
            lines.push(String::new());
        }

        if !nice_matched.is_empty() {
            push_section(&mut lines, "Nice to Have - Matched Skills");
            for s in &nice_matched {
                push_matched(&mut lines, s);
            }
            lines.push(String::new());
        }

        let resume_skills = dedupe_resume_skills(&analysis.resume_skills);
        if !resume_skills.is_empty() {
            push_section(&mut lines, "Resume Skills (All Detected Skills)");
            for s in &resume_skills {
                lines.push(skill_line(&s.descriptor));
                if let Some(level) = &s.candidate_level {
                    lines.push(level_row("Candidate Level", level));
                }
            }
            lines.push(String::new());
        }

        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        lines.join("\n")
    }
}

fn push_section(lines: &mut Vec<String>, title: &str) {
    lines.push(format!("## {title}"));
}

fn skill_line(descriptor: &SkillDescriptor) -> String {
    let mut line = format!("- {}", descriptor.name);
    if descriptor.hot_tech {
        line.push_str(" 🔥");
    }
    if descriptor.in_demand {
        line.push_str(" 📈");
    }
    line
}

fn push_matched(lines: &mut Vec<String>, skill: &MatchedSkill) {
    lines.push(skill_line(&skill.descriptor));
    if let Some(level) = &skill.candidate_level {
        lines.push(level_row("Candidate Level", level));
    }
    if let Some(level) = &skill.required_level {
        lines.push(level_row("Required Level", level));
    }
    if skill.level_delta > GAP_CALLOUT_THRESHOLD {
        lines.push(format!(
            "  ⚠️ Level Gap: {:.1} points below required",
            skill.level_delta
        ));
    }
}

fn level_row(prefix: &str, level: &LevelSnapshot) -> String {
    let mut row = format!(
        "  {prefix}: {} ({:.1}/4.0)",
        level.label.as_str(),
        level.score
    );
    if let Some(years) = level.years {
        row.push_str(&format!(" - {years:.0}+ years"));
    }
    row
}

fn dedupe_resume_skills(skills: &[ResumeSkill]) -> Vec<&ResumeSkill> {
    let mut seen: HashSet<&str> = HashSet::new();
    skills
        .iter()
        .filter(|s| seen.insert(s.descriptor.skill_id.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::levels::LevelSnapshot;
    use crate::engine::schemas::{
        AnalysisContext, Diagnostics, GapMetrics, MissingStatus, ResumeOnlyStatus,
        ANALYSIS_SCHEMA_VERSION,
    };
    use crate::taxonomy::{skill_node, SkillType};
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn descriptor(id: &str, name: &str) -> SkillDescriptor {
        SkillDescriptor::from(&skill_node(id, name, SkillType::Skill))
    }

    fn level(score: f32, years: Option<f32>) -> LevelSnapshot {
        LevelSnapshot::normalized(None, Some(score), years, Some(0.8), vec![])
    }

    fn empty_result() -> GapAnalysisResult {
        GapAnalysisResult {
            version: ANALYSIS_SCHEMA_VERSION.to_string(),
            analysis_id: None,
            context: AnalysisContext {
                resume_id: Uuid::new_v4(),
                job_id: Uuid::new_v4(),
                processing_run_id: None,
                job_title: None,
                company: None,
                extractor_mode: "all_in_one".to_string(),
                extractor_version: "aio-2".to_string(),
                config: json!({}),
                taxonomy_snapshot: None,
                generated_at: Utc::now(),
            },
            metrics: GapMetrics::default(),
            matched_skills: vec![],
            missing_skills: vec![],
            resume_skills: vec![],
            report_markdown: None,
            diagnostics: Diagnostics::default(),
            extras: json!({}),
        }
    }

    #[test]
    fn test_empty_result_renders_title_and_score_only() {
        let md = ReportRenderer.render(&empty_result());
        assert!(md.starts_with("# Career Gap Analysis"));
        assert!(md.contains("Overall Match: 0.00"));
        assert!(!md.contains("## "));
    }

    #[test]
    fn test_missing_hot_tech_gets_marker() {
        let mut result = empty_result();
        let mut d = descriptor("onet.k8s", "Kubernetes");
        d.hot_tech = true;
        result.missing_skills.push(MissingSkill {
            descriptor: d,
            token: "Kubernetes".to_string(),
            status: MissingStatus::Missing,
            job_score: 0.8,
            is_required: Some(true),
        });

        let md = ReportRenderer.render(&result);
        assert!(md.contains("## Missing Skills (Required)"));
        assert!(md.contains("- Kubernetes 🔥"));
    }

    #[test]
    fn test_underqualified_shows_levels_and_gap() {
        let mut result = empty_result();
        result.matched_skills.push(MatchedSkill {
            descriptor: descriptor("onet.python", "Python"),
            token: "Python".to_string(),
            status: MatchStatus::Underqualified,
            job_score: 0.9,
            resume_score: 0.9,
            candidate_level: Some(level(1.0, None)),
            required_level: Some(level(3.5, Some(5.0))),
            level_delta: 2.5,
            is_required: Some(true),
        });

        let md = ReportRenderer.render(&result);
        assert!(md.contains("## Underqualified Skills"));
        assert!(md.contains("Candidate Level: working (1.0/4.0)"));
        assert!(md.contains("Required Level: working (3.5/4.0) - 5+ years"));
        assert!(md.contains("⚠️ Level Gap: 2.5 points below required"));
    }

    #[test]
    fn test_meets_requirements_section_without_gap_callout() {
        let mut result = empty_result();
        result.matched_skills.push(MatchedSkill {
            descriptor: descriptor("onet.sql", "SQL"),
            token: "SQL".to_string(),
            status: MatchStatus::MeetsOrExceeds,
            job_score: 0.9,
            resume_score: 0.9,
            candidate_level: Some(level(3.0, None)),
            required_level: Some(level(2.0, None)),
            level_delta: 0.0,
            is_required: Some(true),
        });

        let md = ReportRenderer.render(&result);
        assert!(md.contains("## Skills Meeting Requirements"));
        assert!(!md.contains("Level Gap"));
    }

    #[test]
    fn test_nice_to_have_sections_split_from_required() {
        let mut result = empty_result();
        result.missing_skills.push(MissingSkill {
            descriptor: descriptor("onet.kafka", "Kafka"),
            token: "Kafka".to_string(),
            status: MissingStatus::Missing,
            job_score: 0.7,
            is_required: Some(false),
        });

        let md = ReportRenderer.render(&result);
        assert!(md.contains("## Nice to Have - Missing Skills"));
        assert!(!md.contains("## Missing Skills (Required)"));
    }

    #[test]
    fn test_resume_skills_deduped_by_id() {
        let mut result = empty_result();
        for _ in 0..2 {
            result.resume_skills.push(ResumeSkill {
                descriptor: descriptor("onet.python", "Python"),
                token: "Python".to_string(),
                status: ResumeOnlyStatus::ResumeOnly,
                resume_score: 0.9,
                candidate_level: Some(level(2.0, None)),
            });
        }

        let md = ReportRenderer.render(&result);
        assert_eq!(md.matches("- Python").count(), 1);
    }

    #[test]
    fn test_rendering_is_pure_and_stable() {
        let mut result = empty_result();
        result.resume_skills.push(ResumeSkill {
            descriptor: descriptor("onet.rust", "Rust"),
            token: "Rust".to_string(),
            status: ResumeOnlyStatus::ResumeOnly,
            resume_score: 0.95,
            candidate_level: Some(level(3.0, None)),
        });

        let a = ReportRenderer.render(&result);
        let b = ReportRenderer.render(&result);
        assert_eq!(a, b);
    }
}
