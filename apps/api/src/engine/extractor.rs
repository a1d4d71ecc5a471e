//! Skill extraction: free text in, structured skills with proficiency levels
//! and evidence out.
//!
//! Two implementations sit behind [`SkillExtractor`], chosen at engine
//! construction: [`LlmExtractor`] (production) and [`KeywordExtractor`]
//! (deterministic vocabulary matcher for tests and offline runs). The choice
//! is deliberate, never a runtime fallback.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::config::{ExtractionConfig, ExtractionMode};
use crate::engine::levels::LevelSnapshot;
use crate::engine::prompts;
use crate::engine::retry;
use crate::errors::EngineError;
use crate::llm_client::{LlmClient, LlmError};

/// Byte offsets of an evidence fragment within the input text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A single skill detected in text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedSkill {
    pub name: String,
    /// Job descriptions only; always false on the resume side.
    pub nice_to_have: bool,
    pub evidence_spans: Vec<Span>,
    pub evidence_texts: Vec<String>,
    pub level: LevelSnapshot,
}

/// The extractor's full output for one document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub skills: Vec<ExtractedSkill>,
    pub responsibilities: Vec<String>,
}

/// The extraction seam. `version`, `model_id`, and `prompt_version` are the
/// cache key components: bump any of them to invalidate cached output.
#[async_trait]
pub trait SkillExtractor: Send + Sync {
    async fn extract(
        &self,
        text: &str,
        is_job_description: bool,
    ) -> Result<ExtractionOutput, EngineError>;

    fn version(&self) -> &str;
    fn model_id(&self) -> &str;
    fn prompt_version(&self) -> &str;
}

// ── Raw LLM payload shapes ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawLevel {
    label: Option<String>,
    score: Option<f32>,
    years: Option<f32>,
    confidence: Option<f32>,
    signals: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawSpan {
    start: usize,
    end: usize,
}

#[derive(Debug, Deserialize)]
struct RawSkill {
    name: String,
    #[serde(default)]
    nice_to_have: bool,
    #[serde(default)]
    evidence_spans: Vec<RawSpan>,
    #[serde(default)]
    evidence_texts: Vec<String>,
    level: Option<RawLevel>,
}

#[derive(Debug, Deserialize)]
struct RawExtraction {
    #[serde(default)]
    skills: Vec<RawSkill>,
    #[serde(default)]
    responsibilities: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawResponsibilities {
    #[serde(default)]
    responsibilities: Vec<String>,
}

// ── LLM-backed extractor ────────────────────────────────────────────────────

const EXTRACTOR_VERSION: &str = "aio-2";
/// Reask budget for schema-invalid model replies.
const REASK_BUDGET: usize = 3;
const MAX_EVIDENCE_CHARS: usize = 200;

pub struct LlmExtractor {
    llm: LlmClient,
    config: ExtractionConfig,
}

impl LlmExtractor {
    pub fn new(llm: LlmClient, config: ExtractionConfig) -> Self {
        Self { llm, config }
    }

    /// Calls the model with the reask loop: on a schema-invalid reply, the
    /// next attempt carries a correction suffix. Transport errors share the
    /// same budget.
    async fn call_with_reask<T: serde::de::DeserializeOwned>(
        &self,
        template: &str,
        system: &str,
        text: &str,
    ) -> Result<T, EngineError> {
        let base_prompt = template.replace("{text}", text);
        let model = self.config.extractor_model.clone();

        let (result, outcome) = retry::bounded(REASK_BUDGET, "extractor reask", |attempt| {
            let prompt = if attempt == 0 {
                base_prompt.clone()
            } else {
                format!("{base_prompt}{}", prompts::REASK_SUFFIX)
            };
            let model = model.clone();
            async move { self.llm.call_json::<T>(&model, &prompt, system).await }
        })
        .await;

        match result {
            Ok(parsed) => {
                if outcome.attempts > 1 {
                    info!(attempts = outcome.attempts, "Extraction recovered via reask");
                }
                Ok(parsed)
            }
            Err(e @ LlmError::Parse(_)) => Err(EngineError::ExtractionFailed(format!(
                "model returned malformed JSON after {} attempts: {e}",
                outcome.attempts
            ))),
            Err(e) => Err(EngineError::ExtractionFailed(e.to_string())),
        }
    }

    async fn extract_all_in_one(
        &self,
        text: &str,
        is_job_description: bool,
    ) -> Result<ExtractionOutput, EngineError> {
        let (template, system) = if is_job_description {
            (prompts::JD_ALL_IN_ONE_TEMPLATE, prompts::JD_EXTRACTION_SYSTEM)
        } else {
            (
                prompts::RESUME_ALL_IN_ONE_TEMPLATE,
                prompts::RESUME_EXTRACTION_SYSTEM,
            )
        };

        let raw: RawExtraction = self.call_with_reask(template, system, text).await?;
        Ok(postprocess(raw, text, is_job_description, &self.config))
    }

    /// Legacy mode: skills+levels call, then a separate responsibilities call.
    async fn extract_current(
        &self,
        text: &str,
        is_job_description: bool,
    ) -> Result<ExtractionOutput, EngineError> {
        let system = if is_job_description {
            prompts::JD_EXTRACTION_SYSTEM
        } else {
            prompts::RESUME_EXTRACTION_SYSTEM
        };

        let skills_raw: RawExtraction = self
            .call_with_reask(prompts::SKILLS_ONLY_TEMPLATE, system, text)
            .await?;
        let resp_raw: RawResponsibilities = self
            .call_with_reask(prompts::RESPONSIBILITIES_TEMPLATE, system, text)
            .await?;

        let mut out = postprocess(skills_raw, text, is_job_description, &self.config);
        out.responsibilities = clean_responsibilities(resp_raw.responsibilities);
        Ok(out)
    }
}

#[async_trait]
impl SkillExtractor for LlmExtractor {
    async fn extract(
        &self,
        text: &str,
        is_job_description: bool,
    ) -> Result<ExtractionOutput, EngineError> {
        let out = match self.config.mode {
            ExtractionMode::AllInOne => self.extract_all_in_one(text, is_job_description).await?,
            ExtractionMode::Current => self.extract_current(text, is_job_description).await?,
        };
        debug!(
            skills = out.skills.len(),
            responsibilities = out.responsibilities.len(),
            is_job_description,
            "Extraction complete"
        );
        Ok(out)
    }

    fn version(&self) -> &str {
        EXTRACTOR_VERSION
    }

    fn model_id(&self) -> &str {
        &self.config.extractor_model
    }

    fn prompt_version(&self) -> &str {
        prompts::PROMPT_VERSION
    }
}

/// Normalises a raw model reply into the output contract: non-empty names,
/// valid spans only, clamped levels, nice-to-have rules applied.
fn postprocess(
    raw: RawExtraction,
    text: &str,
    is_job_description: bool,
    config: &ExtractionConfig,
) -> ExtractionOutput {
    let mut skills = Vec::with_capacity(raw.skills.len());

    for s in raw.skills {
        let name = s.name.trim().to_string();
        if name.is_empty() {
            continue;
        }

        let mut spans = Vec::new();
        let mut texts = Vec::new();
        for span in s.evidence_spans.into_iter().take(config.max_spans_per_skill) {
            // Invalid offsets are dropped silently.
            let Some(frag) = text.get(span.start..span.end) else {
                continue;
            };
            let frag: String = frag.chars().take(MAX_EVIDENCE_CHARS).collect();
            if frag.trim().is_empty() {
                continue;
            }
            spans.push(Span {
                start: span.start,
                end: span.end,
            });
            texts.push(frag);
        }
        if texts.is_empty() {
            // Keep model-provided fragments when no spans survived, still
            // bounded in count and length.
            texts = s
                .evidence_texts
                .into_iter()
                .filter(|t| !t.trim().is_empty())
                .take(config.max_spans_per_skill)
                .map(|t| t.chars().take(MAX_EVIDENCE_CHARS).collect())
                .collect();
        }

        let nice_to_have = is_job_description && s.nice_to_have;

        let mut level = match s.level {
            Some(l) => LevelSnapshot::normalized(
                l.label.as_deref(),
                l.score,
                l.years,
                l.confidence,
                l.signals.unwrap_or_default(),
            ),
            None => LevelSnapshot::working_default(),
        };
        if nice_to_have && config.cap_nice_to_have && level.years.is_none() {
            level = level.capped_at_working();
        }

        skills.push(ExtractedSkill {
            name,
            nice_to_have,
            evidence_spans: spans,
            evidence_texts: texts,
            level,
        });
    }

    ExtractionOutput {
        skills,
        responsibilities: clean_responsibilities(raw.responsibilities),
    }
}

fn clean_responsibilities(raw: Vec<String>) -> Vec<String> {
    raw.into_iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect()
}

// ── Deterministic keyword extractor ─────────────────────────────────────────

/// Test-mode extractor: matches a small built-in vocabulary against the
/// lowercased input. No network, no evidence spans, confidence capped at 0.5.
pub struct KeywordExtractor;

/// (needles, canonical name) — first needle hit wins.
const VOCABULARY: &[(&[&str], &str)] = &[
    (&["python"], "Python"),
    (&["javascript", " js ", " js,", " js."], "JavaScript"),
    (&["typescript"], "TypeScript"),
    (&[" java ", " java,", " java."], "Java"),
    (&[" rust"], "Rust"),
    (&[" go ", " go,", " go.", "golang"], "Go"),
    (&["react"], "React.js"),
    (&["angular"], "Angular"),
    (&["vue"], "Vue.js"),
    (&["node"], "Node.js"),
    (&["django"], "Django"),
    (&["aws", "amazon web services"], "AWS"),
    (&["azure"], "Azure"),
    (&["gcp", "google cloud"], "Google Cloud"),
    (&["docker"], "Docker"),
    (&["kubernetes", "k8s"], "Kubernetes"),
    (&["terraform"], "Terraform"),
    (&["jenkins"], "Jenkins"),
    (&[" git"], "Git"),
    (&["sql"], "SQL"),
    (&["postgresql", "postgres"], "PostgreSQL"),
    (&["mysql"], "MySQL"),
    (&["mongodb", "mongo"], "MongoDB"),
    (&["redis"], "Redis"),
    (&["kafka"], "Kafka"),
    (&["graphql"], "GraphQL"),
    (&["rest api", "restful"], "REST APIs"),
    (&["machine learning", " ml "], "Machine Learning"),
];

const RESPONSIBILITY_CUES: &[(&str, &str)] = &[
    ("web", "Develop web applications"),
    ("api", "Design RESTful APIs"),
    ("database", "Database design and management"),
    ("cloud", "Cloud infrastructure management"),
    ("pipeline", "Build data pipelines"),
];

#[async_trait]
impl SkillExtractor for KeywordExtractor {
    async fn extract(
        &self,
        text: &str,
        _is_job_description: bool,
    ) -> Result<ExtractionOutput, EngineError> {
        // Pad so word-ish needles like "java " match at string edges.
        let haystack = format!(" {} ", text.to_lowercase());

        let mut skills = Vec::new();
        for (needles, canonical) in VOCABULARY {
            if needles.iter().any(|n| haystack.contains(n))
                && !skills
                    .iter()
                    .any(|s: &ExtractedSkill| s.name == *canonical)
            {
                skills.push(ExtractedSkill {
                    name: canonical.to_string(),
                    nice_to_have: false,
                    evidence_spans: Vec::new(),
                    evidence_texts: Vec::new(),
                    level: LevelSnapshot {
                        confidence: 0.45,
                        ..LevelSnapshot::working_default()
                    },
                });
            }
        }

        let responsibilities = RESPONSIBILITY_CUES
            .iter()
            .filter(|(cue, _)| haystack.contains(cue))
            .map(|(_, r)| r.to_string())
            .collect();

        if skills.is_empty() {
            warn!("Keyword extractor found no vocabulary matches");
        }

        Ok(ExtractionOutput {
            skills,
            responsibilities,
        })
    }

    fn version(&self) -> &str {
        "kw-1"
    }

    fn model_id(&self) -> &str {
        "deterministic-keyword"
    }

    fn prompt_version(&self) -> &str {
        "none"
    }
}
